//! Source loading.
//!
//! Workbooks are read with calamine and CSV files with polars; both end up as
//! a `RawTable` (header plus untyped cells) which `build_source_frame` turns
//! into the typed source DataFrame every other step works on.

use crate::config::{ReportConfig, SourceColumns};
use crate::error::{ReportError, Result};
use calamine::{open_workbook_auto_from_rs, Data, Reader};
use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime};
use polars::prelude::*;
use std::collections::BTreeSet;
use std::io::Cursor;
use std::path::Path;
use tracing::{debug, info, warn};

/// Days between 0001-01-01 and 1970-01-01, the epoch of polars' Date type.
const EPOCH_DAYS_FROM_CE: i32 = 719_163;

static EMPTY_CELL: RawValue = RawValue::Empty;

/// A cell as read from disk.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Empty,
    Text(String),
    Number(f64),
    Date(NaiveDate),
}

impl RawValue {
    pub fn is_empty(&self) -> bool {
        matches!(self, RawValue::Empty)
    }

    fn render(&self, date_format: &str) -> Option<String> {
        match self {
            RawValue::Empty => None,
            RawValue::Text(s) => Some(s.clone()),
            RawValue::Number(n) => Some(n.to_string()),
            RawValue::Date(d) => Some(d.format(date_format).to_string()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<RawValue>>,
}

impl RawTable {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// Distinct non-empty values of a column, rendered as text.
    pub fn distinct_values(&self, name: &str, date_format: &str) -> Option<BTreeSet<String>> {
        let idx = self.column_index(name)?;
        Some(
            self.rows
                .iter()
                .filter_map(|row| row.get(idx))
                .filter_map(|cell| cell.render(date_format))
                .collect(),
        )
    }
}

pub struct SourceLoader<'a> {
    config: &'a ReportConfig,
    sheet: Option<String>,
}

impl<'a> SourceLoader<'a> {
    pub fn new(config: &'a ReportConfig) -> Self {
        Self {
            config,
            sheet: None,
        }
    }

    /// Read a named worksheet instead of the first one.
    pub fn with_sheet(mut self, sheet: Option<String>) -> Self {
        self.sheet = sheet;
        self
    }

    pub fn load(&self, path: impl AsRef<Path>) -> Result<DataFrame> {
        let path = path.as_ref();
        let raw = self.read_raw(path)?;
        let df = build_source_frame(&raw, &self.config.columns, &self.config.date_format)?;
        info!(
            "Loaded {} source rows ({} columns) from {}",
            df.height(),
            df.width(),
            path.display()
        );
        debug!("Source frame:\n{}", df);
        Ok(df)
    }

    pub fn read_raw(&self, path: impl AsRef<Path>) -> Result<RawTable> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ReportError::NotFound(path.to_path_buf()));
        }

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();

        match extension.as_str() {
            "csv" => read_csv(path),
            "xlsx" | "xlsm" | "xlsb" | "xls" | "ods" => read_workbook(path, self.sheet.as_deref()),
            other => Err(ReportError::UnsupportedFormat(format!(
                "'{}' ({})",
                other,
                path.display()
            ))),
        }
    }
}

fn read_workbook(path: &Path, sheet: Option<&str>) -> Result<RawTable> {
    // Format is sniffed from the content, so `.XLSX` opens too.
    let bytes = std::fs::read(path)?;
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes))?;

    let sheet_name = match sheet {
        Some(name) => name.to_string(),
        None => workbook
            .sheet_names()
            .first()
            .cloned()
            .ok_or_else(|| ReportError::Spreadsheet(format!("{} has no worksheets", path.display())))?,
    };
    debug!("Reading worksheet '{}' of {}", sheet_name, path.display());

    let range = workbook.worksheet_range(&sheet_name)?;
    let mut rows = range.rows();

    let headers: Vec<String> = match rows.next() {
        Some(header) => header.iter().map(header_text).collect(),
        None => Vec::new(),
    };
    let rows = rows
        .map(|row| row.iter().map(raw_from_cell).collect())
        .collect();

    Ok(RawTable { headers, rows })
}

fn read_csv(path: &Path) -> Result<RawTable> {
    // Every column as text; typing happens in build_source_frame.
    let df = LazyCsvReader::new(path)
        .with_infer_schema_length(Some(0))
        .finish()
        .and_then(|lf| lf.collect())
        .map_err(|e| ReportError::Spreadsheet(format!("Failed to read CSV {}: {}", path.display(), e)))?;

    let headers: Vec<String> = df.get_column_names().iter().map(|s| s.to_string()).collect();
    let mut rows = vec![Vec::with_capacity(headers.len()); df.height()];

    for series in df.get_columns() {
        let values = series.str()?;
        for (row, value) in rows.iter_mut().zip(values.into_iter()) {
            row.push(match value {
                Some(s) if !s.trim().is_empty() => RawValue::Text(s.to_string()),
                _ => RawValue::Empty,
            });
        }
    }

    Ok(RawTable { headers, rows })
}

fn header_text(cell: &Data) -> String {
    match cell {
        Data::String(s) => s.clone(),
        Data::Empty => String::new(),
        other => other.to_string(),
    }
}

fn raw_from_cell(cell: &Data) -> RawValue {
    match cell {
        Data::Empty => RawValue::Empty,
        Data::String(s) if s.trim().is_empty() => RawValue::Empty,
        Data::String(s) => RawValue::Text(s.clone()),
        Data::Float(f) => RawValue::Number(*f),
        Data::Int(i) => RawValue::Number(*i as f64),
        Data::Bool(b) => RawValue::Text(b.to_string()),
        Data::DateTime(dt) => date_from_serial(dt.as_f64()),
        Data::DateTimeIso(s) => parse_iso_date(s)
            .map(RawValue::Date)
            .unwrap_or_else(|| RawValue::Text(s.clone())),
        other => RawValue::Text(other.to_string()),
    }
}

/// Out-of-range serials stay as text so the date column rejects them with `Parse`.
fn date_from_serial(serial: f64) -> RawValue {
    excel_serial_to_date(serial)
        .map(RawValue::Date)
        .unwrap_or_else(|| RawValue::Text(serial.to_string()))
}

/// Excel serial date conversion using the 1899-12-30 base.
fn excel_serial_to_date(serial: f64) -> Option<NaiveDate> {
    if !serial.is_finite() {
        return None;
    }
    let base = NaiveDate::from_ymd_opt(1899, 12, 30)?;
    base.checked_add_signed(Duration::try_days(serial.floor() as i64)?)
}

fn parse_iso_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
        .map(|dt| dt.date())
        .or_else(|_| NaiveDate::parse_from_str(s, "%Y-%m-%d"))
        .ok()
}

enum ColumnRole {
    Date,
    Numeric,
    Text,
}

/// Type the raw cells into the source frame.
///
/// The date column becomes a polars Date, the commission columns Float64 and
/// everything else (the contract included) text. Rows without a contract are
/// dropped because they cannot take part in any join.
pub fn build_source_frame(
    raw: &RawTable,
    columns: &SourceColumns,
    date_format: &str,
) -> Result<DataFrame> {
    for required in columns.required() {
        if raw.column_index(required).is_none() {
            return Err(ReportError::MissingColumn(required.to_string()));
        }
    }
    let contract_idx = raw
        .column_index(&columns.contract)
        .ok_or_else(|| ReportError::MissingColumn(columns.contract.clone()))?;

    // (spreadsheet row number, cells); row 1 is the header.
    let mut kept: Vec<(usize, &Vec<RawValue>)> = Vec::with_capacity(raw.rows.len());
    for (idx, row) in raw.rows.iter().enumerate() {
        let line = idx + 2;
        if row.iter().all(RawValue::is_empty) {
            continue;
        }
        if row.get(contract_idx).map_or(true, RawValue::is_empty) {
            warn!("Skipping row {}: no value in '{}'", line, columns.contract);
            continue;
        }
        kept.push((line, row));
    }

    let numeric = columns.numeric();
    let mut series = Vec::with_capacity(raw.headers.len());

    for (col_idx, name) in raw.headers.iter().enumerate() {
        let role = if *name == columns.date {
            ColumnRole::Date
        } else if numeric.contains(&name.as_str()) {
            ColumnRole::Numeric
        } else {
            ColumnRole::Text
        };
        let cells = kept
            .iter()
            .map(|(line, row)| (*line, row.get(col_idx).unwrap_or(&EMPTY_CELL)));

        let s = match role {
            ColumnRole::Date => {
                let days = cells
                    .map(|(line, cell)| parse_date_cell(cell, name, line, date_format))
                    .collect::<Result<Vec<Option<i32>>>>()?;
                Series::new(name, days).cast(&DataType::Date)?
            }
            ColumnRole::Numeric => {
                let values = cells
                    .map(|(line, cell)| parse_number_cell(cell, name, line))
                    .collect::<Result<Vec<Option<f64>>>>()?;
                Series::new(name, values)
            }
            ColumnRole::Text => {
                let values: Vec<Option<String>> =
                    cells.map(|(_, cell)| cell.render(date_format)).collect();
                Series::new(name, values)
            }
        };
        series.push(s);
    }

    Ok(DataFrame::new(series)?)
}

fn parse_date_cell(
    cell: &RawValue,
    column: &str,
    line: usize,
    date_format: &str,
) -> Result<Option<i32>> {
    let date = match cell {
        RawValue::Empty => return Ok(None),
        RawValue::Date(d) => *d,
        RawValue::Text(s) => NaiveDate::parse_from_str(s.trim(), date_format).map_err(|_| {
            ReportError::Parse {
                column: column.to_string(),
                row: line,
                value: s.clone(),
            }
        })?,
        RawValue::Number(n) => {
            return Err(ReportError::Parse {
                column: column.to_string(),
                row: line,
                value: n.to_string(),
            })
        }
    };
    Ok(Some(date.num_days_from_ce() - EPOCH_DAYS_FROM_CE))
}

fn parse_number_cell(cell: &RawValue, column: &str, line: usize) -> Result<Option<f64>> {
    let parse_error = |value: String| ReportError::Parse {
        column: column.to_string(),
        row: line,
        value,
    };
    match cell {
        RawValue::Empty => Ok(None),
        RawValue::Number(n) => Ok(Some(*n)),
        RawValue::Text(s) => s
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|_| parse_error(s.clone())),
        RawValue::Date(d) => Err(parse_error(d.to_string())),
    }
}
