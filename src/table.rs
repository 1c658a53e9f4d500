//! Cell-level view of a frame, used by the exporters.
//!
//! A polars column holds a single dtype, so a text placeholder cannot live in
//! a Float64 column. Placeholders for such columns are applied here, when the
//! frame is turned into cells, which keeps real amounts numeric in the
//! written spreadsheet.

use crate::config::FillValue;
use crate::error::Result;
use polars::prelude::*;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Text(String),
    Number(f64),
}

impl Cell {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Cell::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Cell::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Plain-text rendering used by the CSV writer.
    pub fn render(&self) -> String {
        match self {
            Cell::Empty => String::new(),
            Cell::Text(s) => s.clone(),
            Cell::Number(n) => n.to_string(),
        }
    }
}

impl From<&FillValue> for Cell {
    fn from(value: &FillValue) -> Self {
        match value {
            FillValue::Number(n) => Cell::Number(*n),
            FillValue::Text(s) => Cell::Text(s.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExportTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl ExportTable {
    pub fn from_frame(df: &DataFrame) -> Result<Self> {
        Self::with_placeholders(df, &BTreeMap::new())
    }

    /// Convert a frame, writing `placeholders[column]` wherever that column is null.
    pub fn with_placeholders(
        df: &DataFrame,
        placeholders: &BTreeMap<String, FillValue>,
    ) -> Result<Self> {
        let headers: Vec<String> = df.get_column_names().iter().map(|s| s.to_string()).collect();
        let mut rows = vec![Vec::with_capacity(headers.len()); df.height()];

        for series in df.get_columns() {
            let placeholder = placeholders
                .get(series.name())
                .map(Cell::from)
                .unwrap_or(Cell::Empty);
            for (row, cell) in rows.iter_mut().zip(column_cells(series, &placeholder)?) {
                row.push(cell);
            }
        }

        Ok(Self { headers, rows })
    }

    pub fn height(&self) -> usize {
        self.rows.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    pub fn column(&self, name: &str) -> Option<Vec<&Cell>> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().filter_map(|row| row.get(idx)).collect())
    }

    /// Cell of `column` in the first row whose `key_column` holds `key` as text.
    pub fn lookup(&self, key_column: &str, key: &str, column: &str) -> Option<&Cell> {
        let key_idx = self.column_index(key_column)?;
        let idx = self.column_index(column)?;
        self.rows
            .iter()
            .find(|row| row.get(key_idx).and_then(Cell::as_text) == Some(key))
            .and_then(|row| row.get(idx))
    }
}

fn column_cells(series: &Series, placeholder: &Cell) -> Result<Vec<Cell>> {
    let fill = |cell: Option<Cell>| cell.unwrap_or_else(|| placeholder.clone());

    if series.dtype().is_numeric() {
        let values = series.cast(&DataType::Float64)?;
        let cells = values
            .f64()?
            .into_iter()
            .map(|v| fill(v.map(Cell::Number)))
            .collect();
        return Ok(cells);
    }

    let values = series.cast(&DataType::String)?;
    let cells = values
        .str()?
        .into_iter()
        .map(|v| fill(v.map(|s| Cell::Text(s.to_string()))))
        .collect();
    Ok(cells)
}
