use crate::error::{ReportError, Result};
use crate::table::{Cell, ExportTable};
use rust_xlsxwriter::Workbook;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Xlsx,
    Csv,
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Xlsx => "xlsx",
            OutputFormat::Csv => "csv",
        }
    }
}

/// Destination of every table the pipeline produces.
pub trait ReportSink {
    /// Persist `table` under the file stem `name`, replacing any previous output.
    fn write_table(&self, name: &str, table: &ExportTable) -> Result<PathBuf>;
}

/// Writes `<output_dir>/<name>.<ext>` files.
#[derive(Debug, Clone)]
pub struct FileSink {
    output_dir: PathBuf,
    format: OutputFormat,
    sheet_name: String,
}

impl FileSink {
    pub fn new(output_dir: impl Into<PathBuf>, format: OutputFormat) -> Self {
        Self {
            output_dir: output_dir.into(),
            format,
            sheet_name: "Sheet1".to_string(),
        }
    }

    pub fn with_sheet_name(mut self, sheet_name: impl Into<String>) -> Self {
        self.sheet_name = sheet_name.into();
        self
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.output_dir
            .join(format!("{}.{}", name, self.format.extension()))
    }
}

impl ReportSink for FileSink {
    fn write_table(&self, name: &str, table: &ExportTable) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.output_dir)?;
        let path = self.path_for(name);

        match self.format {
            OutputFormat::Xlsx => write_xlsx(&path, &self.sheet_name, table)?,
            OutputFormat::Csv => write_csv(&path, table)?,
        }

        info!("Wrote {} rows to {}", table.height(), path.display());
        Ok(path)
    }
}

/// Keeps written tables in memory. Handy for dry runs and tests.
#[derive(Debug, Default)]
pub struct MemorySink {
    tables: RefCell<Vec<(String, ExportTable)>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<ExportTable> {
        self.tables
            .borrow()
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, t)| t.clone())
    }

    pub fn names(&self) -> Vec<String> {
        self.tables.borrow().iter().map(|(n, _)| n.clone()).collect()
    }
}

impl ReportSink for MemorySink {
    fn write_table(&self, name: &str, table: &ExportTable) -> Result<PathBuf> {
        self.tables
            .borrow_mut()
            .push((name.to_string(), table.clone()));
        Ok(PathBuf::from(name))
    }
}

pub fn write_xlsx(path: &Path, sheet_name: &str, table: &ExportTable) -> Result<()> {
    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    worksheet.set_name(sheet_name)?;

    for (col, header) in table.headers.iter().enumerate() {
        worksheet.write_string(0, column_number(col)?, header)?;
    }

    for (idx, row) in table.rows.iter().enumerate() {
        let row_num = u32::try_from(idx + 1)
            .map_err(|_| ReportError::Export(format!("too many rows for {}", path.display())))?;
        for (col, cell) in row.iter().enumerate() {
            let col = column_number(col)?;
            match cell {
                Cell::Empty => {}
                Cell::Text(s) => {
                    worksheet.write_string(row_num, col, s)?;
                }
                Cell::Number(n) => {
                    worksheet.write_number(row_num, col, *n)?;
                }
            }
        }
    }

    workbook.save(path)?;
    Ok(())
}

fn column_number(idx: usize) -> Result<u16> {
    u16::try_from(idx).map_err(|_| ReportError::Export(format!("column index {} out of range", idx)))
}

pub fn write_csv(path: &Path, table: &ExportTable) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(&table.headers)?;
    for row in &table.rows {
        writer.write_record(row.iter().map(Cell::render))?;
    }
    writer.flush()?;
    Ok(())
}
