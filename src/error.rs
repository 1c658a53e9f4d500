use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Input file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Unsupported input format: {0}")]
    UnsupportedFormat(String),

    #[error("Missing column: {0}")]
    MissingColumn(String),

    #[error("Parse error in column '{column}' at row {row}: {value:?}")]
    Parse {
        column: String,
        row: usize,
        value: String,
    },

    #[error("Config error: {0}")]
    Config(String),

    #[error("Spreadsheet error: {0}")]
    Spreadsheet(String),

    #[error("Export error: {0}")]
    Export(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Polars error: {0}")]
    Polars(String),
}

impl From<polars::error::PolarsError> for ReportError {
    fn from(err: polars::error::PolarsError) -> Self {
        ReportError::Polars(err.to_string())
    }
}

impl From<calamine::Error> for ReportError {
    fn from(err: calamine::Error) -> Self {
        ReportError::Spreadsheet(err.to_string())
    }
}

impl From<rust_xlsxwriter::XlsxError> for ReportError {
    fn from(err: rust_xlsxwriter::XlsxError) -> Self {
        ReportError::Export(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ReportError>;
