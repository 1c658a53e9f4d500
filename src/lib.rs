pub mod config;
pub mod error;
pub mod export;
pub mod loader;
pub mod merge;
pub mod pipeline;
pub mod table;
pub mod views;

pub use config::ReportConfig;
pub use error::{ReportError, Result};
pub use export::{FileSink, OutputFormat, ReportSink};
pub use pipeline::{ReportBuilder, RunSummary};
