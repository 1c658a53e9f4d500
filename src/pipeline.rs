//! Load → views → merge → export.

use crate::config::{ReportConfig, ViewSpec};
use crate::error::Result;
use crate::export::ReportSink;
use crate::loader::SourceLoader;
use crate::merge::ReportMerger;
use crate::views::{DerivedView, ViewProcessor};
use polars::prelude::*;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, PartialEq)]
pub struct ViewSummary {
    pub name: String,
    pub output: PathBuf,
    pub rows: usize,
    /// Sum of the commission column as it appears in the view.
    pub amount_total: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub source_rows: usize,
    pub contracts: usize,
    pub views: Vec<ViewSummary>,
    pub report_path: PathBuf,
}

pub struct ReportBuilder<'a> {
    config: &'a ReportConfig,
    sink: &'a dyn ReportSink,
    sheet: Option<String>,
}

impl<'a> ReportBuilder<'a> {
    pub fn new(config: &'a ReportConfig, sink: &'a dyn ReportSink) -> Self {
        Self {
            config,
            sink,
            sheet: None,
        }
    }

    /// Worksheet to read from workbook inputs (first sheet by default).
    pub fn with_input_sheet(mut self, sheet: Option<String>) -> Self {
        self.sheet = sheet;
        self
    }

    pub fn run(&self, input: impl AsRef<Path>) -> Result<RunSummary> {
        self.config.validate()?;
        let source = SourceLoader::new(self.config)
            .with_sheet(self.sheet.clone())
            .load(input)?;
        self.run_frame(&source)
    }

    /// Run every step after loading.
    pub fn run_frame(&self, source: &DataFrame) -> Result<RunSummary> {
        let processor = ViewProcessor::new(self.config, self.sink);

        let mut views: Vec<DerivedView> = Vec::with_capacity(self.config.views.len());
        let mut summaries = Vec::with_capacity(self.config.views.len());
        for spec in &self.config.views {
            let (view, output) = processor.build_view(source, spec)?;
            summaries.push(ViewSummary {
                name: view.name.clone(),
                output,
                rows: view.height(),
                amount_total: self.amount_total(&view, spec),
            });
            views.push(view);
        }

        let report = ReportMerger::new(self.config).merge(source, &views)?;
        let report_path = self
            .sink
            .write_table(&self.config.report_output, &report.to_table()?)?;

        let summary = RunSummary {
            source_rows: source.height(),
            contracts: report.height(),
            views: summaries,
            report_path,
        };
        info!(
            "Report complete: {} source rows, {} contracts, {} views -> {}",
            summary.source_rows,
            summary.contracts,
            summary.views.len(),
            summary.report_path.display()
        );
        Ok(summary)
    }

    fn amount_total(&self, view: &DerivedView, spec: &ViewSpec) -> f64 {
        let amount = &self.config.columns.commission_amount;
        let column = spec.renames.get(amount).unwrap_or(amount);
        view.frame
            .column(column)
            .ok()
            .and_then(|s| s.f64().ok())
            .and_then(|ca| ca.sum())
            .unwrap_or(0.0)
    }
}
