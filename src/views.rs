//! Per-category views of the source frame.

use crate::config::{ReportConfig, ViewSpec};
use crate::error::{ReportError, Result};
use crate::export::ReportSink;
use crate::table::ExportTable;
use polars::prelude::*;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewKind {
    /// One row per contract, picked by date.
    Detail,
    /// Per-contract sum of the commission amount.
    Aggregate,
}

#[derive(Debug, Clone)]
pub struct DerivedView {
    pub name: String,
    pub kind: ViewKind,
    pub frame: DataFrame,
}

impl DerivedView {
    pub fn height(&self) -> usize {
        self.frame.height()
    }
}

pub struct ViewProcessor<'a> {
    config: &'a ReportConfig,
    sink: &'a dyn ReportSink,
}

impl<'a> ViewProcessor<'a> {
    pub fn new(config: &'a ReportConfig, sink: &'a dyn ReportSink) -> Self {
        Self { config, sink }
    }

    /// Derive the view and write it to its own output.
    pub fn build_view(&self, source: &DataFrame, spec: &ViewSpec) -> Result<(DerivedView, PathBuf)> {
        let view = derive_view(source, spec, self.config)?;
        info!(
            "View {}: {} rows ({:?}, {} / {})",
            view.name,
            view.height(),
            view.kind,
            self.config.receipt_label(spec.receipt_type),
            self.config.category_label(spec.category)
        );
        debug!("View {}:\n{}", view.name, view.frame);

        let path = self
            .sink
            .write_table(&spec.output, &ExportTable::from_frame(&view.frame)?)?;
        Ok((view, path))
    }
}

/// Compute a view without writing it.
pub fn derive_view(source: &DataFrame, spec: &ViewSpec, config: &ReportConfig) -> Result<DerivedView> {
    let columns = &config.columns;
    let receipt = config.receipt_label(spec.receipt_type);
    let category = config.category_label(spec.category);

    let filtered = source
        .clone()
        .lazy()
        .filter(
            col(&columns.receipt_type)
                .eq(lit(receipt))
                .and(col(&columns.observation).eq(lit(category))),
        );

    let (kind, frame) = if spec.aggregate {
        (ViewKind::Aggregate, aggregate(filtered, spec, config)?)
    } else {
        (ViewKind::Detail, detail(filtered, spec, config)?)
    };

    Ok(DerivedView {
        name: spec.name.clone(),
        kind,
        frame,
    })
}

fn aggregate(filtered: LazyFrame, spec: &ViewSpec, config: &ReportConfig) -> Result<DataFrame> {
    let contract = config.columns.contract.as_str();
    let amount = config.columns.commission_amount.as_str();

    let df = filtered
        .group_by([col(contract)])
        .agg([col(amount).sum()])
        .sort_by_exprs(
            [col(contract)],
            SortMultipleOptions::default().with_maintain_order(true),
        )
        .collect()
        .map_err(|e| ReportError::Polars(format!("Aggregate view {} failed: {}", spec.name, e)))?;

    rename_present(df, &spec.renames)
}

fn detail(filtered: LazyFrame, spec: &ViewSpec, config: &ReportConfig) -> Result<DataFrame> {
    let columns = &config.columns;
    let date = columns.date.as_str();

    let df = filtered
        .sort_by_exprs(
            [col(date)],
            SortMultipleOptions::default()
                .with_order_descending(spec.sort.is_descending())
                .with_nulls_last(true)
                .with_maintain_order(true),
        )
        .unique_stable(
            Some(vec![columns.contract.clone()]),
            UniqueKeepStrategy::First,
        )
        .with_columns([col(date).dt().to_string(&config.date_format)])
        .collect()
        .map_err(|e| ReportError::Polars(format!("Detail view {} failed: {}", spec.name, e)))?;

    let df = rename_present(df, &spec.renames)?;
    drop_present(df, &columns.intermediate())
}

/// Rename the columns of `renames` that exist in `df`; others are ignored.
fn rename_present(df: DataFrame, renames: &BTreeMap<String, String>) -> Result<DataFrame> {
    let mut result = df;
    for (old_name, new_name) in renames {
        if result.column(old_name).is_ok() {
            result.rename(old_name, new_name).map_err(|e| {
                ReportError::Polars(format!(
                    "Failed to rename column {} to {}: {}",
                    old_name, new_name, e
                ))
            })?;
        }
    }
    Ok(result)
}

/// Drop the listed columns when present.
fn drop_present(df: DataFrame, names: &[&str]) -> Result<DataFrame> {
    let keep: Vec<String> = df
        .get_column_names()
        .iter()
        .filter(|c| !names.contains(c))
        .map(|c| c.to_string())
        .collect();
    Ok(df.select(keep)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CategoryTag, ReceiptType, SortOrder};
    use crate::export::MemorySink;
    use chrono::NaiveDate;

    const DAY_0: i32 = 719_163;

    fn days(d: u32, m: u32, y: i32) -> i32 {
        use chrono::Datelike;
        NaiveDate::from_ymd_opt(y, m, d).unwrap().num_days_from_ce() - DAY_0
    }

    fn source() -> DataFrame {
        let df = df! [
            "Data" => [
                days(15, 6, 2023),
                days(1, 1, 2023),
                days(3, 3, 2023),
                days(10, 2, 2023),
                days(20, 2, 2023),
                days(5, 5, 2023),
            ],
            "Tipo de recebimento" => ["CRÉDITO", "CRÉDITO", "CRÉDITO", "CRÉDITO", "DÉBITO", "CRÉDITO"],
            "OBSERVAÇÃO" => ["FLAT", "FLAT", "FLAT", "BONUS", "FLAT", "OUTRO"],
            "% Comissao" => [0.5, 0.5, 0.5, 0.1, 0.5, 0.2],
            "Valor base para calculo da comissao" => [100.0, 100.0, 100.0, 100.0, 100.0, 100.0],
            "Valor da Comissao" => [70.0, 50.0, 15.0, 30.0, -20.0, 5.0],
            "Proposta" => ["100", "100", "200", "100", "200", "300"],
            "Cliente" => ["Ana", "Ana", "Bia", "Ana", "Bia", "Caio"]
        ]
        .unwrap();
        df.lazy()
            .with_columns([col("Data").cast(DataType::Date)])
            .collect()
            .unwrap()
    }

    fn spec(name: &str) -> ViewSpec {
        ReportConfig::default()
            .views
            .into_iter()
            .find(|v| v.name == name)
            .unwrap()
    }

    fn text_column(df: &DataFrame, name: &str) -> Vec<Option<String>> {
        df.column(name)
            .unwrap()
            .str()
            .unwrap()
            .into_iter()
            .map(|v| v.map(|s| s.to_string()))
            .collect()
    }

    fn number_column(df: &DataFrame, name: &str) -> Vec<Option<f64>> {
        df.column(name).unwrap().f64().unwrap().into_iter().collect()
    }

    #[test]
    fn test_detail_keeps_earliest_row_per_contract() {
        let config = ReportConfig::default();
        let view = derive_view(&source(), &spec("credit-flat-detail"), &config).unwrap();

        assert_eq!(view.kind, ViewKind::Detail);
        assert_eq!(
            view.frame.get_column_names(),
            vec!["Data do repasse FLAT", "COMISSÃO FLAT", "Proposta", "Cliente"]
        );
        assert_eq!(
            text_column(&view.frame, "Proposta"),
            vec![Some("100".to_string()), Some("200".to_string())]
        );
        assert_eq!(
            text_column(&view.frame, "Data do repasse FLAT"),
            vec![Some("01/01/2023".to_string()), Some("03/03/2023".to_string())]
        );
        assert_eq!(number_column(&view.frame, "COMISSÃO FLAT"), vec![Some(50.0), Some(15.0)]);
    }

    #[test]
    fn test_detail_descending_keeps_latest_row() {
        let config = ReportConfig::default();
        let spec = spec("credit-flat-detail").with_sort(SortOrder::Descending);
        let view = derive_view(&source(), &spec, &config).unwrap();

        assert_eq!(
            text_column(&view.frame, "Data do repasse FLAT"),
            vec![Some("15/06/2023".to_string()), Some("03/03/2023".to_string())]
        );
        assert_eq!(number_column(&view.frame, "COMISSÃO FLAT"), vec![Some(70.0), Some(15.0)]);
    }

    /// Credit/flat rows for contract 100: two on the same day, one undated.
    fn tied_source() -> DataFrame {
        let df = df! [
            "Data" => [None, Some(days(1, 1, 2023)), Some(days(1, 1, 2023))],
            "Tipo de recebimento" => ["CRÉDITO", "CRÉDITO", "CRÉDITO"],
            "OBSERVAÇÃO" => ["FLAT", "FLAT", "FLAT"],
            "% Comissao" => [0.5, 0.5, 0.5],
            "Valor base para calculo da comissao" => [100.0, 100.0, 100.0],
            "Valor da Comissao" => [99.0, 10.0, 20.0],
            "Proposta" => ["100", "100", "100"]
        ]
        .unwrap();
        df.lazy()
            .with_columns([col("Data").cast(DataType::Date)])
            .collect()
            .unwrap()
    }

    #[test]
    fn test_detail_same_date_keeps_first_source_row() {
        let config = ReportConfig::default();
        for sort in [SortOrder::Ascending, SortOrder::Descending] {
            let spec = spec("credit-flat-detail").with_sort(sort);
            let view = derive_view(&tied_source(), &spec, &config).unwrap();

            assert_eq!(view.height(), 1, "{sort:?}");
            assert_eq!(
                text_column(&view.frame, "Data do repasse FLAT"),
                vec![Some("01/01/2023".to_string())],
                "{sort:?}"
            );
            assert_eq!(number_column(&view.frame, "COMISSÃO FLAT"), vec![Some(10.0)], "{sort:?}");
        }
    }

    #[test]
    fn test_detail_undated_row_only_when_nothing_else() {
        let config = ReportConfig::default();
        let undated = tied_source().slice(0, 1);
        let view = derive_view(&undated, &spec("credit-flat-detail"), &config).unwrap();

        assert_eq!(text_column(&view.frame, "Data do repasse FLAT"), vec![None]);
        assert_eq!(number_column(&view.frame, "COMISSÃO FLAT"), vec![Some(99.0)]);
    }

    #[test]
    fn test_aggregate_sums_matching_rows() {
        let config = ReportConfig::default();
        let view = derive_view(&source(), &spec("credit-flat-aggregate"), &config).unwrap();

        assert_eq!(view.kind, ViewKind::Aggregate);
        assert_eq!(view.frame.get_column_names(), vec!["Proposta", "PROVA REAL FLAT"]);
        assert_eq!(
            text_column(&view.frame, "Proposta"),
            vec![Some("100".to_string()), Some("200".to_string())]
        );
        assert_eq!(number_column(&view.frame, "PROVA REAL FLAT"), vec![Some(120.0), Some(15.0)]);
    }

    #[test]
    fn test_aggregate_conserves_total() {
        let config = ReportConfig::default();
        let source = source();
        for name in ["credit-flat-aggregate", "credit-bonus-aggregate"] {
            let spec = spec(name);
            let view = derive_view(&source, &spec, &config).unwrap();
            let label = spec.renames.values().next().unwrap();
            let view_total: f64 = number_column(&view.frame, label).into_iter().flatten().sum();

            let receipt = text_column(&source, "Tipo de recebimento");
            let category = text_column(&source, "OBSERVAÇÃO");
            let amounts = number_column(&source, "Valor da Comissao");
            let expected: f64 = (0..source.height())
                .filter(|&i| {
                    receipt[i].as_deref() == Some(config.receipt_label(spec.receipt_type))
                        && category[i].as_deref() == Some(config.category_label(spec.category))
                })
                .filter_map(|i| amounts[i])
                .sum();
            assert_eq!(view_total, expected, "{name}");
        }
    }

    #[test]
    fn test_empty_category_yields_empty_view() {
        let config = ReportConfig::default();
        let spec = ViewSpec::detail(
            "debit-bonus-detail",
            ReceiptType::Debit,
            CategoryTag::Bonus,
            &[("Data", "DATA DÉBITO BONUS")],
            "debit_bonus",
        );
        let view = derive_view(&source(), &spec, &config).unwrap();
        assert_eq!(view.height(), 0);
        assert!(view.frame.column("DATA DÉBITO BONUS").is_ok());
        assert!(view.frame.column("Proposta").is_ok());
    }

    #[test]
    fn test_build_view_writes_to_sink() {
        let config = ReportConfig::default();
        let sink = MemorySink::new();
        let processor = ViewProcessor::new(&config, &sink);

        let (view, path) = processor
            .build_view(&source(), &spec("credit-bonus-detail"))
            .unwrap();
        assert_eq!(path, PathBuf::from("TesteOrdemBonus"));

        let written = sink.get("TesteOrdemBonus").unwrap();
        assert_eq!(written.height(), view.height());
        assert_eq!(written.headers[0], "DATA REPASSE BONUS");
    }

    #[test]
    fn test_drop_present_ignores_unknown_columns() {
        let df = df! [ "a" => [1], "b" => [2] ].unwrap();
        let df = drop_present(df, &["b", "zzz"]).unwrap();
        assert_eq!(df.get_column_names(), vec!["a"]);
    }
}
