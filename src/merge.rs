//! Merging of the derived views into the wide report.

use crate::config::{FillValue, ReportConfig};
use crate::error::{ReportError, Result};
use crate::table::ExportTable;
use crate::views::DerivedView;
use polars::prelude::*;
use std::collections::BTreeMap;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct MergedReport {
    pub frame: DataFrame,
    /// Placeholders that could not be stored in the frame because their type
    /// differs from the column's; applied by `to_table`.
    pub placeholders: BTreeMap<String, FillValue>,
}

impl MergedReport {
    pub fn height(&self) -> usize {
        self.frame.height()
    }

    pub fn to_table(&self) -> Result<ExportTable> {
        ExportTable::with_placeholders(&self.frame, &self.placeholders)
    }
}

pub struct ReportMerger<'a> {
    config: &'a ReportConfig,
}

impl<'a> ReportMerger<'a> {
    pub fn new(config: &'a ReportConfig) -> Self {
        Self { config }
    }

    pub fn merge(&self, source: &DataFrame, views: &[DerivedView]) -> Result<MergedReport> {
        let contract = self.config.columns.contract.as_str();
        let amount = self.config.columns.commission_amount.as_str();

        // One row per distinct source contract, in order of first appearance.
        let mut merged = source
            .clone()
            .lazy()
            .select([col(contract)])
            .unique_stable(None, UniqueKeepStrategy::First)
            .collect()?;
        let universe = merged.height();

        for view in views {
            if view.frame.column(contract).is_err() {
                return Err(ReportError::MissingColumn(format!(
                    "{} (view {})",
                    contract, view.name
                )));
            }
            let right = without_shared_columns(&merged, &view.frame, contract)?;
            merged = left_join(merged, right, contract)?;
        }

        let totals = source
            .clone()
            .lazy()
            .group_by([col(contract)])
            .agg([col(amount)
                .sum()
                .alias(&self.config.total_commission_column)])
            .collect()?;
        let totals = without_shared_columns(&merged, &totals, contract)?;
        merged = left_join(merged, totals, contract)?;

        let (merged, placeholders) = fill_missing(merged, &self.config.fill_values)?;
        if !placeholders.is_empty() {
            debug!(
                "Placeholders applied at export: {:?}",
                placeholders.keys().collect::<Vec<_>>()
            );
        }

        let merged = reorder(merged, &self.config.column_order)?;
        info!(
            "Merged report: {} contracts, {} columns",
            merged.height(),
            merged.width()
        );
        debug!("Merged report:\n{}", merged);

        debug_assert_eq!(merged.height(), universe);
        Ok(MergedReport {
            frame: merged,
            placeholders,
        })
    }
}

/// Drop from `right` the columns `left` already has, except the key.
fn without_shared_columns(left: &DataFrame, right: &DataFrame, key: &str) -> Result<DataFrame> {
    let keep: Vec<String> = right
        .get_column_names()
        .iter()
        .filter(|c| **c == key || left.column(c).is_err())
        .map(|c| c.to_string())
        .collect();
    if keep.len() < right.width() {
        debug!(
            "Skipping {} column(s) already present in the report",
            right.width() - keep.len()
        );
    }
    Ok(right.select(keep)?)
}

fn left_join(left: DataFrame, right: DataFrame, key: &str) -> Result<DataFrame> {
    let rows_before = left.height();
    let joined = left
        .lazy()
        .join(
            right.lazy(),
            [col(key)],
            [col(key)],
            JoinArgs::new(JoinType::Left),
        )
        .collect()
        .map_err(|e| ReportError::Polars(format!("Join on {} failed: {}", key, e)))?;

    // every right side is unique per contract
    if joined.height() != rows_before {
        return Err(ReportError::Polars(format!(
            "Join on {} changed the row count: {} rows -> {} rows",
            key,
            rows_before,
            joined.height()
        )));
    }
    Ok(joined)
}

/// Fill nulls per column. Returns the fills whose type does not match the
/// column so they can be applied cell by cell.
fn fill_missing(
    df: DataFrame,
    fills: &BTreeMap<String, FillValue>,
) -> Result<(DataFrame, BTreeMap<String, FillValue>)> {
    let mut exprs = Vec::new();
    let mut deferred = BTreeMap::new();

    for (name, value) in fills {
        let Ok(series) = df.column(name) else {
            continue;
        };
        match value {
            FillValue::Number(n) if series.dtype().is_numeric() => {
                exprs.push(col(name).fill_null(lit(*n)));
            }
            FillValue::Text(t) if series.dtype() == &DataType::String => {
                exprs.push(col(name).fill_null(lit(t.as_str())));
            }
            _ => {
                deferred.insert(name.clone(), value.clone());
            }
        }
    }

    let df = if exprs.is_empty() {
        df
    } else {
        df.lazy().with_columns(exprs).collect()?
    };
    Ok((df, deferred))
}

fn reorder(df: DataFrame, order: &[String]) -> Result<DataFrame> {
    for name in order {
        if df.column(name).is_err() {
            return Err(ReportError::MissingColumn(name.clone()));
        }
    }
    Ok(df.select(order)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Cell;
    use crate::views::derive_view;

    fn source() -> DataFrame {
        let df = df! [
            "Data" => [19523, 19358, 19419, 19398, 19408, 19482],
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

    fn merged(config: &ReportConfig) -> MergedReport {
        let source = source();
        let views: Vec<DerivedView> = config
            .views
            .iter()
            .map(|spec| derive_view(&source, spec, config).unwrap())
            .collect();
        ReportMerger::new(config).merge(&source, &views).unwrap()
    }

    fn text(s: &str) -> Cell {
        Cell::Text(s.to_string())
    }

    #[test]
    fn test_one_row_per_source_contract() {
        let config = ReportConfig::default();
        let report = merged(&config);
        assert_eq!(report.height(), 3);
        assert_eq!(report.frame.get_column_names(), config.column_order);

        let table = report.to_table().unwrap();
        let contracts: Vec<&Cell> = table.column("Proposta").unwrap();
        assert_eq!(contracts, vec![&text("100"), &text("200"), &text("300")]);
    }

    #[test]
    fn test_report_values() {
        let config = ReportConfig::default();
        let table = merged(&config).to_table().unwrap();
        let cell = |contract: &str, column: &str| table.lookup("Proposta", contract, column).cloned();

        assert_eq!(cell("100", "Data do repasse FLAT"), Some(text("01/01/2023")));
        assert_eq!(cell("100", "COMISSÃO FLAT"), Some(Cell::Number(50.0)));
        assert_eq!(cell("100", "PROVA REAL FLAT"), Some(Cell::Number(120.0)));
        assert_eq!(cell("100", "Valor do BONUS"), Some(Cell::Number(30.0)));
        assert_eq!(cell("100", "DATA DÉBITO COMISSÃO FLAT"), Some(text("SEM DÉBITO")));
        assert_eq!(cell("100", "Comissão REAL BANCO"), Some(Cell::Number(150.0)));

        assert_eq!(cell("200", "DATA REPASSE BONUS"), Some(text("SEM BONUS")));
        assert_eq!(cell("200", "Valor do BONUS"), Some(text("SEM BONUS")));
        assert_eq!(cell("200", "DÉBITO COMISSÃO FLAT"), Some(Cell::Number(-20.0)));
        assert_eq!(cell("200", "Comissão REAL BANCO"), Some(Cell::Number(-5.0)));
        assert_eq!(cell("200", "PROVA REAL BONUS"), Some(Cell::Empty));
    }

    #[test]
    fn test_contract_without_categories_gets_defaults() {
        let config = ReportConfig::default();
        let table = merged(&config).to_table().unwrap();
        let cell = |column: &str| table.lookup("Proposta", "300", column).cloned();

        assert_eq!(cell("DATA REPASSE BONUS"), Some(text("SEM BONUS")));
        assert_eq!(cell("Valor do BONUS"), Some(text("SEM BONUS")));
        assert_eq!(cell("DATA DÉBITO COMISSÃO FLAT"), Some(text("SEM DÉBITO")));
        assert_eq!(cell("Data do repasse FLAT"), Some(Cell::Empty));
        assert_eq!(cell("Comissão REAL BANCO"), Some(Cell::Number(5.0)));
    }

    #[test]
    fn test_fill_types() {
        let config = ReportConfig::default();
        let report = merged(&config);
        // the bonus amount column stays numeric, so its placeholder is deferred
        assert!(report.placeholders.contains_key("Valor do BONUS"));
        assert!(!report.placeholders.contains_key("DATA REPASSE BONUS"));
        assert!(!report.placeholders.contains_key("Comissão REAL BANCO"));
        assert_eq!(
            report.frame.column("Valor do BONUS").unwrap().dtype(),
            &DataType::Float64
        );
    }

    #[test]
    fn test_unknown_column_in_order_is_an_error() {
        let mut config = ReportConfig::default();
        config.column_order.push("Inexistente".to_string());
        let source = source();
        let err = ReportMerger::new(&config).merge(&source, &[]).unwrap_err();
        assert!(matches!(err, ReportError::MissingColumn(_)));
    }

    #[test]
    fn test_shared_columns_are_joined_once() {
        let config = ReportConfig::default();
        let source = source();
        let views: Vec<DerivedView> = config
            .views
            .iter()
            .map(|spec| derive_view(&source, spec, &config).unwrap())
            .collect();

        let mut config = config.clone();
        config.column_order.push("Cliente".to_string());
        let report = ReportMerger::new(&config).merge(&source, &views).unwrap();
        let table = report.to_table().unwrap();
        assert_eq!(table.lookup("Proposta", "200", "Cliente"), Some(&text("Bia")));
        // contract 300 is in no detail view
        assert_eq!(table.lookup("Proposta", "300", "Cliente"), Some(&Cell::Empty));
    }
}
