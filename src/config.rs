//! Report configuration.
//!
//! Every label, file name and column name the report depends on lives here.
//! `ReportConfig::default()` describes the back-office commission report; a
//! JSON file with the same shape can override any part of it.

use crate::error::{ReportError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

/// Direction of a commission transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptType {
    Credit,
    Debit,
}

/// Commission category carried in the observation column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoryTag {
    Flat,
    Bonus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

impl SortOrder {
    pub fn is_descending(self) -> bool {
        matches!(self, SortOrder::Descending)
    }
}

/// Names of the source columns the pipeline reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceColumns {
    pub contract: String,
    pub date: String,
    pub receipt_type: String,
    pub observation: String,
    pub commission_percentage: String,
    pub commission_base: String,
    pub commission_amount: String,
}

impl Default for SourceColumns {
    fn default() -> Self {
        Self {
            contract: "Proposta".to_string(),
            date: "Data".to_string(),
            receipt_type: "Tipo de recebimento".to_string(),
            observation: "OBSERVAÇÃO".to_string(),
            commission_percentage: "% Comissao".to_string(),
            commission_base: "Valor base para calculo da comissao".to_string(),
            commission_amount: "Valor da Comissao".to_string(),
        }
    }
}

impl SourceColumns {
    pub fn required(&self) -> [&str; 7] {
        [
            self.contract.as_str(),
            self.date.as_str(),
            self.receipt_type.as_str(),
            self.observation.as_str(),
            self.commission_percentage.as_str(),
            self.commission_base.as_str(),
            self.commission_amount.as_str(),
        ]
    }

    /// Columns loaded as Float64.
    pub fn numeric(&self) -> [&str; 3] {
        [
            self.commission_percentage.as_str(),
            self.commission_base.as_str(),
            self.commission_amount.as_str(),
        ]
    }

    /// Columns removed from detail views once filtering is done.
    pub fn intermediate(&self) -> [&str; 4] {
        [
            self.commission_percentage.as_str(),
            self.observation.as_str(),
            self.commission_base.as_str(),
            self.receipt_type.as_str(),
        ]
    }
}

/// Values of the receipt type column, per direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiptLabels {
    pub credit: String,
    pub debit: String,
}

impl Default for ReceiptLabels {
    fn default() -> Self {
        Self {
            credit: "CRÉDITO".to_string(),
            debit: "DÉBITO".to_string(),
        }
    }
}

impl ReceiptLabels {
    pub fn label(&self, receipt_type: ReceiptType) -> &str {
        match receipt_type {
            ReceiptType::Credit => &self.credit,
            ReceiptType::Debit => &self.debit,
        }
    }
}

/// Values of the observation column, per category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CategoryLabels {
    pub flat: String,
    pub bonus: String,
}

impl Default for CategoryLabels {
    fn default() -> Self {
        Self {
            flat: "FLAT".to_string(),
            bonus: "BONUS".to_string(),
        }
    }
}

impl CategoryLabels {
    pub fn label(&self, category: CategoryTag) -> &str {
        match category {
            CategoryTag::Flat => &self.flat,
            CategoryTag::Bonus => &self.bonus,
        }
    }
}

/// One derived view: which rows it selects, how it reshapes them and where
/// the intermediate file goes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewSpec {
    pub name: String,
    pub receipt_type: ReceiptType,
    pub category: CategoryTag,
    /// Source column name -> report column name.
    #[serde(default)]
    pub renames: BTreeMap<String, String>,
    /// File stem of the per-view export.
    pub output: String,
    #[serde(default)]
    pub sort: SortOrder,
    #[serde(default)]
    pub aggregate: bool,
}

impl ViewSpec {
    pub fn detail(
        name: &str,
        receipt_type: ReceiptType,
        category: CategoryTag,
        renames: &[(&str, &str)],
        output: &str,
    ) -> Self {
        Self {
            name: name.to_string(),
            receipt_type,
            category,
            renames: renames
                .iter()
                .map(|(from, to)| (from.to_string(), to.to_string()))
                .collect(),
            output: output.to_string(),
            sort: SortOrder::Ascending,
            aggregate: false,
        }
    }

    pub fn aggregate(
        name: &str,
        receipt_type: ReceiptType,
        category: CategoryTag,
        renames: &[(&str, &str)],
        output: &str,
    ) -> Self {
        Self {
            aggregate: true,
            ..Self::detail(name, receipt_type, category, renames, output)
        }
    }

    pub fn with_sort(mut self, sort: SortOrder) -> Self {
        self.sort = sort;
        self
    }
}

/// Replacement for a missing value in the merged report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FillValue {
    Number(f64),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub columns: SourceColumns,
    pub receipt_labels: ReceiptLabels,
    pub category_labels: CategoryLabels,
    /// chrono format used to parse source dates and to print view dates.
    pub date_format: String,
    pub views: Vec<ViewSpec>,
    pub total_commission_column: String,
    pub fill_values: BTreeMap<String, FillValue>,
    pub column_order: Vec<String>,
    pub report_output: String,
    pub sheet_name: String,
}

impl Default for ReportConfig {
    fn default() -> Self {
        use CategoryTag::{Bonus, Flat};
        use ReceiptType::{Credit, Debit};

        let columns = SourceColumns::default();
        let date = columns.date.as_str();
        let amount = columns.commission_amount.as_str();

        let views = vec![
            ViewSpec::detail(
                "credit-flat-detail",
                Credit,
                Flat,
                &[(date, "Data do repasse FLAT"), (amount, "COMISSÃO FLAT")],
                "TesteOrdem",
            ),
            ViewSpec::aggregate(
                "credit-flat-aggregate",
                Credit,
                Flat,
                &[(amount, "PROVA REAL FLAT")],
                "testeflat",
            ),
            ViewSpec::detail(
                "credit-bonus-detail",
                Credit,
                Bonus,
                &[(date, "DATA REPASSE BONUS"), (amount, "Valor do BONUS")],
                "TesteOrdemBonus",
            ),
            ViewSpec::aggregate(
                "credit-bonus-aggregate",
                Credit,
                Bonus,
                &[(amount, "PROVA REAL BONUS")],
                "testebonus",
            ),
            ViewSpec::detail(
                "debit-flat-detail",
                Debit,
                Flat,
                &[
                    (date, "DATA DÉBITO COMISSÃO FLAT"),
                    (amount, "DÉBITO COMISSÃO FLAT"),
                ],
                "TesteOrdemDebito",
            ),
        ];

        let fill_values = BTreeMap::from([
            ("Valor do BONUS".to_string(), FillValue::Text("SEM BONUS".to_string())),
            ("DATA REPASSE BONUS".to_string(), FillValue::Text("SEM BONUS".to_string())),
            (
                "DATA DÉBITO COMISSÃO FLAT".to_string(),
                FillValue::Text("SEM DÉBITO".to_string()),
            ),
            ("Comissão REAL BANCO".to_string(), FillValue::Number(0.0)),
        ]);

        let column_order = [
            columns.contract.as_str(),
            "Data do repasse FLAT",
            "COMISSÃO FLAT",
            "DATA REPASSE BONUS",
            "Valor do BONUS",
            "DATA DÉBITO COMISSÃO FLAT",
            "DÉBITO COMISSÃO FLAT",
            "Comissão REAL BANCO",
            "PROVA REAL BONUS",
            "PROVA REAL FLAT",
        ]
        .iter()
        .map(|c| c.to_string())
        .collect();

        Self {
            columns,
            receipt_labels: ReceiptLabels::default(),
            category_labels: CategoryLabels::default(),
            date_format: "%d/%m/%Y".to_string(),
            views,
            total_commission_column: "Comissão REAL BANCO".to_string(),
            fill_values,
            column_order,
            report_output: "procv".to_string(),
            sheet_name: "Sheet1".to_string(),
        }
    }
}

impl ReportConfig {
    /// Load a JSON config file. Missing keys fall back to the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ReportError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: ReportConfig = serde_json::from_str(&content)?;
        config.validate()?;
        tracing::debug!("Loaded config from {} ({} views)", path.display(), config.views.len());
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.views.is_empty() {
            return Err(ReportError::Config("at least one view is required".to_string()));
        }
        if self.date_format.trim().is_empty() {
            return Err(ReportError::Config("date_format must not be empty".to_string()));
        }

        let mut names = HashSet::new();
        let mut outputs = HashSet::new();
        outputs.insert(self.report_output.as_str());
        for view in &self.views {
            if !names.insert(view.name.as_str()) {
                return Err(ReportError::Config(format!("duplicate view name: {}", view.name)));
            }
            if !outputs.insert(view.output.as_str()) {
                return Err(ReportError::Config(format!(
                    "output '{}' is used more than once",
                    view.output
                )));
            }
        }

        match self.column_order.first() {
            None => Err(ReportError::Config("column_order must not be empty".to_string())),
            Some(first) if *first != self.columns.contract => Err(ReportError::Config(format!(
                "column_order must start with the contract column '{}'",
                self.columns.contract
            ))),
            Some(_) => Ok(()),
        }
    }

    pub fn receipt_label(&self, receipt_type: ReceiptType) -> &str {
        self.receipt_labels.label(receipt_type)
    }

    pub fn category_label(&self, category: CategoryTag) -> &str {
        self.category_labels.label(category)
    }
}
