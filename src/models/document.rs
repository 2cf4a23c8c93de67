use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which acquisition strategy produced the document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentSource {
    Structured,
    Rendered,
}

/// One line item as read from an upstream source, before product resolution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannedItem {
    /// Stable externally-supplied code (GTIN) when the source exposes one
    pub code: Option<String>,
    pub description: String,
    pub quantity: BigDecimal,
    pub unit: String,
    pub unit_price: BigDecimal,
    pub line_total: BigDecimal,
}

/// Issuer identity as exposed by the structured document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IssuerInfo {
    pub name: String,
    pub legal_name: Option<String>,
    pub tax_id: Option<String>,
    pub address: Option<String>,
}

/// An invoice as acquired from an upstream source, before persistence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannedDocument {
    /// Present when the source itself carries the key (rendered page does)
    pub access_key: Option<String>,
    pub issuer: IssuerInfo,
    pub issued_at: Option<DateTime<Utc>>,
    /// Total as selected by the source-level preference order; reconciled again downstream
    pub declared_total: BigDecimal,
    pub items: Vec<ScannedItem>,
    pub source: DocumentSource,
}

impl ScannedDocument {
    /// Sum of parsed line totals, the reconciliation baseline
    pub fn item_sum(&self) -> BigDecimal {
        self.items
            .iter()
            .map(|i| &i.line_total)
            .fold(BigDecimal::from(0), |acc, v| acc + v)
    }
}
