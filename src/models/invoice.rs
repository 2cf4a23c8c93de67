use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Persisted invoice header (invoices)
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Invoice {
    pub id: i64,
    pub access_key: String,
    pub user_id: i64,
    pub issuer: String,
    pub issued_at: Option<DateTime<Utc>>,
    pub total: BigDecimal,
    pub created_at: DateTime<Utc>,
}

/// Persisted invoice line (invoice_items)
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct InvoiceItem {
    pub id: i64,
    pub invoice_id: i64,
    pub product_id: i64,
    pub description: String,
    pub quantity: BigDecimal,
    pub unit: String,
    pub unit_price: BigDecimal,
    pub line_total: BigDecimal,
}

/// Line ready for bulk insert, after product resolution
#[derive(Debug, Clone)]
pub struct NewInvoiceItem {
    pub product_id: i64,
    pub description: String,
    pub quantity: BigDecimal,
    pub unit: String,
    pub unit_price: BigDecimal,
    pub line_total: BigDecimal,
}

/// Invoice header plus its ordered lines, the unit of response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceWithItems {
    #[serde(flatten)]
    pub invoice: Invoice,
    pub items: Vec<InvoiceItem>,
}
