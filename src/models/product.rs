use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Canonical product record, shared across all users and invoices
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Product {
    pub id: i64,
    pub code: String,
    pub description: String,
    pub category_id: Option<i64>,
}

/// Expense category with its ordered keyword list (seeded externally, read-only here)
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Category {
    pub id: i64,
    pub name: String,
    pub color: Option<String>,
    pub icon: Option<String>,
    pub position: i32,
    pub keywords: Vec<String>,
}
