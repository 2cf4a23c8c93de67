use serde::{Deserialize, Serialize};

use crate::models::InvoiceWithItems;

/// Terminal pipeline outcome for one scan call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    /// Invoice was created by this call
    Success,
    /// Access key already persisted (pre-check hit or insert race lost)
    Duplicate,
}

/// Scan result: outcome plus the persisted record it refers to
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanOutcome {
    pub status: ScanStatus,
    pub invoice: InvoiceWithItems,
}
