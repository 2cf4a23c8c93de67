use crate::error::ScanError;
use crate::models::{InvoiceWithItems, ScanStatus, ScannedDocument};
use crate::service::IngestService;
use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Request body: one scanned QR payload
#[derive(Debug, Deserialize)]
pub struct ScanRequest {
    pub user_id: i64,
    pub qr_payload: String,
}

/// Scan response body
#[derive(Debug, Serialize)]
pub struct ScanResponse {
    pub success: bool,
    pub message: String,
    pub status: Option<ScanStatus>,
    pub invoice: Option<InvoiceWithItems>,
}

/// Request body: consultation URL to inspect without persisting
#[derive(Debug, Deserialize)]
pub struct PreviewRequest {
    pub url: String,
}

/// Preview response body
#[derive(Debug, Serialize)]
pub struct PreviewResponse {
    pub success: bool,
    pub message: String,
    pub document: Option<ScannedDocument>,
}

/// Health check
pub async fn health_check() -> &'static str {
    "OK"
}

fn error_status(err: &ScanError) -> StatusCode {
    match err {
        ScanError::InvalidQrCode => StatusCode::UNPROCESSABLE_ENTITY,
        ScanError::AcquisitionFailed(_) => StatusCode::BAD_GATEWAY,
        ScanError::PersistTimeout | ScanError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Full pipeline: QR payload in, persisted (or pre-existing) invoice out
pub async fn scan(
    State(service): State<Arc<IngestService>>,
    Json(req): Json<ScanRequest>,
) -> Response {
    match service.scan(req.user_id, &req.qr_payload).await {
        Ok(outcome) => {
            let response = ScanResponse {
                success: true,
                message: match outcome.status {
                    ScanStatus::Success => "Invoice persisted".to_string(),
                    ScanStatus::Duplicate => "Invoice already persisted".to_string(),
                },
                status: Some(outcome.status),
                invoice: Some(outcome.invoice),
            };
            (StatusCode::OK, Json(response)).into_response()
        }
        Err(e) => {
            let response = ScanResponse {
                success: false,
                message: format!("Error: {}", e),
                status: None,
                invoice: None,
            };
            (error_status(&e), Json(response)).into_response()
        }
    }
}

/// Acquisition-only inspection of a consultation URL, no persistence
pub async fn preview(
    State(service): State<Arc<IngestService>>,
    Json(req): Json<PreviewRequest>,
) -> Response {
    match service.preview(&req.url).await {
        Ok(document) => {
            let response = PreviewResponse {
                success: true,
                message: format!("Extracted {} items", document.items.len()),
                document: Some(document),
            };
            (StatusCode::OK, Json(response)).into_response()
        }
        Err(e) => {
            let response = PreviewResponse {
                success: false,
                message: format!("Error: {}", e),
                document: None,
            };
            (error_status(&e), Json(response)).into_response()
        }
    }
}
