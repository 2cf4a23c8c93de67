use thiserror::Error;

/// Pipeline error taxonomy. Everything recoverable (source absence, malformed
/// documents, insert races) is handled inside the pipeline; only these reach
/// the caller.
#[derive(Debug, Error)]
pub enum ScanError {
    /// No 44-digit access key derivable from the QR payload. Fatal, immediate.
    #[error("no access key found in QR payload")]
    InvalidQrCode,

    /// Every acquisition strategy was tried and none yielded a document.
    #[error("all acquisition strategies failed: {0}")]
    AcquisitionFailed(String),

    /// The persist transaction did not complete within its bound.
    #[error("persistence timed out")]
    PersistTimeout,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// True when the storage layer reported a unique-constraint violation
/// (SQLSTATE 23505), i.e. a concurrent submission won the insert race.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.code().as_deref() == Some("23505"),
        _ => false,
    }
}
