use crate::domain::product::ProductId;
use crate::domain::receipt::ReceiptError;
use crate::domain::transaction::TransactionId;
use thiserror::Error;

/// Why a purchase request was turned down before reaching the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    PaymentsDisabled,
    UnknownProduct,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::PaymentsDisabled => f.write_str("payments are disabled"),
            RejectReason::UnknownProduct => f.write_str("product is not in the loaded catalog"),
        }
    }
}

#[derive(Error, Debug)]
pub enum IapError {
    #[error("Catalog load failed: {0}")]
    CatalogLoadFailure(String),
    #[error("Purchase of {product_id} rejected: {reason}")]
    PurchaseRejected {
        product_id: ProductId,
        reason: RejectReason,
    },
    #[error("Transaction {transaction_id} failed (cancelled: {cancelled})")]
    TransactionFailed {
        transaction_id: TransactionId,
        cancelled: bool,
    },
    #[error("Download {content_id} failed (cancelled: {cancelled}): {reason}")]
    DownloadFailed {
        content_id: String,
        cancelled: bool,
        reason: String,
    },
    #[error("Restore failed (cancelled: {cancelled}): {reason}")]
    RestoreFailed { cancelled: bool, reason: String },
    #[error("Transaction {0} was already finalized")]
    AlreadyFinalized(TransactionId),
    #[error("Transaction {0} is not tracked")]
    UnknownTransaction(TransactionId),
    #[error("Platform error: {0}")]
    Platform(String),
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("Invalid event: {0}")]
    InvalidEvent(String),
    #[error("Receipt error: {0}")]
    Receipt(#[from] ReceiptError),
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl IapError {
    /// True for failures the user caused by dismissing the payment sheet.
    pub fn is_cancellation(&self) -> bool {
        matches!(
            self,
            IapError::TransactionFailed { cancelled: true, .. }
                | IapError::DownloadFailed { cancelled: true, .. }
                | IapError::RestoreFailed { cancelled: true, .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, IapError>;
