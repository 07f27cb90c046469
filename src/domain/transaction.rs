use super::product::ProductId;
use crate::error::IapError;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(String);

impl TransactionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TransactionId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Platform-reported state of a payment transaction.
#[derive(Debug, Deserialize, Serialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum TransactionState {
    Purchasing,
    Purchased,
    Failed,
    Restored,
    Deferred,
}

impl TransactionState {
    /// Purchased and restored transactions both grant the product.
    pub fn is_success(self) -> bool {
        matches!(self, TransactionState::Purchased | TransactionState::Restored)
    }
}

#[derive(Debug, Deserialize, Serialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum PlatformErrorKind {
    /// The user dismissed the payment sheet.
    Cancelled,
    Invalid,
    NotAllowed,
    Network,
    Unknown,
}

/// Error payload attached by the platform to failed transactions and downloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformError {
    pub kind: PlatformErrorKind,
    pub message: String,
}

impl PlatformError {
    pub fn new(kind: PlatformErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn cancelled() -> Self {
        Self::new(PlatformErrorKind::Cancelled, "cancelled by user")
    }

    pub fn is_cancellation(&self) -> bool {
        self.kind == PlatformErrorKind::Cancelled
    }
}

impl fmt::Display for PlatformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

#[derive(Debug, Deserialize, Serialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum DownloadState {
    Waiting,
    Active,
    Paused,
    Finished,
    Failed,
    Cancelled,
}

impl DownloadState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DownloadState::Finished | DownloadState::Failed | DownloadState::Cancelled
        )
    }
}

/// Hosted content attached to a transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Download {
    pub content_id: String,
    pub transaction_id: TransactionId,
    pub content_url: Option<String>,
    /// Fraction in `0.0..=1.0`.
    pub progress: f32,
    pub state: DownloadState,
    pub error: Option<PlatformError>,
}

impl Download {
    pub fn waiting(transaction_id: impl Into<TransactionId>, content_id: impl Into<String>) -> Self {
        Self {
            content_id: content_id.into(),
            transaction_id: transaction_id.into(),
            content_url: None,
            progress: 0.0,
            state: DownloadState::Waiting,
            error: None,
        }
    }

    pub fn with_state(mut self, state: DownloadState) -> Self {
        self.state = state;
        if state == DownloadState::Finished {
            self.progress = 1.0;
        }
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.content_url = Some(url.into());
        self
    }

    pub fn with_error(mut self, error: PlatformError) -> Self {
        self.error = Some(error);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub product_id: ProductId,
    pub state: TransactionState,
    pub original_transaction_id: Option<TransactionId>,
    pub error: Option<PlatformError>,
    pub downloads: Vec<Download>,
}

impl Transaction {
    pub fn new(
        id: impl Into<TransactionId>,
        product_id: impl Into<ProductId>,
        state: TransactionState,
    ) -> Self {
        Self {
            id: id.into(),
            product_id: product_id.into(),
            state,
            original_transaction_id: None,
            error: None,
            downloads: Vec::new(),
        }
    }

    pub fn with_error(mut self, error: PlatformError) -> Self {
        self.error = Some(error);
        self
    }

    pub fn with_original(mut self, original: impl Into<TransactionId>) -> Self {
        self.original_transaction_id = Some(original.into());
        self
    }

    /// Attaches a waiting download for each content id.
    pub fn with_content<I, S>(mut self, content_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for content_id in content_ids {
            self.downloads
                .push(Download::waiting(self.id.clone(), content_id));
        }
        self
    }

    pub fn has_hosted_content(&self) -> bool {
        !self.downloads.is_empty()
    }

    /// A failed transaction counts as cancelled only when the platform says
    /// the user backed out.
    pub fn is_cancelled(&self) -> bool {
        self.state == TransactionState::Failed
            && self.error.as_ref().is_some_and(PlatformError::is_cancellation)
    }

    pub fn downloads_settled(&self) -> bool {
        self.downloads.iter().all(|d| d.state.is_terminal())
    }

    /// The error reported to observers, `None` unless the transaction failed.
    pub fn failure(&self) -> Option<IapError> {
        (self.state == TransactionState::Failed).then(|| IapError::TransactionFailed {
            transaction_id: self.id.clone(),
            cancelled: self.is_cancelled(),
        })
    }
}
