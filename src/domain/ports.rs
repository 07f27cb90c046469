use super::product::{CatalogResponse, ProductId};
use super::transaction::{Download, PlatformError, Transaction, TransactionId};
use crate::error::Result;
use async_trait::async_trait;

/// The external payment platform.
///
/// Every request returns as soon as the platform has accepted it; outcomes
/// arrive later as [`PlatformEvent`]s. `query_products` and
/// `current_receipt_blob` are the only calls that hand back data directly.
#[async_trait]
pub trait PaymentPlatform: Send + Sync {
    async fn query_products(&self, ids: &[ProductId]) -> Result<CatalogResponse>;
    fn can_make_payments(&self) -> bool;
    async fn enqueue_payment(&self, product_id: &ProductId) -> Result<()>;
    async fn finalize(&self, transaction_id: &TransactionId) -> Result<()>;
    async fn start_download(&self, download: &Download) -> Result<()>;
    async fn pause_download(&self, download: &Download) -> Result<()>;
    async fn cancel_download(&self, download: &Download) -> Result<()>;
    async fn restore_completed_transactions(&self) -> Result<()>;
    /// Transactions still sitting in the platform queue from earlier runs.
    async fn unfinished_transactions(&self) -> Result<Vec<Transaction>>;
    async fn current_receipt_blob(&self) -> Result<Vec<u8>>;
}

pub type PlatformBox = Box<dyn PaymentPlatform>;

/// One item of the platform's push feed.
#[derive(Debug, Clone, PartialEq)]
pub enum PlatformEvent {
    TransactionUpdated(Transaction),
    DownloadUpdated(Download),
    RestoreCompleted,
    RestoreFailed(PlatformError),
}
