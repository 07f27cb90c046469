use super::catalog::{CatalogCache, CatalogSnapshot};
use super::dispatcher::{Dispatch, TransactionDispatcher};
use super::reconciler::{self, RestoreTracker};
use super::registry::ObserverRegistry;
use crate::config::StoreConfig;
use crate::domain::observer::{ObserverHandlers, ObserverId};
use crate::domain::ports::{PaymentPlatform, PlatformBox, PlatformEvent};
use crate::domain::product::{Product, ProductId};
use crate::domain::receipt::{self, ReceiptRecord};
use crate::domain::transaction::{TransactionId, TransactionState};
use crate::error::{IapError, RejectReason, Result};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Entry point for the host application.
///
/// `StoreManager` owns the observer registry, the catalog cache, the
/// transaction dispatcher and the restore bookkeeping for one platform
/// connection. Create one at startup and share it (usually behind an `Arc`)
/// with whatever consumes the platform event feed.
pub struct StoreManager {
    platform: Arc<dyn PaymentPlatform>,
    registry: Arc<ObserverRegistry>,
    catalog: CatalogCache,
    dispatcher: TransactionDispatcher,
    restores: RestoreTracker,
    config: StoreConfig,
}

impl StoreManager {
    /// Creates a new `StoreManager` instance.
    ///
    /// # Arguments
    ///
    /// * `platform` - The payment platform adapter.
    /// * `config` - Product ids to load and dispatcher settings.
    pub fn new(platform: PlatformBox, config: StoreConfig) -> Self {
        let platform: Arc<dyn PaymentPlatform> = Arc::from(platform);
        let registry = Arc::new(ObserverRegistry::new());
        let dispatcher = TransactionDispatcher::new(
            platform.clone(),
            registry.clone(),
            config.finalized_history,
            config.auto_start_downloads,
        );
        Self {
            platform,
            registry,
            catalog: CatalogCache::new(),
            dispatcher,
            restores: RestoreTracker::new(),
            config,
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn registry(&self) -> &ObserverRegistry {
        &self.registry
    }

    pub fn dispatcher(&self) -> &TransactionDispatcher {
        &self.dispatcher
    }

    pub fn add_observer(
        &self,
        observer: ObserverId,
        product_id: impl Into<ProductId>,
        handlers: ObserverHandlers,
    ) {
        self.registry
            .register(observer, [product_id.into()], handlers);
    }

    pub fn add_observer_for_products<I, P>(
        &self,
        observer: ObserverId,
        product_ids: I,
        handlers: ObserverHandlers,
    ) where
        I: IntoIterator<Item = P>,
        P: Into<ProductId>,
    {
        self.registry
            .register(observer, product_ids.into_iter().map(Into::into), handlers);
    }

    pub fn remove_observer(&self, observer: ObserverId, product_id: &ProductId) -> bool {
        self.registry.remove(observer, product_id)
    }

    /// Drops every registration of `observer`; call this on observer teardown.
    pub fn remove_observer_everywhere(&self, observer: ObserverId) -> usize {
        self.registry.remove_all(observer)
    }

    /// Loads the configured product ids from the platform catalog.
    ///
    /// `on_loaded` receives this load's valid products and rejected ids. On
    /// failure it receives two empty slices and the cached catalog is kept.
    pub async fn load_store<F>(&self, on_loaded: F)
    where
        F: FnOnce(&[Product], &[ProductId]),
    {
        let ticket = self.catalog.begin_load();
        match self.platform.query_products(&self.config.product_ids).await {
            Ok(response) => {
                let (valid, invalid) = (response.valid.clone(), response.invalid.clone());
                if self.catalog.complete(ticket, response) {
                    info!(
                        valid = valid.len(),
                        invalid = invalid.len(),
                        "catalog loaded"
                    );
                } else {
                    debug!("discarding catalog load superseded by a newer one");
                }
                on_loaded(&valid, &invalid);
            }
            Err(e) => {
                let e = IapError::CatalogLoadFailure(e.to_string());
                warn!(error = %e, "catalog load failed");
                on_loaded(&[], &[]);
            }
        }
    }

    pub fn catalog(&self) -> Arc<CatalogSnapshot> {
        self.catalog.snapshot()
    }

    pub fn valid_products(&self) -> Vec<Product> {
        self.catalog.snapshot().products().to_vec()
    }

    pub fn invalid_product_ids(&self) -> Vec<ProductId> {
        self.catalog.snapshot().invalid_product_ids().to_vec()
    }

    pub fn can_make_purchases(&self) -> bool {
        self.platform.can_make_payments()
    }

    fn check_payment(&self, product_id: &ProductId) -> Result<()> {
        let reason = if !self.platform.can_make_payments() {
            RejectReason::PaymentsDisabled
        } else if !self.catalog.contains(product_id) {
            RejectReason::UnknownProduct
        } else {
            return Ok(());
        };
        Err(IapError::PurchaseRejected {
            product_id: product_id.clone(),
            reason,
        })
    }

    /// Whether [`StoreManager::place_payment`] would accept `product_id` now.
    pub fn can_place_payment(&self, product_id: &ProductId) -> bool {
        self.check_payment(product_id).is_ok()
    }

    /// Asks the platform to start a purchase.
    ///
    /// Returns `false` without contacting the platform when payments are
    /// disabled or the product is not in the loaded catalog. A `true` result
    /// only means the request was queued; the outcome arrives through the
    /// event feed.
    pub async fn place_payment(&self, product_id: &ProductId) -> bool {
        if let Err(e) = self.check_payment(product_id) {
            info!(error = %e, "payment not placed");
            return false;
        }
        match self.platform.enqueue_payment(product_id).await {
            Ok(()) => {
                info!(product_id = %product_id, "payment queued");
                true
            }
            Err(e) => {
                warn!(product_id = %product_id, error = %e, "platform refused payment");
                false
            }
        }
    }

    /// Asks the platform to replay earlier purchases.
    ///
    /// Replayed transactions arrive through the event feed as `restored`;
    /// `on_complete` runs once the platform reports the replay finished.
    pub async fn restore_purchases<F>(&self, on_complete: F)
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        let handle = self.restores.push(Box::new(on_complete));
        if let Err(e) = self.platform.restore_completed_transactions().await {
            warn!(error = %e, "platform refused restore");
            if let Some(completion) = self.restores.take(handle) {
                completion(Err(IapError::RestoreFailed {
                    cancelled: false,
                    reason: e.to_string(),
                }));
            }
        }
    }

    /// Resumes hosted-content downloads left over from an earlier run.
    pub async fn restore_unfinished_downloads(&self) -> Result<usize> {
        reconciler::restore_unfinished_downloads(self.platform.as_ref(), &self.dispatcher).await
    }

    /// Pauses every unsettled download of a transaction.
    pub async fn pause_downloads(&self, transaction_id: &TransactionId) -> Result<usize> {
        let downloads = self.dispatcher.pending_downloads(transaction_id)?;
        for download in &downloads {
            self.platform.pause_download(download).await?;
        }
        Ok(downloads.len())
    }

    /// Cancels every unsettled download of a transaction. The cancellations
    /// come back through the event feed like any other download update.
    pub async fn cancel_downloads(&self, transaction_id: &TransactionId) -> Result<usize> {
        let downloads = self.dispatcher.pending_downloads(transaction_id)?;
        for download in &downloads {
            self.platform.cancel_download(download).await?;
        }
        Ok(downloads.len())
    }

    /// Processes one event from the platform feed.
    pub async fn handle_event(&self, event: PlatformEvent) -> Result<Dispatch> {
        match event {
            PlatformEvent::TransactionUpdated(tx) => {
                if tx.state == TransactionState::Restored && self.restores.is_pending() {
                    self.restores.note_replayed();
                }
                self.dispatcher.handle_transaction(tx).await
            }
            PlatformEvent::DownloadUpdated(download) => {
                self.dispatcher.handle_download(download).await
            }
            PlatformEvent::RestoreCompleted => Ok(Dispatch::RestoreSettled {
                completions: self.restores.settle(Ok(())),
            }),
            PlatformEvent::RestoreFailed(error) => Ok(Dispatch::RestoreSettled {
                completions: self.restores.settle(Err(&error)),
            }),
        }
    }

    /// Consumes the platform feed until the sending side closes.
    pub async fn run(&self, mut events: mpsc::UnboundedReceiver<PlatformEvent>) {
        while let Some(event) = events.recv().await {
            if let Err(e) = self.handle_event(event).await {
                warn!(error = %e, "error handling platform event");
            }
        }
        debug!("platform event feed closed");
    }

    /// Fetches and decodes the current receipt. No trust checks are made.
    pub async fn current_receipt(&self) -> Result<ReceiptRecord> {
        let blob = self.platform.current_receipt_blob().await?;
        Ok(receipt::parse(&blob)?)
    }
}
