use crate::domain::ports::{PaymentPlatform, PlatformEvent};
use crate::domain::product::{CatalogResponse, Product, ProductId};
use crate::domain::receipt::{self, ReceiptRecord};
use crate::domain::transaction::{Download, Transaction, TransactionId, TransactionState};
use crate::error::{IapError, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc::UnboundedSender;

#[derive(Debug)]
struct PlatformState {
    catalog: BTreeMap<ProductId, Product>,
    payments_enabled: bool,
    query_failure: Option<String>,
    restore_failure: Option<String>,
    unfinished: Vec<Transaction>,
    history: Vec<Transaction>,
    receipt: Option<Vec<u8>>,
    events: Option<UnboundedSender<PlatformEvent>>,
    next_transaction: u64,
    enqueued: Vec<ProductId>,
    finalized: Vec<TransactionId>,
    started: Vec<String>,
    paused: Vec<String>,
    cancelled: Vec<String>,
    restore_requests: usize,
}

impl Default for PlatformState {
    fn default() -> Self {
        Self {
            catalog: BTreeMap::new(),
            payments_enabled: true,
            query_failure: None,
            restore_failure: None,
            unfinished: Vec::new(),
            history: Vec::new(),
            receipt: None,
            events: None,
            next_transaction: 1,
            enqueued: Vec::new(),
            finalized: Vec::new(),
            started: Vec::new(),
            paused: Vec::new(),
            cancelled: Vec::new(),
            restore_requests: 0,
        }
    }
}

/// A scriptable payment platform kept entirely in memory.
///
/// Every request is recorded so callers can assert on what reached the
/// platform. Clones share state, so a test can keep one handle while the
/// `StoreManager` owns another. With an event sender attached, payments and
/// restores push their outcomes into the feed the way a real platform would.
#[derive(Debug, Default, Clone)]
pub struct InMemoryPlatform {
    state: Arc<Mutex<PlatformState>>,
}

impl InMemoryPlatform {
    /// Creates a platform with an empty catalog and payments enabled.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, PlatformState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Pushes payment and restore outcomes into `events`.
    pub fn with_event_sender(self, events: UnboundedSender<PlatformEvent>) -> Self {
        self.lock().events = Some(events);
        self
    }

    pub fn add_product(&self, product: Product) {
        self.lock().catalog.insert(product.id.clone(), product);
    }

    pub fn set_payments_enabled(&self, enabled: bool) {
        self.lock().payments_enabled = enabled;
    }

    /// Makes every later catalog query fail with `reason`.
    pub fn fail_queries(&self, reason: impl Into<String>) {
        self.lock().query_failure = Some(reason.into());
    }

    /// Makes every later restore request be refused with `reason`.
    pub fn fail_restores(&self, reason: impl Into<String>) {
        self.lock().restore_failure = Some(reason.into());
    }

    /// Leaves `tx` in the queue as if an earlier run never finalized it.
    pub fn add_unfinished(&self, tx: Transaction) {
        self.lock().unfinished.push(tx);
    }

    /// Adds a past purchase that restores will replay.
    pub fn add_history(&self, tx: Transaction) {
        self.lock().history.push(tx);
    }

    pub fn set_receipt(&self, record: &ReceiptRecord) {
        self.lock().receipt = Some(receipt::encode(record));
    }

    pub fn set_receipt_blob(&self, blob: Vec<u8>) {
        self.lock().receipt = Some(blob);
    }

    pub fn enqueued(&self) -> Vec<ProductId> {
        self.lock().enqueued.clone()
    }

    pub fn finalized(&self) -> Vec<TransactionId> {
        self.lock().finalized.clone()
    }

    pub fn started_downloads(&self) -> Vec<String> {
        self.lock().started.clone()
    }

    pub fn paused_downloads(&self) -> Vec<String> {
        self.lock().paused.clone()
    }

    pub fn cancelled_downloads(&self) -> Vec<String> {
        self.lock().cancelled.clone()
    }

    pub fn restore_requests(&self) -> usize {
        self.lock().restore_requests
    }
}

/// Sends without caring whether the feed is still consumed.
fn emit(events: &Option<UnboundedSender<PlatformEvent>>, event: PlatformEvent) {
    if let Some(events) = events {
        let _ = events.send(event);
    }
}

#[async_trait]
impl PaymentPlatform for InMemoryPlatform {
    async fn query_products(&self, ids: &[ProductId]) -> Result<CatalogResponse> {
        let state = self.lock();
        if let Some(reason) = &state.query_failure {
            return Err(IapError::Platform(reason.clone()));
        }
        let mut response = CatalogResponse::default();
        for id in ids {
            match state.catalog.get(id) {
                Some(product) => response.valid.push(product.clone()),
                None => response.invalid.push(id.clone()),
            }
        }
        Ok(response)
    }

    fn can_make_payments(&self) -> bool {
        self.lock().payments_enabled
    }

    async fn enqueue_payment(&self, product_id: &ProductId) -> Result<()> {
        let mut state = self.lock();
        if !state.payments_enabled {
            return Err(IapError::Platform("payments are disabled".to_string()));
        }
        state.enqueued.push(product_id.clone());
        let id = format!("mem-{}", state.next_transaction);
        state.next_transaction += 1;

        for phase in [TransactionState::Purchasing, TransactionState::Purchased] {
            let tx = Transaction::new(id.as_str(), product_id.clone(), phase);
            emit(&state.events, PlatformEvent::TransactionUpdated(tx));
        }
        Ok(())
    }

    async fn finalize(&self, transaction_id: &TransactionId) -> Result<()> {
        let mut state = self.lock();
        state.unfinished.retain(|tx| &tx.id != transaction_id);
        state.finalized.push(transaction_id.clone());
        Ok(())
    }

    async fn start_download(&self, download: &Download) -> Result<()> {
        self.lock().started.push(download.content_id.clone());
        Ok(())
    }

    async fn pause_download(&self, download: &Download) -> Result<()> {
        self.lock().paused.push(download.content_id.clone());
        Ok(())
    }

    async fn cancel_download(&self, download: &Download) -> Result<()> {
        self.lock().cancelled.push(download.content_id.clone());
        Ok(())
    }

    async fn restore_completed_transactions(&self) -> Result<()> {
        let mut state = self.lock();
        if let Some(reason) = &state.restore_failure {
            return Err(IapError::Platform(reason.clone()));
        }
        state.restore_requests += 1;
        let round = state.restore_requests;

        for past in &state.history {
            let mut replayed = past.clone();
            replayed.id = TransactionId::new(format!("{}-r{round}", past.id));
            replayed.state = TransactionState::Restored;
            replayed.original_transaction_id = Some(past.id.clone());
            emit(&state.events, PlatformEvent::TransactionUpdated(replayed));
        }
        emit(&state.events, PlatformEvent::RestoreCompleted);
        Ok(())
    }

    async fn unfinished_transactions(&self) -> Result<Vec<Transaction>> {
        Ok(self.lock().unfinished.clone())
    }

    async fn current_receipt_blob(&self) -> Result<Vec<u8>> {
        self.lock()
            .receipt
            .clone()
            .ok_or_else(|| IapError::Platform("no receipt on device".to_string()))
    }
}
