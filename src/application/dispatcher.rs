use super::registry::{ObserverEntry, ObserverRegistry};
use crate::domain::ports::PaymentPlatform;
use crate::domain::transaction::{
    Download, DownloadState, Transaction, TransactionId, TransactionState,
};
use crate::error::{IapError, Result};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// What the dispatcher did with one platform event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Purchasing or deferred: nothing to report until the platform moves it.
    Outstanding,
    /// Callbacks ran for `observers` entries. `finalized` says whether the
    /// transaction was acknowledged in the same step.
    Delivered { observers: usize, finalized: bool },
    /// The event repeats one already handled; nothing ran.
    Duplicate,
    /// A download moved without finishing.
    Progress,
    /// The event refers to a transaction the dispatcher is not tracking.
    Untracked,
    /// The restore stream ended and `completions` callbacks ran.
    RestoreSettled { completions: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Purchasing or deferred.
    Outstanding,
    /// Success or failure callbacks are running; finalize follows.
    Delivering,
    /// Success delivered, hosted content still transferring.
    AwaitingDownloads,
}

#[derive(Debug)]
struct Tracked {
    transaction: Transaction,
    phase: Phase,
}

/// Finalized ids, oldest evicted first once `capacity` is reached.
#[derive(Debug)]
struct FinalizedLog {
    order: VecDeque<TransactionId>,
    ids: HashSet<TransactionId>,
    capacity: usize,
}

impl FinalizedLog {
    fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(capacity.min(1024)),
            ids: HashSet::new(),
            capacity: capacity.max(1),
        }
    }

    fn contains(&self, id: &TransactionId) -> bool {
        self.ids.contains(id)
    }

    fn record(&mut self, id: TransactionId) {
        if !self.ids.insert(id.clone()) {
            return;
        }
        self.order.push_back(id);
        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.ids.remove(&evicted);
            }
        }
    }
}

#[derive(Debug)]
struct DispatchState {
    tracked: HashMap<TransactionId, Tracked>,
    finalized: FinalizedLog,
}

/// Routes platform transaction and download events to registered observers
/// and acknowledges each transaction exactly once.
///
/// Tracking state sits behind a mutex that is released before any callback
/// runs and before any platform call is awaited.
pub struct TransactionDispatcher {
    platform: Arc<dyn PaymentPlatform>,
    registry: Arc<ObserverRegistry>,
    state: Mutex<DispatchState>,
    auto_start_downloads: bool,
}

impl TransactionDispatcher {
    /// Creates a dispatcher.
    ///
    /// # Arguments
    ///
    /// * `platform` - Where finalize and download requests go.
    /// * `registry` - Observers to route events to.
    /// * `finalized_history` - How many finalized ids to remember for replays.
    /// * `auto_start_downloads` - Start hosted content right after a purchase.
    pub fn new(
        platform: Arc<dyn PaymentPlatform>,
        registry: Arc<ObserverRegistry>,
        finalized_history: usize,
        auto_start_downloads: bool,
    ) -> Self {
        Self {
            platform,
            registry,
            state: Mutex::new(DispatchState {
                tracked: HashMap::new(),
                finalized: FinalizedLog::new(finalized_history),
            }),
            auto_start_downloads,
        }
    }

    fn lock(&self) -> MutexGuard<'_, DispatchState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Processes one transaction update from the platform feed.
    pub async fn handle_transaction(&self, tx: Transaction) -> Result<Dispatch> {
        {
            let mut state = self.lock();
            if state.finalized.contains(&tx.id) {
                debug!(transaction_id = %tx.id, "ignoring replay of finalized transaction");
                return Ok(Dispatch::Duplicate);
            }
            if let Some(tracked) = state.tracked.get(&tx.id)
                && tracked.phase != Phase::Outstanding
            {
                debug!(transaction_id = %tx.id, "ignoring replay of delivered transaction");
                return Ok(Dispatch::Duplicate);
            }

            let phase = match tx.state {
                TransactionState::Purchasing | TransactionState::Deferred => Phase::Outstanding,
                TransactionState::Purchased | TransactionState::Restored
                    if tx.has_hosted_content() =>
                {
                    Phase::AwaitingDownloads
                }
                _ => Phase::Delivering,
            };
            state.tracked.insert(
                tx.id.clone(),
                Tracked {
                    transaction: tx.clone(),
                    phase,
                },
            );
            if phase == Phase::Outstanding {
                debug!(
                    transaction_id = %tx.id,
                    product_id = %tx.product_id,
                    state = ?tx.state,
                    "transaction outstanding"
                );
                return Ok(Dispatch::Outstanding);
            }
        }

        let entries = self.registry.lookup(&tx.product_id);
        if entries.is_empty() {
            info!(
                transaction_id = %tx.id,
                product_id = %tx.product_id,
                state = ?tx.state,
                "no observer registered, acknowledging without callback"
            );
            self.finalize(&tx.id).await?;
            return Ok(Dispatch::Delivered {
                observers: 0,
                finalized: true,
            });
        }

        if let Some(failure) = tx.failure() {
            let cancelled = failure.is_cancellation();
            debug!(
                transaction_id = %tx.id,
                observers = entries.len(),
                cancelled,
                error = %failure,
                "delivering failure"
            );
            for entry in &entries {
                (entry.handlers.on_failure)(&tx, cancelled);
            }
            self.finalize(&tx.id).await?;
            return Ok(Dispatch::Delivered {
                observers: entries.len(),
                finalized: true,
            });
        }

        debug!(
            transaction_id = %tx.id,
            observers = entries.len(),
            downloads = tx.downloads.len(),
            "delivering success"
        );
        for entry in &entries {
            (entry.handlers.on_success)(&tx);
        }

        if !tx.has_hosted_content() || tx.downloads_settled() {
            self.finalize(&tx.id).await?;
            return Ok(Dispatch::Delivered {
                observers: entries.len(),
                finalized: true,
            });
        }

        if self.auto_start_downloads {
            self.resume_downloads(&tx.downloads).await;
        }
        Ok(Dispatch::Delivered {
            observers: entries.len(),
            finalized: false,
        })
    }

    /// Processes one download update from the platform feed.
    ///
    /// Terminal downloads are reported to `on_content_ready` once; the parent
    /// transaction is finalized when its last download settles.
    pub async fn handle_download(&self, download: Download) -> Result<Dispatch> {
        let (tx, settled) = {
            let mut state = self.lock();
            let Some(tracked) = state.tracked.get_mut(&download.transaction_id) else {
                warn!(
                    transaction_id = %download.transaction_id,
                    content_id = %download.content_id,
                    "download update for untracked transaction"
                );
                return Ok(Dispatch::Untracked);
            };
            if tracked.phase != Phase::AwaitingDownloads {
                warn!(
                    transaction_id = %download.transaction_id,
                    content_id = %download.content_id,
                    "download update before purchase completed"
                );
                return Ok(Dispatch::Untracked);
            }

            let downloads = &mut tracked.transaction.downloads;
            match downloads
                .iter_mut()
                .find(|d| d.content_id == download.content_id)
            {
                Some(slot) if slot.state.is_terminal() => return Ok(Dispatch::Duplicate),
                Some(slot) => *slot = download.clone(),
                None => downloads.push(download.clone()),
            }
            if !download.state.is_terminal() {
                return Ok(Dispatch::Progress);
            }
            (
                tracked.transaction.clone(),
                tracked.transaction.downloads_settled(),
            )
        };

        let entries = self.registry.lookup(&tx.product_id);
        let error = match download.state {
            DownloadState::Failed => Some(IapError::DownloadFailed {
                content_id: download.content_id.clone(),
                cancelled: false,
                reason: download
                    .error
                    .as_ref()
                    .map_or_else(|| "download failed".to_string(), ToString::to_string),
            }),
            DownloadState::Cancelled => Some(IapError::DownloadFailed {
                content_id: download.content_id.clone(),
                cancelled: true,
                reason: "download cancelled".to_string(),
            }),
            _ => None,
        };
        let url = match error {
            None => download.content_url.as_deref(),
            Some(_) => None,
        };

        let notified = notify_content_ready(&entries, &download, url, error.as_ref());
        debug!(
            transaction_id = %tx.id,
            content_id = %download.content_id,
            state = ?download.state,
            observers = notified,
            "download settled"
        );

        if settled {
            self.finalize(&tx.id).await?;
        }
        Ok(Dispatch::Delivered {
            observers: notified,
            finalized: settled,
        })
    }

    /// Acknowledges a transaction to the platform.
    ///
    /// Fails with [`IapError::AlreadyFinalized`] for a repeat call and with
    /// [`IapError::UnknownTransaction`] for an id that was never handled.
    /// The id is recorded before the platform call, so a failing platform
    /// call is reported but never repeated.
    pub async fn finalize(&self, id: &TransactionId) -> Result<()> {
        {
            let mut state = self.lock();
            if state.finalized.contains(id) {
                return Err(IapError::AlreadyFinalized(id.clone()));
            }
            if state.tracked.remove(id).is_none() {
                return Err(IapError::UnknownTransaction(id.clone()));
            }
            state.finalized.record(id.clone());
        }
        self.platform.finalize(id).await?;
        info!(transaction_id = %id, "transaction finalized");
        Ok(())
    }

    /// Re-attaches a transaction left mid-download by an earlier process.
    ///
    /// Success was already reported in that earlier run, so no callback runs
    /// here. Returns `false` if the transaction is already known or has no
    /// hosted content.
    pub(crate) async fn reattach(&self, tx: Transaction) -> Result<bool> {
        let settled = {
            let mut state = self.lock();
            if state.finalized.contains(&tx.id) || state.tracked.contains_key(&tx.id) {
                return Ok(false);
            }
            if !tx.state.is_success() || !tx.has_hosted_content() {
                return Ok(false);
            }
            let settled = tx.downloads_settled();
            state.tracked.insert(
                tx.id.clone(),
                Tracked {
                    transaction: tx.clone(),
                    phase: Phase::AwaitingDownloads,
                },
            );
            settled
        };

        if settled {
            info!(transaction_id = %tx.id, "unfinished transaction already settled");
            self.finalize(&tx.id).await?;
        } else {
            self.resume_downloads(&tx.downloads).await;
        }
        Ok(true)
    }

    /// Asks the platform to start every waiting or paused download.
    async fn resume_downloads(&self, downloads: &[Download]) {
        for download in downloads
            .iter()
            .filter(|d| matches!(d.state, DownloadState::Waiting | DownloadState::Paused))
        {
            if let Err(e) = self.platform.start_download(download).await {
                warn!(
                    transaction_id = %download.transaction_id,
                    content_id = %download.content_id,
                    error = %e,
                    "could not start download"
                );
            }
        }
    }

    /// Downloads of a tracked transaction that have not settled yet.
    pub fn pending_downloads(&self, id: &TransactionId) -> Result<Vec<Download>> {
        let state = self.lock();
        let tracked = state
            .tracked
            .get(id)
            .ok_or_else(|| IapError::UnknownTransaction(id.clone()))?;
        Ok(tracked
            .transaction
            .downloads
            .iter()
            .filter(|d| !d.state.is_terminal())
            .cloned()
            .collect())
    }

    pub fn is_finalized(&self, id: &TransactionId) -> bool {
        self.lock().finalized.contains(id)
    }

    /// Ids of transactions seen but not yet finalized, sorted.
    pub fn unfinished(&self) -> Vec<TransactionId> {
        let mut ids: Vec<_> = self.lock().tracked.keys().cloned().collect();
        ids.sort();
        ids
    }
}

fn notify_content_ready(
    entries: &[ObserverEntry],
    download: &Download,
    url: Option<&str>,
    error: Option<&IapError>,
) -> usize {
    let mut notified = 0;
    for handler in entries.iter().filter_map(|e| e.handlers.on_content_ready.as_ref()) {
        handler(download, url, error);
        notified += 1;
    }
    notified
}
