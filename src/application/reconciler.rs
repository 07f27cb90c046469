use super::dispatcher::TransactionDispatcher;
use crate::domain::ports::PaymentPlatform;
use crate::domain::transaction::PlatformError;
use crate::error::{IapError, Result};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use tracing::{info, warn};

/// Called once when a restore request settles.
pub type RestoreCompletion = Box<dyn FnOnce(Result<()>) + Send>;

/// Completions waiting for the platform to finish replaying purchases.
///
/// The platform signals the end of the replay stream once, however many
/// restores were requested, so every pending completion fires on that signal.
#[derive(Default)]
pub struct RestoreTracker {
    pending: Mutex<Vec<(u64, RestoreCompletion)>>,
    next_id: AtomicU64,
    replayed: AtomicUsize,
}

impl RestoreTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a completion and returns a handle for [`RestoreTracker::take`].
    pub fn push(&self, completion: RestoreCompletion) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, completion));
        id
    }

    /// Withdraws a queued completion that has not fired yet.
    pub fn take(&self, id: u64) -> Option<RestoreCompletion> {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let index = pending.iter().position(|(queued, _)| *queued == id)?;
        Some(pending.remove(index).1)
    }

    pub fn is_pending(&self) -> bool {
        !self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }

    /// Counts a restored transaction seen while a restore is pending.
    pub fn note_replayed(&self) {
        self.replayed.fetch_add(1, Ordering::Relaxed);
    }

    /// Runs every pending completion with `outcome`. Returns how many ran.
    pub fn settle(&self, outcome: std::result::Result<(), &PlatformError>) -> usize {
        let completions = std::mem::take(
            &mut *self.pending.lock().unwrap_or_else(PoisonError::into_inner),
        );
        let replayed = self.replayed.swap(0, Ordering::Relaxed);

        match outcome {
            Ok(()) => info!(replayed, completions = completions.len(), "restore finished"),
            Err(e) => warn!(
                replayed,
                completions = completions.len(),
                error = %e,
                "restore failed"
            ),
        }

        let count = completions.len();
        for (_, completion) in completions {
            completion(outcome.map_err(|e| IapError::RestoreFailed {
                cancelled: e.is_cancellation(),
                reason: e.message.clone(),
            }));
        }
        count
    }
}

/// Pulls transactions stranded mid-download by an earlier run and hands them
/// back to the dispatcher. Returns how many were re-attached.
pub async fn restore_unfinished_downloads(
    platform: &dyn PaymentPlatform,
    dispatcher: &TransactionDispatcher,
) -> Result<usize> {
    let unfinished = platform.unfinished_transactions().await?;
    let mut reattached = 0;
    for tx in unfinished {
        let id = tx.id.clone();
        if dispatcher.reattach(tx).await? {
            info!(transaction_id = %id, "re-attached unfinished transaction");
            reattached += 1;
        }
    }
    Ok(reattached)
}
