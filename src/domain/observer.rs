use super::transaction::{Download, Transaction};
use crate::error::IapError;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Equality token standing in for an observer.
///
/// The registry only compares these; it never keeps the observer itself
/// alive, so callers must remove their entries on teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(u64);

static NEXT_OBSERVER_ID: AtomicU64 = AtomicU64::new(1);

impl ObserverId {
    /// Allocates a process-unique id.
    pub fn next() -> Self {
        Self(NEXT_OBSERVER_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "observer#{}", self.0)
    }
}

pub type SuccessHandler = Arc<dyn Fn(&Transaction) + Send + Sync>;
/// Receives the failed transaction and whether the user cancelled it.
pub type FailureHandler = Arc<dyn Fn(&Transaction, bool) + Send + Sync>;
/// Receives the download plus either its content URL or the failure.
pub type ContentReadyHandler = Arc<dyn Fn(&Download, Option<&str>, Option<&IapError>) + Send + Sync>;

/// Callbacks an observer registers for a product id.
#[derive(Clone)]
pub struct ObserverHandlers {
    pub on_success: SuccessHandler,
    pub on_failure: FailureHandler,
    pub on_content_ready: Option<ContentReadyHandler>,
}

impl ObserverHandlers {
    pub fn new<S, F>(on_success: S, on_failure: F) -> Self
    where
        S: Fn(&Transaction) + Send + Sync + 'static,
        F: Fn(&Transaction, bool) + Send + Sync + 'static,
    {
        Self {
            on_success: Arc::new(on_success),
            on_failure: Arc::new(on_failure),
            on_content_ready: None,
        }
    }

    pub fn with_content_ready<C>(mut self, on_content_ready: C) -> Self
    where
        C: Fn(&Download, Option<&str>, Option<&IapError>) + Send + Sync + 'static,
    {
        self.on_content_ready = Some(Arc::new(on_content_ready));
        self
    }
}

impl fmt::Debug for ObserverHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverHandlers")
            .field("on_content_ready", &self.on_content_ready.is_some())
            .finish_non_exhaustive()
    }
}
