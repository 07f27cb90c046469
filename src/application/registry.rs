use crate::domain::observer::{ObserverHandlers, ObserverId};
use crate::domain::product::ProductId;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// One observer's interest in one product id.
#[derive(Debug, Clone)]
pub struct ObserverEntry {
    pub observer: ObserverId,
    pub product_id: ProductId,
    pub handlers: ObserverHandlers,
}

/// Maps product ids to the observers interested in them.
///
/// Entries for a product id are kept in registration order. The lock is only
/// held while the map is read or edited: `lookup` hands back clones so the
/// dispatcher can run callbacks without it, and those callbacks are free to
/// register or remove observers.
#[derive(Default)]
pub struct ObserverRegistry {
    entries: RwLock<HashMap<ProductId, Vec<ObserverEntry>>>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<ProductId, Vec<ObserverEntry>>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<ProductId, Vec<ObserverEntry>>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers `handlers` for every product id.
    ///
    /// An existing entry for the same (observer, product id) pair keeps its
    /// position and has its callbacks replaced.
    pub fn register<I>(&self, observer: ObserverId, product_ids: I, handlers: ObserverHandlers)
    where
        I: IntoIterator<Item = ProductId>,
    {
        let mut entries = self.write();
        for product_id in product_ids {
            let observers = entries.entry(product_id.clone()).or_default();
            match observers.iter_mut().find(|e| e.observer == observer) {
                Some(existing) => existing.handlers = handlers.clone(),
                None => observers.push(ObserverEntry {
                    observer,
                    product_id,
                    handlers: handlers.clone(),
                }),
            }
        }
    }

    /// Removes the (observer, product id) entry. Returns whether one existed.
    pub fn remove(&self, observer: ObserverId, product_id: &ProductId) -> bool {
        let mut entries = self.write();
        let Some(observers) = entries.get_mut(product_id) else {
            return false;
        };
        let before = observers.len();
        observers.retain(|e| e.observer != observer);
        let removed = observers.len() != before;
        if observers.is_empty() {
            entries.remove(product_id);
        }
        removed
    }

    /// Removes every entry belonging to `observer`, returning how many went.
    pub fn remove_all(&self, observer: ObserverId) -> usize {
        let mut entries = self.write();
        let mut removed = 0;
        entries.retain(|_, observers| {
            let before = observers.len();
            observers.retain(|e| e.observer != observer);
            removed += before - observers.len();
            !observers.is_empty()
        });
        removed
    }

    /// All entries for `product_id`, in registration order.
    pub fn lookup(&self, product_id: &ProductId) -> Vec<ObserverEntry> {
        self.read().get(product_id).cloned().unwrap_or_default()
    }

    pub fn is_observed(&self, product_id: &ProductId) -> bool {
        self.read().contains_key(product_id)
    }

    /// Total number of (observer, product id) entries.
    pub fn len(&self) -> usize {
        self.read().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}
