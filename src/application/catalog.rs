use crate::domain::product::{CatalogResponse, Product, ProductId};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// The result of one completed catalog load.
#[derive(Debug, Default)]
pub struct CatalogSnapshot {
    generation: u64,
    products: Vec<Product>,
    invalid: Vec<ProductId>,
}

impl CatalogSnapshot {
    /// Ticket number of the load that produced this snapshot; 0 before any load.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn products(&self) -> &[Product] {
        &self.products
    }

    pub fn invalid_product_ids(&self) -> &[ProductId] {
        &self.invalid
    }

    pub fn product(&self, id: &ProductId) -> Option<&Product> {
        self.products.iter().find(|p| &p.id == id)
    }

    pub fn contains(&self, id: &ProductId) -> bool {
        self.product(id).is_some()
    }
}

/// Identifies one in-flight catalog load. Later loads get larger tickets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct LoadTicket(u64);

/// Holds the last completed catalog load.
///
/// Readers get an `Arc` to a finished snapshot, so they never observe a
/// partially applied load. A load that finishes after a newer load has
/// already been installed is dropped.
#[derive(Default)]
pub struct CatalogCache {
    next_ticket: AtomicU64,
    current: RwLock<Arc<CatalogSnapshot>>,
}

impl CatalogCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_load(&self) -> LoadTicket {
        LoadTicket(self.next_ticket.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Installs the result of `ticket`'s load. Returns `false` when a newer
    /// load already completed and the result was discarded.
    ///
    /// Completion order decides which result is kept, with one exception: a
    /// load that completes after a later-started load has already been
    /// installed is stale and dropped. Loads that complete in start order
    /// each replace the snapshot in turn.
    pub fn complete(&self, ticket: LoadTicket, response: CatalogResponse) -> bool {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        if current.generation >= ticket.0 {
            return false;
        }
        *current = Arc::new(CatalogSnapshot {
            generation: ticket.0,
            products: response.valid,
            invalid: response.invalid,
        });
        true
    }

    pub fn snapshot(&self) -> Arc<CatalogSnapshot> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn contains(&self, id: &ProductId) -> bool {
        self.snapshot().contains(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn response(valid: &[&str], invalid: &[&str]) -> CatalogResponse {
        CatalogResponse {
            valid: valid.iter().map(|id| Product::new(*id, dec!(0.99))).collect(),
            invalid: invalid.iter().map(|id| ProductId::from(*id)).collect(),
        }
    }

    #[test]
    fn test_empty_before_first_load() {
        let cache = CatalogCache::new();
        let snapshot = cache.snapshot();
        assert_eq!(snapshot.generation(), 0);
        assert!(snapshot.products().is_empty());
        assert!(!cache.contains(&ProductId::from("p1")));
    }

    #[test]
    fn test_completed_load_replaces_wholesale() {
        let cache = CatalogCache::new();
        let first = cache.begin_load();
        assert!(cache.complete(first, response(&["p1", "p2"], &["bad"])));

        let second = cache.begin_load();
        assert!(cache.complete(second, response(&["p3"], &[])));

        let snapshot = cache.snapshot();
        assert_eq!(snapshot.products().len(), 1);
        assert!(snapshot.contains(&ProductId::from("p3")));
        assert!(!snapshot.contains(&ProductId::from("p1")));
        assert!(snapshot.invalid_product_ids().is_empty());
    }

    #[test]
    fn test_older_load_completing_after_newer_is_discarded() {
        let cache = CatalogCache::new();
        let older = cache.begin_load();
        let newer = cache.begin_load();

        assert!(cache.complete(newer, response(&["new"], &[])));
        assert!(!cache.complete(older, response(&["old"], &[])));

        let snapshot = cache.snapshot();
        assert!(snapshot.contains(&ProductId::from("new")));
        assert!(!snapshot.contains(&ProductId::from("old")));
    }

    #[test]
    fn test_out_of_order_start_completes_in_order() {
        let cache = CatalogCache::new();
        let older = cache.begin_load();
        let newer = cache.begin_load();

        assert!(cache.complete(older, response(&["old"], &[])));
        assert!(cache.complete(newer, response(&["new"], &[])));
        assert_eq!(cache.snapshot().generation(), 2);
    }

    #[test]
    fn test_readers_keep_their_snapshot() {
        let cache = CatalogCache::new();
        let ticket = cache.begin_load();
        cache.complete(ticket, response(&["p1"], &[]));
        let held = cache.snapshot();

        let ticket = cache.begin_load();
        cache.complete(ticket, response(&["p2"], &[]));

        assert!(held.contains(&ProductId::from("p1")));
        assert!(cache.contains(&ProductId::from("p2")));
    }
}
