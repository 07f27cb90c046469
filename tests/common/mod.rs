#![allow(dead_code)]

use iapkit::application::manager::StoreManager;
use iapkit::config::StoreConfig;
use iapkit::domain::observer::{ObserverHandlers, ObserverId};
use iapkit::domain::product::Product;
use iapkit::infrastructure::in_memory::InMemoryPlatform;
use rust_decimal_macros::dec;
use std::sync::{Arc, Mutex};

/// Records every callback an observer receives as a short string.
#[derive(Default, Clone)]
pub struct Recorder {
    calls: Arc<Mutex<Vec<String>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: String) {
        self.calls.lock().unwrap().push(entry);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    /// Handlers logging `success:<tx>`, `failure:<tx>:<cancelled>` and
    /// `content:<content>:<url or error>`.
    pub fn handlers(&self) -> ObserverHandlers {
        let (s, f, c) = (self.clone(), self.clone(), self.clone());
        ObserverHandlers::new(
            move |tx| s.push(format!("success:{}", tx.id)),
            move |tx, cancelled| f.push(format!("failure:{}:{cancelled}", tx.id)),
        )
        .with_content_ready(move |d, url, err| {
            let outcome = match (url, err) {
                (_, Some(e)) => format!("error:{}", e.is_cancellation()),
                (Some(url), None) => url.to_string(),
                (None, None) => "-".to_string(),
            };
            c.push(format!("content:{}:{outcome}", d.content_id));
        })
    }
}

/// A platform selling "p1" and "p2".
pub fn stocked_platform() -> InMemoryPlatform {
    let platform = InMemoryPlatform::new();
    platform.add_product(Product::new("p1", dec!(0.99)).with_title("Coins", "A bag of coins"));
    platform.add_product(Product::new("p2", dec!(4.99)).with_title("Gems", "A box of gems"));
    platform
}

pub fn manager_for(platform: &InMemoryPlatform) -> StoreManager {
    StoreManager::new(
        Box::new(platform.clone()),
        StoreConfig::with_products(["p1", "p2", "p3"]),
    )
}

/// Registers a recording observer for `products` and returns it.
pub fn observe(store: &StoreManager, products: &[&str]) -> (ObserverId, Recorder) {
    let observer = ObserverId::next();
    let recorder = Recorder::new();
    store.add_observer_for_products(observer, products.iter().copied(), recorder.handlers());
    (observer, recorder)
}
