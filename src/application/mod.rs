//! Application layer coordinating the store.
//!
//! [`manager::StoreManager`] is the entry point. It wires the observer
//! registry, the catalog cache and the transaction dispatcher to one
//! payment platform, and consumes the platform's event feed.

pub mod catalog;
pub mod dispatcher;
pub mod manager;
pub mod reconciler;
pub mod registry;
