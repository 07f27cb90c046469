//! Domain types shared by every layer: products, transactions, observers,
//! the platform port and the receipt codec.

mod der;
pub mod observer;
pub mod ports;
pub mod product;
pub mod receipt;
pub mod transaction;
