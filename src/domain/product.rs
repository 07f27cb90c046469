use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque product identifier issued by the platform catalog.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(String);

impl ProductId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProductId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ProductId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A purchasable item as described by the platform catalog.
///
/// Products are immutable once loaded; a new catalog load replaces the whole
/// set instead of merging into it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub localized_title: String,
    pub localized_description: String,
    pub price: Decimal,
    /// Locale identifier the price is expressed in, e.g. `en_US@currency=USD`.
    pub price_locale: String,
}

impl Product {
    pub fn new(id: impl Into<ProductId>, price: Decimal) -> Self {
        Self {
            id: id.into(),
            localized_title: String::new(),
            localized_description: String::new(),
            price,
            price_locale: String::new(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>, description: impl Into<String>) -> Self {
        self.localized_title = title.into();
        self.localized_description = description.into();
        self
    }

    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.price_locale = locale.into();
        self
    }
}

/// Result of a platform catalog query: the recognised products and the ids
/// the platform rejected.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CatalogResponse {
    pub valid: Vec<Product>,
    pub invalid: Vec<ProductId>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_product_id_serializes_as_plain_string() {
        let id = ProductId::from("com.example.coins");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"com.example.coins\"");
    }

    #[test]
    fn test_product_builder() {
        let product = Product::new("p1", dec!(0.99))
            .with_title("Coins", "A pile of coins")
            .with_locale("en_US@currency=USD");

        assert_eq!(product.id.as_str(), "p1");
        assert_eq!(product.price, dec!(0.99));
        assert_eq!(product.localized_title, "Coins");
        assert_eq!(product.price_locale, "en_US@currency=USD");
    }
}
