use crate::domain::product::ProductId;
use crate::error::{IapError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default number of finalized transaction ids remembered for replay detection.
pub const DEFAULT_FINALIZED_HISTORY: usize = 1024;

/// Settings for a [`StoreManager`](crate::application::manager::StoreManager).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Product ids requested from the platform by `load_store`.
    pub product_ids: Vec<ProductId>,
    /// How many finalized transaction ids to keep for deduplication.
    pub finalized_history: usize,
    /// Start hosted-content downloads as soon as a purchase succeeds.
    pub auto_start_downloads: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            product_ids: Vec::new(),
            finalized_history: DEFAULT_FINALIZED_HISTORY,
            auto_start_downloads: true,
        }
    }
}

impl StoreConfig {
    pub fn with_products<I, P>(product_ids: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<ProductId>,
    {
        Self {
            product_ids: product_ids.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Reads a JSON config file. Missing fields take their defaults.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let config: Self = serde_json::from_slice(&bytes)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.finalized_history == 0 {
            return Err(IapError::Config(
                "finalized_history must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
