use crate::error::{Result, SearchError, Stage};
use crate::index::{Bm25Params, DEFAULT_B, DEFAULT_K1};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const DEFAULT_TOP_K: usize = 10;
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(30);

/// Settings shared by the batch commands and the server.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub store_path: PathBuf,
    pub cache_path: PathBuf,
    pub k1: f64,
    pub b: f64,
    pub batch_size: usize,
    pub store_timeout: Duration,
    pub top_k: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            store_path: PathBuf::from("./store"),
            cache_path: PathBuf::from("./bm25.cache"),
            k1: DEFAULT_K1,
            b: DEFAULT_B,
            batch_size: DEFAULT_BATCH_SIZE,
            store_timeout: DEFAULT_STORE_TIMEOUT,
            top_k: DEFAULT_TOP_K,
        }
    }
}

impl EngineConfig {
    pub fn params(&self) -> Result<Bm25Params> {
        Bm25Params::new(self.k1, self.b)
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(SearchError::InvalidInput(Stage::Build, "batch size must be at least 1".into()));
        }
        self.params().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.params().unwrap(), Bm25Params::default());
    }

    #[test]
    fn zero_batch_is_rejected() {
        let config = EngineConfig { batch_size: 0, ..EngineConfig::default() };
        assert!(config.validate().is_err());
    }
}
