//! Explicit configuration passed into the orchestrator and collaborators.
//!
//! Loaded from an optional JSON file; any field left out takes its default.
//! The CLI layers flag and environment overrides on top.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PurposePayConfig {
    pub orchestrator: OrchestratorConfig,
    pub collaborators: CollaboratorConfig,
}

/// Pipeline execution settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Per-invocation capability timeout.
    pub capability_timeout_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            capability_timeout_ms: 5_000,
        }
    }
}

impl OrchestratorConfig {
    pub fn capability_timeout(&self) -> Duration {
        Duration::from_millis(self.capability_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.capability_timeout_ms == 0 {
            return Err(ConfigurationError::InvalidParameter {
                param: "capability_timeout_ms".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

/// One row of the market price table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketRate {
    /// Case-insensitive keyword matched against the requested item.
    pub item: String,
    /// Rate per unit in rupees.
    pub rate: u64,
}

impl MarketRate {
    pub fn new(item: impl Into<String>, rate: u64) -> Self {
        Self {
            item: item.into(),
            rate,
        }
    }
}

/// Settings for the bundled stand-in collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollaboratorConfig {
    /// Market price table. The first row whose keyword occurs in the item wins.
    pub market_prices: Vec<MarketRate>,
    /// Per-unit rate used when no market rate matches.
    pub standard_rate: u64,
    /// Treat a missing market rate as a verification failure.
    pub require_market_rate: bool,
    /// Sale amount reported by the harvest listener.
    pub harvest_sale_amount: u64,
    pub receipt_prefix: String,
    /// Credit scores below this are refused by the traditional channel and
    /// routed to purpose-bound disbursement.
    pub min_credit_score: u32,
}

impl Default for CollaboratorConfig {
    fn default() -> Self {
        Self {
            market_prices: vec![
                MarketRate::new("Urea", 600),
                MarketRate::new("DAP", 1350),
                MarketRate::new("Seeds", 400),
            ],
            standard_rate: 500,
            require_market_rate: false,
            harvest_sale_amount: 50_000,
            receipt_prefix: "txn".to_string(),
            min_credit_score: 700,
        }
    }
}

impl CollaboratorConfig {
    /// First table row whose keyword occurs in `item`, ignoring case.
    pub fn market_rate(&self, item: &str) -> Option<&MarketRate> {
        let needle = item.to_lowercase();
        self.market_prices
            .iter()
            .find(|row| needle.contains(&row.item.to_lowercase()))
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let invalid = |param: &str, reason: &str| ConfigurationError::InvalidParameter {
            param: param.to_string(),
            reason: reason.to_string(),
        };
        if self.standard_rate == 0 {
            return Err(invalid("standard_rate", "must be greater than zero"));
        }
        if let Some(row) = self.market_prices.iter().find(|row| row.rate == 0) {
            return Err(invalid(
                &format!("market_prices.{}", row.item),
                "must be greater than zero",
            ));
        }
        if self.market_prices.iter().any(|row| row.item.trim().is_empty()) {
            return Err(invalid("market_prices", "item keywords must not be empty"));
        }
        if self.receipt_prefix.trim().is_empty() {
            return Err(invalid("receipt_prefix", "must not be empty"));
        }
        Ok(())
    }
}

/// Failure to load a configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigFileError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(#[from] ConfigurationError),
}

impl PurposePayConfig {
    /// Read and validate a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigFileError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigFileError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|source| ConfigFileError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        self.orchestrator.validate()?;
        self.collaborators.validate()
    }
}
