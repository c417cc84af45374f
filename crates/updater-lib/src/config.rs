//! Updater configuration

use crate::eviction::DEFAULT_EVICTION_TOLERANCE;
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Relative request/target drift that makes a pod an eviction candidate
pub const DEFAULT_MIN_CHANGE_FRACTION: f64 = 0.1;

pub const DEFAULT_EVICTION_TIMEOUT_SECS: u64 = 30;

/// Updater configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UpdaterConfig {
    /// Fraction of a workload's replicas that may be evicted concurrently
    #[serde(default = "default_eviction_tolerance")]
    pub eviction_tolerance: f64,

    /// Minimum relative difference between a request and its target
    #[serde(default = "default_min_change_fraction")]
    pub min_change_fraction: f64,

    /// Upper bound on one external eviction call; 0 disables the bound
    #[serde(default = "default_eviction_timeout_secs")]
    pub eviction_timeout_secs: u64,
}

fn default_eviction_tolerance() -> f64 {
    DEFAULT_EVICTION_TOLERANCE
}

fn default_min_change_fraction() -> f64 {
    DEFAULT_MIN_CHANGE_FRACTION
}

fn default_eviction_timeout_secs() -> u64 {
    DEFAULT_EVICTION_TIMEOUT_SECS
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            eviction_tolerance: default_eviction_tolerance(),
            min_change_fraction: default_min_change_fraction(),
            eviction_timeout_secs: default_eviction_timeout_secs(),
        }
    }
}

impl UpdaterConfig {
    /// Load configuration from `UPDATER_*` environment variables
    pub fn load() -> Result<Self> {
        Self::build(None)
    }

    /// Load configuration from a file, overridden by `UPDATER_*` environment variables
    pub fn load_from(path: &Path) -> Result<Self> {
        Self::build(Some(path))
    }

    fn build(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        builder = builder.add_source(config::Environment::with_prefix("UPDATER").try_parsing(true));

        let config: UpdaterConfig = builder
            .build()
            .context("Failed to read updater configuration")?
            .try_deserialize()
            .context("Failed to parse updater configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.eviction_tolerance) {
            bail!(
                "eviction_tolerance must be within [0, 1], got {}",
                self.eviction_tolerance
            );
        }
        if !(self.min_change_fraction >= 0.0) {
            bail!(
                "min_change_fraction must be non-negative, got {}",
                self.min_change_fraction
            );
        }
        Ok(())
    }

    pub fn eviction_timeout(&self) -> Option<Duration> {
        (self.eviction_timeout_secs > 0).then(|| Duration::from_secs(self.eviction_timeout_secs))
    }
}
