//! Typed configuration for the resolv cache service.
//!
//! Only the typed surface lives here; an external loader (file, flags,
//! environment) fills it in.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::Limits;
use crate::service::ServiceConfig;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("limits.block_size must be greater than zero")]
    ZeroBlockSize,
    #[error("clean_secs must be greater than zero when expire_secs is set")]
    ZeroCleanInterval,
    #[error("dump_secs must be greater than zero when dump_file is set")]
    ZeroDumpInterval,
}

/// Knobs for the cache service.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolvCacheConfig {
    /// Sliding window in seconds. Zero disables expiration and the clean
    /// task.
    pub expire_secs: u64,
    /// Clean interval in seconds.
    pub clean_secs: u64,
    /// Dump interval in seconds.
    pub dump_secs: u64,
    /// Debug snapshot target; the dump task is disabled when unset.
    pub dump_file: Option<PathBuf>,
    /// Trace file; collect/check tracing is disabled when unset.
    pub trace_file: Option<PathBuf>,
    pub limits: Limits,
}

impl Default for ResolvCacheConfig {
    fn default() -> Self {
        Self {
            expire_secs: 3600,
            clean_secs: 60,
            dump_secs: 300,
            dump_file: None,
            trace_file: None,
            limits: Limits::default(),
        }
    }
}

impl ResolvCacheConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.limits.block_size == 0 {
            return Err(ConfigError::ZeroBlockSize);
        }
        if self.expire_secs > 0 && self.clean_secs == 0 {
            return Err(ConfigError::ZeroCleanInterval);
        }
        if self.dump_file.is_some() && self.dump_secs == 0 {
            return Err(ConfigError::ZeroDumpInterval);
        }
        Ok(())
    }

    pub fn expires(&self) -> Duration {
        Duration::from_secs(self.expire_secs)
    }

    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            clean_interval: Duration::from_secs(self.clean_secs),
            dump_interval: Duration::from_secs(self.dump_secs),
            dump_file: self.dump_file.clone(),
        }
    }
}
