//! Error taxonomy for the resolution cache and its writers.

use std::io;

use thiserror::Error;

pub type Result<T, E = CacheError> = std::result::Result<T, E>;

/// Failure kinds surfaced by the cache service.
///
/// The two limit kinds propagate verbatim to RPC callers; everything else is
/// internal and only reaches the logs.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Service not started or already shut down.
    #[error("service unavailable")]
    Unavailable,

    /// A client exceeded `max_blocks_client * block_size` distinct
    /// resolved-IP entries inside the active window.
    #[error("max queries per dns client reached")]
    LimitClientQueries,

    /// A single (client, resolved-IP) pair accumulated the maximum number of
    /// distinct names.
    #[error("max names per resolved ip reached")]
    LimitNamesIP,

    /// Enqueue on a trace or collect writer after close.
    #[error("log writer is closed")]
    LoggerClosed,

    /// Snapshot or writer I/O failure.
    #[error("io: {0}")]
    Io(#[from] io::Error),
}

impl CacheError {
    /// True for the kinds callers should map to abuse signals.
    pub fn is_limit(&self) -> bool {
        matches!(self, Self::LimitClientQueries | Self::LimitNamesIP)
    }
}
