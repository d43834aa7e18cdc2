//! rc-core: in-memory DNS resolution cache data plane.
//!
//! Records, per DNS client, the (name, resolved-IP) associations observed
//! over a sliding time window and answers whether a client resolved a given
//! IP recently, and when. A DNS server feeds answered queries in through
//! [`ResolvCacheService::collect`]; policy services correlate later
//! client-to-IP traffic through [`ResolvCacheService::check`].
//!
//! The cache is process-lifetime only: dumps are debug snapshots, not
//! durability.

pub mod cache;
pub mod collectfile;
pub mod config;
pub mod service;
pub mod tracelog;
mod writer;

pub use cache::{Cache, Limits};
pub use collectfile::CollectFile;
pub use config::{ConfigError, ResolvCacheConfig};
pub use rc_types::{CacheError, CacheResponse};
pub use service::{ResolvCacheService, ServiceConfig};
pub use tracelog::{FileTraceLog, TraceLog};
