//! rc-types: cross-crate stable contracts (error kinds, response records).
//! This crate defines small, stable data types shared between the cache core
//! and its RPC consumers.
//!
//! Design notes:
//! - Error kinds are typed so callers can pattern match and map the limit
//!   conditions to abuse signals without string inspection.
//! - Response records stay serde-serializable; they are part of the wire
//!   surface and must not change shape casually.

pub mod errors;
pub mod response;

pub use errors::{CacheError, Result};
pub use response::CacheResponse;
