//! Response records returned by the check endpoint.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Answer to a check call.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheResponse {
    /// True iff the cache holds a non-expired record of this client resolving
    /// this IP, optionally refined by name.
    pub result: bool,
    /// Most recent insert timestamp for the matched entry; `None` on miss.
    pub last: Option<DateTime<Utc>>,
    /// Earliest moment the cache is authoritative for:
    /// `max(flushed, now - expires)`.
    pub store: DateTime<Utc>,
}
