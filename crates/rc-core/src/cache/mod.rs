//! In-memory resolution cache.
//!
//! Two-level, append-mostly index: client IP -> [`ClientBlock`] -> fixed
//! capacity [`block::ResolvBlock`]s keyed by resolved IP, each node carrying
//! the names seen for that (client, resolved IP) pair inside a sliding time
//! window. Inserts and lookups are concurrent; expiration is lazy on query
//! plus a periodic [`Cache::clean`] sweep.

mod block;
mod client;

use std::collections::HashMap;
use std::io::{self, Write};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::RwLock;
use rc_types::CacheError;
use serde::{Deserialize, Serialize};

use self::client::ClientBlock;

/// Hard capacity limits, immutable after construction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Resolved-IP nodes per block.
    pub block_size: usize,
    /// Blocks per client; one extra block beyond this is tolerated before
    /// inserts fail with `LimitClientQueries`.
    pub max_blocks_client: usize,
    /// Distinct secondary names per resolved-IP node, on top of the embedded
    /// primary name.
    pub max_names_node: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            block_size: 1024,
            max_blocks_client: 32,
            max_names_node: 32,
        }
    }
}

/// The resolution cache. All methods are safe to call concurrently.
pub struct Cache {
    expires: TimeDelta,
    limits: Limits,
    clients: RwLock<HashMap<IpAddr, Arc<ClientBlock>>>,
    flushed: RwLock<DateTime<Utc>>,
    cleaned: RwLock<DateTime<Utc>>,
}

impl Cache {
    pub fn new(expires: Duration, limits: Limits) -> Self {
        let now = Utc::now();
        Self {
            expires: TimeDelta::from_std(expires).unwrap_or(TimeDelta::MAX),
            limits,
            clients: RwLock::new(HashMap::new()),
            flushed: RwLock::new(now),
            cleaned: RwLock::new(now),
        }
    }

    /// Record that `client` resolved `name` to each address in `resolved` at
    /// `ts`. The first failing address aborts the loop; earlier addresses
    /// stay recorded.
    pub fn set(
        &self,
        ts: DateTime<Utc>,
        client: IpAddr,
        name: &str,
        resolved: &[IpAddr],
    ) -> Result<(), CacheError> {
        let block = self.client_block(client);
        for &rip in resolved {
            block.insert(rip, name, ts)?;
        }
        Ok(())
    }

    /// Most recent non-expired insert timestamp for (client, resolved) —
    /// refined by `name` unless it is empty. `None` is a miss.
    pub fn get(&self, client: IpAddr, resolved: IpAddr, name: &str) -> Option<DateTime<Utc>> {
        let block = self.clients.read().get(&client).cloned()?;
        block.query(resolved, name, Utc::now(), self.expires)
    }

    /// Discard all state.
    pub fn flush(&self) {
        let mut clients = self.clients.write();
        *clients = HashMap::new();
        *self.flushed.write() = Utc::now();
    }

    /// Sweep expired entries. Runs against a snapshot of the client list so
    /// inserts and lookups proceed while sweeping. Empty clients are not
    /// removed; their footprint is bounded by the distinct client set.
    pub fn clean(&self) {
        let snapshot: Vec<Arc<ClientBlock>> = self.clients.read().values().cloned().collect();
        let now = Utc::now();
        for client in snapshot {
            client.clean(now, self.expires);
        }
        *self.cleaned.write() = Utc::now();
    }

    /// Earliest moment the cache holds authoritative data: the last flush if
    /// it is inside the window, otherwise `now - expires`.
    pub fn store(&self) -> DateTime<Utc> {
        let now = Utc::now();
        let flushed = *self.flushed.read();
        if now.signed_duration_since(flushed) < self.expires {
            flushed
        } else {
            now - self.expires
        }
    }

    pub fn flushed(&self) -> DateTime<Utc> {
        *self.flushed.read()
    }

    pub fn cleaned(&self) -> DateTime<Utc> {
        *self.cleaned.read()
    }

    pub fn expires(&self) -> Duration {
        self.expires.to_std().unwrap_or_default()
    }

    pub fn limits(&self) -> Limits {
        self.limits
    }

    /// Serialize the whole cache in a human-readable layout. Takes every
    /// level's write lock for the duration; debug use only.
    pub fn dump(&self, out: &mut dyn Write) -> io::Result<()> {
        let clients = self.clients.write();
        writeln!(out, "dump: {}", Utc::now().to_rfc3339())?;
        writeln!(out, "expires: {}", humantime::format_duration(self.expires()))?;
        writeln!(out, "limits: {:?}", self.limits)?;
        writeln!(out)?;
        let mut keys: Vec<&IpAddr> = clients.keys().collect();
        keys.sort();
        for key in keys {
            writeln!(out, "- key: {}", key)?;
            clients[key].write_dump(out)?;
        }
        Ok(())
    }

    fn client_block(&self, client: IpAddr) -> Arc<ClientBlock> {
        {
            let clients = self.clients.read();
            if let Some(c) = clients.get(&client) {
                return c.clone();
            }
        }
        let mut clients = self.clients.write();
        clients
            .entry(client)
            .or_insert_with(|| Arc::new(ClientBlock::new(self.limits)))
            .clone()
    }
}
