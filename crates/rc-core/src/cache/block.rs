//! Fixed-capacity slab of resolved-IP nodes.

use std::collections::HashMap;
use std::io::{self, Write};
use std::net::IpAddr;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::RwLock;
use rc_types::CacheError;

use super::Limits;
use crate::writer::compact_ts;

/// One (name, last-seen) pair.
#[derive(Clone, Debug)]
pub(crate) struct Item {
    pub(crate) name: String,
    pub(crate) ts: DateTime<Utc>,
}

/// Per-resolved-IP record. The primary item is embedded so the common case
/// (one name per resolved IP) allocates no secondary list.
#[derive(Clone, Debug)]
pub(crate) struct Node {
    pub(crate) last: DateTime<Utc>,
    pub(crate) primary: Item,
    pub(crate) others: Vec<Item>,
}

impl Node {
    fn new(name: &str, ts: DateTime<Utc>) -> Self {
        Self {
            last: ts,
            primary: Item {
                name: name.to_string(),
                ts,
            },
            others: Vec::new(),
        }
    }

    /// Refresh or add `name`. `last` is updated even when the name list is at
    /// capacity and the insert is refused.
    fn update(&mut self, name: &str, ts: DateTime<Utc>, max: usize) -> Result<(), CacheError> {
        self.last = ts;
        // a cleaned slot: reuse the embedded item
        if self.primary.name.is_empty() {
            self.primary.name = name.to_string();
            self.primary.ts = ts;
            return Ok(());
        }
        if self.primary.name == name {
            self.primary.ts = ts;
            return Ok(());
        }
        if let Some(item) = self.others.iter_mut().find(|i| i.name == name) {
            item.ts = ts;
            return Ok(());
        }
        if !self.others.is_empty() && self.others.len() >= max {
            return Err(CacheError::LimitNamesIP);
        }
        if self.others.is_empty() {
            self.others.reserve_exact(max);
        }
        self.others.push(Item {
            name: name.to_string(),
            ts,
        });
        Ok(())
    }

    fn query(&self, name: &str, now: DateTime<Utc>, expires: TimeDelta) -> Option<DateTime<Utc>> {
        if now.signed_duration_since(self.last) > expires {
            return None;
        }
        // slot was cleaned
        if self.primary.name.is_empty() {
            return None;
        }
        // query without name answers for the node as a whole
        if name.is_empty() {
            return Some(self.last);
        }
        if self.primary.name == name {
            if now.signed_duration_since(self.primary.ts) <= expires {
                return Some(self.primary.ts);
            }
            return None;
        }
        for item in &self.others {
            if item.name == name {
                if now.signed_duration_since(item.ts) <= expires {
                    return Some(item.ts);
                }
                return None;
            }
        }
        None
    }

    fn clean(&mut self) {
        self.primary.name.clear();
        self.others = Vec::new();
    }
}

/// Fixed-capacity block of resolved-IP bindings.
///
/// The node vector grows append-only up to `block_size`; its length is the
/// next free slot. Cleaned slots stay indexed and are reused in place on the
/// next insert for the same resolved IP.
pub(crate) struct ResolvBlock {
    limits: Limits,
    inner: RwLock<BlockInner>,
}

struct BlockInner {
    last: DateTime<Utc>,
    index: HashMap<IpAddr, usize>,
    nodes: Vec<Node>,
}

impl ResolvBlock {
    pub(crate) fn new(limits: Limits) -> Self {
        Self {
            limits,
            inner: RwLock::new(BlockInner {
                last: Utc::now(),
                index: HashMap::with_capacity(limits.block_size),
                nodes: Vec::with_capacity(limits.block_size),
            }),
        }
    }

    /// `Ok(true)` when inserted or refreshed, `Ok(false)` when the block is
    /// full and the caller must move on to the next block.
    pub(crate) fn insert(
        &self,
        resolved: IpAddr,
        name: &str,
        ts: DateTime<Utc>,
    ) -> Result<bool, CacheError> {
        let mut inner = self.inner.write();
        let existing = inner.index.get(&resolved).copied();
        if let Some(idx) = existing {
            inner.last = ts;
            inner.nodes[idx].update(name, ts, self.limits.max_names_node)?;
            return Ok(true);
        }
        if inner.nodes.len() < self.limits.block_size {
            inner.last = ts;
            inner.nodes.push(Node::new(name, ts));
            let idx = inner.nodes.len() - 1;
            inner.index.insert(resolved, idx);
            return Ok(true);
        }
        Ok(false)
    }

    pub(crate) fn query(
        &self,
        resolved: IpAddr,
        name: &str,
        now: DateTime<Utc>,
        expires: TimeDelta,
    ) -> Option<DateTime<Utc>> {
        let inner = self.inner.read();
        let &idx = inner.index.get(&resolved)?;
        inner.nodes[idx].query(name, now, expires)
    }

    pub(crate) fn last(&self) -> DateTime<Utc> {
        self.inner.read().last
    }

    pub(crate) fn is_full(&self) -> bool {
        let inner = self.inner.read();
        inner.nodes.len() >= self.limits.block_size
    }

    /// Empty every node older than the window. Indexed slots are kept; an
    /// empty primary name marks the slot as logically absent.
    pub(crate) fn clean(&self, now: DateTime<Utc>, expires: TimeDelta) {
        let mut inner = self.inner.write();
        for node in inner.nodes.iter_mut() {
            if now.signed_duration_since(node.last) > expires {
                node.clean();
            }
        }
    }

    pub(crate) fn write_dump(&self, out: &mut dyn Write, n: usize) -> io::Result<()> {
        let inner = self.inner.write();
        writeln!(
            out,
            "  - index: {} next: {} last: {}",
            n,
            inner.nodes.len(),
            compact_ts(inner.last)
        )?;
        let mut keys: Vec<&IpAddr> = inner.index.keys().collect();
        keys.sort();
        for key in keys {
            let idx = inner.index[key];
            let node = &inner.nodes[idx];
            writeln!(
                out,
                "    - key: {} index: {} last: {}",
                key,
                idx,
                compact_ts(node.last)
            )?;
            writeln!(
                out,
                "      name: {} ts: {}",
                node.primary.name,
                compact_ts(node.primary.ts)
            )?;
            for item in &node.others {
                writeln!(out, "      name: {} ts: {}", item.name, compact_ts(item.ts))?;
            }
        }
        Ok(())
    }
}
