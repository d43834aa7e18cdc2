//! Per-client ordered list of resolv blocks.

use std::io::{self, Write};
use std::net::IpAddr;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::RwLock;
use rc_types::CacheError;

use super::block::ResolvBlock;
use super::Limits;

/// All cached state for one DNS client.
///
/// Blocks are append-ordered: only the tail accepts new resolved IPs, older
/// blocks are full. Lookups scan tail to head so the newest binding wins.
pub(crate) struct ClientBlock {
    limits: Limits,
    blocks: RwLock<Vec<Arc<ResolvBlock>>>,
}

impl ClientBlock {
    pub(crate) fn new(limits: Limits) -> Self {
        let first = Arc::new(ResolvBlock::new(limits));
        Self {
            limits,
            blocks: RwLock::new(vec![first]),
        }
    }

    pub(crate) fn insert(
        &self,
        resolved: IpAddr,
        name: &str,
        ts: DateTime<Utc>,
    ) -> Result<(), CacheError> {
        let mut block = self.current_block();
        loop {
            if block.insert(resolved, name, ts)? {
                return Ok(());
            }
            // tail is full; a fresh block always has room, so this terminates
            block = self.next_free_block()?;
        }
    }

    pub(crate) fn query(
        &self,
        resolved: IpAddr,
        name: &str,
        now: DateTime<Utc>,
        expires: TimeDelta,
    ) -> Option<DateTime<Utc>> {
        // snapshot the list so the scan runs without holding the client lock
        let snapshot: Vec<Arc<ResolvBlock>> = self.blocks.read().clone();
        for block in snapshot.iter().rev() {
            if let Some(ts) = block.query(resolved, name, now, expires) {
                return Some(ts);
            }
        }
        None
    }

    /// Drop blocks whose whole content aged out, clean the rest in place.
    pub(crate) fn clean(&self, now: DateTime<Utc>, expires: TimeDelta) {
        let mut blocks = self.blocks.write();
        blocks.retain(|b| now.signed_duration_since(b.last()) <= expires);
        for block in blocks.iter() {
            block.clean(now, expires);
        }
    }

    fn current_block(&self) -> Arc<ResolvBlock> {
        {
            let blocks = self.blocks.read();
            if let Some(tail) = blocks.last() {
                return tail.clone();
            }
        }
        let mut blocks = self.blocks.write();
        if let Some(tail) = blocks.last() {
            return tail.clone();
        }
        let block = Arc::new(ResolvBlock::new(self.limits));
        blocks.push(block.clone());
        block
    }

    fn next_free_block(&self) -> Result<Arc<ResolvBlock>, CacheError> {
        let mut blocks = self.blocks.write();
        let Some(tail) = blocks.last().cloned() else {
            let block = Arc::new(ResolvBlock::new(self.limits));
            blocks.push(block.clone());
            return Ok(block);
        };
        // a concurrent winner may already have appended a block with room
        if !tail.is_full() {
            return Ok(tail);
        }
        if blocks.len() > self.limits.max_blocks_client {
            return Err(CacheError::LimitClientQueries);
        }
        let block = Arc::new(ResolvBlock::new(self.limits));
        blocks.push(block.clone());
        Ok(block)
    }

    pub(crate) fn write_dump(&self, out: &mut dyn Write) -> io::Result<()> {
        let blocks = self.blocks.write();
        for (n, block) in blocks.iter().enumerate() {
            block.write_dump(out, n)?;
        }
        Ok(())
    }
}
