//! Chain index: the unfinalized block tree and the finalized anchor.
//!
//! Blocks are registered as `newBlock` events arrive and linked by parent hash. Finalization
//! announcements may skip blocks, so [ChainIndex::ancestors_between] rebuilds the whole
//! newly-final range from parent links. [ChainIndex::advance_finalized] keeps only the
//! finalized block and its descendants; everything else (superseded ancestors and
//! abandoned forks) is removed and handed back for unpinning. Evicted hashes are remembered
//! as tombstones for a bounded number of finalization rounds so a replayed `newBlock` for
//! them is recognized without growing the index forever.

use crate::types::BlockHash;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    /// Parent walk from `from` ran out of known blocks before reaching `to`.
    #[error("no known ancestry from {from} back to {to}")]
    UnknownAncestry { from: BlockHash, to: BlockHash },
    #[error("block not tracked: {0}")]
    UnknownBlock(BlockHash),
}

/// Outcome of [ChainIndex::observe].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observed {
    New,
    /// Already tracked; the recorded parent is kept.
    Known,
    /// Evicted by an earlier finalization; not tracked again.
    Pruned,
}

#[derive(Debug, Clone)]
struct BlockEntry {
    parent: BlockHash,
    seen: u64,
}

/// Finalization rounds a tombstone outlives the round that evicted its block.
pub const DEFAULT_TOMBSTONE_ROUNDS: u64 = 64;

#[derive(Debug)]
pub struct ChainIndex {
    blocks: HashMap<BlockHash, BlockEntry>,
    /// Evicted block -> finalization round that evicted it.
    pruned: HashMap<BlockHash, u64>,
    last_finalized: Option<BlockHash>,
    next_seen: u64,
    round: u64,
    tombstone_rounds: u64,
}

impl Default for ChainIndex {
    fn default() -> Self {
        Self::with_tombstone_rounds(DEFAULT_TOMBSTONE_ROUNDS)
    }
}

impl ChainIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tombstone_rounds(tombstone_rounds: u64) -> Self {
        Self {
            blocks: HashMap::new(),
            pruned: HashMap::new(),
            last_finalized: None,
            next_seen: 0,
            round: 0,
            tombstone_rounds,
        }
    }

    /// Register `block` with its parent link. Idempotent.
    pub fn observe(&mut self, block: &BlockHash, parent: &BlockHash) -> Observed {
        if self.blocks.contains_key(block) {
            return Observed::Known;
        }
        if self.pruned.contains_key(block) {
            return Observed::Pruned;
        }
        let seen = self.next_seen;
        self.next_seen += 1;
        self.blocks.insert(
            block.clone(),
            BlockEntry {
                parent: parent.clone(),
                seen,
            },
        );
        Observed::New
    }

    pub fn contains(&self, block: &BlockHash) -> bool {
        self.blocks.contains_key(block)
    }

    /// True if `block` was evicted by a finalization within the tombstone horizon.
    pub fn is_pruned(&self, block: &BlockHash) -> bool {
        self.pruned.contains_key(block)
    }

    /// Number of tombstones currently held.
    pub fn tombstones(&self) -> usize {
        self.pruned.len()
    }

    pub fn parent_of(&self, block: &BlockHash) -> Option<&BlockHash> {
        self.blocks.get(block).map(|e| &e.parent)
    }

    pub fn last_finalized(&self) -> Option<&BlockHash> {
        self.last_finalized.as_ref()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Blocks after `previous` up to and including `finalized`, oldest first.
    pub fn ancestors_between(
        &self,
        finalized: &BlockHash,
        previous: &BlockHash,
    ) -> Result<Vec<BlockHash>, ChainError> {
        if !self.contains(finalized) {
            return Err(ChainError::UnknownBlock(finalized.clone()));
        }
        let mut range = Vec::new();
        let mut cursor = finalized;
        while cursor != previous {
            // A walk longer than the index can only come from a parent cycle.
            if range.len() > self.blocks.len() {
                break;
            }
            let entry = self
                .blocks
                .get(cursor)
                .ok_or_else(|| ChainError::UnknownAncestry {
                    from: finalized.clone(),
                    to: previous.clone(),
                })?;
            range.push(cursor.clone());
            cursor = &entry.parent;
        }
        if cursor != previous {
            return Err(ChainError::UnknownAncestry {
                from: finalized.clone(),
                to: previous.clone(),
            });
        }
        range.reverse();
        Ok(range)
    }

    /// Move the finalized anchor to `finalized` and evict every block that is not
    /// `finalized` or one of its descendants. Returns the evicted blocks in observation order.
    /// Tombstones older than the horizon are dropped in the same step.
    pub fn advance_finalized(&mut self, finalized: &BlockHash) -> Result<Vec<BlockHash>, ChainError> {
        if !self.contains(finalized) {
            return Err(ChainError::UnknownBlock(finalized.clone()));
        }
        // keep[b] == true iff the parent walk from b reaches `finalized`.
        let mut keep: HashMap<BlockHash, bool> = HashMap::with_capacity(self.blocks.len());
        keep.insert(finalized.clone(), true);
        for start in self.blocks.keys() {
            if keep.contains_key(start) {
                continue;
            }
            let mut path = Vec::new();
            let mut cursor = start;
            let verdict = loop {
                if let Some(&v) = keep.get(cursor) {
                    break v;
                }
                if path.len() > self.blocks.len() {
                    break false;
                }
                path.push(cursor.clone());
                match self.blocks.get(cursor) {
                    Some(entry) => cursor = &entry.parent,
                    None => break false,
                }
            };
            for b in path {
                keep.insert(b, verdict);
            }
        }

        let mut evicted: Vec<(u64, BlockHash)> = self
            .blocks
            .iter()
            .filter(|(hash, _)| !keep.get(*hash).copied().unwrap_or(false))
            .map(|(hash, entry)| (entry.seen, hash.clone()))
            .collect();
        evicted.sort();
        let evicted: Vec<BlockHash> = evicted.into_iter().map(|(_, h)| h).collect();
        self.round += 1;
        for hash in &evicted {
            self.blocks.remove(hash);
            self.pruned.insert(hash.clone(), self.round);
        }
        let (round, horizon) = (self.round, self.tombstone_rounds);
        self.pruned.retain(|_, evicted_at| *evicted_at + horizon >= round);
        self.last_finalized = Some(finalized.clone());
        Ok(evicted)
    }
}
