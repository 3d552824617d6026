//! Memoized chain queries.
//!
//! Block bodies and per-transaction outcomes never change for a given block, so each
//! `(block)` / `(block, tx)` query reaches the [ChainApi] at most once while the block is
//! retained. Results are dropped only when the block is evicted. Failed calls are not cached.
//! Debug builds also remember evicted blocks and panic on a query for one of them.

use crate::api::{ApiError, ChainApi};
use crate::types::{BlockHash, TxKey};
use std::collections::HashMap;
#[cfg(debug_assertions)]
use std::collections::HashSet;

#[derive(Debug, Default, Clone, Copy)]
struct Outcome {
    valid: Option<bool>,
    successful: Option<bool>,
}

pub struct QueryCache<C> {
    chain: C,
    bodies: HashMap<BlockHash, Vec<TxKey>>,
    outcomes: HashMap<BlockHash, HashMap<TxKey, Outcome>>,
    #[cfg(debug_assertions)]
    retired: HashSet<BlockHash>,
}

impl<C: ChainApi> QueryCache<C> {
    pub fn new(chain: C) -> Self {
        Self {
            chain,
            bodies: HashMap::new(),
            outcomes: HashMap::new(),
            #[cfg(debug_assertions)]
            retired: HashSet::new(),
        }
    }

    pub fn chain(&self) -> &C {
        &self.chain
    }

    #[cfg(debug_assertions)]
    fn assert_live(&self, block: &BlockHash) {
        assert!(
            !self.retired.contains(block),
            "chain query for evicted block {block}"
        );
    }

    #[cfg(not(debug_assertions))]
    fn assert_live(&self, _block: &BlockHash) {}

    pub async fn body_of(&mut self, block: &BlockHash) -> Result<Vec<TxKey>, ApiError> {
        self.assert_live(block);
        if let Some(body) = self.bodies.get(block) {
            return Ok(body.clone());
        }
        let body = self.chain.get_body(block).await?;
        tracing::debug!(block = %block, txs = body.len(), "fetched block body");
        self.bodies.insert(block.clone(), body.clone());
        Ok(body)
    }

    pub async fn is_successful(&mut self, block: &BlockHash, tx: &TxKey) -> Result<bool, ApiError> {
        self.assert_live(block);
        if let Some(v) = self.outcome(block, tx).successful {
            return Ok(v);
        }
        let v = self.chain.is_tx_successful(block, tx).await?;
        self.outcome_mut(block, tx).successful = Some(v);
        Ok(v)
    }

    pub async fn is_valid(&mut self, block: &BlockHash, tx: &TxKey) -> Result<bool, ApiError> {
        self.assert_live(block);
        if let Some(v) = self.outcome(block, tx).valid {
            return Ok(v);
        }
        let v = self.chain.is_tx_valid(block, tx).await?;
        self.outcome_mut(block, tx).valid = Some(v);
        Ok(v)
    }

    /// Drop everything cached for `blocks`; later queries for them are invariant violations.
    pub fn evict(&mut self, blocks: &[BlockHash]) {
        for block in blocks {
            self.bodies.remove(block);
            self.outcomes.remove(block);
            #[cfg(debug_assertions)]
            self.retired.insert(block.clone());
        }
    }

    /// Forget evicted blocks for which `still_pruned` is false; they may be queried again.
    pub fn retain_retired(&mut self, still_pruned: impl Fn(&BlockHash) -> bool) {
        #[cfg(debug_assertions)]
        self.retired.retain(|b| still_pruned(b));
        #[cfg(not(debug_assertions))]
        let _ = still_pruned;
    }

    /// Evicted blocks remembered for the stale-query check; always 0 in release builds.
    pub fn retired_len(&self) -> usize {
        #[cfg(debug_assertions)]
        let len = self.retired.len();
        #[cfg(not(debug_assertions))]
        let len = 0;
        len
    }

    pub fn cached_blocks(&self) -> usize {
        self.bodies.len()
    }

    fn outcome(&self, block: &BlockHash, tx: &TxKey) -> Outcome {
        self.outcomes
            .get(block)
            .and_then(|m| m.get(tx))
            .copied()
            .unwrap_or_default()
    }

    fn outcome_mut(&mut self, block: &BlockHash, tx: &TxKey) -> &mut Outcome {
        self.outcomes
            .entry(block.clone())
            .or_default()
            .entry(tx.clone())
            .or_default()
    }
}
