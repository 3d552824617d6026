//! Transaction ledger: arrival order and lifecycle state of every observed transaction.

use crate::types::{BlockHash, TxKey};
use std::collections::{BTreeSet, HashMap};

/// Lifecycle state. Transitions only move forward: Pending -> Settled -> Done.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxState {
    Pending,
    Settled(BlockHash),
    Done(BlockHash),
}

#[derive(Debug, Clone)]
struct TxRecord {
    arrival_seq: u64,
    state: TxState,
}

/// In-memory ledger. Transaction records are never removed; the per-block settled index
/// is dropped for blocks the chain index evicts.
#[derive(Debug, Default)]
pub struct TxLedger {
    txs: HashMap<TxKey, TxRecord>,
    /// Settled (not yet done) transactions per block, by arrival sequence.
    by_block: HashMap<BlockHash, BTreeSet<(u64, TxKey)>>,
    next_seq: u64,
}

impl TxLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign an arrival sequence to `tx` on first sight; returns the (stable) sequence.
    pub fn record_arrival(&mut self, tx: &TxKey) -> u64 {
        if let Some(rec) = self.txs.get(tx) {
            return rec.arrival_seq;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.txs.insert(
            tx.clone(),
            TxRecord {
                arrival_seq: seq,
                state: TxState::Pending,
            },
        );
        seq
    }

    /// Pending -> Settled. Returns true iff the transition happened (a notification is owed).
    /// Unknown transactions are recorded first.
    pub fn mark_settled(&mut self, tx: &TxKey, block: &BlockHash) -> bool {
        let seq = self.record_arrival(tx);
        let Some(rec) = self.txs.get_mut(tx) else {
            return false;
        };
        if rec.state != TxState::Pending {
            return false;
        }
        rec.state = TxState::Settled(block.clone());
        self.by_block
            .entry(block.clone())
            .or_default()
            .insert((seq, tx.clone()));
        true
    }

    /// Settled -> Done. Returns true iff the transition happened.
    pub fn mark_done(&mut self, tx: &TxKey) -> bool {
        let Some(rec) = self.txs.get_mut(tx) else {
            return false;
        };
        let TxState::Settled(block) = &rec.state else {
            return false;
        };
        let block = block.clone();
        if let Some(set) = self.by_block.get_mut(&block) {
            set.remove(&(rec.arrival_seq, tx.clone()));
            if set.is_empty() {
                self.by_block.remove(&block);
            }
        }
        rec.state = TxState::Done(block);
        true
    }

    /// Transactions currently Settled in `block`, in arrival order.
    pub fn settled_in(&self, block: &BlockHash) -> Vec<TxKey> {
        self.by_block
            .get(block)
            .map(|set| set.iter().map(|(_, tx)| tx.clone()).collect())
            .unwrap_or_default()
    }

    /// Drop the settled index for evicted blocks. Their transactions keep their state.
    pub fn forget_blocks(&mut self, blocks: &[BlockHash]) {
        for block in blocks {
            self.by_block.remove(block);
        }
    }

    /// Blocks with at least one transaction still Settled in them.
    pub fn settled_blocks(&self) -> usize {
        self.by_block.len()
    }

    pub fn state_of(&self, tx: &TxKey) -> Option<&TxState> {
        self.txs.get(tx).map(|r| &r.state)
    }

    pub fn arrival_seq(&self, tx: &TxKey) -> Option<u64> {
        self.txs.get(tx).map(|r| r.arrival_seq)
    }

    /// Sort by arrival sequence; unknown keys go last.
    pub fn sort_by_arrival(&self, txs: &mut [TxKey]) {
        txs.sort_by_key(|tx| self.arrival_seq(tx).unwrap_or(u64::MAX));
    }

    pub fn len(&self) -> usize {
        self.txs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.txs.is_empty()
    }
}
