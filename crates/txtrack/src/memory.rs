//! In-memory chain and notification recorder.
//!
//! [MemoryChain] answers chain queries from a [ChainFixture] and counts every call, so hosts
//! can replay recorded scenarios and tests can check that queries are not repeated.
//! [Recorder] keeps the notifications it receives in order.

use crate::api::{ApiError, ChainApi, OutputApi};
use crate::types::{BlockHash, TxKey};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// Chain data for one block.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BlockFixture {
    #[serde(default)]
    pub body: Vec<TxKey>,
    /// Body entries that executed successfully.
    #[serde(default)]
    pub successful: Vec<TxKey>,
    /// Body entries that fail validity screening.
    #[serde(default)]
    pub invalid: Vec<TxKey>,
}

/// `{"blocks": {"<hash>": {"body": [...], "successful": [...], "invalid": [...]}}}`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChainFixture {
    #[serde(default)]
    pub blocks: BTreeMap<BlockHash, BlockFixture>,
}

impl ChainFixture {
    pub fn from_json(s: &str) -> Result<Self> {
        serde_json::from_str(s).context("parse chain fixture")
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read fixture {}", path.display()))?;
        Self::from_json(&text)
    }

    /// Add a block; `successful` entries are also appended to the body.
    pub fn with_block(mut self, hash: &str, body: &[&str], successful: &[&str]) -> Self {
        let mut block = BlockFixture {
            body: body.iter().map(|t| TxKey::from(*t)).collect(),
            successful: successful.iter().map(|t| TxKey::from(*t)).collect(),
            invalid: Vec::new(),
        };
        for tx in &block.successful {
            if !block.body.contains(tx) {
                block.body.push(tx.clone());
            }
        }
        self.blocks.insert(BlockHash::from(hash), block);
        self
    }
}

/// Per-method call totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub get_body: usize,
    pub is_tx_valid: usize,
    pub is_tx_successful: usize,
    pub unpin: usize,
}

#[derive(Debug, Default)]
struct CallLog {
    counts: CallCounts,
    body_calls: HashMap<BlockHash, usize>,
    success_calls: HashMap<(BlockHash, TxKey), usize>,
    valid_calls: HashMap<(BlockHash, TxKey), usize>,
    unpinned: Vec<Vec<BlockHash>>,
}

/// Fixture-backed [ChainApi]. Clones share the call log.
#[derive(Debug, Clone)]
pub struct MemoryChain {
    fixture: Arc<ChainFixture>,
    log: Arc<Mutex<CallLog>>,
}

impl MemoryChain {
    pub fn new(fixture: ChainFixture) -> Self {
        Self {
            fixture: Arc::new(fixture),
            log: Arc::new(Mutex::new(CallLog::default())),
        }
    }

    fn log(&self) -> MutexGuard<'_, CallLog> {
        // A poisoned log only means another caller panicked mid-update; counts are still usable.
        self.log.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn block(&self, block: &BlockHash) -> Result<&BlockFixture, ApiError> {
        self.fixture
            .blocks
            .get(block)
            .ok_or_else(|| ApiError::UnknownBlock(block.clone()))
    }

    pub fn calls(&self) -> CallCounts {
        self.log().counts
    }

    pub fn body_calls(&self, block: &BlockHash) -> usize {
        self.log().body_calls.get(block).copied().unwrap_or(0)
    }

    pub fn success_calls(&self, block: &BlockHash, tx: &TxKey) -> usize {
        self.log()
            .success_calls
            .get(&(block.clone(), tx.clone()))
            .copied()
            .unwrap_or(0)
    }

    /// Largest number of calls made for any single `(block[, tx])` key.
    pub fn max_repeat(&self) -> usize {
        let log = self.log();
        log.body_calls
            .values()
            .chain(log.success_calls.values())
            .chain(log.valid_calls.values())
            .copied()
            .max()
            .unwrap_or(0)
    }

    /// Every `unpin` batch, in call order.
    pub fn unpinned(&self) -> Vec<Vec<BlockHash>> {
        self.log().unpinned.clone()
    }
}

impl ChainApi for MemoryChain {
    async fn get_body(&self, block: &BlockHash) -> Result<Vec<TxKey>, ApiError> {
        {
            let mut log = self.log();
            log.counts.get_body += 1;
            *log.body_calls.entry(block.clone()).or_default() += 1;
        }
        Ok(self.block(block)?.body.clone())
    }

    async fn is_tx_valid(&self, block: &BlockHash, tx: &TxKey) -> Result<bool, ApiError> {
        {
            let mut log = self.log();
            log.counts.is_tx_valid += 1;
            *log.valid_calls.entry((block.clone(), tx.clone())).or_default() += 1;
        }
        let b = self.block(block)?;
        Ok(b.body.contains(tx) && !b.invalid.contains(tx))
    }

    async fn is_tx_successful(&self, block: &BlockHash, tx: &TxKey) -> Result<bool, ApiError> {
        {
            let mut log = self.log();
            log.counts.is_tx_successful += 1;
            *log
                .success_calls
                .entry((block.clone(), tx.clone()))
                .or_default() += 1;
        }
        Ok(self.block(block)?.successful.contains(tx))
    }

    async fn unpin(&self, blocks: &[BlockHash]) -> Result<(), ApiError> {
        let mut log = self.log();
        log.counts.unpin += 1;
        log.unpinned.push(blocks.to_vec());
        Ok(())
    }
}

/// One emitted notification. Serializes as `{"settled":{...}}` or `{"done":{...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Notification {
    #[serde(rename_all = "camelCase")]
    Settled { block_hash: BlockHash, tx: TxKey },
    Done { tx: TxKey },
}

/// [OutputApi] that records notifications. Clones share the record.
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    seen: Arc<Mutex<Vec<Notification>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    fn seen(&self) -> MutexGuard<'_, Vec<Notification>> {
        self.seen.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.seen().clone()
    }

    /// Remove and return everything recorded so far.
    pub fn take(&self) -> Vec<Notification> {
        std::mem::take(&mut *self.seen())
    }
}

impl OutputApi for Recorder {
    fn on_tx_settled(&mut self, block: &BlockHash, tx: &TxKey) {
        self.seen().push(Notification::Settled {
            block_hash: block.clone(),
            tx: tx.clone(),
        });
    }

    fn on_tx_done(&mut self, tx: &TxKey) {
        self.seen().push(Notification::Done { tx: tx.clone() });
    }
}
