//! Lifecycle engine: turns chain events into ordered settlement and completion notifications.
//!
//! Consumes [IncomingEvent]s one at a time. `newBlock` settles the transactions that succeeded
//! in the block; `finalized` completes every transaction settled in the newly-final range
//! (reconstructed from parent links, since announcements may skip blocks) and releases blocks
//! that can no longer matter. Within one event, notifications follow transaction arrival order.
//! Build with [EngineBuilder].

use crate::api::{ApiError, ChainApi, OutputApi};
use crate::cache::QueryCache;
use crate::chain::{ChainError, ChainIndex, Observed};
use crate::config::EngineConfig;
use crate::ledger::{TxLedger, TxState};
use crate::types::{BlockHash, IncomingEvent, TxKey};
use futures_util::{Stream, StreamExt};
use std::collections::BTreeSet;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("chain query failed: {0}")]
    Api(#[from] ApiError),
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error("build error: {0}")]
    Build(String),
}

/// Running totals since the engine was built.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub events: u64,
    pub settled: u64,
    pub done: u64,
    pub unpinned: u64,
}

/// Builder for the engine.
pub struct EngineBuilder<C, O> {
    chain: Option<C>,
    output: Option<O>,
    config: EngineConfig,
}

impl<C: ChainApi, O: OutputApi> EngineBuilder<C, O> {
    pub fn new() -> Self {
        Self {
            chain: None,
            output: None,
            config: EngineConfig::default(),
        }
    }

    pub fn chain(mut self, chain: C) -> Self {
        self.chain = Some(chain);
        self
    }

    pub fn output(mut self, output: O) -> Self {
        self.output = Some(output);
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Convenience: toggles [EngineConfig::release_blocks].
    pub fn release_blocks(mut self, on: bool) -> Self {
        self.config.release_blocks = on;
        self
    }

    /// Convenience: toggles [EngineConfig::screen_validity].
    pub fn screen_validity(mut self, on: bool) -> Self {
        self.config.screen_validity = on;
        self
    }

    pub fn build(self) -> Result<Engine<C, O>, EngineError> {
        let chain = self
            .chain
            .ok_or_else(|| EngineError::Build("chain api required".into()))?;
        let output = self
            .output
            .ok_or_else(|| EngineError::Build("output api required".into()))?;
        Ok(Engine {
            index: ChainIndex::with_tombstone_rounds(self.config.tombstone_rounds),
            config: self.config,
            cache: QueryCache::new(chain),
            ledger: TxLedger::new(),
            output,
            pending_unpin: Vec::new(),
            stats: EngineStats::default(),
        })
    }
}

impl<C: ChainApi, O: OutputApi> Default for EngineBuilder<C, O> {
    fn default() -> Self {
        Self::new()
    }
}

/// Owns all tracking state for one chain subscription.
pub struct Engine<C, O> {
    config: EngineConfig,
    cache: QueryCache<C>,
    index: ChainIndex,
    ledger: TxLedger,
    output: O,
    /// Evicted blocks whose `unpin` has not succeeded yet.
    pending_unpin: Vec<BlockHash>,
    stats: EngineStats,
}

impl<C: ChainApi, O: OutputApi> Engine<C, O> {
    /// Handle one event to completion. Chain query failures are returned as-is and no retry
    /// is attempted; a `newBlock` that failed leaves no trace and can be handled again.
    pub async fn handle(&mut self, event: IncomingEvent) -> Result<(), EngineError> {
        self.stats.events += 1;
        match event {
            IncomingEvent::NewTransaction { value } => {
                let seq = self.ledger.record_arrival(&value);
                tracing::debug!(tx = %value, seq, "transaction arrived");
                Ok(())
            }
            IncomingEvent::NewBlock { block_hash, parent } => {
                self.on_new_block(&block_hash, &parent).await
            }
            IncomingEvent::Finalized { block_hash } => self.on_finalized(&block_hash).await,
        }
    }

    /// Consume `events` strictly in order, stopping at the first error.
    pub async fn run<S>(&mut self, events: S) -> Result<(), EngineError>
    where
        S: Stream<Item = IncomingEvent>,
    {
        futures_util::pin_mut!(events);
        while let Some(event) = events.next().await {
            let kind = event.kind();
            if let Err(e) = self.handle(event).await {
                tracing::warn!(reason = %e, kind, "event handling failed");
                return Err(e);
            }
        }
        Ok(())
    }

    async fn on_new_block(&mut self, block: &BlockHash, parent: &BlockHash) -> Result<(), EngineError> {
        if self.index.contains(block) {
            tracing::debug!(block = %block, "block already processed, ignoring");
            return Ok(());
        }
        if self.index.is_pruned(block) {
            tracing::debug!(block = %block, "block already pruned, ignoring");
            return Ok(());
        }

        // Query everything first so a failed call leaves no half-applied block behind;
        // a retry of the same event is answered from the cache.
        let body = self.cache.body_of(block).await?;
        let mut successful: Vec<&TxKey> = Vec::new();
        for tx in &body {
            if self.config.screen_validity && !self.cache.is_valid(block, tx).await? {
                tracing::debug!(block = %block, tx = %tx, "transaction invalid in block");
                continue;
            }
            if self.cache.is_successful(block, tx).await? {
                successful.push(tx);
            }
        }

        let observed = self.index.observe(block, parent);
        debug_assert_eq!(observed, Observed::New);
        for tx in &body {
            self.ledger.record_arrival(tx);
        }
        let mut owed: Vec<TxKey> = Vec::new();
        for tx in successful {
            if self.ledger.mark_settled(tx, block) {
                owed.push(tx.clone());
            } else {
                tracing::debug!(block = %block, tx = %tx, "duplicate settlement ignored");
            }
        }

        self.ledger.sort_by_arrival(&mut owed);
        for tx in &owed {
            self.output.on_tx_settled(block, tx);
        }
        self.stats.settled += owed.len() as u64;
        tracing::debug!(block = %block, parent = %parent, txs = body.len(), settled = owed.len(), "new block");
        Ok(())
    }

    async fn on_finalized(&mut self, block: &BlockHash) -> Result<(), EngineError> {
        // A batch left over from a failed unpin goes out before anything else changes.
        self.flush_unpin().await?;
        if !self.index.contains(block) {
            return Err(ChainError::UnknownBlock(block.clone()).into());
        }
        let range = match self.index.last_finalized() {
            Some(previous) if previous == block => {
                tracing::debug!(block = %block, "already finalized");
                return Ok(());
            }
            Some(previous) => match self.index.ancestors_between(block, previous) {
                Ok(range) => range,
                Err(ChainError::UnknownAncestry { from, to }) => {
                    tracing::warn!(
                        from = %from,
                        to = %to,
                        "finalized block does not descend from previous finalized block; finalizing it alone"
                    );
                    vec![block.clone()]
                }
                Err(e) => return Err(e.into()),
            },
            None => vec![block.clone()],
        };

        let mut done: BTreeSet<(u64, TxKey)> = BTreeSet::new();
        for b in &range {
            for tx in self.ledger.settled_in(b) {
                if let Some(seq) = self.ledger.arrival_seq(&tx) {
                    done.insert((seq, tx));
                }
            }
        }
        let mut completed = 0u64;
        for (_, tx) in &done {
            if self.ledger.mark_done(tx) {
                self.output.on_tx_done(tx);
                completed += 1;
            }
        }
        self.stats.done += completed;

        let evicted = self.index.advance_finalized(block)?;
        self.cache.evict(&evicted);
        let index = &self.index;
        self.cache.retain_retired(|b| index.is_pruned(b));
        self.ledger.forget_blocks(&evicted);
        tracing::info!(
            block = %block,
            range = range.len(),
            done = completed,
            evicted = evicted.len(),
            "finalized"
        );
        if self.config.release_blocks {
            self.pending_unpin.extend(evicted);
        }
        self.flush_unpin().await
    }

    /// Send the pending unpin batch. On failure the batch is kept for the next `finalized`.
    async fn flush_unpin(&mut self) -> Result<(), EngineError> {
        if self.pending_unpin.is_empty() {
            return Ok(());
        }
        if let Err(e) = self.cache.chain().unpin(&self.pending_unpin).await {
            tracing::warn!(reason = %e, blocks = self.pending_unpin.len(), "unpin failed, batch kept");
            return Err(e.into());
        }
        tracing::info!(blocks = self.pending_unpin.len(), "unpinned");
        self.stats.unpinned += self.pending_unpin.len() as u64;
        self.pending_unpin.clear();
        Ok(())
    }

    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Lifecycle state of `tx`, if it has been observed.
    pub fn tx_state(&self, tx: &TxKey) -> Option<&TxState> {
        self.ledger.state_of(tx)
    }

    pub fn last_finalized(&self) -> Option<&BlockHash> {
        self.index.last_finalized()
    }

    /// Number of blocks currently retained.
    pub fn tracked_blocks(&self) -> usize {
        self.index.len()
    }

    /// Evicted blocks still waiting for a successful `unpin`.
    pub fn pending_unpin(&self) -> &[BlockHash] {
        &self.pending_unpin
    }

    pub fn output(&self) -> &O {
        &self.output
    }

    pub fn chain(&self) -> &C {
        self.cache.chain()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{ChainFixture, MemoryChain, Notification, Recorder};

    fn nb(b: &str, p: &str) -> IncomingEvent {
        IncomingEvent::NewBlock {
            block_hash: b.into(),
            parent: p.into(),
        }
    }

    fn engine(fixture: ChainFixture) -> (Engine<MemoryChain, Recorder>, MemoryChain, Recorder) {
        let chain = MemoryChain::new(fixture);
        let rec = Recorder::new();
        let engine = EngineBuilder::new()
            .chain(chain.clone())
            .output(rec.clone())
            .build()
            .unwrap();
        (engine, chain, rec)
    }

    #[test]
    fn build_requires_collaborators() {
        let err = EngineBuilder::<MemoryChain, Recorder>::new()
            .output(Recorder::new())
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, EngineError::Build(_)));
    }

    #[tokio::test]
    async fn replayed_block_is_not_requeried() {
        let (mut e, chain, rec) = engine(ChainFixture::default().with_block("b1", &[], &["t1"]));
        e.handle(nb("b1", "g")).await.unwrap();
        e.handle(nb("b1", "g")).await.unwrap();
        assert_eq!(chain.calls().get_body, 1);
        assert_eq!(rec.notifications().len(), 1);
        assert_eq!(e.stats().events, 2);
        assert_eq!(e.stats().settled, 1);
    }

    #[tokio::test]
    async fn finalizing_unknown_block_is_an_error() {
        let (mut e, _, rec) = engine(ChainFixture::default());
        let err = e
            .handle(IncomingEvent::Finalized {
                block_hash: "b7".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Chain(ChainError::UnknownBlock(_))));
        assert!(rec.notifications().is_empty());
        assert_eq!(e.last_finalized(), None);
    }

    #[tokio::test]
    async fn repeated_finalized_is_noop() {
        let (mut e, chain, rec) = engine(ChainFixture::default().with_block("b1", &[], &["t1"]));
        e.handle(nb("b1", "g")).await.unwrap();
        let fin = IncomingEvent::Finalized {
            block_hash: "b1".into(),
        };
        e.handle(fin.clone()).await.unwrap();
        e.handle(fin).await.unwrap();
        assert_eq!(
            rec.notifications(),
            vec![
                Notification::Settled {
                    block_hash: "b1".into(),
                    tx: "t1".into()
                },
                Notification::Done { tx: "t1".into() },
            ]
        );
        assert!(chain.unpinned().is_empty());
    }

    #[tokio::test]
    async fn long_run_keeps_bookkeeping_bounded() {
        let mut fixture = ChainFixture::default();
        for i in 0..300 {
            let tx = format!("t{i}");
            fixture = fixture
                .with_block(&format!("b{i}"), &[], &[tx.as_str()])
                .with_block(&format!("f{i}"), &[], &[tx.as_str()]);
        }
        let (mut e, chain, rec) = engine(fixture);
        let mut parent = "g".to_string();
        for i in 0..300 {
            let (b, f) = (format!("b{i}"), format!("f{i}"));
            // The fork sibling settles the transaction first and is then abandoned.
            e.handle(nb(&f, &parent)).await.unwrap();
            e.handle(nb(&b, &parent)).await.unwrap();
            e.handle(IncomingEvent::Finalized { block_hash: b.as_str().into() })
                .await
                .unwrap();
            parent = b;
        }
        let horizon = e.config().tombstone_rounds as usize;
        assert_eq!(e.tracked_blocks(), 1);
        assert!(e.index.tombstones() <= 2 * (horizon + 1));
        assert!(e.cache.retired_len() <= e.index.tombstones());
        assert_eq!(e.cache.cached_blocks(), 1);
        assert_eq!(e.ledger.settled_blocks(), 0);
        assert_eq!(rec.notifications().len(), 300);
        assert_eq!(chain.max_repeat(), 1);
    }

    #[tokio::test]
    async fn api_error_surfaces() {
        let (mut e, _, rec) = engine(ChainFixture::default());
        let err = e.handle(nb("missing", "g")).await.unwrap_err();
        assert!(matches!(err, EngineError::Api(ApiError::UnknownBlock(_))));
        assert!(rec.notifications().is_empty());
    }
}
