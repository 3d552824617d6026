//! Common helpers for integration tests.
//! Some helpers are only used by specific test binaries; allow dead_code to avoid per-binary warnings.
#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use txtrack::{
    ApiError, BlockHash, ChainApi, ChainFixture, Engine, EngineBuilder, IncomingEvent,
    MemoryChain, Notification, Recorder, TxKey,
};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("txtrack=debug".parse().unwrap()))
        .with_test_writer()
        .try_init();
}

/// Path to a file under tests/fixtures.
pub fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

pub fn new_tx(tx: &str) -> IncomingEvent {
    IncomingEvent::NewTransaction { value: tx.into() }
}

pub fn new_block(block: &str, parent: &str) -> IncomingEvent {
    IncomingEvent::NewBlock {
        block_hash: block.into(),
        parent: parent.into(),
    }
}

pub fn finalized(block: &str) -> IncomingEvent {
    IncomingEvent::Finalized {
        block_hash: block.into(),
    }
}

pub fn settled(block: &str, tx: &str) -> Notification {
    Notification::Settled {
        block_hash: block.into(),
        tx: tx.into(),
    }
}

pub fn done(tx: &str) -> Notification {
    Notification::Done { tx: tx.into() }
}

pub fn hashes(blocks: &[&str]) -> Vec<BlockHash> {
    blocks.iter().map(|b| BlockHash::from(*b)).collect()
}

/// Engine over a fixture chain, plus shared handles to the chain's call log and the recorder.
pub fn engine_for(fixture: ChainFixture) -> (Engine<MemoryChain, Recorder>, MemoryChain, Recorder) {
    let chain = MemoryChain::new(fixture);
    let recorder = Recorder::new();
    let engine = EngineBuilder::new()
        .chain(chain.clone())
        .output(recorder.clone())
        .build()
        .expect("engine build");
    (engine, chain, recorder)
}

pub async fn feed(engine: &mut Engine<MemoryChain, Recorder>, events: Vec<IncomingEvent>) {
    for ev in events {
        engine.handle(ev).await.expect("handle event");
    }
}

/// Checks the per-transaction notification rules over a whole run: at most one settled and
/// one done per transaction, and never done before settled.
pub fn assert_lifecycle_sane(notes: &[Notification]) {
    use std::collections::HashSet;
    let mut settled: HashSet<TxKey> = HashSet::new();
    let mut done: HashSet<TxKey> = HashSet::new();
    for n in notes {
        match n {
            Notification::Settled { tx, .. } => {
                assert!(settled.insert(tx.clone()), "settled twice: {}", tx);
            }
            Notification::Done { tx } => {
                assert!(settled.contains(tx), "done before settled: {}", tx);
                assert!(done.insert(tx.clone()), "done twice: {}", tx);
            }
        }
    }
}

/// Fails the first `failures` success queries (and optionally the first unpin calls),
/// then delegates.
#[derive(Clone)]
pub struct FlakyChain {
    pub inner: MemoryChain,
    remaining: Arc<AtomicUsize>,
    unpin_remaining: Arc<AtomicUsize>,
}

impl FlakyChain {
    pub fn new(inner: MemoryChain, failures: usize) -> Self {
        Self {
            inner,
            remaining: Arc::new(AtomicUsize::new(failures)),
            unpin_remaining: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_unpin_failures(self, failures: usize) -> Self {
        self.unpin_remaining.store(failures, Ordering::SeqCst);
        self
    }
}

fn take_failure(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

impl ChainApi for FlakyChain {
    async fn get_body(&self, block: &BlockHash) -> Result<Vec<TxKey>, ApiError> {
        self.inner.get_body(block).await
    }

    async fn is_tx_valid(&self, block: &BlockHash, tx: &TxKey) -> Result<bool, ApiError> {
        self.inner.is_tx_valid(block, tx).await
    }

    async fn is_tx_successful(&self, block: &BlockHash, tx: &TxKey) -> Result<bool, ApiError> {
        if take_failure(&self.remaining) {
            return Err(ApiError::Rpc("transient".into()));
        }
        self.inner.is_tx_successful(block, tx).await
    }

    async fn unpin(&self, blocks: &[BlockHash]) -> Result<(), ApiError> {
        if take_failure(&self.unpin_remaining) {
            return Err(ApiError::Rpc("unpin unavailable".into()));
        }
        self.inner.unpin(blocks).await
    }
}
