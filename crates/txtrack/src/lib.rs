//! Transaction lifecycle tracking over a forking chain.
//!
//! - **Engine**: consumes `newTransaction` / `newBlock` / `finalized` events and reports each
//!   transaction exactly once when it settles (succeeds in a block) and once when that block
//!   becomes final, in transaction arrival order. Finalization announcements may skip blocks;
//!   the skipped range is rebuilt from parent links.
//! - **ChainIndex**: unfinalized block tree; evicts abandoned forks and superseded ancestors
//!   on finalization so the chain can unpin them.
//! - **QueryCache**: one chain query per `(block[, tx])` while the block is retained.
//! - **TxLedger**: arrival order and Pending/Settled/Done state per transaction.
//!
//! Chain access goes through [ChainApi] ([RpcChain] over JSON-RPC, [MemoryChain] from a
//! fixture); notifications go to an [OutputApi].

pub mod api;
pub mod cache;
pub mod chain;
pub mod config;
pub mod engine;
pub mod ledger;
pub mod memory;
pub mod rpc;
pub mod types;

pub use api::{ApiError, ChainApi, OutputApi};
pub use cache::QueryCache;
pub use chain::{ChainError, ChainIndex, Observed};
pub use config::EngineConfig;
pub use engine::{Engine, EngineBuilder, EngineError, EngineStats};
pub use ledger::{TxLedger, TxState};
pub use memory::{BlockFixture, CallCounts, ChainFixture, MemoryChain, Notification, Recorder};
pub use rpc::{RpcChain, RpcConfig};
pub use types::{BlockHash, IncomingEvent, TxKey};
