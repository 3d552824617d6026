//! Collaborator seams: the chain-query interface consumed by the engine and the
//! notification sink it reports to.

use crate::types::{BlockHash, TxKey};
use std::future::Future;
use thiserror::Error;

/// Failure reported by a [ChainApi] implementation.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("RPC error: {0}")]
    Rpc(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("unknown block: {0}")]
    UnknownBlock(BlockHash),
}

/// Low-level chain queries and block retention control.
///
/// Reads are side-effect free: a given block's body and per-transaction outcomes never
/// change once the block exists, so callers may cache them.
pub trait ChainApi: Send + Sync {
    /// Ordered transaction keys included in `block`.
    fn get_body(
        &self,
        block: &BlockHash,
    ) -> impl Future<Output = Result<Vec<TxKey>, ApiError>> + Send;

    /// Whether `tx` is valid in the context of `block`.
    fn is_tx_valid(
        &self,
        block: &BlockHash,
        tx: &TxKey,
    ) -> impl Future<Output = Result<bool, ApiError>> + Send;

    /// Whether `tx` executed successfully in `block`. Success implies validity.
    fn is_tx_successful(
        &self,
        block: &BlockHash,
        tx: &TxKey,
    ) -> impl Future<Output = Result<bool, ApiError>> + Send;

    /// Release retention of blocks the caller no longer needs.
    fn unpin(&self, blocks: &[BlockHash]) -> impl Future<Output = Result<(), ApiError>> + Send;
}

/// Receives lifecycle notifications, each at most once per transaction.
pub trait OutputApi {
    /// `tx` was included successfully in `block`.
    fn on_tx_settled(&mut self, block: &BlockHash, tx: &TxKey);

    /// The block `tx` settled in is now final.
    fn on_tx_done(&mut self, tx: &TxKey);
}

impl<O: OutputApi + ?Sized> OutputApi for Box<O> {
    fn on_tx_settled(&mut self, block: &BlockHash, tx: &TxKey) {
        (**self).on_tx_settled(block, tx)
    }

    fn on_tx_done(&mut self, tx: &TxKey) {
        (**self).on_tx_done(tx)
    }
}
