//! Engine configuration.

use crate::chain::DEFAULT_TOMBSTONE_ROUNDS;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Call `unpin` for blocks evicted on finalization.
    pub release_blocks: bool,
    /// Check `is_tx_valid` before `is_tx_successful`; invalid transactions are never settled.
    pub screen_validity: bool,
    /// Finalization rounds an evicted block is remembered, so a replayed `newBlock` for it
    /// is ignored instead of queried again.
    pub tombstone_rounds: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            release_blocks: true,
            screen_validity: false,
            tombstone_rounds: DEFAULT_TOMBSTONE_ROUNDS,
        }
    }
}
