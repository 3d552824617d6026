//! Identifiers and inbound events.
//!
//! Block hashes and transaction keys are opaque strings as delivered by the event source.
//! Events use the JSON shape `{"type": "newBlock" | "newTransaction" | "finalized", ...}`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque block identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockHash(pub String);

impl BlockHash {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BlockHash {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Opaque transaction key, as derived by the submitter from content and signer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxKey(pub String);

impl TxKey {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TxKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TxKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// One event from the chain subscription. Unknown `type` tags fail to deserialize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum IncomingEvent {
    #[serde(rename_all = "camelCase")]
    NewBlock { block_hash: BlockHash, parent: BlockHash },
    NewTransaction { value: TxKey },
    #[serde(rename_all = "camelCase")]
    Finalized { block_hash: BlockHash },
}

impl IncomingEvent {
    /// Parse one event from its JSON form.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            IncomingEvent::NewBlock { .. } => "newBlock",
            IncomingEvent::NewTransaction { .. } => "newTransaction",
            IncomingEvent::Finalized { .. } => "finalized",
        }
    }
}
