// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Wire-level types a caller constructs to drive the engine: an [`Event`]
//! plus its [`EventContext`], and the small value types shared across
//! entities (§9: "canonicalize to a single `Hash = Option<[u8; 32]>` type at
//! the boundary; compare as bytes").

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// A 32-byte digest, normalized so the all-zero hash is represented as
/// `None` everywhere in the engine (§4.C "hash normalization").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Sha256Hash(pub Option<[u8; 32]>);

impl Sha256Hash {
    pub const ZERO: [u8; 32] = [0u8; 32];

    /// Normalizes a raw 32-byte value: all-zero becomes `None`.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        if bytes == Self::ZERO {
            Sha256Hash(None)
        } else {
            Sha256Hash(Some(bytes))
        }
    }

    pub fn is_absent(&self) -> bool {
        self.0.is_none()
    }

    pub fn as_bytes(&self) -> Option<&[u8; 32]> {
        self.0.as_ref()
    }
}

/// The default Solana-style all-zero public key, encoded base58. Wallet
/// fields carrying this value normalize to "absent" (§4.C `WalletUpdated`).
pub const DEFAULT_PUBKEY_BASE58: &str = "11111111111111111111111111111111";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerificationStatus {
    Pending,
    Finalized,
    Orphaned,
}

impl VerificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationStatus::Pending => "pending",
            VerificationStatus::Finalized => "finalized",
            VerificationStatus::Orphaned => "orphaned",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(VerificationStatus::Pending),
            "finalized" => Some(VerificationStatus::Finalized),
            "orphaned" => Some(VerificationStatus::Orphaned),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegistryType {
    Base,
    User,
}

impl RegistryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegistryType::Base => "base",
            RegistryType::User => "user",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventSource {
    Poller,
    Websocket,
}

impl Default for EventSource {
    fn default() -> Self {
        EventSource::Poller
    }
}

impl EventSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventSource::Poller => "poller",
            EventSource::Websocket => "websocket",
        }
    }
}

/// The transaction context a producer attaches to every decoded event.
///
/// `tx_index` is the transaction's position within its block; `None` sorts
/// after any present value in the deterministic ordering used for Agent and
/// Feedback rows (§6, §9 "same-block event ordering").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventContext {
    pub tx_signature: String,
    pub slot: u64,
    pub block_time: Option<i64>,
    pub tx_index: Option<u32>,
    pub source: EventSource,
}

impl EventContext {
    /// Total order key used to sort committed Agent/Feedback rows
    /// deterministically: `(slot ASC, tx_index ASC NULLS LAST, tx_signature ASC)`.
    pub fn sort_key(&self) -> (u64, Option<u32>, &str) {
        (self.slot, self.tx_index, self.tx_signature.as_str())
    }
}

/// Compares two deterministic sort keys per §6/§8: ascending slot, then
/// ascending `tx_index` with `None` sorting after any `Some`, then ascending
/// signature.
pub fn compare_sort_keys(
    a: (u64, Option<u32>, &str),
    b: (u64, Option<u32>, &str),
) -> Ordering {
    a.0.cmp(&b.0).then_with(|| match (a.1, b.1) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }).then_with(|| a.2.cmp(b.2))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    AgentRegisteredInRegistry {
        asset: String,
        owner: String,
        uri: String,
        collection: String,
        registry: String,
        atom_enabled: bool,
    },
    AgentOwnerSynced {
        asset: String,
        new_owner: String,
    },
    AtomEnabled {
        asset: String,
    },
    UriUpdated {
        asset: String,
        uri: String,
    },
    WalletUpdated {
        asset: String,
        wallet: String,
    },
    MetadataSet {
        asset: String,
        key: String,
        value: Vec<u8>,
        immutable: bool,
    },
    MetadataDeleted {
        asset: String,
        key: String,
    },
    BaseRegistryCreated {
        registry_id: String,
        collection: String,
        authority: String,
    },
    UserRegistryCreated {
        registry_id: String,
        collection: String,
        authority: String,
    },
    NewFeedback {
        asset: String,
        client: String,
        feedback_index: u64,
        value: String,
        value_decimals: i32,
        score: Option<i32>,
        tag1: Option<String>,
        tag2: Option<String>,
        endpoint: Option<String>,
        feedback_uri: Option<String>,
        seal_hash: [u8; 32],
        running_digest: Option<Vec<u8>>,
    },
    FeedbackRevoked {
        asset: String,
        client: String,
        feedback_index: u64,
        seal_hash: [u8; 32],
    },
    ResponseAppended {
        asset: String,
        client: String,
        feedback_index: u64,
        responder: String,
        response_uri: Option<String>,
        response_hash: [u8; 32],
        running_digest: Option<Vec<u8>>,
    },
    ValidationRequested {
        asset: String,
        validator: String,
        nonce: u64,
        request_uri: Option<String>,
    },
    ValidationResponded {
        asset: String,
        validator: String,
        nonce: u64,
        response_uri: Option<String>,
        response_code: Option<i32>,
    },
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::AgentRegisteredInRegistry { .. } => "AgentRegisteredInRegistry",
            EventKind::AgentOwnerSynced { .. } => "AgentOwnerSynced",
            EventKind::AtomEnabled { .. } => "AtomEnabled",
            EventKind::UriUpdated { .. } => "UriUpdated",
            EventKind::WalletUpdated { .. } => "WalletUpdated",
            EventKind::MetadataSet { .. } => "MetadataSet",
            EventKind::MetadataDeleted { .. } => "MetadataDeleted",
            EventKind::BaseRegistryCreated { .. } => "BaseRegistryCreated",
            EventKind::UserRegistryCreated { .. } => "UserRegistryCreated",
            EventKind::NewFeedback { .. } => "NewFeedback",
            EventKind::FeedbackRevoked { .. } => "FeedbackRevoked",
            EventKind::ResponseAppended { .. } => "ResponseAppended",
            EventKind::ValidationRequested { .. } => "ValidationRequested",
            EventKind::ValidationResponded { .. } => "ValidationResponded",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_hash_normalizes_to_absent() {
        assert!(Sha256Hash::from_bytes([0u8; 32]).is_absent());
    }

    #[test]
    fn nonzero_hash_round_trips() {
        let mut bytes = [0u8; 32];
        bytes[0] = 7;
        let h = Sha256Hash::from_bytes(bytes);
        assert_eq!(h.as_bytes(), Some(&bytes));
    }

    #[test]
    fn sort_key_none_tx_index_sorts_after_some() {
        let a = (100u64, Some(3u32), "sigA");
        let b = (100u64, None, "sigB");
        assert_eq!(compare_sort_keys(a, b), Ordering::Less);
    }

    #[test]
    fn sort_key_tx_index_zero_is_not_none() {
        let a = (100u64, Some(0u32), "sigA");
        let b = (100u64, None, "sigB");
        assert_eq!(compare_sort_keys(a, b), Ordering::Less);
        assert_ne!(a.1, None);
    }

    #[test]
    fn sort_key_orders_by_slot_first() {
        let a = (99u64, None, "zzz");
        let b = (100u64, Some(0), "aaa");
        assert_eq!(compare_sort_keys(a, b), Ordering::Less);
    }
}
