// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::types::VerificationStatus;

/// An on-chain agent, identified by its 32-byte asset key (base58-encoded
/// at the store boundary). See §3 "Agent".
#[derive(Debug, Clone, PartialEq)]
pub struct Agent {
    pub asset: String,
    pub owner: String,
    pub uri: String,
    pub wallet: Option<String>,
    pub collection: String,
    pub registry: String,
    pub atom_enabled: bool,
    pub nft_name: Option<String>,
    pub status: VerificationStatus,
    pub created_slot: u64,
    pub created_tx_signature: String,
    pub tx_index: Option<u32>,
    pub verified_at: Option<i64>,
    pub verified_slot: Option<u64>,
    pub updated_at: i64,
}

/// Fields written only on first insert (`AgentRegisteredInRegistry` create
/// path, §4.C).
#[derive(Debug, Clone)]
pub struct AgentCreate {
    pub asset: String,
    pub owner: String,
    pub uri: String,
    pub collection: String,
    pub registry: String,
    pub atom_enabled: bool,
    pub created_slot: u64,
    pub created_tx_signature: String,
    pub tx_index: Option<u32>,
    pub updated_at: i64,
}

/// Fields refreshed even on an upsert hit: `collection`, `registry`,
/// `atom_enabled`, `uri` (§4.A `upsert_agent`).
#[derive(Debug, Clone)]
pub struct AgentPatch {
    pub owner: Option<String>,
    pub uri: Option<String>,
    pub wallet: Option<Option<String>>,
    pub collection: Option<String>,
    pub registry: Option<String>,
    pub atom_enabled: Option<bool>,
    pub nft_name: Option<String>,
    pub updated_at: i64,
}

impl AgentPatch {
    pub fn empty(updated_at: i64) -> Self {
        AgentPatch {
            owner: None,
            uri: None,
            wallet: None,
            collection: None,
            registry: None,
            atom_enabled: None,
            nft_name: None,
            updated_at,
        }
    }
}
