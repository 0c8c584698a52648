// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::types::VerificationStatus;

/// §3 "AgentMetadata", identified by `(agent_id, key)`.
///
/// `value` is tag-prefixed per §6: `0x00` = raw, `0x01` = zstd. Use
/// [`crate::valuefmt::encode`] / [`crate::valuefmt::decode`] to round-trip it.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentMetadata {
    pub agent_id: String,
    pub key: String,
    pub value: Vec<u8>,
    pub immutable: bool,
    pub slot: u64,
    pub tx_signature: String,
    pub status: VerificationStatus,
}

/// Prefix reserved for URI-digest-derived rows (§3). User `MetadataSet`
/// events targeting a key with this prefix are rejected.
pub const URI_KEY_PREFIX: &str = "_uri:";

pub fn is_reserved_key(key: &str) -> bool {
    key.starts_with(URI_KEY_PREFIX)
}
