// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! AgentMetadata handlers (§4.C): `MetadataSet`, `MetadataDeleted`.

use super::HandlerOutcome;
use crate::errors::Result;
use crate::models::metadata::is_reserved_key;
use crate::store::StoreTx;
use crate::types::EventContext;
use crate::valuefmt;

/// Rejects `_uri:`-prefixed keys (reserved for the URI Digest Queue),
/// strips embedded NUL bytes, then stores with the raw (`0x00`) tag.
/// Immutability is enforced inside the store (§4.A `upsert_metadata`: "read
/// the current `immutable` flag inside the transaction").
pub async fn handle_set(
    tx: &mut (dyn StoreTx + Send),
    ctx: &EventContext,
    asset: &str,
    key: &str,
    value: &[u8],
    immutable: bool,
) -> Result<HandlerOutcome> {
    if is_reserved_key(key) {
        return Ok(HandlerOutcome::warn(format!(
            "MetadataSet rejected: key {key} uses the reserved _uri: prefix"
        )));
    }
    let cleaned: Vec<u8> = value.iter().copied().filter(|&b| b != 0).collect();
    let encoded = valuefmt::encode(&cleaned, true)?;
    tx.upsert_metadata(asset, key, encoded, immutable, ctx.slot, &ctx.tx_signature)
        .await?;
    Ok(HandlerOutcome::ok())
}

pub async fn handle_deleted(
    tx: &mut (dyn StoreTx + Send),
    asset: &str,
    key: &str,
) -> Result<HandlerOutcome> {
    tx.delete_metadata(asset, key).await?;
    Ok(HandlerOutcome::ok())
}
