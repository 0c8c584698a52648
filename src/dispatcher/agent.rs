// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Agent-entity handlers (§4.C): `AgentRegisteredInRegistry`,
//! `AgentOwnerSynced`, `AtomEnabled`, `UriUpdated`, `WalletUpdated`.

use super::HandlerOutcome;
use crate::errors::Result;
use crate::models::{AgentCreate, AgentPatch};
use crate::store::StoreTx;
use crate::types::{EventContext, DEFAULT_PUBKEY_BASE58};

/// Create-or-update on `asset`. On create: `status = Pending`,
/// `created_slot`/`created_tx_signature` fixed at the registering event. On
/// update (and on create): `collection`, `registry`, `atom_enabled`, `uri`
/// are refreshed (§4.A `upsert_agent`). Post-commit enqueues a URI digest job
/// when `uri` is non-empty and the queue is enabled.
#[allow(clippy::too_many_arguments)]
pub async fn handle_registered(
    tx: &mut (dyn StoreTx + Send),
    ctx: &EventContext,
    asset: &str,
    owner: &str,
    uri: &str,
    collection: &str,
    registry: &str,
    atom_enabled: bool,
) -> Result<HandlerOutcome> {
    let now = now_unix();
    let create = AgentCreate {
        asset: asset.to_string(),
        owner: owner.to_string(),
        uri: uri.to_string(),
        collection: collection.to_string(),
        registry: registry.to_string(),
        atom_enabled,
        created_slot: ctx.slot,
        created_tx_signature: ctx.tx_signature.clone(),
        tx_index: ctx.tx_index,
        updated_at: now,
    };
    let mut patch = AgentPatch::empty(now);
    patch.uri = Some(uri.to_string());
    patch.collection = Some(collection.to_string());
    patch.registry = Some(registry.to_string());
    patch.atom_enabled = Some(atom_enabled);

    tx.upsert_agent(create, patch).await?;

    let mut outcome = HandlerOutcome::ok();
    if !uri.is_empty() {
        outcome = outcome.with_uri_digest(asset, uri);
    }
    Ok(outcome)
}

/// `update_agent_fields(owner, updated_at)`; zero rows affected means the
/// registration event hasn't arrived yet — a warning, not an error (§4.C,
/// §7 class 1). The event is then permanently lost (§8 scenario 2): there is
/// no pending-owner-sync table.
pub async fn handle_owner_synced(
    tx: &mut (dyn StoreTx + Send),
    _ctx: &EventContext,
    asset: &str,
    new_owner: &str,
) -> Result<HandlerOutcome> {
    let mut patch = AgentPatch::empty(now_unix());
    patch.owner = Some(new_owner.to_string());
    let rows = tx.update_agent_fields(asset, patch).await?;
    if rows == 0 {
        return Ok(HandlerOutcome::warn(format!(
            "AgentOwnerSynced for unknown asset {asset}: owner-sync event lost"
        )));
    }
    Ok(HandlerOutcome::ok())
}

pub async fn handle_atom_enabled(
    tx: &mut (dyn StoreTx + Send),
    _ctx: &EventContext,
    asset: &str,
) -> Result<HandlerOutcome> {
    let mut patch = AgentPatch::empty(now_unix());
    patch.atom_enabled = Some(true);
    let rows = tx.update_agent_fields(asset, patch).await?;
    if rows == 0 {
        return Ok(HandlerOutcome::warn(format!(
            "AtomEnabled for unknown asset {asset}"
        )));
    }
    Ok(HandlerOutcome::ok())
}

/// Updates `uri` and post-commit enqueues a URI digest job.
pub async fn handle_uri_updated(
    tx: &mut (dyn StoreTx + Send),
    _ctx: &EventContext,
    asset: &str,
    uri: &str,
) -> Result<HandlerOutcome> {
    let mut patch = AgentPatch::empty(now_unix());
    patch.uri = Some(uri.to_string());
    let rows = tx.update_agent_fields(asset, patch).await?;
    if rows == 0 {
        return Ok(HandlerOutcome::warn(format!(
            "UriUpdated for unknown asset {asset}"
        )));
    }
    let mut outcome = HandlerOutcome::ok();
    if !uri.is_empty() {
        outcome = outcome.with_uri_digest(asset, uri);
    }
    Ok(outcome)
}

/// Normalizes the default all-zero pubkey to absent before storing
/// (§4.C "Normalize default-pubkey ... to absent").
pub async fn handle_wallet_updated(
    tx: &mut (dyn StoreTx + Send),
    _ctx: &EventContext,
    asset: &str,
    wallet: &str,
) -> Result<HandlerOutcome> {
    let normalized = if wallet == DEFAULT_PUBKEY_BASE58 {
        None
    } else {
        Some(wallet.to_string())
    };
    let mut patch = AgentPatch::empty(now_unix());
    patch.wallet = Some(normalized);
    let rows = tx.update_agent_fields(asset, patch).await?;
    if rows == 0 {
        return Ok(HandlerOutcome::warn(format!(
            "WalletUpdated for unknown asset {asset}"
        )));
    }
    Ok(HandlerOutcome::ok())
}

fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}
