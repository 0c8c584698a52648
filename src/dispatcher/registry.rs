// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Registry-entity handlers (§4.C): `BaseRegistryCreated`,
//! `UserRegistryCreated`. Both upsert on `registry_id`; a later event with
//! the same id is a no-op on identity attributes (§3 "Registry").

use super::HandlerOutcome;
use crate::errors::Result;
use crate::models::Registry;
use crate::store::StoreTx;
use crate::types::{EventContext, RegistryType, VerificationStatus};

pub async fn handle_base_created(
    tx: &mut (dyn StoreTx + Send),
    ctx: &EventContext,
    registry_id: &str,
    collection: &str,
    authority: &str,
) -> Result<HandlerOutcome> {
    create(tx, ctx, registry_id, collection, authority, RegistryType::Base).await
}

pub async fn handle_user_created(
    tx: &mut (dyn StoreTx + Send),
    ctx: &EventContext,
    registry_id: &str,
    collection: &str,
    authority: &str,
) -> Result<HandlerOutcome> {
    create(tx, ctx, registry_id, collection, authority, RegistryType::User).await
}

async fn create(
    tx: &mut (dyn StoreTx + Send),
    ctx: &EventContext,
    registry_id: &str,
    collection: &str,
    authority: &str,
    registry_type: RegistryType,
) -> Result<HandlerOutcome> {
    tx.upsert_registry(Registry {
        registry_id: registry_id.to_string(),
        collection: collection.to_string(),
        registry_type,
        authority: authority.to_string(),
        status: VerificationStatus::Pending,
        slot: ctx.slot,
        tx_signature: ctx.tx_signature.clone(),
    })
    .await?;
    Ok(HandlerOutcome::ok())
}
