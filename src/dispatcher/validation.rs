// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Validation-entity handlers (§4.C): `ValidationRequested`,
//! `ValidationResponded`. Both are upserts keyed by `(asset, validator,
//! nonce)`; each handler writes only its own side of the row and is also a
//! valid create (§3 "Validation": "response fields ... may be filled before
//! the requesting event").

use super::HandlerOutcome;
use crate::errors::Result;
use crate::models::{ValidationRequestPatch, ValidationResponsePatch};
use crate::store::StoreTx;
use crate::types::EventContext;

/// On create, writes only request-side fields; on conflict, overwrites
/// request-side fields (the backfill path, §4.C).
pub async fn handle_requested(
    tx: &mut (dyn StoreTx + Send),
    ctx: &EventContext,
    asset: &str,
    validator: &str,
    nonce: u64,
    request_uri: Option<&str>,
) -> Result<HandlerOutcome> {
    tx.upsert_validation_request(
        asset,
        validator,
        nonce,
        ValidationRequestPatch {
            request_uri: request_uri.map(str::to_string),
            request_slot: ctx.slot,
            request_tx_signature: ctx.tx_signature.clone(),
        },
    )
    .await?;
    Ok(HandlerOutcome::ok())
}

/// On create, uses the validator address as a best-guess `requester` and
/// the response tx as a request-signature placeholder (§4.C); the later
/// (or earlier, if already applied) `ValidationRequested` event overwrites
/// those placeholders via its own upsert.
pub async fn handle_responded(
    tx: &mut (dyn StoreTx + Send),
    ctx: &EventContext,
    asset: &str,
    validator: &str,
    nonce: u64,
    response_uri: Option<&str>,
    response_code: Option<i32>,
) -> Result<HandlerOutcome> {
    tx.upsert_validation_response(
        asset,
        validator,
        nonce,
        ValidationResponsePatch {
            response_uri: response_uri.map(str::to_string),
            response_code,
            response_slot: ctx.slot,
            response_tx_signature: ctx.tx_signature.clone(),
        },
    )
    .await?;
    Ok(HandlerOutcome::ok())
}
