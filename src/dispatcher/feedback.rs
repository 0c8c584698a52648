// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Feedback-entity handlers (§4.C): `NewFeedback`, `FeedbackRevoked`,
//! `ResponseAppended`, plus orphan reconciliation (§4.C "Orphan
//! reconciliation order").

use super::HandlerOutcome;
use crate::errors::Result;
use crate::store::StoreTx;
use crate::types::{EventContext, Sha256Hash, VerificationStatus};

/// Create-or-noop on `(asset, client, feedback_index)` (the store's
/// `upsert_feedback` is idempotent on the natural key, §4.A). After the
/// insert, drains every matching `OrphanResponse` into `FeedbackResponse`,
/// in insertion order, then deletes the orphan rows (§4.C "Orphan
/// reconciliation order", §8 "Reconciliation").
#[allow(clippy::too_many_arguments)]
pub async fn handle_new_feedback(
    tx: &mut (dyn StoreTx + Send),
    ctx: &EventContext,
    asset: &str,
    client: &str,
    feedback_index: u64,
    value: &str,
    value_decimals: i32,
    score: Option<i32>,
    tag1: Option<&str>,
    tag2: Option<&str>,
    endpoint: Option<&str>,
    feedback_uri: Option<&str>,
    seal_hash: [u8; 32],
    running_digest: Option<Vec<u8>>,
) -> Result<HandlerOutcome> {
    let feedback = tx
        .upsert_feedback(
            asset,
            client,
            feedback_index,
            value,
            value_decimals,
            score,
            tag1,
            tag2,
            endpoint,
            feedback_uri,
            Sha256Hash::from_bytes(seal_hash),
            running_digest,
            ctx.slot,
            ctx.tx_index,
        )
        .await?;

    let orphans = tx
        .find_orphan_responses(asset, client, feedback_index)
        .await?;
    let mut warnings = Vec::new();
    for orphan in orphans {
        let status = if orphan.response_hash == feedback.feedback_hash {
            VerificationStatus::Pending
        } else {
            VerificationStatus::Orphaned
        };
        if let Err(e) = tx
            .upsert_feedback_response(
                feedback.id,
                &orphan.responder,
                &orphan.tx_signature,
                orphan.response_uri.as_deref(),
                orphan.response_hash,
                orphan.running_digest.clone(),
                orphan.slot,
                status,
            )
            .await
        {
            warnings.push(format!(
                "failed to reconcile orphan response {}: {e}",
                orphan.id
            ));
            continue;
        }
        tx.delete_orphan_response(orphan.id).await?;
    }

    Ok(HandlerOutcome {
        warnings,
        uri_digest: None,
    })
}

/// Marks the feedback row revoked (missing feedback is acceptable, §7 class
/// 1) and always stores the Revocation snapshot regardless of whether the
/// feedback exists (§3 "Revocation"). Compares the event's `seal_hash`
/// against the stored `feedback_hash`: a match leaves/returns the row
/// `Pending`; a mismatch (or missing feedback) marks it `Orphaned`.
pub async fn handle_revoked(
    tx: &mut (dyn StoreTx + Send),
    ctx: &EventContext,
    asset: &str,
    client: &str,
    feedback_index: u64,
    seal_hash: [u8; 32],
) -> Result<HandlerOutcome> {
    let mut warnings = Vec::new();

    let rows = tx
        .mark_feedback_revoked(asset, client, feedback_index, &ctx.tx_signature, ctx.slot)
        .await?;
    if rows == 0 {
        warnings.push(format!(
            "FeedbackRevoked for unknown feedback ({asset}, {client}, {feedback_index})"
        ));
    }

    tx.upsert_revocation(crate::models::Revocation {
        agent_id: asset.to_string(),
        client: client.to_string(),
        feedback_index,
        tx_signature: ctx.tx_signature.clone(),
        slot: ctx.slot,
    })
    .await?;

    let incoming = Sha256Hash::from_bytes(seal_hash);
    let existing = tx
        .find_feedback_by_natural_key(asset, client, feedback_index)
        .await?;
    let status = match &existing {
        Some(row) if row.feedback_hash == incoming => VerificationStatus::Pending,
        _ => VerificationStatus::Orphaned,
    };
    tx.set_feedback_status(asset, client, feedback_index, status)
        .await?;

    Ok(HandlerOutcome {
        warnings,
        uri_digest: None,
    })
}

/// Looks up the parent Feedback row. Present with matching hash → insert a
/// `Pending` `FeedbackResponse`; present with a mismatching hash → insert it
/// `Orphaned` anyway (it's still a response, just not trusted, §4.C); absent
/// → insert an `OrphanResponse` keyed by the full natural key, to be
/// reconciled by a later `NewFeedback` (§8 "Orphan conservation").
#[allow(clippy::too_many_arguments)]
pub async fn handle_response_appended(
    tx: &mut (dyn StoreTx + Send),
    ctx: &EventContext,
    asset: &str,
    client: &str,
    feedback_index: u64,
    responder: &str,
    response_uri: Option<&str>,
    response_hash: [u8; 32],
    running_digest: Option<Vec<u8>>,
) -> Result<HandlerOutcome> {
    let hash = Sha256Hash::from_bytes(response_hash);
    let parent = tx
        .find_feedback_by_natural_key(asset, client, feedback_index)
        .await?;

    match parent {
        Some(feedback) => {
            let status = if feedback.feedback_hash == hash {
                VerificationStatus::Pending
            } else {
                VerificationStatus::Orphaned
            };
            tx.upsert_feedback_response(
                feedback.id,
                responder,
                &ctx.tx_signature,
                response_uri,
                hash,
                running_digest,
                ctx.slot,
                status,
            )
            .await?;
        }
        None => {
            tx.upsert_orphan_response(
                asset,
                client,
                feedback_index,
                responder,
                &ctx.tx_signature,
                response_uri,
                hash,
                running_digest,
                ctx.slot,
                chrono::Utc::now().timestamp(),
            )
            .await?;
        }
    }

    Ok(HandlerOutcome::ok())
}
