// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! The Event Dispatcher (§4.C): one handler per [`EventKind`] variant,
//! reached through a single exhaustive `match` (§9: "a faithful port should
//! use tagged variants and a total `match`", replacing the source's dynamic
//! dispatch on event discriminants). Handlers are transaction-scoped free
//! functions grouped by entity; none of them enqueue URI digest jobs
//! themselves — that happens post-commit in [`crate::ingestion::IngestionLoop`].

pub mod agent;
pub mod feedback;
pub mod metadata;
pub mod registry;
pub mod validation;

use crate::errors::Result;
use crate::store::StoreTx;
use crate::types::{Event, EventContext, EventKind};

/// Whether the post-commit caller should enqueue a URI digest job, and for
/// which asset/uri pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UriDigestRequest {
    pub asset: String,
    pub uri: String,
}

/// The result of dispatching one event: non-fatal warnings (§7 class 1 and
/// 2 — duplicate/out-of-order events, store-invariant violations) that do
/// not prevent the transaction from committing, plus an optional post-commit
/// side effect request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandlerOutcome {
    pub warnings: Vec<String>,
    pub uri_digest: Option<UriDigestRequest>,
}

impl HandlerOutcome {
    pub fn ok() -> Self {
        HandlerOutcome::default()
    }

    pub fn warn(message: impl Into<String>) -> Self {
        HandlerOutcome {
            warnings: vec![message.into()],
            uri_digest: None,
        }
    }

    pub fn with_uri_digest(mut self, asset: impl Into<String>, uri: impl Into<String>) -> Self {
        self.uri_digest = Some(UriDigestRequest {
            asset: asset.into(),
            uri: uri.into(),
        });
        self
    }

    pub fn push_warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }
}

/// Dispatches `event` to its handler inside `tx`. The only `Err` paths are
/// §7 class 3/4 failures (store/transport errors propagated unchanged); an
/// unknown event kind cannot occur because [`EventKind`] is exhaustively
/// matched at the Rust type level — every variant has a handler below.
pub async fn dispatch(
    tx: &mut (dyn StoreTx + Send),
    event: &Event,
    ctx: &EventContext,
) -> Result<HandlerOutcome> {
    match &event.kind {
        EventKind::AgentRegisteredInRegistry {
            asset,
            owner,
            uri,
            collection,
            registry,
            atom_enabled,
        } => {
            agent::handle_registered(
                tx,
                ctx,
                asset,
                owner,
                uri,
                collection,
                registry,
                *atom_enabled,
            )
            .await
        }
        EventKind::AgentOwnerSynced { asset, new_owner } => {
            agent::handle_owner_synced(tx, ctx, asset, new_owner).await
        }
        EventKind::AtomEnabled { asset } => agent::handle_atom_enabled(tx, ctx, asset).await,
        EventKind::UriUpdated { asset, uri } => agent::handle_uri_updated(tx, ctx, asset, uri).await,
        EventKind::WalletUpdated { asset, wallet } => {
            agent::handle_wallet_updated(tx, ctx, asset, wallet).await
        }
        EventKind::MetadataSet {
            asset,
            key,
            value,
            immutable,
        } => metadata::handle_set(tx, ctx, asset, key, value, *immutable).await,
        EventKind::MetadataDeleted { asset, key } => {
            metadata::handle_deleted(tx, asset, key).await
        }
        EventKind::BaseRegistryCreated {
            registry_id,
            collection,
            authority,
        } => registry::handle_base_created(tx, ctx, registry_id, collection, authority).await,
        EventKind::UserRegistryCreated {
            registry_id,
            collection,
            authority,
        } => registry::handle_user_created(tx, ctx, registry_id, collection, authority).await,
        EventKind::NewFeedback {
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
            seal_hash,
            running_digest,
        } => {
            feedback::handle_new_feedback(
                tx,
                ctx,
                asset,
                client,
                *feedback_index,
                value,
                *value_decimals,
                *score,
                tag1.as_deref(),
                tag2.as_deref(),
                endpoint.as_deref(),
                feedback_uri.as_deref(),
                *seal_hash,
                running_digest.clone(),
            )
            .await
        }
        EventKind::FeedbackRevoked {
            asset,
            client,
            feedback_index,
            seal_hash,
        } => {
            feedback::handle_revoked(tx, ctx, asset, client, *feedback_index, *seal_hash).await
        }
        EventKind::ResponseAppended {
            asset,
            client,
            feedback_index,
            responder,
            response_uri,
            response_hash,
            running_digest,
        } => {
            feedback::handle_response_appended(
                tx,
                ctx,
                asset,
                client,
                *feedback_index,
                responder,
                response_uri.as_deref(),
                *response_hash,
                running_digest.clone(),
            )
            .await
        }
        EventKind::ValidationRequested {
            asset,
            validator,
            nonce,
            request_uri,
        } => {
            validation::handle_requested(
                tx,
                ctx,
                asset,
                validator,
                *nonce,
                request_uri.as_deref(),
            )
            .await
        }
        EventKind::ValidationResponded {
            asset,
            validator,
            nonce,
            response_uri,
            response_code,
        } => {
            validation::handle_responded(
                tx,
                ctx,
                asset,
                validator,
                *nonce,
                response_uri.as_deref(),
                *response_code,
            )
            .await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_ok_has_no_warnings_or_uri_digest() {
        let o = HandlerOutcome::ok();
        assert!(o.warnings.is_empty());
        assert!(o.uri_digest.is_none());
    }

    #[test]
    fn with_uri_digest_sets_asset_and_uri() {
        let o = HandlerOutcome::ok().with_uri_digest("A", "ipfs://x");
        assert_eq!(
            o.uri_digest,
            Some(UriDigestRequest {
                asset: "A".to_string(),
                uri: "ipfs://x".to_string(),
            })
        );
    }
}
