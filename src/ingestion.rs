// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! The Atomic Ingestion Loop (§4.D): wraps one dispatcher call plus a
//! monotonic cursor advance in a single transaction per event.

use crate::dispatcher::{self, HandlerOutcome};
use crate::errors::Result;
use crate::metrics::Metrics;
use crate::models::IndexerCursor;
use crate::store::Store;
use crate::types::{Event, EventContext};
use std::sync::Arc;
use tracing::{debug, warn};

/// Generic over [`Store`] so the loop compiles and is testable against
/// either backend without duplicating the per-event protocol (§9: "a single
/// `Store` abstraction ... handlers are written once").
pub struct IngestionLoop {
    store: Arc<dyn Store>,
    metrics: Metrics,
}

impl IngestionLoop {
    pub fn new(store: Arc<dyn Store>, metrics: Metrics) -> Self {
        IngestionLoop { store, metrics }
    }

    /// Applies one event: open a transaction, dispatch, advance the cursor,
    /// commit. On any store error the transaction is rolled back and the
    /// error is propagated for the caller to retry (§7 class 3). Returns the
    /// handler's warnings so the caller can log/inspect them; an
    /// already-seen event (cursor no-op) is not distinguished from a fresh
    /// one at this layer — handler idempotence makes both safe to commit
    /// (§4.D step 3, §8 "Handler idempotence").
    pub async fn ingest(&self, event: &Event, ctx: &EventContext) -> Result<HandlerOutcome> {
        let kind_name = event.kind.name();
        let mut tx = match self.store.begin().await {
            Ok(tx) => tx,
            Err(e) => {
                self.metrics
                    .events_total
                    .with_label_values(&[kind_name, "error"])
                    .inc();
                return Err(e);
            }
        };

        let outcome = match dispatcher::dispatch(&mut *tx, event, ctx).await {
            Ok(outcome) => outcome,
            Err(e) => {
                let _ = tx.rollback().await;
                self.metrics
                    .events_total
                    .with_label_values(&[kind_name, "error"])
                    .inc();
                return Err(e);
            }
        };

        let cursor = IndexerCursor {
            id: IndexerCursor::MAIN_ID.to_string(),
            last_slot: ctx.slot,
            last_signature: ctx.tx_signature.clone(),
            source: ctx.source,
        };
        let advanced = match tx.upsert_cursor_monotonic(cursor).await {
            Ok(advanced) => advanced,
            Err(e) => {
                let _ = tx.rollback().await;
                self.metrics
                    .events_total
                    .with_label_values(&[kind_name, "error"])
                    .inc();
                return Err(e);
            }
        };

        if let Err(e) = tx.commit().await {
            self.metrics
                .events_total
                .with_label_values(&[kind_name, "error"])
                .inc();
            return Err(e);
        }

        let source_label = ctx.source.as_str();
        if advanced {
            self.metrics
                .cursor_advances_total
                .with_label_values(&[source_label])
                .inc();
        } else {
            self.metrics
                .cursor_noops_total
                .with_label_values(&[source_label])
                .inc();
            debug!(slot = ctx.slot, "cursor write was a no-op: slot already seen");
        }

        let outcome_label = if outcome.warnings.is_empty() { "committed" } else { "warned" };
        self.metrics
            .events_total
            .with_label_values(&[kind_name, outcome_label])
            .inc();
        for warning in &outcome.warnings {
            warn!(kind = kind_name, slot = ctx.slot, %warning, "handler warning");
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::embedded::EmbeddedStore;
    use crate::types::{EventContext, EventKind, EventSource};

    async fn fresh_loop() -> (IngestionLoop, Arc<EmbeddedStore>) {
        let store = Arc::new(EmbeddedStore::open_in_memory().expect("open sqlite"));
        let metrics = Metrics::new_for_testing();
        (IngestionLoop::new(store.clone(), metrics), store)
    }

    fn ctx(slot: u64, sig: &str) -> EventContext {
        EventContext {
            tx_signature: sig.to_string(),
            slot,
            block_time: None,
            tx_index: Some(0),
            source: EventSource::Poller,
        }
    }

    #[tokio::test]
    async fn cursor_advances_to_max_slot_seen() {
        let (loop_, store) = fresh_loop().await;
        let event = Event {
            kind: EventKind::BaseRegistryCreated {
                registry_id: "R1".to_string(),
                collection: "C1".to_string(),
                authority: "auth".to_string(),
            },
        };
        loop_.ingest(&event, &ctx(100, "sigA")).await.unwrap();
        loop_.ingest(&event, &ctx(200, "sigB")).await.unwrap();
        loop_.ingest(&event, &ctx(150, "sigC")).await.unwrap();

        let cursor = store.read_cursor().await.unwrap().unwrap();
        assert_eq!(cursor.last_slot, 200);
        assert_eq!(cursor.last_signature, "sigB");
    }

    #[tokio::test]
    async fn duplicate_event_is_idempotent() {
        let (loop_, _store) = fresh_loop().await;
        let event = Event {
            kind: EventKind::UserRegistryCreated {
                registry_id: "R2".to_string(),
                collection: "C2".to_string(),
                authority: "auth".to_string(),
            },
        };
        loop_.ingest(&event, &ctx(50, "sigX")).await.unwrap();
        let outcome = loop_.ingest(&event, &ctx(50, "sigX")).await.unwrap();
        assert!(outcome.warnings.is_empty());
    }
}
