// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! The long-lived engine instance (§2, §9 "encapsulate as fields of a
//! long-lived engine instance; no language-level globals"): owns the Store,
//! the URI Digest Queue, the Verification Worker's task handle, metrics, and
//! the `seen_collections` cache for their process lifetime. A caller
//! constructs one [`Engine`] and calls [`Engine::ingest`] per event,
//! optionally [`Engine::start_verifier`] once, and [`Engine::stop`] on
//! shutdown.

use crate::cache::SeenCollections;
use crate::config::EngineConfig;
use crate::dispatcher::HandlerOutcome;
use crate::ingestion::IngestionLoop;
use crate::metrics::Metrics;
use crate::rpc::ChainRpc;
use crate::store::Store;
use crate::types::{Event, EventContext};
use crate::uri_queue::{self, UriFetcher, UriQueueHandle};
use crate::verifier::VerificationWorker;
use prometheus::Registry;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub struct Engine {
    store: Arc<dyn Store>,
    ingestion: IngestionLoop,
    uri_queue: Option<UriQueueHandle>,
    metrics: Metrics,
    config: EngineConfig,
    /// Short-circuits repeated collection inserts in the remote backend
    /// (§5, §9). The embedded backend does not need it; it is always
    /// constructed so callers on either backend share one engine shape.
    seen_collections: Arc<SeenCollections>,
    verifier: Mutex<Option<VerifierHandle>>,
    accepting: Arc<std::sync::atomic::AtomicBool>,
}

struct VerifierHandle {
    cancel: CancellationToken,
    join: tokio::task::JoinHandle<()>,
}

impl Engine {
    pub fn new(
        store: Arc<dyn Store>,
        uri_fetcher: Arc<dyn UriFetcher>,
        config: EngineConfig,
        registry: &Registry,
    ) -> Self {
        let metrics = Metrics::new(registry);
        let uri_queue = uri_queue::spawn(
            config.uri_queue.clone(),
            store.clone(),
            uri_fetcher,
            metrics.clone(),
        );
        let ingestion = IngestionLoop::new(store.clone(), metrics.clone());
        Engine {
            store,
            ingestion,
            uri_queue,
            metrics,
            seen_collections: Arc::new(SeenCollections::new(config.seen_collections_capacity)),
            config,
            verifier: Mutex::new(None),
            accepting: Arc::new(std::sync::atomic::AtomicBool::new(true)),
        }
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn seen_collections(&self) -> &SeenCollections {
        &self.seen_collections
    }

    /// Applies one event via the Atomic Ingestion Loop (§4.D), then
    /// enqueues a post-commit URI digest job if the handler requested one
    /// and the queue is enabled and still accepting work (§4.D step 5, §5
    /// "stop accepting new events").
    pub async fn ingest(&self, event: &Event, ctx: &EventContext) -> crate::errors::Result<HandlerOutcome> {
        if !self.accepting.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(crate::errors::IndexerError::Store(
                "engine is stopping: no longer accepting events".to_string(),
            ));
        }
        let outcome = self.ingestion.ingest(event, ctx).await?;
        if let (Some(queue), Some(request)) = (&self.uri_queue, &outcome.uri_digest) {
            queue.enqueue(request.asset.clone(), request.uri.clone());
        }
        Ok(outcome)
    }

    /// Spawns the Verification Worker's tick loop (§4.E). Idempotent: a
    /// second call is a no-op while one is already running.
    pub async fn start_verifier(&self, rpc: Arc<dyn ChainRpc>) {
        let mut guard = self.verifier.lock().await;
        if guard.is_some() {
            return;
        }
        let worker = Arc::new(VerificationWorker::new(
            self.store.clone(),
            rpc,
            self.config.verifier.clone(),
            self.metrics.clone(),
        ));
        let cancel = CancellationToken::new();
        let join = worker.spawn(cancel.clone());
        *guard = Some(VerifierHandle { cancel, join });
    }

    /// Stops accepting new events, drains the URI Digest Queue within a
    /// bounded grace window (then abandons remaining jobs), and stops the
    /// Verification Worker at its next tick boundary (§5 "Cancellation").
    /// No background task escapes this call.
    pub async fn stop(self) {
        self.accepting.store(false, std::sync::atomic::Ordering::SeqCst);

        if let Some(queue) = self.uri_queue {
            queue.shutdown(self.config.shutdown_grace).await;
        }

        if let Some(handle) = self.verifier.lock().await.take() {
            handle.cancel.cancel();
            if handle.join.await.is_err() {
                info!("verification worker task ended with an error during shutdown");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::embedded::EmbeddedStore;
    use crate::types::{EventContext, EventKind, EventSource};
    use crate::uri_queue::StaticUriFetcher;
    use std::collections::HashMap;

    fn no_op_fetcher() -> Arc<dyn UriFetcher> {
        Arc::new(StaticUriFetcher {
            responses: HashMap::new(),
        })
    }

    #[tokio::test]
    async fn ingest_then_stop_drains_cleanly() {
        let store: Arc<dyn Store> = Arc::new(EmbeddedStore::open_in_memory().unwrap());
        let registry = Registry::new();
        let engine = Engine::new(store, no_op_fetcher(), EngineConfig::default(), &registry);

        let event = Event {
            kind: EventKind::BaseRegistryCreated {
                registry_id: "R1".to_string(),
                collection: "C1".to_string(),
                authority: "auth".to_string(),
            },
        };
        let ctx = EventContext {
            tx_signature: "sig".to_string(),
            slot: 10,
            block_time: None,
            tx_index: Some(0),
            source: EventSource::Poller,
        };
        engine.ingest(&event, &ctx).await.unwrap();
        engine.stop().await;
    }

    #[tokio::test]
    async fn ingest_after_stop_is_rejected() {
        let store: Arc<dyn Store> = Arc::new(EmbeddedStore::open_in_memory().unwrap());
        let registry = Registry::new();
        let engine = Engine::new(store, no_op_fetcher(), EngineConfig::default(), &registry);
        engine.accepting.store(false, std::sync::atomic::Ordering::SeqCst);

        let event = Event {
            kind: EventKind::BaseRegistryCreated {
                registry_id: "R1".to_string(),
                collection: "C1".to_string(),
                authority: "auth".to_string(),
            },
        };
        let ctx = EventContext {
            tx_signature: "sig".to_string(),
            slot: 10,
            block_time: None,
            tx_index: Some(0),
            source: EventSource::Poller,
        };
        assert!(engine.ingest(&event, &ctx).await.is_err());
    }
}
