// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! The Verification Worker (§4.E): a periodic task that transitions
//! `PENDING` rows to `FINALIZED`/`ORPHANED` by observing on-chain account
//! presence at a safety-depth cutoff behind the chain head. Spawned by
//! [`crate::engine::Engine::start_verifier`] as a single `tokio::task`,
//! stopped at its next tick boundary by [`crate::engine::Engine::stop`].

use crate::config::VerifierConfig;
use crate::metrics::Metrics;
use crate::rpc::{ChainRpc, RpcError};
use crate::store::{EntityKind, PendingRow, Store};
use crate::types::VerificationStatus;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoffBuilder;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// The entity kinds paged each tick, in the order they're processed. Feedback
/// and FeedbackResponse are checked after Agent so a same-tick agent
/// transition is visible to their parent lookups.
const VERIFIABLE_KINDS: &[EntityKind] = &[
    EntityKind::Agent,
    EntityKind::Registry,
    EntityKind::AgentMetadata,
    EntityKind::Feedback,
    EntityKind::FeedbackResponse,
    EntityKind::Validation,
];

pub struct VerificationWorker {
    store: Arc<dyn Store>,
    rpc: Arc<dyn ChainRpc>,
    config: VerifierConfig,
    metrics: Metrics,
    running: Arc<Mutex<()>>,
}

impl VerificationWorker {
    pub fn new(
        store: Arc<dyn Store>,
        rpc: Arc<dyn ChainRpc>,
        config: VerifierConfig,
        metrics: Metrics,
    ) -> Self {
        VerificationWorker {
            store,
            rpc,
            config,
            metrics,
            running: Arc::new(Mutex::new(())),
        }
    }

    /// Spawns the periodic tick loop, returning its `JoinHandle`. Exits once
    /// `cancel` is triggered, at the next tick boundary (§5 "stop the
    /// Verification Worker at its next tick boundary").
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        let mut interval = tokio::time::interval(self.config.tick_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        self.tick().await;
                    }
                }
            }
        })
    }

    /// Runs one verification pass. Non-reentrant: if a prior tick is still
    /// running, this tick is skipped rather than queued (§4.E
    /// "non-reentrancy guard (skip-if-running)").
    pub async fn tick(&self) {
        let Ok(_guard) = self.running.try_lock() else {
            self.metrics
                .verifier_ticks_total
                .with_label_values(&["skipped_running"])
                .inc();
            debug!("verifier tick skipped: previous tick still running");
            return;
        };

        let head = match self.rpc.get_slot().await {
            Ok(head) => head,
            Err(e) => {
                warn!(error = %e, "verifier tick aborted: get_slot failed");
                self.metrics
                    .verifier_ticks_total
                    .with_label_values(&["skipped_rpc_error"])
                    .inc();
                return;
            }
        };

        let cutoff = match head.checked_sub(self.config.safety_depth) {
            Some(cutoff) => cutoff,
            None => {
                debug!(head, safety_depth = self.config.safety_depth, "verifier tick no-op: new network");
                self.metrics
                    .verifier_ticks_total
                    .with_label_values(&["skipped_no_cutoff"])
                    .inc();
                return;
            }
        };

        for kind in VERIFIABLE_KINDS {
            if let Err(e) = self.verify_kind(*kind, cutoff).await {
                warn!(?kind, error = %e, "verifier pass failed for entity kind");
            }
        }

        match self
            .store
            .purge_orphans_older_than(unix_now() - self.config.orphan_max_age.as_secs() as i64)
            .await
        {
            Ok(count) if count > 0 => info!(count, "purged aged-out orphan responses"),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "failed to purge aged-out orphan responses"),
        }

        self.metrics
            .verifier_ticks_total
            .with_label_values(&["ran"])
            .inc();
    }

    async fn verify_kind(&self, kind: EntityKind, cutoff: u64) -> crate::errors::Result<()> {
        let mut after_key: Option<String> = None;
        loop {
            let rows = self
                .store
                .page_pending(kind, cutoff, self.config.page_size, after_key.clone())
                .await?;
            if rows.is_empty() {
                break;
            }
            after_key = rows.last().map(|r| r.id.clone());
            let page_len = rows.len();

            let mut finalized = Vec::new();
            let mut orphaned = Vec::new();
            for row in rows {
                if self.decide(kind, &row).await {
                    finalized.push(row.id);
                } else {
                    orphaned.push(row.id);
                }
            }

            let verified_at = Some(unix_now());
            let verified_slot = Some(cutoff);
            if !finalized.is_empty() {
                self.store
                    .set_status(kind, &finalized, VerificationStatus::Finalized, verified_at, verified_slot)
                    .await?;
                self.metrics
                    .verifier_transitions_total
                    .with_label_values(&[kind_label(kind), "finalized"])
                    .inc_by(finalized.len() as u64);
            }
            if !orphaned.is_empty() {
                self.store
                    .set_status(kind, &orphaned, VerificationStatus::Orphaned, verified_at, verified_slot)
                    .await?;
                self.metrics
                    .verifier_transitions_total
                    .with_label_values(&[kind_label(kind), "orphaned"])
                    .inc_by(orphaned.len() as u64);
            }

            if (page_len as u32) < self.config.page_size {
                break;
            }
        }
        Ok(())
    }

    /// Decides whether `row` should be finalized (`true`) or orphaned
    /// (`false`), per the per-kind rules in §4.E step 3.
    async fn decide(&self, kind: EntityKind, row: &PendingRow) -> bool {
        match kind {
            EntityKind::Agent | EntityKind::Registry | EntityKind::Validation => {
                match &row.pda {
                    Some(pda) => self.probe_account(pda).await,
                    None => false,
                }
            }
            EntityKind::AgentMetadata => match &row.pda {
                // Direct on-chain metadata: probe the owning agent's PDA.
                Some(pda) => self.probe_account(pda).await,
                // URI-derived rows (`_uri:` prefix) finalize directly, no
                // on-chain check (§4.E "URI-derived Metadata").
                None => true,
            },
            EntityKind::Feedback => match &row.parent_agent {
                Some(agent) => !matches!(
                    self.store.agent_status(agent).await,
                    Ok(Some(VerificationStatus::Orphaned))
                ),
                None => true,
            },
            EntityKind::FeedbackResponse => {
                let parent_feedback_orphaned = row.parent_feedback_orphaned.unwrap_or(false);
                if parent_feedback_orphaned {
                    return false;
                }
                match &row.parent_agent {
                    Some(agent) => !matches!(
                        self.store.agent_status(agent).await,
                        Ok(Some(VerificationStatus::Orphaned))
                    ),
                    None => true,
                }
            }
        }
    }

    /// `get_account_info` with bounded exponential-backoff retries; a final
    /// absent or a final error is treated as "not present this cycle" and
    /// causes an `Orphaned` verdict (§4.E "Retry policy").
    async fn probe_account(&self, pubkey: &str) -> bool {
        let mut backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.config.retry_initial_backoff)
            .with_max_elapsed_time(None)
            .build();

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.rpc.get_account_info(pubkey).await {
                Ok(Some(_)) => return true,
                Ok(None) => {
                    if attempt >= self.config.retry_attempts {
                        return false;
                    }
                }
                Err(RpcError::Timeout) | Err(RpcError::Transport(_)) => {
                    if attempt >= self.config.retry_attempts {
                        return false;
                    }
                }
            }
            match backoff.next_backoff() {
                Some(delay) => tokio::time::sleep(delay).await,
                None => return false,
            }
        }
    }
}

fn kind_label(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Agent => "agent",
        EntityKind::Registry => "registry",
        EntityKind::AgentMetadata => "agent_metadata",
        EntityKind::Feedback => "feedback",
        EntityKind::FeedbackResponse => "feedback_response",
        EntityKind::Validation => "validation",
    }
}

fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::test_support::StaticRpc;
    use crate::store::embedded::EmbeddedStore;
    use crate::types::{Event, EventContext, EventKind, EventSource};

    fn config() -> VerifierConfig {
        VerifierConfig {
            tick_interval: Duration::from_secs(60),
            safety_depth: 600,
            page_size: 500,
            retry_attempts: 3,
            retry_initial_backoff: Duration::from_millis(1),
            orphan_max_age: Duration::from_secs(1800),
        }
    }

    async fn register_agent(store: &EmbeddedStore, asset: &str, slot: u64) {
        let mut tx = store.begin().await.unwrap();
        crate::dispatcher::agent::handle_registered(
            &mut *tx,
            &EventContext {
                tx_signature: "sig".to_string(),
                slot,
                block_time: None,
                tx_index: Some(0),
                source: EventSource::Poller,
            },
            asset,
            "owner",
            "",
            "collection",
            "registry",
            false,
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn agent_present_on_chain_finalizes() {
        let store = Arc::new(EmbeddedStore::open_in_memory().unwrap());
        register_agent(&store, "A", 100).await;

        let rpc = Arc::new(StaticRpc::new(700));
        rpc.insert_account(
            "A",
            crate::rpc::Account {
                pubkey: "A".to_string(),
                owner: "program".to_string(),
                lamports: 1,
            },
        );

        let worker = Arc::new(VerificationWorker::new(
            store.clone(),
            rpc,
            config(),
            Metrics::new_for_testing(),
        ));
        worker.tick().await;

        let mut tx = store.begin().await.unwrap();
        let agent = tx.get_agent("A").await.unwrap().unwrap();
        assert_eq!(agent.status, VerificationStatus::Finalized);
        assert_eq!(agent.verified_slot, Some(100));
        tx.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn agent_absent_after_retries_orphans() {
        let store = Arc::new(EmbeddedStore::open_in_memory().unwrap());
        register_agent(&store, "A", 100).await;

        let rpc = Arc::new(StaticRpc::new(700));
        let worker = Arc::new(VerificationWorker::new(
            store.clone(),
            rpc,
            config(),
            Metrics::new_for_testing(),
        ));
        worker.tick().await;

        let mut tx = store.begin().await.unwrap();
        let agent = tx.get_agent("A").await.unwrap().unwrap();
        assert_eq!(agent.status, VerificationStatus::Orphaned);
        tx.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn new_network_cutoff_underflow_is_a_no_op() {
        let store = Arc::new(EmbeddedStore::open_in_memory().unwrap());
        register_agent(&store, "A", 100).await;

        let rpc = Arc::new(StaticRpc::new(10));
        let mut cfg = config();
        cfg.safety_depth = 600;
        let worker = Arc::new(VerificationWorker::new(
            store.clone(),
            rpc,
            cfg,
            Metrics::new_for_testing(),
        ));
        worker.tick().await;

        let mut tx = store.begin().await.unwrap();
        let agent = tx.get_agent("A").await.unwrap().unwrap();
        assert_eq!(agent.status, VerificationStatus::Pending);
        tx.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn flaky_rpc_recovers_within_retry_budget() {
        let store = Arc::new(EmbeddedStore::open_in_memory().unwrap());
        register_agent(&store, "A", 100).await;

        let rpc = Arc::new(StaticRpc::new(700).with_flaky_attempts(2));
        rpc.insert_account(
            "A",
            crate::rpc::Account {
                pubkey: "A".to_string(),
                owner: "program".to_string(),
                lamports: 1,
            },
        );

        let worker = Arc::new(VerificationWorker::new(
            store.clone(),
            rpc,
            config(),
            Metrics::new_for_testing(),
        ));
        worker.tick().await;

        let mut tx = store.begin().await.unwrap();
        let agent = tx.get_agent("A").await.unwrap().unwrap();
        assert_eq!(agent.status, VerificationStatus::Finalized);
        tx.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn orphaned_parent_agent_orphans_dependent_feedback() {
        let store = Arc::new(EmbeddedStore::open_in_memory().unwrap());
        register_agent(&store, "A", 100).await;

        {
            let mut tx = store.begin().await.unwrap();
            crate::dispatcher::dispatch(
                &mut *tx,
                &Event {
                    kind: EventKind::NewFeedback {
                        asset: "A".to_string(),
                        client: "C".to_string(),
                        feedback_index: 1,
                        value: "1".to_string(),
                        value_decimals: 0,
                        score: None,
                        tag1: None,
                        tag2: None,
                        endpoint: None,
                        feedback_uri: None,
                        seal_hash: [0u8; 32],
                        running_digest: None,
                    },
                },
                &EventContext {
                    tx_signature: "sigF".to_string(),
                    slot: 100,
                    block_time: None,
                    tx_index: Some(0),
                    source: EventSource::Poller,
                },
            )
            .await
            .unwrap();
            tx.commit().await.unwrap();
        }

        let rpc = Arc::new(StaticRpc::new(700)); // agent "A" absent -> orphaned
        let worker = Arc::new(VerificationWorker::new(
            store.clone(),
            rpc,
            config(),
            Metrics::new_for_testing(),
        ));
        worker.tick().await;

        let mut tx = store.begin().await.unwrap();
        let feedback = tx
            .find_feedback_by_natural_key("A", "C", 1)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(feedback.status, VerificationStatus::Orphaned);
        tx.rollback().await.unwrap();
    }
}
