// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Prometheus metrics for the engine, registered once against a caller-owned
//! [`Registry`]. Labeled vectors are registered up front so hot paths only
//! ever look up a label combination, never register one.

use prometheus::{
    register_int_counter_vec_with_registry, register_int_gauge_with_registry, IntCounterVec,
    IntGauge, Registry,
};

#[derive(Clone)]
pub struct Metrics {
    /// Events processed, labeled by `(event_kind, outcome)` where outcome is
    /// one of `committed`, `warned`, `error`.
    pub events_total: IntCounterVec,
    /// Cursor advances, labeled by `source`.
    pub cursor_advances_total: IntCounterVec,
    /// Cursor writes rejected as a no-op because the stored slot already
    /// caught up, labeled by `source`.
    pub cursor_noops_total: IntCounterVec,
    /// URI jobs, labeled by `outcome` (`enqueued`, `dropped`, `completed`,
    /// `failed`, `aborted_race`).
    pub uri_jobs_total: IntCounterVec,
    pub uri_queue_depth: IntGauge,
    /// Verifier row transitions, labeled by `(kind, outcome)` where outcome
    /// is `finalized` or `orphaned`.
    pub verifier_transitions_total: IntCounterVec,
    pub verifier_ticks_total: IntCounterVec,
}

impl Metrics {
    pub fn new(registry: &Registry) -> Self {
        Metrics {
            events_total: register_int_counter_vec_with_registry!(
                "indexer_events_total",
                "Events processed by the ingestion loop, by kind and outcome",
                &["event_kind", "outcome"],
                registry
            )
            .unwrap(),
            cursor_advances_total: register_int_counter_vec_with_registry!(
                "indexer_cursor_advances_total",
                "Cursor advances accepted, by source",
                &["source"],
                registry
            )
            .unwrap(),
            cursor_noops_total: register_int_counter_vec_with_registry!(
                "indexer_cursor_noops_total",
                "Cursor writes rejected as already caught up, by source",
                &["source"],
                registry
            )
            .unwrap(),
            uri_jobs_total: register_int_counter_vec_with_registry!(
                "indexer_uri_jobs_total",
                "URI digest queue jobs, by outcome",
                &["outcome"],
                registry
            )
            .unwrap(),
            uri_queue_depth: register_int_gauge_with_registry!(
                "indexer_uri_queue_depth",
                "Current depth of the URI digest queue",
                registry
            )
            .unwrap(),
            verifier_transitions_total: register_int_counter_vec_with_registry!(
                "indexer_verifier_transitions_total",
                "Rows transitioned by the verification worker, by entity kind and outcome",
                &["kind", "outcome"],
                registry
            )
            .unwrap(),
            verifier_ticks_total: register_int_counter_vec_with_registry!(
                "indexer_verifier_ticks_total",
                "Verification worker ticks, by outcome (`ran`, `skipped_running`, `skipped_no_cutoff`, `skipped_rpc_error`)",
                &["outcome"],
                registry
            )
            .unwrap(),
        }
    }

    #[cfg(test)]
    pub fn new_for_testing() -> Self {
        Metrics::new(&Registry::new())
    }
}
