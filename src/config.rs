// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Plain, serde-deserializable configuration. Loading this struct from a
//! file or CLI flags is the caller's job (§1 non-goals: "CLI argument
//! parsing"); this crate only defines the shape and its defaults.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UriQueueMode {
    /// The queue is disabled; `enqueue` is a no-op.
    Off,
    /// Store only the curated set of standard fields.
    Normal,
    /// Additionally store up to 50 extra `_uri:`-prefixed fields.
    Full,
}

impl Default for UriQueueMode {
    fn default() -> Self {
        UriQueueMode::Normal
    }
}

/// URI Digest Queue configuration (§4.B).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UriQueueConfig {
    pub concurrency: usize,
    pub queue_capacity: usize,
    pub mode: UriQueueMode,
    pub max_value_bytes: usize,
    pub max_fetch_bytes: usize,
    #[serde(with = "humantime_secs")]
    pub fetch_timeout: Duration,
    pub purge_before_store: bool,
    /// Cap on extra `_uri:`-prefixed fields stored in `full` mode (§4.B).
    pub max_full_fields: usize,
}

impl Default for UriQueueConfig {
    fn default() -> Self {
        UriQueueConfig {
            concurrency: 5,
            queue_capacity: 100,
            mode: UriQueueMode::Normal,
            max_value_bytes: 8 * 1024,
            max_fetch_bytes: 256 * 1024,
            fetch_timeout: Duration::from_secs(10),
            purge_before_store: true,
            max_full_fields: 50,
        }
    }
}

/// Verification Worker configuration (§4.E).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifierConfig {
    #[serde(with = "humantime_secs")]
    pub tick_interval: Duration,
    pub safety_depth: u64,
    pub page_size: u32,
    pub retry_attempts: u32,
    #[serde(with = "humantime_secs")]
    pub retry_initial_backoff: Duration,
    /// Age bound after which an unreconciled `OrphanResponse` is purged
    /// (§3 "Transient").
    #[serde(with = "humantime_secs")]
    pub orphan_max_age: Duration,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        VerifierConfig {
            tick_interval: Duration::from_secs(60),
            safety_depth: 32,
            page_size: 500,
            retry_attempts: 3,
            retry_initial_backoff: Duration::from_millis(200),
            orphan_max_age: Duration::from_secs(30 * 60),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub uri_queue: UriQueueConfig,
    pub verifier: VerifierConfig,
    /// Capacity of the `seen_collections` LRU cache used by the remote
    /// backend (§5).
    pub seen_collections_capacity: usize,
    /// Grace window `stop()` waits for the URI queue to drain before
    /// abandoning remaining jobs (§5).
    #[serde(with = "humantime_secs")]
    pub shutdown_grace: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            uri_queue: UriQueueConfig::default(),
            verifier: VerifierConfig::default(),
            seen_collections_capacity: 1000,
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

mod humantime_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.uri_queue.concurrency, 5);
        assert_eq!(cfg.uri_queue.queue_capacity, 100);
        assert_eq!(cfg.seen_collections_capacity, 1000);
        assert_eq!(cfg.verifier.tick_interval, Duration::from_secs(60));
        assert_eq!(cfg.verifier.orphan_max_age, Duration::from_secs(1800));
    }

    #[test]
    fn round_trips_through_json() {
        let cfg = EngineConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.uri_queue.concurrency, cfg.uri_queue.concurrency);
    }
}
