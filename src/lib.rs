// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Event-ingestion engine for an agent-registry on-chain program: normalizes
//! a stream of decoded program events into a relational model of agents,
//! registries, feedback, responses, revocations, and validations, and
//! persists that model with at-least-once, reorg-tolerant semantics.
//!
//! [`engine::Engine`] is the entry point a caller constructs once and holds
//! for the process lifetime: [`engine::Engine::ingest`] drives the atomic
//! ingestion loop, [`engine::Engine::start_verifier`] starts the background
//! verification worker, and [`engine::Engine::stop`] tears both down
//! without leaking background tasks.

pub mod cache;
pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod errors;
pub mod ingestion;
pub mod metrics;
pub mod models;
pub mod rpc;
pub mod schema;
pub mod store;
pub mod types;
pub mod uri_queue;
pub mod valuefmt;
pub mod verifier;

pub use engine::Engine;
pub use errors::{IndexerError, Result};
pub use types::{Event, EventContext, EventKind, EventSource};
