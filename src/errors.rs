// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Error classification for the ingestion engine.
//!
//! Only the transient-transport and bug-class failures described in the
//! dispatcher design (store unavailable, RPC timeout, unknown event kind,
//! payload decode failure) surface as [`IndexerError`]. Duplicate/out-of-order
//! events and store-invariant violations are not errors at all: they are
//! recorded as warnings on [`crate::dispatcher::HandlerOutcome`] so the
//! enclosing transaction still commits.

use std::fmt;

#[derive(Debug, thiserror::Error)]
pub enum IndexerError {
    #[error("store error: {0}")]
    Store(String),

    #[error("rpc error: {0}")]
    Rpc(String),

    #[error("failed to decode event payload: {0}")]
    Decode(String),

    #[error("unknown event kind: {0}")]
    UnknownEventKind(String),

    #[error("cursor write rejected: stored slot {stored} >= incoming slot {incoming}")]
    CursorRegression { stored: u64, incoming: u64 },
}

impl IndexerError {
    pub fn store(err: impl fmt::Display) -> Self {
        IndexerError::Store(err.to_string())
    }

    pub fn rpc(err: impl fmt::Display) -> Self {
        IndexerError::Rpc(err.to_string())
    }
}

/// Mirrors the ergonomics of `anyhow::Context`, but targets [`IndexerError`]
/// so call sites at the store/RPC boundary can attach a static message
/// without pulling in `anyhow` as a public dependency of this crate's API.
pub trait Context<T> {
    fn context(self, msg: &'static str) -> Result<T, IndexerError>;
}

impl<T, E: fmt::Display> Context<T> for Result<T, E> {
    fn context(self, msg: &'static str) -> Result<T, IndexerError> {
        self.map_err(|e| IndexerError::Store(format!("{msg}: {e}")))
    }
}

pub type Result<T> = std::result::Result<T, IndexerError>;
