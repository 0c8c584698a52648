// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::types::EventSource;

/// §3 "IndexerCursor" — the single row (`id = "main"`) tracking ingestion
/// progress. `last_slot` is monotonically non-decreasing (§4.A, §8).
#[derive(Debug, Clone, PartialEq)]
pub struct IndexerCursor {
    pub id: String,
    pub last_slot: u64,
    pub last_signature: String,
    pub source: EventSource,
}

impl IndexerCursor {
    pub const MAIN_ID: &'static str = "main";
}
