// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::types::{Sha256Hash, VerificationStatus};

/// §3 "Feedback", identified by `(agent_id, client, feedback_index)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Feedback {
    pub id: i64,
    pub agent_id: String,
    pub client: String,
    pub feedback_index: u64,
    pub value: String,
    pub value_decimals: i32,
    pub score: Option<i32>,
    pub tag1: Option<String>,
    pub tag2: Option<String>,
    pub endpoint: Option<String>,
    pub feedback_uri: Option<String>,
    pub feedback_hash: Sha256Hash,
    pub running_digest: Option<Vec<u8>>,
    pub revoked: bool,
    pub revoked_tx_signature: Option<String>,
    pub revoked_slot: Option<u64>,
    pub status: VerificationStatus,
    pub created_slot: u64,
    pub tx_index: Option<u32>,
}

/// §3 "FeedbackResponse", identified by `(feedback_id, responder, tx_signature)`.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedbackResponse {
    pub feedback_id: i64,
    pub responder: String,
    pub tx_signature: String,
    pub response_uri: Option<String>,
    pub response_hash: Sha256Hash,
    pub running_digest: Option<Vec<u8>>,
    pub slot: u64,
    pub status: VerificationStatus,
}

/// §3 "OrphanResponse" — transient, reconciled by a later `NewFeedback` or
/// purged after an age bound (default 30 minutes, §3).
#[derive(Debug, Clone, PartialEq)]
pub struct OrphanResponse {
    pub id: i64,
    pub agent_id: String,
    pub client: String,
    pub feedback_index: u64,
    pub responder: String,
    pub tx_signature: String,
    pub response_uri: Option<String>,
    pub response_hash: Sha256Hash,
    pub running_digest: Option<Vec<u8>>,
    pub slot: u64,
    pub created_at: i64,
}

/// §3 "Revocation" — a snapshot of a revoke event, stored whether or not
/// the feedback it refers to exists.
#[derive(Debug, Clone, PartialEq)]
pub struct Revocation {
    pub agent_id: String,
    pub client: String,
    pub feedback_index: u64,
    pub tx_signature: String,
    pub slot: u64,
}
