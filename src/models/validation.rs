// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::types::VerificationStatus;

/// §3 "Validation", identified by `(agent_id, validator, nonce)`. Response
/// fields are nullable and may be filled before the request fields exist
/// (upsert semantics, §4.C `ValidationResponded`).
#[derive(Debug, Clone, PartialEq)]
pub struct Validation {
    pub agent_id: String,
    pub validator: String,
    pub nonce: u64,
    pub requester: Option<String>,
    pub request_uri: Option<String>,
    pub request_slot: Option<u64>,
    pub request_tx_signature: Option<String>,
    pub response_uri: Option<String>,
    pub response_code: Option<i32>,
    pub response_slot: Option<u64>,
    pub response_tx_signature: Option<String>,
    pub status: VerificationStatus,
}

/// Request-side fields only, written by `ValidationRequested` (§4.C: "on
/// conflict overwrite request-side fields — the backfill path").
#[derive(Debug, Clone)]
pub struct ValidationRequestPatch {
    pub request_uri: Option<String>,
    pub request_slot: u64,
    pub request_tx_signature: String,
}

/// Response-side fields only, written by `ValidationResponded`. On create,
/// the validator address is used as a best-guess requester and the response
/// tx as a request-signature placeholder (§4.C).
#[derive(Debug, Clone)]
pub struct ValidationResponsePatch {
    pub response_uri: Option<String>,
    pub response_code: Option<i32>,
    pub response_slot: u64,
    pub response_tx_signature: String,
}
