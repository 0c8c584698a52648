// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! The Store Gateway (§4.A): one trait, two backends. Handlers (§4.C) and
//! the ingestion loop (§4.D) are written once against [`Store`] /
//! [`StoreTx`]; `postgres` ("Remote") and `embedded` ("Local") supply the
//! only backend-specific code, per the design note in §9 ("the source mixes
//! handler paths for embedded vs remote stores... the correct structure is a
//! single `Store` abstraction with two implementations").

pub mod embedded;
pub mod postgres;

use crate::errors::Result;
use crate::models::{
    Agent, AgentCreate, AgentPatch, AgentMetadata, Feedback, FeedbackResponse, IndexerCursor,
    OrphanResponse, Registry, Revocation, Validation, ValidationRequestPatch,
    ValidationResponsePatch,
};
use crate::types::{Sha256Hash, VerificationStatus};
use async_trait::async_trait;

/// The entity kinds the Verification Worker (§4.E) pages through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Agent,
    Registry,
    AgentMetadata,
    Feedback,
    FeedbackResponse,
    Validation,
}

/// A row returned by `page_pending`, carrying just enough identity and
/// parent-linkage for the verifier to decide a transition (§4.E).
#[derive(Debug, Clone)]
pub struct PendingRow {
    pub id: String,
    pub created_slot: u64,
    /// The PDA/account key the verifier should probe, when the kind uses
    /// direct on-chain presence (Agent/Registry/on-chain Metadata/Validation).
    pub pda: Option<String>,
    /// For Feedback/FeedbackResponse: the parent Agent's asset, used to look
    /// up the parent's current status instead of probing an account (§4.E).
    pub parent_agent: Option<String>,
    /// For FeedbackResponse only: whether the parent Feedback row is itself
    /// `Orphaned` (§4.E "orphan iff ... the parent Feedback is ORPHANED").
    pub parent_feedback_orphaned: Option<bool>,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn StoreTx + Send + '_>>;

    async fn read_cursor(&self) -> Result<Option<IndexerCursor>>;

    async fn page_pending(
        &self,
        kind: EntityKind,
        cutoff_slot: u64,
        page_size: u32,
        after_key: Option<String>,
    ) -> Result<Vec<PendingRow>>;

    async fn set_status(
        &self,
        kind: EntityKind,
        ids: &[String],
        status: VerificationStatus,
        verified_at: Option<i64>,
        verified_slot: Option<u64>,
    ) -> Result<()>;

    /// Looks up an Agent's current on-chain status, used by the verifier to
    /// finalize/orphan dependent Feedback and FeedbackResponse rows without
    /// a further RPC call (§4.E).
    async fn agent_status(&self, asset: &str) -> Result<Option<VerificationStatus>>;

    async fn purge_orphans_older_than(&self, cutoff_unix_secs: i64) -> Result<usize>;
}

#[async_trait]
pub trait StoreTx {
    async fn upsert_agent(&mut self, create: AgentCreate, patch: AgentPatch) -> Result<bool>;

    /// Returns the number of rows affected; `0` is not an error (§4.A).
    async fn update_agent_fields(&mut self, asset: &str, patch: AgentPatch) -> Result<u64>;

    async fn get_agent(&mut self, asset: &str) -> Result<Option<Agent>>;

    async fn upsert_metadata(
        &mut self,
        agent_id: &str,
        key: &str,
        value: Vec<u8>,
        immutable_new: bool,
        slot: u64,
        tx_signature: &str,
    ) -> Result<()>;

    async fn delete_metadata(&mut self, agent_id: &str, key: &str) -> Result<()>;

    async fn get_metadata(&mut self, agent_id: &str, key: &str) -> Result<Option<AgentMetadata>>;

    async fn upsert_registry(&mut self, registry: Registry) -> Result<()>;

    async fn upsert_feedback(
        &mut self,
        agent_id: &str,
        client: &str,
        feedback_index: u64,
        value: &str,
        value_decimals: i32,
        score: Option<i32>,
        tag1: Option<&str>,
        tag2: Option<&str>,
        endpoint: Option<&str>,
        feedback_uri: Option<&str>,
        seal_hash: Sha256Hash,
        running_digest: Option<Vec<u8>>,
        created_slot: u64,
        tx_index: Option<u32>,
    ) -> Result<Feedback>;

    async fn find_feedback_by_natural_key(
        &mut self,
        agent_id: &str,
        client: &str,
        feedback_index: u64,
    ) -> Result<Option<Feedback>>;

    async fn mark_feedback_revoked(
        &mut self,
        agent_id: &str,
        client: &str,
        feedback_index: u64,
        revoke_tx_signature: &str,
        revoke_slot: u64,
    ) -> Result<u64>;

    async fn set_feedback_status(
        &mut self,
        agent_id: &str,
        client: &str,
        feedback_index: u64,
        status: VerificationStatus,
    ) -> Result<()>;

    async fn upsert_revocation(&mut self, revocation: Revocation) -> Result<()>;

    async fn upsert_feedback_response(
        &mut self,
        feedback_id: i64,
        responder: &str,
        tx_signature: &str,
        response_uri: Option<&str>,
        response_hash: Sha256Hash,
        running_digest: Option<Vec<u8>>,
        slot: u64,
        status: VerificationStatus,
    ) -> Result<()>;

    async fn upsert_orphan_response(
        &mut self,
        agent_id: &str,
        client: &str,
        feedback_index: u64,
        responder: &str,
        tx_signature: &str,
        response_uri: Option<&str>,
        response_hash: Sha256Hash,
        running_digest: Option<Vec<u8>>,
        slot: u64,
        created_at: i64,
    ) -> Result<()>;

    async fn find_orphan_responses(
        &mut self,
        agent_id: &str,
        client: &str,
        feedback_index: u64,
    ) -> Result<Vec<OrphanResponse>>;

    async fn delete_orphan_response(&mut self, id: i64) -> Result<()>;

    async fn upsert_validation_request(
        &mut self,
        agent_id: &str,
        validator: &str,
        nonce: u64,
        patch: ValidationRequestPatch,
    ) -> Result<()>;

    async fn upsert_validation_response(
        &mut self,
        agent_id: &str,
        validator: &str,
        nonce: u64,
        patch: ValidationResponsePatch,
    ) -> Result<()>;

    #[allow(dead_code)]
    async fn get_validation(
        &mut self,
        agent_id: &str,
        validator: &str,
        nonce: u64,
    ) -> Result<Option<Validation>>;

    /// Rejects writes whose slot is `<=` the stored slot. Returns `true` if
    /// the cursor advanced, `false` on the no-op path (§4.A, §4.D, §8).
    async fn upsert_cursor_monotonic(&mut self, cursor: IndexerCursor) -> Result<bool>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}
