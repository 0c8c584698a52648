// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! The "Local" backend (§4.A.2): a single `SqliteConnection` behind a
//! connection-per-call mutex, transactions managed with explicit
//! `BEGIN`/`COMMIT`/`ROLLBACK` so a [`StoreTx`] can be held open across the
//! multiple independent async calls a handler makes within one transaction
//! (§5 "transactions must be held open across those suspensions"). Because
//! this backend never has more than one connection, every query here runs
//! synchronously inside the async fn body rather than via
//! `spawn_blocking` — there is no second connection it could contend with.

use super::{EntityKind, PendingRow, Store, StoreTx};
use crate::errors::{IndexerError, Result};
use crate::models::{
    Agent, AgentCreate, AgentMetadata, AgentPatch, Feedback, IndexerCursor, OrphanResponse,
    Registry, Revocation, Validation, ValidationRequestPatch, ValidationResponsePatch,
};
use crate::schema::{
    agent_metadata, agents, feedback, feedback_responses, indexer_cursor, orphan_responses,
    registries, revocations, validations,
};
use crate::types::{EventSource, Sha256Hash, VerificationStatus};
use async_trait::async_trait;
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

pub struct EmbeddedStore {
    conn: Arc<Mutex<SqliteConnection>>,
}

impl EmbeddedStore {
    pub fn open(database_url: &str) -> Result<Self> {
        let mut conn = SqliteConnection::establish(database_url).map_err(IndexerError::store)?;
        run_migrations(&mut conn)?;
        Ok(EmbeddedStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::open(":memory:")
    }
}

const MIGRATIONS: diesel_migrations::EmbeddedMigrations =
    diesel_migrations::embed_migrations!("migrations/sqlite");

fn run_migrations(conn: &mut SqliteConnection) -> Result<()> {
    use diesel_migrations::MigrationHarness;
    conn.run_pending_migrations(MIGRATIONS)
        .map(|_| ())
        .map_err(|e| IndexerError::Store(e.to_string()))
}

#[async_trait]
impl Store for EmbeddedStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx + Send + '_>> {
        let mut guard = self.conn.clone().lock_owned().await;
        guard.batch_execute("BEGIN").map_err(IndexerError::store)?;
        Ok(Box::new(EmbeddedTx { conn: guard }))
    }

    async fn read_cursor(&self) -> Result<Option<IndexerCursor>> {
        let mut guard = self.conn.clone().lock_owned().await;
        read_cursor(&mut guard)
    }

    async fn page_pending(
        &self,
        kind: EntityKind,
        cutoff_slot: u64,
        page_size: u32,
        after_key: Option<String>,
    ) -> Result<Vec<PendingRow>> {
        let mut guard = self.conn.clone().lock_owned().await;
        page_pending_sync(&mut guard, kind, cutoff_slot, page_size, after_key)
    }

    async fn set_status(
        &self,
        kind: EntityKind,
        ids: &[String],
        status: VerificationStatus,
        verified_at: Option<i64>,
        verified_slot: Option<u64>,
    ) -> Result<()> {
        let mut guard = self.conn.clone().lock_owned().await;
        set_status_sync(&mut guard, kind, ids, status, verified_at, verified_slot)
    }

    async fn agent_status(&self, asset: &str) -> Result<Option<VerificationStatus>> {
        let mut guard = self.conn.clone().lock_owned().await;
        let status: Option<String> = agents::table
            .filter(agents::asset.eq(asset))
            .select(agents::status)
            .first(&mut *guard)
            .optional()
            .map_err(IndexerError::store)?;
        Ok(status.and_then(|s| VerificationStatus::from_str(&s)))
    }

    async fn purge_orphans_older_than(&self, cutoff_unix_secs: i64) -> Result<usize> {
        let mut guard = self.conn.clone().lock_owned().await;
        diesel::delete(orphan_responses::table.filter(orphan_responses::created_at.lt(cutoff_unix_secs)))
            .execute(&mut *guard)
            .map_err(IndexerError::store)
    }
}

pub struct EmbeddedTx {
    conn: OwnedMutexGuard<SqliteConnection>,
}

#[async_trait]
impl StoreTx for EmbeddedTx {
    async fn upsert_agent(&mut self, create: AgentCreate, patch: AgentPatch) -> Result<bool> {
        let conn = &mut *self.conn;
        let existing: Option<String> = agents::table
            .filter(agents::asset.eq(&create.asset))
            .select(agents::asset)
            .first(conn)
            .optional()
            .map_err(IndexerError::store)?;

        if existing.is_none() {
            diesel::insert_into(agents::table)
                .values((
                    agents::asset.eq(&create.asset),
                    agents::owner.eq(&create.owner),
                    agents::uri.eq(&create.uri),
                    agents::collection.eq(&create.collection),
                    agents::registry.eq(&create.registry),
                    agents::atom_enabled.eq(create.atom_enabled),
                    agents::status.eq(VerificationStatus::Pending.as_str()),
                    agents::created_slot.eq(create.created_slot as i64),
                    agents::created_tx_signature.eq(&create.created_tx_signature),
                    agents::tx_index.eq(create.tx_index.map(|v| v as i32)),
                    agents::updated_at.eq(create.updated_at),
                ))
                .execute(conn)
                .map_err(IndexerError::store)?;
            return Ok(true);
        }

        apply_agent_patch(conn, &create.asset, patch)?;
        Ok(false)
    }

    async fn update_agent_fields(&mut self, asset: &str, patch: AgentPatch) -> Result<u64> {
        let conn = &mut *self.conn;
        Ok(apply_agent_patch(conn, asset, patch)? as u64)
    }

    async fn get_agent(&mut self, asset: &str) -> Result<Option<Agent>> {
        let conn = &mut *self.conn;
        get_agent_sync(conn, asset)
    }

    async fn upsert_metadata(
        &mut self,
        agent_id: &str,
        key: &str,
        value: Vec<u8>,
        immutable_new: bool,
        slot: u64,
        tx_signature: &str,
    ) -> Result<()> {
        let conn = &mut *self.conn;
        let current: Option<(i64, bool)> = agent_metadata::table
            .filter(agent_metadata::agent_id.eq(agent_id))
            .filter(agent_metadata::key.eq(key))
            .select((agent_metadata::id, agent_metadata::immutable))
            .first(conn)
            .optional()
            .map_err(IndexerError::store)?;

        match current {
            Some((_, true)) => Ok(()), // immutable: skip the update entirely (§4.A)
            Some((id, false)) => {
                diesel::update(agent_metadata::table.filter(agent_metadata::id.eq(id)))
                    .set((
                        agent_metadata::value.eq(value),
                        agent_metadata::immutable.eq(immutable_new),
                        agent_metadata::slot.eq(slot as i64),
                        agent_metadata::tx_signature.eq(tx_signature),
                    ))
                    .execute(conn)
                    .map_err(IndexerError::store)?;
                Ok(())
            }
            None => {
                diesel::insert_into(agent_metadata::table)
                    .values((
                        agent_metadata::agent_id.eq(agent_id),
                        agent_metadata::key.eq(key),
                        agent_metadata::value.eq(value),
                        agent_metadata::immutable.eq(immutable_new),
                        agent_metadata::slot.eq(slot as i64),
                        agent_metadata::tx_signature.eq(tx_signature),
                        agent_metadata::status.eq(VerificationStatus::Pending.as_str()),
                    ))
                    .execute(conn)
                    .map_err(IndexerError::store)?;
                Ok(())
            }
        }
    }

    async fn delete_metadata(&mut self, agent_id: &str, key: &str) -> Result<()> {
        let conn = &mut *self.conn;
        diesel::delete(
            agent_metadata::table
                .filter(agent_metadata::agent_id.eq(agent_id))
                .filter(agent_metadata::key.eq(key)),
        )
        .execute(conn)
        .map_err(IndexerError::store)?;
        Ok(())
    }

    async fn get_metadata(&mut self, agent_id: &str, key: &str) -> Result<Option<AgentMetadata>> {
        let conn = &mut *self.conn;
        let row: Option<(String, String, Vec<u8>, bool, i64, String, String)> = agent_metadata::table
            .filter(agent_metadata::agent_id.eq(agent_id))
            .filter(agent_metadata::key.eq(key))
            .select((
                agent_metadata::agent_id,
                agent_metadata::key,
                agent_metadata::value,
                agent_metadata::immutable,
                agent_metadata::slot,
                agent_metadata::tx_signature,
                agent_metadata::status,
            ))
            .first(conn)
            .optional()
            .map_err(IndexerError::store)?;
        Ok(row.map(
            |(agent_id, key, value, immutable, slot, tx_signature, status)| AgentMetadata {
                agent_id,
                key,
                value,
                immutable,
                slot: slot as u64,
                tx_signature,
                status: VerificationStatus::from_str(&status).unwrap_or(VerificationStatus::Pending),
            },
        ))
    }

    async fn upsert_registry(&mut self, registry: Registry) -> Result<()> {
        let conn = &mut *self.conn;
        let exists: Option<String> = registries::table
            .filter(registries::registry_id.eq(&registry.registry_id))
            .select(registries::registry_id)
            .first(conn)
            .optional()
            .map_err(IndexerError::store)?;
        if exists.is_some() {
            return Ok(()); // identity attributes are a no-op on conflict (§3)
        }
        diesel::insert_into(registries::table)
            .values((
                registries::registry_id.eq(&registry.registry_id),
                registries::collection.eq(&registry.collection),
                registries::registry_type.eq(registry.registry_type.as_str()),
                registries::authority.eq(&registry.authority),
                registries::status.eq(registry.status.as_str()),
                registries::slot.eq(registry.slot as i64),
                registries::tx_signature.eq(&registry.tx_signature),
            ))
            .execute(conn)
            .map_err(IndexerError::store)?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
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
    ) -> Result<Feedback> {
        let conn = &mut *self.conn;
        if let Some(row) = find_feedback_sync(conn, agent_id, client, feedback_index)? {
            return Ok(row);
        }
        diesel::insert_into(feedback::table)
            .values((
                feedback::agent_id.eq(agent_id),
                feedback::client.eq(client),
                feedback::feedback_index.eq(feedback_index as i64),
                feedback::value.eq(value),
                feedback::value_decimals.eq(value_decimals),
                feedback::score.eq(score),
                feedback::tag1.eq(tag1),
                feedback::tag2.eq(tag2),
                feedback::endpoint.eq(endpoint),
                feedback::feedback_uri.eq(feedback_uri),
                feedback::feedback_hash.eq(seal_hash.as_bytes().map(|b| b.to_vec())),
                feedback::running_digest.eq(running_digest),
                feedback::status.eq(VerificationStatus::Pending.as_str()),
                feedback::created_slot.eq(created_slot as i64),
                feedback::tx_index.eq(tx_index.map(|v| v as i32)),
            ))
            .execute(conn)
            .map_err(IndexerError::store)?;
        find_feedback_sync(conn, agent_id, client, feedback_index)?
            .ok_or_else(|| IndexerError::Store("feedback row vanished after insert".to_string()))
    }

    async fn find_feedback_by_natural_key(
        &mut self,
        agent_id: &str,
        client: &str,
        feedback_index: u64,
    ) -> Result<Option<Feedback>> {
        let conn = &mut *self.conn;
        find_feedback_sync(conn, agent_id, client, feedback_index)
    }

    async fn mark_feedback_revoked(
        &mut self,
        agent_id: &str,
        client: &str,
        feedback_index: u64,
        revoke_tx_signature: &str,
        revoke_slot: u64,
    ) -> Result<u64> {
        let conn = &mut *self.conn;
        let rows = diesel::update(
            feedback::table
                .filter(feedback::agent_id.eq(agent_id))
                .filter(feedback::client.eq(client))
                .filter(feedback::feedback_index.eq(feedback_index as i64)),
        )
        .set((
            feedback::revoked.eq(true),
            feedback::revoked_tx_signature.eq(revoke_tx_signature),
            feedback::revoked_slot.eq(revoke_slot as i64),
        ))
        .execute(conn)
        .map_err(IndexerError::store)?;
        Ok(rows as u64)
    }

    async fn set_feedback_status(
        &mut self,
        agent_id: &str,
        client: &str,
        feedback_index: u64,
        status: VerificationStatus,
    ) -> Result<()> {
        let conn = &mut *self.conn;
        diesel::update(
            feedback::table
                .filter(feedback::agent_id.eq(agent_id))
                .filter(feedback::client.eq(client))
                .filter(feedback::feedback_index.eq(feedback_index as i64)),
        )
        .set(feedback::status.eq(status.as_str()))
        .execute(conn)
        .map_err(IndexerError::store)?;
        Ok(())
    }

    async fn upsert_revocation(&mut self, revocation: Revocation) -> Result<()> {
        let conn = &mut *self.conn;
        let exists: Option<i64> = revocations::table
            .filter(revocations::agent_id.eq(&revocation.agent_id))
            .filter(revocations::client.eq(&revocation.client))
            .filter(revocations::feedback_index.eq(revocation.feedback_index as i64))
            .select(revocations::id)
            .first(conn)
            .optional()
            .map_err(IndexerError::store)?;
        if exists.is_some() {
            return Ok(());
        }
        diesel::insert_into(revocations::table)
            .values((
                revocations::agent_id.eq(&revocation.agent_id),
                revocations::client.eq(&revocation.client),
                revocations::feedback_index.eq(revocation.feedback_index as i64),
                revocations::tx_signature.eq(&revocation.tx_signature),
                revocations::slot.eq(revocation.slot as i64),
            ))
            .execute(conn)
            .map_err(IndexerError::store)?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
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
    ) -> Result<()> {
        let conn = &mut *self.conn;
        let exists: Option<i64> = feedback_responses::table
            .filter(feedback_responses::feedback_id.eq(feedback_id))
            .filter(feedback_responses::responder.eq(responder))
            .filter(feedback_responses::tx_signature.eq(tx_signature))
            .select(feedback_responses::id)
            .first(conn)
            .optional()
            .map_err(IndexerError::store)?;
        if exists.is_some() {
            return Ok(());
        }
        diesel::insert_into(feedback_responses::table)
            .values((
                feedback_responses::feedback_id.eq(feedback_id),
                feedback_responses::responder.eq(responder),
                feedback_responses::tx_signature.eq(tx_signature),
                feedback_responses::response_uri.eq(response_uri),
                feedback_responses::response_hash.eq(response_hash.as_bytes().map(|b| b.to_vec())),
                feedback_responses::running_digest.eq(running_digest),
                feedback_responses::slot.eq(slot as i64),
                feedback_responses::status.eq(status.as_str()),
            ))
            .execute(conn)
            .map_err(IndexerError::store)?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
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
    ) -> Result<()> {
        let conn = &mut *self.conn;
        let exists: Option<i64> = orphan_responses::table
            .filter(orphan_responses::agent_id.eq(agent_id))
            .filter(orphan_responses::client.eq(client))
            .filter(orphan_responses::feedback_index.eq(feedback_index as i64))
            .filter(orphan_responses::responder.eq(responder))
            .filter(orphan_responses::tx_signature.eq(tx_signature))
            .select(orphan_responses::id)
            .first(conn)
            .optional()
            .map_err(IndexerError::store)?;
        if exists.is_some() {
            return Ok(());
        }
        diesel::insert_into(orphan_responses::table)
            .values((
                orphan_responses::agent_id.eq(agent_id),
                orphan_responses::client.eq(client),
                orphan_responses::feedback_index.eq(feedback_index as i64),
                orphan_responses::responder.eq(responder),
                orphan_responses::tx_signature.eq(tx_signature),
                orphan_responses::response_uri.eq(response_uri),
                orphan_responses::response_hash.eq(response_hash.as_bytes().map(|b| b.to_vec())),
                orphan_responses::running_digest.eq(running_digest),
                orphan_responses::slot.eq(slot as i64),
                orphan_responses::created_at.eq(created_at),
            ))
            .execute(conn)
            .map_err(IndexerError::store)?;
        Ok(())
    }

    async fn find_orphan_responses(
        &mut self,
        agent_id: &str,
        client: &str,
        feedback_index: u64,
    ) -> Result<Vec<OrphanResponse>> {
        let conn = &mut *self.conn;
        #[allow(clippy::type_complexity)]
        let rows: Vec<(
            i64,
            String,
            String,
            i64,
            String,
            String,
            Option<String>,
            Option<Vec<u8>>,
            Option<Vec<u8>>,
            i64,
            i64,
        )> = orphan_responses::table
            .filter(orphan_responses::agent_id.eq(agent_id))
            .filter(orphan_responses::client.eq(client))
            .filter(orphan_responses::feedback_index.eq(feedback_index as i64))
            .order(orphan_responses::id.asc())
            .select((
                orphan_responses::id,
                orphan_responses::agent_id,
                orphan_responses::client,
                orphan_responses::feedback_index,
                orphan_responses::responder,
                orphan_responses::tx_signature,
                orphan_responses::response_uri,
                orphan_responses::response_hash,
                orphan_responses::running_digest,
                orphan_responses::slot,
                orphan_responses::created_at,
            ))
            .load(conn)
            .map_err(IndexerError::store)?;
        Ok(rows
            .into_iter()
            .map(
                |(
                    id,
                    agent_id,
                    client,
                    feedback_index,
                    responder,
                    tx_signature,
                    response_uri,
                    response_hash,
                    running_digest,
                    slot,
                    created_at,
                )| OrphanResponse {
                    id,
                    agent_id,
                    client,
                    feedback_index: feedback_index as u64,
                    responder,
                    tx_signature,
                    response_uri,
                    response_hash: bytes_to_hash(response_hash),
                    running_digest,
                    slot: slot as u64,
                    created_at,
                },
            )
            .collect())
    }

    async fn delete_orphan_response(&mut self, id: i64) -> Result<()> {
        let conn = &mut *self.conn;
        diesel::delete(orphan_responses::table.filter(orphan_responses::id.eq(id)))
            .execute(conn)
            .map_err(IndexerError::store)?;
        Ok(())
    }

    async fn upsert_validation_request(
        &mut self,
        agent_id: &str,
        validator: &str,
        nonce: u64,
        patch: ValidationRequestPatch,
    ) -> Result<()> {
        let conn = &mut *self.conn;
        let existing: Option<i64> = validations::table
            .filter(validations::agent_id.eq(agent_id))
            .filter(validations::validator.eq(validator))
            .filter(validations::nonce.eq(nonce as i64))
            .select(validations::id)
            .first(conn)
            .optional()
            .map_err(IndexerError::store)?;
        match existing {
            Some(id) => {
                diesel::update(validations::table.filter(validations::id.eq(id)))
                    .set((
                        validations::requester.eq(validator),
                        validations::request_uri.eq(&patch.request_uri),
                        validations::request_slot.eq(patch.request_slot as i64),
                        validations::request_tx_signature.eq(&patch.request_tx_signature),
                    ))
                    .execute(conn)
                    .map_err(IndexerError::store)?;
            }
            None => {
                diesel::insert_into(validations::table)
                    .values((
                        validations::agent_id.eq(agent_id),
                        validations::validator.eq(validator),
                        validations::nonce.eq(nonce as i64),
                        validations::requester.eq(validator),
                        validations::request_uri.eq(&patch.request_uri),
                        validations::request_slot.eq(patch.request_slot as i64),
                        validations::request_tx_signature.eq(&patch.request_tx_signature),
                        validations::status.eq(VerificationStatus::Pending.as_str()),
                    ))
                    .execute(conn)
                    .map_err(IndexerError::store)?;
            }
        }
        Ok(())
    }

    async fn upsert_validation_response(
        &mut self,
        agent_id: &str,
        validator: &str,
        nonce: u64,
        patch: ValidationResponsePatch,
    ) -> Result<()> {
        let conn = &mut *self.conn;
        let existing: Option<i64> = validations::table
            .filter(validations::agent_id.eq(agent_id))
            .filter(validations::validator.eq(validator))
            .filter(validations::nonce.eq(nonce as i64))
            .select(validations::id)
            .first(conn)
            .optional()
            .map_err(IndexerError::store)?;
        match existing {
            Some(id) => {
                diesel::update(validations::table.filter(validations::id.eq(id)))
                    .set((
                        validations::response_uri.eq(&patch.response_uri),
                        validations::response_code.eq(patch.response_code),
                        validations::response_slot.eq(patch.response_slot as i64),
                        validations::response_tx_signature.eq(&patch.response_tx_signature),
                    ))
                    .execute(conn)
                    .map_err(IndexerError::store)?;
            }
            None => {
                diesel::insert_into(validations::table)
                    .values((
                        validations::agent_id.eq(agent_id),
                        validations::validator.eq(validator),
                        validations::nonce.eq(nonce as i64),
                        validations::requester.eq(validator),
                        validations::request_tx_signature.eq(&patch.response_tx_signature),
                        validations::response_uri.eq(&patch.response_uri),
                        validations::response_code.eq(patch.response_code),
                        validations::response_slot.eq(patch.response_slot as i64),
                        validations::response_tx_signature.eq(&patch.response_tx_signature),
                        validations::status.eq(VerificationStatus::Pending.as_str()),
                    ))
                    .execute(conn)
                    .map_err(IndexerError::store)?;
            }
        }
        Ok(())
    }

    async fn get_validation(
        &mut self,
        agent_id: &str,
        validator: &str,
        nonce: u64,
    ) -> Result<Option<Validation>> {
        let conn = &mut *self.conn;
        #[allow(clippy::type_complexity)]
        let row: Option<(
            String,
            String,
            i64,
            Option<String>,
            Option<String>,
            Option<i64>,
            Option<String>,
            Option<String>,
            Option<i32>,
            Option<i64>,
            Option<String>,
            String,
        )> = validations::table
            .filter(validations::agent_id.eq(agent_id))
            .filter(validations::validator.eq(validator))
            .filter(validations::nonce.eq(nonce as i64))
            .select((
                validations::agent_id,
                validations::validator,
                validations::nonce,
                validations::requester,
                validations::request_uri,
                validations::request_slot,
                validations::request_tx_signature,
                validations::response_uri,
                validations::response_code,
                validations::response_slot,
                validations::response_tx_signature,
                validations::status,
            ))
            .first(conn)
            .optional()
            .map_err(IndexerError::store)?;
        Ok(row.map(
            |(
                agent_id,
                validator,
                nonce,
                requester,
                request_uri,
                request_slot,
                request_tx_signature,
                response_uri,
                response_code,
                response_slot,
                response_tx_signature,
                status,
            )| Validation {
                agent_id,
                validator,
                nonce: nonce as u64,
                requester,
                request_uri,
                request_slot: request_slot.map(|v| v as u64),
                request_tx_signature,
                response_uri,
                response_code,
                response_slot: response_slot.map(|v| v as u64),
                response_tx_signature,
                status: VerificationStatus::from_str(&status).unwrap_or(VerificationStatus::Pending),
            },
        ))
    }

    async fn upsert_cursor_monotonic(&mut self, cursor: IndexerCursor) -> Result<bool> {
        let conn = &mut *self.conn;
        let stored = read_cursor(conn)?;
        if let Some(stored) = &stored {
            if stored.last_slot >= cursor.last_slot {
                return Ok(false);
            }
        }
        match stored {
            Some(_) => {
                diesel::update(
                    indexer_cursor::table.filter(indexer_cursor::id.eq(IndexerCursor::MAIN_ID)),
                )
                .set((
                    indexer_cursor::last_slot.eq(cursor.last_slot as i64),
                    indexer_cursor::last_signature.eq(&cursor.last_signature),
                    indexer_cursor::source.eq(cursor.source.as_str()),
                ))
                .execute(conn)
                .map_err(IndexerError::store)?;
            }
            None => {
                diesel::insert_into(indexer_cursor::table)
                    .values((
                        indexer_cursor::id.eq(IndexerCursor::MAIN_ID),
                        indexer_cursor::last_slot.eq(cursor.last_slot as i64),
                        indexer_cursor::last_signature.eq(&cursor.last_signature),
                        indexer_cursor::source.eq(cursor.source.as_str()),
                    ))
                    .execute(conn)
                    .map_err(IndexerError::store)?;
            }
        }
        Ok(true)
    }

    async fn commit(mut self: Box<Self>) -> Result<()> {
        self.conn.batch_execute("COMMIT").map_err(IndexerError::store)
    }

    async fn rollback(mut self: Box<Self>) -> Result<()> {
        self.conn.batch_execute("ROLLBACK").map_err(IndexerError::store)
    }
}

fn apply_agent_patch(conn: &mut SqliteConnection, asset: &str, patch: AgentPatch) -> Result<usize> {
    diesel::update(agents::table.filter(agents::asset.eq(asset)))
        .set(AgentPatchChangeset {
            owner: patch.owner,
            uri: patch.uri,
            wallet: patch.wallet,
            collection: patch.collection,
            registry: patch.registry,
            atom_enabled: patch.atom_enabled,
            nft_name: patch.nft_name,
            updated_at: patch.updated_at,
        })
        .execute(conn)
        .map_err(IndexerError::store)
}

/// A `Changeset`-style struct so every `Option<T>` field in [`AgentPatch`]
/// is applied only when present, leaving the stored value untouched
/// otherwise (diesel's `AsChangeset` skips `None` fields automatically).
#[derive(AsChangeset)]
#[diesel(table_name = agents)]
struct AgentPatchChangeset {
    owner: Option<String>,
    uri: Option<String>,
    wallet: Option<Option<String>>,
    collection: Option<String>,
    registry: Option<String>,
    atom_enabled: Option<bool>,
    nft_name: Option<String>,
    updated_at: i64,
}

fn read_cursor(conn: &mut SqliteConnection) -> Result<Option<IndexerCursor>> {
    let row: Option<(String, i64, String, String)> = indexer_cursor::table
        .filter(indexer_cursor::id.eq(IndexerCursor::MAIN_ID))
        .select((
            indexer_cursor::id,
            indexer_cursor::last_slot,
            indexer_cursor::last_signature,
            indexer_cursor::source,
        ))
        .first(conn)
        .optional()
        .map_err(IndexerError::store)?;
    Ok(row.map(|(id, last_slot, last_signature, source)| IndexerCursor {
        id,
        last_slot: last_slot as u64,
        last_signature,
        source: if source == EventSource::Websocket.as_str() {
            EventSource::Websocket
        } else {
            EventSource::Poller
        },
    }))
}

fn get_agent_sync(conn: &mut SqliteConnection, asset: &str) -> Result<Option<Agent>> {
    #[allow(clippy::type_complexity)]
    let row: Option<(
        String,
        String,
        String,
        Option<String>,
        String,
        String,
        bool,
        Option<String>,
        String,
        i64,
        String,
        Option<i32>,
        Option<i64>,
        Option<i64>,
        i64,
    )> = agents::table
        .filter(agents::asset.eq(asset))
        .select((
            agents::asset,
            agents::owner,
            agents::uri,
            agents::wallet,
            agents::collection,
            agents::registry,
            agents::atom_enabled,
            agents::nft_name,
            agents::status,
            agents::created_slot,
            agents::created_tx_signature,
            agents::tx_index,
            agents::verified_at,
            agents::verified_slot,
            agents::updated_at,
        ))
        .first(conn)
        .optional()
        .map_err(IndexerError::store)?;
    Ok(row.map(
        |(
            asset,
            owner,
            uri,
            wallet,
            collection,
            registry,
            atom_enabled,
            nft_name,
            status,
            created_slot,
            created_tx_signature,
            tx_index,
            verified_at,
            verified_slot,
            updated_at,
        )| Agent {
            asset,
            owner,
            uri,
            wallet,
            collection,
            registry,
            atom_enabled,
            nft_name,
            status: VerificationStatus::from_str(&status).unwrap_or(VerificationStatus::Pending),
            created_slot: created_slot as u64,
            created_tx_signature,
            tx_index: tx_index.map(|v| v as u32),
            verified_at,
            verified_slot: verified_slot.map(|v| v as u64),
            updated_at,
        },
    ))
}

fn find_feedback_sync(
    conn: &mut SqliteConnection,
    agent_id: &str,
    client: &str,
    feedback_index: u64,
) -> Result<Option<Feedback>> {
    #[allow(clippy::type_complexity)]
    let row: Option<(
        i64,
        String,
        String,
        i64,
        String,
        i32,
        Option<i32>,
        Option<String>,
        Option<String>,
        Option<String>,
        Option<String>,
        Option<Vec<u8>>,
        Option<Vec<u8>>,
        bool,
        Option<String>,
        Option<i64>,
        String,
        i64,
        Option<i32>,
    )> = feedback::table
        .filter(feedback::agent_id.eq(agent_id))
        .filter(feedback::client.eq(client))
        .filter(feedback::feedback_index.eq(feedback_index as i64))
        .select((
            feedback::id,
            feedback::agent_id,
            feedback::client,
            feedback::feedback_index,
            feedback::value,
            feedback::value_decimals,
            feedback::score,
            feedback::tag1,
            feedback::tag2,
            feedback::endpoint,
            feedback::feedback_uri,
            feedback::feedback_hash,
            feedback::running_digest,
            feedback::revoked,
            feedback::revoked_tx_signature,
            feedback::revoked_slot,
            feedback::status,
            feedback::created_slot,
            feedback::tx_index,
        ))
        .first(conn)
        .optional()
        .map_err(IndexerError::store)?;
    Ok(row.map(
        |(
            id,
            agent_id,
            client,
            feedback_index,
            value,
            value_decimals,
            score,
            tag1,
            tag2,
            endpoint,
            feedback_uri,
            feedback_hash,
            running_digest,
            revoked,
            revoked_tx_signature,
            revoked_slot,
            status,
            created_slot,
            tx_index,
        )| Feedback {
            id,
            agent_id,
            client,
            feedback_index: feedback_index as u64,
            value,
            value_decimals,
            score,
            tag1,
            tag2,
            endpoint,
            feedback_uri,
            feedback_hash: bytes_to_hash(feedback_hash),
            running_digest,
            revoked,
            revoked_tx_signature,
            revoked_slot: revoked_slot.map(|v| v as u64),
            status: VerificationStatus::from_str(&status).unwrap_or(VerificationStatus::Pending),
            created_slot: created_slot as u64,
            tx_index: tx_index.map(|v| v as u32),
        },
    ))
}

fn bytes_to_hash(bytes: Option<Vec<u8>>) -> Sha256Hash {
    match bytes {
        Some(b) if b.len() == 32 => {
            let mut arr = [0u8; 32];
            arr.copy_from_slice(&b);
            Sha256Hash::from_bytes(arr)
        }
        _ => Sha256Hash(None),
    }
}

fn page_pending_sync(
    conn: &mut SqliteConnection,
    kind: EntityKind,
    cutoff_slot: u64,
    page_size: u32,
    after_key: Option<String>,
) -> Result<Vec<PendingRow>> {
    let cutoff = cutoff_slot as i64;
    let limit = page_size as i64;
    let after_id: i64 = after_key.as_deref().and_then(|k| k.parse().ok()).unwrap_or(0);
    match kind {
        EntityKind::Agent => {
            let after_asset = after_key.clone().unwrap_or_default();
            let rows: Vec<String> = agents::table
                .filter(agents::status.eq(VerificationStatus::Pending.as_str()))
                .filter(agents::created_slot.le(cutoff))
                .filter(agents::asset.gt(after_asset))
                .order(agents::asset.asc())
                .limit(limit)
                .select(agents::asset)
                .load(conn)
                .map_err(IndexerError::store)?;
            Ok(rows
                .into_iter()
                .map(|asset| PendingRow {
                    id: asset.clone(),
                    created_slot: cutoff_slot,
                    pda: Some(asset),
                    parent_agent: None,
                    parent_feedback_orphaned: None,
                })
                .collect())
        }
        EntityKind::Registry => {
            let after_id = after_key.clone().unwrap_or_default();
            let rows: Vec<String> = registries::table
                .filter(registries::status.eq(VerificationStatus::Pending.as_str()))
                .filter(registries::slot.le(cutoff))
                .filter(registries::registry_id.gt(after_id))
                .order(registries::registry_id.asc())
                .limit(limit)
                .select(registries::registry_id)
                .load(conn)
                .map_err(IndexerError::store)?;
            Ok(rows
                .into_iter()
                .map(|registry_id| PendingRow {
                    id: registry_id.clone(),
                    created_slot: cutoff_slot,
                    pda: Some(registry_id),
                    parent_agent: None,
                    parent_feedback_orphaned: None,
                })
                .collect())
        }
        EntityKind::AgentMetadata => {
            let rows: Vec<(i64, String, String)> = agent_metadata::table
                .filter(agent_metadata::status.eq(VerificationStatus::Pending.as_str()))
                .filter(agent_metadata::slot.le(cutoff))
                .filter(agent_metadata::id.gt(after_id))
                .order(agent_metadata::id.asc())
                .limit(limit)
                .select((agent_metadata::id, agent_metadata::agent_id, agent_metadata::key))
                .load(conn)
                .map_err(IndexerError::store)?;
            Ok(rows
                .into_iter()
                .map(|(id, agent_id, key)| {
                    let uri_derived = key.starts_with(crate::models::metadata::URI_KEY_PREFIX);
                    PendingRow {
                        id: id.to_string(),
                        created_slot: cutoff_slot,
                        pda: if uri_derived { None } else { Some(agent_id.clone()) },
                        parent_agent: if uri_derived { Some(agent_id) } else { None },
                        parent_feedback_orphaned: None,
                    }
                })
                .collect())
        }
        EntityKind::Feedback => {
            let rows: Vec<(i64, String, i64)> = feedback::table
                .filter(feedback::status.eq(VerificationStatus::Pending.as_str()))
                .filter(feedback::created_slot.le(cutoff))
                .filter(feedback::id.gt(after_id))
                .order(feedback::id.asc())
                .limit(limit)
                .select((feedback::id, feedback::agent_id, feedback::id))
                .load(conn)
                .map_err(IndexerError::store)?;
            Ok(rows
                .into_iter()
                .map(|(id, agent_id, _)| PendingRow {
                    id: id.to_string(),
                    created_slot: cutoff_slot,
                    pda: None,
                    parent_agent: Some(agent_id),
                    parent_feedback_orphaned: None,
                })
                .collect())
        }
        EntityKind::FeedbackResponse => {
            #[allow(clippy::type_complexity)]
            let rows: Vec<(i64, String, String)> = feedback_responses::table
                .inner_join(feedback::table.on(feedback::id.eq(feedback_responses::feedback_id)))
                .filter(feedback_responses::status.eq(VerificationStatus::Pending.as_str()))
                .filter(feedback_responses::slot.le(cutoff))
                .filter(feedback_responses::id.gt(after_id))
                .order(feedback_responses::id.asc())
                .limit(limit)
                .select((feedback_responses::id, feedback::agent_id, feedback::status))
                .load(conn)
                .map_err(IndexerError::store)?;
            Ok(rows
                .into_iter()
                .map(|(id, agent_id, feedback_status)| PendingRow {
                    id: id.to_string(),
                    created_slot: cutoff_slot,
                    pda: None,
                    parent_agent: Some(agent_id),
                    parent_feedback_orphaned: Some(feedback_status == VerificationStatus::Orphaned.as_str()),
                })
                .collect())
        }
        EntityKind::Validation => {
            let rows: Vec<(i64, String)> = validations::table
                .filter(validations::status.eq(VerificationStatus::Pending.as_str()))
                .filter(validations::request_slot.le(Some(cutoff)))
                .filter(validations::id.gt(after_id))
                .order(validations::id.asc())
                .limit(limit)
                .select((validations::id, validations::agent_id))
                .load(conn)
                .map_err(IndexerError::store)?;
            Ok(rows
                .into_iter()
                .map(|(id, agent_id)| PendingRow {
                    id: id.to_string(),
                    created_slot: cutoff_slot,
                    pda: Some(agent_id),
                    parent_agent: None,
                    parent_feedback_orphaned: None,
                })
                .collect())
        }
    }
}

fn set_status_sync(
    conn: &mut SqliteConnection,
    kind: EntityKind,
    ids: &[String],
    status: VerificationStatus,
    verified_at: Option<i64>,
    verified_slot: Option<u64>,
) -> Result<()> {
    let verified_slot = verified_slot.map(|v| v as i64);
    match kind {
        EntityKind::Agent => {
            diesel::update(agents::table.filter(agents::asset.eq_any(ids)))
                .set((
                    agents::status.eq(status.as_str()),
                    agents::verified_at.eq(verified_at),
                    agents::verified_slot.eq(verified_slot),
                ))
                .execute(conn)
                .map_err(IndexerError::store)?;
        }
        EntityKind::Registry => {
            diesel::update(registries::table.filter(registries::registry_id.eq_any(ids)))
                .set(registries::status.eq(status.as_str()))
                .execute(conn)
                .map_err(IndexerError::store)?;
        }
        EntityKind::AgentMetadata => {
            let ids: Vec<i64> = ids.iter().filter_map(|s| s.parse().ok()).collect();
            diesel::update(agent_metadata::table.filter(agent_metadata::id.eq_any(ids)))
                .set(agent_metadata::status.eq(status.as_str()))
                .execute(conn)
                .map_err(IndexerError::store)?;
        }
        EntityKind::Feedback => {
            let ids: Vec<i64> = ids.iter().filter_map(|s| s.parse().ok()).collect();
            diesel::update(feedback::table.filter(feedback::id.eq_any(ids)))
                .set(feedback::status.eq(status.as_str()))
                .execute(conn)
                .map_err(IndexerError::store)?;
        }
        EntityKind::FeedbackResponse => {
            let ids: Vec<i64> = ids.iter().filter_map(|s| s.parse().ok()).collect();
            diesel::update(feedback_responses::table.filter(feedback_responses::id.eq_any(ids)))
                .set(feedback_responses::status.eq(status.as_str()))
                .execute(conn)
                .map_err(IndexerError::store)?;
        }
        EntityKind::Validation => {
            let ids: Vec<i64> = ids.iter().filter_map(|s| s.parse().ok()).collect();
            diesel::update(validations::table.filter(validations::id.eq_any(ids)))
                .set(validations::status.eq(status.as_str()))
                .execute(conn)
                .map_err(IndexerError::store)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AgentCreate;

    fn store() -> EmbeddedStore {
        EmbeddedStore::open_in_memory().expect("open sqlite")
    }

    #[tokio::test]
    async fn upsert_agent_then_patch_refreshes_uri() {
        let store = store();
        let mut tx = store.begin().await.unwrap();
        let create = AgentCreate {
            asset: "A".to_string(),
            owner: "O".to_string(),
            uri: "ipfs://one".to_string(),
            collection: "C".to_string(),
            registry: "R".to_string(),
            atom_enabled: false,
            created_slot: 10,
            created_tx_signature: "sig1".to_string(),
            tx_index: Some(0),
            updated_at: 1,
        };
        let mut patch = AgentPatch::empty(1);
        patch.uri = Some(create.uri.clone());
        tx.upsert_agent(create.clone(), patch).await.unwrap();

        let mut patch2 = AgentPatch::empty(2);
        patch2.uri = Some("ipfs://two".to_string());
        let mut create2 = create;
        create2.uri = "ipfs://two".to_string();
        tx.upsert_agent(create2, patch2).await.unwrap();

        let agent = tx.get_agent("A").await.unwrap().unwrap();
        assert_eq!(agent.uri, "ipfs://two");
        assert_eq!(agent.created_slot, 10);
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn immutable_metadata_rejects_later_update() {
        let store = store();
        let mut tx = store.begin().await.unwrap();
        tx.upsert_metadata("A", "k", vec![0x00, b'v', b'1'], true, 10, "sig1")
            .await
            .unwrap();
        tx.upsert_metadata("A", "k", vec![0x00, b'v', b'2'], false, 11, "sig2")
            .await
            .unwrap();
        let row = tx.get_metadata("A", "k").await.unwrap().unwrap();
        assert_eq!(row.value, vec![0x00, b'v', b'1']);
        assert!(row.immutable);
        assert_eq!(row.slot, 10);
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn cursor_rejects_non_advancing_slot() {
        let store = store();
        let mut tx = store.begin().await.unwrap();
        let advanced = tx
            .upsert_cursor_monotonic(IndexerCursor {
                id: IndexerCursor::MAIN_ID.to_string(),
                last_slot: 100,
                last_signature: "sigA".to_string(),
                source: EventSource::Poller,
            })
            .await
            .unwrap();
        assert!(advanced);
        let advanced = tx
            .upsert_cursor_monotonic(IndexerCursor {
                id: IndexerCursor::MAIN_ID.to_string(),
                last_slot: 50,
                last_signature: "sigB".to_string(),
                source: EventSource::Poller,
            })
            .await
            .unwrap();
        assert!(!advanced);
        tx.commit().await.unwrap();
    }
}
