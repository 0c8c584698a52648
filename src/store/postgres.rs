// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! The "Remote" backend (§4.A.2): `diesel-async` over a `bb8` connection
//! pool. Transactions are managed the same way as the embedded backend
//! (explicit `BEGIN`/`COMMIT`/`ROLLBACK` issued against a held connection,
//! §5 "transactions must be held open across those suspensions") so
//! [`StoreTx`] needs no backend-specific protocol at the call site — only
//! the connection type and query execution differ between the two modules
//! (§9 "a single `Store` abstraction with two implementations").

use super::{EntityKind, PendingRow, Store, StoreTx};
use crate::cache::SeenCollections;
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
use bb8::Pool;
use diesel::prelude::*;
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::{AsyncPgConnection, RunQueryDsl, SimpleAsyncConnection};
use std::sync::Arc;

pub type PgPool = Pool<AsyncDieselConnectionManager<AsyncPgConnection>>;

pub struct PostgresStore {
    pool: PgPool,
    seen_collections: Arc<SeenCollections>,
}

impl PostgresStore {
    /// Connects a `bb8::Pool` sized to `concurrency + 4` (§4.A.3) and runs
    /// the embedded Postgres migrations before returning.
    pub async fn connect(database_url: &str, max_size: u32, seen_collections_capacity: usize) -> Result<Self> {
        let manager = AsyncDieselConnectionManager::<AsyncPgConnection>::new(database_url);
        let pool = Pool::builder()
            .max_size(max_size)
            .build(manager)
            .await
            .map_err(IndexerError::store)?;
        let store = PostgresStore {
            pool,
            seen_collections: Arc::new(SeenCollections::new(seen_collections_capacity)),
        };
        store.run_migrations(database_url).await?;
        Ok(store)
    }

    async fn run_migrations(&self, database_url: &str) -> Result<()> {
        // diesel_migrations' `MigrationHarness` is sync; run it on a
        // blocking thread against a short-lived sync connection so the
        // async pool above is never touched for this one-time setup step.
        let database_url = database_url.to_string();
        tokio::task::spawn_blocking(move || -> Result<()> {
            use diesel::Connection;
            use diesel_migrations::MigrationHarness;
            let mut conn = diesel::PgConnection::establish(&database_url).map_err(IndexerError::store)?;
            conn.run_pending_migrations(MIGRATIONS)
                .map_err(|e| IndexerError::Store(e.to_string()))?;
            Ok(())
        })
        .await
        .map_err(IndexerError::store)??;
        Ok(())
    }
}

const MIGRATIONS: diesel_migrations::EmbeddedMigrations =
    diesel_migrations::embed_migrations!("migrations/postgres");

#[async_trait]
impl Store for PostgresStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx + Send + '_>> {
        let mut conn = self.pool.get().await.map_err(IndexerError::store)?;
        conn.batch_execute("BEGIN").await.map_err(IndexerError::store)?;
        Ok(Box::new(PostgresTx {
            conn,
            seen_collections: self.seen_collections.clone(),
        }))
    }

    async fn read_cursor(&self) -> Result<Option<IndexerCursor>> {
        let mut conn = self.pool.get().await.map_err(IndexerError::store)?;
        read_cursor(&mut conn).await
    }

    async fn page_pending(
        &self,
        kind: EntityKind,
        cutoff_slot: u64,
        page_size: u32,
        after_key: Option<String>,
    ) -> Result<Vec<PendingRow>> {
        let mut conn = self.pool.get().await.map_err(IndexerError::store)?;
        page_pending_async(&mut conn, kind, cutoff_slot, page_size, after_key).await
    }

    async fn set_status(
        &self,
        kind: EntityKind,
        ids: &[String],
        status: VerificationStatus,
        verified_at: Option<i64>,
        verified_slot: Option<u64>,
    ) -> Result<()> {
        let mut conn = self.pool.get().await.map_err(IndexerError::store)?;
        set_status_async(&mut conn, kind, ids, status, verified_at, verified_slot).await
    }

    async fn agent_status(&self, asset: &str) -> Result<Option<VerificationStatus>> {
        let mut conn = self.pool.get().await.map_err(IndexerError::store)?;
        let status: Option<String> = agents::table
            .filter(agents::asset.eq(asset))
            .select(agents::status)
            .first(&mut conn)
            .await
            .optional()
            .map_err(IndexerError::store)?;
        Ok(status.and_then(|s| VerificationStatus::from_str(&s)))
    }

    async fn purge_orphans_older_than(&self, cutoff_unix_secs: i64) -> Result<usize> {
        let mut conn = self.pool.get().await.map_err(IndexerError::store)?;
        diesel::delete(orphan_responses::table.filter(orphan_responses::created_at.lt(cutoff_unix_secs)))
            .execute(&mut conn)
            .await
            .map_err(IndexerError::store)
    }
}

pub struct PostgresTx<'a> {
    conn: bb8::PooledConnection<'a, AsyncDieselConnectionManager<AsyncPgConnection>>,
    seen_collections: Arc<SeenCollections>,
}

#[async_trait]
impl<'a> StoreTx for PostgresTx<'a> {
    async fn upsert_agent(&mut self, create: AgentCreate, patch: AgentPatch) -> Result<bool> {
        let conn = &mut self.conn;
        let existing: Option<String> = agents::table
            .filter(agents::asset.eq(&create.asset))
            .select(agents::asset)
            .first(conn)
            .await
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
                .await
                .map_err(IndexerError::store)?;
            return Ok(true);
        }

        apply_agent_patch(conn, &create.asset, patch).await?;
        Ok(false)
    }

    async fn update_agent_fields(&mut self, asset: &str, patch: AgentPatch) -> Result<u64> {
        let conn = &mut self.conn;
        Ok(apply_agent_patch(conn, asset, patch).await? as u64)
    }

    async fn get_agent(&mut self, asset: &str) -> Result<Option<Agent>> {
        let conn = &mut self.conn;
        get_agent_async(conn, asset).await
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
        let conn = &mut self.conn;
        let current: Option<(i64, bool)> = agent_metadata::table
            .filter(agent_metadata::agent_id.eq(agent_id))
            .filter(agent_metadata::key.eq(key))
            .select((agent_metadata::id, agent_metadata::immutable))
            .first(conn)
            .await
            .optional()
            .map_err(IndexerError::store)?;

        match current {
            Some((_, true)) => Ok(()),
            Some((id, false)) => {
                diesel::update(agent_metadata::table.filter(agent_metadata::id.eq(id)))
                    .set((
                        agent_metadata::value.eq(value),
                        agent_metadata::immutable.eq(immutable_new),
                        agent_metadata::slot.eq(slot as i64),
                        agent_metadata::tx_signature.eq(tx_signature),
                    ))
                    .execute(conn)
                    .await
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
                    .await
                    .map_err(IndexerError::store)?;
                Ok(())
            }
        }
    }

    async fn delete_metadata(&mut self, agent_id: &str, key: &str) -> Result<()> {
        let conn = &mut self.conn;
        diesel::delete(
            agent_metadata::table
                .filter(agent_metadata::agent_id.eq(agent_id))
                .filter(agent_metadata::key.eq(key)),
        )
        .execute(conn)
        .await
        .map_err(IndexerError::store)?;
        Ok(())
    }

    async fn get_metadata(&mut self, agent_id: &str, key: &str) -> Result<Option<AgentMetadata>> {
        let conn = &mut self.conn;
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
            .await
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
        // §5 "a seen_collections LRU cache ... short-circuits repeated
        // collection inserts in the remote back-end": when this
        // (registry_id, collection) pair was already confirmed to exist,
        // skip the round-trip entirely.
        if !self
            .seen_collections
            .mark_and_check_first(&registry.registry_id, &registry.collection)
        {
            return Ok(());
        }
        let conn = &mut self.conn;
        let exists: Option<String> = registries::table
            .filter(registries::registry_id.eq(&registry.registry_id))
            .select(registries::registry_id)
            .first(conn)
            .await
            .optional()
            .map_err(IndexerError::store)?;
        if exists.is_some() {
            return Ok(());
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
            .await
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
        let conn = &mut self.conn;
        if let Some(row) = find_feedback_async(conn, agent_id, client, feedback_index).await? {
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
            .await
            .map_err(IndexerError::store)?;
        find_feedback_async(conn, agent_id, client, feedback_index)
            .await?
            .ok_or_else(|| IndexerError::Store("feedback row vanished after insert".to_string()))
    }

    async fn find_feedback_by_natural_key(
        &mut self,
        agent_id: &str,
        client: &str,
        feedback_index: u64,
    ) -> Result<Option<Feedback>> {
        let conn = &mut self.conn;
        find_feedback_async(conn, agent_id, client, feedback_index).await
    }

    async fn mark_feedback_revoked(
        &mut self,
        agent_id: &str,
        client: &str,
        feedback_index: u64,
        revoke_tx_signature: &str,
        revoke_slot: u64,
    ) -> Result<u64> {
        let conn = &mut self.conn;
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
        .await
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
        let conn = &mut self.conn;
        diesel::update(
            feedback::table
                .filter(feedback::agent_id.eq(agent_id))
                .filter(feedback::client.eq(client))
                .filter(feedback::feedback_index.eq(feedback_index as i64)),
        )
        .set(feedback::status.eq(status.as_str()))
        .execute(conn)
        .await
        .map_err(IndexerError::store)?;
        Ok(())
    }

    async fn upsert_revocation(&mut self, revocation: Revocation) -> Result<()> {
        let conn = &mut self.conn;
        let exists: Option<i64> = revocations::table
            .filter(revocations::agent_id.eq(&revocation.agent_id))
            .filter(revocations::client.eq(&revocation.client))
            .filter(revocations::feedback_index.eq(revocation.feedback_index as i64))
            .select(revocations::id)
            .first(conn)
            .await
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
            .await
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
        let conn = &mut self.conn;
        let exists: Option<i64> = feedback_responses::table
            .filter(feedback_responses::feedback_id.eq(feedback_id))
            .filter(feedback_responses::responder.eq(responder))
            .filter(feedback_responses::tx_signature.eq(tx_signature))
            .select(feedback_responses::id)
            .first(conn)
            .await
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
            .await
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
        let conn = &mut self.conn;
        let exists: Option<i64> = orphan_responses::table
            .filter(orphan_responses::agent_id.eq(agent_id))
            .filter(orphan_responses::client.eq(client))
            .filter(orphan_responses::feedback_index.eq(feedback_index as i64))
            .filter(orphan_responses::responder.eq(responder))
            .filter(orphan_responses::tx_signature.eq(tx_signature))
            .select(orphan_responses::id)
            .first(conn)
            .await
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
            .await
            .map_err(IndexerError::store)?;
        Ok(())
    }

    async fn find_orphan_responses(
        &mut self,
        agent_id: &str,
        client: &str,
        feedback_index: u64,
    ) -> Result<Vec<OrphanResponse>> {
        let conn = &mut self.conn;
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
            .await
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
        let conn = &mut self.conn;
        diesel::delete(orphan_responses::table.filter(orphan_responses::id.eq(id)))
            .execute(conn)
            .await
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
        let conn = &mut self.conn;
        let existing: Option<i64> = validations::table
            .filter(validations::agent_id.eq(agent_id))
            .filter(validations::validator.eq(validator))
            .filter(validations::nonce.eq(nonce as i64))
            .select(validations::id)
            .first(conn)
            .await
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
                    .await
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
                    .await
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
        let conn = &mut self.conn;
        let existing: Option<i64> = validations::table
            .filter(validations::agent_id.eq(agent_id))
            .filter(validations::validator.eq(validator))
            .filter(validations::nonce.eq(nonce as i64))
            .select(validations::id)
            .first(conn)
            .await
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
                    .await
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
                    .await
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
        let conn = &mut self.conn;
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
            .await
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
        let conn = &mut self.conn;
        let stored = read_cursor(conn).await?;
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
                .await
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
                    .await
                    .map_err(IndexerError::store)?;
            }
        }
        Ok(true)
    }

    async fn commit(mut self: Box<Self>) -> Result<()> {
        self.conn.batch_execute("COMMIT").await.map_err(IndexerError::store)
    }

    async fn rollback(mut self: Box<Self>) -> Result<()> {
        self.conn.batch_execute("ROLLBACK").await.map_err(IndexerError::store)
    }
}

async fn apply_agent_patch(
    conn: &mut AsyncPgConnection,
    asset: &str,
    patch: AgentPatch,
) -> Result<usize> {
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
        .await
        .map_err(IndexerError::store)
}

/// Mirrors `store::embedded`'s changeset: every `Option<T>` field applies
/// only when present (diesel's `AsChangeset` skips `None` fields).
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

async fn read_cursor(conn: &mut AsyncPgConnection) -> Result<Option<IndexerCursor>> {
    let row: Option<(String, i64, String, String)> = indexer_cursor::table
        .filter(indexer_cursor::id.eq(IndexerCursor::MAIN_ID))
        .select((
            indexer_cursor::id,
            indexer_cursor::last_slot,
            indexer_cursor::last_signature,
            indexer_cursor::source,
        ))
        .first(conn)
        .await
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

async fn get_agent_async(conn: &mut AsyncPgConnection, asset: &str) -> Result<Option<Agent>> {
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
        .await
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

async fn find_feedback_async(
    conn: &mut AsyncPgConnection,
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
        .await
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

async fn page_pending_async(
    conn: &mut AsyncPgConnection,
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
                .await
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
                .await
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
                .await
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
                .await
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
                .await
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
                .await
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

async fn set_status_async(
    conn: &mut AsyncPgConnection,
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
                .await
                .map_err(IndexerError::store)?;
        }
        EntityKind::Registry => {
            diesel::update(registries::table.filter(registries::registry_id.eq_any(ids)))
                .set(registries::status.eq(status.as_str()))
                .execute(conn)
                .await
                .map_err(IndexerError::store)?;
        }
        EntityKind::AgentMetadata => {
            let ids: Vec<i64> = ids.iter().filter_map(|s| s.parse().ok()).collect();
            diesel::update(agent_metadata::table.filter(agent_metadata::id.eq_any(ids)))
                .set(agent_metadata::status.eq(status.as_str()))
                .execute(conn)
                .await
                .map_err(IndexerError::store)?;
        }
        EntityKind::Feedback => {
            let ids: Vec<i64> = ids.iter().filter_map(|s| s.parse().ok()).collect();
            diesel::update(feedback::table.filter(feedback::id.eq_any(ids)))
                .set(feedback::status.eq(status.as_str()))
                .execute(conn)
                .await
                .map_err(IndexerError::store)?;
        }
        EntityKind::FeedbackResponse => {
            let ids: Vec<i64> = ids.iter().filter_map(|s| s.parse().ok()).collect();
            diesel::update(feedback_responses::table.filter(feedback_responses::id.eq_any(ids)))
                .set(feedback_responses::status.eq(status.as_str()))
                .execute(conn)
                .await
                .map_err(IndexerError::store)?;
        }
        EntityKind::Validation => {
            let ids: Vec<i64> = ids.iter().filter_map(|s| s.parse().ok()).collect();
            diesel::update(validations::table.filter(validations::id.eq_any(ids)))
                .set(validations::status.eq(status.as_str()))
                .execute(conn)
                .await
                .map_err(IndexerError::store)?;
        }
    }
    Ok(())
}
