// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Diesel table definitions shared by both backends (§4.A.2, §9: "a single
//! `Store` abstraction with two implementations"). Column types are kept to
//! the common subset diesel maps identically for SQLite and Postgres
//! (`Text`, `BigInt`, `Integer`, `Bool`, `Binary`, and their `Nullable`
//! forms) so one `table!` block serves `store::embedded` and
//! `store::postgres` alike; the two migration sets (`migrations/sqlite`,
//! `migrations/postgres`) pick the native column type each backend prefers
//! for the same logical type (e.g. `BLOB` vs `BYTEA`).

diesel::table! {
    agents (asset) {
        asset -> Text,
        owner -> Text,
        uri -> Text,
        wallet -> Nullable<Text>,
        collection -> Text,
        registry -> Text,
        atom_enabled -> Bool,
        nft_name -> Nullable<Text>,
        status -> Text,
        created_slot -> BigInt,
        created_tx_signature -> Text,
        tx_index -> Nullable<Integer>,
        verified_at -> Nullable<BigInt>,
        verified_slot -> Nullable<BigInt>,
        updated_at -> BigInt,
    }
}

diesel::table! {
    registries (registry_id) {
        registry_id -> Text,
        collection -> Text,
        registry_type -> Text,
        authority -> Text,
        status -> Text,
        slot -> BigInt,
        tx_signature -> Text,
    }
}

diesel::table! {
    agent_metadata (id) {
        id -> BigInt,
        agent_id -> Text,
        key -> Text,
        value -> Binary,
        immutable -> Bool,
        slot -> BigInt,
        tx_signature -> Text,
        status -> Text,
    }
}

diesel::table! {
    feedback (id) {
        id -> BigInt,
        agent_id -> Text,
        client -> Text,
        feedback_index -> BigInt,
        value -> Text,
        value_decimals -> Integer,
        score -> Nullable<Integer>,
        tag1 -> Nullable<Text>,
        tag2 -> Nullable<Text>,
        endpoint -> Nullable<Text>,
        feedback_uri -> Nullable<Text>,
        feedback_hash -> Nullable<Binary>,
        running_digest -> Nullable<Binary>,
        revoked -> Bool,
        revoked_tx_signature -> Nullable<Text>,
        revoked_slot -> Nullable<BigInt>,
        status -> Text,
        created_slot -> BigInt,
        tx_index -> Nullable<Integer>,
    }
}

diesel::table! {
    feedback_responses (id) {
        id -> BigInt,
        feedback_id -> BigInt,
        responder -> Text,
        tx_signature -> Text,
        response_uri -> Nullable<Text>,
        response_hash -> Nullable<Binary>,
        running_digest -> Nullable<Binary>,
        slot -> BigInt,
        status -> Text,
    }
}

diesel::table! {
    orphan_responses (id) {
        id -> BigInt,
        agent_id -> Text,
        client -> Text,
        feedback_index -> BigInt,
        responder -> Text,
        tx_signature -> Text,
        response_uri -> Nullable<Text>,
        response_hash -> Nullable<Binary>,
        running_digest -> Nullable<Binary>,
        slot -> BigInt,
        created_at -> BigInt,
    }
}

diesel::table! {
    revocations (id) {
        id -> BigInt,
        agent_id -> Text,
        client -> Text,
        feedback_index -> BigInt,
        tx_signature -> Text,
        slot -> BigInt,
    }
}

diesel::table! {
    validations (id) {
        id -> BigInt,
        agent_id -> Text,
        validator -> Text,
        nonce -> BigInt,
        requester -> Nullable<Text>,
        request_uri -> Nullable<Text>,
        request_slot -> Nullable<BigInt>,
        request_tx_signature -> Nullable<Text>,
        response_uri -> Nullable<Text>,
        response_code -> Nullable<Integer>,
        response_slot -> Nullable<BigInt>,
        response_tx_signature -> Nullable<Text>,
        status -> Text,
    }
}

diesel::table! {
    indexer_cursor (id) {
        id -> Text,
        last_slot -> BigInt,
        last_signature -> Text,
        source -> Text,
    }
}
