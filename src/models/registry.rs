// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::types::{RegistryType, VerificationStatus};

/// §3 "Registry" — created once per registry event; later events with the
/// same id are no-ops on identity attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct Registry {
    pub registry_id: String,
    pub collection: String,
    pub registry_type: RegistryType,
    pub authority: String,
    pub status: VerificationStatus,
    pub slot: u64,
    pub tx_signature: String,
}
