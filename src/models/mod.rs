// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Logical row types for every entity in §3. These are
//! backend-agnostic: the diesel `Queryable`/`Insertable` wiring for each
//! backend lives in `schema::postgres` / `schema::embedded`, which map these
//! structs onto the two column layouts.

pub mod agent;
pub mod cursor;
pub mod feedback;
pub mod metadata;
pub mod registry;
pub mod validation;

pub use agent::{Agent, AgentCreate, AgentPatch};
pub use cursor::IndexerCursor;
pub use feedback::{Feedback, FeedbackResponse, OrphanResponse, Revocation};
pub use metadata::AgentMetadata;
pub use registry::Registry;
pub use validation::{Validation, ValidationRequestPatch, ValidationResponsePatch};
