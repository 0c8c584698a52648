// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! The chain RPC collaborator (§6, §4.E). Only the two calls the
//! Verification Worker needs are modeled; decoding and transport are the
//! caller's concern (§1 non-goals: "the chain RPC client").

use async_trait::async_trait;

/// Bare existence/ownership facts about an on-chain account; the verifier
/// only cares whether the account is present, not its contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub pubkey: String,
    pub owner: String,
    pub lamports: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("rpc timed out")]
    Timeout,
    #[error("rpc transport error: {0}")]
    Transport(String),
}

#[async_trait]
pub trait ChainRpc: Send + Sync {
    async fn get_slot(&self) -> Result<u64, RpcError>;

    async fn get_account_info(&self, pubkey: &str) -> Result<Option<Account>, RpcError>;
}

/// An in-memory double for tests: a fixed head slot plus a map of accounts
/// that exist. Pass `flaky_until` attempts to rehearse the verifier's retry
/// path before `get_account_info` starts succeeding.
#[cfg(test)]
pub mod test_support {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    pub struct StaticRpc {
        head_slot: u64,
        accounts: Mutex<HashMap<String, Account>>,
        attempts: Mutex<HashMap<String, AtomicU32>>,
        /// Number of `get_account_info` attempts per pubkey that return
        /// `Err(RpcError::Timeout)` before returning the real answer.
        flaky_until: u32,
    }

    impl StaticRpc {
        pub fn new(head_slot: u64) -> Self {
            StaticRpc {
                head_slot,
                accounts: Mutex::new(HashMap::new()),
                attempts: Mutex::new(HashMap::new()),
                flaky_until: 0,
            }
        }

        pub fn with_flaky_attempts(mut self, n: u32) -> Self {
            self.flaky_until = n;
            self
        }

        pub fn insert_account(&self, pubkey: &str, account: Account) {
            self.accounts.lock().unwrap().insert(pubkey.to_string(), account);
        }

        pub fn set_head_slot(&mut self, slot: u64) {
            self.head_slot = slot;
        }
    }

    #[async_trait]
    impl ChainRpc for StaticRpc {
        async fn get_slot(&self) -> Result<u64, RpcError> {
            Ok(self.head_slot)
        }

        async fn get_account_info(&self, pubkey: &str) -> Result<Option<Account>, RpcError> {
            let mut attempts = self.attempts.lock().unwrap();
            let counter = attempts
                .entry(pubkey.to_string())
                .or_insert_with(|| AtomicU32::new(0));
            let attempt = counter.fetch_add(1, Ordering::SeqCst);
            if attempt < self.flaky_until {
                return Err(RpcError::Timeout);
            }
            Ok(self.accounts.lock().unwrap().get(pubkey).cloned())
        }
    }
}
