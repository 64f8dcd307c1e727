//! Token revocation store.
//!
//! An entry maps a user id to the token that was revoked for it. While an entry
//! exists every token carrying that subject is refused by the admission layer.
//! Entries carry no TTL: they survive restarts and only disappear on [`BlacklistStore::remove`].

use crate::errors::StoreError;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;

pub const BLACKLIST_KEY_PREFIX: &str = "blacklist";

pub fn blacklist_key(user_id: &str) -> String {
    format!("{}:{}", BLACKLIST_KEY_PREFIX, user_id)
}

/// Read side of the revocation store, all the admission layer needs.
#[async_trait]
pub trait RevocationCheck: Send + Sync {
    async fn is_revoked(&self, user_id: &str) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait BlacklistStore: RevocationCheck {
    /// Record `token` as revoked for `user_id` unless an entry already exists.
    ///
    /// Returns `true` when this call created the entry. An existing entry is
    /// left untouched (first write wins).
    async fn add(&self, user_id: &str, token: &str) -> Result<bool, StoreError>;

    /// Delete the entry; `0` means the user was not blacklisted.
    async fn remove(&self, user_id: &str) -> Result<u64, StoreError>;

    async fn revoked_token(&self, user_id: &str) -> Result<Option<String>, StoreError>;
}

/// Process-local store for tests and single-instance tooling.
#[derive(Default)]
pub struct MemoryBlacklist {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryBlacklist {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RevocationCheck for MemoryBlacklist {
    async fn is_revoked(&self, user_id: &str) -> Result<bool, StoreError> {
        Ok(self.entries.lock().await.contains_key(&blacklist_key(user_id)))
    }
}

#[async_trait]
impl BlacklistStore for MemoryBlacklist {
    async fn add(&self, user_id: &str, token: &str) -> Result<bool, StoreError> {
        let mut entries = self.entries.lock().await;
        let key = blacklist_key(user_id);
        if entries.contains_key(&key) {
            return Ok(false);
        }
        entries.insert(key, token.to_string());
        Ok(true)
    }

    async fn remove(&self, user_id: &str) -> Result<u64, StoreError> {
        let removed = self.entries.lock().await.remove(&blacklist_key(user_id));
        Ok(u64::from(removed.is_some()))
    }

    async fn revoked_token(&self, user_id: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.lock().await.get(&blacklist_key(user_id)).cloned())
    }
}
