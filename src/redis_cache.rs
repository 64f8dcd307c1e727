use crate::blacklist::{blacklist_key, BlacklistStore, RevocationCheck};
use crate::config::RedisConfig;
use crate::errors::StoreError;
use crate::rate_limit::CounterStore;
use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, RedisError};
use std::time::Duration;

/// Redis-backed revocation store and rate-limit counters.
///
/// Plain commands go through the multiplexed [`ConnectionManager`]. The
/// optimistic `WATCH`/`MULTI`/`EXEC` in [`BlacklistStore::add`] needs a
/// connection of its own, since a watch is bound to the connection that issued it.
#[derive(Clone)]
pub struct RedisStore {
    client: redis::Client,
    manager: ConnectionManager,
}

impl RedisStore {
    pub async fn connect(config: &RedisConfig) -> Result<Self, RedisError> {
        let client = redis::Client::open(config.url.as_str())?;
        let manager = ConnectionManager::new(client.clone()).await?;

        Ok(Self { client, manager })
    }

    pub async fn health_check(&self) -> Result<bool, RedisError> {
        let mut conn = self.manager.clone();
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(pong == "PONG")
    }
}

#[async_trait]
impl RevocationCheck for RedisStore {
    async fn is_revoked(&self, user_id: &str) -> Result<bool, StoreError> {
        let mut conn = self.manager.clone();
        let exists: bool = conn.exists(blacklist_key(user_id)).await?;
        Ok(exists)
    }
}

#[async_trait]
impl BlacklistStore for RedisStore {
    async fn add(&self, user_id: &str, token: &str) -> Result<bool, StoreError> {
        let key = blacklist_key(user_id);
        let mut conn = self.client.get_async_connection().await?;

        redis::cmd("WATCH").arg(&key).query_async::<_, ()>(&mut conn).await?;

        let exists: bool = conn.exists(&key).await?;
        if exists {
            redis::cmd("UNWATCH").query_async::<_, ()>(&mut conn).await?;
            return Ok(false);
        }

        // EXEC answers nil when the watched key changed underneath us
        let committed: Option<Vec<redis::Value>> = redis::pipe()
            .atomic()
            .set(&key, token)
            .query_async(&mut conn)
            .await?;

        Ok(committed.is_some())
    }

    async fn remove(&self, user_id: &str) -> Result<u64, StoreError> {
        let mut conn = self.manager.clone();
        let removed: u64 = conn.del(blacklist_key(user_id)).await?;
        Ok(removed)
    }

    async fn revoked_token(&self, user_id: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.manager.clone();
        let token: Option<String> = conn.get(blacklist_key(user_id)).await?;
        Ok(token)
    }
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn incr(&self, key: &str) -> Result<i64, StoreError> {
        let mut conn = self.manager.clone();
        let count: i64 = conn.incr(key, 1).await?;
        Ok(count)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut conn = self.manager.clone();
        let applied: bool = redis::cmd("EXPIRE")
            .arg(key)
            .arg(ttl.as_secs())
            .query_async(&mut conn)
            .await?;
        Ok(applied)
    }
}
