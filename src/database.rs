use crate::config::DatabaseConfig;
use crate::models::Role;
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;

pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(&config.url)
        .await
}

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("database: {0}")]
    Database(#[from] sqlx::Error),
    #[error("stored role is not recognised: {0}")]
    CorruptRole(String),
}

#[derive(Debug, Clone)]
pub struct UserRecord {
    pub id: i64,
    pub username: String,
    pub password_hash: String,
    pub role: Role,
}

/// The external user database. Credentials live there; this crate reads them
/// for login and writes them on registration and credential changes.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_by_username(&self, username: &str) -> Result<Option<UserRecord>, DirectoryError>;

    async fn exists(&self, user_id: i64) -> Result<bool, DirectoryError>;

    /// Returns the new user id, or `None` when the username is taken.
    async fn create(&self, username: &str, password_hash: &str, role: Role) -> Result<Option<i64>, DirectoryError>;

    /// Rows affected; 0 when no such user.
    async fn update_password(&self, user_id: i64, password_hash: &str) -> Result<u64, DirectoryError>;

    async fn update_role(&self, user_id: i64, role: Role) -> Result<u64, DirectoryError>;
}

pub struct PgUserDirectory {
    pool: PgPool,
}

impl PgUserDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn find_by_username(&self, username: &str) -> Result<Option<UserRecord>, DirectoryError> {
        let row: Option<(i64, String, String, String)> =
            sqlx::query_as("SELECT id, username, password_hash, role FROM users WHERE username = $1")
                .bind(username)
                .fetch_optional(&self.pool)
                .await?;

        let Some((id, username, password_hash, role)) = row else {
            return Ok(None);
        };
        let role = role.parse::<Role>().map_err(|e| DirectoryError::CorruptRole(e.0))?;

        Ok(Some(UserRecord {
            id,
            username,
            password_hash,
            role,
        }))
    }

    async fn exists(&self, user_id: i64) -> Result<bool, DirectoryError> {
        let exists = sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM users WHERE id = $1)")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    async fn create(&self, username: &str, password_hash: &str, role: Role) -> Result<Option<i64>, DirectoryError> {
        let id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO users (username, password_hash, role) VALUES ($1, $2, $3)
             ON CONFLICT (username) DO NOTHING RETURNING id",
        )
        .bind(username)
        .bind(password_hash)
        .bind(role.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(id)
    }

    async fn update_password(&self, user_id: i64, password_hash: &str) -> Result<u64, DirectoryError> {
        let result = sqlx::query("UPDATE users SET password_hash = $1 WHERE id = $2")
            .bind(password_hash)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn update_role(&self, user_id: i64, role: Role) -> Result<u64, DirectoryError> {
        let result = sqlx::query("UPDATE users SET role = $1 WHERE id = $2")
            .bind(role.as_str())
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

/// In-memory directory used by the HTTP tests.
#[derive(Default)]
pub struct MemoryUserDirectory {
    users: Mutex<HashMap<String, UserRecord>>,
}

impl MemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserDirectory for MemoryUserDirectory {
    async fn find_by_username(&self, username: &str) -> Result<Option<UserRecord>, DirectoryError> {
        Ok(self.users.lock().await.get(username).cloned())
    }

    async fn exists(&self, user_id: i64) -> Result<bool, DirectoryError> {
        Ok(self.users.lock().await.values().any(|u| u.id == user_id))
    }

    async fn create(&self, username: &str, password_hash: &str, role: Role) -> Result<Option<i64>, DirectoryError> {
        let mut users = self.users.lock().await;
        if users.contains_key(username) {
            return Ok(None);
        }
        let id = users.len() as i64 + 1;
        users.insert(
            username.to_string(),
            UserRecord {
                id,
                username: username.to_string(),
                password_hash: password_hash.to_string(),
                role,
            },
        );
        Ok(Some(id))
    }

    async fn update_password(&self, user_id: i64, password_hash: &str) -> Result<u64, DirectoryError> {
        let mut users = self.users.lock().await;
        match users.values_mut().find(|u| u.id == user_id) {
            Some(user) => {
                user.password_hash = password_hash.to_string();
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn update_role(&self, user_id: i64, role: Role) -> Result<u64, DirectoryError> {
        let mut users = self.users.lock().await;
        match users.values_mut().find(|u| u.id == user_id) {
            Some(user) => {
                user.role = role;
                Ok(1)
            }
            None => Ok(0),
        }
    }
}
