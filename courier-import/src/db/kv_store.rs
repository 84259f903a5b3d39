//! Durable key-value storage
//!
//! The resume store writes through [`SessionStorage`]. The SQLite backend is
//! used normally; [`MemorySessionStorage`] serves tests and the degraded
//! mode when the database cannot be opened.

use crate::utils::db_retry::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT_MS};
use async_trait::async_trait;
use courier_common::Error;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Backend(#[from] Error),
}

/// `get` / `set` / `remove` over string values
#[async_trait]
pub trait SessionStorage: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    async fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// `kv_store` table backend
pub struct SqliteSessionStorage {
    pool: SqlitePool,
    max_lock_wait_ms: u64,
}

impl SqliteSessionStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            max_lock_wait_ms: DEFAULT_MAX_LOCK_WAIT_MS,
        }
    }
}

#[async_trait]
impl SessionStorage for SqliteSessionStorage {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM kv_store WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(row.map(|(value,)| value))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let updated_at = chrono::Utc::now().to_rfc3339();
        retry_on_lock("kv_store set", self.max_lock_wait_ms, || async {
            sqlx::query(
                r#"
                INSERT INTO kv_store (key, value, updated_at) VALUES (?, ?, ?)
                ON CONFLICT(key) DO UPDATE SET
                    value = excluded.value,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(key)
            .bind(value)
            .bind(&updated_at)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
            Ok(())
        })
        .await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        retry_on_lock("kv_store remove", self.max_lock_wait_ms, || async {
            sqlx::query("DELETE FROM kv_store WHERE key = ?")
                .bind(key)
                .execute(&self.pool)
                .await
                .map_err(Error::Database)?;
            Ok(())
        })
        .await?;
        Ok(())
    }
}

/// Process-local backend
///
/// Can be switched unavailable to exercise failure paths.
#[derive(Default)]
pub struct MemorySessionStorage {
    entries: Mutex<HashMap<String, String>>,
    unavailable: AtomicBool,
}

impl MemorySessionStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StorageError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("storage switched off".to_string()));
        }
        Ok(())
    }

    fn entries(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>, StorageError> {
        self.entries
            .lock()
            .map_err(|_| StorageError::Unavailable("storage lock poisoned".to_string()))
    }
}

#[async_trait]
impl SessionStorage for MemorySessionStorage {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.check()?;
        Ok(self.entries()?.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.check()?;
        self.entries()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.check()?;
        self.entries()?.remove(key);
        Ok(())
    }
}
