// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite-backed local store.

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use tokio::sync::Mutex;
use tracing::debug;

use super::LocalStore;
use crate::error::{ConvergeError, Result};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/sqlite");

/// SQLite-backed local store.
///
/// Writes are held in memory until [`LocalStore::flush`], which commits them in
/// a single transaction.
pub struct SqliteLocalStore {
    pool: SqlitePool,
    pending: Mutex<BTreeMap<String, String>>,
}

impl SqliteLocalStore {
    /// Create a store from an existing, already-migrated pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            pending: Mutex::new(BTreeMap::new()),
        }
    }

    /// Open (creating if necessary) a store at a file path and run migrations.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let store = SqliteLocalStore::from_path(".data/unit-state.db").await?;
    /// ```
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| ConvergeError::StoreError {
                operation: "create_dir".to_string(),
                details: format!("Failed to create directory {:?}: {}", parent, e),
            })?;
        }

        let url = format!("sqlite:{}?mode=rwc", path.to_string_lossy());

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(&url)
            .await
            .map_err(|e| ConvergeError::StoreError {
                operation: "connect".to_string(),
                details: format!("Failed to connect to SQLite at {:?}: {}", path, e),
            })?;

        Self::migrate(&pool).await?;

        Ok(Self::new(pool))
    }

    /// Apply embedded migrations. Safe to call repeatedly.
    pub async fn migrate(pool: &SqlitePool) -> Result<()> {
        MIGRATOR
            .run(pool)
            .await
            .map_err(|e| ConvergeError::StoreError {
                operation: "migrate".to_string(),
                details: format!("Failed to run migrations: {}", e),
            })
    }

    /// Every committed entry, ordered by key.
    pub async fn entries(&self) -> Result<Vec<(String, String)>> {
        let rows = sqlx::query_as::<_, (String, String)>(
            r#"
            SELECT key, value
            FROM unit_kv
            ORDER BY key
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}

#[async_trait]
impl LocalStore for SqliteLocalStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        if let Some(value) = self.pending.lock().await.get(key) {
            return Ok(Some(value.clone()));
        }

        let row = sqlx::query_as::<_, (String,)>(
            r#"
            SELECT value
            FROM unit_kv
            WHERE key = ?
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(value,)| value))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.pending
            .lock()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        let mut pending = self.pending.lock().await;
        if pending.is_empty() {
            return Ok(());
        }

        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        for (key, value) in pending.iter() {
            sqlx::query(
                r#"
                INSERT INTO unit_kv (key, value, updated_at)
                VALUES (?, ?, ?)
                ON CONFLICT(key) DO UPDATE
                SET value = excluded.value, updated_at = excluded.updated_at
                "#,
            )
            .bind(key)
            .bind(value)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        debug!(count = pending.len(), "Flushed local store");
        pending.clear();
        Ok(())
    }
}
