// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory local store with the same buffer/flush semantics as SQLite.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::LocalStore;
use crate::error::Result;

#[derive(Debug, Default)]
struct Inner {
    committed: BTreeMap<String, String>,
    pending: BTreeMap<String, String>,
}

/// Local store that lives only as long as the process.
#[derive(Debug, Default)]
pub struct MemoryLocalStore {
    inner: Mutex<Inner>,
}

impl MemoryLocalStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Flushed contents only, as a crash would leave them.
    pub async fn committed(&self) -> BTreeMap<String, String> {
        self.inner.lock().await.committed.clone()
    }
}

#[async_trait]
impl LocalStore for MemoryLocalStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .pending
            .get(key)
            .or_else(|| inner.committed.get(key))
            .cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.inner
            .lock()
            .await
            .pending
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let pending = std::mem::take(&mut inner.pending);
        inner.committed.extend(pending);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reads_see_unflushed_writes() {
        let store = MemoryLocalStore::new();
        store.set("fid-restart-nonce-ha:1", "abc").await.unwrap();

        assert_eq!(
            store.get("fid-restart-nonce-ha:1").await.unwrap().as_deref(),
            Some("abc")
        );
        assert!(store.committed().await.is_empty());

        store.flush().await.unwrap();
        assert_eq!(store.committed().await.len(), 1);
    }
}
