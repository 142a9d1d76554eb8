// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Leadership oracle interface.
//!
//! The hosting runtime designates at most one coordinator at a time and keeps a
//! small settings map that only the coordinator may write and every unit may
//! read. The engine never elects anybody; it only asks.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::{ConvergeError, Result};

/// Coordinator designation and coordinator-scoped settings.
#[async_trait]
pub trait LeadershipOracle: Send + Sync {
    /// Whether this unit is currently the coordinator.
    async fn is_coordinator(&self) -> Result<bool>;

    /// Read a coordinator setting.
    async fn coordinator_get(&self, key: &str) -> Result<Option<String>>;

    /// Write a coordinator setting.
    ///
    /// Returns [`ConvergeError::NotCoordinator`] when called by a non-coordinator.
    async fn coordinator_set(&self, key: &str, value: &str) -> Result<()>;
}

/// Serializable leadership state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeadershipSnapshot {
    /// Whether the local unit is the coordinator.
    #[serde(default)]
    pub is_coordinator: bool,
    /// Coordinator settings.
    #[serde(default)]
    pub settings: BTreeMap<String, String>,
}

/// Leadership oracle backed by process memory.
#[derive(Debug, Default)]
pub struct InMemoryLeadership {
    state: Mutex<LeadershipSnapshot>,
}

impl InMemoryLeadership {
    /// Create an oracle from a snapshot.
    pub fn from_snapshot(snapshot: LeadershipSnapshot) -> Self {
        Self {
            state: Mutex::new(snapshot),
        }
    }

    /// Create an oracle that designates (or not) the local unit.
    pub fn new(is_coordinator: bool) -> Self {
        Self::from_snapshot(LeadershipSnapshot {
            is_coordinator,
            settings: BTreeMap::new(),
        })
    }

    /// Change designation, as a leadership handover would.
    pub async fn set_coordinator(&self, is_coordinator: bool) {
        self.state.lock().await.is_coordinator = is_coordinator;
    }

    /// Copy out the current state.
    pub async fn snapshot(&self) -> LeadershipSnapshot {
        self.state.lock().await.clone()
    }
}

#[async_trait]
impl LeadershipOracle for InMemoryLeadership {
    async fn is_coordinator(&self) -> Result<bool> {
        Ok(self.state.lock().await.is_coordinator)
    }

    async fn coordinator_get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.state.lock().await.settings.get(key).cloned())
    }

    async fn coordinator_set(&self, key: &str, value: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.is_coordinator {
            return Err(ConvergeError::NotCoordinator {
                operation: format!("coordinator_set({})", key),
            });
        }
        state.settings.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_non_coordinator_cannot_write() {
        let oracle = InMemoryLeadership::new(false);
        let err = oracle.coordinator_set("db-initialised", "True").await.unwrap_err();
        assert_eq!(err.error_code(), "NOT_COORDINATOR");
        assert_eq!(oracle.coordinator_get("db-initialised").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_handover_keeps_settings() {
        let oracle = InMemoryLeadership::new(true);
        oracle.coordinator_set("db-initialised", "True").await.unwrap();
        oracle.set_coordinator(false).await;

        assert!(!oracle.is_coordinator().await.unwrap());
        assert_eq!(
            oracle.coordinator_get("db-initialised").await.unwrap().as_deref(),
            Some("True")
        );
    }
}
