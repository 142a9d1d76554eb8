// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory relation store.
//!
//! Backs the dry-run binary (loaded from and saved to a JSON snapshot) and the
//! test suite.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::{Bucket, RelationStore};
use crate::error::{ConvergeError, Result};
use crate::event::{RelationId, RelationKind, UnitId};

/// Serializable view of every relation the local unit participates in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationSnapshot {
    /// Relation id → unit → bucket. The local unit's own bucket lives here too.
    #[serde(default)]
    pub relations: BTreeMap<RelationId, BTreeMap<UnitId, Bucket>>,
}

/// Relation store holding all buckets in process memory.
pub struct InMemoryRelationStore {
    local_unit: UnitId,
    state: Mutex<RelationSnapshot>,
}

impl InMemoryRelationStore {
    /// Create an empty store for the given local unit.
    pub fn new(local_unit: UnitId) -> Self {
        Self::from_snapshot(local_unit, RelationSnapshot::default())
    }

    /// Create a store pre-populated from a snapshot.
    pub fn from_snapshot(local_unit: UnitId, snapshot: RelationSnapshot) -> Self {
        Self {
            local_unit,
            state: Mutex::new(snapshot),
        }
    }

    /// Copy out the current contents.
    pub async fn snapshot(&self) -> RelationSnapshot {
        self.state.lock().await.clone()
    }

    /// Establish a relation with no remote units yet.
    pub async fn add_relation(&self, relation_id: &RelationId) {
        self.state
            .lock()
            .await
            .relations
            .entry(relation_id.clone())
            .or_default();
    }

    /// Add (or replace) a remote unit's bucket.
    pub async fn put_remote(&self, relation_id: &RelationId, unit: &UnitId, bucket: Bucket) {
        self.state
            .lock()
            .await
            .relations
            .entry(relation_id.clone())
            .or_default()
            .insert(unit.clone(), bucket);
    }

    /// Set one key in a remote unit's bucket, creating relation and unit as needed.
    pub async fn set_remote(&self, relation_id: &RelationId, unit: &UnitId, key: &str, value: &str) {
        self.state
            .lock()
            .await
            .relations
            .entry(relation_id.clone())
            .or_default()
            .entry(unit.clone())
            .or_default()
            .insert(key.to_string(), value.to_string());
    }

    /// The local unit's bucket on a relation.
    pub async fn local_bucket(&self, relation_id: &RelationId) -> Bucket {
        self.state
            .lock()
            .await
            .relations
            .get(relation_id)
            .and_then(|units| units.get(&self.local_unit))
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl RelationStore for InMemoryRelationStore {
    fn local_unit(&self) -> &UnitId {
        &self.local_unit
    }

    async fn get_bucket(&self, relation_id: &RelationId, unit: &UnitId) -> Result<Bucket> {
        Ok(self
            .state
            .lock()
            .await
            .relations
            .get(relation_id)
            .and_then(|units| units.get(unit))
            .cloned()
            .unwrap_or_default())
    }

    async fn set_own(&self, relation_id: &RelationId, settings: &Bucket) -> Result<()> {
        let mut state = self.state.lock().await;
        let units = state.relations.get_mut(relation_id).ok_or_else(|| {
            ConvergeError::RelationWriteFailed {
                relation_id: relation_id.to_string(),
                reason: "relation is not established".to_string(),
            }
        })?;
        let bucket = units.entry(self.local_unit.clone()).or_default();
        for (key, value) in settings {
            if value.is_empty() {
                bucket.remove(key);
            } else {
                bucket.insert(key.clone(), value.clone());
            }
        }
        Ok(())
    }

    async fn related_units(&self, relation_id: &RelationId) -> Result<Vec<UnitId>> {
        Ok(self
            .state
            .lock()
            .await
            .relations
            .get(relation_id)
            .map(|units| {
                units
                    .keys()
                    .filter(|unit| **unit != self.local_unit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn relation_ids(&self, kind: &RelationKind) -> Result<Vec<RelationId>> {
        Ok(self
            .state
            .lock()
            .await
            .relations
            .keys()
            .filter(|rid| rid.kind() == kind)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rid(s: &str) -> RelationId {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn test_set_own_merges_and_unsets() {
        let store = InMemoryRelationStore::new(UnitId::new("keystone/0"));
        let ha = rid("ha:1");
        store.add_relation(&ha).await;

        let mut settings = Bucket::new();
        settings.insert("a".to_string(), "1".to_string());
        settings.insert("b".to_string(), "2".to_string());
        store.set_own(&ha, &settings).await.unwrap();

        let mut unset = Bucket::new();
        unset.insert("a".to_string(), String::new());
        store.set_own(&ha, &unset).await.unwrap();

        let bucket = store.local_bucket(&ha).await;
        assert_eq!(bucket.get("a"), None);
        assert_eq!(bucket.get("b").map(String::as_str), Some("2"));
    }

    #[tokio::test]
    async fn test_set_own_requires_relation() {
        let store = InMemoryRelationStore::new(UnitId::new("keystone/0"));
        let err = store
            .set_own(&rid("ha:9"), &Bucket::new())
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "RELATION_WRITE_FAILED");
    }

    #[tokio::test]
    async fn test_related_units_excludes_local() {
        let local = UnitId::new("keystone/0");
        let store = InMemoryRelationStore::new(local.clone());
        let cluster = rid("cluster:2");
        store.add_relation(&cluster).await;
        store.set_own(&cluster, &Bucket::new()).await.unwrap();
        store
            .set_remote(&cluster, &UnitId::new("keystone/1"), "private-address", "10.0.0.2")
            .await;

        let units = store.related_units(&cluster).await.unwrap();
        assert_eq!(units, vec![UnitId::new("keystone/1")]);
    }

    #[tokio::test]
    async fn test_get_treats_empty_as_absent() {
        let store = InMemoryRelationStore::new(UnitId::new("keystone/0"));
        let db = rid("shared-db:4");
        let mysql = UnitId::new("mysql/0");
        store.set_remote(&db, &mysql, "password", "").await;
        store.set_remote(&db, &mysql, "db_host", "10.0.0.9").await;

        assert_eq!(store.get(&db, &mysql, "password").await.unwrap(), None);
        assert_eq!(
            store.get(&db, &mysql, "db_host").await.unwrap().as_deref(),
            Some("10.0.0.9")
        );
        assert_eq!(store.get(&db, &mysql, "absent").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_relation_ids_filter_by_kind() {
        let store = InMemoryRelationStore::new(UnitId::new("keystone/0"));
        store.add_relation(&rid("identity-service:3")).await;
        store.add_relation(&rid("identity-service:1")).await;
        store.add_relation(&rid("ha:2")).await;

        let ids = store
            .relation_ids(&RelationKind::IdentityService)
            .await
            .unwrap();
        assert_eq!(ids, vec![rid("identity-service:1"), rid("identity-service:3")]);
    }
}
