// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Relation store interface and implementations.
//!
//! A relation is a set of per-unit buckets. Each bucket is a string map that
//! only its owning unit may write and that every unit on the relation may read.
//! Writing an empty string to a key removes it.

pub mod memory;
pub mod records;

pub use self::memory::{InMemoryRelationStore, RelationSnapshot};

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::Result;
use crate::event::{RelationId, RelationKind, UnitId};

/// One unit's key/value bucket on a relation.
pub type Bucket = BTreeMap<String, String>;

/// Multi-peer key/value exchange primitive supplied by the hosting runtime.
#[async_trait]
pub trait RelationStore: Send + Sync {
    /// The unit this process runs as.
    fn local_unit(&self) -> &UnitId;

    /// Read every key a unit has published on a relation.
    ///
    /// Unknown relations and units yield an empty bucket.
    async fn get_bucket(&self, relation_id: &RelationId, unit: &UnitId) -> Result<Bucket>;

    /// Read one key. Missing keys and empty values are both `None`.
    async fn get(&self, relation_id: &RelationId, unit: &UnitId, key: &str) -> Result<Option<String>> {
        Ok(self
            .get_bucket(relation_id, unit)
            .await?
            .remove(key)
            .filter(|v| !v.is_empty()))
    }

    /// Merge settings into the local unit's bucket. Empty values unset keys.
    async fn set_own(&self, relation_id: &RelationId, settings: &Bucket) -> Result<()>;

    /// Remote units currently on a relation, in stable order.
    async fn related_units(&self, relation_id: &RelationId) -> Result<Vec<UnitId>>;

    /// Established relations of a kind, in stable order.
    async fn relation_ids(&self, kind: &RelationKind) -> Result<Vec<RelationId>>;
}
