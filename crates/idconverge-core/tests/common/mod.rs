// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for idconverge-core integration tests.
//!
//! Provides TestContext: a recording world, an engine over it and a SQLite
//! local store in a temporary directory that outlives engine rebuilds.

#![allow(dead_code)]

use std::sync::Arc;

use tempfile::TempDir;

use idconverge_core::capabilities::Release;
use idconverge_core::config::ServiceOptions;
use idconverge_core::dryrun::{DryRunWorld, StaticNetwork, WorldSnapshot};
use idconverge_core::engine::{DispatchReport, Engine};
use idconverge_core::event::{Event, RelationId, UnitId};
use idconverge_core::leadership::LeadershipSnapshot;
use idconverge_core::persistence::{LocalStore, SqliteLocalStore};
use idconverge_core::relation::{Bucket, RelationSnapshot};

pub const LOCAL_UNIT: &str = "keystone/0";
pub const DB_RELATION: &str = "shared-db:1";
pub const DB_UNIT: &str = "mysql/0";

/// Test context holding a world, its engine and a durable local store.
pub struct TestContext {
    pub world: DryRunWorld,
    pub local: Arc<SqliteLocalStore>,
    pub engine: Engine,
    _dir: TempDir,
}

impl TestContext {
    /// Create a context from a snapshot with a fresh local store.
    pub async fn new(snapshot: WorldSnapshot) -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let local = Arc::new(
            SqliteLocalStore::from_path(dir.path().join("unit-state.db"))
                .await
                .expect("Failed to open local store"),
        );
        let world = DryRunWorld::from_snapshot(snapshot);
        let engine = world.engine(local.clone()).expect("Failed to build engine");
        Self {
            world,
            local,
            engine,
            _dir: dir,
        }
    }

    /// A coordinator unit with a default network.
    pub async fn coordinator() -> Self {
        Self::new(snapshot(true, ServiceOptions::default())).await
    }

    /// A non-coordinator unit with a default network.
    pub async fn follower() -> Self {
        Self::new(snapshot(false, ServiceOptions::default())).await
    }

    /// Rebuild the engine after swapping a collaborator on the world.
    pub fn rebuild(&mut self) {
        self.engine = self
            .world
            .engine(self.local.clone())
            .expect("Failed to build engine");
    }

    /// Deliver a hook and return the report.
    pub async fn fire(&self, hook: &str, relation_id: Option<&str>, unit: Option<&str>) -> DispatchReport {
        let event = event(hook, relation_id, unit);
        self.engine
            .handle(&event)
            .await
            .unwrap_or_else(|e| panic!("{} failed: {}", hook, e))
    }

    /// Read a committed or buffered local store value.
    pub async fn local_get(&self, key: &str) -> Option<String> {
        self.local.get(key).await.expect("Failed to read local store")
    }

    /// The local unit's bucket on a relation.
    pub async fn own_bucket(&self, relation_id: &str) -> Bucket {
        self.world.relations.local_bucket(&rid(relation_id)).await
    }

    /// Publish complete database credentials.
    pub async fn add_database(&self) {
        self.set_remote(DB_RELATION, DB_UNIT, &[("db_host", "10.0.0.20"), ("password", "s3cret")])
            .await;
    }

    /// Set keys in a remote unit's bucket, creating relation and unit as needed.
    pub async fn set_remote(&self, relation_id: &str, unit: &str, pairs: &[(&str, &str)]) {
        let relation_id = rid(relation_id);
        let unit = UnitId::new(unit);
        for (key, value) in pairs {
            self.world
                .relations
                .set_remote(&relation_id, &unit, key, value)
                .await;
        }
    }

    /// Number of times a service was restarted or started.
    pub async fn bounces(&self, service: &str) -> usize {
        self.world.services.bounces(service).await
    }
}

/// A baseline snapshot on Queens with one /24 on eth0.
pub fn snapshot(is_coordinator: bool, options: ServiceOptions) -> WorldSnapshot {
    WorldSnapshot {
        local_unit: UnitId::new(LOCAL_UNIT),
        options,
        relations: RelationSnapshot::default(),
        leadership: LeadershipSnapshot {
            is_coordinator,
            ..Default::default()
        },
        release: Release::Queens,
        network: StaticNetwork::default()
            .with_subnet("10.0.0.0/24", "eth0", "255.255.255.0")
            .with_binding("private", "10.0.0.11")
            .with_address("10.0.0.11"),
        certificate_request: Bucket::new(),
    }
}

pub fn rid(s: &str) -> RelationId {
    s.parse().expect("Invalid relation id")
}

pub fn event(hook: &str, relation_id: Option<&str>, unit: Option<&str>) -> Event {
    Event::from_hook_name(hook, relation_id.map(rid), unit.map(UnitId::new))
        .expect("Invalid hook")
}
