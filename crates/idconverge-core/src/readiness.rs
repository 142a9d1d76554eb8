// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Readiness predicates.
//!
//! Nothing here is cached: every decision re-reads the relation store, the
//! local store and the coordinator settings.

use serde::Serialize;
use tracing::debug;

use crate::config::ServiceOptions;
use crate::error::Result;
use crate::event::RelationKind;
use crate::leadership::LeadershipOracle;
use crate::net;
use crate::persistence::{LocalStore, SCHEMA_INITIALIZED_KEY, is_truthy};
use crate::relation::RelationStore;
use crate::relation::records::{HaData, SharedDbData};

/// Derived readiness of the backing database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ReadinessState {
    /// The database relation carries a complete credential set for this unit.
    pub db_reachable: bool,
    /// The schema has been migrated.
    pub schema_initialized: bool,
}

impl ReadinessState {
    /// Evaluate both predicates.
    pub async fn evaluate(
        relations: &dyn RelationStore,
        local: &dyn LocalStore,
        leadership: &dyn LeadershipOracle,
        options: &ServiceOptions,
    ) -> Result<Self> {
        Ok(Self {
            db_reachable: db_reachable(relations, options).await?,
            schema_initialized: schema_initialized(local, leadership).await?,
        })
    }
}

/// Whether any database unit has published a usable credential set for us.
///
/// A unit qualifies when it publishes a host and a password, we have a
/// database name and user to ask for, the unit's access list (if it publishes
/// one) names this unit, and on IPv6 deployments the host is an IPv6-capable
/// address inside the advertised access network.
pub async fn db_reachable(relations: &dyn RelationStore, options: &ServiceOptions) -> Result<bool> {
    if options.database.is_empty() || options.database_user.is_empty() {
        return Ok(false);
    }

    let local_unit = relations.local_unit().clone();
    for rid in relations.relation_ids(&RelationKind::SharedDb).await? {
        for unit in relations.related_units(&rid).await? {
            let data = SharedDbData::from_bucket(&relations.get_bucket(&rid, &unit).await?);

            let (Some(db_host), Some(_)) = (data.db_host.as_deref(), data.password.as_deref())
            else {
                continue;
            };

            if let Some(allowed) = &data.allowed_units
                && !allowed.contains(&local_unit)
            {
                debug!(%rid, %unit, "Database access list does not include this unit");
                continue;
            }

            if options.prefer_ipv6 {
                if net::is_ipv4(db_host) {
                    debug!(%rid, %unit, db_host, "IPv4 database host on an IPv6 deployment");
                    continue;
                }
                if let Some(access_network) = data.access_network.as_deref()
                    && net::is_ipv6(db_host)
                    && !net::in_network(db_host, access_network)
                {
                    debug!(%rid, %unit, db_host, access_network, "Database host outside access network");
                    continue;
                }
            }

            return Ok(true);
        }
    }

    Ok(false)
}

/// Whether the schema-initialised flag is set, locally or by the coordinator.
pub async fn schema_initialized(
    local: &dyn LocalStore,
    leadership: &dyn LeadershipOracle,
) -> Result<bool> {
    if is_truthy(local.get(SCHEMA_INITIALIZED_KEY).await?.as_deref()) {
        return Ok(true);
    }
    Ok(is_truthy(
        leadership
            .coordinator_get(SCHEMA_INITIALIZED_KEY)
            .await?
            .as_deref(),
    ))
}

/// Whether the unit should wait for an HA cluster: a VIP or DNS HA is
/// configured, or an HA relation already has units on it.
pub async fn expect_ha(relations: &dyn RelationStore, options: &ServiceOptions) -> Result<bool> {
    if options.ha_configured() {
        return Ok(true);
    }
    for rid in relations.relation_ids(&RelationKind::Ha).await? {
        if !relations.related_units(&rid).await?.is_empty() {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Whether any HA unit reports the cluster as formed.
pub async fn is_clustered(relations: &dyn RelationStore) -> Result<bool> {
    for rid in relations.relation_ids(&RelationKind::Ha).await? {
        for unit in relations.related_units(&rid).await? {
            if HaData::from_bucket(&relations.get_bucket(&rid, &unit).await?).clustered {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{RelationId, UnitId};
    use crate::leadership::InMemoryLeadership;
    use crate::persistence::MemoryLocalStore;
    use crate::relation::InMemoryRelationStore;

    fn db_rid() -> RelationId {
        "shared-db:1".parse().unwrap()
    }

    async fn store_with_db(pairs: &[(&str, &str)]) -> InMemoryRelationStore {
        let store = InMemoryRelationStore::new(UnitId::new("keystone/0"));
        for (key, value) in pairs {
            store
                .set_remote(&db_rid(), &UnitId::new("mysql/0"), key, value)
                .await;
        }
        store
    }

    #[tokio::test]
    async fn test_db_not_reachable_without_password() {
        let store = store_with_db(&[("db_host", "10.0.0.9")]).await;
        assert!(!db_reachable(&store, &ServiceOptions::default()).await.unwrap());
    }

    #[tokio::test]
    async fn test_db_reachable_with_complete_credentials() {
        let store = store_with_db(&[("db_host", "10.0.0.9"), ("password", "pw")]).await;
        assert!(db_reachable(&store, &ServiceOptions::default()).await.unwrap());

        let options = ServiceOptions {
            database: String::new(),
            ..Default::default()
        };
        assert!(!db_reachable(&store, &options).await.unwrap());
    }

    #[tokio::test]
    async fn test_db_access_list() {
        let store = store_with_db(&[
            ("db_host", "10.0.0.9"),
            ("password", "pw"),
            ("allowed_units", "keystone/1 keystone/2"),
        ])
        .await;
        assert!(!db_reachable(&store, &ServiceOptions::default()).await.unwrap());

        store
            .set_remote(&db_rid(), &UnitId::new("mysql/0"), "allowed_units", "keystone/0 keystone/1")
            .await;
        assert!(db_reachable(&store, &ServiceOptions::default()).await.unwrap());
    }

    #[tokio::test]
    async fn test_db_ipv6_checks() {
        let options = ServiceOptions {
            prefer_ipv6: true,
            ..Default::default()
        };

        let store = store_with_db(&[("db_host", "10.0.0.9"), ("password", "pw")]).await;
        assert!(!db_reachable(&store, &options).await.unwrap());

        let store = store_with_db(&[
            ("db_host", "2001:db8:1::9"),
            ("password", "pw"),
            ("access-network", "2001:db8:2::/64"),
        ])
        .await;
        assert!(!db_reachable(&store, &options).await.unwrap());

        store
            .set_remote(&db_rid(), &UnitId::new("mysql/0"), "access-network", "2001:db8:1::/64")
            .await;
        assert!(db_reachable(&store, &options).await.unwrap());
    }

    #[tokio::test]
    async fn test_schema_initialized_from_either_source() {
        let local = MemoryLocalStore::new();
        let leadership = InMemoryLeadership::new(true);
        assert!(!schema_initialized(&local, &leadership).await.unwrap());

        leadership.coordinator_set(SCHEMA_INITIALIZED_KEY, "True").await.unwrap();
        assert!(schema_initialized(&local, &leadership).await.unwrap());

        let local = MemoryLocalStore::new();
        local.set(SCHEMA_INITIALIZED_KEY, "True").await.unwrap();
        assert!(schema_initialized(&local, &InMemoryLeadership::new(false)).await.unwrap());
    }

    #[tokio::test]
    async fn test_expect_ha_from_options_or_related_units() {
        let store = InMemoryRelationStore::new(UnitId::new("keystone/0"));
        let options = ServiceOptions::default();
        assert!(!expect_ha(&store, &options).await.unwrap());

        let dns = ServiceOptions {
            dns_ha: true,
            ..Default::default()
        };
        assert!(expect_ha(&store, &dns).await.unwrap());

        let rid: RelationId = "ha:2".parse().unwrap();
        store.add_relation(&rid).await;
        assert!(!expect_ha(&store, &options).await.unwrap());

        store.set_remote(&rid, &UnitId::new("hacluster/0"), "private-address", "10.0.0.60").await;
        assert!(expect_ha(&store, &options).await.unwrap());
    }

    #[tokio::test]
    async fn test_is_clustered() {
        let store = InMemoryRelationStore::new(UnitId::new("keystone/0"));
        let rid: RelationId = "ha:2".parse().unwrap();
        store.set_remote(&rid, &UnitId::new("hacluster/0"), "clustered", "").await;
        assert!(!is_clustered(&store).await.unwrap());

        store.set_remote(&rid, &UnitId::new("hacluster/0"), "clustered", "yes").await;
        assert!(is_clustered(&store).await.unwrap());
    }
}
