// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Coordinator gating, leadership handover, peer relay and HA publication.

mod common;

use common::*;
use idconverge_core::config::ServiceOptions;
use idconverge_core::dryrun::BackendCall;
use idconverge_core::engine::NotReady;
use idconverge_core::engine::identity::ADMIN_PASSWORD_KEY;
use idconverge_core::ha::{HAPROXY_RESOURCE, VIP_GROUP};
use idconverge_core::leadership::LeadershipOracle;
use idconverge_core::persistence::SCHEMA_INITIALIZED_KEY;

const SERVICE_RELATION: &str = "identity-service:3";
const CLUSTER_RELATION: &str = "cluster:0";
const HA_RELATION: &str = "ha:5";

fn ha_options() -> ServiceOptions {
    ServiceOptions {
        vip: Some("10.0.0.100".to_string()),
        ..Default::default()
    }
}

/// A follower that sees an already-initialised schema.
async fn initialised_follower(options: ServiceOptions) -> TestContext {
    let mut world = snapshot(false, options);
    world
        .leadership
        .settings
        .insert(SCHEMA_INITIALIZED_KEY.to_string(), "True".to_string());
    TestContext::new(world).await
}

async fn with_glance(ctx: &TestContext) {
    ctx.set_remote(
        SERVICE_RELATION,
        "glance/0",
        &[("service", "glance"), ("region", "RegionOne")],
    )
    .await;
}

#[tokio::test]
async fn test_follower_makes_no_coordinator_writes() {
    let ctx = initialised_follower(ha_options()).await;
    ctx.add_database().await;
    with_glance(&ctx).await;
    ctx.set_remote(HA_RELATION, "hacluster/0", &[("clustered", "yes")]).await;

    for (hook, relation_id, unit) in [
        ("config-changed", None, None),
        ("shared-db-relation-changed", Some(DB_RELATION), Some(DB_UNIT)),
        ("identity-service-relation-changed", Some(SERVICE_RELATION), Some("glance/0")),
        ("ha-relation-joined", Some(HA_RELATION), Some("hacluster/0")),
        ("upgrade-charm", None, None),
    ] {
        ctx.fire(hook, relation_id, unit).await;
    }

    assert_eq!(ctx.world.migrator.calls(), 0);
    assert!(ctx.world.backend.calls().await.is_empty());
    assert!(ctx.own_bucket(HA_RELATION).await.is_empty());
    assert!(ctx.own_bucket(SERVICE_RELATION).await.is_empty());
    assert_eq!(ctx.world.leadership.snapshot().await.settings.len(), 1);
}

#[tokio::test]
async fn test_follower_defers_identity_requests() {
    let ctx = initialised_follower(ServiceOptions::default()).await;
    ctx.add_database().await;
    with_glance(&ctx).await;

    let report = ctx
        .fire("identity-service-relation-changed", Some(SERVICE_RELATION), Some("glance/0"))
        .await;
    assert_eq!(report.deferrals.len(), 1);
    assert_eq!(report.deferrals[0].reason, NotReady::NotCoordinator);
    assert_eq!(report.deferrals[0].relation_id, Some(rid(SERVICE_RELATION)));
}

#[tokio::test]
async fn test_follower_relays_peer_stored_settings() {
    let ctx = initialised_follower(ServiceOptions::default()).await;
    with_glance(&ctx).await;
    // What the coordinator stored for this relation, echoed into our bucket.
    ctx.set_remote(
        CLUSTER_RELATION,
        LOCAL_UNIT,
        &[
            ("identity-service:3_service_password", "pw"),
            ("identity-service:3_service_username", "glance_RegionOne"),
            ("identity-service:3_admin_token", "None"),
            ("identity-service:9_service_password", "other"),
        ],
    )
    .await;

    let report = ctx
        .fire("identity-service-relation-changed", Some(SERVICE_RELATION), Some("glance/0"))
        .await;

    let published = ctx.own_bucket(SERVICE_RELATION).await;
    assert_eq!(published.get("service_password").map(String::as_str), Some("pw"));
    assert_eq!(
        published.get("service_username").map(String::as_str),
        Some("glance_RegionOne")
    );
    assert!(!published.contains_key("admin_token"));
    assert_eq!(report.writes.len(), 2);
}

#[tokio::test]
async fn test_coordinator_stores_settings_for_peers() {
    let ctx = TestContext::coordinator().await;
    ctx.add_database().await;
    with_glance(&ctx).await;
    ctx.set_remote(CLUSTER_RELATION, "keystone/1", &[("private-address", "10.0.0.12")])
        .await;

    ctx.fire("shared-db-relation-changed", Some(DB_RELATION), Some(DB_UNIT))
        .await;

    let peer = ctx.own_bucket(CLUSTER_RELATION).await;
    assert_eq!(
        peer.get("identity-service:3_service_username").map(String::as_str),
        Some("glance_RegionOne")
    );
    assert_eq!(
        peer.get("identity-service:3_service_password"),
        ctx.own_bucket(SERVICE_RELATION).await.get("service_password")
    );
}

#[tokio::test]
async fn test_leadership_handover_converges() {
    let ctx = initialised_follower(ServiceOptions::default()).await;
    ctx.add_database().await;
    with_glance(&ctx).await;

    ctx.fire("identity-service-relation-changed", Some(SERVICE_RELATION), Some("glance/0"))
        .await;
    assert!(ctx.world.backend.calls().await.is_empty());
    assert_eq!(ctx.local_get(SCHEMA_INITIALIZED_KEY).await, None);

    ctx.world.leadership.set_coordinator(true).await;
    let report = ctx.fire("leader-elected", None, None).await;

    assert_eq!(ctx.local_get(SCHEMA_INITIALIZED_KEY).await.as_deref(), Some("True"));
    assert!(!report.migrated);
    assert_eq!(ctx.world.migrator.calls(), 0);
    assert!(ctx.world.backend.calls().await.iter().any(|c| matches!(
        c,
        BackendCall::RegisterService { relation_id, .. } if *relation_id == rid(SERVICE_RELATION)
    )));
    assert_eq!(
        ctx.own_bucket(SERVICE_RELATION)
            .await
            .get("service_username")
            .map(String::as_str),
        Some("glance_RegionOne")
    );
}

#[tokio::test]
async fn test_cluster_changed_echoes_whitelisted_keys() {
    let ctx = TestContext::follower().await;
    ctx.set_remote(
        CLUSTER_RELATION,
        "keystone/1",
        &[
            ("identity-service:3_service_password", "pw"),
            ("db-initialised", "True"),
            ("private-address", "10.0.0.12"),
        ],
    )
    .await;

    ctx.fire("cluster-relation-changed", Some(CLUSTER_RELATION), Some("keystone/1"))
        .await;

    let own = ctx.own_bucket(CLUSTER_RELATION).await;
    assert_eq!(
        own.get("identity-service:3_service_password").map(String::as_str),
        Some("pw")
    );
    assert_eq!(own.get("db-initialised").map(String::as_str), Some("True"));
    assert!(!own.contains_key("private-address"));
}

#[tokio::test]
async fn test_cluster_joined_announces_addresses() {
    let ctx = TestContext::follower().await;
    ctx.set_remote(CLUSTER_RELATION, "keystone/1", &[("private-address", "10.0.0.12")])
        .await;
    ctx.fire("cluster-relation-joined", Some(CLUSTER_RELATION), Some("keystone/1"))
        .await;

    let own = ctx.own_bucket(CLUSTER_RELATION).await;
    assert_eq!(own.get("private-address").map(String::as_str), Some("10.0.0.11"));
    assert_eq!(own.get("admin-address").map(String::as_str), Some("10.0.0.11"));
}

#[tokio::test]
async fn test_ha_plan_published_by_coordinator_only() {
    let follower = TestContext::new(snapshot(false, ha_options())).await;
    let report = follower
        .fire("ha-relation-joined", Some(HA_RELATION), Some("hacluster/0"))
        .await;
    assert!(follower.own_bucket(HA_RELATION).await.is_empty());
    assert_eq!(report.deferrals[0].reason, NotReady::NotCoordinator);

    let coordinator = TestContext::new(snapshot(true, ha_options())).await;
    coordinator
        .set_remote(HA_RELATION, "hacluster/0", &[("private-address", "10.0.0.60")])
        .await;
    coordinator
        .fire("ha-relation-joined", Some(HA_RELATION), Some("hacluster/0"))
        .await;
    let plan = coordinator.own_bucket(HA_RELATION).await;

    let resources: serde_json::Value =
        serde_json::from_str(&plan["json_resources"]).unwrap();
    assert_eq!(resources["res_ks_eth0_vip"], "ocf:heartbeat:IPaddr2");
    assert_eq!(resources[HAPROXY_RESOURCE], "lsb:haproxy");

    let groups: serde_json::Value = serde_json::from_str(&plan["json_groups"]).unwrap();
    assert_eq!(groups[VIP_GROUP], "res_ks_eth0_vip");
    assert_eq!(plan["corosync_bindiface"], "eth0");
}

#[tokio::test]
async fn test_status_waits_for_ha_cluster() {
    let mut world = snapshot(true, ha_options());
    world
        .leadership
        .settings
        .insert(SCHEMA_INITIALIZED_KEY.to_string(), "True".to_string());
    let ctx = TestContext::new(world).await;
    ctx.add_database().await;

    let report = ctx.fire("update-status", None, None).await;
    assert_eq!(
        report.status.map(|s| s.message),
        Some("Waiting for HA cluster to form".to_string())
    );

    ctx.set_remote(HA_RELATION, "hacluster/0", &[("clustered", "yes")]).await;
    let report = ctx
        .fire("ha-relation-changed", Some(HA_RELATION), Some("hacluster/0"))
        .await;
    assert_eq!(report.status.map(|s| s.message), Some("Unit is ready".to_string()));
}

#[tokio::test]
async fn test_related_ha_units_imply_ha_without_vip() {
    let ctx = initialised_follower(ServiceOptions::default()).await;
    ctx.add_database().await;
    ctx.set_remote(HA_RELATION, "hacluster/0", &[("private-address", "10.0.0.60")])
        .await;

    let report = ctx.fire("update-status", None, None).await;
    assert_eq!(
        report.status.map(|s| s.message),
        Some("Waiting for HA cluster to form".to_string())
    );
}

#[tokio::test]
async fn test_admin_password_generated_once_by_coordinator() {
    let ctx = TestContext::coordinator().await;
    ctx.set_remote("identity-admin:7", "openstack-dashboard/0", &[("private-address", "10.0.0.40")])
        .await;

    ctx.fire("identity-admin-relation-changed", Some("identity-admin:7"), Some("openstack-dashboard/0"))
        .await;
    let stored = ctx
        .world
        .leadership
        .coordinator_get(ADMIN_PASSWORD_KEY)
        .await
        .unwrap()
        .expect("password generated");

    let published = ctx.own_bucket("identity-admin:7").await;
    assert_eq!(published.get("service_password"), Some(&stored));
    assert_eq!(published.get("api_version").map(String::as_str), Some("3"));
    assert_eq!(
        published.get("service_project_name").map(String::as_str),
        Some("admin")
    );

    // A second delivery reuses the stored password.
    let report = ctx
        .fire("identity-admin-relation-changed", Some("identity-admin:7"), Some("openstack-dashboard/0"))
        .await;
    assert!(report.writes.is_empty());
}

#[tokio::test]
async fn test_follower_admin_settings_omit_missing_password() {
    let ctx = TestContext::follower().await;
    ctx.set_remote("identity-admin:7", "openstack-dashboard/0", &[("private-address", "10.0.0.40")])
        .await;
    ctx.fire("identity-admin-relation-changed", Some("identity-admin:7"), Some("openstack-dashboard/0"))
        .await;

    let published = ctx.own_bucket("identity-admin:7").await;
    assert!(!published.contains_key("service_password"));
    assert_eq!(published.get("service_username").map(String::as_str), Some("admin"));
}
