// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Lifecycle, peer, HA and certificate handlers.

use tracing::{debug, info, instrument, warn};

use super::{HookContext, NotReady, backends, database, identity};
use crate::capabilities::ConfigTarget;
use crate::endpoints::{EndpointType, relation_address};
use crate::error::Result;
use crate::event::{RelationId, RelationKind};
use crate::ha::HaResourcePlan;
use crate::persistence::{SCHEMA_INITIALIZED_KEY, is_truthy};
use crate::relation::Bucket;
use crate::relation::records::HaData;

/// Peer keys echoed back into our own bucket so they survive the unit that
/// first published them. Matched as substrings.
pub const PEER_ECHO_WHITELIST: [&str; 3] = ["_passwd", "identity-service:", "db-initialised"];

// ============================================================================
// Lifecycle
// ============================================================================

/// Service options changed.
#[instrument(skip(ctx))]
pub async fn config_changed(ctx: &mut HookContext<'_>) -> Result<()> {
    database::refresh_ipv6_requests(ctx).await?;

    for rid in ctx.relation_ids(RelationKind::Cluster).await? {
        cluster_joined(ctx, &rid).await?;
    }

    ctx.render_all().await?;

    identity::fan_out(ctx, true).await?;
    backends::update_all_domain_backends(ctx).await?;
    backends::update_all_fid_backends(ctx).await?;

    for rid in ctx.relation_ids(RelationKind::Ha).await? {
        ha_joined(ctx, &rid).await?;
    }
    Ok(())
}

/// The engine itself was upgraded.
#[instrument(skip(ctx))]
pub async fn upgrade_charm(ctx: &mut HookContext<'_>) -> Result<()> {
    ctx.render_all().await?;
    database::migrate_if_ready(ctx).await?;
    if ctx.is_coordinator() {
        debug!("Coordinator, ensuring endpoint configuration is up to date");
        identity::fan_out(ctx, true).await?;
    }
    Ok(())
}

/// Periodic re-check. Re-runs the gated fan-out so deferred work is retried.
#[instrument(skip(ctx))]
pub async fn periodic(ctx: &mut HookContext<'_>) -> Result<()> {
    identity::fan_out(ctx, true).await
}

/// This unit was elected, or the coordinator's settings changed.
///
/// Re-renders the token flush job (active on the coordinator only), mirrors
/// the coordinator's schema flag locally and fans out.
#[instrument(skip(ctx))]
pub async fn leadership_changed(ctx: &mut HookContext<'_>) -> Result<()> {
    ctx.render(ConfigTarget::TokenFlushCron).await?;

    let coordinator_flag = ctx
        .collaborators
        .leadership
        .coordinator_get(SCHEMA_INITIALIZED_KEY)
        .await?;
    if is_truthy(coordinator_flag.as_deref()) {
        ctx.collaborators
            .local
            .set(SCHEMA_INITIALIZED_KEY, database::FLAG_SET)
            .await?;
    }

    identity::fan_out(ctx, true).await
}

// ============================================================================
// Peers
// ============================================================================

/// Announce our addresses to peers.
#[instrument(skip(ctx), fields(relation_id = %relation_id))]
pub async fn cluster_joined(ctx: &mut HookContext<'_>, relation_id: &RelationId) -> Result<()> {
    let network = ctx.collaborators.network.as_ref();
    let mut settings = Bucket::new();
    for endpoint_type in EndpointType::ALL {
        if let Some(address) = relation_address(ctx.options, network, endpoint_type) {
            settings.insert(format!("{}-address", endpoint_type.as_str()), address);
        }
    }
    if let Some(address) = network.relation_ip("cluster", None) {
        settings.insert("private-address".to_string(), address);
    }
    ctx.actions.stage_write(relation_id, settings);
    Ok(())
}

/// A peer changed its bucket.
///
/// Echoes whitelisted keys from the peer into our own bucket, fans out and
/// re-renders everything.
#[instrument(skip(ctx), fields(relation_id = %relation_id))]
pub async fn cluster_changed(ctx: &mut HookContext<'_>, relation_id: &RelationId) -> Result<()> {
    let event = ctx.event;
    if let Some(unit) = event.remote_unit() {
        let echoed: Bucket = ctx
            .remote_bucket(relation_id, unit)
            .await?
            .into_iter()
            .filter(|(key, _)| PEER_ECHO_WHITELIST.iter().any(|w| key.contains(w)))
            .collect();
        debug!(keys = echoed.len(), peer = %unit, "Echoing peer settings");
        ctx.actions.stage_write(relation_id, echoed);
    }

    identity::fan_out(ctx, true).await?;
    ctx.render_all().await
}

// ============================================================================
// HA
// ============================================================================

/// Publish the HA resource plan. Coordinator only.
#[instrument(skip(ctx), fields(relation_id = %relation_id))]
pub async fn ha_joined(ctx: &mut HookContext<'_>, relation_id: &RelationId) -> Result<()> {
    if !ctx.is_coordinator() {
        ctx.defer("ha-joined", NotReady::NotCoordinator, Some(relation_id));
        return Ok(());
    }

    let plan = HaResourcePlan::build(ctx.options, ctx.collaborators.network.as_ref());
    for skipped in &plan.skipped {
        warn!(vip = %skipped.vip, reason = %skipped.reason, "VIP left out of HA plan");
    }
    info!(
        resources = plan.resources.len(),
        groups = plan.groups.len(),
        "Publishing HA resource plan"
    );
    ctx.actions.stage_write(relation_id, plan.to_bucket());
    Ok(())
}

/// The HA subordinate changed. Fan out once it reports the cluster formed.
#[instrument(skip(ctx), fields(relation_id = %relation_id))]
pub async fn ha_changed(ctx: &mut HookContext<'_>, relation_id: &RelationId) -> Result<()> {
    ctx.render_all().await?;

    let clustered = match ctx.remote_unit_or_first(relation_id).await? {
        Some(unit) => HaData::from_bucket(&ctx.remote_bucket(relation_id, &unit).await?).clustered,
        None => false,
    };
    if clustered {
        info!("Cluster configured, updating endpoint configuration");
        identity::fan_out(ctx, true).await?;
    }
    Ok(())
}

// ============================================================================
// Certificates
// ============================================================================

/// Ask the certificate provider for certificates.
#[instrument(skip(ctx), fields(relation_id = %relation_id))]
pub async fn certificates_joined(ctx: &mut HookContext<'_>, relation_id: &RelationId) -> Result<()> {
    let request = ctx.collaborators.certificates.certificate_request().await?;
    ctx.actions.stage_write(relation_id, request);
    Ok(())
}

/// The certificate provider published certificates.
#[instrument(skip(ctx), fields(relation_id = %relation_id))]
pub async fn certificates_changed(ctx: &mut HookContext<'_>, relation_id: &RelationId) -> Result<()> {
    let event = ctx.event;
    ctx.collaborators
        .certificates
        .process_certificates(relation_id, event.remote_unit())
        .await?;
    ctx.render_all().await?;
    identity::fan_out(ctx, true).await?;
    backends::update_all_domain_backends(ctx).await
}
