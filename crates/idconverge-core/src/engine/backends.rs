// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Domain backend, federated identity provider and WebSSO handlers.
//!
//! These are gated on capabilities rather than readiness: an identity API
//! older than v3 or a release older than Ocata makes them permanent no-ops,
//! recorded as an [`Incapability`](super::Incapability). Restarts they request
//! go through the nonce-gated restart coordinator at commit time.

use tracing::{debug, info, instrument};

use super::{HookContext, MissingCapability};
use crate::capabilities::{ConfigTarget, Release};
use crate::error::Result;
use crate::event::{RelationId, RelationKind, UnitId};
use crate::relation::records::{DomainBackendData, FidProviderData, FidServiceProviderSettings};
use crate::restart::RestartIntent;

/// First release that supports federation and WebSSO.
pub const FEDERATION_MIN_RELEASE: Release = Release::Ocata;

/// A domain backend published (or updated) its domain.
///
/// The coordinator creates the domain once the database is usable. Every
/// unit, coordinator or not, restarts its own API when the backend's nonce
/// moves, since each unit renders the backend's configuration locally.
#[instrument(skip(ctx), fields(relation_id = %relation_id, unit = %unit))]
pub async fn domain_backend_changed(
    ctx: &mut HookContext<'_>,
    relation_id: &RelationId,
    unit: &UnitId,
) -> Result<()> {
    let missing = ctx.api_v3();
    if !ctx.require("domain-backend-changed", missing, Some(relation_id)) {
        return Ok(());
    }

    let data = DomainBackendData::from_bucket(&ctx.remote_bucket(relation_id, unit).await?);
    let Some(domain_name) = data.domain_name else {
        debug!("Backend has not published a domain name yet");
        return Ok(());
    };

    if ctx.is_coordinator() && ctx.db_reachable().await? && ctx.schema_initialized().await? {
        let domain_id = ctx
            .collaborators
            .backend
            .create_or_show_domain(&domain_name)
            .await?;
        info!(domain = %domain_name, %domain_id, "Domain ensured");
    }

    let services = ctx.api_services();
    ctx.actions.stage_restart(RestartIntent::domain(
        &domain_name,
        data.restart_nonce,
        services,
    ));
    Ok(())
}

/// Re-run the domain backend handler for every backend unit.
pub async fn update_all_domain_backends(ctx: &mut HookContext<'_>) -> Result<()> {
    for rid in ctx.relation_ids(RelationKind::DomainBackend).await? {
        for unit in ctx.related_units(&rid).await? {
            domain_backend_changed(ctx, &rid, &unit).await?;
        }
    }
    Ok(())
}

fn federation_missing(ctx: &HookContext<'_>) -> Option<MissingCapability> {
    ctx.api_v3()
        .or_else(|| ctx.release_at_least(FEDERATION_MIN_RELEASE))
}

/// A federated identity provider joined or changed.
///
/// Publishes where the identity service listens, renders the main config
/// without a digest-triggered restart, and restarts the API only when the
/// provider's nonce moves.
#[instrument(skip(ctx), fields(relation_id = %relation_id))]
pub async fn fid_provider_changed(ctx: &mut HookContext<'_>, relation_id: &RelationId) -> Result<()> {
    let missing = federation_missing(ctx);
    if !ctx.require("fid-provider-changed", missing, Some(relation_id)) {
        return Ok(());
    }

    publish_fid_settings(ctx, relation_id);
    ctx.render_quiet(ConfigTarget::KeystoneConf).await?;

    let nonce = match ctx.remote_unit_or_first(relation_id).await? {
        Some(unit) => {
            FidProviderData::from_bucket(&ctx.remote_bucket(relation_id, &unit).await?)
                .canonical_nonce()
        }
        None => None,
    };
    let services = ctx.api_services();
    ctx.actions
        .stage_restart(RestartIntent::fid(relation_id, nonce, services));
    Ok(())
}

/// A federated identity provider went away. Restart unconditionally.
#[instrument(skip(ctx), fields(relation_id = %relation_id))]
pub async fn fid_provider_broken(ctx: &mut HookContext<'_>, relation_id: &RelationId) -> Result<()> {
    let missing = ctx.release_at_least(FEDERATION_MIN_RELEASE);
    if !ctx.require("fid-provider-broken", missing, Some(relation_id)) {
        return Ok(());
    }
    let services = ctx.api_services();
    ctx.actions.stage_restart(RestartIntent::always(
        &format!("fid-provider-broken:{}", relation_id),
        services,
    ));
    Ok(())
}

/// Publish hostname, port and TLS state to every federated provider.
pub async fn update_all_fid_backends(ctx: &mut HookContext<'_>) -> Result<()> {
    let rids = ctx.relation_ids(RelationKind::FidServiceProvider).await?;
    if rids.is_empty() {
        return Ok(());
    }
    let missing = ctx.release_at_least(FEDERATION_MIN_RELEASE);
    if !ctx.require("update-all-fid-backends", missing, None) {
        return Ok(());
    }
    for rid in rids {
        publish_fid_settings(ctx, &rid);
    }
    Ok(())
}

fn publish_fid_settings(ctx: &mut HookContext<'_>, relation_id: &RelationId) {
    let settings = FidServiceProviderSettings {
        hostname: ctx.options.os_public_hostname.clone(),
        port: ctx.options.service_port,
        tls_enabled: ctx.options.tls_enabled(),
    };
    ctx.actions.stage_write(relation_id, settings.to_bucket());
}

/// A trusted dashboard joined, changed or left. Re-render the main config.
#[instrument(skip(ctx), fields(relation_id = %relation_id))]
pub async fn websso_changed(ctx: &mut HookContext<'_>, relation_id: &RelationId) -> Result<()> {
    let missing = federation_missing(ctx);
    if !ctx.require("websso-changed", missing, Some(relation_id)) {
        return Ok(());
    }
    ctx.render(ConfigTarget::KeystoneConf).await
}
