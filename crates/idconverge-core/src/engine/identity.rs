// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Identity relation handlers and the gated fan-out.
//!
//! Every handler that writes to the identity backend follows the same gate
//! order: coordinator, database reachable, schema initialised, HA formed (when
//! HA is expected). Failing a gate is a [`Deferral`](super::Deferral), never an
//! error; a later event re-runs the whole check.

use tracing::{debug, info, instrument};
use uuid::Uuid;

use super::{HookContext, NotReady};
use crate::endpoints::{EndpointSet, EndpointType, resolve_address};
use crate::error::Result;
use crate::event::{RelationId, RelationKind, UnitId};
use crate::relation::Bucket;
use crate::relation::records::{CredentialsRequest, ServiceRequest};

/// Coordinator setting holding the generated admin password.
pub const ADMIN_PASSWORD_KEY: &str = "admin_passwd";

const ADMIN_DOMAIN: &str = "admin_domain";
const ADMIN_PROJECT: &str = "admin";

/// Re-run every identity handler for every related unit.
///
/// Skipped entirely while paused, before the database is reachable (unless
/// `check_db_ready` is false because the caller just checked), and before the
/// schema is initialised. On the coordinator the initial admin and the
/// service's own endpoints are ensured first.
#[instrument(skip(ctx))]
pub async fn fan_out(ctx: &mut HookContext<'_>, check_db_ready: bool) -> Result<()> {
    const HANDLER: &str = "identity-fan-out";

    if ctx.is_paused().await? {
        ctx.defer(HANDLER, NotReady::Paused, None);
        return Ok(());
    }
    if check_db_ready && !ctx.db_reachable().await? {
        ctx.defer(HANDLER, NotReady::DbNotReady, None);
        return Ok(());
    }
    if !ctx.schema_initialized().await? {
        ctx.defer(HANDLER, NotReady::SchemaNotInitialized, None);
        return Ok(());
    }

    if ctx.is_coordinator() {
        let clustered = ctx.is_clustered().await?;
        let endpoints = EndpointSet::local(
            ctx.options,
            ctx.collaborators.network.as_ref(),
            clustered,
        );
        ctx.collaborators
            .backend
            .ensure_initial_admin(&endpoints)
            .await?;
    }

    info!("Updating every identity relation");
    for rid in ctx.relation_ids(RelationKind::IdentityService).await? {
        for unit in ctx.related_units(&rid).await? {
            identity_service_changed(ctx, &rid, &unit).await?;
        }
    }
    for rid in ctx.relation_ids(RelationKind::IdentityAdmin).await? {
        identity_admin_changed(ctx, &rid).await?;
    }
    for rid in ctx.relation_ids(RelationKind::IdentityCredentials).await? {
        for unit in ctx.related_units(&rid).await? {
            identity_credentials_changed(ctx, &rid, &unit).await?;
        }
    }
    Ok(())
}

/// A service unit asked for (or updated) its catalogue entry.
#[instrument(skip(ctx), fields(relation_id = %relation_id, unit = %unit))]
pub async fn identity_service_changed(
    ctx: &mut HookContext<'_>,
    relation_id: &RelationId,
    unit: &UnitId,
) -> Result<()> {
    const HANDLER: &str = "identity-service-changed";

    if !ctx.is_coordinator() {
        relay_peer_settings(ctx).await?;
        ctx.defer(HANDLER, NotReady::NotCoordinator, Some(relation_id));
        return Ok(());
    }
    if !ctx.db_reachable().await? {
        ctx.defer(HANDLER, NotReady::DbNotReady, Some(relation_id));
        return Ok(());
    }
    if !ctx.schema_initialized().await? {
        ctx.defer(HANDLER, NotReady::SchemaNotInitialized, Some(relation_id));
        return Ok(());
    }
    if ctx.awaiting_cluster().await? {
        ctx.defer(HANDLER, NotReady::NotClustered, Some(relation_id));
        return Ok(());
    }

    let request = ServiceRequest::from_bucket(&ctx.remote_bucket(relation_id, unit).await?);
    let backend = ctx.collaborators.backend.clone();

    let settings = backend.register_service(relation_id, unit, &request).await?;
    peer_store_and_set(ctx, relation_id, settings).await?;

    if backend.is_service_present("neutron", "network").await? {
        backend.delete_service_entry("quantum", "network").await?;
    }

    if let Some(service) = request.service.as_deref() {
        let fingerprint = EndpointSet::from_request(&request).fingerprint();
        let mut notification = Bucket::new();
        notification.insert(format!("{}-endpoint-changed", service), fingerprint);
        for rid in ctx.relation_ids(RelationKind::IdentityNotifications).await? {
            ctx.actions.stage_write(&rid, notification.clone());
        }
    }
    Ok(())
}

/// Publish settings on a relation and keep a copy in our peer bucket, keyed
/// `<relation-id>_<key>`, so any unit can re-publish them after a failover.
async fn peer_store_and_set(
    ctx: &mut HookContext<'_>,
    relation_id: &RelationId,
    settings: Bucket,
) -> Result<()> {
    if settings.is_empty() {
        return Ok(());
    }
    let prefix = format!("{}_", relation_id);
    let peer: Bucket = settings
        .iter()
        .map(|(key, value)| (format!("{}{}", prefix, key), value.clone()))
        .collect();
    for rid in ctx.relation_ids(RelationKind::Cluster).await? {
        ctx.actions.stage_write(&rid, peer.clone());
    }
    ctx.actions.stage_write(relation_id, settings);
    Ok(())
}

/// Re-publish the coordinator's settings from our peer bucket.
///
/// Keeps service credentials on the relation even if the unit that first
/// published them goes away. A stored value of `None` unsets the key.
async fn relay_peer_settings(ctx: &mut HookContext<'_>) -> Result<()> {
    let cluster_rids = ctx.relation_ids(RelationKind::Cluster).await?;
    for rid in ctx.relation_ids(RelationKind::IdentityService).await? {
        let prefix = format!("{}_", rid);
        let mut settings = Bucket::new();
        for cluster_rid in &cluster_rids {
            for (key, value) in ctx.own_bucket(cluster_rid).await? {
                if let Some(stripped) = key.strip_prefix(&prefix) {
                    let value = if value == "None" { String::new() } else { value };
                    settings.insert(stripped.to_string(), value);
                }
            }
        }
        if settings.contains_key("service_password") {
            debug!(relation_id = %rid, keys = settings.len(), "Relaying peer-stored settings");
            ctx.actions.stage_write(&rid, settings);
        }
    }
    Ok(())
}

/// A consumer asked for a plain user account.
#[instrument(skip(ctx), fields(relation_id = %relation_id, unit = %unit))]
pub async fn identity_credentials_changed(
    ctx: &mut HookContext<'_>,
    relation_id: &RelationId,
    unit: &UnitId,
) -> Result<()> {
    const HANDLER: &str = "identity-credentials-changed";

    if !ctx.is_coordinator() {
        ctx.defer(HANDLER, NotReady::NotCoordinator, Some(relation_id));
        return Ok(());
    }
    if ctx.awaiting_cluster().await? {
        ctx.defer(HANDLER, NotReady::NotClustered, Some(relation_id));
        return Ok(());
    }
    if !ctx.db_reachable().await? {
        ctx.defer(HANDLER, NotReady::DbNotReady, Some(relation_id));
        return Ok(());
    }
    if !ctx.schema_initialized().await? {
        ctx.defer(HANDLER, NotReady::SchemaNotInitialized, Some(relation_id));
        return Ok(());
    }

    let request = CredentialsRequest::from_bucket(&ctx.remote_bucket(relation_id, unit).await?);
    let settings = ctx
        .collaborators
        .backend
        .issue_credentials(relation_id, unit, &request)
        .await?;
    ctx.actions.stage_write(relation_id, settings);
    Ok(())
}

/// A consumer of the admin credentials joined or changed.
///
/// Not coordinator-gated: every unit publishes the same derived settings in its
/// own bucket. Only the coordinator may generate a missing admin password.
#[instrument(skip(ctx), fields(relation_id = %relation_id))]
pub async fn identity_admin_changed(ctx: &mut HookContext<'_>, relation_id: &RelationId) -> Result<()> {
    const HANDLER: &str = "identity-admin-changed";

    if ctx.awaiting_cluster().await? {
        ctx.defer(HANDLER, NotReady::NotClustered, Some(relation_id));
        return Ok(());
    }

    let options = ctx.options;
    let clustered = ctx.is_clustered().await?;
    let api_version = options.preferred_api_version;

    let mut settings = Bucket::new();
    settings.insert(
        "service_hostname".to_string(),
        resolve_address(
            options,
            ctx.collaborators.network.as_ref(),
            clustered,
            EndpointType::Admin,
        )
        .unwrap_or_default(),
    );
    settings.insert("service_port".to_string(), options.service_port.to_string());
    settings.insert("service_username".to_string(), options.admin_user.clone());
    settings.insert("service_tenant_name".to_string(), options.admin_role.clone());
    settings.insert("service_region".to_string(), options.region.clone());
    settings.insert(
        "service_protocol".to_string(),
        if options.tls_enabled() { "https" } else { "http" }.to_string(),
    );
    settings.insert("api_version".to_string(), api_version.to_string());
    if api_version > 2 {
        settings.insert("service_user_domain_name".to_string(), ADMIN_DOMAIN.to_string());
        settings.insert("service_project_domain_name".to_string(), ADMIN_DOMAIN.to_string());
        settings.insert("service_project_name".to_string(), ADMIN_PROJECT.to_string());
    }
    if let Some(password) = admin_password(ctx).await? {
        settings.insert("service_password".to_string(), password);
    }

    ctx.actions.stage_write(relation_id, settings);
    Ok(())
}

/// The admin password: configured, else coordinator-held, else generated by the
/// coordinator. Non-coordinators get `None` until the coordinator has one.
async fn admin_password(ctx: &HookContext<'_>) -> Result<Option<String>> {
    if let Some(password) = ctx.options.admin_password.as_deref().filter(|p| !p.is_empty()) {
        return Ok(Some(password.to_string()));
    }

    let leadership = &ctx.collaborators.leadership;
    if let Some(password) = leadership
        .coordinator_get(ADMIN_PASSWORD_KEY)
        .await?
        .filter(|p| !p.is_empty())
    {
        return Ok(Some(password));
    }
    if !ctx.is_coordinator() {
        return Ok(None);
    }

    let generated = Uuid::new_v4().simple().to_string();
    leadership
        .coordinator_set(ADMIN_PASSWORD_KEY, &generated)
        .await?;
    info!("Generated admin password");
    Ok(Some(generated))
}
