// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Database relation handlers and the one-time schema migration.

use tracing::{debug, info, instrument};

use super::{HookContext, NotReady, backends, identity};
use crate::capabilities::{ConfigTarget, Release};
use crate::error::Result;
use crate::event::{RelationId, RelationKind};
use crate::persistence::SCHEMA_INITIALIZED_KEY;
use crate::relation::Bucket;

/// Value written to the schema-initialised flag.
pub const FLAG_SET: &str = "True";

/// Ask the database for our schema and user.
#[instrument(skip(ctx), fields(relation_id = %relation_id))]
pub async fn db_joined(ctx: &mut HookContext<'_>, relation_id: &RelationId) -> Result<()> {
    let settings = database_request(ctx, relation_id).await?;
    ctx.actions.stage_write(relation_id, settings);
    Ok(())
}

/// Settings asking the database for our schema, user and client address.
///
/// IPv6 deployments advertise every global IPv6 address as a JSON list.
/// Otherwise the address is scoped to the first access network any database
/// unit advertises.
pub(super) async fn database_request(
    ctx: &HookContext<'_>,
    relation_id: &RelationId,
) -> Result<Bucket> {
    let network = ctx.collaborators.network.as_ref();
    let hostname = if ctx.options.prefer_ipv6 {
        serde_json::to_string(&network.ipv6_addresses())?
    } else {
        let mut access_network = None;
        for unit in ctx.related_units(relation_id).await? {
            if let Some(cidr) = ctx
                .collaborators
                .relations
                .get(relation_id, &unit, "access-network")
                .await?
            {
                access_network = Some(cidr);
                break;
            }
        }
        network
            .relation_ip("shared-db", access_network.as_deref())
            .unwrap_or_default()
    };

    let mut settings = Bucket::new();
    settings.insert("database".to_string(), ctx.options.database.clone());
    settings.insert("username".to_string(), ctx.options.database_user.clone());
    settings.insert("hostname".to_string(), hostname);
    Ok(settings)
}

/// The database published (or updated) credentials.
#[instrument(skip(ctx))]
pub async fn db_changed(ctx: &mut HookContext<'_>) -> Result<()> {
    let event = ctx.event;
    if !ctx.db_reachable().await? {
        info!("shared-db relation incomplete, peer not ready?");
        ctx.defer("db-changed", NotReady::DbNotReady, event.relation_id());
        return Ok(());
    }

    ctx.render(ConfigTarget::KeystoneConf).await?;
    migrate_if_ready(ctx).await?;
    if ctx.release() >= Release::Liberty {
        ctx.render(ConfigTarget::PolicyJson).await?;
    }
    identity::fan_out(ctx, true).await
}

/// Migrate the schema once, on the coordinator, when the database is ready.
///
/// Already initialised: just fan out. After a successful migration the flag is
/// set (coordinator setting plus local mirror) and every dependent relation
/// is updated, since units may have been waiting on the flag.
///
/// # Errors
///
/// A failed migration propagates and leaves the flag unset, so the next
/// delivery migrates again.
#[instrument(skip(ctx))]
pub async fn migrate_if_ready(ctx: &mut HookContext<'_>) -> Result<()> {
    if !ctx.is_coordinator() {
        debug!("Not coordinator, skipping schema migration");
        return Ok(());
    }

    if ctx.schema_initialized().await? {
        debug!("Schema already initialised, skipping migration");
        return identity::fan_out(ctx, false).await;
    }

    if !ctx.db_reachable().await? {
        ctx.defer("migrate-if-ready", NotReady::DbNotReady, None);
        return Ok(());
    }

    info!("Migrating database schema");
    ctx.collaborators.migrator.migrate().await?;
    ctx.collaborators
        .leadership
        .coordinator_set(SCHEMA_INITIALIZED_KEY, FLAG_SET)
        .await?;
    ctx.collaborators
        .local
        .set(SCHEMA_INITIALIZED_KEY, FLAG_SET)
        .await?;
    ctx.actions.mark_migrated();
    info!("Database schema initialised");

    identity::fan_out(ctx, false).await?;
    backends::update_all_domain_backends(ctx).await
}

/// Re-publish the IPv6 database request on every database relation.
pub(super) async fn refresh_ipv6_requests(ctx: &mut HookContext<'_>) -> Result<()> {
    if !ctx.options.prefer_ipv6 {
        return Ok(());
    }
    for rid in ctx.relation_ids(RelationKind::SharedDb).await? {
        let settings = database_request(ctx, &rid).await?;
        ctx.actions.stage_write(&rid, settings);
    }
    Ok(())
}
