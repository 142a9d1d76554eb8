// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Static dispatch table.

use serde::Serialize;

use super::{HookContext, backends, cluster, database, identity};
use crate::error::{ConvergeError, Result};
use crate::event::{Event, EventKind, RelationId, UnitId};
use crate::restart::RestartMode;

/// A registered handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Route {
    /// `config-changed`
    ConfigChanged,
    /// `upgrade-charm`
    UpgradeCharm,
    /// `update-status`
    Periodic,
    /// `leader-elected`
    LeaderElected,
    /// `leader-settings-changed`
    LeaderSettingsChanged,
    /// `shared-db-relation-joined`
    DbJoined,
    /// `shared-db-relation-changed`
    DbChanged,
    /// `identity-service-relation-changed`
    IdentityServiceChanged,
    /// `identity-credentials-relation-{joined,changed}`
    IdentityCredentialsChanged,
    /// `identity-admin-relation-changed`
    IdentityAdminChanged,
    /// `cluster-relation-joined`
    ClusterJoined,
    /// `cluster-relation-changed`
    ClusterChanged,
    /// `ha-relation-joined`
    HaJoined,
    /// `ha-relation-changed`
    HaChanged,
    /// `domain-backend-relation-changed`
    DomainBackendChanged,
    /// `keystone-fid-service-provider-relation-{joined,changed}`
    FidProviderChanged,
    /// `keystone-fid-service-provider-relation-broken`
    FidProviderBroken,
    /// `websso-trusted-dashboard-relation-{joined,changed,broken}`
    WebssoChanged,
    /// `certificates-relation-joined`
    CertificatesJoined,
    /// `certificates-relation-changed`
    CertificatesChanged,
}

/// (event kind, relation name) → route. Lifecycle events carry no relation.
const ROUTES: &[(EventKind, Option<&str>, Route)] = &[
    (EventKind::ConfigChanged, None, Route::ConfigChanged),
    (EventKind::UpgradeCharm, None, Route::UpgradeCharm),
    (EventKind::Periodic, None, Route::Periodic),
    (EventKind::LeaderElected, None, Route::LeaderElected),
    (EventKind::LeaderSettingsChanged, None, Route::LeaderSettingsChanged),
    (EventKind::Joined, Some("shared-db"), Route::DbJoined),
    (EventKind::Changed, Some("shared-db"), Route::DbChanged),
    (EventKind::Changed, Some("identity-service"), Route::IdentityServiceChanged),
    (EventKind::Joined, Some("identity-credentials"), Route::IdentityCredentialsChanged),
    (EventKind::Changed, Some("identity-credentials"), Route::IdentityCredentialsChanged),
    (EventKind::Changed, Some("identity-admin"), Route::IdentityAdminChanged),
    (EventKind::Joined, Some("cluster"), Route::ClusterJoined),
    (EventKind::Changed, Some("cluster"), Route::ClusterChanged),
    (EventKind::Joined, Some("ha"), Route::HaJoined),
    (EventKind::Changed, Some("ha"), Route::HaChanged),
    (EventKind::Changed, Some("domain-backend"), Route::DomainBackendChanged),
    (EventKind::Joined, Some("keystone-fid-service-provider"), Route::FidProviderChanged),
    (EventKind::Changed, Some("keystone-fid-service-provider"), Route::FidProviderChanged),
    (EventKind::Broken, Some("keystone-fid-service-provider"), Route::FidProviderBroken),
    (EventKind::Joined, Some("websso-trusted-dashboard"), Route::WebssoChanged),
    (EventKind::Changed, Some("websso-trusted-dashboard"), Route::WebssoChanged),
    (EventKind::Broken, Some("websso-trusted-dashboard"), Route::WebssoChanged),
    (EventKind::Joined, Some("certificates"), Route::CertificatesJoined),
    (EventKind::Changed, Some("certificates"), Route::CertificatesChanged),
];

impl Route {
    /// Find the handler for an event.
    pub fn lookup(event: &Event) -> Option<Route> {
        let kind = event.kind();
        let relation = event.relation_kind().map(|k| k.as_str());
        ROUTES
            .iter()
            .find(|(k, r, _)| *k == kind && *r == relation)
            .map(|(_, _, route)| *route)
    }

    /// How services selected for restart are bounced.
    pub fn restart_mode(&self) -> RestartMode {
        match self {
            Self::UpgradeCharm
            | Self::LeaderElected
            | Self::LeaderSettingsChanged
            | Self::ClusterChanged
            | Self::CertificatesChanged => RestartMode::StopStart,
            _ => RestartMode::Restart,
        }
    }

    pub(super) async fn run(self, ctx: &mut HookContext<'_>) -> Result<()> {
        let event = ctx.event;
        match self {
            Self::ConfigChanged => cluster::config_changed(ctx).await,
            Self::UpgradeCharm => cluster::upgrade_charm(ctx).await,
            Self::Periodic => cluster::periodic(ctx).await,
            Self::LeaderElected | Self::LeaderSettingsChanged => {
                cluster::leadership_changed(ctx).await
            }
            Self::DbJoined => database::db_joined(ctx, &event_relation(event)?).await,
            Self::DbChanged => database::db_changed(ctx).await,
            Self::IdentityServiceChanged => {
                let (rid, unit) = event_unit(event)?;
                identity::identity_service_changed(ctx, &rid, &unit).await
            }
            Self::IdentityCredentialsChanged => {
                let (rid, unit) = event_unit(event)?;
                identity::identity_credentials_changed(ctx, &rid, &unit).await
            }
            Self::IdentityAdminChanged => {
                identity::identity_admin_changed(ctx, &event_relation(event)?).await
            }
            Self::ClusterJoined => cluster::cluster_joined(ctx, &event_relation(event)?).await,
            Self::ClusterChanged => cluster::cluster_changed(ctx, &event_relation(event)?).await,
            Self::HaJoined => cluster::ha_joined(ctx, &event_relation(event)?).await,
            Self::HaChanged => cluster::ha_changed(ctx, &event_relation(event)?).await,
            Self::DomainBackendChanged => {
                let (rid, unit) = event_unit(event)?;
                backends::domain_backend_changed(ctx, &rid, &unit).await
            }
            Self::FidProviderChanged => {
                backends::fid_provider_changed(ctx, &event_relation(event)?).await
            }
            Self::FidProviderBroken => {
                backends::fid_provider_broken(ctx, &event_relation(event)?).await
            }
            Self::WebssoChanged => backends::websso_changed(ctx, &event_relation(event)?).await,
            Self::CertificatesJoined => {
                cluster::certificates_joined(ctx, &event_relation(event)?).await
            }
            Self::CertificatesChanged => {
                cluster::certificates_changed(ctx, &event_relation(event)?).await
            }
        }
    }
}

fn event_relation(event: &Event) -> Result<RelationId> {
    event
        .relation_id()
        .cloned()
        .ok_or_else(|| ConvergeError::ValidationError {
            field: "relation_id".to_string(),
            message: format!("event '{}' carries no relation id", event),
        })
}

fn event_unit(event: &Event) -> Result<(RelationId, UnitId)> {
    let rid = event_relation(event)?;
    let unit = event
        .remote_unit()
        .cloned()
        .ok_or_else(|| ConvergeError::ValidationError {
            field: "remote_unit".to_string(),
            message: format!("event '{}' carries no remote unit", event),
        })?;
    Ok((rid, unit))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn relation_event(hook: &str, rid: &str) -> Event {
        Event::from_hook_name(hook, Some(rid.parse().unwrap()), Some(UnitId::new("x/0"))).unwrap()
    }

    #[test]
    fn test_lookup() {
        assert_eq!(Route::lookup(&Event::ConfigChanged), Some(Route::ConfigChanged));
        assert_eq!(Route::lookup(&Event::Periodic), Some(Route::Periodic));
        assert_eq!(
            Route::lookup(&relation_event("identity-service-relation-changed", "identity-service:4")),
            Some(Route::IdentityServiceChanged)
        );
        assert_eq!(
            Route::lookup(&relation_event(
                "keystone-fid-service-provider-relation-broken",
                "keystone-fid-service-provider:2"
            )),
            Some(Route::FidProviderBroken)
        );
    }

    #[test]
    fn test_unregistered_events_have_no_route() {
        assert_eq!(
            Route::lookup(&relation_event("identity-service-relation-joined", "identity-service:4")),
            None
        );
        assert_eq!(
            Route::lookup(&relation_event("nrpe-external-master-relation-changed", "nrpe-external-master:1")),
            None
        );
        assert_eq!(
            Route::lookup(&Event::Unrecognized {
                name: "install".to_string()
            }),
            None
        );
    }

    #[test]
    fn test_restart_modes() {
        assert_eq!(Route::ClusterChanged.restart_mode(), RestartMode::StopStart);
        assert_eq!(Route::ConfigChanged.restart_mode(), RestartMode::Restart);
    }

    #[test]
    fn test_every_route_is_registered() {
        let routed: Vec<Route> = ROUTES.iter().map(|(_, _, r)| *r).collect();
        for route in [
            Route::ConfigChanged,
            Route::UpgradeCharm,
            Route::Periodic,
            Route::LeaderElected,
            Route::LeaderSettingsChanged,
            Route::DbJoined,
            Route::DbChanged,
            Route::IdentityServiceChanged,
            Route::IdentityCredentialsChanged,
            Route::IdentityAdminChanged,
            Route::ClusterJoined,
            Route::ClusterChanged,
            Route::HaJoined,
            Route::HaChanged,
            Route::DomainBackendChanged,
            Route::FidProviderChanged,
            Route::FidProviderBroken,
            Route::WebssoChanged,
            Route::CertificatesJoined,
            Route::CertificatesChanged,
        ] {
            assert!(routed.contains(&route), "{:?} has no table entry", route);
        }
    }
}
