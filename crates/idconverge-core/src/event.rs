// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Inbound events and the identifiers they carry.
//!
//! Events are produced by the hosting runtime, one per hook invocation, and
//! consumed exactly once by [`crate::engine::Engine::handle`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConvergeError;

/// Named relation endpoints the engine knows about.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RelationKind {
    /// Database credentials exchange.
    SharedDb,
    /// Services registering endpoints in the catalogue.
    IdentityService,
    /// Consumers that only need a username/password.
    IdentityCredentials,
    /// Consumers that need the admin credentials.
    IdentityAdmin,
    /// Endpoint-changed notification channel.
    IdentityNotifications,
    /// Peer relation between units of this service.
    Cluster,
    /// HA cluster resource manager.
    Ha,
    /// Domain-specific identity backends.
    DomainBackend,
    /// Federated identity providers.
    FidServiceProvider,
    /// Trusted WebSSO dashboards.
    WebssoTrustedDashboard,
    /// TLS certificate provider.
    Certificates,
    /// Any relation name not listed above.
    Other(String),
}

impl RelationKind {
    /// The relation name as used in hook names and relation ids.
    pub fn as_str(&self) -> &str {
        match self {
            Self::SharedDb => "shared-db",
            Self::IdentityService => "identity-service",
            Self::IdentityCredentials => "identity-credentials",
            Self::IdentityAdmin => "identity-admin",
            Self::IdentityNotifications => "identity-notifications",
            Self::Cluster => "cluster",
            Self::Ha => "ha",
            Self::DomainBackend => "domain-backend",
            Self::FidServiceProvider => "keystone-fid-service-provider",
            Self::WebssoTrustedDashboard => "websso-trusted-dashboard",
            Self::Certificates => "certificates",
            Self::Other(name) => name,
        }
    }

    /// Parse a relation name. Unknown names map to [`RelationKind::Other`].
    pub fn parse(s: &str) -> Self {
        match s {
            "shared-db" => Self::SharedDb,
            "identity-service" => Self::IdentityService,
            "identity-credentials" => Self::IdentityCredentials,
            "identity-admin" => Self::IdentityAdmin,
            "identity-notifications" => Self::IdentityNotifications,
            "cluster" => Self::Cluster,
            "ha" => Self::Ha,
            "domain-backend" => Self::DomainBackend,
            "keystone-fid-service-provider" => Self::FidServiceProvider,
            "websso-trusted-dashboard" => Self::WebssoTrustedDashboard,
            "certificates" => Self::Certificates,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A relation instance, e.g. `identity-service:12`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RelationId {
    kind: RelationKind,
    number: u32,
}

impl RelationId {
    /// Create a relation id from its parts.
    pub fn new(kind: RelationKind, number: u32) -> Self {
        Self { kind, number }
    }

    /// The relation kind this id belongs to.
    pub fn kind(&self) -> &RelationKind {
        &self.kind
    }

    /// The numeric part of the id.
    pub fn number(&self) -> u32 {
        self.number
    }
}

impl fmt::Display for RelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.number)
    }
}

impl FromStr for RelationId {
    type Err = ConvergeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |message: &str| ConvergeError::ValidationError {
            field: "relation_id".to_string(),
            message: format!("'{}': {}", s, message),
        };
        let (name, number) = s.rsplit_once(':').ok_or_else(|| invalid("missing ':'"))?;
        if name.is_empty() {
            return Err(invalid("empty relation name"));
        }
        let number = number
            .parse()
            .map_err(|_| invalid("relation number is not an integer"))?;
        Ok(Self::new(RelationKind::parse(name), number))
    }
}

impl TryFrom<String> for RelationId {
    type Error = ConvergeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RelationId> for String {
    fn from(value: RelationId) -> Self {
        value.to_string()
    }
}

/// A unit name, e.g. `keystone/0`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitId(String);

impl UnitId {
    /// Wrap a unit name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The unit name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UnitId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// An inbound change notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    /// A remote unit joined a relation.
    RelationJoined {
        /// Relation the unit joined.
        relation_id: RelationId,
        /// The joining unit, when the runtime reports it.
        remote_unit: Option<UnitId>,
    },
    /// A remote unit changed its bucket on a relation.
    RelationChanged {
        /// Relation that changed.
        relation_id: RelationId,
        /// The unit whose bucket changed.
        remote_unit: Option<UnitId>,
    },
    /// The relation is being torn down.
    RelationBroken {
        /// Relation being removed.
        relation_id: RelationId,
    },
    /// This unit became the coordinator.
    LeaderElected,
    /// The coordinator changed its settings.
    LeaderSettingsChanged,
    /// Service options changed.
    ConfigChanged,
    /// The engine itself was upgraded.
    UpgradeCharm,
    /// Periodic re-check.
    Periodic,
    /// A hook name the engine does not recognise.
    Unrecognized {
        /// The raw hook name.
        name: String,
    },
}

/// Discriminant of [`Event`] used by the dispatch table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// See [`Event::RelationJoined`].
    Joined,
    /// See [`Event::RelationChanged`].
    Changed,
    /// See [`Event::RelationBroken`].
    Broken,
    /// See [`Event::LeaderElected`].
    LeaderElected,
    /// See [`Event::LeaderSettingsChanged`].
    LeaderSettingsChanged,
    /// See [`Event::ConfigChanged`].
    ConfigChanged,
    /// See [`Event::UpgradeCharm`].
    UpgradeCharm,
    /// See [`Event::Periodic`].
    Periodic,
    /// See [`Event::Unrecognized`].
    Unrecognized,
}

impl Event {
    /// Build an event from a hook name plus the relation context the runtime
    /// supplies alongside it.
    ///
    /// Relation hooks (`<relation>-relation-<joined|changed|broken>`) on a
    /// known relation require a relation id whose kind matches the hook. Such
    /// a hook without one, or with a mismatched one, is a validation error.
    /// Everything else that is not a known lifecycle hook (other relations,
    /// other phases, other hooks) maps to [`Event::Unrecognized`] whatever
    /// relation context came with it.
    pub fn from_hook_name(
        name: &str,
        relation_id: Option<RelationId>,
        remote_unit: Option<UnitId>,
    ) -> Result<Self, ConvergeError> {
        match name {
            "leader-elected" => return Ok(Self::LeaderElected),
            "leader-settings-changed" => return Ok(Self::LeaderSettingsChanged),
            "config-changed" => return Ok(Self::ConfigChanged),
            "upgrade-charm" => return Ok(Self::UpgradeCharm),
            "update-status" => return Ok(Self::Periodic),
            _ => {}
        }

        let Some((relation, phase)) = name.rsplit_once("-relation-") else {
            return Ok(Self::Unrecognized {
                name: name.to_string(),
            });
        };

        let expected = RelationKind::parse(relation);
        let known_phase = matches!(phase, "joined" | "changed" | "broken");
        if !known_phase || matches!(expected, RelationKind::Other(_)) {
            return Ok(Self::Unrecognized {
                name: name.to_string(),
            });
        }

        let relation_id = relation_id.ok_or_else(|| ConvergeError::ValidationError {
            field: "relation_id".to_string(),
            message: format!("hook '{}' requires a relation id", name),
        })?;
        if relation_id.kind() != &expected {
            return Err(ConvergeError::ValidationError {
                field: "relation_id".to_string(),
                message: format!(
                    "hook '{}' fired with relation id '{}' of another relation",
                    name, relation_id
                ),
            });
        }

        Ok(match phase {
            "joined" => Self::RelationJoined {
                relation_id,
                remote_unit,
            },
            "changed" => Self::RelationChanged {
                relation_id,
                remote_unit,
            },
            "broken" => Self::RelationBroken { relation_id },
            _ => Self::Unrecognized {
                name: name.to_string(),
            },
        })
    }

    /// Discriminant used for routing.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::RelationJoined { .. } => EventKind::Joined,
            Self::RelationChanged { .. } => EventKind::Changed,
            Self::RelationBroken { .. } => EventKind::Broken,
            Self::LeaderElected => EventKind::LeaderElected,
            Self::LeaderSettingsChanged => EventKind::LeaderSettingsChanged,
            Self::ConfigChanged => EventKind::ConfigChanged,
            Self::UpgradeCharm => EventKind::UpgradeCharm,
            Self::Periodic => EventKind::Periodic,
            Self::Unrecognized { .. } => EventKind::Unrecognized,
        }
    }

    /// Relation id carried by relation events.
    pub fn relation_id(&self) -> Option<&RelationId> {
        match self {
            Self::RelationJoined { relation_id, .. }
            | Self::RelationChanged { relation_id, .. }
            | Self::RelationBroken { relation_id } => Some(relation_id),
            _ => None,
        }
    }

    /// Remote unit carried by joined/changed events.
    pub fn remote_unit(&self) -> Option<&UnitId> {
        match self {
            Self::RelationJoined { remote_unit, .. }
            | Self::RelationChanged { remote_unit, .. } => remote_unit.as_ref(),
            _ => None,
        }
    }

    /// Relation kind carried by relation events.
    pub fn relation_kind(&self) -> Option<&RelationKind> {
        self.relation_id().map(RelationId::kind)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RelationJoined { relation_id, .. } => {
                write!(f, "{}-relation-joined", relation_id.kind())
            }
            Self::RelationChanged { relation_id, .. } => {
                write!(f, "{}-relation-changed", relation_id.kind())
            }
            Self::RelationBroken { relation_id } => {
                write!(f, "{}-relation-broken", relation_id.kind())
            }
            Self::LeaderElected => f.write_str("leader-elected"),
            Self::LeaderSettingsChanged => f.write_str("leader-settings-changed"),
            Self::ConfigChanged => f.write_str("config-changed"),
            Self::UpgradeCharm => f.write_str("upgrade-charm"),
            Self::Periodic => f.write_str("update-status"),
            Self::Unrecognized { name } => f.write_str(name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relation_id_parse_and_display() {
        let rid: RelationId = "identity-service:12".parse().unwrap();
        assert_eq!(rid.kind(), &RelationKind::IdentityService);
        assert_eq!(rid.number(), 12);
        assert_eq!(rid.to_string(), "identity-service:12");

        let rid: RelationId = "nrpe-external-master:4".parse().unwrap();
        assert_eq!(
            rid.kind(),
            &RelationKind::Other("nrpe-external-master".to_string())
        );
    }

    #[test]
    fn test_relation_id_rejects_garbage() {
        assert!("identity-service".parse::<RelationId>().is_err());
        assert!(":3".parse::<RelationId>().is_err());
        assert!("ha:x".parse::<RelationId>().is_err());
    }

    #[test]
    fn test_relation_id_serde_as_string() {
        let rid = RelationId::new(RelationKind::Ha, 7);
        let json = serde_json::to_string(&rid).unwrap();
        assert_eq!(json, "\"ha:7\"");
        let back: RelationId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, rid);
    }

    #[test]
    fn test_from_hook_name_relation_hooks() {
        let rid = RelationId::new(RelationKind::IdentityService, 3);
        let event = Event::from_hook_name(
            "identity-service-relation-changed",
            Some(rid.clone()),
            Some(UnitId::new("nova/0")),
        )
        .unwrap();
        assert_eq!(event.kind(), EventKind::Changed);
        assert_eq!(event.relation_id(), Some(&rid));
        assert_eq!(event.remote_unit().map(UnitId::as_str), Some("nova/0"));
        assert_eq!(event.to_string(), "identity-service-relation-changed");
    }

    #[test]
    fn test_from_hook_name_lifecycle_hooks() {
        assert_eq!(
            Event::from_hook_name("update-status", None, None).unwrap(),
            Event::Periodic
        );
        assert_eq!(
            Event::from_hook_name("leader-elected", None, None).unwrap(),
            Event::LeaderElected
        );
        assert_eq!(
            Event::from_hook_name("install", None, None).unwrap(),
            Event::Unrecognized {
                name: "install".to_string()
            }
        );
    }

    #[test]
    fn test_from_hook_name_relation_mismatch() {
        let err = Event::from_hook_name(
            "ha-relation-joined",
            Some(RelationId::new(RelationKind::Cluster, 1)),
            None,
        )
        .unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");

        let err = Event::from_hook_name("ha-relation-joined", None, None).unwrap_err();
        assert!(err.to_string().contains("requires a relation id"));
    }

    #[test]
    fn test_unknown_relation_needs_no_relation_id() {
        let event = Event::from_hook_name("nrpe-external-master-relation-joined", None, None).unwrap();
        assert_eq!(
            event,
            Event::Unrecognized {
                name: "nrpe-external-master-relation-joined".to_string()
            }
        );

        let event = Event::from_hook_name("cluster-relation-departed", None, None).unwrap();
        assert_eq!(event.kind(), EventKind::Unrecognized);
    }

    #[test]
    fn test_departed_is_unrecognized() {
        let event = Event::from_hook_name(
            "cluster-relation-departed",
            Some(RelationId::new(RelationKind::Cluster, 1)),
            Some(UnitId::new("keystone/2")),
        )
        .unwrap();
        assert_eq!(event.kind(), EventKind::Unrecognized);
    }
}
