// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Nonce-gated restart decisions.
//!
//! Every source of restart demand (a domain backend, a federated identity
//! provider relation, a rendered config file) is identified by a subsystem key
//! and asserts change through an opaque nonce. The coordinator remembers the
//! last nonce that triggered a restart per key and only says yes when a
//! different one shows up.
//!
//! Deciding and recording are separate steps. The caller records a nonce only
//! once the restart it asked for has happened, so a failed restart is retried
//! when the event is delivered again.

use serde::Serialize;
use tracing::debug;

use crate::capabilities::{ConfigTarget, ServiceSelector};
use crate::error::Result;
use crate::event::RelationId;
use crate::persistence::LocalStore;

/// Decides whether an observed nonce warrants a restart.
pub struct RestartCoordinator<'a> {
    store: &'a dyn LocalStore,
}

impl<'a> RestartCoordinator<'a> {
    /// Create a coordinator over a local store.
    pub fn new(store: &'a dyn LocalStore) -> Self {
        Self { store }
    }

    /// Compare `observed` against the stored nonce for `subsystem_key`.
    ///
    /// Returns `true` when it differs from what is stored, including when
    /// nothing is stored yet. A missing or empty `observed` nonce means no
    /// change has been asserted and always returns `false`. Nothing is written;
    /// see [`RestartCoordinator::record`].
    pub async fn should_restart(&self, subsystem_key: &str, observed: Option<&str>) -> Result<bool> {
        let Some(observed) = observed.filter(|n| !n.is_empty()) else {
            return Ok(false);
        };

        let stored = self.store.get(subsystem_key).await?;
        if stored.as_deref() == Some(observed) {
            debug!(subsystem_key, "Nonce unchanged, no restart");
            return Ok(false);
        }

        debug!(
            subsystem_key,
            previous = ?stored,
            observed,
            "Nonce changed, restart required"
        );
        Ok(true)
    }

    /// Buffer `nonce` as the last one acted on for `subsystem_key`.
    ///
    /// The caller flushes once every restart it selected has completed.
    pub async fn record(&self, subsystem_key: &str, nonce: &str) -> Result<()> {
        self.store.set(subsystem_key, nonce).await
    }
}

/// How a selected service is bounced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RestartMode {
    /// A single restart call.
    #[default]
    Restart,
    /// Stop, then start.
    StopStart,
}

/// A request, staged during a handler, to restart services if a nonce moved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RestartIntent {
    /// Subsystem key the nonce is tracked under.
    pub subsystem_key: String,
    /// Nonce observed this time.
    pub nonce: Option<String>,
    /// Services to bounce when the nonce moved.
    pub services: Vec<ServiceSelector>,
    /// Bypass the nonce gate entirely.
    pub unconditional: bool,
}

impl RestartIntent {
    /// Restart keyed by a domain backend's domain name.
    pub fn domain(domain_name: &str, nonce: Option<String>, services: Vec<ServiceSelector>) -> Self {
        Self {
            subsystem_key: format!("domain-restart-nonce-{}", domain_name),
            nonce,
            services,
            unconditional: false,
        }
    }

    /// Restart keyed by a federated identity provider relation.
    pub fn fid(relation_id: &RelationId, nonce: Option<String>, services: Vec<ServiceSelector>) -> Self {
        Self {
            subsystem_key: format!("fid-restart-nonce-{}", relation_id),
            nonce,
            services,
            unconditional: false,
        }
    }

    /// Restart keyed by a rendered file's content digest.
    pub fn config(target: ConfigTarget, digest: String, run_in_apache: bool) -> Self {
        Self {
            subsystem_key: format!("config-digest:{}", target.path()),
            nonce: Some(digest),
            services: target.services(run_in_apache),
            unconditional: false,
        }
    }

    /// Restart with no nonce gate.
    pub fn always(reason: &str, services: Vec<ServiceSelector>) -> Self {
        Self {
            subsystem_key: reason.to_string(),
            nonce: None,
            services,
            unconditional: true,
        }
    }
}
