// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The convergence engine.
//!
//! [`Engine::handle`] takes one [`Event`], routes it to exactly one handler and
//! returns a [`DispatchReport`]. Dispatch runs in two phases:
//!
//! 1. The handler evaluates its gates, makes the external calls whose results
//!    it needs (identity backend, migration, config rendering, coordinator
//!    settings) and stages relation writes and restart intents in [`Actions`].
//! 2. [`Engine::handle`] commits: staged writes are applied (identical values
//!    are skipped), restart intents go through the [`RestartCoordinator`],
//!    every selected service is bounced at most once, and only then are the
//!    moved nonces recorded and the local store flushed.
//!
//! Not being ready and lacking a capability are not errors; they are recorded
//! as [`Deferral`]s and [`Incapability`]s. Only external failures return `Err`.
//!
//! # Example
//!
//! ```rust,ignore
//! let engine = Engine::builder(options)
//!     .relations(relations)
//!     .leadership(leadership)
//!     .local_store(local)
//!     // ... remaining collaborators ...
//!     .build()?;
//!
//! let report = engine.handle(&Event::ConfigChanged).await?;
//! ```

pub mod backends;
pub mod cluster;
pub mod database;
pub mod identity;
mod routes;
pub mod status;

pub use self::routes::Route;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::capabilities::{
    CertificateManager, ConfigTarget, ConfigWriter, IdentityBackend, NetworkIntrospection,
    Platform, Release, SchemaMigrator, ServiceControl, ServiceSelector, StatusReporter,
    WorkloadStatus,
};
use crate::config::ServiceOptions;
use crate::error::{ConvergeError, Result};
use crate::event::{Event, RelationId, RelationKind, UnitId};
use crate::leadership::LeadershipOracle;
use crate::persistence::{LocalStore, UNIT_PAUSED_KEY, is_truthy};
use crate::readiness;
use crate::relation::{Bucket, RelationStore};
use crate::restart::{RestartCoordinator, RestartIntent, RestartMode};

// ============================================================================
// Collaborators
// ============================================================================

/// Every external capability the engine consumes.
#[derive(Clone)]
pub struct Collaborators {
    /// Relation buckets.
    pub relations: Arc<dyn RelationStore>,
    /// Coordinator designation and settings.
    pub leadership: Arc<dyn LeadershipOracle>,
    /// Durable per-unit state.
    pub local: Arc<dyn LocalStore>,
    /// Service process control.
    pub services: Arc<dyn ServiceControl>,
    /// Schema migration.
    pub migrator: Arc<dyn SchemaMigrator>,
    /// Local network lookups.
    pub network: Arc<dyn NetworkIntrospection>,
    /// Identity API.
    pub backend: Arc<dyn IdentityBackend>,
    /// Installed release.
    pub platform: Arc<dyn Platform>,
    /// Config rendering.
    pub configs: Arc<dyn ConfigWriter>,
    /// TLS certificates.
    pub certificates: Arc<dyn CertificateManager>,
    /// Workload status.
    pub status: Arc<dyn StatusReporter>,
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators")
            .field("local_unit", self.relations.local_unit())
            .finish_non_exhaustive()
    }
}

/// Builder for an [`Engine`].
#[derive(Default)]
pub struct EngineBuilder {
    options: ServiceOptions,
    relations: Option<Arc<dyn RelationStore>>,
    leadership: Option<Arc<dyn LeadershipOracle>>,
    local: Option<Arc<dyn LocalStore>>,
    services: Option<Arc<dyn ServiceControl>>,
    migrator: Option<Arc<dyn SchemaMigrator>>,
    network: Option<Arc<dyn NetworkIntrospection>>,
    backend: Option<Arc<dyn IdentityBackend>>,
    platform: Option<Arc<dyn Platform>>,
    configs: Option<Arc<dyn ConfigWriter>>,
    certificates: Option<Arc<dyn CertificateManager>>,
    status: Option<Arc<dyn StatusReporter>>,
}

impl std::fmt::Debug for EngineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineBuilder")
            .field("options", &self.options)
            .field("relations", &self.relations.as_ref().map(|_| "..."))
            .field("leadership", &self.leadership.as_ref().map(|_| "..."))
            .field("local", &self.local.as_ref().map(|_| "..."))
            .finish_non_exhaustive()
    }
}

impl EngineBuilder {
    /// Start a builder for the given service options.
    pub fn new(options: ServiceOptions) -> Self {
        Self {
            options,
            ..Default::default()
        }
    }

    /// Set the relation store (required).
    pub fn relations(mut self, relations: Arc<dyn RelationStore>) -> Self {
        self.relations = Some(relations);
        self
    }

    /// Set the leadership oracle (required).
    pub fn leadership(mut self, leadership: Arc<dyn LeadershipOracle>) -> Self {
        self.leadership = Some(leadership);
        self
    }

    /// Set the durable local store (required).
    pub fn local_store(mut self, local: Arc<dyn LocalStore>) -> Self {
        self.local = Some(local);
        self
    }

    /// Set service control (required).
    pub fn services(mut self, services: Arc<dyn ServiceControl>) -> Self {
        self.services = Some(services);
        self
    }

    /// Set the schema migrator (required).
    pub fn migrator(mut self, migrator: Arc<dyn SchemaMigrator>) -> Self {
        self.migrator = Some(migrator);
        self
    }

    /// Set network introspection (required).
    pub fn network(mut self, network: Arc<dyn NetworkIntrospection>) -> Self {
        self.network = Some(network);
        self
    }

    /// Set the identity backend (required).
    pub fn backend(mut self, backend: Arc<dyn IdentityBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Set the platform (required).
    pub fn platform(mut self, platform: Arc<dyn Platform>) -> Self {
        self.platform = Some(platform);
        self
    }

    /// Set the config writer (required).
    pub fn configs(mut self, configs: Arc<dyn ConfigWriter>) -> Self {
        self.configs = Some(configs);
        self
    }

    /// Set the certificate manager (required).
    pub fn certificates(mut self, certificates: Arc<dyn CertificateManager>) -> Self {
        self.certificates = Some(certificates);
        self
    }

    /// Set the status reporter (required).
    pub fn status(mut self, status: Arc<dyn StatusReporter>) -> Self {
        self.status = Some(status);
        self
    }

    /// Build the engine.
    ///
    /// Returns an error if any collaborator is missing.
    pub fn build(self) -> Result<Engine> {
        fn required<T: ?Sized>(value: Option<Arc<T>>, field: &str) -> Result<Arc<T>> {
            value.ok_or_else(|| ConvergeError::ValidationError {
                field: field.to_string(),
                message: "is required".to_string(),
            })
        }

        let collaborators = Collaborators {
            relations: required(self.relations, "relations")?,
            leadership: required(self.leadership, "leadership")?,
            local: required(self.local, "local_store")?,
            services: required(self.services, "services")?,
            migrator: required(self.migrator, "migrator")?,
            network: required(self.network, "network")?,
            backend: required(self.backend, "backend")?,
            platform: required(self.platform, "platform")?,
            configs: required(self.configs, "configs")?,
            certificates: required(self.certificates, "certificates")?,
            status: required(self.status, "status")?,
        };

        Ok(Engine {
            options: self.options,
            collaborators,
        })
    }
}

// ============================================================================
// Action record
// ============================================================================

/// Why a handler did not act yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotReady {
    /// Another unit is the coordinator.
    NotCoordinator,
    /// The database has not published usable credentials.
    DbNotReady,
    /// The schema has not been migrated.
    SchemaNotInitialized,
    /// HA is expected but the cluster has not formed.
    NotClustered,
    /// The unit is administratively paused.
    Paused,
}

/// A handler that declined to act because a prerequisite is missing.
///
/// Resolved by a later event re-running the same check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Deferral {
    /// Handler that deferred.
    pub handler: &'static str,
    /// Missing prerequisite.
    pub reason: NotReady,
    /// Relation being handled, if any.
    pub relation_id: Option<RelationId>,
}

/// A capability the installed backend lacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MissingCapability {
    /// The configured identity API major version is too old.
    ApiVersion {
        /// Minimum supported version.
        required: u32,
        /// Configured version.
        configured: u32,
    },
    /// The installed release is too old.
    Release {
        /// Minimum supported release.
        required: Release,
        /// Installed release.
        installed: Release,
    },
}

/// A handler that is a permanent no-op until an upgrade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Incapability {
    /// Handler that gave up.
    pub handler: &'static str,
    /// What is missing.
    pub missing: MissingCapability,
    /// Relation being handled, if any.
    pub relation_id: Option<RelationId>,
}

/// Everything a handler decided to do.
#[derive(Debug, Default)]
pub struct Actions {
    writes: Vec<(RelationId, Bucket)>,
    restarts: Vec<RestartIntent>,
    deferrals: Vec<Deferral>,
    incapabilities: Vec<Incapability>,
    migrated: bool,
}

impl Actions {
    /// Stage settings for the local unit's bucket on a relation.
    ///
    /// Settings staged for the same relation merge; later values win.
    pub fn stage_write(&mut self, relation_id: &RelationId, settings: Bucket) {
        if settings.is_empty() {
            return;
        }
        match self.writes.iter_mut().find(|(rid, _)| rid == relation_id) {
            Some((_, bucket)) => bucket.extend(settings),
            None => self.writes.push((relation_id.clone(), settings)),
        }
    }

    /// Stage a restart intent.
    pub fn stage_restart(&mut self, intent: RestartIntent) {
        self.restarts.push(intent);
    }

    /// Record a deferral.
    pub fn defer(&mut self, deferral: Deferral) {
        self.deferrals.push(deferral);
    }

    /// Record an incapability.
    pub fn incapable(&mut self, incapability: Incapability) {
        self.incapabilities.push(incapability);
    }

    /// Record that the schema migration ran.
    pub fn mark_migrated(&mut self) {
        self.migrated = true;
    }

    /// Settings staged so far for a relation.
    pub fn staged(&self, relation_id: &RelationId) -> Option<&Bucket> {
        self.writes
            .iter()
            .find(|(rid, _)| rid == relation_id)
            .map(|(_, bucket)| bucket)
    }

    /// Every staged write, in first-staged order.
    pub fn writes(&self) -> &[(RelationId, Bucket)] {
        &self.writes
    }

    /// Every staged restart intent.
    pub fn restarts(&self) -> &[RestartIntent] {
        &self.restarts
    }

    /// Every deferral.
    pub fn deferrals(&self) -> &[Deferral] {
        &self.deferrals
    }
}

// ============================================================================
// Hook context
// ============================================================================

/// Per-dispatch context handed to every handler.
///
/// Built once per event from the engine's collaborators. Coordinator
/// designation is read once at construction and held for the whole dispatch.
pub struct HookContext<'a> {
    /// External capabilities.
    pub collaborators: &'a Collaborators,
    /// Service options.
    pub options: &'a ServiceOptions,
    /// The event being handled.
    pub event: &'a Event,
    /// Staged actions.
    pub actions: Actions,
    coordinator: bool,
}

impl<'a> HookContext<'a> {
    async fn new(
        collaborators: &'a Collaborators,
        options: &'a ServiceOptions,
        event: &'a Event,
    ) -> Result<Self> {
        let coordinator = collaborators.leadership.is_coordinator().await?;
        Ok(Self {
            collaborators,
            options,
            event,
            actions: Actions::default(),
            coordinator,
        })
    }

    /// Whether this unit is the coordinator for this dispatch.
    pub fn is_coordinator(&self) -> bool {
        self.coordinator
    }

    /// Whether the database has published usable credentials.
    pub async fn db_reachable(&self) -> Result<bool> {
        readiness::db_reachable(self.collaborators.relations.as_ref(), self.options).await
    }

    /// Whether the schema has been migrated.
    pub async fn schema_initialized(&self) -> Result<bool> {
        readiness::schema_initialized(
            self.collaborators.local.as_ref(),
            self.collaborators.leadership.as_ref(),
        )
        .await
    }

    /// Whether the HA cluster has formed.
    pub async fn is_clustered(&self) -> Result<bool> {
        readiness::is_clustered(self.collaborators.relations.as_ref()).await
    }

    /// Whether the unit is administratively paused.
    pub async fn is_paused(&self) -> Result<bool> {
        Ok(is_truthy(
            self.collaborators
                .local
                .get(UNIT_PAUSED_KEY)
                .await?
                .as_deref(),
        ))
    }

    /// Whether HA is expected but not formed yet.
    pub async fn awaiting_cluster(&self) -> Result<bool> {
        let expected =
            readiness::expect_ha(self.collaborators.relations.as_ref(), &self.options).await?;
        Ok(expected && !self.is_clustered().await?)
    }

    /// Installed release.
    pub fn release(&self) -> Release {
        self.collaborators.platform.release()
    }

    /// Services bounced when the API needs a restart.
    pub fn api_services(&self) -> Vec<ServiceSelector> {
        ConfigTarget::KeystoneConf.services(self.options.run_in_apache)
    }

    /// Record a deferral and log it.
    pub fn defer(&mut self, handler: &'static str, reason: NotReady, relation_id: Option<&RelationId>) {
        match reason {
            NotReady::DbNotReady => {
                warn!(handler, relation_id = ?relation_id, "Database not ready, deferring")
            }
            _ => info!(handler, reason = ?reason, relation_id = ?relation_id, "Deferring"),
        }
        self.actions.defer(Deferral {
            handler,
            reason,
            relation_id: relation_id.cloned(),
        });
    }

    /// Check a capability, recording an incapability when it is missing.
    ///
    /// Returns `true` when the handler may proceed.
    pub fn require(
        &mut self,
        handler: &'static str,
        missing: Option<MissingCapability>,
        relation_id: Option<&RelationId>,
    ) -> bool {
        let Some(missing) = missing else {
            return true;
        };
        info!(handler, missing = ?missing, "Capability missing, ignoring");
        self.actions.incapable(Incapability {
            handler,
            missing,
            relation_id: relation_id.cloned(),
        });
        false
    }

    /// Identity API v3 or newer.
    pub fn api_v3(&self) -> Option<MissingCapability> {
        (self.options.preferred_api_version < 3).then_some(MissingCapability::ApiVersion {
            required: 3,
            configured: self.options.preferred_api_version,
        })
    }

    /// Installed release at least `required`.
    pub fn release_at_least(&self, required: Release) -> Option<MissingCapability> {
        let installed = self.release();
        (installed < required).then_some(MissingCapability::Release {
            required,
            installed,
        })
    }

    /// The local unit's bucket on a relation, including writes staged so far.
    pub async fn own_bucket(&self, relation_id: &RelationId) -> Result<Bucket> {
        let relations = &self.collaborators.relations;
        let mut bucket = relations
            .get_bucket(relation_id, relations.local_unit())
            .await?;
        if let Some(staged) = self.actions.staged(relation_id) {
            for (key, value) in staged {
                if value.is_empty() {
                    bucket.remove(key);
                } else {
                    bucket.insert(key.clone(), value.clone());
                }
            }
        }
        Ok(bucket)
    }

    /// A remote unit's bucket.
    pub async fn remote_bucket(&self, relation_id: &RelationId, unit: &UnitId) -> Result<Bucket> {
        self.collaborators.relations.get_bucket(relation_id, unit).await
    }

    /// Established relations of a kind.
    pub async fn relation_ids(&self, kind: RelationKind) -> Result<Vec<RelationId>> {
        self.collaborators.relations.relation_ids(&kind).await
    }

    /// Remote units on a relation.
    pub async fn related_units(&self, relation_id: &RelationId) -> Result<Vec<UnitId>> {
        self.collaborators.relations.related_units(relation_id).await
    }

    /// The event's remote unit, or the first unit on the relation.
    pub async fn remote_unit_or_first(&self, relation_id: &RelationId) -> Result<Option<UnitId>> {
        if let Some(unit) = self.event.remote_unit() {
            return Ok(Some(unit.clone()));
        }
        Ok(self.related_units(relation_id).await?.into_iter().next())
    }

    /// Render a config file and stage a digest-gated restart of its services.
    pub async fn render(&mut self, target: ConfigTarget) -> Result<()> {
        let digest = self.collaborators.configs.write(target).await?;
        debug!(path = target.path(), digest = %digest, "Rendered config");
        self.actions.stage_restart(RestartIntent::config(
            target,
            digest,
            self.options.run_in_apache,
        ));
        Ok(())
    }

    /// Render a config file and record its digest without restarting anything.
    pub async fn render_quiet(&mut self, target: ConfigTarget) -> Result<()> {
        let digest = self.collaborators.configs.write(target).await?;
        let mut intent = RestartIntent::config(target, digest, self.options.run_in_apache);
        intent.services.clear();
        self.actions.stage_restart(intent);
        Ok(())
    }

    /// Render every config file.
    pub async fn render_all(&mut self) -> Result<()> {
        for target in ConfigTarget::ALL {
            self.render(target).await?;
        }
        Ok(())
    }
}

// ============================================================================
// Dispatch
// ============================================================================

/// Whether a handler was found for the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchOutcome {
    /// A handler ran.
    Handled,
    /// No handler is registered for the event. Not an error.
    NoHandler,
}

/// One key that changed in the local unit's bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedWrite {
    /// Relation written.
    pub relation_id: RelationId,
    /// Key written.
    pub key: String,
    /// New value. Empty means the key was unset.
    pub value: String,
}

/// What one dispatch did.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchReport {
    /// Unique id of this dispatch.
    pub dispatch_id: Uuid,
    /// When the dispatch started.
    pub dispatched_at: DateTime<Utc>,
    /// Hook name of the event.
    pub event: String,
    /// Route taken, if any.
    pub route: Option<Route>,
    /// Whether a handler ran.
    pub outcome: DispatchOutcome,
    /// Keys that changed.
    pub writes: Vec<AppliedWrite>,
    /// Services bounced, in order.
    pub restarted: Vec<ServiceSelector>,
    /// Handlers that deferred.
    pub deferrals: Vec<Deferral>,
    /// Handlers that lack a capability.
    pub incapabilities: Vec<Incapability>,
    /// Whether the schema migration ran.
    pub migrated: bool,
    /// Workload status assessed after the dispatch.
    pub status: Option<WorkloadStatus>,
}

/// The convergence engine.
pub struct Engine {
    options: ServiceOptions,
    collaborators: Collaborators,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("options", &self.options)
            .field("collaborators", &self.collaborators)
            .finish()
    }
}

impl Engine {
    /// Create a builder for the given service options.
    pub fn builder(options: ServiceOptions) -> EngineBuilder {
        EngineBuilder::new(options)
    }

    /// Service options in effect.
    pub fn options(&self) -> &ServiceOptions {
        &self.options
    }

    /// The engine's collaborators.
    pub fn collaborators(&self) -> &Collaborators {
        &self.collaborators
    }

    /// Handle one event to completion.
    ///
    /// # Errors
    ///
    /// Returns an error when an external collaborator fails. Writes already
    /// staged for this event are then not committed; the runtime is expected
    /// to re-deliver the event.
    #[instrument(skip(self, event), fields(event = %event))]
    pub async fn handle(&self, event: &Event) -> Result<DispatchReport> {
        let dispatch_id = Uuid::new_v4();
        let dispatched_at = Utc::now();
        let route = Route::lookup(event);

        let mut report = DispatchReport {
            dispatch_id,
            dispatched_at,
            event: event.to_string(),
            route,
            outcome: DispatchOutcome::NoHandler,
            writes: Vec::new(),
            restarted: Vec::new(),
            deferrals: Vec::new(),
            incapabilities: Vec::new(),
            migrated: false,
            status: None,
        };

        match route {
            None => {
                info!(%dispatch_id, "No handler registered for event, ignoring");
            }
            Some(route) => {
                debug!(%dispatch_id, ?route, "Dispatching");
                let mut ctx = HookContext::new(&self.collaborators, &self.options, event).await?;
                route.run(&mut ctx).await?;
                self.commit(ctx.actions, route.restart_mode(), &mut report)
                    .await?;
                report.outcome = DispatchOutcome::Handled;
            }
        }

        let status = status::assess(&self.collaborators, &self.options).await?;
        self.collaborators.status.set_status(&status).await?;
        report.status = Some(status);

        info!(
            %dispatch_id,
            outcome = ?report.outcome,
            writes = report.writes.len(),
            restarted = report.restarted.len(),
            deferrals = report.deferrals.len(),
            migrated = report.migrated,
            "Dispatch complete"
        );
        Ok(report)
    }

    async fn commit(
        &self,
        actions: Actions,
        mode: RestartMode,
        report: &mut DispatchReport,
    ) -> Result<()> {
        let relations = &self.collaborators.relations;
        let local_unit = relations.local_unit().clone();

        for (relation_id, staged) in actions.writes {
            let current = relations.get_bucket(&relation_id, &local_unit).await?;
            let delta: Bucket = staged
                .into_iter()
                .filter(|(key, value)| {
                    current.get(key).map(String::as_str).unwrap_or_default() != value.as_str()
                })
                .collect();
            if delta.is_empty() {
                continue;
            }

            relations.set_own(&relation_id, &delta).await?;
            debug!(%relation_id, keys = delta.len(), "Relation settings written");
            report
                .writes
                .extend(delta.into_iter().map(|(key, value)| AppliedWrite {
                    relation_id: relation_id.clone(),
                    key,
                    value,
                }));
        }

        let coordinator = RestartCoordinator::new(self.collaborators.local.as_ref());
        let mut selected: Vec<ServiceSelector> = Vec::new();
        let mut moved: Vec<(&str, &str)> = Vec::new();
        for intent in &actions.restarts {
            let fire = intent.unconditional
                || coordinator
                    .should_restart(&intent.subsystem_key, intent.nonce.as_deref())
                    .await?;
            if !fire {
                continue;
            }
            if let Some(nonce) = intent.nonce.as_deref().filter(|_| !intent.unconditional) {
                moved.push((&intent.subsystem_key, nonce));
            }
            for service in &intent.services {
                if !selected.contains(service) {
                    selected.push(service.clone());
                }
            }
        }

        let paused = is_truthy(
            self.collaborators
                .local
                .get(UNIT_PAUSED_KEY)
                .await?
                .as_deref(),
        );
        if paused && !selected.is_empty() {
            info!(services = ?selected, "Unit paused, not restarting services");
            selected.clear();
        }

        for service in &selected {
            match mode {
                RestartMode::Restart => self.collaborators.services.restart(service).await?,
                RestartMode::StopStart => {
                    self.collaborators.services.stop(service).await?;
                    self.collaborators.services.start(service).await?;
                }
            }
            info!(service = %service, ?mode, "Service restarted");
        }

        // Only nonces whose restart went through (or was suppressed by pause).
        for (subsystem_key, nonce) in moved {
            coordinator.record(subsystem_key, nonce).await?;
        }
        self.collaborators.local.flush().await?;

        report.restarted = selected;
        report.deferrals = actions.deferrals;
        report.incapabilities = actions.incapabilities;
        report.migrated = actions.migrated;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rid(s: &str) -> RelationId {
        s.parse().unwrap()
    }

    fn bucket(pairs: &[(&str, &str)]) -> Bucket {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_staged_writes_merge_per_relation() {
        let mut actions = Actions::default();
        actions.stage_write(&rid("identity-service:1"), bucket(&[("a", "1"), ("b", "1")]));
        actions.stage_write(&rid("cluster:0"), bucket(&[("x", "1")]));
        actions.stage_write(&rid("identity-service:1"), bucket(&[("b", "2")]));
        actions.stage_write(&rid("ha:3"), Bucket::new());

        assert_eq!(actions.writes().len(), 2);
        assert_eq!(actions.writes()[0].0, rid("identity-service:1"));
        assert_eq!(
            actions.staged(&rid("identity-service:1")),
            Some(&bucket(&[("a", "1"), ("b", "2")]))
        );
        assert_eq!(actions.staged(&rid("ha:3")), None);
    }

    #[test]
    fn test_builder_reports_missing_collaborator() {
        let err = Engine::builder(ServiceOptions::default())
            .build()
            .unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");
        assert!(err.to_string().contains("relations"));
    }
}
