// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Recording collaborators.
//!
//! Stand-ins for every side-effecting capability. They succeed (unless told
//! otherwise), remember what they were asked to do, and return deterministic
//! data. The dry-run binary plans with them and the test suite asserts on them.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use crate::capabilities::{
    CertificateManager, ConfigTarget, ConfigWriter, IdentityBackend, NetworkIntrospection,
    Platform, Release, SchemaMigrator, ServiceControl, ServiceSelector, StatusReporter,
    WorkloadStatus,
};
use crate::config::ServiceOptions;
use crate::endpoints::EndpointSet;
use crate::engine::Engine;
use crate::error::{ConvergeError, Result};
use crate::event::{RelationId, UnitId};
use crate::leadership::{InMemoryLeadership, LeadershipSnapshot};
use crate::net;
use crate::persistence::LocalStore;
use crate::relation::{Bucket, InMemoryRelationStore, RelationSnapshot, RelationStore};
use crate::relation::records::{CredentialsRequest, ServiceRequest};

/// A local subnet and the interface carrying it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subnet {
    /// Subnet in CIDR notation.
    pub cidr: String,
    /// Interface name.
    pub interface: String,
    /// Dotted-quad or prefix-length netmask.
    pub netmask: String,
}

/// Network introspection answered from a fixed table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticNetwork {
    /// Subnets present on the unit.
    #[serde(default)]
    pub subnets: Vec<Subnet>,
    /// Address per binding name.
    #[serde(default)]
    pub bindings: BTreeMap<String, String>,
    /// Every address configured on the unit.
    #[serde(default)]
    pub addresses: Vec<String>,
}

impl StaticNetwork {
    /// Add a binding address.
    pub fn with_binding(mut self, binding: &str, address: &str) -> Self {
        self.bindings.insert(binding.to_string(), address.to_string());
        self
    }

    /// Add a subnet.
    pub fn with_subnet(mut self, cidr: &str, interface: &str, netmask: &str) -> Self {
        self.subnets.push(Subnet {
            cidr: cidr.to_string(),
            interface: interface.to_string(),
            netmask: netmask.to_string(),
        });
        self
    }

    /// Add a local address.
    pub fn with_address(mut self, address: &str) -> Self {
        self.addresses.push(address.to_string());
        self
    }

    fn subnet_for(&self, address: &str) -> Option<&Subnet> {
        self.subnets.iter().find(|s| net::in_network(address, &s.cidr))
    }
}

impl NetworkIntrospection for StaticNetwork {
    fn interface_for(&self, address: &str) -> Option<String> {
        self.subnet_for(address).map(|s| s.interface.clone())
    }

    fn netmask_for(&self, address: &str) -> Option<String> {
        self.subnet_for(address).map(|s| s.netmask.clone())
    }

    fn relation_ip(&self, binding: &str, cidr: Option<&str>) -> Option<String> {
        if let Some(cidr) = cidr
            && let Some(address) = self
                .addresses
                .iter()
                .chain(self.bindings.values())
                .find(|a| net::in_network(a, cidr))
        {
            return Some(address.clone());
        }
        self.bindings
            .get(binding)
            .or_else(|| self.bindings.get("private"))
            .cloned()
    }

    fn ipv6_addresses(&self) -> Vec<String> {
        self.addresses
            .iter()
            .filter(|a| net::is_ipv6(a))
            .cloned()
            .collect()
    }
}

/// One service control call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceCall {
    /// `restart`, `stop`, `start` or `pause`.
    pub action: &'static str,
    /// Target service.
    pub service: ServiceSelector,
}

/// Service control that only records calls.
#[derive(Debug, Default)]
pub struct RecordingServiceControl {
    calls: Mutex<Vec<ServiceCall>>,
    failures_left: AtomicUsize,
}

impl RecordingServiceControl {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// A recorder whose first `count` calls fail without being recorded.
    pub fn failing_first(count: usize) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            failures_left: AtomicUsize::new(count),
        }
    }

    /// Calls so far, in order.
    pub async fn calls(&self) -> Vec<ServiceCall> {
        self.calls.lock().await.clone()
    }

    /// Number of restart-like bounces (restart, or stop paired with start) of a service.
    pub async fn bounces(&self, service: &str) -> usize {
        self.calls
            .lock()
            .await
            .iter()
            .filter(|c| c.service.as_str() == service && matches!(c.action, "restart" | "start"))
            .count()
    }

    async fn record(&self, action: &'static str, service: &ServiceSelector) -> Result<()> {
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ConvergeError::ServiceControlFailed {
                service: service.to_string(),
                action: action.to_string(),
                reason: "injected failure".to_string(),
            });
        }
        self.calls.lock().await.push(ServiceCall {
            action,
            service: service.clone(),
        });
        Ok(())
    }
}

#[async_trait]
impl ServiceControl for RecordingServiceControl {
    async fn restart(&self, service: &ServiceSelector) -> Result<()> {
        self.record("restart", service).await
    }

    async fn stop(&self, service: &ServiceSelector) -> Result<()> {
        self.record("stop", service).await
    }

    async fn start(&self, service: &ServiceSelector) -> Result<()> {
        self.record("start", service).await
    }

    async fn pause(&self, service: &ServiceSelector) -> Result<()> {
        self.record("pause", service).await
    }
}

/// Schema migrator that counts invocations.
#[derive(Debug, Default)]
pub struct RecordingMigrator {
    calls: AtomicUsize,
    failure: Option<String>,
}

impl RecordingMigrator {
    /// A migrator that always succeeds.
    pub fn new() -> Self {
        Self::default()
    }

    /// A migrator that always fails with `reason`.
    pub fn failing(reason: &str) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            failure: Some(reason.to_string()),
        }
    }

    /// How many times `migrate` was called.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SchemaMigrator for RecordingMigrator {
    async fn migrate(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.failure {
            Some(reason) => Err(ConvergeError::MigrationFailed {
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }
}

/// One identity backend call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "call", rename_all = "snake_case")]
pub enum BackendCall {
    /// `ensure_initial_admin`
    EnsureInitialAdmin {
        /// Endpoints passed in.
        endpoints: EndpointSet,
    },
    /// `register_service`
    RegisterService {
        /// Relation the request came from.
        relation_id: RelationId,
        /// Requesting unit.
        unit: UnitId,
        /// Parsed request.
        request: ServiceRequest,
    },
    /// `issue_credentials`
    IssueCredentials {
        /// Relation the request came from.
        relation_id: RelationId,
        /// Requesting unit.
        unit: UnitId,
        /// Parsed request.
        request: CredentialsRequest,
    },
    /// `create_or_show_domain`
    CreateOrShowDomain {
        /// Domain name.
        name: String,
    },
    /// `delete_service_entry`
    DeleteServiceEntry {
        /// Service name.
        name: String,
        /// Service type.
        service_type: String,
    },
}

/// Identity backend that records calls and answers deterministically.
#[derive(Debug, Default)]
pub struct RecordingIdentityBackend {
    calls: Mutex<Vec<BackendCall>>,
    catalogue: Mutex<Vec<(String, String)>>,
}

impl RecordingIdentityBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pretend a catalogue entry exists.
    pub async fn add_catalogue_entry(&self, name: &str, service_type: &str) {
        self.catalogue
            .lock()
            .await
            .push((name.to_string(), service_type.to_string()));
    }

    /// Calls so far, in order.
    pub async fn calls(&self) -> Vec<BackendCall> {
        self.calls.lock().await.clone()
    }

    async fn record(&self, call: BackendCall) {
        self.calls.lock().await.push(call);
    }
}

fn derived_secret(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0]);
    }
    let digest = format!("{:x}", hasher.finalize());
    digest[..32].to_string()
}

#[async_trait]
impl IdentityBackend for RecordingIdentityBackend {
    async fn ensure_initial_admin(&self, endpoints: &EndpointSet) -> Result<()> {
        self.record(BackendCall::EnsureInitialAdmin {
            endpoints: endpoints.clone(),
        })
        .await;
        Ok(())
    }

    async fn register_service(
        &self,
        relation_id: &RelationId,
        unit: &UnitId,
        request: &ServiceRequest,
    ) -> Result<Bucket> {
        self.record(BackendCall::RegisterService {
            relation_id: relation_id.clone(),
            unit: unit.clone(),
            request: request.clone(),
        })
        .await;

        let mut settings = Bucket::new();
        let Some(service) = request.service.as_deref() else {
            return Ok(settings);
        };
        let username = request
            .region
            .as_deref()
            .map(|region| format!("{}_{}", service, region))
            .unwrap_or_else(|| service.to_string());

        settings.insert("service_username".to_string(), username);
        settings.insert(
            "service_password".to_string(),
            derived_secret(&["service", service]),
        );
        settings.insert("service_tenant".to_string(), "services".to_string());
        settings.insert("service_domain".to_string(), "service_domain".to_string());
        Ok(settings)
    }

    async fn issue_credentials(
        &self,
        relation_id: &RelationId,
        unit: &UnitId,
        request: &CredentialsRequest,
    ) -> Result<Bucket> {
        self.record(BackendCall::IssueCredentials {
            relation_id: relation_id.clone(),
            unit: unit.clone(),
            request: request.clone(),
        })
        .await;

        let mut settings = Bucket::new();
        let Some(username) = request.username.as_deref() else {
            return Ok(settings);
        };
        settings.insert("credentials_username".to_string(), username.to_string());
        settings.insert(
            "credentials_password".to_string(),
            derived_secret(&["credentials", username]),
        );
        settings.insert(
            "credentials_project".to_string(),
            request.project.clone().unwrap_or_else(|| "services".to_string()),
        );
        Ok(settings)
    }

    async fn create_or_show_domain(&self, name: &str) -> Result<String> {
        self.record(BackendCall::CreateOrShowDomain {
            name: name.to_string(),
        })
        .await;
        Ok(derived_secret(&["domain", name]))
    }

    async fn is_service_present(&self, name: &str, service_type: &str) -> Result<bool> {
        Ok(self
            .catalogue
            .lock()
            .await
            .iter()
            .any(|(n, t)| n == name && t == service_type))
    }

    async fn delete_service_entry(&self, name: &str, service_type: &str) -> Result<()> {
        self.record(BackendCall::DeleteServiceEntry {
            name: name.to_string(),
            service_type: service_type.to_string(),
        })
        .await;
        self.catalogue
            .lock()
            .await
            .retain(|(n, t)| !(n == name && t == service_type));
        Ok(())
    }
}

/// Platform with a fixed release.
#[derive(Debug, Clone, Copy)]
pub struct FixedPlatform(pub Release);

impl Platform for FixedPlatform {
    fn release(&self) -> Release {
        self.0
    }
}

/// Config writer whose digest is the hash of a per-target content string.
///
/// Content defaults to the empty string, so digests only move when a caller
/// changes the content of a target.
#[derive(Debug, Default)]
pub struct DigestConfigWriter {
    content: Mutex<BTreeMap<ConfigTarget, String>>,
    writes: Mutex<Vec<ConfigTarget>>,
}

impl DigestConfigWriter {
    /// Create a writer with empty content for every target.
    pub fn new() -> Self {
        Self::default()
    }

    /// Change what a target renders to.
    pub async fn set_content(&self, target: ConfigTarget, content: &str) {
        self.content.lock().await.insert(target, content.to_string());
    }

    /// Targets written so far, in order.
    pub async fn writes(&self) -> Vec<ConfigTarget> {
        self.writes.lock().await.clone()
    }
}

#[async_trait]
impl ConfigWriter for DigestConfigWriter {
    async fn write(&self, target: ConfigTarget) -> Result<String> {
        self.writes.lock().await.push(target);
        let content = self
            .content
            .lock()
            .await
            .get(&target)
            .cloned()
            .unwrap_or_default();

        let mut hasher = Sha256::new();
        hasher.update(target.path().as_bytes());
        hasher.update(content.as_bytes());
        Ok(format!("{:x}", hasher.finalize()))
    }
}

/// Certificate manager with a fixed request and a record of processed relations.
#[derive(Debug, Default)]
pub struct StaticCertificates {
    request: Bucket,
    processed: Mutex<Vec<RelationId>>,
}

impl StaticCertificates {
    /// Create a manager that publishes `request` on join.
    pub fn new(request: Bucket) -> Self {
        Self {
            request,
            processed: Mutex::new(Vec::new()),
        }
    }

    /// Relations whose certificates were processed, in order.
    pub async fn processed(&self) -> Vec<RelationId> {
        self.processed.lock().await.clone()
    }
}

#[async_trait]
impl CertificateManager for StaticCertificates {
    async fn certificate_request(&self) -> Result<Bucket> {
        Ok(self.request.clone())
    }

    async fn process_certificates(&self, relation_id: &RelationId, _unit: Option<&UnitId>) -> Result<()> {
        self.processed.lock().await.push(relation_id.clone());
        Ok(())
    }
}

/// Status reporter that keeps every status it was given.
#[derive(Debug, Default)]
pub struct RecordingStatus {
    history: Mutex<Vec<WorkloadStatus>>,
}

impl RecordingStatus {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// The most recent status.
    pub async fn current(&self) -> Option<WorkloadStatus> {
        self.history.lock().await.last().cloned()
    }
}

#[async_trait]
impl StatusReporter for RecordingStatus {
    async fn set_status(&self, status: &WorkloadStatus) -> Result<()> {
        self.history.lock().await.push(status.clone());
        Ok(())
    }
}

/// Everything the dry-run binary needs to evaluate one event, as JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldSnapshot {
    /// The unit the engine runs as.
    pub local_unit: UnitId,
    /// Deployment settings.
    #[serde(default)]
    pub options: ServiceOptions,
    /// Every relation bucket, the local unit's included.
    #[serde(default)]
    pub relations: RelationSnapshot,
    /// Coordinator designation and settings.
    #[serde(default)]
    pub leadership: LeadershipSnapshot,
    /// Installed release.
    #[serde(default = "default_release")]
    pub release: Release,
    /// Local network answers.
    #[serde(default)]
    pub network: StaticNetwork,
    /// Settings published when a certificate provider joins.
    #[serde(default)]
    pub certificate_request: Bucket,
}

fn default_release() -> Release {
    Release::Queens
}

/// A world of recording collaborators built from a [`WorldSnapshot`].
///
/// Holds concrete handles so callers can inspect what the engine did.
pub struct DryRunWorld {
    /// Deployment settings.
    pub options: ServiceOptions,
    /// Relation buckets.
    pub relations: Arc<InMemoryRelationStore>,
    /// Coordinator designation and settings.
    pub leadership: Arc<InMemoryLeadership>,
    /// Service calls.
    pub services: Arc<RecordingServiceControl>,
    /// Migration calls.
    pub migrator: Arc<RecordingMigrator>,
    /// Network answers.
    pub network: Arc<StaticNetwork>,
    /// Identity backend calls.
    pub backend: Arc<RecordingIdentityBackend>,
    /// Installed release.
    pub platform: Arc<FixedPlatform>,
    /// Rendered configs.
    pub configs: Arc<DigestConfigWriter>,
    /// Certificate handling.
    pub certificates: Arc<StaticCertificates>,
    /// Reported statuses.
    pub status: Arc<RecordingStatus>,
}

impl DryRunWorld {
    /// Build recording collaborators seeded from a snapshot.
    pub fn from_snapshot(snapshot: WorldSnapshot) -> Self {
        Self {
            options: snapshot.options,
            relations: Arc::new(InMemoryRelationStore::from_snapshot(
                snapshot.local_unit,
                snapshot.relations,
            )),
            leadership: Arc::new(InMemoryLeadership::from_snapshot(snapshot.leadership)),
            services: Arc::new(RecordingServiceControl::new()),
            migrator: Arc::new(RecordingMigrator::new()),
            network: Arc::new(snapshot.network),
            backend: Arc::new(RecordingIdentityBackend::new()),
            platform: Arc::new(FixedPlatform(snapshot.release)),
            configs: Arc::new(DigestConfigWriter::new()),
            certificates: Arc::new(StaticCertificates::new(snapshot.certificate_request)),
            status: Arc::new(RecordingStatus::new()),
        }
    }

    /// Build an engine over this world and the given durable store.
    pub fn engine(&self, local: Arc<dyn LocalStore>) -> Result<Engine> {
        Engine::builder(self.options.clone())
            .relations(self.relations.clone())
            .leadership(self.leadership.clone())
            .local_store(local)
            .services(self.services.clone())
            .migrator(self.migrator.clone())
            .network(self.network.clone())
            .backend(self.backend.clone())
            .platform(self.platform.clone())
            .configs(self.configs.clone())
            .certificates(self.certificates.clone())
            .status(self.status.clone())
            .build()
    }

    /// Capture the current state as a snapshot.
    pub async fn snapshot(&self) -> WorldSnapshot {
        WorldSnapshot {
            local_unit: self.relations.local_unit().clone(),
            options: self.options.clone(),
            relations: self.relations.snapshot().await,
            leadership: self.leadership.snapshot().await,
            release: self.platform.0,
            network: self.network.as_ref().clone(),
            certificate_request: self.certificates.request.clone(),
        }
    }
}
