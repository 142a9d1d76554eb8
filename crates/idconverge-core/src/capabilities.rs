// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Capability interfaces for the side-effecting collaborators.
//!
//! Service process control, schema migration, config rendering, certificate
//! handling and identity-backend API calls all happen outside this crate. The
//! engine only decides when to call them.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::endpoints::EndpointSet;
use crate::error::Result;
use crate::event::{RelationId, UnitId};
use crate::relation::Bucket;
use crate::relation::records::{CredentialsRequest, ServiceRequest};

/// A service (or glob of services) known to the init system.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceSelector(String);

impl ServiceSelector {
    /// Wrap a service name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The service name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServiceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fire-and-forget service process control.
#[async_trait]
pub trait ServiceControl: Send + Sync {
    /// Restart a service.
    async fn restart(&self, service: &ServiceSelector) -> Result<()>;
    /// Stop a service.
    async fn stop(&self, service: &ServiceSelector) -> Result<()>;
    /// Start a service.
    async fn start(&self, service: &ServiceSelector) -> Result<()>;
    /// Stop a service and keep it from starting on boot.
    async fn pause(&self, service: &ServiceSelector) -> Result<()>;
}

/// Database schema migration. Idempotent by contract.
#[async_trait]
pub trait SchemaMigrator: Send + Sync {
    /// Bring the schema up to date.
    async fn migrate(&self) -> Result<()>;
}

/// Local network introspection.
pub trait NetworkIntrospection: Send + Sync {
    /// Interface carrying the subnet an address belongs to.
    fn interface_for(&self, address: &str) -> Option<String>;

    /// Netmask of the subnet an address belongs to.
    fn netmask_for(&self, address: &str) -> Option<String>;

    /// This unit's address for a binding, optionally restricted to a CIDR.
    fn relation_ip(&self, binding: &str, cidr: Option<&str>) -> Option<String>;

    /// Every global IPv6 address on this unit.
    fn ipv6_addresses(&self) -> Vec<String>;
}

/// Identity API calls the engine delegates.
#[async_trait]
pub trait IdentityBackend: Send + Sync {
    /// Make sure the admin user, project, domain and the service's own
    /// endpoints exist.
    async fn ensure_initial_admin(&self, endpoints: &EndpointSet) -> Result<()>;

    /// Register a service's endpoints and user, returning the settings to
    /// publish back to the requesting relation.
    async fn register_service(
        &self,
        relation_id: &RelationId,
        unit: &UnitId,
        request: &ServiceRequest,
    ) -> Result<Bucket>;

    /// Create or rotate a user, returning the settings to publish back.
    async fn issue_credentials(
        &self,
        relation_id: &RelationId,
        unit: &UnitId,
        request: &CredentialsRequest,
    ) -> Result<Bucket>;

    /// Create a domain if it does not exist. Returns the domain id.
    async fn create_or_show_domain(&self, name: &str) -> Result<String>;

    /// Whether a catalogue entry exists.
    async fn is_service_present(&self, name: &str, service_type: &str) -> Result<bool>;

    /// Remove a catalogue entry.
    async fn delete_service_entry(&self, name: &str, service_type: &str) -> Result<()>;
}

/// Release series of the installed identity service, oldest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Release {
    /// 2014.1
    Icehouse,
    /// 2014.2
    Juno,
    /// 2015.1
    Kilo,
    /// 2015.2
    Liberty,
    /// 2016.1
    Mitaka,
    /// 2016.2
    Newton,
    /// 2017.1
    Ocata,
    /// 2017.2
    Pike,
    /// 2018.1
    Queens,
    /// 2018.2
    Rocky,
    /// 2019.1
    Stein,
    /// 2019.2
    Train,
    /// 2020.1
    Ussuri,
}

/// Facts about the installed platform.
pub trait Platform: Send + Sync {
    /// Release series currently installed.
    fn release(&self) -> Release;
}

/// Rendered configuration files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum ConfigTarget {
    /// Main service configuration.
    KeystoneConf,
    /// API policy.
    PolicyJson,
    /// Load balancer configuration.
    HaproxyCfg,
    /// Apache WSGI site for the API.
    WsgiApiConf,
    /// Apache TLS frontend site.
    HttpsFrontend,
    /// Token flush cron job, active on the coordinator only.
    TokenFlushCron,
}

impl ConfigTarget {
    /// Every target, in render order.
    pub const ALL: [ConfigTarget; 6] = [
        Self::KeystoneConf,
        Self::PolicyJson,
        Self::HaproxyCfg,
        Self::WsgiApiConf,
        Self::HttpsFrontend,
        Self::TokenFlushCron,
    ];

    /// On-disk location.
    pub fn path(&self) -> &'static str {
        match self {
            Self::KeystoneConf => "/etc/keystone/keystone.conf",
            Self::PolicyJson => "/etc/keystone/policy.json",
            Self::HaproxyCfg => "/etc/haproxy/haproxy.cfg",
            Self::WsgiApiConf => "/etc/apache2/sites-available/wsgi-openstack-api.conf",
            Self::HttpsFrontend => "/etc/apache2/sites-available/openstack_https_frontend.conf",
            Self::TokenFlushCron => "/etc/cron.d/keystone-token-flush",
        }
    }

    /// Services that must restart when this file changes.
    pub fn services(&self, run_in_apache: bool) -> Vec<ServiceSelector> {
        let api = if run_in_apache { "apache2" } else { "keystone" };
        match self {
            Self::KeystoneConf | Self::PolicyJson => vec![ServiceSelector::new(api)],
            Self::HaproxyCfg => vec![ServiceSelector::new("haproxy")],
            Self::WsgiApiConf | Self::HttpsFrontend => vec![ServiceSelector::new("apache2")],
            Self::TokenFlushCron => Vec::new(),
        }
    }
}

/// Config file rendering.
#[async_trait]
pub trait ConfigWriter: Send + Sync {
    /// Render one file, returning a digest of the rendered content.
    async fn write(&self, target: ConfigTarget) -> Result<String>;
}

/// TLS certificate request and installation.
#[async_trait]
pub trait CertificateManager: Send + Sync {
    /// Settings describing the certificates this unit wants issued.
    async fn certificate_request(&self) -> Result<Bucket>;

    /// Install certificates a provider unit published.
    async fn process_certificates(&self, relation_id: &RelationId, unit: Option<&UnitId>) -> Result<()>;
}

/// Workload state shown to operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusState {
    /// Operator action or upgrade in progress.
    Maintenance,
    /// Waiting on another party.
    Waiting,
    /// Needs operator intervention.
    Blocked,
    /// Ready.
    Active,
}

/// A workload status with a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkloadStatus {
    /// Coarse state.
    pub state: StatusState,
    /// Explanation.
    pub message: String,
}

/// Surfaces workload status to operators.
#[async_trait]
pub trait StatusReporter: Send + Sync {
    /// Replace the current status.
    async fn set_status(&self, status: &WorkloadStatus) -> Result<()>;
}
