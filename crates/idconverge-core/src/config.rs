// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading.
//!
//! Two layers: [`Config`] is how the dry-run binary finds its inputs and comes
//! from environment variables; [`ServiceOptions`] are the deployment's
//! user-facing settings and travel inside the world snapshot.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::event::{RelationId, UnitId};

/// Process configuration for the dry-run binary.
#[derive(Debug, Clone)]
pub struct Config {
    /// JSON world snapshot to evaluate.
    pub snapshot_path: PathBuf,
    /// SQLite file holding the durable local store.
    pub state_path: PathBuf,
    /// Where to write the snapshot after dispatch, if anywhere.
    pub snapshot_out: Option<PathBuf>,
    /// Relation id the hook fired for.
    pub relation_id: Option<RelationId>,
    /// Remote unit the hook fired for.
    pub remote_unit: Option<UnitId>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `IDCONVERGE_SNAPSHOT_PATH`: JSON world snapshot
    ///
    /// Optional:
    /// - `IDCONVERGE_STATE_PATH`: local store file (default: `.data/unit-state.db`)
    /// - `IDCONVERGE_SNAPSHOT_OUT`: post-dispatch snapshot destination
    /// - `IDCONVERGE_RELATION_ID`: relation id, e.g. `identity-service:3`
    /// - `IDCONVERGE_REMOTE_UNIT`: remote unit, e.g. `nova-cloud-controller/0`
    pub fn from_env() -> Result<Self, ConfigError> {
        let snapshot_path = std::env::var("IDCONVERGE_SNAPSHOT_PATH")
            .map(PathBuf::from)
            .map_err(|_| ConfigError::Missing("IDCONVERGE_SNAPSHOT_PATH"))?;

        let state_path = std::env::var("IDCONVERGE_STATE_PATH")
            .unwrap_or_else(|_| ".data/unit-state.db".to_string())
            .into();

        let snapshot_out = non_empty_var("IDCONVERGE_SNAPSHOT_OUT").map(PathBuf::from);

        let relation_id = non_empty_var("IDCONVERGE_RELATION_ID")
            .map(|v| v.parse::<RelationId>())
            .transpose()
            .map_err(|_| {
                ConfigError::Invalid("IDCONVERGE_RELATION_ID", "must look like '<relation>:<n>'")
            })?;

        let remote_unit = non_empty_var("IDCONVERGE_REMOTE_UNIT").map(UnitId::new);

        Ok(Self {
            snapshot_path,
            state_path,
            snapshot_out,
            relation_id,
            remote_unit,
        })
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}

/// User-facing deployment settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ServiceOptions {
    /// Space-separated virtual IPs fronting the service.
    pub vip: Option<String>,
    /// Interface to use when a VIP's interface cannot be discovered.
    pub vip_iface: Option<String>,
    /// Netmask to use when a VIP's netmask cannot be discovered.
    pub vip_cidr: Option<String>,
    /// Use DNS records instead of VIPs for HA.
    pub dns_ha: bool,
    /// Interface corosync binds to.
    pub ha_bindiface: String,
    /// Multicast port corosync uses.
    pub ha_mcastport: u16,
    /// Run on IPv6 addresses.
    pub prefer_ipv6: bool,
    /// Database name to request.
    pub database: String,
    /// Database user to request.
    pub database_user: String,
    /// Public API port.
    pub service_port: u16,
    /// Admin user name.
    pub admin_user: String,
    /// Explicit admin password. Generated and held by the coordinator when unset.
    pub admin_password: Option<String>,
    /// Role granted to the admin user.
    pub admin_role: String,
    /// Region name.
    pub region: String,
    /// Identity API major version to advertise.
    pub preferred_api_version: u32,
    /// CIDR of the admin network.
    pub os_admin_network: Option<String>,
    /// CIDR of the internal network.
    pub os_internal_network: Option<String>,
    /// CIDR of the public network.
    pub os_public_network: Option<String>,
    /// Hostname for the admin endpoint.
    pub os_admin_hostname: Option<String>,
    /// Hostname for the internal endpoint.
    pub os_internal_hostname: Option<String>,
    /// Hostname for the public endpoint.
    pub os_public_hostname: Option<String>,
    /// TLS certificate.
    pub ssl_cert: Option<String>,
    /// TLS key.
    pub ssl_key: Option<String>,
    /// Serve the API from Apache rather than a standalone daemon.
    pub run_in_apache: bool,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            vip: None,
            vip_iface: None,
            vip_cidr: None,
            dns_ha: false,
            ha_bindiface: "eth0".to_string(),
            ha_mcastport: 5434,
            prefer_ipv6: false,
            database: "keystone".to_string(),
            database_user: "keystone".to_string(),
            service_port: 5000,
            admin_user: "admin".to_string(),
            admin_password: None,
            admin_role: "Admin".to_string(),
            region: "RegionOne".to_string(),
            preferred_api_version: 3,
            os_admin_network: None,
            os_internal_network: None,
            os_public_network: None,
            os_admin_hostname: None,
            os_internal_hostname: None,
            os_public_hostname: None,
            ssl_cert: None,
            ssl_key: None,
            run_in_apache: false,
        }
    }
}

impl ServiceOptions {
    /// Configured VIPs, in declaration order.
    pub fn vips(&self) -> Vec<String> {
        self.vip
            .as_deref()
            .map(|v| v.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// Whether options alone ask for an HA cluster. See
    /// [`crate::readiness::expect_ha`] for the full rule.
    pub fn ha_configured(&self) -> bool {
        !self.vips().is_empty() || self.dns_ha
    }

    /// Whether both halves of a TLS keypair are configured.
    pub fn tls_enabled(&self) -> bool {
        self.ssl_cert.as_deref().is_some_and(|c| !c.is_empty())
            && self.ssl_key.as_deref().is_some_and(|k| !k.is_empty())
    }
}
