// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Typed views over relation buckets.
//!
//! Each record is parsed from a raw [`Bucket`] at the store boundary. Missing
//! or empty keys become `None`; nothing here fails on malformed peer data.

use serde::Serialize;

use super::Bucket;
use crate::event::UnitId;

fn field(bucket: &Bucket, key: &str) -> Option<String> {
    bucket.get(key).filter(|v| !v.is_empty()).cloned()
}

fn words(value: Option<String>) -> Vec<String> {
    value
        .map(|v| v.split([' ', ',']).filter(|s| !s.is_empty()).map(str::to_string).collect())
        .unwrap_or_default()
}

/// What a database unit publishes on `shared-db`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SharedDbData {
    /// Address of the database server.
    pub db_host: Option<String>,
    /// Password for the requested user.
    pub password: Option<String>,
    /// Units granted access. `None` when the database does not publish an ACL.
    pub allowed_units: Option<Vec<UnitId>>,
    /// Network the database expects clients to connect from.
    pub access_network: Option<String>,
}

impl SharedDbData {
    /// Parse from a database unit's bucket.
    pub fn from_bucket(bucket: &Bucket) -> Self {
        Self {
            db_host: field(bucket, "db_host"),
            password: field(bucket, "password"),
            allowed_units: field(bucket, "allowed_units")
                .map(|v| words(Some(v)).into_iter().map(UnitId::new).collect()),
            access_network: field(bucket, "access-network"),
        }
    }
}

/// An endpoint registration request on `identity-service`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ServiceRequest {
    /// Service name (`nova`, `glance`, ...).
    pub service: Option<String>,
    /// Region the endpoints belong to.
    pub region: Option<String>,
    /// Public endpoint URL.
    pub public_url: Option<String>,
    /// Admin endpoint URL.
    pub admin_url: Option<String>,
    /// Internal endpoint URL.
    pub internal_url: Option<String>,
    /// Extra roles the service user should hold.
    pub requested_roles: Vec<String>,
}

impl ServiceRequest {
    /// Parse from a consuming service unit's bucket.
    pub fn from_bucket(bucket: &Bucket) -> Self {
        Self {
            service: field(bucket, "service"),
            region: field(bucket, "region"),
            public_url: field(bucket, "public_url"),
            admin_url: field(bucket, "admin_url"),
            internal_url: field(bucket, "internal_url"),
            requested_roles: words(field(bucket, "requested_roles")),
        }
    }
}

/// A credentials request on `identity-credentials`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CredentialsRequest {
    /// Username to create or rotate.
    pub username: Option<String>,
    /// Project the user should belong to.
    pub project: Option<String>,
    /// Domain the user should belong to.
    pub domain: Option<String>,
    /// Extra roles the user should hold.
    pub requested_roles: Vec<String>,
}

impl CredentialsRequest {
    /// Parse from a consuming unit's bucket.
    pub fn from_bucket(bucket: &Bucket) -> Self {
        Self {
            username: field(bucket, "username"),
            project: field(bucket, "project"),
            domain: field(bucket, "domain"),
            requested_roles: words(field(bucket, "requested_roles")),
        }
    }
}

/// What a domain backend subordinate publishes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DomainBackendData {
    /// Domain the backend serves.
    pub domain_name: Option<String>,
    /// Token that changes whenever the backend wants a service restart.
    pub restart_nonce: Option<String>,
}

impl DomainBackendData {
    /// Parse from the backend unit's bucket.
    pub fn from_bucket(bucket: &Bucket) -> Self {
        Self {
            domain_name: field(bucket, "domain-name"),
            restart_nonce: field(bucket, "restart-nonce"),
        }
    }
}

/// What a federated identity provider subordinate publishes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FidProviderData {
    /// JSON-encoded restart token.
    pub restart_nonce: Option<String>,
}

impl FidProviderData {
    /// Parse from the provider unit's bucket.
    pub fn from_bucket(bucket: &Bucket) -> Self {
        Self {
            restart_nonce: field(bucket, "restart-nonce"),
        }
    }

    /// The nonce in canonical form.
    ///
    /// Providers JSON-encode the nonce, so `"\"abc\""` decodes to `abc`. A
    /// value that is not valid JSON is used verbatim. JSON `null` and the
    /// empty string count as absent.
    pub fn canonical_nonce(&self) -> Option<String> {
        let raw = self.restart_nonce.as_deref()?;
        match serde_json::from_str::<serde_json::Value>(raw) {
            Ok(serde_json::Value::Null) => None,
            Ok(serde_json::Value::String(s)) if s.is_empty() => None,
            Ok(serde_json::Value::String(s)) => Some(s),
            Ok(other) => Some(other.to_string()),
            Err(_) => Some(raw.to_string()),
        }
    }
}

/// What the HA subordinate publishes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HaData {
    /// Whether the resource manager reports the cluster as formed.
    pub clustered: bool,
}

impl HaData {
    /// Parse from the HA unit's bucket.
    pub fn from_bucket(bucket: &Bucket) -> Self {
        Self {
            clustered: field(bucket, "clustered").is_some(),
        }
    }
}

/// Settings published to federated identity providers.
///
/// The other side is a reactive endpoint implementation, so every value is
/// JSON-encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FidServiceProviderSettings {
    /// Public hostname of the identity service.
    pub hostname: Option<String>,
    /// Public service port.
    pub port: u16,
    /// Whether TLS is configured.
    pub tls_enabled: bool,
}

impl FidServiceProviderSettings {
    /// Encode into bucket form.
    pub fn to_bucket(&self) -> Bucket {
        let mut bucket = Bucket::new();
        bucket.insert(
            "hostname".to_string(),
            serde_json::Value::from(self.hostname.clone()).to_string(),
        );
        bucket.insert("port".to_string(), self.port.to_string());
        bucket.insert("tls-enabled".to_string(), self.tls_enabled.to_string());
        bucket
    }
}
