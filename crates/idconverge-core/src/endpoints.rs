// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Endpoint address resolution and endpoint-set fingerprints.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::capabilities::NetworkIntrospection;
use crate::config::ServiceOptions;
use crate::net;
use crate::relation::records::ServiceRequest;

/// Port the admin API listens on.
pub const ADMIN_PORT: u16 = 35357;

/// The three endpoint flavours every service exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointType {
    /// Operator-facing.
    Admin,
    /// Intra-cloud.
    Internal,
    /// User-facing.
    Public,
}

impl EndpointType {
    /// Every type, in announcement order.
    pub const ALL: [EndpointType; 3] = [Self::Admin, Self::Internal, Self::Public];

    /// Binding / key prefix name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Internal => "internal",
            Self::Public => "public",
        }
    }

    fn network<'a>(&self, options: &'a ServiceOptions) -> Option<&'a str> {
        match self {
            Self::Admin => options.os_admin_network.as_deref(),
            Self::Internal => options.os_internal_network.as_deref(),
            Self::Public => options.os_public_network.as_deref(),
        }
        .filter(|v| !v.is_empty())
    }

    fn hostname<'a>(&self, options: &'a ServiceOptions) -> Option<&'a str> {
        match self {
            Self::Admin => options.os_admin_hostname.as_deref(),
            Self::Internal => options.os_internal_hostname.as_deref(),
            Self::Public => options.os_public_hostname.as_deref(),
        }
        .filter(|v| !v.is_empty())
    }
}

/// This unit's address on one endpoint type's network.
pub fn relation_address(
    options: &ServiceOptions,
    network: &dyn NetworkIntrospection,
    endpoint_type: EndpointType,
) -> Option<String> {
    network.relation_ip(endpoint_type.as_str(), endpoint_type.network(options))
}

/// The address clients should use for an endpoint type.
///
/// An explicit hostname wins. When clustered, the VIP on the endpoint's network
/// (or the first VIP when no network is configured) fronts every unit.
/// Otherwise the unit's own address on that network is used.
pub fn resolve_address(
    options: &ServiceOptions,
    network: &dyn NetworkIntrospection,
    clustered: bool,
    endpoint_type: EndpointType,
) -> Option<String> {
    if let Some(hostname) = endpoint_type.hostname(options) {
        return Some(hostname.to_string());
    }

    if clustered {
        let vips = options.vips();
        let chosen = match endpoint_type.network(options) {
            Some(cidr) => vips.iter().find(|vip| net::in_network(vip, cidr)),
            None => vips.first(),
        };
        if let Some(vip) = chosen {
            return Some(vip.clone());
        }
    }

    relation_address(options, network, endpoint_type)
}

/// The {admin, internal, public} URL triple of one service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EndpointSet {
    /// Admin URL.
    pub admin: Option<String>,
    /// Internal URL.
    pub internal: Option<String>,
    /// Public URL.
    pub public: Option<String>,
}

impl EndpointSet {
    /// The URLs a consuming service asked to register.
    pub fn from_request(request: &ServiceRequest) -> Self {
        Self {
            admin: request.admin_url.clone(),
            internal: request.internal_url.clone(),
            public: request.public_url.clone(),
        }
    }

    /// The identity service's own endpoints under the current configuration.
    pub fn local(
        options: &ServiceOptions,
        network: &dyn NetworkIntrospection,
        clustered: bool,
    ) -> Self {
        let scheme = if options.tls_enabled() { "https" } else { "http" };
        let url = |endpoint_type: EndpointType, port: u16| {
            resolve_address(options, network, clustered, endpoint_type).map(|host| {
                let host = if net::is_ipv6(&host) {
                    format!("[{}]", host)
                } else {
                    host
                };
                format!("{}://{}:{}/v{}", scheme, host, port, options.preferred_api_version)
            })
        };

        Self {
            admin: url(EndpointType::Admin, ADMIN_PORT),
            internal: url(EndpointType::Internal, options.service_port),
            public: url(EndpointType::Public, options.service_port),
        }
    }

    /// Content fingerprint over public, admin and internal URL, in that order.
    ///
    /// Missing URLs hash as empty strings.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for url in [&self.public, &self.admin, &self.internal] {
            hasher.update(url.as_deref().unwrap_or_default().as_bytes());
        }
        format!("{:x}", hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dryrun::StaticNetwork;

    #[test]
    fn test_fingerprint_changes_with_any_url() {
        let a = EndpointSet {
            admin: Some("http://10.0.0.1:9292".to_string()),
            internal: Some("http://10.0.0.1:9292".to_string()),
            public: Some("http://10.0.0.1:9292".to_string()),
        };
        let mut b = a.clone();
        assert_eq!(a.fingerprint(), b.fingerprint());

        b.internal = Some("http://10.0.0.2:9292".to_string());
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);
    }

    #[test]
    fn test_resolve_prefers_hostname_then_vip() {
        let network = StaticNetwork::default().with_binding("public", "10.0.0.11");
        let mut options = ServiceOptions {
            vip: Some("10.0.0.100".to_string()),
            ..Default::default()
        };

        assert_eq!(
            resolve_address(&options, &network, false, EndpointType::Public).as_deref(),
            Some("10.0.0.11")
        );
        assert_eq!(
            resolve_address(&options, &network, true, EndpointType::Public).as_deref(),
            Some("10.0.0.100")
        );

        options.os_public_hostname = Some("keystone.example.com".to_string());
        assert_eq!(
            resolve_address(&options, &network, true, EndpointType::Public).as_deref(),
            Some("keystone.example.com")
        );
    }

    #[test]
    fn test_resolve_picks_vip_in_endpoint_network() {
        let network = StaticNetwork::default();
        let options = ServiceOptions {
            vip: Some("10.0.0.100 192.168.5.100".to_string()),
            os_admin_network: Some("192.168.5.0/24".to_string()),
            ..Default::default()
        };
        assert_eq!(
            resolve_address(&options, &network, true, EndpointType::Admin).as_deref(),
            Some("192.168.5.100")
        );
    }

    #[test]
    fn test_local_endpoints() {
        let network = StaticNetwork::default()
            .with_binding("admin", "2001:db8::1")
            .with_binding("internal", "10.0.0.11")
            .with_binding("public", "10.0.0.11");
        let options = ServiceOptions::default();
        let endpoints = EndpointSet::local(&options, &network, false);

        assert_eq!(endpoints.admin.as_deref(), Some("http://[2001:db8::1]:35357/v3"));
        assert_eq!(endpoints.public.as_deref(), Some("http://10.0.0.11:5000/v3"));
    }
}
