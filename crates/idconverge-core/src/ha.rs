// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HA resource planning.
//!
//! Derives the resource-manager configuration published on the `ha` relation
//! from the configured VIPs (or, with DNS HA, endpoint hostnames). The plan is
//! rebuilt from scratch on every call and is pure apart from network lookups.
//!
//! # VIP resource naming
//!
//! Each VIP becomes `res_ks_<iface>_vip`. A second VIP on the same interface
//! gets the agent parameter name appended (`res_ks_eth0_vip_ip`,
//! `res_ks_eth0_vip_ipv6addr`). A VIP that would still collide, or that is
//! listed twice, is skipped with a warning and the rest of the plan stands.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::warn;

use crate::capabilities::NetworkIntrospection;
use crate::config::ServiceOptions;
use crate::endpoints::{EndpointType, relation_address};
use crate::net;
use crate::relation::Bucket;

/// Group holding every VIP resource.
pub const VIP_GROUP: &str = "grp_ks_vips";
/// Group holding every DNS hostname resource.
pub const HOSTNAME_GROUP: &str = "grp_ks_hostnames";
/// Load balancer resource.
pub const HAPROXY_RESOURCE: &str = "res_ks_haproxy";
/// Clone of the load balancer resource across every unit.
pub const HAPROXY_CLONE: &str = "cl_ks_haproxy";

/// A VIP the planner could not place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedVip {
    /// The VIP.
    pub vip: String,
    /// Why it was skipped.
    pub reason: String,
}

/// Resource-manager configuration for the cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HaResourcePlan {
    /// Resource name → agent.
    pub resources: BTreeMap<String, String>,
    /// Resource name → agent parameters.
    pub resource_params: BTreeMap<String, String>,
    /// Group name → space-separated members.
    pub groups: BTreeMap<String, String>,
    /// Clone name → cloned resource.
    pub clones: BTreeMap<String, String>,
    /// Resource name → init service it manages.
    pub init_services: BTreeMap<String, String>,
    /// Interface corosync binds to.
    pub bindiface: String,
    /// Corosync multicast port.
    pub mcastport: u16,
    /// VIPs left out of the plan.
    pub skipped: Vec<SkippedVip>,
}

impl HaResourcePlan {
    /// Build the plan for the current options.
    pub fn build(options: &ServiceOptions, network: &dyn NetworkIntrospection) -> Self {
        let mut plan = Self {
            bindiface: options.ha_bindiface.clone(),
            mcastport: options.ha_mcastport,
            ..Default::default()
        };

        plan.resources
            .insert(HAPROXY_RESOURCE.to_string(), "lsb:haproxy".to_string());
        plan.resource_params.insert(
            HAPROXY_RESOURCE.to_string(),
            r#"op monitor interval="5s""#.to_string(),
        );

        if options.dns_ha {
            plan.add_hostnames(options, network);
        } else {
            plan.add_vips(options, network);
        }

        plan.clones
            .insert(HAPROXY_CLONE.to_string(), HAPROXY_RESOURCE.to_string());
        plan.init_services
            .insert(HAPROXY_RESOURCE.to_string(), "haproxy".to_string());
        plan
    }

    fn add_vips(&mut self, options: &ServiceOptions, network: &dyn NetworkIntrospection) {
        let mut group: Vec<String> = Vec::new();

        for vip in options.vips() {
            let (agent, param) = if net::is_ipv6(&vip) {
                ("ocf:heartbeat:IPv6addr", "ipv6addr")
            } else {
                ("ocf:heartbeat:IPaddr2", "ip")
            };

            let Some(iface) = network
                .interface_for(&vip)
                .or_else(|| options.vip_iface.clone())
            else {
                warn!(vip = %vip, "No interface found for VIP, skipping");
                self.skipped.push(SkippedVip {
                    vip,
                    reason: "no interface".to_string(),
                });
                continue;
            };
            let netmask = network
                .netmask_for(&vip)
                .or_else(|| options.vip_cidr.clone());

            let mut key = format!("res_ks_{}_vip", iface);
            if group.contains(&key) {
                let already_listed = self
                    .resource_params
                    .get(&key)
                    .is_some_and(|p| p.contains(&format!("\"{}\"", vip)));
                let disambiguated = format!("{}_{}", key, param);
                if already_listed || group.contains(&disambiguated) {
                    warn!(
                        resource = %key,
                        vip = %vip,
                        "Resource already exists in VIP group, skipping"
                    );
                    self.skipped.push(SkippedVip {
                        vip,
                        reason: format!("{} already in {}", key, VIP_GROUP),
                    });
                    continue;
                }
                key = disambiguated;
            }

            let mut params = format!("params {}=\"{}\"", param, vip);
            if let Some(netmask) = netmask {
                params.push_str(&format!(" cidr_netmask=\"{}\"", netmask));
            }
            params.push_str(&format!(" nic=\"{}\"", iface));

            self.resources.insert(key.clone(), agent.to_string());
            self.resource_params.insert(key.clone(), params);
            group.push(key);
        }

        if !group.is_empty() {
            self.groups.insert(VIP_GROUP.to_string(), group.join(" "));
        }
    }

    fn add_hostnames(&mut self, options: &ServiceOptions, network: &dyn NetworkIntrospection) {
        let mut group = Vec::new();

        for endpoint_type in EndpointType::ALL {
            let hostname = match endpoint_type {
                EndpointType::Admin => options.os_admin_hostname.as_deref(),
                EndpointType::Internal => options.os_internal_hostname.as_deref(),
                EndpointType::Public => options.os_public_hostname.as_deref(),
            };
            let Some(hostname) = hostname.filter(|h| !h.is_empty()) else {
                continue;
            };
            let Some(address) = relation_address(options, network, endpoint_type) else {
                warn!(hostname, endpoint = endpoint_type.as_str(), "No address for DNS HA hostname, skipping");
                continue;
            };

            let key = format!("res_ks_{}_hostname", endpoint_type.as_str());
            self.resources.insert(key.clone(), "ocf:maas:dns".to_string());
            self.resource_params.insert(
                key.clone(),
                format!(r#"params fqdn="{}" ip_address="{}""#, hostname, address),
            );
            group.push(key);
        }

        if group.is_empty() {
            warn!("DNS HA requested but no endpoint hostname is configured");
        } else {
            self.groups
                .insert(HOSTNAME_GROUP.to_string(), group.join(" "));
        }
    }

    /// Encode for the `ha` relation.
    ///
    /// Maps are JSON-encoded under `json_*` keys. An empty group map unsets
    /// `json_groups` so a plan that lost every VIP does not leave stale groups
    /// behind.
    pub fn to_bucket(&self) -> Bucket {
        let json = |map: &BTreeMap<String, String>| {
            serde_json::to_string(map).unwrap_or_else(|_| "{}".to_string())
        };

        let mut bucket = Bucket::new();
        bucket.insert("json_resources".to_string(), json(&self.resources));
        bucket.insert("json_resource_params".to_string(), json(&self.resource_params));
        bucket.insert(
            "json_groups".to_string(),
            if self.groups.is_empty() {
                String::new()
            } else {
                json(&self.groups)
            },
        );
        bucket.insert("json_clones".to_string(), json(&self.clones));
        bucket.insert("json_init_services".to_string(), json(&self.init_services));
        bucket.insert("corosync_bindiface".to_string(), self.bindiface.clone());
        bucket.insert("corosync_mcastport".to_string(), self.mcastport.to_string());
        bucket
    }
}
