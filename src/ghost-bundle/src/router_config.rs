//! Virtual-router configuration persistence (spec.md §3, §4.7.1): the LAN
//! subnet, gateway, WAN mode, upstream interface, DNS mode, firewall
//! (default policy + rules + aliases), DHCP pool/static leases, and
//! port-forwarding rules for a bundle's virtual router, stored alongside
//! `config.json` as `router.json`.

use std::path::Path;

use ghost_address::{Cidr, Mac, IPv4};
use ghost_dhcp::{DhcpConfig, StaticLeaseConfig, DEFAULT_LEASE_DURATION};
use ghost_dns::DnsMode;
use ghost_firewall::{Action, Alias, Rule};
use ghost_router::{PortForward, RouterConfig, WanMode};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const CURRENT_VERSION: u32 = 2;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FirewallSection {
    pub default_policy: Action,
    #[serde(default)]
    pub rules: Vec<Rule>,
    #[serde(default)]
    pub aliases: Vec<Alias>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredRouterConfig {
    pub version: u32,
    pub lan: Cidr,
    pub gateway_ip: IPv4,
    pub gateway_mac: Mac,
    pub wan_ip: IPv4,
    pub wan_mac: Mac,
    pub wan_mode: WanMode,
    /// The host network interface upstream traffic egresses through.
    pub upstream_interface: String,
    pub dns_mode: DnsMode,
    #[serde(default)]
    pub port_forwards: Vec<PortForward>,
    pub firewall: FirewallSection,
    pub dhcp: DhcpConfig,
}

impl StoredRouterConfig {
    /// Projects the persisted shape down to the fields `ghost_router::Router`
    /// itself needs; the firewall/DHCP sub-engines are built from this
    /// config's `firewall`/`dhcp` sections separately, since they carry
    /// their own construction-time validation (`FirewallEngine::new` rejects
    /// malformed rules; `DhcpServer::new` takes a bare `DhcpConfig`).
    pub fn to_router_config(&self) -> RouterConfig {
        RouterConfig {
            lan: self.lan,
            gateway_ip: self.gateway_ip,
            gateway_mac: self.gateway_mac,
            wan_ip: self.wan_ip,
            wan_mac: self.wan_mac,
            wan_mode: self.wan_mode,
            dns_mode: self.dns_mode.clone(),
            port_forwards: self.port_forwards.clone(),
        }
    }
}

/// The pre-nesting on-disk shape accepted on read (spec.md §3: "a legacy
/// flat representation is accepted on read and rewritten in the new shape
/// on next save"): the same fields as [`StoredRouterConfig`] but with
/// `firewall`/`dhcp` flattened to the top level instead of nested
/// sub-objects, as router configs were stored before the two were split
/// into their own sections.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyRouterConfig {
    lan: Cidr,
    gateway_ip: IPv4,
    gateway_mac: Mac,
    wan_ip: IPv4,
    wan_mac: Mac,
    wan_mode: WanMode,
    upstream_interface: String,
    dns_mode: DnsMode,
    #[serde(default)]
    port_forwards: Vec<PortForward>,
    default_policy: Action,
    #[serde(default)]
    firewall_rules: Vec<Rule>,
    #[serde(default)]
    firewall_aliases: Vec<Alias>,
    dhcp_pool_start: IPv4,
    dhcp_pool_end: IPv4,
    dhcp_subnet_mask: IPv4,
    dhcp_gateway: IPv4,
    #[serde(default)]
    dhcp_dns_servers: Vec<IPv4>,
    dhcp_server_identifier: IPv4,
    #[serde(default = "default_lease_seconds")]
    dhcp_lease_seconds: u64,
    #[serde(default)]
    dhcp_static_leases: Vec<StaticLeaseConfig>,
}

fn default_lease_seconds() -> u64 {
    DEFAULT_LEASE_DURATION.as_secs()
}

impl From<LegacyRouterConfig> for StoredRouterConfig {
    fn from(legacy: LegacyRouterConfig) -> Self {
        StoredRouterConfig {
            version: CURRENT_VERSION,
            lan: legacy.lan,
            gateway_ip: legacy.gateway_ip,
            gateway_mac: legacy.gateway_mac,
            wan_ip: legacy.wan_ip,
            wan_mac: legacy.wan_mac,
            wan_mode: legacy.wan_mode,
            upstream_interface: legacy.upstream_interface,
            dns_mode: legacy.dns_mode,
            port_forwards: legacy.port_forwards,
            firewall: FirewallSection {
                default_policy: legacy.default_policy,
                rules: legacy.firewall_rules,
                aliases: legacy.firewall_aliases,
            },
            dhcp: DhcpConfig {
                pool_start: legacy.dhcp_pool_start,
                pool_end: legacy.dhcp_pool_end,
                subnet_mask: legacy.dhcp_subnet_mask,
                gateway: legacy.dhcp_gateway,
                dns_servers: legacy.dhcp_dns_servers,
                server_identifier: legacy.dhcp_server_identifier,
                lease_duration: std::time::Duration::from_secs(legacy.dhcp_lease_seconds),
                static_leases: legacy.dhcp_static_leases,
            },
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OnDisk {
    Current(StoredRouterConfig),
    Legacy(LegacyRouterConfig),
}

/// Loads `router.json` from `bundle_root`, accepting either the current
/// nested shape or the legacy flat shape. Returns the parsed config and a
/// flag indicating whether the legacy shape was upgraded, mirroring
/// `ghost_bundle::config::load`'s normalization-changed flag — the caller
/// should `save` again when the flag is set so the bundle converges on the
/// current shape.
pub fn load(bundle_root: &Path) -> Result<(StoredRouterConfig, bool)> {
    let path = bundle_root.join("router.json");
    let text = std::fs::read_to_string(&path).map_err(|_| Error::MissingConfig(path.clone()))?;
    let on_disk: OnDisk =
        serde_json::from_str(&text).map_err(|e| Error::InvalidConfig(path.clone(), e))?;
    match on_disk {
        OnDisk::Current(config) => Ok((config, false)),
        OnDisk::Legacy(legacy) => Ok((StoredRouterConfig::from(legacy), true)),
    }
}

/// Serializes `config` as pretty JSON and writes it atomically to
/// `bundle_root/router.json`.
pub fn save(bundle_root: &Path, config: &StoredRouterConfig) -> Result<()> {
    let path = bundle_root.join("router.json");
    let text =
        serde_json::to_vec_pretty(config).map_err(|e| Error::InvalidConfig(path.clone(), e))?;
    crate::lock::write_atomic(&path, &text)?;
    Ok(())
}
