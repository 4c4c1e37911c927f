//! Nebula node configuration derivation.
//!
//! Pure functions: no I/O, no access to the state store. Every document is
//! the shared base template plus a lighthouse section and a relay policy.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::{CaError, CaResult};
use crate::model::{HostKind, Network};

/// Paths the node reads its PKI material from.
const PKI_CA_PATH: &str = "/etc/nebula/ca.crt";
const PKI_CERT_PATH: &str = "/etc/nebula/host.crt";
const PKI_KEY_PATH: &str = "/etc/nebula/host.key";

/// Listen address and port for the Nebula underlay.
const LISTEN_HOST: &str = "0.0.0.0";
const LISTEN_PORT: u16 = 4242;

/// Whether a node relays for others or uses relays.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum RelayPolicy {
    /// The node is itself a relay.
    #[default]
    AmRelay,
    /// The node reaches unreachable peers through these relays.
    UseRelays(Vec<String>),
}

impl RelayPolicy {
    /// Parse the RPC form: `true`, `false`, `null` or a list of addresses.
    pub fn from_value(value: Value) -> CaResult<Self> {
        serde_json::from_value(value).map_err(|e| CaError::InvalidConfigInput(e.to_string()))
    }

    fn document(&self) -> RelayConfig {
        match self {
            RelayPolicy::AmRelay => RelayConfig {
                am_relay: true,
                use_relays: false,
                relays: None,
            },
            RelayPolicy::UseRelays(relays) => RelayConfig {
                am_relay: false,
                use_relays: true,
                relays: Some(relays.clone()),
            },
        }
    }
}

impl<'de> Deserialize<'de> for RelayPolicy {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Flag(bool),
            List(Vec<String>),
        }

        Ok(match Option::<Raw>::deserialize(deserializer)? {
            Some(Raw::Flag(true)) => RelayPolicy::AmRelay,
            Some(Raw::Flag(false)) | None => RelayPolicy::UseRelays(Vec::new()),
            Some(Raw::List(relays)) => RelayPolicy::UseRelays(relays),
        })
    }
}

/// Input of [`host_config`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostConfigParams {
    /// Overlay IP to public `ip:port` list.
    pub static_host_map: BTreeMap<String, Vec<String>>,
    /// Overlay IPs of the lighthouses.
    pub lighthouse_hosts: Vec<String>,
    pub relays: RelayPolicy,
}

impl HostConfigParams {
    /// Parse the RPC form, rejecting missing or mistyped fields.
    pub fn from_value(value: Value) -> CaResult<Self> {
        let Some(object) = value.as_object() else {
            return Err(CaError::InvalidConfigInput(
                "host config parameters must be an object".to_string(),
            ));
        };
        // A missing `relays` would otherwise parse as an empty relay list.
        for required in ["staticHostMap", "lighthouseHosts", "relays"] {
            if !object.contains_key(required) {
                return Err(CaError::InvalidConfigInput(format!(
                    "missing field `{}`",
                    required
                )));
            }
        }
        serde_json::from_value(value).map_err(|e| CaError::InvalidConfigInput(e.to_string()))
    }

    /// Parameters for `host_name` in `network`, derived from its topology.
    ///
    /// Lighthouses with a public address populate the static host map; every
    /// lighthouse is listed in `lighthouse_hosts`; every other relay host is
    /// used as a relay unless the host is a relay itself.
    pub fn for_host(network: &Network, host_name: &str) -> CaResult<Self> {
        let host = network
            .hosts
            .iter()
            .find(|h| h.name == host_name)
            .ok_or_else(|| {
                CaError::InvalidConfigInput(format!(
                    "host `{}` not found in network `{}`",
                    host_name, network.name
                ))
            })?;

        let mut static_host_map = BTreeMap::new();
        let mut lighthouse_hosts = Vec::new();
        for lighthouse in network
            .hosts
            .iter()
            .filter(|h| h.kind == HostKind::Lighthouse && h.name != host.name)
        {
            lighthouse_hosts.push(lighthouse.overlay_ip().to_string());
            if let Some(public) = &lighthouse.public_ip_port {
                static_host_map.insert(lighthouse.overlay_ip().to_string(), vec![public.clone()]);
            }
        }

        let relays = if host.relay {
            RelayPolicy::AmRelay
        } else {
            RelayPolicy::UseRelays(
                network
                    .hosts
                    .iter()
                    .filter(|h| h.relay && h.name != host.name)
                    .map(|h| h.overlay_ip().to_string())
                    .collect(),
            )
        };

        Ok(Self {
            static_host_map,
            lighthouse_hosts,
            relays,
        })
    }
}

/// A complete Nebula config document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub pki: PkiConfig,
    pub lighthouse: LighthouseConfig,
    pub listen: ListenConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub static_host_map: Option<BTreeMap<String, Vec<String>>>,
    pub relay: RelayConfig,
}

impl NodeConfig {
    /// Render as YAML, the format Nebula reads.
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PkiConfig {
    pub ca: String,
    pub cert: String,
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LighthouseConfig {
    pub am_lighthouse: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hosts: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayConfig {
    pub am_relay: bool,
    pub use_relays: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relays: Option<Vec<String>>,
}

fn base_config(relay: &RelayPolicy) -> NodeConfig {
    NodeConfig {
        pki: PkiConfig {
            ca: PKI_CA_PATH.to_string(),
            cert: PKI_CERT_PATH.to_string(),
            key: PKI_KEY_PATH.to_string(),
        },
        lighthouse: LighthouseConfig {
            am_lighthouse: true,
            hosts: None,
        },
        listen: ListenConfig {
            host: LISTEN_HOST.to_string(),
            port: LISTEN_PORT,
        },
        static_host_map: None,
        relay: relay.document(),
    }
}

/// Config for a lighthouse node.
pub fn lighthouse_config(relays: &RelayPolicy) -> NodeConfig {
    base_config(relays)
}

/// Config for a regular node.
pub fn host_config(params: &HostConfigParams) -> NodeConfig {
    let mut config = base_config(&params.relays);
    config.lighthouse = LighthouseConfig {
        am_lighthouse: false,
        hosts: Some(params.lighthouse_hosts.clone()),
    };
    config.static_host_map = Some(params.static_host_map.clone());
    config
}

/// Config for a host declared in a network, lighthouse or not.
pub fn network_host_config(network: &Network, host_name: &str) -> CaResult<NodeConfig> {
    let params = HostConfigParams::for_host(network, host_name)?;
    let is_lighthouse = network
        .hosts
        .iter()
        .any(|h| h.name == host_name && h.kind == HostKind::Lighthouse);

    Ok(if is_lighthouse {
        lighthouse_config(&params.relays)
    } else {
        host_config(&params)
    })
}
