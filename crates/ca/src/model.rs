//! Persisted data model.
//!
//! Field names on the wire match the JSON document the web UI reads and
//! writes: `{ ca?: {name, crt}, secrets: {ca?: {key}}, networks: [...] }`.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Public identity of the issuing authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateAuthority {
    pub name: String,
    #[serde(rename = "crt")]
    pub certificate_pem: String,
}

/// CA private key. Never leaves the state store except into a workspace.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaSecret {
    #[serde(rename = "key")]
    pub private_key_pem: String,
}

impl fmt::Debug for CaSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaSecret")
            .field("private_key_pem", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Secrets {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca: Option<CaSecret>,
}

/// Role of a host in the mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostKind {
    Lighthouse,
    Host,
}

/// A node of a network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Host {
    #[serde(rename = "type")]
    pub kind: HostKind,
    pub name: String,
    /// Overlay address, usually in CIDR form (`10.0.0.2/24`).
    pub ip: String,
    #[serde(default)]
    pub relay: bool,
    /// Public `ip:port` the node is reachable at, lighthouses only.
    #[serde(
        rename = "publicIpPort",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub public_ip_port: Option<String>,
    /// Keys the engine does not model, kept verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Host {
    /// Overlay address without the prefix length.
    pub fn overlay_ip(&self) -> &str {
        self.ip.split('/').next().unwrap_or(&self.ip)
    }
}

/// A declared overlay network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Network {
    pub name: String,
    #[serde(rename = "ipRange")]
    pub ip_range: String,
    #[serde(default)]
    pub hosts: Vec<Host>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Everything written to the state file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca: Option<CertificateAuthority>,
    #[serde(default)]
    pub secrets: Secrets,
    #[serde(default)]
    pub networks: Vec<Network>,
}

impl PersistedState {
    /// View safe to hand to callers.
    pub fn public_view(&self) -> PublicState {
        PublicState {
            ca: self.ca.clone(),
            networks: self.networks.clone(),
        }
    }
}

/// State as seen from outside the store: no secrets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PublicState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca: Option<CertificateAuthority>,
    #[serde(default)]
    pub networks: Vec<Network>,
}

/// CA identity and key, as staged for signing.
#[derive(Debug, Clone)]
pub struct CaMaterial {
    pub authority: CertificateAuthority,
    pub secret: CaSecret,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_state_file_shape() {
        let state = PersistedState {
            ca: Some(CertificateAuthority {
                name: "net1".to_string(),
                certificate_pem: "CRT".to_string(),
            }),
            secrets: Secrets {
                ca: Some(CaSecret {
                    private_key_pem: "KEY".to_string(),
                }),
            },
            networks: Vec::new(),
        };

        let value = serde_json::to_value(&state).unwrap();
        assert_eq!(
            value,
            json!({
                "ca": {"name": "net1", "crt": "CRT"},
                "secrets": {"ca": {"key": "KEY"}},
                "networks": []
            })
        );
    }

    #[test]
    fn test_empty_state_shape() {
        let value = serde_json::to_value(PersistedState::default()).unwrap();
        assert_eq!(value, json!({"secrets": {}, "networks": []}));
    }

    #[test]
    fn test_unknown_fields_survive() {
        let input = json!({
            "name": "home",
            "ipRange": "10.0.0.0/24",
            "staticHostMap": {"10.0.0.1": ["1.2.3.4:4242"]},
            "hosts": [{
                "type": "lighthouse",
                "name": "lh",
                "ip": "10.0.0.1/24",
                "relay": true,
                "publicIpPort": "1.2.3.4:4242",
                "note": "rack 3"
            }]
        });

        let network: Network = serde_json::from_value(input.clone()).unwrap();
        assert_eq!(network.hosts[0].kind, HostKind::Lighthouse);
        assert_eq!(network.hosts[0].overlay_ip(), "10.0.0.1");
        assert!(network.extra.contains_key("staticHostMap"));
        assert_eq!(serde_json::to_value(&network).unwrap(), input);
    }

    #[test]
    fn test_host_requires_type() {
        let result: Result<Host, _> =
            serde_json::from_value(json!({"name": "a", "ip": "10.0.0.2/24"}));
        assert!(result.is_err());
    }

    #[test]
    fn test_secret_debug_is_redacted() {
        let secret = CaSecret {
            private_key_pem: "super secret".to_string(),
        };
        assert!(!format!("{:?}", secret).contains("super secret"));
    }
}
