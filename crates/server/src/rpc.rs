//! JSON-RPC command dispatch.
//!
//! A request names a command and carries positional arguments, mirroring the
//! call signatures the web UI uses:
//!
//! ```text
//! createCA(name)
//! signCert({name, ip, publicKey?})
//! getLighthouseConfig(relays?)
//! getHostConfig({staticHostMap, lighthouseHosts, relays})
//! getNetworkHostConfig(networkName, hostName)
//! loadData(path?)
//! dumpData({networks?}?, path?)
//! ```
//!
//! Certificate commands go through the [`Authority`] and are serialized
//! there; the other commands read or write the state store directly and are
//! not gated.

use std::path::PathBuf;
use std::sync::Arc;

use http::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use steward_ca::node_config::{self, HostConfigParams, RelayPolicy};
use steward_ca::{Authority, CaError, Network, SignRequest, StateStore};

/// Request body of `POST /api`.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcRequest {
    pub command: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

/// Argument of `dumpData`.
#[derive(Debug, Clone, Default, Deserialize)]
struct DumpPayload {
    #[serde(default)]
    networks: Option<Vec<Network>>,
}

/// Failures reported to RPC callers.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("invalid arguments for {command}: {message}")]
    InvalidArguments { command: String, message: String },

    #[error("malformed request: {0}")]
    MalformedRequest(String),

    #[error(transparent)]
    Ca(#[from] CaError),
}

impl RpcError {
    /// Stable tag sent on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            RpcError::UnknownCommand(_) => "unknown_command",
            RpcError::InvalidArguments { .. } => "invalid_input",
            RpcError::MalformedRequest(_) => "malformed_request",
            RpcError::Ca(e) => e.kind(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            RpcError::UnknownCommand(_)
            | RpcError::InvalidArguments { .. }
            | RpcError::MalformedRequest(_) => StatusCode::BAD_REQUEST,
            RpcError::Ca(CaError::NoCa) => StatusCode::CONFLICT,
            RpcError::Ca(CaError::InvalidConfigInput(_) | CaError::InvalidInput(_)) => {
                StatusCode::BAD_REQUEST
            }
            RpcError::Ca(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Error payload: `{"kind": ..., "message": ...}`.
    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub kind: &'static str,
    pub message: String,
}

/// Routes commands to the certificate engine.
pub struct Dispatcher {
    authority: Arc<Authority>,
}

impl Dispatcher {
    pub fn new(authority: Arc<Authority>) -> Self {
        Self { authority }
    }

    fn store(&self) -> &StateStore {
        self.authority.store()
    }

    /// Execute one command.
    pub async fn dispatch(&self, request: RpcRequest) -> Result<Value, RpcError> {
        let RpcRequest { command, args } = request;
        debug!(command = %command, args = args.len(), "RPC call");
        let args = Args {
            command: &command,
            values: args,
        };

        match command.as_str() {
            "createCA" => {
                let name: String = args.required(0)?;
                let created = self.authority.create_ca(&name).await?;
                to_value(created)
            }
            "signCert" => {
                let request: SignRequest = args.required(0)?;
                let signed = self.authority.sign_cert(request).await?;
                to_value(signed)
            }
            "getLighthouseConfig" => {
                let relays = match args.raw(0) {
                    Some(value) => RelayPolicy::from_value(value)?,
                    None => RelayPolicy::default(),
                };
                to_value(node_config::lighthouse_config(&relays))
            }
            "getHostConfig" => {
                let params = args.raw(0).ok_or_else(|| {
                    CaError::InvalidConfigInput("missing host config parameters".to_string())
                })?;
                let params = HostConfigParams::from_value(params)?;
                to_value(node_config::host_config(&params))
            }
            "getNetworkHostConfig" => {
                let network_name: String = args.required(0)?;
                let host_name: String = args.required(1)?;
                let network = self
                    .store()
                    .networks()
                    .into_iter()
                    .find(|n| n.name == network_name)
                    .ok_or_else(|| {
                        CaError::InvalidConfigInput(format!("network `{}` not found", network_name))
                    })?;
                to_value(node_config::network_host_config(&network, &host_name)?)
            }
            "loadData" => {
                let path: Option<PathBuf> = args.optional(0)?;
                to_value(self.store().load(path.as_deref()).await)
            }
            "dumpData" => {
                let payload: Option<DumpPayload> = args.optional(0)?;
                let path: Option<PathBuf> = args.optional(1)?;
                self.store()
                    .dump(payload.and_then(|p| p.networks), path.as_deref())
                    .await?;
                Ok(Value::Null)
            }
            _ => Err(RpcError::UnknownCommand(command.clone())),
        }
    }
}

/// Positional arguments of one call.
struct Args<'a> {
    command: &'a str,
    values: Vec<Value>,
}

impl Args<'_> {
    /// Argument at `index`, with `null` treated as absent.
    fn raw(&self, index: usize) -> Option<Value> {
        self.values.get(index).filter(|v| !v.is_null()).cloned()
    }

    fn optional<T: DeserializeOwned>(&self, index: usize) -> Result<Option<T>, RpcError> {
        self.raw(index)
            .map(|value| {
                serde_json::from_value(value).map_err(|e| RpcError::InvalidArguments {
                    command: self.command.to_string(),
                    message: format!("argument {}: {}", index, e),
                })
            })
            .transpose()
    }

    fn required<T: DeserializeOwned>(&self, index: usize) -> Result<T, RpcError> {
        self.optional(index)?
            .ok_or_else(|| RpcError::InvalidArguments {
                command: self.command.to_string(),
                message: format!("missing argument {}", index),
            })
    }
}

fn to_value<T: Serialize>(value: T) -> Result<Value, RpcError> {
    serde_json::to_value(value).map_err(|e| RpcError::MalformedRequest(e.to_string()))
}
