//! Steward certificate engine
//!
//! Issues Nebula mesh certificates by driving `nebula-cert` and keeps the
//! certificate authority, its key and the declared network topology in a
//! JSON state file.
//!
//! # Architecture
//!
//! - [`WorkspaceManager`] - uniquely named scratch directory per operation
//! - [`Signer`] / [`NebulaCert`] - runs the external CA tool in a workspace
//! - [`TransactionSerializer`] - admits one certificate operation at a time
//! - [`StateStore`] - authoritative in-memory state, loaded from and dumped to JSON
//! - [`Authority`] - `create_ca` and `sign_cert`
//! - [`node_config`] - derives lighthouse and host config documents
//!
//! # Operation flow
//!
//! 1. The operation enters the serializer's gate (callers queue in order)
//! 2. A fresh workspace is allocated and inputs are staged into it
//! 3. `nebula-cert` runs with the workspace as its working directory
//! 4. Outputs are read back; `create_ca` installs and persists the new CA
//! 5. The workspace is removed and the gate is released

pub mod authority;
pub mod error;
pub mod model;
pub mod node_config;
pub mod signer;
pub mod state;
pub mod transaction;
pub mod workspace;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use authority::{Authority, CreatedCa, SignRequest, SignedCert};
pub use error::{CaError, CaResult, SignerError};
pub use model::{
    CaMaterial, CaSecret, CertificateAuthority, Host, HostKind, Network, PersistedState,
    PublicState, Secrets,
};
pub use node_config::{HostConfigParams, NodeConfig, RelayPolicy};
pub use signer::{NebulaCert, Signer, SignerCommand};
pub use state::{StateStore, DEFAULT_DATA_PATH};
pub use transaction::TransactionSerializer;
pub use workspace::{TransactionContext, Workspace, WorkspaceManager};
