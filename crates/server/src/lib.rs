//! Steward server: the JSON-RPC front door, static UI hosting and CLI
//! plumbing around the `steward-ca` engine.
//!
//! ```text
//! HTTP request
//!   -> api::router
//!        /api, /api/{command} -> rpc::Dispatcher -> steward_ca::Authority
//!        /healthz
//!        *                    -> static_files::StaticFiles
//! ```

pub mod api;
pub mod logging;
pub mod rpc;
pub mod settings;
pub mod static_files;

use std::path::PathBuf;
use std::sync::Arc;

use steward_ca::{Authority, NebulaCert, StateStore, WorkspaceManager};

pub use rpc::{Dispatcher, RpcError, RpcRequest};
pub use settings::{LogFormat, ServeSettings, Settings};
pub use static_files::StaticFiles;

/// Shared state of the HTTP handlers.
pub struct AppState {
    pub dispatcher: Dispatcher,
    pub static_files: StaticFiles,
}

impl AppState {
    pub fn new(authority: Arc<Authority>, dist_dir: impl Into<PathBuf>) -> Self {
        Self {
            dispatcher: Dispatcher::new(authority),
            static_files: StaticFiles::new(dist_dir),
        }
    }
}

/// Open the state file and wire the engine to the real `nebula-cert`.
pub async fn build_authority(settings: &Settings) -> Arc<Authority> {
    let store = Arc::new(StateStore::open(settings.data_path.clone()).await);
    let signer = Arc::new(NebulaCert::new(settings.nebula_cert.clone()));
    let workspaces = WorkspaceManager::new(settings.work_dir());
    Arc::new(Authority::new(signer, store, workspaces))
}
