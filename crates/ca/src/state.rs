//! Authoritative in-memory state and its JSON file.
//!
//! [`StateStore`] owns the only shared mutable state in the engine. Reads
//! and mutations take a short synchronous lock and never hold it across an
//! `.await`, so a reader sees the state either before or after a mutation,
//! never half of one. File writes are serialized separately so that a dump
//! never overwrites the file with an older snapshot than a previous dump.

use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{CaError, CaResult, StateLoadError};
use crate::model::{CaMaterial, CaSecret, CertificateAuthority, Network, PersistedState, PublicState};

/// Default location of the state file.
pub const DEFAULT_DATA_PATH: &str = "data/db.json";

/// Holds CA identity, CA key and network topology.
#[derive(Debug)]
pub struct StateStore {
    state: RwLock<PersistedState>,
    data_path: PathBuf,
    write_lock: Mutex<()>,
}

impl StateStore {
    /// Create an empty store backed by `data_path`.
    pub fn new(data_path: impl Into<PathBuf>) -> Self {
        Self {
            state: RwLock::new(PersistedState::default()),
            data_path: data_path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Create a store and populate it from its data file.
    pub async fn open(data_path: impl Into<PathBuf>) -> Self {
        let store = Self::new(data_path);
        store.load(None).await;
        store
    }

    /// File used when no explicit path is given.
    pub fn data_path(&self) -> &Path {
        &self.data_path
    }

    /// Replace the in-memory state with the contents of a state file.
    ///
    /// Any read or parse failure resets the store to the empty state; this
    /// never fails. Returns the public view of the resulting state.
    pub async fn load(&self, path: Option<&Path>) -> PublicState {
        let path = path.unwrap_or(self.data_path.as_path());

        let loaded = match read_state_file(path).await {
            Ok(state) => {
                info!(
                    path = %path.display(),
                    networks = state.networks.len(),
                    has_ca = state.ca.is_some(),
                    "Loaded state"
                );
                state
            }
            Err(StateLoadError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No state file, starting empty");
                PersistedState::default()
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Unreadable state file, starting empty");
                PersistedState::default()
            }
        };

        let mut state = self.state.write();
        *state = loaded;
        state.public_view()
    }

    /// Write the complete state, secrets included, to a state file.
    ///
    /// If `networks` is given it replaces the stored topology first.
    pub async fn dump(&self, networks: Option<Vec<Network>>, path: Option<&Path>) -> CaResult<()> {
        let path = path.unwrap_or(self.data_path.as_path());
        let _write = self.write_lock.lock().await;

        if let Some(networks) = networks {
            self.state.write().networks = networks;
        }
        self.persist(path).await
    }

    /// Install a new CA and persist it to the data file as one step.
    ///
    /// If the write fails the previous CA and key are restored, so the
    /// in-memory state never holds a CA the caller was told failed.
    pub(crate) async fn commit_ca(
        &self,
        authority: CertificateAuthority,
        secret: CaSecret,
    ) -> CaResult<()> {
        let _write = self.write_lock.lock().await;

        let previous = {
            let state = self.state.read();
            (state.ca.clone(), state.secrets.ca.clone())
        };
        self.install_ca(authority, secret);

        if let Err(err) = self.persist(&self.data_path).await {
            let mut state = self.state.write();
            state.ca = previous.0;
            state.secrets.ca = previous.1;
            warn!(error = %err, "Persisting new CA failed, restored previous CA");
            return Err(err);
        }
        Ok(())
    }

    /// Serialize the current state to `path`. Callers hold `write_lock`.
    async fn persist(&self, path: &Path) -> CaResult<()> {
        let content = serde_json::to_string(&*self.state.read()).map_err(|e| CaError::Persist {
            path: path.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
        })?;

        write_state_file(path, &content)
            .await
            .map_err(|source| CaError::Persist {
                path: path.to_path_buf(),
                source,
            })?;

        info!(path = %path.display(), bytes = content.len(), "Dumped state");
        Ok(())
    }

    /// Current state without secrets.
    pub fn public_view(&self) -> PublicState {
        self.state.read().public_view()
    }

    pub fn authority(&self) -> Option<CertificateAuthority> {
        self.state.read().ca.clone()
    }

    pub fn networks(&self) -> Vec<Network> {
        self.state.read().networks.clone()
    }

    /// CA certificate and key, if both are present.
    pub fn ca_material(&self) -> Option<CaMaterial> {
        let state = self.state.read();
        match (&state.ca, &state.secrets.ca) {
            (Some(authority), Some(secret)) => Some(CaMaterial {
                authority: authority.clone(),
                secret: secret.clone(),
            }),
            _ => None,
        }
    }

    /// Replace the CA and its key in one step. The previous pair is dropped.
    pub(crate) fn install_ca(&self, authority: CertificateAuthority, secret: CaSecret) {
        let mut state = self.state.write();
        if let Some(previous) = &state.ca {
            info!(previous = %previous.name, name = %authority.name, "Replacing certificate authority");
        }
        state.ca = Some(authority);
        state.secrets.ca = Some(secret);
    }
}

async fn read_state_file(path: &Path) -> Result<PersistedState, StateLoadError> {
    let content = tokio::fs::read_to_string(path).await?;
    let mut state: PersistedState = serde_json::from_str(&content)?;

    match (&state.ca, &state.secrets.ca) {
        (Some(_), None) => {
            warn!(path = %path.display(), "State has a CA without its key, dropping CA");
            state.ca = None;
        }
        (None, Some(_)) => {
            warn!(path = %path.display(), "State has a CA key without a CA, dropping key");
            state.secrets.ca = None;
        }
        _ => {}
    }

    Ok(state)
}

async fn write_state_file(path: &Path, content: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, content).await?;

    // The file holds the CA key
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
    }

    Ok(())
}
