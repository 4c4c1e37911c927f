//! Error types for the certificate engine.

use std::path::PathBuf;
use std::process::ExitStatus;

use thiserror::Error;

/// Result type for certificate engine operations.
pub type CaResult<T> = Result<T, CaError>;

/// Errors surfaced by certificate operations and config derivation.
#[derive(Debug, Error)]
pub enum CaError {
    /// Signing was attempted before any CA was created.
    #[error("CA not found: create a certificate authority first")]
    NoCa,

    /// The external tool failed while creating the CA.
    #[error("CA generation failed: {0}")]
    CaGeneration(#[source] SignerError),

    /// The external tool failed while signing a host certificate.
    #[error("certificate signing failed: {0}")]
    Signing(#[source] SignerError),

    /// A scratch workspace could not be created, staged or removed.
    #[error("workspace error at {path}: {source}")]
    Workspace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The state file could not be written.
    #[error("failed to persist state to {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Config derivation received a malformed request.
    #[error("invalid config input: {0}")]
    InvalidConfigInput(String),

    /// An operation received an unusable argument.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl CaError {
    /// Stable tag used when the error crosses the RPC boundary.
    pub fn kind(&self) -> &'static str {
        match self {
            CaError::NoCa => "no_ca",
            CaError::CaGeneration(_) => "ca_generation",
            CaError::Signing(_) => "signing",
            CaError::Workspace { .. } => "workspace",
            CaError::Persist { .. } => "persist",
            CaError::InvalidConfigInput(_) => "invalid_config_input",
            CaError::InvalidInput(_) => "invalid_input",
        }
    }

    pub(crate) fn workspace(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CaError::Workspace {
            path: path.into(),
            source,
        }
    }
}

/// Failures of a single external tool invocation.
#[derive(Debug, Error)]
pub enum SignerError {
    /// The process could not be started at all.
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The process ran and exited unsuccessfully.
    #[error("{program} exited with {status}: {stderr}")]
    Exit {
        program: String,
        status: ExitStatus,
        stderr: String,
    },

    /// The process succeeded but an expected output file is unreadable.
    #[error("missing output {file}: {source}")]
    Output {
        file: String,
        #[source]
        source: std::io::Error,
    },
}

/// Reasons a persisted state file could not be loaded.
///
/// Never escapes the crate: loading degrades to the empty state.
#[derive(Debug, Error)]
pub(crate) enum StateLoadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed state file: {0}")]
    Parse(#[from] serde_json::Error),
}
