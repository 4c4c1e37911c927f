//! External signer adapter.
//!
//! The certificate engine never does cryptography itself. It stages files in
//! a workspace and asks `nebula-cert` to act on them; [`Signer`] is the seam
//! between the two so the engine can be driven without the real binary.

use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::SignerError;

/// CA private key file, produced by `ca` and staged for `sign`.
pub const CA_KEY_FILE: &str = "ca.key";
/// CA certificate file, produced by `ca` and staged for `sign`.
pub const CA_CRT_FILE: &str = "ca.crt";
/// Caller supplied host public key.
pub const HOST_PUB_FILE: &str = "host.pub";
/// Generated host private key.
pub const HOST_KEY_FILE: &str = "host.key";
/// Signed host certificate.
pub const HOST_CRT_FILE: &str = "host.crt";

/// A `nebula-cert` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignerCommand {
    /// Create a new certificate authority.
    CreateCa { name: String },
    /// Sign a host certificate with the staged CA.
    Sign {
        name: String,
        ip: String,
        /// Sign the staged `host.pub` instead of generating a key pair.
        with_public_key: bool,
    },
}

impl SignerCommand {
    /// Argument list passed to the tool.
    pub fn args(&self) -> Vec<String> {
        match self {
            SignerCommand::CreateCa { name } => {
                vec!["ca".into(), "-name".into(), name.clone()]
            }
            SignerCommand::Sign {
                name,
                ip,
                with_public_key,
            } => {
                let mut args = vec![
                    "sign".to_string(),
                    "-name".into(),
                    name.clone(),
                    "-ip".into(),
                    ip.clone(),
                ];
                if *with_public_key {
                    args.extend(["-in-pub".to_string(), HOST_PUB_FILE.to_string()]);
                } else {
                    args.extend(["-out-key".to_string(), HOST_KEY_FILE.to_string()]);
                }
                args.extend(["-out-crt".to_string(), HOST_CRT_FILE.to_string()]);
                args
            }
        }
    }
}

/// Runs the external CA tool against a working directory.
#[async_trait]
pub trait Signer: Send + Sync {
    /// Name of the program, for logs and errors.
    fn program(&self) -> &str;

    /// Run the tool with `args` in `cwd`.
    ///
    /// Succeeds only if the process started and exited with status 0. No
    /// retries are attempted.
    async fn invoke(&self, args: &[String], cwd: &Path) -> Result<(), SignerError>;
}

/// [`Signer`] backed by the `nebula-cert` executable.
#[derive(Debug, Clone)]
pub struct NebulaCert {
    executable: String,
}

impl NebulaCert {
    pub fn new(executable: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
        }
    }
}

impl Default for NebulaCert {
    fn default() -> Self {
        Self::new("nebula-cert")
    }
}

#[async_trait]
impl Signer for NebulaCert {
    fn program(&self) -> &str {
        &self.executable
    }

    async fn invoke(&self, args: &[String], cwd: &Path) -> Result<(), SignerError> {
        info!(command = %format!("$ {} {}", self.program(), args.join(" ")), "Running signer");

        let output = Command::new(self.program())
            .args(args)
            .current_dir(cwd)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| SignerError::Spawn {
                program: self.program().to_string(),
                source,
            })?;

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if !output.status.success() {
            warn!(
                program = %self.program(),
                status = %output.status,
                stderr = %stderr,
                "Signer exited unsuccessfully"
            );
            return Err(SignerError::Exit {
                program: self.program().to_string(),
                status: output.status,
                stderr,
            });
        }

        if !stderr.is_empty() {
            debug!(program = %self.program(), stderr = %stderr, "Signer stderr");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ca_args() {
        let cmd = SignerCommand::CreateCa {
            name: "net1".to_string(),
        };
        assert_eq!(cmd.args(), vec!["ca", "-name", "net1"]);
    }

    #[test]
    fn test_sign_args_generating_key() {
        let cmd = SignerCommand::Sign {
            name: "host1".to_string(),
            ip: "10.0.0.2/24".to_string(),
            with_public_key: false,
        };
        assert_eq!(
            cmd.args(),
            vec![
                "sign", "-name", "host1", "-ip", "10.0.0.2/24", "-out-key", "host.key",
                "-out-crt", "host.crt"
            ]
        );
    }

    #[test]
    fn test_sign_args_with_public_key() {
        let cmd = SignerCommand::Sign {
            name: "host1".to_string(),
            ip: "10.0.0.2/24".to_string(),
            with_public_key: true,
        };
        let args = cmd.args();
        assert_eq!(
            args,
            vec![
                "sign", "-name", "host1", "-ip", "10.0.0.2/24", "-in-pub", "host.pub",
                "-out-crt", "host.crt"
            ]
        );
        assert!(!args.iter().any(|a| a == "-out-key"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nebula_cert_success() {
        let dir = tempfile::TempDir::new().unwrap();
        let signer = NebulaCert::new("true");
        signer
            .invoke(&["ca".to_string()], dir.path())
            .await
            .unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nebula_cert_nonzero_exit() {
        let dir = tempfile::TempDir::new().unwrap();
        let signer = NebulaCert::new("false");
        let err = signer
            .invoke(&["ca".to_string()], dir.path())
            .await
            .unwrap_err();
        match err {
            SignerError::Exit { program, .. } => assert_eq!(program, signer.program()),
            other => panic!("expected exit error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_nebula_cert_missing_binary() {
        let dir = tempfile::TempDir::new().unwrap();
        let signer = NebulaCert::new("steward-no-such-binary");
        let err = signer
            .invoke(&["ca".to_string()], dir.path())
            .await
            .unwrap_err();
        match err {
            SignerError::Spawn { program, .. } => assert_eq!(program, "steward-no-such-binary"),
            other => panic!("expected spawn error, got {:?}", other),
        }
    }
}
