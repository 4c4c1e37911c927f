//! Certificate operations: `create_ca` and `sign_cert`.
//!
//! Both run inside the [`TransactionSerializer`] so the CA key is only ever
//! staged into one workspace at a time, and a CA replacement can never
//! interleave with a signing that is reading the previous CA.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{CaError, CaResult, SignerError};
use crate::model::{CaSecret, CertificateAuthority};
use crate::signer::{
    Signer, SignerCommand, CA_CRT_FILE, CA_KEY_FILE, HOST_CRT_FILE, HOST_KEY_FILE, HOST_PUB_FILE,
};
use crate::state::StateStore;
use crate::transaction::TransactionSerializer;
use crate::workspace::{TransactionContext, WorkspaceManager};

/// Result of `create_ca`: the public certificate only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedCa {
    #[serde(rename = "crt")]
    pub certificate_pem: String,
}

/// Arguments of `sign_cert`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SignRequest {
    pub name: String,
    /// Overlay address in CIDR form.
    #[serde(alias = "ipRange")]
    pub ip: String,
    /// Host public key to sign. Without it a key pair is generated.
    #[serde(default, rename = "publicKey", alias = "pub")]
    pub public_key: Option<String>,
}

impl SignRequest {
    pub fn new(name: impl Into<String>, ip: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ip: ip.into(),
            public_key: None,
        }
    }

    pub fn with_public_key(mut self, public_key: impl Into<String>) -> Self {
        self.public_key = Some(public_key.into());
        self
    }
}

/// Result of `sign_cert`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedCert {
    /// Generated private key; absent when the caller supplied a public key.
    #[serde(rename = "key", default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
    #[serde(rename = "crt")]
    pub certificate_pem: String,
}

/// Issues the CA and host certificates.
pub struct Authority {
    serializer: TransactionSerializer,
    signer: Arc<dyn Signer>,
    store: Arc<StateStore>,
}

impl Authority {
    pub fn new(signer: Arc<dyn Signer>, store: Arc<StateStore>, workspaces: WorkspaceManager) -> Self {
        Self {
            serializer: TransactionSerializer::new(workspaces),
            signer,
            store,
        }
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    /// Create a new CA, replacing any existing one, and persist it.
    ///
    /// Only the certificate is returned; the key stays in the store.
    pub async fn create_ca(&self, name: &str) -> CaResult<CreatedCa> {
        if name.trim().is_empty() {
            return Err(CaError::InvalidInput("CA name must not be empty".to_string()));
        }

        let name = name.to_string();
        self.serializer
            .run_exclusive(|ctx| async move {
                let command = SignerCommand::CreateCa { name: name.clone() };
                self.signer
                    .invoke(&command.args(), ctx.workspace_path())
                    .await
                    .map_err(CaError::CaGeneration)?;

                let key = read_output(&ctx, CA_KEY_FILE)
                    .await
                    .map_err(CaError::CaGeneration)?;
                let crt = read_output(&ctx, CA_CRT_FILE)
                    .await
                    .map_err(CaError::CaGeneration)?;

                self.store
                    .commit_ca(
                        CertificateAuthority {
                            name: name.clone(),
                            certificate_pem: crt.clone(),
                        },
                        CaSecret {
                            private_key_pem: key,
                        },
                    )
                    .await?;

                info!(
                    name = %name,
                    signer = %self.signer.program(),
                    seq = ctx.seq(),
                    "Created certificate authority"
                );
                Ok(CreatedCa {
                    certificate_pem: crt,
                })
            })
            .await
    }

    /// Sign a host certificate with the stored CA.
    ///
    /// Fails with [`CaError::NoCa`] before anything is written to disk if no
    /// CA exists. Does not modify the stored state.
    pub async fn sign_cert(&self, request: SignRequest) -> CaResult<SignedCert> {
        if request.name.trim().is_empty() {
            return Err(CaError::InvalidInput("host name must not be empty".to_string()));
        }
        if request.ip.trim().is_empty() {
            return Err(CaError::InvalidInput("host ip must not be empty".to_string()));
        }
        let public_key = request.public_key.filter(|key| !key.is_empty());
        let name = request.name;
        let ip = request.ip;

        self.serializer
            .run_exclusive_if(
                || self.store.ca_material().ok_or(CaError::NoCa),
                |ctx, material| async move {
                    ctx.write_file(CA_KEY_FILE, &material.secret.private_key_pem)
                        .await?;
                    ctx.write_file(CA_CRT_FILE, &material.authority.certificate_pem)
                        .await?;
                    if let Some(public_key) = &public_key {
                        ctx.write_file(HOST_PUB_FILE, public_key).await?;
                    }

                    let command = SignerCommand::Sign {
                        name: name.clone(),
                        ip: ip.clone(),
                        with_public_key: public_key.is_some(),
                    };
                    self.signer
                        .invoke(&command.args(), ctx.workspace_path())
                        .await
                        .map_err(CaError::Signing)?;

                    let certificate_pem = read_output(&ctx, HOST_CRT_FILE)
                        .await
                        .map_err(CaError::Signing)?;
                    let private_key = match public_key {
                        Some(_) => None,
                        None => Some(
                            read_output(&ctx, HOST_KEY_FILE)
                                .await
                                .map_err(CaError::Signing)?,
                        ),
                    };

                    info!(
                        name = %name,
                        ip = %ip,
                        ca = %material.authority.name,
                        generated_key = private_key.is_some(),
                        signer = %self.signer.program(),
                        seq = ctx.seq(),
                        "Signed host certificate"
                    );
                    Ok(SignedCert {
                        private_key,
                        certificate_pem,
                    })
                },
            )
            .await
    }
}

async fn read_output(ctx: &TransactionContext, file: &str) -> Result<String, SignerError> {
    ctx.read_file(file)
        .await
        .map_err(|source| SignerError::Output {
            file: file.to_string(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeSigner;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Fixture {
        _temp_dir: TempDir,
        signer: Arc<FakeSigner>,
        authority: Arc<Authority>,
        scratch: std::path::PathBuf,
    }

    fn setup_with(signer: FakeSigner) -> Fixture {
        let temp_dir = TempDir::new().unwrap();
        let scratch = temp_dir.path().join("scratch");
        let signer = Arc::new(signer);
        let store = Arc::new(StateStore::new(temp_dir.path().join("db.json")));
        let authority = Arc::new(Authority::new(
            signer.clone(),
            store,
            WorkspaceManager::new(&scratch),
        ));
        Fixture {
            _temp_dir: temp_dir,
            signer,
            authority,
            scratch,
        }
    }

    fn setup() -> Fixture {
        setup_with(FakeSigner::new())
    }

    fn scratch_entries(fixture: &Fixture) -> usize {
        std::fs::read_dir(&fixture.scratch)
            .map(|entries| entries.count())
            .unwrap_or(0)
    }

    #[tokio::test]
    async fn test_sign_without_ca_fails_before_touching_disk() {
        let fixture = setup();

        let err = fixture
            .authority
            .sign_cert(SignRequest::new("host1", "10.0.0.2/24"))
            .await
            .unwrap_err();

        assert!(matches!(err, CaError::NoCa));
        assert!(!fixture.scratch.exists());
        assert!(fixture.signer.invocations().is_empty());
    }

    #[tokio::test]
    async fn test_create_ca_persists_and_hides_key() {
        let fixture = setup();

        let created = fixture.authority.create_ca("net1").await.unwrap();
        assert!(created.certificate_pem.contains("net1"));
        assert!(serde_json::to_value(&created).unwrap().get("key").is_none());

        let store = fixture.authority.store();
        assert_eq!(store.authority().unwrap().certificate_pem, created.certificate_pem);

        let reloaded = StateStore::open(store.data_path()).await;
        let material = reloaded.ca_material().unwrap();
        assert_eq!(material.authority.name, "net1");
        assert!(material.secret.private_key_pem.contains("CA KEY"));

        assert_eq!(scratch_entries(&fixture), 0);
    }

    #[tokio::test]
    async fn test_sign_generates_key_pair() {
        let fixture = setup();
        fixture.authority.create_ca("net1").await.unwrap();

        let signed = fixture
            .authority
            .sign_cert(SignRequest::new("host1", "10.0.0.2/24"))
            .await
            .unwrap();

        assert!(signed.certificate_pem.contains("host1"));
        assert!(signed.private_key.is_some());
        assert_eq!(scratch_entries(&fixture), 0);

        let last = fixture.signer.invocations().pop().unwrap();
        assert!(last.contains(&"-out-key".to_string()));
    }

    #[tokio::test]
    async fn test_sign_with_public_key_returns_no_key() {
        let fixture = setup();
        fixture.authority.create_ca("net1").await.unwrap();

        let signed = fixture
            .authority
            .sign_cert(SignRequest::new("host1", "10.0.0.2/24").with_public_key("HOST PUB"))
            .await
            .unwrap();

        assert!(signed.private_key.is_none());
        assert!(signed.certificate_pem.contains("HOST PUB"));
        let value = serde_json::to_value(&signed).unwrap();
        assert!(value.get("key").is_none());

        let last = fixture.signer.invocations().pop().unwrap();
        assert!(last.contains(&"-in-pub".to_string()));
    }

    #[tokio::test]
    async fn test_empty_public_key_is_treated_as_absent() {
        let fixture = setup();
        fixture.authority.create_ca("net1").await.unwrap();

        let signed = fixture
            .authority
            .sign_cert(SignRequest::new("host1", "10.0.0.2/24").with_public_key(""))
            .await
            .unwrap();
        assert!(signed.private_key.is_some());
    }

    #[tokio::test]
    async fn test_sign_does_not_touch_stored_state() {
        let fixture = setup();
        fixture.authority.create_ca("net1").await.unwrap();
        let before = std::fs::read_to_string(fixture.authority.store().data_path()).unwrap();

        fixture
            .authority
            .sign_cert(SignRequest::new("host1", "10.0.0.2/24"))
            .await
            .unwrap();

        let after = std::fs::read_to_string(fixture.authority.store().data_path()).unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_create_ca_replaces_previous() {
        let fixture = setup();
        fixture.authority.create_ca("first").await.unwrap();
        fixture.authority.create_ca("second").await.unwrap();

        let material = fixture.authority.store().ca_material().unwrap();
        assert_eq!(material.authority.name, "second");
        assert!(material.secret.private_key_pem.contains("second"));
    }

    #[tokio::test]
    async fn test_failed_ca_generation_keeps_state() {
        let fixture = setup_with(FakeSigner::failing());

        let err = fixture.authority.create_ca("net1").await.unwrap_err();
        assert!(matches!(err, CaError::CaGeneration(_)));
        assert!(fixture.authority.store().authority().is_none());
        assert!(!fixture.authority.store().data_path().exists());
        assert_eq!(scratch_entries(&fixture), 0);
    }

    #[tokio::test]
    async fn test_failed_persist_restores_previous_ca() {
        let temp_dir = TempDir::new().unwrap();
        let blocker = temp_dir.path().join("not-a-dir");
        std::fs::write(&blocker, "file in the way").unwrap();
        let store = Arc::new(StateStore::new(blocker.join("db.json")));
        store.install_ca(
            CertificateAuthority {
                name: "old".to_string(),
                certificate_pem: "OLD CERT".to_string(),
            },
            CaSecret {
                private_key_pem: "OLD KEY".to_string(),
            },
        );
        let authority = Authority::new(
            Arc::new(FakeSigner::new()),
            store.clone(),
            WorkspaceManager::new(temp_dir.path().join("scratch")),
        );

        let err = authority.create_ca("new").await.unwrap_err();
        assert_eq!(err.kind(), "persist");

        let material = store.ca_material().unwrap();
        assert_eq!(material.authority.name, "old");
        assert_eq!(material.secret.private_key_pem, "OLD KEY");
    }

    #[tokio::test]
    async fn test_missing_output_is_a_signing_error() {
        let fixture = setup_with(FakeSigner::new().without_outputs());
        fixture
            .authority
            .store()
            .install_ca(
                CertificateAuthority {
                    name: "net1".to_string(),
                    certificate_pem: "CRT".to_string(),
                },
                CaSecret {
                    private_key_pem: "KEY".to_string(),
                },
            );

        let err = fixture
            .authority
            .sign_cert(SignRequest::new("host1", "10.0.0.2/24"))
            .await
            .unwrap_err();
        assert!(matches!(err, CaError::Signing(SignerError::Output { .. })));
        assert_eq!(scratch_entries(&fixture), 0);
    }

    #[tokio::test]
    async fn test_empty_inputs_rejected() {
        let fixture = setup();
        assert!(matches!(
            fixture.authority.create_ca("  ").await,
            Err(CaError::InvalidInput(_))
        ));
        assert!(matches!(
            fixture.authority.sign_cert(SignRequest::new("", "10.0.0.2/24")).await,
            Err(CaError::InvalidInput(_))
        ));
        assert!(fixture.signer.invocations().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_operations_are_serialized() {
        let fixture = setup_with(FakeSigner::new().with_delay(Duration::from_millis(5)));
        fixture.authority.create_ca("net1").await.unwrap();

        let mut handles = Vec::new();
        for i in 0..12 {
            let authority = fixture.authority.clone();
            handles.push(tokio::spawn(async move {
                if i % 4 == 0 {
                    authority.create_ca(&format!("net{}", i)).await.map(|_| ())
                } else {
                    authority
                        .sign_cert(SignRequest::new(format!("host{}", i), "10.0.0.9/24"))
                        .await
                        .map(|_| ())
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(fixture.signer.max_concurrency(), 1);
        assert_eq!(scratch_entries(&fixture), 0);
    }

    #[test]
    fn test_sign_request_aliases() {
        let request: SignRequest = serde_json::from_value(serde_json::json!({
            "name": "host1",
            "ipRange": "10.0.0.2/24",
            "pub": "PUB"
        }))
        .unwrap();
        assert_eq!(request.ip, "10.0.0.2/24");
        assert_eq!(request.public_key.as_deref(), Some("PUB"));

        let request: SignRequest = serde_json::from_value(serde_json::json!({
            "name": "host1",
            "ip": "10.0.0.2/24"
        }))
        .unwrap();
        assert!(request.public_key.is_none());
    }
}
