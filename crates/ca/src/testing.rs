//! In-process stand-in for `nebula-cert`.
//!
//! Writes recognisable placeholder files instead of real keys so engine and
//! front-door tests run without the binary installed.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::SignerError;
use crate::signer::{Signer, CA_CRT_FILE, CA_KEY_FILE, HOST_CRT_FILE, HOST_KEY_FILE, HOST_PUB_FILE};

/// A [`Signer`] that fakes `ca` and `sign`.
#[derive(Debug, Default)]
pub struct FakeSigner {
    invocations: Mutex<Vec<Vec<String>>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    delay: Option<Duration>,
    fail: bool,
    skip_outputs: bool,
}

impl FakeSigner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every invocation fails as if the binary could not be started.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Succeed without producing any output files.
    pub fn without_outputs(mut self) -> Self {
        self.skip_outputs = true;
        self
    }

    /// Sleep inside every invocation.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Argument lists seen so far, oldest first.
    pub fn invocations(&self) -> Vec<Vec<String>> {
        self.invocations.lock().clone()
    }

    /// Highest number of simultaneous invocations observed.
    pub fn max_concurrency(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn run(&self, args: &[String], cwd: &Path) -> Result<(), SignerError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(spawn_error("simulated failure"));
        }
        if self.skip_outputs {
            return Ok(());
        }

        let name = flag(args, "-name").unwrap_or_default();
        match args.first().map(String::as_str) {
            Some("ca") => {
                write(cwd, CA_KEY_FILE, &format!("FAKE CA KEY {}\n", name)).await?;
                write(cwd, CA_CRT_FILE, &format!("FAKE CA CERT {}\n", name)).await?;
            }
            Some("sign") => {
                for staged in [CA_KEY_FILE, CA_CRT_FILE] {
                    if !cwd.join(staged).exists() {
                        return Err(spawn_error(&format!("{} not staged", staged)));
                    }
                }
                let ip = flag(args, "-ip").unwrap_or_default();
                let mut crt = format!("FAKE HOST CERT {} {}", name, ip);
                if flag(args, "-in-pub").is_some() {
                    let public = tokio::fs::read_to_string(cwd.join(HOST_PUB_FILE))
                        .await
                        .map_err(|e| spawn_error(&e.to_string()))?;
                    crt.push_str(&format!(" PUB {}", public));
                } else {
                    write(cwd, HOST_KEY_FILE, &format!("FAKE HOST KEY {}\n", name)).await?;
                }
                write(cwd, HOST_CRT_FILE, &format!("{}\n", crt)).await?;
            }
            other => return Err(spawn_error(&format!("unknown command {:?}", other))),
        }
        Ok(())
    }
}

#[async_trait]
impl Signer for FakeSigner {
    fn program(&self) -> &str {
        "fake-nebula-cert"
    }

    async fn invoke(&self, args: &[String], cwd: &Path) -> Result<(), SignerError> {
        self.invocations.lock().push(args.to_vec());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let result = self.run(args, cwd).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

fn flag(args: &[String], name: &str) -> Option<String> {
    args.iter()
        .position(|a| a == name)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

async fn write(cwd: &Path, file: &str, contents: &str) -> Result<(), SignerError> {
    tokio::fs::write(cwd.join(file), contents)
        .await
        .map_err(|e| spawn_error(&e.to_string()))
}

fn spawn_error(message: &str) -> SignerError {
    SignerError::Spawn {
        program: "fake-nebula-cert".to_string(),
        source: std::io::Error::new(std::io::ErrorKind::Other, message.to_string()),
    }
}
