//! Transaction serializer.
//!
//! All operations that touch the CA key run through a single gate. The gate
//! is a fair async mutex: callers queue in arrival order and are suspended
//! without blocking runtime threads. Inside the gate each operation gets a
//! fresh workspace which is torn down before the gate is released, so the
//! next operation never starts while the previous one's files still exist.

use std::future::Future;

use tokio::sync::Mutex;
use tracing::{debug, error, warn};

use crate::error::CaResult;
use crate::workspace::{TransactionContext, WorkspaceManager};

/// Admits one certificate operation at a time.
#[derive(Debug)]
pub struct TransactionSerializer {
    gate: Mutex<()>,
    workspaces: WorkspaceManager,
}

impl TransactionSerializer {
    pub fn new(workspaces: WorkspaceManager) -> Self {
        Self {
            gate: Mutex::new(()),
            workspaces,
        }
    }

    /// Run `operation` exclusively inside a fresh workspace.
    pub async fn run_exclusive<T, F, Fut>(&self, operation: F) -> CaResult<T>
    where
        F: FnOnce(TransactionContext) -> Fut,
        Fut: Future<Output = CaResult<T>>,
    {
        self.run_exclusive_if(|| Ok(()), |ctx, ()| operation(ctx))
            .await
    }

    /// Run `operation` exclusively, after `precondition` passes.
    ///
    /// The precondition is evaluated under the gate but before a workspace
    /// is allocated. If it fails nothing is created on disk and the gate is
    /// released. Its output is handed to `operation`.
    pub async fn run_exclusive_if<P, T, G, F, Fut>(
        &self,
        precondition: G,
        operation: F,
    ) -> CaResult<T>
    where
        G: FnOnce() -> CaResult<P>,
        F: FnOnce(TransactionContext, P) -> Fut,
        Fut: Future<Output = CaResult<T>>,
    {
        let _gate = self.gate.lock().await;

        let input = precondition()?;
        let workspace = self.workspaces.allocate().await?;
        let seq = workspace.seq();

        debug!(seq, workspace = %workspace.path().display(), "Transaction started");
        let outcome = operation(workspace.context(), input).await;
        let teardown = workspace.teardown().await;

        match (outcome, teardown) {
            (Ok(value), Ok(())) => {
                debug!(seq, "Transaction committed");
                Ok(value)
            }
            (Ok(_), Err(teardown_err)) => {
                error!(
                    seq,
                    error = %teardown_err,
                    "Workspace teardown failed after successful transaction"
                );
                Err(teardown_err)
            }
            (Err(err), Ok(())) => {
                warn!(seq, error = %err, "Transaction failed");
                Err(err)
            }
            (Err(err), Err(teardown_err)) => {
                error!(
                    seq,
                    error = %err,
                    teardown_error = %teardown_err,
                    "Transaction failed and workspace teardown failed"
                );
                Err(err)
            }
        }
    }
}
