//! Per-operation scratch directories.
//!
//! Every certificate operation stages its inputs and outputs in a directory
//! of its own. Directories are named from a process-wide sequence so two
//! operations in the same process can never share one, and they are removed
//! on every exit path: explicitly via [`Workspace::teardown`], or by the drop
//! guard when the owning future is cancelled or unwinds.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, trace, warn};

use crate::error::{CaError, CaResult};

/// Sequence shared by every [`WorkspaceManager`] in the process.
static WORKSPACE_SEQ: AtomicU64 = AtomicU64::new(0);

/// Default directory name prefix.
const DEFAULT_PREFIX: &str = "nebula";

/// Allocates uniquely named scratch directories under a root directory.
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    root: PathBuf,
    prefix: String,
}

impl WorkspaceManager {
    /// Create a manager placing workspaces under `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            prefix: DEFAULT_PREFIX.to_string(),
        }
    }

    /// Create a manager placing workspaces in the OS temp directory.
    pub fn in_temp_dir() -> Self {
        Self::new(std::env::temp_dir())
    }

    /// Override the directory name prefix.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Allocate a fresh workspace.
    ///
    /// The leaf directory is created with `create_dir`, not `create_dir_all`,
    /// so allocation fails rather than reusing a directory that already
    /// exists.
    pub async fn allocate(&self) -> CaResult<Workspace> {
        let seq = WORKSPACE_SEQ.fetch_add(1, Ordering::Relaxed) + 1;
        let path = self
            .root
            .join(format!("{}_{}_{}", self.prefix, std::process::id(), seq));

        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| CaError::workspace(&self.root, e))?;
        tokio::fs::create_dir(&path)
            .await
            .map_err(|e| CaError::workspace(&path, e))?;

        debug!(seq, workspace = %path.display(), "Allocated workspace");

        Ok(Workspace {
            path,
            seq,
            released: false,
        })
    }
}

/// An allocated scratch directory.
#[derive(Debug)]
pub struct Workspace {
    path: PathBuf,
    seq: u64,
    released: bool,
}

impl Workspace {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sequence number this workspace was allocated with.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Handle passed to the operation running inside this workspace.
    pub fn context(&self) -> TransactionContext {
        TransactionContext {
            workspace_path: self.path.clone(),
            seq: self.seq,
        }
    }

    /// Recursively remove the directory.
    pub async fn teardown(mut self) -> CaResult<()> {
        self.released = true;
        tokio::fs::remove_dir_all(&self.path)
            .await
            .map_err(|e| CaError::workspace(&self.path, e))?;
        trace!(seq = self.seq, workspace = %self.path.display(), "Removed workspace");
        Ok(())
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        // Reached only when the owning future was dropped or panicked.
        // Blocking removal is deliberate: Drop cannot await.
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => debug!(
                seq = self.seq,
                workspace = %self.path.display(),
                "Removed abandoned workspace"
            ),
            Err(e) => warn!(
                seq = self.seq,
                workspace = %self.path.display(),
                error = %e,
                "Failed to remove abandoned workspace"
            ),
        }
    }
}

/// What an operation sees of its workspace.
#[derive(Debug, Clone)]
pub struct TransactionContext {
    workspace_path: PathBuf,
    seq: u64,
}

impl TransactionContext {
    pub fn workspace_path(&self) -> &Path {
        &self.workspace_path
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Path of `name` inside the workspace.
    pub fn file(&self, name: &str) -> PathBuf {
        self.workspace_path.join(name)
    }

    /// Stage an input file for the external tool.
    pub async fn write_file(&self, name: &str, contents: &str) -> CaResult<()> {
        let path = self.file(name);
        tokio::fs::write(&path, contents)
            .await
            .map_err(|e| CaError::workspace(path, e))
    }

    /// Read back a file produced by the external tool.
    pub async fn read_file(&self, name: &str) -> std::io::Result<String> {
        tokio::fs::read_to_string(self.file(name)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_allocate_creates_unique_directories() {
        let temp_dir = TempDir::new().unwrap();
        let manager = WorkspaceManager::new(temp_dir.path());

        let first = manager.allocate().await.unwrap();
        let second = manager.allocate().await.unwrap();

        assert!(first.path().is_dir());
        assert!(second.path().is_dir());
        assert_ne!(first.path(), second.path());
        assert!(second.seq() > first.seq());

        first.teardown().await.unwrap();
        second.teardown().await.unwrap();
    }

    #[tokio::test]
    async fn test_allocate_creates_missing_root() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("nested").join("scratch");
        let manager = WorkspaceManager::new(&root).with_prefix("test");

        let workspace = manager.allocate().await.unwrap();
        assert!(workspace.path().starts_with(&root));
        let name = workspace.path().file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("test_"));

        workspace.teardown().await.unwrap();
    }

    #[tokio::test]
    async fn test_teardown_removes_contents() {
        let temp_dir = TempDir::new().unwrap();
        let manager = WorkspaceManager::new(temp_dir.path());

        let workspace = manager.allocate().await.unwrap();
        let ctx = workspace.context();
        ctx.write_file("ca.key", "secret").await.unwrap();
        assert_eq!(ctx.read_file("ca.key").await.unwrap(), "secret");

        let path = workspace.path().to_path_buf();
        workspace.teardown().await.unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_drop_removes_unreleased_workspace() {
        let temp_dir = TempDir::new().unwrap();
        let manager = WorkspaceManager::new(temp_dir.path());

        let workspace = manager.allocate().await.unwrap();
        let path = workspace.path().to_path_buf();
        drop(workspace);

        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_allocate_fails_when_root_is_a_file() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("not-a-dir");
        std::fs::write(&root, "x").unwrap();

        let manager = WorkspaceManager::new(&root);
        let err = manager.allocate().await.unwrap_err();
        assert_eq!(err.kind(), "workspace");
    }
}
