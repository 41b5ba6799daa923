//! Worktree provisioning seam.
//!
//! Creating git worktrees (cloning, branching, copying dotfiles, running
//! init scripts) belongs to an external collaborator. The hub only needs a
//! directory to spawn in and a way to give it back, which is this trait.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

/// Marker file whose presence makes the hub start a dev server PTY.
pub const SERVER_SCRIPT: &str = ".botster_server";

/// Script sourced in the CLI PTY right after spawn, when present.
pub const INIT_SCRIPT: &str = ".botster_init";

/// Supplies and reclaims agent working directories.
pub trait WorktreeProvisioner: Send + Sync + std::fmt::Debug {
    /// Return a ready-to-use directory for `repo` on `branch`.
    ///
    /// # Errors
    ///
    /// Fails if the directory cannot be prepared.
    fn provision(&self, repo: &str, branch: &str) -> Result<PathBuf>;

    /// Reclaim a directory returned by [`provision()`](Self::provision).
    ///
    /// # Errors
    ///
    /// Fails if the directory cannot be removed.
    fn teardown(&self, worktree_path: &Path, branch: &str) -> Result<()>;
}

/// Plain directories under a base path, one per repo and branch.
///
/// Used when the real worktree tooling has already run (or is not needed).
#[derive(Debug, Clone)]
pub struct DirectoryProvisioner {
    base_dir: PathBuf,
}

impl DirectoryProvisioner {
    /// Provisioner rooted at `base_dir`.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Directory used for `repo` on `branch`.
    #[must_use]
    pub fn worktree_path(&self, repo: &str, branch: &str) -> PathBuf {
        self.base_dir.join(format!(
            "{}-{}",
            repo.replace('/', "-"),
            branch.replace('/', "-")
        ))
    }
}

impl WorktreeProvisioner for DirectoryProvisioner {
    fn provision(&self, repo: &str, branch: &str) -> Result<PathBuf> {
        let path = self.worktree_path(repo, branch);
        fs::create_dir_all(&path)
            .with_context(|| format!("Failed to create worktree {}", path.display()))?;
        Ok(path)
    }

    fn teardown(&self, worktree_path: &Path, _branch: &str) -> Result<()> {
        // Never delete outside the base directory
        if !worktree_path.starts_with(&self.base_dir) || worktree_path == self.base_dir {
            bail!(
                "Refusing to delete {} outside {}",
                worktree_path.display(),
                self.base_dir.display()
            );
        }
        if worktree_path.exists() {
            fs::remove_dir_all(worktree_path)
                .with_context(|| format!("Failed to delete {}", worktree_path.display()))?;
        }
        Ok(())
    }
}
