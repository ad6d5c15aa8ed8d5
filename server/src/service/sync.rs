//! Repository synchronization seam

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::domain::file_tree::FileTree;
use crate::domain::package::PackageManagerKind;
use crate::error::Result;

/// Download progress, in files
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncProgress {
    pub fetched: usize,
    pub total: usize,
}

/// What to synchronize
#[derive(Debug, Clone)]
pub struct SyncRequest {
    pub owner: String,
    pub repo: String,
    pub branch: String,
    pub progress: Option<mpsc::UnboundedSender<SyncProgress>>,
}

impl SyncRequest {
    pub fn report(&self, fetched: usize, total: usize) {
        if let Some(tx) = &self.progress {
            let _ = tx.send(SyncProgress { fetched, total });
        }
    }
}

/// A synchronized repository snapshot
#[derive(Debug, Clone)]
pub struct SyncedRepository {
    pub files: FileTree,
    pub package_manager: PackageManagerKind,
    pub has_manifest: bool,
}

/// Fetches a repository into an in-memory tree
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RepositorySynchronizer: Send + Sync {
    async fn sync(&self, request: SyncRequest) -> Result<SyncedRepository>;
}
