//! Shared state for API handlers.

use crate::archive::{ArchiveStore, Archiver};

use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub struct ApiState {
    pub archiver: Arc<Archiver>,
    /// Directory receiving export files.
    pub export_dir: PathBuf,
    /// Service shutdown; also cancels runs started through the API.
    pub shutdown: CancellationToken,
    pub started_at: std::time::Instant,
}

impl ApiState {
    pub fn new(archiver: Arc<Archiver>, export_dir: PathBuf, shutdown: CancellationToken) -> Self {
        Self {
            archiver,
            export_dir,
            shutdown,
            started_at: std::time::Instant::now(),
        }
    }

    pub fn store(&self) -> &ArchiveStore {
        self.archiver.store()
    }
}
