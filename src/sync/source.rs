use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;

use super::batch::{SyncRequest, SyncResults};

/// Cap on batch files read from disk (64 MB)
const MAX_BATCH_FILE_SIZE: u64 = 64 * 1024 * 1024;

/// Errors a sync source can report.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Reading the batch failed
    #[error("Failed to read sync batch: {0}")]
    Io(#[from] std::io::Error),
    /// The batch was not valid JSON for `SyncResults`
    #[error("Invalid sync batch: {0}")]
    Decode(#[from] serde_json::Error),
    /// The batch exceeded the size limit
    #[error("Sync batch too large: {0} bytes")]
    TooLarge(u64),
    /// The remote service could not produce a batch
    #[error("Sync source unavailable: {0}")]
    Unavailable(String),
}

/// Producer of remote state for one synchronization round.
///
/// Implementations talk to the remote service (or stand in for it). The
/// request carries the pending local state changes; a source that accepts
/// them must have delivered them by the time `fetch` returns `Ok`.
#[async_trait]
pub trait SyncSource: Send + Sync {
    async fn fetch(&self, request: &SyncRequest) -> Result<SyncResults, FetchError>;
}

/// Reads a `SyncResults` batch from a JSON file.
///
/// Pending state changes cannot be delivered anywhere, so they are only
/// logged and stay cleared after the round like any other acknowledged change.
#[derive(Debug, Clone)]
pub struct JsonFileSource {
    path: PathBuf,
}

impl JsonFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl SyncSource for JsonFileSource {
    async fn fetch(&self, request: &SyncRequest) -> Result<SyncResults, FetchError> {
        let meta = tokio::fs::metadata(&self.path).await?;
        if meta.len() > MAX_BATCH_FILE_SIZE {
            return Err(FetchError::TooLarge(meta.len()));
        }

        if !request.state_changes.is_empty() {
            tracing::info!(
                read = request.read_ids().len(),
                unread = request.unread_ids().len(),
                starred = request.starred_ids().len(),
                unstarred = request.unstarred_ids().len(),
                "File source has no upstream, dropping pending state changes"
            );
        }

        let bytes = tokio::fs::read(&self.path).await?;
        let batch: SyncResults = serde_json::from_slice(&bytes)?;

        tracing::debug!(
            path = %self.path.display(),
            folders = batch.folders.len(),
            feeds = batch.feeds.len(),
            items = batch.items.len(),
            "Read sync batch"
        );

        Ok(batch)
    }
}
