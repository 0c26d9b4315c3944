use async_trait::async_trait;

use super::snapshot::ProgressSnapshot;
use crate::types::types::ChunkOutcome;

/// Trait for anything that wants to observe download progress.
///
/// Lifecycle:
/// - `on_progress` is called after every byte-level progress event.
/// - `on_chunk_complete` is called once per chunk that finished successfully.
/// - `on_complete` is called once when the download finishes successfully
///   (the progress channel closed without an error message).
/// - `on_error` is called once when the download fails.
#[async_trait]
pub trait ProgressObserver: Send + Sync + 'static {
    async fn on_progress(&self, snapshot: &ProgressSnapshot);

    async fn on_chunk_complete(&self, outcome: &ChunkOutcome, snapshot: &ProgressSnapshot);

    async fn on_complete(&self, snapshot: &ProgressSnapshot);

    async fn on_error(&self, error: &str);
}
