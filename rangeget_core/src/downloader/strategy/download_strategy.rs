use tokio::sync::mpsc;

use crate::types::types::{CoordinatorState, DownloadError, DownloadReport, ProgressEvent};
use async_trait::async_trait;

#[async_trait]
pub trait DownloadStrategy: Send + Sync {
    /// Inject the progress sender before calling `download()`.
    /// The `HttpDownloader` calls this internally; callers never touch the channel.
    fn set_progress_tx(&self, tx: mpsc::Sender<Result<ProgressEvent, String>>);

    /// Drop the progress sender so the notifier channel closes after download.
    fn clear_progress_tx(&self);

    fn state(&self) -> CoordinatorState;

    /// Probe the server and plan the chunk layout.
    async fn preprocess(&self) -> Result<(), DownloadError>;
    /// Fetch and write every chunk, returning once all workers have joined.
    async fn download(&self) -> Result<(), DownloadError>;
    /// Verify the finished file and summarise the run.
    async fn postprocess(&self) -> Result<DownloadReport, DownloadError>;
}
