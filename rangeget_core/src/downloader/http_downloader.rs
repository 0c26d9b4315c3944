use std::sync::Arc;

use tokio::sync::mpsc;

use crate::downloader::strategy::download_strategy::DownloadStrategy;
use crate::progress::notifier::ProgressNotifier;
use crate::progress::observer::ProgressObserver;
use crate::types::types::{CoordinatorState, DownloadError, DownloadReport};

pub struct HttpDownloader {
    download_strategy: Arc<dyn DownloadStrategy>,
    notifier: ProgressNotifier,
}

impl HttpDownloader {
    pub fn new(strategy: Arc<dyn DownloadStrategy>) -> Self {
        Self {
            download_strategy: strategy,
            notifier: ProgressNotifier::new(),
        }
    }

    /// Register a progress observer. Must be called before `download()`.
    pub fn add_observer(&mut self, observer: Box<dyn ProgressObserver>) {
        self.notifier.add_observer(observer);
    }

    pub fn state(&self) -> CoordinatorState {
        self.download_strategy.state()
    }

    /// Run the full download lifecycle (probe/plan → download → verify).
    ///
    /// Creates the progress channel, injects the sender into the strategy and
    /// runs the `ProgressNotifier` as a background task. On failure the error
    /// is forwarded to observers before the channel closes.
    pub async fn download(&mut self) -> Result<DownloadReport, DownloadError> {
        let (progress_tx, progress_rx) = mpsc::channel(256);
        self.download_strategy.set_progress_tx(progress_tx.clone());

        // A fresh empty notifier is left in place so the field stays valid.
        let notifier = std::mem::take(&mut self.notifier);
        let notifier_handle = tokio::spawn(async move {
            notifier.run(progress_rx).await;
        });

        let result = async {
            self.download_strategy.preprocess().await?;
            self.download_strategy.download().await?;
            self.download_strategy.postprocess().await
        }
        .await;

        if let Err(e) = &result {
            let _ = progress_tx.send(Err(e.to_string())).await;
        }

        // Every sender has to go before the notifier can observe the close.
        drop(progress_tx);
        self.download_strategy.clear_progress_tx();

        let _ = notifier_handle.await;

        result
    }
}
