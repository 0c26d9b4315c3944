use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock as StdRwLock};
use std::time::Instant;

use async_trait::async_trait;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use reqwest::Client;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::downloader::chunk_planner::plan_chunks;
use crate::downloader::chunk_writer::{write_chunk, OutputFile, RegionWriter};
use crate::downloader::range_grabber::{fetch_chunk, precompute_auth, probe_url};
use crate::downloader::strategy::download_strategy::DownloadStrategy;
use crate::downloader::verifier::file_digest;
use crate::types::types::{
    AuthenticationInfo, ChunkOutcome, ChunkRange, CoordinatorState, DownloadConfig,
    DownloadError, DownloadReport, DownloadTarget, HeaderData, ProgressEvent,
};

type ProgressSender = mpsc::Sender<Result<ProgressEvent, String>>;

/// Splits one resource into byte ranges and downloads them concurrently into a
/// single output file.
///
/// `preprocess` probes and plans, `download` runs one task per chunk behind a
/// join barrier, and `postprocess` hashes the result. Any chunk failure cancels
/// the remaining workers, deletes the partial file and leaves the strategy in
/// `CoordinatorState::Failed`.
pub struct RangedDownloadStrategy {
    id: Uuid,
    config: DownloadConfig,
    client: Arc<Client>,
    state: StdRwLock<CoordinatorState>,
    target: RwLock<Option<DownloadTarget>>,
    chunks: RwLock<Vec<ChunkRange>>,
    outcomes: RwLock<Vec<ChunkOutcome>>,
    completed: Arc<AtomicUsize>,
    bytes_written: Arc<AtomicU64>,
    started_at: Mutex<Option<Instant>>,
    cancel_token: CancellationToken,
    progress_tx: Mutex<Option<ProgressSender>>,
}

pub struct RangedDownloadStrategyBuilder {
    config: DownloadConfig,
}

impl RangedDownloadStrategy {
    pub fn new(config: DownloadConfig) -> Result<Self, DownloadError> {
        if config.chunk_count == 0 {
            return Err(DownloadError::InvalidChunkCount(config.chunk_count));
        }

        // Transport compression stays off: requests always send
        // `Accept-Encoding: identity`.
        let client = Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .pool_max_idle_per_host(config.chunk_count)
            .tcp_nodelay(true)
            .build()?;

        Ok(Self {
            id: Uuid::new_v4(),
            config,
            client: Arc::new(client),
            state: StdRwLock::new(CoordinatorState::Idle),
            target: RwLock::new(None),
            chunks: RwLock::new(Vec::new()),
            outcomes: RwLock::new(Vec::new()),
            completed: Arc::new(AtomicUsize::new(0)),
            bytes_written: Arc::new(AtomicU64::new(0)),
            started_at: Mutex::new(None),
            cancel_token: CancellationToken::new(),
            progress_tx: Mutex::new(None),
        })
    }

    pub fn builder(url: impl Into<String>, path: impl Into<PathBuf>) -> RangedDownloadStrategyBuilder {
        RangedDownloadStrategyBuilder::new(url, path)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &DownloadConfig {
        &self.config
    }

    /// The probed target, once `preprocess` has run.
    pub async fn target(&self) -> Option<DownloadTarget> {
        self.target.read().await.clone()
    }

    pub async fn chunks(&self) -> Vec<ChunkRange> {
        self.chunks.read().await.clone()
    }

    /// Outcomes collected at the join barrier, ordered by chunk index.
    pub async fn outcomes(&self) -> Vec<ChunkOutcome> {
        self.outcomes.read().await.clone()
    }

    /// Number of chunks that finished successfully so far.
    pub fn completed_chunks(&self) -> usize {
        self.completed.load(Ordering::Acquire)
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Acquire)
    }

    fn transition(&self, next: CoordinatorState) -> Result<(), DownloadError> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if !state.can_transition_to(next) {
            return Err(DownloadError::InvalidState {
                from: *state,
                to: next,
            });
        }
        log::debug!("[{}] state {} -> {}", self.id, *state, next);
        *state = next;
        Ok(())
    }

    fn mark_failed(&self) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if !state.is_terminal() {
            log::debug!("[{}] state {} -> Failed", self.id, *state);
            *state = CoordinatorState::Failed;
        }
    }

    fn current_progress_tx(&self) -> Option<ProgressSender> {
        self.progress_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn header_data_for(&self, url: &str) -> HeaderData {
        let mut header_data = self.config.header_data();
        header_data.url = url.to_string();
        header_data
    }

    async fn probe_and_plan(&self) -> Result<(), DownloadError> {
        let header_data = self.config.header_data();
        let probe = probe_url(&self.client, &header_data, self.config.chunk_count).await?;

        self.transition(CoordinatorState::Planning)?;

        let target = DownloadTarget {
            url: probe.final_url,
            size: probe.size,
            chunk_count: self.config.chunk_count,
        };
        let planned = plan_chunks(target.size, target.chunk_count)?;

        log::info!(
            "[preprocess] {}: size={} bytes, requested_chunks={}, planned_chunks={}, chunk_size={}",
            target.url,
            target.size,
            target.chunk_count,
            planned.len(),
            probe.chunk_size
        );

        *self.target.write().await = Some(target);
        *self.chunks.write().await = planned;
        Ok(())
    }

    async fn download_chunks(&self) -> Result<(), DownloadError> {
        let target = self
            .target
            .read()
            .await
            .clone()
            .ok_or(DownloadError::InvalidState {
                from: CoordinatorState::Idle,
                to: CoordinatorState::Downloading,
            })?;
        let chunks = self.chunks.read().await.clone();

        *self.started_at.lock().unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());

        // Created (and truncated) before any chunk is requested.
        let output = OutputFile::create(&self.config.output_path).await?;

        let header_data = Arc::new(self.header_data_for(&target.url));
        let auth_header: Option<Arc<str>> = precompute_auth(&header_data).map(Arc::from);
        let progress_tx = self.current_progress_tx();
        let total_chunks = chunks.len();

        let mut handles = FuturesUnordered::new();

        for region in output.regions(&chunks) {
            let index = region.chunk().index;
            let chunk_written = Arc::new(AtomicU64::new(0));
            let worker = ChunkWorker {
                client: Arc::clone(&self.client),
                header_data: Arc::clone(&header_data),
                auth_header: auth_header.clone(),
                block_size: self.config.block_size,
                cancel_token: self.cancel_token.clone(),
                progress_tx: progress_tx.clone(),
                bytes_written: Arc::clone(&self.bytes_written),
                chunk_written: Arc::clone(&chunk_written),
            };
            let completed = Arc::clone(&self.completed);
            let cancel_token = self.cancel_token.clone();
            let finished_tx = progress_tx.clone();

            let handle = tokio::spawn(async move {
                let result = worker.run(region).await;
                match &result {
                    Ok(outcome) => {
                        let done = completed.fetch_add(1, Ordering::AcqRel) + 1;
                        log::info!(
                            "[download] chunk={} finished: {} bytes ({}/{})",
                            outcome.index,
                            outcome.bytes_written,
                            done,
                            total_chunks
                        );
                        if let Some(tx) = &finished_tx {
                            let _ = tx.send(Ok(ProgressEvent::Finished(outcome.clone()))).await;
                        }
                    }
                    Err(DownloadError::Cancelled) => {
                        log::debug!("[download] chunk={} stopped after cancellation", index);
                    }
                    Err(e) => {
                        log::error!("[download] chunk={} failed: {}", index, e);
                        // Abort everyone else at their next check.
                        cancel_token.cancel();
                    }
                }
                result
            });

            handles.push(async move {
                let joined = handle.await;
                (index, chunk_written.load(Ordering::Acquire), joined)
            });
        }

        // Join barrier: every task is awaited, failures are kept in the
        // order they are observed.
        let mut outcomes = Vec::with_capacity(total_chunks);
        let mut first_error: Option<DownloadError> = None;

        while let Some((index, written, joined)) = handles.next().await {
            let error = match joined {
                Ok(Ok(outcome)) => {
                    outcomes.push(outcome);
                    continue;
                }
                Ok(Err(e)) => e,
                Err(join_err) => DownloadError::ChunkFailed(join_err.to_string()),
            };
            outcomes.push(ChunkOutcome::failed(index, written, &error));
            self.cancel_token.cancel();
            keep_first_error(&mut first_error, error);
        }

        outcomes.sort_by_key(|o| o.index);
        *self.outcomes.write().await = outcomes;

        if let Some(e) = first_error {
            drop(output);
            return Err(e);
        }

        output.sync().await?;
        Ok(())
    }
}

/// Prefers a real failure over the `Cancelled` errors it causes in the other
/// workers.
fn keep_first_error(slot: &mut Option<DownloadError>, error: DownloadError) {
    match slot {
        None => *slot = Some(error),
        Some(DownloadError::Cancelled) if !matches!(error, DownloadError::Cancelled) => {
            *slot = Some(error)
        }
        _ => {}
    }
}

async fn discard_partial_output(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => log::warn!("[download] removed partial output {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => log::warn!(
            "[download] could not remove partial output {}: {}",
            path.display(),
            e
        ),
    }
}

/// Everything one chunk task needs; moved into the spawned task.
struct ChunkWorker {
    client: Arc<Client>,
    header_data: Arc<HeaderData>,
    auth_header: Option<Arc<str>>,
    block_size: usize,
    cancel_token: CancellationToken,
    progress_tx: Option<ProgressSender>,
    bytes_written: Arc<AtomicU64>,
    chunk_written: Arc<AtomicU64>,
}

impl ChunkWorker {
    /// Fetch then write. The cancellation token is checked around the
    /// request and between blocks.
    async fn run(self, region: RegionWriter) -> Result<ChunkOutcome, DownloadError> {
        let chunk = region.chunk();
        if self.cancel_token.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }

        let body = tokio::select! {
            biased;
            _ = self.cancel_token.cancelled() => return Err(DownloadError::Cancelled),
            body = fetch_chunk(&self.client, &self.header_data, self.auth_header.as_deref(), chunk) => body?,
        };

        if let Some(tx) = &self.progress_tx {
            let _ = tx.try_send(Ok(ProgressEvent::Started {
                chunk_index: chunk.index,
                total_bytes: body.declared_len,
            }));
        }

        let progress_tx = self.progress_tx.as_ref();
        let bytes_written = &self.bytes_written;
        let chunk_written = &self.chunk_written;
        write_chunk(body, region, self.block_size, &self.cancel_token, |n| {
            bytes_written.fetch_add(n, Ordering::AcqRel);
            chunk_written.fetch_add(n, Ordering::AcqRel);
            if let Some(tx) = progress_tx {
                let _ = tx.try_send(Ok(ProgressEvent::Bytes {
                    chunk_index: chunk.index,
                    bytes_delta: n,
                }));
            }
        })
        .await
    }
}

#[async_trait]
impl DownloadStrategy for RangedDownloadStrategy {
    fn set_progress_tx(&self, tx: ProgressSender) {
        *self.progress_tx.lock().unwrap_or_else(PoisonError::into_inner) = Some(tx);
    }

    fn clear_progress_tx(&self) {
        self.progress_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    fn state(&self) -> CoordinatorState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Probing → Planning. Fails before any chunk request when the server
    /// does not advertise ranges or a length.
    async fn preprocess(&self) -> Result<(), DownloadError> {
        self.transition(CoordinatorState::Probing)?;
        let result = self.probe_and_plan().await;
        if result.is_err() {
            self.mark_failed();
        }
        result
    }

    /// Planning → Downloading → Verifying, only if every chunk succeeded.
    async fn download(&self) -> Result<(), DownloadError> {
        self.transition(CoordinatorState::Downloading)?;
        match self.download_chunks().await {
            Ok(()) => self.transition(CoordinatorState::Verifying),
            Err(e) => {
                self.mark_failed();
                discard_partial_output(&self.config.output_path).await;
                Err(e)
            }
        }
    }

    /// Verifying → Done.
    async fn postprocess(&self) -> Result<DownloadReport, DownloadError> {
        let current = self.state();
        if current != CoordinatorState::Verifying {
            return Err(DownloadError::InvalidState {
                from: current,
                to: CoordinatorState::Done,
            });
        }

        let sha256 = match file_digest(&self.config.output_path).await {
            Ok(digest) => digest,
            Err(e) => {
                self.mark_failed();
                return Err(e);
            }
        };
        self.transition(CoordinatorState::Done)?;

        let target = self.target.read().await.clone().unwrap_or(DownloadTarget {
            url: self.config.url.clone(),
            size: 0,
            chunk_count: self.config.chunk_count,
        });
        let elapsed_secs = self
            .started_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0);

        log::info!(
            "[postprocess] {}: {} bytes in {:.2}s, sha256={}",
            self.config.output_path.display(),
            target.size,
            elapsed_secs,
            sha256
        );

        Ok(DownloadReport {
            id: self.id,
            url: target.url,
            output_path: self.config.output_path.clone(),
            size: target.size,
            chunk_count: self.chunks.read().await.len(),
            outcomes: self.outcomes.read().await.clone(),
            sha256,
            elapsed_secs,
        })
    }
}

impl RangedDownloadStrategyBuilder {
    pub fn new(url: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            config: DownloadConfig::new(url, path),
        }
    }

    pub fn with_chunk_count(mut self, chunk_count: usize) -> Self {
        self.config.chunk_count = chunk_count;
        self
    }

    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.config.block_size = block_size;
        self
    }

    pub fn with_headers(mut self, headers: HashMap<String, Vec<String>>) -> Self {
        self.config.headers = headers;
        self
    }

    pub fn add_header<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.config
            .headers
            .entry(key.into())
            .or_default()
            .push(value.into());
        self
    }

    pub fn with_authentication(mut self, auth: AuthenticationInfo) -> Self {
        self.config.authentication = Some(auth);
        self
    }

    pub fn build(self) -> Result<RangedDownloadStrategy, DownloadError> {
        RangedDownloadStrategy::new(self.config)
    }
}
