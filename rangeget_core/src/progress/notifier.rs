use std::collections::BTreeMap;
use std::time::Instant;

use tokio::sync::mpsc;

use super::observer::ProgressObserver;
use super::snapshot::{ChunkSnapshot, ProgressSnapshot};
use crate::types::types::ProgressEvent;

/// EMA smoothing factor. 0.3 = responsive but stable.
const EMA_ALPHA: f64 = 0.3;

/// Internal per-chunk tracking (purely data, no UI).
struct ChunkProgress {
    bytes_downloaded: u64,
    total_bytes: u64,
    speed: f64,
    finished: bool,
    last_update: Instant,
}

impl ChunkProgress {
    fn new(now: Instant) -> Self {
        Self {
            bytes_downloaded: 0,
            total_bytes: 0,
            speed: 0.0,
            finished: false,
            last_update: now,
        }
    }
}

/// Consumes `Result<ProgressEvent, String>` from the download channel,
/// aggregates progress into `ProgressSnapshot`s, and fans out to all
/// registered observers.
///
/// # Lifecycle
///
/// | Channel message                 | Observer method called           |
/// |---------------------------------|----------------------------------|
/// | `Ok(Started)` / `Ok(Bytes)`     | `on_progress(&snapshot)`         |
/// | `Ok(Finished(outcome))`         | `on_chunk_complete(..)`          |
/// | `Err(String)`                   | `on_error(&msg)` then stops      |
/// | Channel closed (no err)         | `on_complete(&final_snapshot)`   |
pub struct ProgressNotifier {
    observers: Vec<Box<dyn ProgressObserver>>,
    chunks: BTreeMap<usize, ChunkProgress>,
    start_time: Instant,
}

impl Default for ProgressNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressNotifier {
    pub fn new() -> Self {
        Self {
            observers: Vec::new(),
            chunks: BTreeMap::new(),
            start_time: Instant::now(),
        }
    }

    /// Register an observer. Must be called before `run()`.
    pub fn add_observer(&mut self, observer: Box<dyn ProgressObserver>) {
        self.observers.push(observer);
    }

    /// Consume progress messages until the channel closes or an error arrives.
    pub async fn run(mut self, mut progress_rx: mpsc::Receiver<Result<ProgressEvent, String>>) {
        while let Some(msg) = progress_rx.recv().await {
            match msg {
                Ok(ProgressEvent::Finished(outcome)) => {
                    self.handle_event(&ProgressEvent::Finished(outcome.clone()));
                    let snapshot = self.build_snapshot();
                    for observer in &self.observers {
                        observer.on_chunk_complete(&outcome, &snapshot).await;
                    }
                }
                Ok(ev) => {
                    self.handle_event(&ev);
                    let snapshot = self.build_snapshot();
                    for observer in &self.observers {
                        observer.on_progress(&snapshot).await;
                    }
                }
                Err(error) => {
                    for observer in &self.observers {
                        observer.on_error(&error).await;
                    }
                    return;
                }
            }
        }
        // Channel closed cleanly: all senders dropped, no error received
        self.finish().await;
    }

    fn handle_event(&mut self, ev: &ProgressEvent) {
        let now = Instant::now();
        match ev {
            ProgressEvent::Started {
                chunk_index,
                total_bytes,
            } => {
                let chunk = self
                    .chunks
                    .entry(*chunk_index)
                    .or_insert_with(|| ChunkProgress::new(now));
                chunk.total_bytes = *total_bytes;
            }
            ProgressEvent::Bytes {
                chunk_index,
                bytes_delta,
            } => {
                let chunk = self
                    .chunks
                    .entry(*chunk_index)
                    .or_insert_with(|| ChunkProgress::new(now));
                chunk.bytes_downloaded += bytes_delta;

                let elapsed = now.duration_since(chunk.last_update).as_secs_f64();
                if elapsed > 0.0 {
                    let instant_speed = *bytes_delta as f64 / elapsed;
                    chunk.speed = EMA_ALPHA * instant_speed + (1.0 - EMA_ALPHA) * chunk.speed;
                    chunk.last_update = now;
                }
            }
            ProgressEvent::Finished(outcome) => {
                let chunk = self
                    .chunks
                    .entry(outcome.index)
                    .or_insert_with(|| ChunkProgress::new(now));
                chunk.finished = outcome.success;
                chunk.bytes_downloaded = outcome.bytes_written;
                if chunk.total_bytes == 0 {
                    chunk.total_bytes = outcome.bytes_written;
                }
                chunk.speed = 0.0;
            }
        }
    }

    fn build_snapshot(&self) -> ProgressSnapshot {
        let total_bytes: u64 = self.chunks.values().map(|c| c.total_bytes).sum();
        let total_downloaded: u64 = self.chunks.values().map(|c| c.bytes_downloaded).sum();
        let combined_speed: f64 = self.chunks.values().map(|c| c.speed).sum();
        let remaining = total_bytes.saturating_sub(total_downloaded);
        let eta = if combined_speed > 0.0 {
            remaining as f64 / combined_speed
        } else {
            0.0
        };

        let chunks: Vec<ChunkSnapshot> = self
            .chunks
            .iter()
            .map(|(index, c)| {
                let rem = c.total_bytes.saturating_sub(c.bytes_downloaded);
                ChunkSnapshot {
                    chunk_index: *index,
                    bytes_downloaded: c.bytes_downloaded,
                    total_bytes: c.total_bytes,
                    speed: c.speed,
                    eta_secs: if c.speed > 0.0 { rem as f64 / c.speed } else { 0.0 },
                    finished: c.finished,
                }
            })
            .collect();

        ProgressSnapshot {
            chunks_finished: chunks.iter().filter(|c| c.finished).count(),
            chunks,
            total_bytes_downloaded: total_downloaded,
            total_bytes,
            speed: combined_speed,
            eta_secs: eta,
            done: false,
        }
    }

    /// Final snapshot with `done = true` and the average speed.
    async fn finish(self) {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        let mut final_snapshot = self.build_snapshot();
        final_snapshot.done = true;
        final_snapshot.speed = if elapsed > 0.0 {
            final_snapshot.total_bytes_downloaded as f64 / elapsed
        } else {
            0.0
        };
        final_snapshot.eta_secs = 0.0;

        for observer in &self.observers {
            observer.on_complete(&final_snapshot).await;
        }
    }
}
