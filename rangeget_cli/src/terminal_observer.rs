use async_trait::async_trait;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use rangeget_core::progress::{format_bytes, ProgressObserver, ProgressSnapshot};
use rangeget_core::types::types::ChunkOutcome;

/// Renders download progress as indicatif terminal bars.
///
/// One `ProgressBar` is created per chunk, plus a total bar.
/// All bars live under a shared `MultiProgress` so they render cleanly.
pub struct TerminalProgressObserver {
    multi: MultiProgress,
    /// chunk index → ProgressBar (lazily initialised on first snapshot)
    bars: Mutex<HashMap<usize, ProgressBar>>,
    total_bar: Mutex<Option<ProgressBar>>,
}

fn chunk_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "[{bar:30.cyan/blue}] {bytes}/{total_bytes} ({binary_bytes_per_sec}) ETA {eta} {msg}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("=>-")
}

fn total_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "Total [{bar:30.green/white}] {bytes}/{total_bytes} ({binary_bytes_per_sec}) ETA {eta}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("=>-")
}

impl TerminalProgressObserver {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            bars: Mutex::new(HashMap::new()),
            total_bar: Mutex::new(None),
        }
    }

    fn sync_bars(&self, snapshot: &ProgressSnapshot) {
        let mut bars = self.bars.lock().unwrap_or_else(PoisonError::into_inner);
        let mut total_bar = self.total_bar.lock().unwrap_or_else(PoisonError::into_inner);

        for chunk in &snapshot.chunks {
            let pb = bars.entry(chunk.chunk_index).or_insert_with(|| {
                let pb = self.multi.add(ProgressBar::new(chunk.total_bytes.max(1)));
                pb.set_style(chunk_style());
                pb.set_message(format!("chunk {}", chunk.chunk_index + 1));
                pb
            });
            pb.set_length(chunk.total_bytes.max(1));
            pb.set_position(chunk.bytes_downloaded);
        }

        if total_bar.is_none() && snapshot.total_bytes > 0 {
            let pb = self.multi.add(ProgressBar::new(snapshot.total_bytes));
            pb.set_style(total_style());
            *total_bar = Some(pb);
        }
        if let Some(pb) = total_bar.as_ref() {
            pb.set_length(snapshot.total_bytes.max(1));
            pb.set_position(snapshot.total_bytes_downloaded);
        }
    }
}

#[async_trait]
impl ProgressObserver for TerminalProgressObserver {
    async fn on_progress(&self, snapshot: &ProgressSnapshot) {
        self.sync_bars(snapshot);
    }

    async fn on_chunk_complete(&self, outcome: &ChunkOutcome, snapshot: &ProgressSnapshot) {
        self.sync_bars(snapshot);
        let bars = self.bars.lock().unwrap_or_else(PoisonError::into_inner);
        if !outcome.success {
            if let Some(pb) = bars.get(&outcome.index) {
                pb.abandon_with_message(format!("chunk {} failed", outcome.index + 1));
            }
            return;
        }
        if let Some(pb) = bars.get(&outcome.index) {
            pb.finish_with_message(format!("chunk {} done", outcome.index + 1));
        }
        let _ = self.multi.println(format!(
            "Downloaded chunk {} successfully ({})",
            outcome.index + 1,
            format_bytes(outcome.bytes_written)
        ));
    }

    async fn on_complete(&self, snapshot: &ProgressSnapshot) {
        self.sync_bars(snapshot);
        if let Some(pb) = self
            .total_bar
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            pb.finish_with_message(format!(
                "{} at {}/s",
                format_bytes(snapshot.total_bytes_downloaded),
                format_bytes(snapshot.speed as u64)
            ));
        }
    }

    async fn on_error(&self, error: &str) {
        let bars = self.bars.lock().unwrap_or_else(PoisonError::into_inner);
        for pb in bars.values() {
            pb.abandon_with_message(format!("Error: {}", error));
        }
        if let Some(pb) = self
            .total_bar
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            pb.abandon_with_message(format!("Failed: {}", error));
        }
    }
}
