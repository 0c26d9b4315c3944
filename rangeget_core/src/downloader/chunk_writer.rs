//! Positional writes into the shared output file.
//!
//! The file is opened once and shared through an `Arc`. Each chunk worker gets
//! a `RegionWriter` that may only touch the bytes of its own `ChunkRange`, so
//! the handle itself needs no lock: the planner guarantees regions never
//! overlap, and positional writes do not share a cursor.

use std::fs::File;
use std::io;
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::downloader::range_grabber::ChunkBody;
use crate::types::types::{ChunkOutcome, ChunkRange, DownloadError};

/// A byte sink addressed by absolute offset.
///
/// Implementations must not share a cursor between calls, so disjoint regions
/// can be written from different threads without locking. The return value is
/// the number of bytes actually accepted, which may be less than `buf.len()`.
pub trait PositionalWrite: Send + Sync + 'static {
    fn write_at(&self, buf: &[u8], offset: u64) -> io::Result<usize>;
}

impl PositionalWrite for File {
    #[cfg(unix)]
    fn write_at(&self, buf: &[u8], offset: u64) -> io::Result<usize> {
        std::os::unix::fs::FileExt::write_at(self, buf, offset)
    }

    #[cfg(windows)]
    fn write_at(&self, buf: &[u8], offset: u64) -> io::Result<usize> {
        std::os::windows::fs::FileExt::seek_write(self, buf, offset)
    }
}

/// The download's single output file.
pub struct OutputFile {
    file: Arc<File>,
}

impl OutputFile {
    /// Creates (or truncates) the file at `path`.
    pub async fn create(path: &Path) -> Result<Self, DownloadError> {
        let path = path.to_path_buf();
        let file = tokio::task::spawn_blocking(move || {
            std::fs::OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&path)
        })
        .await
        .map_err(|e| DownloadError::ChunkFailed(e.to_string()))?
        .map_err(DownloadError::Disk)?;

        Ok(Self {
            file: Arc::new(file),
        })
    }

    /// Grants write access to exactly one range of the file.
    pub fn region(&self, chunk: ChunkRange) -> RegionWriter {
        RegionWriter::new(Arc::clone(&self.file) as Arc<dyn PositionalWrite>, chunk)
    }

    /// One writer per planned range, in plan order.
    pub fn regions(&self, chunks: &[ChunkRange]) -> Vec<RegionWriter> {
        chunks.iter().map(|c| self.region(*c)).collect()
    }

    /// Flushes file data to disk. Call after every region writer is done.
    pub async fn sync(&self) -> Result<(), DownloadError> {
        let file = Arc::clone(&self.file);
        tokio::task::spawn_blocking(move || file.sync_all())
            .await
            .map_err(|e| DownloadError::ChunkFailed(e.to_string()))?
            .map_err(DownloadError::Disk)
    }
}

/// Exclusive logical owner of one `ChunkRange` of the output file.
pub struct RegionWriter {
    sink: Arc<dyn PositionalWrite>,
    chunk: ChunkRange,
    cursor: u64,
}

impl RegionWriter {
    pub fn new(sink: Arc<dyn PositionalWrite>, chunk: ChunkRange) -> Self {
        Self {
            sink,
            chunk,
            cursor: chunk.start,
        }
    }

    pub fn chunk(&self) -> ChunkRange {
        self.chunk
    }

    /// Bytes written so far.
    pub fn written(&self) -> u64 {
        self.cursor - self.chunk.start
    }

    /// Writes `block` at the cursor and advances it by the bytes the OS
    /// actually accepted. Refuses blocks that would cross the region's end.
    pub async fn write_block(&mut self, block: Bytes) -> Result<usize, DownloadError> {
        let len = block.len() as u64;
        if self.cursor + len > self.chunk.end + 1 {
            return Err(DownloadError::SizeMismatch {
                index: self.chunk.index,
                expected: self.chunk.len(),
                actual: self.written() + len,
            });
        }

        let sink = Arc::clone(&self.sink);
        let offset = self.cursor;
        let written = tokio::task::spawn_blocking(move || sink.write_at(&block, offset))
            .await
            .map_err(|e| DownloadError::ChunkFailed(e.to_string()))?
            .map_err(DownloadError::Disk)?;

        self.cursor += written as u64;
        Ok(written)
    }
}

/// Drains a chunk body into its region in blocks of at most `block_size`.
///
/// Every block must be written in full (`ShortWrite`), and the chunk total
/// must equal the declared `Content-Length` once the stream ends
/// (`SizeMismatch`). The cancellation token is checked between blocks.
pub async fn write_chunk(
    body: ChunkBody,
    mut region: RegionWriter,
    block_size: usize,
    cancel_token: &CancellationToken,
    on_progress: impl Fn(u64),
) -> Result<ChunkOutcome, DownloadError> {
    let index = body.index;
    let declared_len = body.declared_len;
    let block_size = block_size.max(1);
    let mut stream = body.stream;

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel_token.cancelled() => return Err(DownloadError::Cancelled),
            next = stream.next() => next,
        };

        let Some(item) = next else {
            break;
        };
        let mut data = item?;

        while !data.is_empty() {
            if cancel_token.is_cancelled() {
                return Err(DownloadError::Cancelled);
            }

            let block = data.split_to(block_size.min(data.len()));
            let read = block.len();
            let written = region.write_block(block).await?;
            if written != read {
                log::error!(
                    "[write_chunk] chunk={}: short write, read={} written={}",
                    index,
                    read,
                    written
                );
                return Err(DownloadError::ShortWrite {
                    index,
                    read,
                    written,
                });
            }
            on_progress(written as u64);
        }
    }

    let total = region.written();
    if total != declared_len {
        log::error!(
            "[write_chunk] chunk={}: size mismatch, declared={} written={}",
            index,
            declared_len,
            total
        );
        return Err(DownloadError::SizeMismatch {
            index,
            expected: declared_len,
            actual: total,
        });
    }

    log::debug!("[write_chunk] chunk={}: wrote {} bytes", index, total);
    Ok(ChunkOutcome::succeeded(index, total))
}
