use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Number of ranges a download is split into unless configured otherwise.
pub const DEFAULT_CHUNK_COUNT: usize = 10;

/// Upper bound on a single positional write (64 KB).
pub const DEFAULT_BLOCK_SIZE: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("server does not accept byte ranges (Accept-Ranges: {})", .accept_ranges.as_deref().unwrap_or("<missing>"))]
    UnsupportedServer { accept_ranges: Option<String> },

    #[error("server did not report a usable Content-Length: {0}")]
    SizeUnknown(String),

    #[error("request for chunk {index} failed: {reason}")]
    ChunkRequest { index: usize, reason: String },

    #[error("short write in chunk {index}: read {read} bytes but wrote {written}")]
    ShortWrite {
        index: usize,
        read: usize,
        written: usize,
    },

    #[error("size mismatch in chunk {index}: expected {expected} bytes, got {actual}")]
    SizeMismatch {
        index: usize,
        expected: u64,
        actual: u64,
    },

    #[error("chunk count must be at least 1, got {0}")]
    InvalidChunkCount(usize),

    #[error("invalid state transition: {from} -> {to}")]
    InvalidState {
        from: CoordinatorState,
        to: CoordinatorState,
    },

    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("disk error: {0}")]
    Disk(std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("chunk task failed: {0}")]
    ChunkFailed(String),

    #[error("download cancelled")]
    Cancelled,
}

/// Lifecycle of a single download.
///
/// `Failed` is reachable from every non-terminal state; everything else moves
/// strictly forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoordinatorState {
    Idle,
    Probing,
    Planning,
    Downloading,
    Verifying,
    Done,
    Failed,
}

impl CoordinatorState {
    pub fn is_terminal(self) -> bool {
        matches!(self, CoordinatorState::Done | CoordinatorState::Failed)
    }

    pub fn can_transition_to(self, next: CoordinatorState) -> bool {
        use CoordinatorState::*;
        match (self, next) {
            (from, Failed) => !from.is_terminal(),
            (Idle, Probing)
            | (Probing, Planning)
            | (Planning, Downloading)
            | (Downloading, Verifying)
            | (Verifying, Done) => true,
            _ => false,
        }
    }
}

impl fmt::Display for CoordinatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// One contiguous byte range of the source object. `end` is inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRange {
    pub index: usize,
    pub start: u64,
    pub end: u64,
}

impl ChunkRange {
    pub fn new(index: usize, start: u64, end: u64) -> Self {
        Self { index, start, end }
    }

    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Value for the `Range` request header, e.g. `bytes=0-1023`.
    pub fn header_value(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }
}

/// What the probe learned about the remote object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadTarget {
    pub url: String,
    pub size: u64,
    pub chunk_count: usize,
}

impl DownloadTarget {
    /// Suggested chunk size, `floor(size / chunk_count)`.
    pub fn chunk_size(&self) -> u64 {
        self.size / self.chunk_count.max(1) as u64
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub size: u64,
    pub chunk_size: u64,
    pub final_url: String,
}

/// Result of one chunk worker, produced exactly once per planned range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkOutcome {
    pub index: usize,
    pub bytes_written: u64,
    pub success: bool,
    pub error: Option<String>,
}

impl ChunkOutcome {
    pub fn succeeded(index: usize, bytes_written: u64) -> Self {
        Self {
            index,
            bytes_written,
            success: true,
            error: None,
        }
    }

    pub fn failed(index: usize, bytes_written: u64, error: &DownloadError) -> Self {
        Self {
            index,
            bytes_written,
            success: false,
            error: Some(error.to_string()),
        }
    }
}

/// Progress messages emitted by chunk workers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    /// The chunk's response headers were accepted; `total_bytes` is its span.
    Started { chunk_index: usize, total_bytes: u64 },
    /// `bytes_delta` more bytes landed on disk for this chunk.
    Bytes { chunk_index: usize, bytes_delta: u64 },
    Finished(ChunkOutcome),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticationInfo {
    pub username: String,
    pub password: String,
}

/// Everything needed to build a request for the source object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeaderData {
    pub url: String,
    pub headers: HashMap<String, Vec<String>>,
    pub authentication: Option<AuthenticationInfo>,
}

impl HeaderData {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: HashMap::new(),
            authentication: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadConfig {
    pub url: String,
    pub output_path: PathBuf,
    pub chunk_count: usize,
    pub block_size: usize,
    pub headers: HashMap<String, Vec<String>>,
    pub authentication: Option<AuthenticationInfo>,
}

impl DownloadConfig {
    pub fn new(url: impl Into<String>, output_path: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            output_path: output_path.into(),
            chunk_count: DEFAULT_CHUNK_COUNT,
            block_size: DEFAULT_BLOCK_SIZE,
            headers: HashMap::new(),
            authentication: None,
        }
    }

    pub fn header_data(&self) -> HeaderData {
        HeaderData {
            url: self.url.clone(),
            headers: self.headers.clone(),
            authentication: self.authentication.clone(),
        }
    }
}

/// Summary handed back to the caller after a successful download.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadReport {
    pub id: Uuid,
    pub url: String,
    pub output_path: PathBuf,
    pub size: u64,
    pub chunk_count: usize,
    pub outcomes: Vec<ChunkOutcome>,
    pub sha256: String,
    pub elapsed_secs: f64,
}

impl DownloadReport {
    pub fn to_json(&self) -> Result<String, DownloadError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
