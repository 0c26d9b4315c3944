use crate::types::types::{ChunkRange, DownloadError};

/// Splits `[0, size)` into contiguous, inclusive byte ranges.
///
/// Every chunk but the last is `floor(size / n)` bytes long; the last one
/// absorbs the remainder so its end is always `size - 1`. When the object is
/// smaller than the requested count, `n` is clamped to `size` (one byte per
/// chunk) and an empty object yields an empty plan.
pub fn plan_chunks(size: u64, chunk_count: usize) -> Result<Vec<ChunkRange>, DownloadError> {
    if chunk_count == 0 {
        return Err(DownloadError::InvalidChunkCount(chunk_count));
    }
    if size == 0 {
        return Ok(Vec::new());
    }

    let count = (chunk_count as u64).min(size);
    let chunk_size = size / count;

    let mut chunks = Vec::with_capacity(count as usize);
    let mut start: u64 = 0;

    for i in 0..count {
        let end = if i == count - 1 {
            size - 1
        } else {
            start + chunk_size - 1
        };
        chunks.push(ChunkRange::new(i as usize, start, end));
        start = end + 1;
    }

    Ok(chunks)
}
