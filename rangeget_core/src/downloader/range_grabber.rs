use base64::Engine;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use reqwest::header::{ACCEPT_ENCODING, ACCEPT_RANGES, CONTENT_LENGTH, CONTENT_RANGE, RANGE};
use reqwest::{Client, Response, StatusCode};

use crate::types::types::{ChunkRange, DownloadError, HeaderData, ProbeResult};

/// Applies caller-supplied headers and auth to a request builder.
///
/// `Range` and `Accept-Encoding` are owned by this module: a stale range would
/// duplicate ours, and a compressed transfer breaks offset arithmetic.
fn apply_headers(
    mut builder: reqwest::RequestBuilder,
    header_data: &HeaderData,
    precomputed_auth: Option<&str>,
) -> reqwest::RequestBuilder {
    for (key, values) in &header_data.headers {
        if key.eq_ignore_ascii_case("range") || key.eq_ignore_ascii_case("accept-encoding") {
            continue;
        }
        for value in values {
            builder = builder.header(key, value);
        }
    }
    if let Some(auth_value) = precomputed_auth {
        builder = builder.header("Authorization", auth_value);
    }
    builder.header(ACCEPT_ENCODING, "identity")
}

/// Pre-computes the Basic auth header value, if authentication is configured.
pub fn precompute_auth(header_data: &HeaderData) -> Option<String> {
    header_data.authentication.as_ref().map(|auth| {
        let credentials = format!("{}:{}", auth.username, auth.password);
        let encoded = base64::engine::general_purpose::STANDARD.encode(&credentials);
        format!("Basic {}", encoded)
    })
}

fn header_str<'a>(response: &'a Response, name: reqwest::header::HeaderName) -> Option<&'a str> {
    response.headers().get(name).and_then(|v| v.to_str().ok())
}

/// Checks that the server serves byte ranges and reports the object size.
///
/// Issues a plain GET and only looks at the response headers; the body is
/// dropped unread. `Accept-Ranges` must be present and not `none`, and
/// `Content-Length` must parse as an integer.
pub async fn probe_url(
    client: &Client,
    header_data: &HeaderData,
    chunk_count: usize,
) -> Result<ProbeResult, DownloadError> {
    let auth_header = precompute_auth(header_data);
    let builder = apply_headers(client.get(&header_data.url), header_data, auth_header.as_deref());

    let response = builder.send().await?.error_for_status()?;

    let accept_ranges = header_str(&response, ACCEPT_RANGES).map(|s| s.trim().to_string());
    log::info!(
        "[probe_url] url={}: status={}, accept-ranges={:?}, content-length={:?}",
        header_data.url,
        response.status(),
        accept_ranges,
        header_str(&response, CONTENT_LENGTH)
    );

    let supported = accept_ranges
        .as_deref()
        .is_some_and(|value| !value.is_empty() && !value.eq_ignore_ascii_case("none"));
    if !supported {
        return Err(DownloadError::UnsupportedServer { accept_ranges });
    }

    let size = match header_str(&response, CONTENT_LENGTH) {
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map_err(|_| DownloadError::SizeUnknown(format!("unparseable value {:?}", raw)))?,
        None => {
            return Err(DownloadError::SizeUnknown(
                "Content-Length header missing".to_string(),
            ))
        }
    };

    let final_url = response.url().to_string();
    drop(response);

    Ok(ProbeResult {
        size,
        chunk_size: size / chunk_count.max(1) as u64,
        final_url,
    })
}

/// Parses `bytes <start>-<end>/<total>` into the inclusive `(start, end)`.
fn parse_content_range(value: &str) -> Option<(u64, u64)> {
    let spec = value.trim().strip_prefix("bytes")?.trim_start();
    let (span, _total) = spec.split_once('/')?;
    let (start, end) = span.split_once('-')?;
    Some((start.trim().parse().ok()?, end.trim().parse().ok()?))
}

/// A validated partial-content response, body not yet consumed.
pub struct ChunkBody {
    pub index: usize,
    pub declared_len: u64,
    pub stream: BoxStream<'static, Result<Bytes, DownloadError>>,
}

impl ChunkBody {
    pub fn new(
        index: usize,
        declared_len: u64,
        stream: BoxStream<'static, Result<Bytes, DownloadError>>,
    ) -> Self {
        Self {
            index,
            declared_len,
            stream,
        }
    }
}

/// Requests one chunk with `Range: bytes=<start>-<end>`.
///
/// Anything other than a `206` whose `Content-Length` equals the requested
/// span is a hard failure, as is a `Content-Range` naming other bytes.
/// No retries.
pub async fn fetch_chunk(
    client: &Client,
    header_data: &HeaderData,
    precomputed_auth: Option<&str>,
    chunk: ChunkRange,
) -> Result<ChunkBody, DownloadError> {
    let index = chunk.index;
    let request_error = |reason: String| DownloadError::ChunkRequest { index, reason };

    let builder = apply_headers(client.get(&header_data.url), header_data, precomputed_auth)
        .header(RANGE, chunk.header_value());

    log::debug!(
        "[fetch_chunk] chunk={}: requesting Range: {}",
        index,
        chunk.header_value()
    );

    let response = builder
        .send()
        .await
        .map_err(|e| request_error(e.to_string()))?;

    let status = response.status();
    if status != StatusCode::PARTIAL_CONTENT {
        return Err(request_error(format!(
            "expected 206 Partial Content, got {}",
            status
        )));
    }

    let expected = chunk.len();
    let declared_len = header_str(&response, CONTENT_LENGTH)
        .and_then(|s| s.trim().parse::<u64>().ok())
        .ok_or_else(|| request_error("response has no usable Content-Length".to_string()))?;

    if declared_len != expected {
        return Err(request_error(format!(
            "Content-Length {} does not match requested span {}",
            declared_len, expected
        )));
    }

    // Content-Range is optional, but when sent it must name our span.
    if let Some(raw) = header_str(&response, CONTENT_RANGE) {
        match parse_content_range(raw) {
            Some((start, end)) if start == chunk.start && end == chunk.end => {}
            _ => {
                return Err(request_error(format!(
                    "Content-Range {:?} does not match requested bytes {}-{}",
                    raw, chunk.start, chunk.end
                )))
            }
        }
    }

    log::info!(
        "[fetch_chunk] chunk={}: status={}, content_length={}",
        index,
        status,
        declared_len
    );

    let stream = response
        .bytes_stream()
        .map_err(move |e| DownloadError::ChunkRequest {
            index,
            reason: e.to_string(),
        })
        .boxed();

    Ok(ChunkBody::new(index, declared_len, stream))
}
