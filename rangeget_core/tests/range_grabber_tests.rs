mod common;

use futures::StreamExt;
use reqwest::Client;
use wiremock::matchers::{header, header_exists, method};
use wiremock::{Mock, MockServer, ResponseTemplate};

use rangeget_core::downloader::range_grabber::{fetch_chunk, precompute_auth, probe_url};
use rangeget_core::types::types::{AuthenticationInfo, ChunkRange, DownloadError, HeaderData};

use common::{generate_test_data, spawn_static_server, spawn_truncating_server, RangeResponder};

// ---------------------------------------------------------------
// probe_url
// ---------------------------------------------------------------

#[tokio::test]
async fn test_probe_range_capable_server() {
    let server = MockServer::start().await;
    let body = generate_test_data(10_007);

    Mock::given(method("GET"))
        .and(header("Accept-Encoding", "identity"))
        .respond_with(RangeResponder::new(body))
        .mount(&server)
        .await;

    let probe = probe_url(&Client::new(), &HeaderData::new(server.uri()), 10)
        .await
        .unwrap();

    assert_eq!(probe.size, 10_007);
    assert_eq!(probe.chunk_size, 1_000);
    assert!(probe.final_url.starts_with(&server.uri()));
}

#[tokio::test]
async fn test_probe_missing_accept_ranges() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 64]))
        .mount(&server)
        .await;

    let result = probe_url(&Client::new(), &HeaderData::new(server.uri()), 10).await;
    match result {
        Err(DownloadError::UnsupportedServer { accept_ranges: None }) => {}
        other => panic!("expected UnsupportedServer, got {:?}", other),
    }
}

#[tokio::test]
async fn test_probe_accept_ranges_none() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(vec![0u8; 64])
                .insert_header("Accept-Ranges", "none"),
        )
        .mount(&server)
        .await;

    let result = probe_url(&Client::new(), &HeaderData::new(server.uri()), 10).await;
    match result {
        Err(DownloadError::UnsupportedServer { accept_ranges }) => {
            assert_eq!(accept_ranges.as_deref(), Some("none"));
        }
        other => panic!("expected UnsupportedServer, got {:?}", other),
    }
}

#[tokio::test]
async fn test_probe_missing_content_length() {
    // Body delimited by connection close, so no Content-Length at all.
    let url = spawn_static_server(
        "HTTP/1.1 200 OK\r\nAccept-Ranges: bytes\r\nConnection: close\r\n\r\nhello",
    )
    .await;

    let result = probe_url(&Client::new(), &HeaderData::new(url), 10).await;
    assert!(
        matches!(result, Err(DownloadError::SizeUnknown(_))),
        "expected SizeUnknown, got {:?}",
        result
    );
}

#[tokio::test]
async fn test_probe_error_status() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let result = probe_url(&Client::new(), &HeaderData::new(server.uri()), 10).await;
    assert!(matches!(result, Err(DownloadError::Http(_))));
}

#[tokio::test]
async fn test_probe_network_error() {
    // Point to a port that nothing is listening on
    let result = probe_url(&Client::new(), &HeaderData::new("http://127.0.0.1:1"), 10).await;
    assert!(result.is_err());
}

// ---------------------------------------------------------------
// fetch_chunk
// ---------------------------------------------------------------

async fn collect_body(stream: futures::stream::BoxStream<'static, Result<bytes::Bytes, DownloadError>>) -> Result<Vec<u8>, DownloadError> {
    let mut out = Vec::new();
    let mut stream = stream;
    while let Some(item) = stream.next().await {
        out.extend_from_slice(&item?);
    }
    Ok(out)
}

#[tokio::test]
async fn test_fetch_chunk_sends_inclusive_range() {
    let server = MockServer::start().await;
    let body = generate_test_data(4096);

    Mock::given(method("GET"))
        .and(header("Range", "bytes=1024-2047"))
        .respond_with(RangeResponder::new(body.clone()))
        .expect(1)
        .mount(&server)
        .await;

    let chunk = ChunkRange::new(1, 1024, 2047);
    let fetched = fetch_chunk(&Client::new(), &HeaderData::new(server.uri()), None, chunk)
        .await
        .unwrap();

    assert_eq!(fetched.index, 1);
    assert_eq!(fetched.declared_len, 1024);
    assert_eq!(collect_body(fetched.stream).await.unwrap(), &body[1024..2048]);
}

#[tokio::test]
async fn test_fetch_chunk_rejects_full_content_response() {
    let server = MockServer::start().await;
    let body = generate_test_data(4096);

    Mock::given(method("GET"))
        .respond_with(RangeResponder {
            body,
            short_chunk_at: None,
            ignore_ranges: true,
        })
        .mount(&server)
        .await;

    let chunk = ChunkRange::new(0, 0, 1023);
    let result = fetch_chunk(&Client::new(), &HeaderData::new(server.uri()), None, chunk).await;
    match result {
        Err(DownloadError::ChunkRequest { index: 0, reason }) => {
            assert!(reason.contains("206"), "unexpected reason: {}", reason);
        }
        Err(other) => panic!("expected ChunkRequest, got {:?}", other),
        Ok(_) => panic!("a 200 response must not be accepted for a ranged request"),
    }
}

#[tokio::test]
async fn test_fetch_chunk_rejects_mismatched_length() {
    let server = MockServer::start().await;
    let body = generate_test_data(4096);

    Mock::given(method("GET"))
        .respond_with(RangeResponder {
            body,
            short_chunk_at: Some(2048),
            ignore_ranges: false,
        })
        .mount(&server)
        .await;

    let chunk = ChunkRange::new(2, 2048, 3071);
    let result = fetch_chunk(&Client::new(), &HeaderData::new(server.uri()), None, chunk).await;
    assert!(matches!(
        result,
        Err(DownloadError::ChunkRequest { index: 2, .. })
    ));
}

#[tokio::test]
async fn test_fetch_chunk_rejects_foreign_content_range() {
    let server = MockServer::start().await;

    // Right status and length, but the bytes belong to another offset.
    Mock::given(method("GET"))
        .and(header("Range", "bytes=1024-2047"))
        .respond_with(
            ResponseTemplate::new(206)
                .set_body_bytes(generate_test_data(1024))
                .insert_header("Content-Range", "bytes 0-1023/4096"),
        )
        .mount(&server)
        .await;

    let chunk = ChunkRange::new(1, 1024, 2047);
    let result = fetch_chunk(&Client::new(), &HeaderData::new(server.uri()), None, chunk).await;
    match result {
        Err(DownloadError::ChunkRequest { index: 1, reason }) => {
            assert!(reason.contains("Content-Range"), "unexpected reason: {}", reason);
        }
        Err(other) => panic!("expected ChunkRequest, got {:?}", other),
        Ok(_) => panic!("a response for other bytes must not be accepted"),
    }
}

#[tokio::test]
async fn test_fetch_chunk_truncated_body_surfaces_in_stream() {
    let body = generate_test_data(2000);
    let url = spawn_truncating_server(body, 1000).await;

    let chunk = ChunkRange::new(1, 1000, 1999);
    let fetched = fetch_chunk(&Client::new(), &HeaderData::new(url), None, chunk)
        .await
        .unwrap();
    assert_eq!(fetched.declared_len, 1000);

    let result = collect_body(fetched.stream).await;
    assert!(matches!(
        result,
        Err(DownloadError::ChunkRequest { index: 1, .. })
    ));
}

#[tokio::test]
async fn test_fetch_chunk_applies_headers_and_auth() {
    let server = MockServer::start().await;
    let body = generate_test_data(512);

    Mock::given(method("GET"))
        .and(header("X-Token", "abc"))
        .and(header("Authorization", "Basic dXNlcjpwYXNz"))
        .and(header("Range", "bytes=0-255"))
        .respond_with(RangeResponder::new(body))
        .expect(1)
        .mount(&server)
        .await;

    let mut header_data = HeaderData::new(server.uri());
    header_data
        .headers
        .insert("X-Token".to_string(), vec!["abc".to_string()]);
    // A caller-supplied Range must never reach the server.
    header_data
        .headers
        .insert("Range".to_string(), vec!["bytes=0-".to_string()]);
    header_data.authentication = Some(AuthenticationInfo {
        username: "user".to_string(),
        password: "pass".to_string(),
    });

    let auth = precompute_auth(&header_data);
    let fetched = fetch_chunk(
        &Client::new(),
        &header_data,
        auth.as_deref(),
        ChunkRange::new(0, 0, 255),
    )
    .await
    .unwrap();
    assert_eq!(fetched.declared_len, 256);
}

#[tokio::test]
async fn test_probe_sends_no_range_header() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(header_exists("Range"))
        .respond_with(ResponseTemplate::new(416))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(RangeResponder::new(generate_test_data(100)))
        .mount(&server)
        .await;

    let probe = probe_url(&Client::new(), &HeaderData::new(server.uri()), 3)
        .await
        .unwrap();
    assert_eq!(probe.size, 100);
    assert_eq!(probe.chunk_size, 33);
}
