#![allow(dead_code)]

use std::sync::Arc;

use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use wiremock::{Request, ResponseTemplate};

/// Generates deterministic test data: each byte = (offset % 251) as u8.
pub fn generate_test_data(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i % 251) as u8).collect()
}

pub fn sha256_hex(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

/// Parses a Range header like "bytes=0-" or "bytes=1024-2047".
pub fn parse_range(header: &str, body_len: usize) -> Option<(usize, usize)> {
    let s = header.strip_prefix("bytes=")?;
    let (start, end) = s.split_once('-')?;
    let start: usize = start.trim().parse().ok()?;
    let end: usize = if end.trim().is_empty() {
        body_len - 1
    } else {
        end.trim().parse().ok()?
    };
    Some((start, end.min(body_len - 1)))
}

/// A wiremock responder that serves `body` with full byte-range support.
///
/// Plain GETs get a `200` advertising `Accept-Ranges: bytes`; ranged GETs get a
/// `206` with the requested slice. `short_chunk_at` makes the response for the
/// range starting at that offset one byte short, and `ignore_ranges` turns the
/// server into one that always answers `200` with the whole body.
pub struct RangeResponder {
    pub body: Vec<u8>,
    pub short_chunk_at: Option<usize>,
    pub ignore_ranges: bool,
}

impl RangeResponder {
    pub fn new(body: Vec<u8>) -> Self {
        Self {
            body,
            short_chunk_at: None,
            ignore_ranges: false,
        }
    }
}

impl wiremock::Respond for RangeResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let range = request
            .headers
            .get("range")
            .and_then(|v| v.to_str().ok())
            .and_then(|r| parse_range(r, self.body.len()));

        match range {
            Some((start, end)) if !self.ignore_ranges => {
                let mut slice = self.body[start..=end].to_vec();
                if self.short_chunk_at == Some(start) {
                    slice.pop();
                }
                ResponseTemplate::new(206)
                    .set_body_bytes(slice)
                    .insert_header(
                        "Content-Range",
                        format!("bytes {}-{}/{}", start, end, self.body.len()),
                    )
                    .insert_header("Accept-Ranges", "bytes")
                    .insert_header("Content-Type", "application/octet-stream")
            }
            _ => ResponseTemplate::new(200)
                .set_body_bytes(self.body.clone())
                .insert_header("Accept-Ranges", "bytes")
                .insert_header("Content-Type", "application/octet-stream"),
        }
    }
}

async fn read_request_head(socket: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);
                if buf.windows(4).any(|w| w == b"\r\n\r\n") {
                    break;
                }
            }
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Raw HTTP/1.1 server that honours ranges but closes the connection halfway
/// through the range starting at `truncate_start`, after promising the full
/// `Content-Length`. Every other range is served completely.
pub async fn spawn_truncating_server(body: Vec<u8>, truncate_start: usize) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let body = Arc::new(body);

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let body = Arc::clone(&body);
            tokio::spawn(async move {
                let head = read_request_head(&mut socket).await;
                let range = head.lines().find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    if name.trim().eq_ignore_ascii_case("range") {
                        parse_range(value.trim(), body.len())
                    } else {
                        None
                    }
                });

                let mut response = Vec::new();
                match range {
                    Some((start, end)) => {
                        let slice = &body[start..=end];
                        let sent = if start == truncate_start {
                            &slice[..slice.len() / 2]
                        } else {
                            slice
                        };
                        response.extend_from_slice(
                            format!(
                                "HTTP/1.1 206 Partial Content\r\nContent-Length: {}\r\nContent-Range: bytes {}-{}/{}\r\nAccept-Ranges: bytes\r\nConnection: close\r\n\r\n",
                                slice.len(),
                                start,
                                end,
                                body.len()
                            )
                            .as_bytes(),
                        );
                        response.extend_from_slice(sent);
                    }
                    None => {
                        response.extend_from_slice(
                            format!(
                                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nAccept-Ranges: bytes\r\nConnection: close\r\n\r\n",
                                body.len()
                            )
                            .as_bytes(),
                        );
                        response.extend_from_slice(&body);
                    }
                }

                let _ = socket.write_all(&response).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    format!("http://{}", addr)
}

/// Raw HTTP/1.1 server whose range at `fail_start` is answered with a `500`,
/// while every other range gets valid `206` headers and then no body at all;
/// those connections are held open until the test ends.
pub async fn spawn_stalling_server(body: Vec<u8>, fail_start: usize) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let len = body.len();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let body = body.clone();
            tokio::spawn(async move {
                let head = read_request_head(&mut socket).await;
                let range = head.lines().find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    if name.trim().eq_ignore_ascii_case("range") {
                        parse_range(value.trim(), len)
                    } else {
                        None
                    }
                });

                match range {
                    Some((start, _)) if start == fail_start => {
                        let _ = socket
                            .write_all(
                                b"HTTP/1.1 500 Internal Server Error\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                            )
                            .await;
                        let _ = socket.shutdown().await;
                    }
                    Some((start, end)) => {
                        let headers = format!(
                            "HTTP/1.1 206 Partial Content\r\nContent-Length: {}\r\nContent-Range: bytes {}-{}/{}\r\nAccept-Ranges: bytes\r\n\r\n",
                            end - start + 1,
                            start,
                            end,
                            len
                        );
                        let _ = socket.write_all(headers.as_bytes()).await;
                        tokio::time::sleep(std::time::Duration::from_secs(60)).await;
                    }
                    None => {
                        let mut response = format!(
                            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nAccept-Ranges: bytes\r\nConnection: close\r\n\r\n",
                            len
                        )
                        .into_bytes();
                        response.extend_from_slice(&body);
                        let _ = socket.write_all(&response).await;
                        let _ = socket.shutdown().await;
                    }
                }
            });
        }
    });

    format!("http://{}", addr)
}

/// Raw server answering every request with the same canned bytes.
pub async fn spawn_static_server(response: &'static str) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let _ = read_request_head(&mut socket).await;
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    format!("http://{}", addr)
}
