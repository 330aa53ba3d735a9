//! HTTP client over the daemon, including spawn-and-connect.

use std::process::Stdio;

use anyhow::{bail, Context, Result};
use futures_util::{Stream, StreamExt};
use serde_json::Value;
use tracing::debug;

use spall_core::Settings;
use spall_daemon::{acquire, LockFile};

pub struct Client {
    base: String,
    http: reqwest::Client,
}

impl Client {
    /// Connects to the daemon for the ambient data directory, spawning
    /// one first if none is running.
    pub async fn connect_or_spawn() -> Result<Self> {
        let settings = Settings::from_env();
        let lock = LockFile::new(settings.lock_path());
        let endpoint = acquire(&lock, spawn_daemon)
            .await
            .context("failed to reach or start the spall daemon")?;
        debug!(url = %endpoint.url, leader = endpoint.leader, "connected");
        Ok(Self {
            base: endpoint.url,
            http: reqwest::Client::new(),
        })
    }

    /// Connects only if a daemon is already running.
    pub async fn connect_existing() -> Result<Option<Self>> {
        let settings = Settings::from_env();
        let lock = LockFile::new(settings.lock_path());
        match lock.read()? {
            Some(info) => match info.port {
                Some(port) if spall_daemon::lock::health_ok(port).await => Ok(Some(Self {
                    base: format!("http://127.0.0.1:{port}"),
                    http: reqwest::Client::new(),
                })),
                _ => Ok(None),
            },
            None => Ok(None),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    pub async fn get(&self, path: &str) -> Result<Value> {
        let response = self.http.get(format!("{}{path}", self.base)).send().await?;
        Self::expect_json(response).await
    }

    pub async fn post(&self, path: &str, body: Value) -> Result<Value> {
        let response = self
            .http
            .post(format!("{}{path}", self.base))
            .json(&body)
            .send()
            .await?;
        Self::expect_json(response).await
    }

    pub async fn put(&self, path: &str, body: Value) -> Result<Value> {
        let response = self
            .http
            .put(format!("{}{path}", self.base))
            .json(&body)
            .send()
            .await?;
        Self::expect_json(response).await
    }

    pub async fn delete(&self, path: &str) -> Result<()> {
        let response = self
            .http
            .delete(format!("{}{path}", self.base))
            .send()
            .await?;
        if !response.status().is_success() {
            bail!(Self::error_text(response).await);
        }
        Ok(())
    }

    /// Opens an SSE endpoint and yields one parsed event per `data:`
    /// line until the server closes the stream.
    pub async fn stream(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<impl Stream<Item = Value> + Unpin> {
        let mut request = self.http.request(method, format!("{}{path}", self.base));
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request.send().await?;
        if !response.status().is_success() {
            bail!(Self::error_text(response).await);
        }

        // Buffer raw bytes and decode only whole frames: a multi-byte
        // UTF-8 character may straddle a chunk boundary.
        let bytes = response.bytes_stream();
        let stream = futures_util::stream::unfold(
            (bytes, Vec::<u8>::new()),
            |(mut bytes, mut buffer)| async move {
                loop {
                    if let Some(boundary) = frame_boundary(&buffer) {
                        let frame: Vec<u8> = buffer.drain(..boundary + 2).collect();
                        let frame = String::from_utf8_lossy(&frame[..boundary]).into_owned();
                        if let Some(event) = parse_sse_frame(&frame) {
                            return Some((event, (bytes, buffer)));
                        }
                        continue;
                    }
                    match bytes.next().await {
                        Some(Ok(chunk)) => buffer.extend_from_slice(&chunk),
                        _ => return None,
                    }
                }
            },
        );
        Ok(Box::pin(stream))
    }

    async fn expect_json(response: reqwest::Response) -> Result<Value> {
        let status = response.status();
        if !status.is_success() {
            bail!(Self::error_text(response).await);
        }
        if status == reqwest::StatusCode::NO_CONTENT {
            return Ok(Value::Null);
        }
        Ok(response.json().await?)
    }

    async fn error_text(response: reqwest::Response) -> String {
        let status = response.status();
        match response.json::<Value>().await {
            Ok(body) => {
                let code = body["code"].as_str().unwrap_or("error");
                let message = body["message"].as_str().unwrap_or("request failed");
                format!("{code}: {message}")
            }
            Err(_) => format!("request failed with status {status}"),
        }
    }
}

fn frame_boundary(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|window| window == b"\n\n")
}

fn parse_sse_frame(frame: &str) -> Option<Value> {
    let data = frame
        .lines()
        .find_map(|line| line.strip_prefix("data: "))?;
    serde_json::from_str(data).ok()
}

/// Percent-encodes a value for use in a request path or query string.
/// `/` and `*` stay literal so note paths and globs read through.
pub fn urlencode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'*' | b'/' => {
                out.push(byte as char)
            }
            b' ' => out.push_str("%20"),
            other => out.push_str(&format!("%{other:02X}")),
        }
    }
    out
}

/// Spawns `spall serve` detached; the cleanest way to daemonize from a
/// single binary.
fn spawn_daemon() -> spall_core::Result<()> {
    let exe = std::env::current_exe()?;
    std::process::Command::new(exe)
        .arg("serve")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()?;
    Ok(())
}
