//! HTTP/1.1 over the engine's unix socket
//!
//! One request per connection. The request asks the engine to close the
//! connection, so the response is read to EOF and then split into status,
//! headers and body.

use crate::error::{FleetError, Result};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

/// Response read from the socket
#[derive(Debug, Clone, PartialEq)]
pub struct SocketResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

/// Client for an HTTP server listening on a unix socket
#[derive(Debug, Clone)]
pub struct SocketClient {
    path: PathBuf,
}

impl SocketClient {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Send `method target` with an optional JSON body
    pub async fn request(
        &self,
        method: &str,
        target: &str,
        body: Option<&[u8]>,
    ) -> Result<SocketResponse> {
        let mut stream = UnixStream::connect(&self.path)
            .await
            .map_err(|e| self.unavailable(e))?;

        let mut head = format!(
            "{} {} HTTP/1.1\r\nHost: docker\r\nConnection: close\r\n",
            method, target
        );
        match body {
            Some(body) => {
                head.push_str("Content-Type: application/json\r\n");
                head.push_str(&format!("Content-Length: {}\r\n", body.len()));
            }
            None if method != "GET" => head.push_str("Content-Length: 0\r\n"),
            None => {}
        }
        head.push_str("\r\n");

        stream
            .write_all(head.as_bytes())
            .await
            .map_err(|e| self.unavailable(e))?;
        if let Some(body) = body {
            stream.write_all(body).await.map_err(|e| self.unavailable(e))?;
        }
        stream.flush().await.map_err(|e| self.unavailable(e))?;

        let mut raw = Vec::new();
        stream
            .read_to_end(&mut raw)
            .await
            .map_err(|e| self.unavailable(e))?;
        tracing::debug!("{} {} -> {} bytes", method, target, raw.len());
        parse_response(&raw)
    }

    fn unavailable(&self, e: std::io::Error) -> FleetError {
        FleetError::RuntimeUnavailable {
            reason: format!("{}: {}", self.path.display(), e),
            last_known: None,
        }
    }
}

fn parse_response(raw: &[u8]) -> Result<SocketResponse> {
    let split = raw
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .ok_or_else(|| malformed("missing end of headers"))?;
    let head = String::from_utf8_lossy(&raw[..split]);
    let mut lines = head.lines();

    let status = lines
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|code| code.parse().ok())
        .ok_or_else(|| malformed("bad status line"))?;

    let mut chunked = false;
    let mut length = None;
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            let value = value.trim();
            match name.trim().to_ascii_lowercase().as_str() {
                "transfer-encoding" => chunked = value.eq_ignore_ascii_case("chunked"),
                "content-length" => length = value.parse::<usize>().ok(),
                _ => {}
            }
        }
    }

    let rest = &raw[split + 4..];
    let body = if chunked {
        dechunk(rest)?
    } else if let Some(length) = length {
        rest[..length.min(rest.len())].to_vec()
    } else {
        rest.to_vec()
    };
    Ok(SocketResponse { status, body })
}

fn dechunk(mut data: &[u8]) -> Result<Vec<u8>> {
    let mut body = Vec::new();
    loop {
        let line_end = data
            .windows(2)
            .position(|w| w == b"\r\n")
            .ok_or_else(|| malformed("truncated chunk"))?;
        let size_line = String::from_utf8_lossy(&data[..line_end]);
        let size_hex = size_line.split(';').next().unwrap_or_default().trim();
        let size =
            usize::from_str_radix(size_hex, 16).map_err(|_| malformed("bad chunk size"))?;
        data = &data[line_end + 2..];
        if size == 0 {
            return Ok(body);
        }
        if data.len() < size {
            return Err(malformed("truncated chunk"));
        }
        body.extend_from_slice(&data[..size]);
        data = data.get(size + 2..).unwrap_or_default();
    }
}

fn malformed(what: &str) -> FleetError {
    FleetError::Runtime(format!("malformed engine response: {}", what))
}
