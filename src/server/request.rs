//! Minimal HTTP/1.1 request-head parsing
//!
//! The accept loop only needs the request line and headers of the
//! initial GET before handing the socket over to SSE streaming; there is
//! no request body to consume. The parser reads until the blank line
//! terminating the head, bounded by a maximum head size.

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{Error, Result};

/// Upper bound on the request head we are willing to buffer
pub const MAX_HEAD_SIZE: usize = 16 * 1024;

/// A parsed HTTP request head
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// Request method, e.g. `GET`
    pub method: String,

    /// Request target as sent, e.g. `/events?token=x`
    pub target: String,

    /// Header name/value pairs in arrival order
    pub headers: Vec<(String, String)>,
}

impl HttpRequest {
    /// Request path without the query string
    pub fn path(&self) -> &str {
        match self.target.split_once('?') {
            Some((path, _)) => path,
            None => &self.target,
        }
    }

    /// First header with the given name, case-insensitive
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Parse a complete request head from its text form
    pub fn parse(head: &str) -> Result<Self> {
        let mut lines = head.split("\r\n");

        let request_line = lines
            .next()
            .filter(|l| !l.is_empty())
            .ok_or_else(|| Error::BadRequest("empty request".into()))?;

        let mut parts = request_line.split_ascii_whitespace();
        let method = parts
            .next()
            .ok_or_else(|| Error::BadRequest("missing method".into()))?;
        let target = parts
            .next()
            .ok_or_else(|| Error::BadRequest("missing request target".into()))?;
        let version = parts
            .next()
            .ok_or_else(|| Error::BadRequest("missing HTTP version".into()))?;

        if !version.starts_with("HTTP/1.") {
            return Err(Error::BadRequest(format!(
                "unsupported HTTP version: {}",
                version
            )));
        }

        let mut headers = Vec::new();
        for line in lines {
            if line.is_empty() {
                break;
            }
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| Error::BadRequest(format!("malformed header line: {}", line)))?;
            headers.push((name.trim().to_owned(), value.trim().to_owned()));
        }

        Ok(Self {
            method: method.to_owned(),
            target: target.to_owned(),
            headers,
        })
    }
}

/// Read a request head from a transport
///
/// Returns `Ok(None)` if the peer disconnects before completing the
/// head; that is a clean no-op for the accept loop, not an error.
pub async fn read_request<R>(stream: &mut R) -> Result<Option<HttpRequest>>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];

    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            // Peer went away before finishing the request head.
            return Ok(None);
        }
        buf.extend_from_slice(&chunk[..n]);

        if let Some(end) = find_head_end(&buf) {
            let head = std::str::from_utf8(&buf[..end])
                .map_err(|_| Error::BadRequest("request head is not valid UTF-8".into()))?;
            return HttpRequest::parse(head).map(Some);
        }

        if buf.len() > MAX_HEAD_SIZE {
            return Err(Error::BadRequest("request head too large".into()));
        }
    }
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4)
}
