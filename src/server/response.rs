//! HTTP response construction
//!
//! The proxy writes exactly two kinds of responses: the SSE preamble
//! that opens a streaming connection, and small error responses produced
//! before a connection is registered.

use bytes::Bytes;

/// An HTTP response ready to be written to a transport
#[derive(Debug, Clone)]
pub struct HttpResponse {
    status: u16,
    reason: &'static str,
    headers: Vec<(&'static str, String)>,
    body: String,
}

impl HttpResponse {
    fn new(status: u16, reason: &'static str) -> Self {
        Self {
            status,
            reason,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    /// Response preamble for an accepted SSE connection
    ///
    /// Deliberately carries no `Content-Length`: the body is the
    /// open-ended event stream that follows.
    pub fn sse_preamble() -> Self {
        let mut resp = Self::new(200, "OK");
        resp.headers = vec![
            ("Content-Type", "text/event-stream".to_owned()),
            ("Cache-Control", "no-cache".to_owned()),
            ("Connection", "keep-alive".to_owned()),
        ];
        resp
    }

    pub fn bad_request(body: impl Into<String>) -> Self {
        Self::error(400, "Bad Request", body)
    }

    pub fn unauthorized(body: impl Into<String>) -> Self {
        Self::error(401, "Unauthorized", body)
    }

    pub fn not_found(body: impl Into<String>) -> Self {
        Self::error(404, "Not Found", body)
    }

    pub fn method_not_allowed(body: impl Into<String>) -> Self {
        Self::error(405, "Method Not Allowed", body)
    }

    fn error(status: u16, reason: &'static str, body: impl Into<String>) -> Self {
        let body = body.into();
        let mut resp = Self::new(status, reason);
        resp.headers = vec![
            ("Content-Type", "text/plain".to_owned()),
            ("Content-Length", body.len().to_string()),
            ("Connection", "close".to_owned()),
        ];
        resp.body = body;
        resp
    }

    /// Response status code
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Serialize to wire form
    pub fn render(&self) -> Bytes {
        let mut out = String::with_capacity(128 + self.body.len());
        out.push_str("HTTP/1.1 ");
        out.push_str(&self.status.to_string());
        out.push(' ');
        out.push_str(self.reason);
        out.push_str("\r\n");
        for (name, value) in &self.headers {
            out.push_str(name);
            out.push_str(": ");
            out.push_str(value);
            out.push_str("\r\n");
        }
        out.push_str("\r\n");
        out.push_str(&self.body);
        Bytes::from(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sse_preamble_format() {
        let wire = HttpResponse::sse_preamble().render();
        let text = std::str::from_utf8(&wire).unwrap();

        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Content-Type: text/event-stream\r\n"));
        assert!(text.contains("Cache-Control: no-cache\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
        assert!(!text.contains("Content-Length"));
    }

    #[test]
    fn test_error_response_format() {
        let wire = HttpResponse::unauthorized("invalid credentials").render();
        let text = std::str::from_utf8(&wire).unwrap();

        assert!(text.starts_with("HTTP/1.1 401 Unauthorized\r\n"));
        assert!(text.contains("Content-Length: 19\r\n"));
        assert!(text.ends_with("\r\n\r\ninvalid credentials"));
    }
}
