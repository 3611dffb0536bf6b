//! Response record for one in-flight exchange
//!
//! A `Response` exists from the moment a request's header block parses. Body
//! bytes are not stored here; they stream to the caller through
//! `BodyChunkAvailable` events while the counters below track progress.

use http::{HeaderMap, StatusCode, Version};

/// The parsed head of an HTTP response plus body progress counters.
#[derive(Debug)]
pub struct Response {
    version: Version,
    status: StatusCode,
    reason: String,
    headers: HeaderMap,
    received_bytes: u64,
    total_bytes: Option<u64>,
}

impl Response {
    pub(crate) fn new(
        version: Version,
        status: StatusCode,
        reason: String,
        headers: HeaderMap,
    ) -> Self {
        let total_bytes = headers
            .get(http::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok());
        Self {
            version,
            status,
            reason,
            headers,
            received_bytes: 0,
            total_bytes,
        }
    }

    /// Protocol version announced in the status line.
    pub fn version(&self) -> Version {
        self.version
    }

    /// Numeric status code.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Status phrase as sent by the server; may be empty.
    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// Parsed header map. Names are lower-cased; lookups are case-insensitive.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// First value of the named header, when present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Decoded body bytes delivered so far.
    pub fn received_bytes(&self) -> u64 {
        self.received_bytes
    }

    /// Declared body size from `Content-Length`, when the server sent one.
    pub fn total_bytes(&self) -> Option<u64> {
        self.total_bytes
    }

    /// Alias for [`total_bytes`](Self::total_bytes).
    pub fn content_length(&self) -> Option<u64> {
        self.total_bytes
    }

    /// Whether the status code marks this response as a redirect candidate.
    pub fn is_redirect(&self) -> bool {
        self.status.is_redirection()
    }

    pub(crate) fn add_received(&mut self, n: u64) {
        self.received_bytes += n;
    }
}
