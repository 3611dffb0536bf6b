//! Request record, lifecycle states, and the request builder
//!
//! Requests live in a single slab owned by the [`Client`](crate::Client);
//! the redirect chain pointers are slab handles, never owning references, so
//! a chain can be walked in both directions without reference cycles.

use std::fmt;
use std::io;

use bytes::BytesMut;
use http::{Method, Version};
use url::Url;

use crate::error::{Error, Kind};
use crate::events::EventSet;
use crate::response::Response;

/// Handle to a request inside one client's slab.
///
/// Handles are only meaningful for the client that issued them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub(crate) usize);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle state of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    /// Accepted but not yet admitted under the concurrency cap.
    Enqueued,
    /// TCP opened; TLS handshake pending.
    WillEnableCrypto,
    /// Transport ready; request head not fully written.
    WillSendHeaders,
    /// Head written; upload body streaming out.
    WillSendBody,
    /// Waiting for the response head to complete.
    ReceivingHeaders,
    /// Head parsed; draining the decoded body stream.
    ReceivingBody,
    /// Body complete; redirect handling and finalization pending.
    Received,
    /// Terminal: completed, socket closed.
    Finished,
    /// Terminal: errored, socket closed. See [`Request::error`].
    Failed,
}

impl RequestState {
    /// Terminal states never transition again.
    pub fn is_terminal(self) -> bool {
        matches!(self, RequestState::Finished | RequestState::Failed)
    }

    /// Active means holding (or about to hold) a socket: neither enqueued
    /// nor terminal.
    pub fn is_active(self) -> bool {
        !matches!(self, RequestState::Enqueued) && !self.is_terminal()
    }
}

/// Caller-supplied upload body: any readable byte source. `Ok(0)` is EOF.
pub type BodySource = Box<dyn io::Read>;

/// One HTTP exchange tracked by a client.
///
/// Constructed through [`Request::get`] and friends, then moved into the
/// client with [`Client::enqueue`](crate::Client::enqueue). From that point
/// the scheduler is the only writer; the caller reads progress between
/// `await_next_event` calls.
pub struct Request {
    pub(crate) id: RequestId,
    url: Url,
    method: Method,
    version: Version,
    headers: Vec<(String, String)>,
    pub(crate) body: Option<BodySource>,
    pub(crate) redirected_from: Option<RequestId>,
    pub(crate) redirected_to: Option<RequestId>,
    pub(crate) state: RequestState,
    pub(crate) error: Option<Error>,
    pub(crate) response: Option<Response>,
    pub(crate) events: EventSet,
    /// Decoded body bytes not yet handed to the caller. Drained whenever a
    /// `BodyChunkAvailable` event is delivered.
    pub(crate) body_buf: BytesMut,
}

impl Request {
    /// Start building a GET request.
    pub fn get(url: impl AsRef<str>) -> RequestBuilder {
        RequestBuilder::new(Method::GET, url)
    }

    /// Start building a POST request.
    pub fn post(url: impl AsRef<str>) -> RequestBuilder {
        RequestBuilder::new(Method::POST, url)
    }

    /// Start building a request with an arbitrary method.
    pub fn builder(method: Method, url: impl AsRef<str>) -> RequestBuilder {
        RequestBuilder::new(method, url)
    }

    pub(crate) fn from_parts(
        url: Url,
        method: Method,
        version: Version,
        headers: Vec<(String, String)>,
        body: Option<BodySource>,
    ) -> Self {
        Self {
            id: RequestId(0),
            url,
            method,
            version,
            headers,
            body,
            redirected_from: None,
            redirected_to: None,
            state: RequestState::Enqueued,
            error: None,
            response: None,
            events: EventSet::default(),
            body_buf: BytesMut::new(),
        }
    }

    /// The slab handle assigned at enqueue time.
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Absolute target URL.
    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// Caller-supplied headers in insertion order, casing preserved.
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn state(&self) -> RequestState {
        self.state
    }

    /// The failure that terminated this request, when state is `Failed`.
    pub fn error(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    /// The response head, once the first header block has parsed.
    pub fn response(&self) -> Option<&Response> {
        self.response.as_ref()
    }

    /// The request this one was spawned from by a redirect.
    pub fn redirected_from(&self) -> Option<RequestId> {
        self.redirected_from
    }

    /// The follow-up request spawned by this one's redirect response.
    pub fn redirected_to(&self) -> Option<RequestId> {
        self.redirected_to
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("id", &self.id)
            .field("method", &self.method)
            .field("url", &self.url.as_str())
            .field("state", &self.state)
            .field("redirected_from", &self.redirected_from)
            .field("redirected_to", &self.redirected_to)
            .finish_non_exhaustive()
    }
}

/// Builder returned by [`Request::get`] and friends.
pub struct RequestBuilder {
    url: String,
    method: Method,
    version: Version,
    headers: Vec<(String, String)>,
    body: Option<BodySource>,
}

impl RequestBuilder {
    fn new(method: Method, url: impl AsRef<str>) -> Self {
        Self {
            url: url.as_ref().to_owned(),
            method,
            version: Version::HTTP_11,
            headers: Vec::new(),
            body: None,
        }
    }

    /// Add a header. Later entries override defaults and earlier entries
    /// with the same name, compared case-insensitively, at serialize time.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Select `HTTP/1.0` or `HTTP/1.1` (the default) for the request line.
    #[must_use]
    pub fn version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    /// Attach an upload body. The caller supplies framing headers
    /// (`Content-Length` or `Transfer-Encoding`); none are synthesized.
    #[must_use]
    pub fn body(mut self, body: impl io::Read + 'static) -> Self {
        self.body = Some(Box::new(body));
        self
    }

    /// Finish building.
    ///
    /// # Errors
    ///
    /// Fails when the URL does not parse as an absolute URL. A parseable URL
    /// with an unsupported scheme is accepted here and fails later with an
    /// `InvalidScheme` `Failed` event, so that every scheme error reaches the
    /// caller the same way.
    pub fn build(self) -> Result<Request, Error> {
        let url = Url::parse(&self.url).map_err(|e| Error::new(Kind::Builder).with(e))?;
        Ok(Request::from_parts(
            url,
            self.method,
            self.version,
            self.headers,
            self.body,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_collects_parts() {
        let req = Request::post("http://example.com/upload?x=1")
            .header("Content-Length", "3")
            .header("X-Trace", "abc")
            .version(Version::HTTP_10)
            .body(std::io::Cursor::new(b"abc".to_vec()))
            .build()
            .expect("request should build");
        assert_eq!(req.method(), &Method::POST);
        assert_eq!(req.version(), Version::HTTP_10);
        assert_eq!(req.headers().len(), 2);
        assert!(req.body.is_some());
        assert_eq!(req.state(), RequestState::Enqueued);
    }

    #[test]
    fn relative_url_is_rejected() {
        let err = Request::get("/no-host").build().expect_err("must fail");
        assert_eq!(err.kind(), Kind::Builder);
    }

    #[test]
    fn unsupported_scheme_is_deferred_to_the_event_loop() {
        // ftp parses fine; the scheme check happens at admission.
        assert!(Request::get("ftp://example.com/f").build().is_ok());
    }

    #[test]
    fn state_classification() {
        assert!(RequestState::Failed.is_terminal());
        assert!(RequestState::Finished.is_terminal());
        assert!(!RequestState::Received.is_terminal());
        assert!(RequestState::ReceivingBody.is_active());
        assert!(!RequestState::Enqueued.is_active());
        assert!(!RequestState::Failed.is_active());
    }
}
