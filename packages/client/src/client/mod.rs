//! The request scheduler and its caller-facing API
//!
//! A [`Client`] owns every request it has ever accepted, the sockets of the
//! in-flight ones, and the decoder chains of the responses being read. All of
//! it runs on the caller's thread: [`Client::await_next_event`] drains a
//! pending event if one exists and otherwise ticks the event loop until one
//! appears or no work remains. Failures never escape as `Err`; they surface
//! as `Failed` events on the request that died.

mod tick;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use mio::{Events, Poll};

use crate::config::ClientConfig;
use crate::connect::Transport;
use crate::decode::BodyStream;
use crate::error::{Error, Kind};
use crate::events::{EventKind, EventQuery};
use crate::request::{Request, RequestId, RequestState};

/// Per-socket bookkeeping, created at admission and destroyed with the
/// socket when its request terminates.
pub(crate) struct Connection {
    pub(crate) transport: Transport,
    /// Accumulates header bytes until the block terminator arrives.
    pub(crate) header_buf: BytesMut,
    /// Staged outbound bytes: the serialized head, then upload body slices.
    pub(crate) write_buf: BytesMut,
    /// Decoder chain head once the response head has parsed.
    pub(crate) body: Option<Box<dyn BodyStream>>,
    /// Latched readiness. Set by poll events, cleared only when the matching
    /// I/O direction reports `WouldBlock`.
    pub(crate) readable: bool,
    pub(crate) writable: bool,
    pub(crate) socket_eof: bool,
    /// Whether any byte moved this tick; feeds the stall guard.
    pub(crate) progressed: bool,
    pub(crate) idle_ticks: u32,
}

impl Connection {
    fn new(transport: Transport) -> Self {
        Self {
            transport,
            header_buf: BytesMut::new(),
            write_buf: BytesMut::new(),
            body: None,
            readable: false,
            writable: false,
            socket_eof: false,
            progressed: false,
            idle_ticks: 0,
        }
    }
}

/// The most recently delivered event, overwritten by each
/// `await_next_event` call.
#[derive(Default)]
struct EventCursor {
    kind: Option<EventKind>,
    request: Option<RequestId>,
    chunk: Option<Bytes>,
}

/// Event-driven HTTP/1.1 client downloading many resources concurrently
/// from a single thread.
pub struct Client {
    config: ClientConfig,
    /// Every request ever enqueued, oldest first. Never shrinks, so event
    /// replay and redirect-chain walks stay valid for the client's lifetime.
    requests: Vec<Request>,
    connections: HashMap<usize, Connection>,
    poll: Poll,
    poll_events: Events,
    tls_config: Option<Arc<rustls::ClientConfig>>,
    cursor: EventCursor,
}

impl Client {
    /// Create a client.
    ///
    /// # Errors
    ///
    /// Fails when the configuration is invalid or the platform readiness
    /// primitive cannot be created.
    pub fn new(config: ClientConfig) -> Result<Client, Error> {
        config.validate()?;
        let poll = Poll::new().map_err(|e| Error::new(Kind::Readiness).with(e))?;
        Ok(Client {
            config,
            requests: Vec::new(),
            connections: HashMap::new(),
            poll,
            poll_events: Events::with_capacity(1024),
            tls_config: None,
            cursor: EventCursor::default(),
        })
    }

    /// The configuration this client was created with.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Append a request to the queue and return its handle. Returns
    /// immediately; the request is admitted by a later event-loop tick, once
    /// a concurrency slot is free.
    pub fn enqueue(&mut self, request: Request) -> RequestId {
        let id = self.push_request(request);
        tracing::debug!(request = %id, url = %self.requests[id.0].url(), "request enqueued");
        id
    }

    /// Enqueue several requests at once.
    pub fn enqueue_all(&mut self, requests: impl IntoIterator<Item = Request>) -> Vec<RequestId> {
        requests.into_iter().map(|r| self.enqueue(r)).collect()
    }

    pub(crate) fn push_request(&mut self, mut request: Request) -> RequestId {
        let id = RequestId(self.requests.len());
        request.id = id;
        self.requests.push(request);
        id
    }

    /// Cooperatively wait for the next event from any request.
    ///
    /// Returns `false` once no request has pending events and the loop has
    /// no more work. The delivered event is readable through
    /// [`event`](Self::event), [`event_request`](Self::event_request) and
    /// [`body_chunk`](Self::body_chunk) until the next call.
    pub fn await_next_event(&mut self) -> bool {
        self.await_next_event_for(&EventQuery::all())
    }

    /// Like [`await_next_event`](Self::await_next_event), restricted to the
    /// query's requests and their redirect descendants. Events of requests
    /// outside the scope are left pending for later waits.
    pub fn await_next_event_for(&mut self, query: &EventQuery) -> bool {
        loop {
            if let Some((id, kind)) = self.take_pending_event(query) {
                let chunk = (kind == EventKind::BodyChunkAvailable)
                    .then(|| self.requests[id.0].body_buf.split().freeze());
                tracing::debug!(request = %id, event = ?kind, "delivering event");
                self.cursor = EventCursor {
                    kind: Some(kind),
                    request: Some(id),
                    chunk,
                };
                return true;
            }
            if !self.event_loop_tick() {
                self.cursor = EventCursor::default();
                return false;
            }
        }
    }

    fn take_pending_event(&mut self, query: &EventQuery) -> Option<(RequestId, EventKind)> {
        let scope: Option<HashSet<usize>> = query.requests.as_ref().map(|ids| {
            let mut set = HashSet::new();
            for id in ids {
                let mut cursor = Some(id.0);
                while let Some(i) = cursor {
                    if !set.insert(i) {
                        break;
                    }
                    cursor = self
                        .requests
                        .get(i)
                        .and_then(|r| r.redirected_to)
                        .map(|r| r.0);
                }
            }
            set
        });
        for i in 0..self.requests.len() {
            if scope.as_ref().is_some_and(|s| !s.contains(&i)) {
                continue;
            }
            if let Some(kind) = self.requests[i].events.take_first() {
                return Some((RequestId(i), kind));
            }
        }
        None
    }

    /// Kind of the last delivered event.
    pub fn event(&self) -> Option<EventKind> {
        self.cursor.kind
    }

    /// Request the last delivered event belongs to.
    pub fn event_request(&self) -> Option<&Request> {
        self.cursor.request.and_then(|id| self.requests.get(id.0))
    }

    /// Decoded body bytes attached to the last `BodyChunkAvailable` event.
    ///
    /// Chunks coalesce: everything decoded since the previous delivery
    /// arrives as one buffer.
    pub fn body_chunk(&self) -> Option<Bytes> {
        self.cursor.chunk.clone()
    }

    /// Look up any request ever enqueued on this client.
    pub fn request(&self, id: RequestId) -> Option<&Request> {
        self.requests.get(id.0)
    }

    /// All requests, oldest first.
    pub fn requests(&self) -> impl Iterator<Item = &Request> {
        self.requests.iter()
    }

    /// Tear down one in-flight request. It terminates with a `Failed` event
    /// of kind [`Kind::Aborted`]; terminal requests are left untouched.
    pub fn abort(&mut self, id: RequestId) {
        let live = self
            .requests
            .get(id.0)
            .is_some_and(|r| !r.state().is_terminal());
        if live {
            self.fail(id.0, Error::new(Kind::Aborted));
        }
    }

    /// Record a failure: the request goes terminal, its socket closes, and a
    /// `Failed` event becomes pending.
    pub(crate) fn fail(&mut self, id: usize, error: Error) {
        tracing::warn!(request = %RequestId(id), %error, "request failed");
        self.close_connection(id);
        let req = &mut self.requests[id];
        req.state = RequestState::Failed;
        req.error = Some(error);
        req.events.set(EventKind::Failed);
    }

    /// Finish a request. Redirected requests suppress the `Finished` event:
    /// their last word is `Redirect`.
    pub(crate) fn complete(&mut self, id: usize, emit_finished: bool) {
        tracing::debug!(request = %RequestId(id), "request finished");
        self.close_connection(id);
        let req = &mut self.requests[id];
        req.state = RequestState::Finished;
        if emit_finished {
            req.events.set(EventKind::Finished);
        }
    }

    pub(crate) fn close_connection(&mut self, id: usize) {
        if let Some(mut conn) = self.connections.remove(&id) {
            let _ = self.poll.registry().deregister(conn.transport.socket_mut());
        }
    }
}
