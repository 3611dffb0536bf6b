//! One pass of the event loop
//!
//! A tick admits queued requests under the concurrency cap, takes one
//! bounded readiness sample, and then runs the per-state batches in a fixed
//! order, so a response whose bytes are already buffered can cross several
//! states within a single pass.

use std::io;
use std::time::Duration;

use bytes::Buf;
use http::Method;
use mio::{Interest, Token};
use url::Url;

use crate::connect::{self, HandshakeProgress, Transport};
use crate::decode;
use crate::error::{Error, Kind};
use crate::events::EventKind;
use crate::headers;
use crate::redirect;
use crate::request::{Request, RequestId, RequestState};

use super::{Client, Connection};

const POLL_TIMEOUT: Duration = Duration::from_millis(50);
/// A server still sending its header block past this is not speaking HTTP.
const MAX_HEADER_BYTES: usize = 64 * 1024;
/// Body bytes moved per read call.
const BODY_CHUNK: usize = 8 * 1024;

impl Connection {
    /// Flush staged outbound bytes. `Ok(true)` once everything, including
    /// queued TLS records, is on the wire.
    fn flush(&mut self) -> io::Result<bool> {
        while !self.write_buf.is_empty() {
            match self.transport.write(&self.write_buf) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => {
                    self.progressed = true;
                    self.write_buf.advance(n);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.writable = false;
                    return Ok(false);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        if self.transport.has_pending_write() {
            match self.transport.flush_pending() {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.writable = false;
                    return Ok(false);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(true)
    }
}

impl Client {
    /// Run one scheduler pass. Returns `true` while at least one request had
    /// work at the start of the pass.
    pub(crate) fn event_loop_tick(&mut self) -> bool {
        let admitted = self.collect_active();
        if admitted.is_empty() {
            return false;
        }
        for &id in &admitted {
            if self.requests[id].state == RequestState::Enqueued {
                self.open_connection(id);
            }
        }
        self.poll_readiness();
        self.drive_crypto();
        self.send_headers();
        self.send_body();
        self.receive_headers();
        self.receive_body();
        self.finalize_received();
        self.tick_idle_guard();
        true
    }

    /// Active requests plus as many queued ones as free concurrency slots,
    /// oldest first. Queue order is never reshuffled.
    fn collect_active(&self) -> Vec<usize> {
        let mut active: Vec<usize> = self
            .requests
            .iter()
            .enumerate()
            .filter(|(_, r)| r.state().is_active())
            .map(|(i, _)| i)
            .collect();
        let mut slots = self.config.concurrency.saturating_sub(active.len());
        if slots > 0 {
            for (i, req) in self.requests.iter().enumerate() {
                if slots == 0 {
                    break;
                }
                if req.state() == RequestState::Enqueued {
                    active.push(i);
                    slots -= 1;
                }
            }
        }
        active
    }

    /// Batch 1: open a non-blocking socket for an admitted request.
    fn open_connection(&mut self, id: usize) {
        let url = self.requests[id].url().clone();
        match url.scheme() {
            "http" | "https" => {}
            other => {
                self.fail(
                    id,
                    Error::new(Kind::InvalidScheme)
                        .with(format!("scheme {other:?} is not supported"))
                        .with_url(url.clone()),
                );
                return;
            }
        }

        let mut sock = match connect::open_socket(&url) {
            Ok(sock) => sock,
            Err(e) => {
                self.fail(id, e);
                return;
            }
        };
        if let Err(e) = self.poll.registry().register(
            &mut sock,
            Token(id),
            Interest::READABLE | Interest::WRITABLE,
        ) {
            self.fail(id, Error::new(Kind::Readiness).with(e));
            return;
        }

        let secure = url.scheme() == "https";
        let transport = if secure {
            let config = self.tls_config.get_or_insert_with(connect::tls_config).clone();
            match Transport::tls(sock, config, url.host_str().unwrap_or_default()) {
                Ok(transport) => transport,
                Err(e) => {
                    self.fail(id, e);
                    return;
                }
            }
        } else {
            Transport::plain(sock)
        };

        let mut conn = Connection::new(transport);
        conn.write_buf
            .extend_from_slice(&headers::serialize_request_head(&self.requests[id]));
        self.connections.insert(id, conn);
        self.requests[id].state = if secure {
            RequestState::WillEnableCrypto
        } else {
            RequestState::WillSendHeaders
        };
        tracing::debug!(request = %RequestId(id), url = %url, secure, "connection opened");
    }

    /// One bounded readiness sample, latched into per-connection flags. A
    /// timeout is a normal no-op; a primitive failure kills every request
    /// currently holding a socket and the loop carries on.
    fn poll_readiness(&mut self) {
        if self.connections.is_empty() {
            return;
        }
        if let Err(e) = self.poll.poll(&mut self.poll_events, Some(POLL_TIMEOUT)) {
            if e.kind() == io::ErrorKind::Interrupted {
                return;
            }
            tracing::warn!(error = %e, "readiness poll failed");
            let waiting: Vec<usize> = self.connections.keys().copied().collect();
            let message = e.to_string();
            for id in waiting {
                self.fail(id, Error::new(Kind::Readiness).with(message.clone()));
            }
            return;
        }
        for event in self.poll_events.iter() {
            if let Some(conn) = self.connections.get_mut(&event.token().0) {
                // Error and closed notifications latch both directions so the
                // next I/O attempt observes the failure or the EOF.
                if event.is_readable() || event.is_read_closed() || event.is_error() {
                    conn.readable = true;
                }
                if event.is_writable() || event.is_write_closed() || event.is_error() {
                    conn.writable = true;
                }
            }
        }
    }

    /// Batch 2: advance TLS handshakes.
    fn drive_crypto(&mut self) {
        enum Step {
            Wait,
            Done,
            Fail(Error),
        }
        for id in 0..self.requests.len() {
            if self.requests[id].state != RequestState::WillEnableCrypto {
                continue;
            }
            let step = {
                let Some(conn) = self.connections.get_mut(&id) else {
                    continue;
                };
                if !conn.readable && !conn.writable {
                    continue;
                }
                if let Some(err) = conn.transport.take_connect_error() {
                    Step::Fail(Error::new(Kind::Connect).with(err))
                } else {
                    match conn.transport.drive_handshake() {
                        Ok(HandshakeProgress::Done) => {
                            conn.progressed = true;
                            Step::Done
                        }
                        Ok(HandshakeProgress::NeedsRead) => {
                            conn.readable = false;
                            Step::Wait
                        }
                        Ok(HandshakeProgress::NeedsWrite) => {
                            conn.writable = false;
                            Step::Wait
                        }
                        Err(e) => Step::Fail(e),
                    }
                }
            };
            match step {
                Step::Done => {
                    tracing::debug!(request = %RequestId(id), "TLS handshake complete");
                    self.requests[id].state = RequestState::WillSendHeaders;
                }
                Step::Fail(e) => self.fail(id, e),
                Step::Wait => {}
            }
        }
    }

    /// Batch 3: write the serialized request head.
    fn send_headers(&mut self) {
        enum Step {
            Wait,
            Sent,
            Fail(Error),
        }
        for id in 0..self.requests.len() {
            if self.requests[id].state != RequestState::WillSendHeaders {
                continue;
            }
            let step = {
                let Some(conn) = self.connections.get_mut(&id) else {
                    continue;
                };
                if !conn.writable {
                    continue;
                }
                if let Some(err) = conn.transport.take_connect_error() {
                    Step::Fail(Error::new(Kind::Connect).with(err))
                } else {
                    match conn.flush() {
                        Ok(true) => Step::Sent,
                        Ok(false) => Step::Wait,
                        Err(e) => Step::Fail(Error::new(Kind::Write).with(e)),
                    }
                }
            };
            match step {
                Step::Sent => {
                    tracing::debug!(request = %RequestId(id), "request head sent");
                    self.requests[id].state = if self.requests[id].body.is_some() {
                        RequestState::WillSendBody
                    } else {
                        RequestState::ReceivingHeaders
                    };
                }
                Step::Fail(e) => self.fail(id, e),
                Step::Wait => {}
            }
        }
    }

    /// Batch 4: stream the upload body until its source reports EOF.
    fn send_body(&mut self) {
        enum Step {
            Wait,
            Sent,
            Fail(Error),
        }
        'outer: for id in 0..self.requests.len() {
            if self.requests[id].state != RequestState::WillSendBody {
                continue;
            }
            let step = 'step: {
                let Some(conn) = self.connections.get_mut(&id) else {
                    continue 'outer;
                };
                if !conn.writable {
                    continue 'outer;
                }
                loop {
                    match conn.flush() {
                        Ok(true) => {}
                        Ok(false) => break 'step Step::Wait,
                        Err(e) => break 'step Step::Fail(Error::new(Kind::Write).with(e)),
                    }
                    // Staging area drained; pull the next upload slice.
                    let req = &mut self.requests[id];
                    let Some(body) = req.body.as_mut() else {
                        break 'step Step::Sent;
                    };
                    let mut tmp = [0u8; BODY_CHUNK];
                    match body.read(&mut tmp) {
                        Ok(0) => {
                            req.body = None;
                            break 'step Step::Sent;
                        }
                        Ok(n) => conn.write_buf.extend_from_slice(&tmp[..n]),
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                        Err(e) => break 'step Step::Fail(Error::new(Kind::UploadRead).with(e)),
                    }
                }
            };
            match step {
                Step::Sent => {
                    tracing::debug!(request = %RequestId(id), "upload body sent");
                    self.requests[id].state = RequestState::ReceivingHeaders;
                }
                Step::Fail(e) => self.fail(id, e),
                Step::Wait => {}
            }
        }
    }

    /// Batch 5: accumulate header bytes one at a time until the blank line.
    ///
    /// Byte-at-a-time reading guarantees the socket is left positioned at
    /// the first body byte when the terminator arrives.
    fn receive_headers(&mut self) {
        enum Step {
            Wait,
            Parse,
            Fail(Error),
        }
        'outer: for id in 0..self.requests.len() {
            if self.requests[id].state != RequestState::ReceivingHeaders {
                continue;
            }
            let step = 'step: {
                let Some(conn) = self.connections.get_mut(&id) else {
                    continue 'outer;
                };
                if !conn.readable {
                    continue 'outer;
                }
                let mut byte = [0u8; 1];
                loop {
                    match conn.transport.read(&mut byte) {
                        Ok(0) => {
                            break 'step Step::Fail(
                                Error::new(Kind::Protocol)
                                    .with("connection closed before the response head completed"),
                            );
                        }
                        Ok(_) => {
                            conn.progressed = true;
                            conn.header_buf.extend_from_slice(&byte);
                            if conn.header_buf.ends_with(b"\r\n\r\n") {
                                break 'step Step::Parse;
                            }
                            if conn.header_buf.len() > MAX_HEADER_BYTES {
                                break 'step Step::Fail(
                                    Error::new(Kind::Protocol).with("response head too large"),
                                );
                            }
                        }
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                            conn.readable = false;
                            break 'step Step::Wait;
                        }
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                        Err(e) => break 'step Step::Fail(Error::new(Kind::Protocol).with(e)),
                    }
                }
            };
            match step {
                Step::Parse => self.parse_response_head(id),
                Step::Fail(e) => self.fail(id, e),
                Step::Wait => {}
            }
        }
    }

    /// Parse the accumulated head, decide redirect-vs-body, and build the
    /// decoder chain for body responses.
    fn parse_response_head(&mut self, id: usize) {
        let Some(raw) = self
            .connections
            .get_mut(&id)
            .map(|c| c.header_buf.split().freeze())
        else {
            return;
        };
        let resp = match headers::parse_response_head(&raw) {
            Ok(resp) => resp,
            Err(e) => {
                self.fail(id, e);
                return;
            }
        };
        tracing::debug!(request = %RequestId(id), status = %resp.status(), "response head parsed");

        if resp.is_redirect() {
            // Redirect candidates skip the body; batch 7 decides the hop.
            self.requests[id].response = Some(resp);
            self.requests[id].state = RequestState::Received;
            return;
        }

        match decode::build_pipeline(resp.headers()) {
            Ok(stream) => {
                if let Some(conn) = self.connections.get_mut(&id) {
                    conn.body = Some(stream);
                }
                let req = &mut self.requests[id];
                req.response = Some(resp);
                req.state = RequestState::ReceivingBody;
                req.events.set(EventKind::GotHeaders);
            }
            Err(e) => {
                self.requests[id].response = Some(resp);
                self.fail(id, e);
            }
        }
    }

    /// Batch 6: move socket bytes into the decoder chain and decoded bytes
    /// into the caller-visible buffer.
    fn receive_body(&mut self) {
        enum Step {
            Wait,
            Done,
            Truncated,
            Fail(Error),
        }
        'outer: for id in 0..self.requests.len() {
            if self.requests[id].state != RequestState::ReceivingBody {
                continue;
            }
            let step = 'step: {
                let Some(conn) = self.connections.get_mut(&id) else {
                    continue 'outer;
                };
                let Some(body) = conn.body.as_mut() else {
                    continue 'outer;
                };

                if conn.readable && !conn.socket_eof {
                    let mut tmp = [0u8; BODY_CHUNK];
                    loop {
                        match conn.transport.read(&mut tmp) {
                            Ok(0) => {
                                conn.socket_eof = true;
                                conn.progressed = true;
                                body.finish_input();
                                break;
                            }
                            Ok(n) => {
                                tracing::trace!(request = %RequestId(id), bytes = n, "raw body bytes");
                                conn.progressed = true;
                                body.feed(&tmp[..n]);
                            }
                            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                                conn.readable = false;
                                break;
                            }
                            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                            Err(e) => {
                                tracing::warn!(request = %RequestId(id), error = %e, "socket read failed; treating as EOF");
                                conn.socket_eof = true;
                                body.finish_input();
                                break;
                            }
                        }
                    }
                }

                let req = &mut self.requests[id];
                loop {
                    match body.read(BODY_CHUNK) {
                        Ok(chunk) if chunk.is_empty() => break,
                        Ok(chunk) => {
                            conn.progressed = true;
                            if let Some(resp) = req.response.as_mut() {
                                resp.add_received(chunk.len() as u64);
                            }
                            req.body_buf.extend_from_slice(&chunk);
                            req.events.set(EventKind::BodyChunkAvailable);
                        }
                        Err(e) => break 'step Step::Fail(Error::new(Kind::Protocol).with(e)),
                    }
                }

                if body.is_eof() {
                    Step::Done
                } else if conn.socket_eof {
                    Step::Truncated
                } else {
                    Step::Wait
                }
            };
            match step {
                Step::Done => {
                    tracing::debug!(request = %RequestId(id), "response body complete");
                    self.requests[id].state = RequestState::Received;
                }
                Step::Truncated => {
                    self.fail(
                        id,
                        Error::new(Kind::Protocol).with("connection closed mid-body"),
                    );
                }
                Step::Fail(e) => self.fail(id, e),
                Step::Wait => {}
            }
        }
    }

    /// Batch 7: follow redirects and finalize everything else.
    fn finalize_received(&mut self) {
        enum Decision {
            Finish,
            Follow(Url, Method),
            Fail(Error),
        }
        for id in 0..self.requests.len() {
            if self.requests[id].state != RequestState::Received {
                continue;
            }
            let decision = {
                let req = &self.requests[id];
                match req.response.as_ref() {
                    Some(resp) if resp.is_redirect() => match resp.header("location") {
                        Some(location) => {
                            if redirect::hop_count(&self.requests, id) >= self.config.max_redirects
                            {
                                Decision::Fail(Error::new(Kind::TooManyRedirects).with(format!(
                                    "stopped after {} hops",
                                    self.config.max_redirects
                                )))
                            } else {
                                match redirect::resolve_location(req.url(), location) {
                                    Ok(url) => {
                                        // 307/308 preserve the method; the
                                        // other redirects downgrade to GET.
                                        // Bodies are never replayed.
                                        let method =
                                            if matches!(resp.status().as_u16(), 307 | 308) {
                                                req.method().clone()
                                            } else {
                                                Method::GET
                                            };
                                        Decision::Follow(url, method)
                                    }
                                    Err(e) => Decision::Fail(e),
                                }
                            }
                        }
                        None => Decision::Finish,
                    },
                    _ => Decision::Finish,
                }
            };
            match decision {
                Decision::Finish => self.complete(id, true),
                Decision::Fail(e) => self.fail(id, e),
                Decision::Follow(url, method) => {
                    let parent = &self.requests[id];
                    let mut child = Request::from_parts(
                        url.clone(),
                        method,
                        parent.version(),
                        parent.headers().to_vec(),
                        None,
                    );
                    child.redirected_from = Some(RequestId(id));
                    let child_id = self.push_request(child);
                    self.requests[id].redirected_to = Some(child_id);
                    self.requests[id].events.set(EventKind::Redirect);
                    tracing::debug!(request = %RequestId(id), child = %child_id, url = %url, "following redirect");
                    self.complete(id, false);
                }
            }
        }
    }

    /// Stall accounting; only fails requests when the guard is enabled.
    fn tick_idle_guard(&mut self) {
        let mut stalled = Vec::new();
        for (&id, conn) in self.connections.iter_mut() {
            if conn.progressed {
                conn.idle_ticks = 0;
            } else {
                conn.idle_ticks += 1;
            }
            conn.progressed = false;
            if let Some(max) = self.config.max_idle_ticks {
                if conn.idle_ticks >= max {
                    stalled.push(id);
                }
            }
        }
        for id in stalled {
            self.fail(id, Error::new(Kind::Stalled));
        }
    }
}
