//! Progress events and the per-request pending-event set
//!
//! Every observable step of a request's life is announced as one of the five
//! `EventKind`s. The scheduler records them as bits per request; duplicates
//! collapse to a single pending bit until the caller consumes it.

/// The closed set of progress events a request can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// The response status line and headers are parsed and readable.
    GotHeaders,
    /// Decoded body bytes are buffered and ready to collect.
    BodyChunkAvailable,
    /// The response was a redirect and a follow-up request was enqueued.
    Redirect,
    /// The request terminated with an error; see `Request::error`.
    Failed,
    /// The request completed and its socket is closed.
    Finished,
}

impl EventKind {
    /// Delivery priority within one request, highest first.
    pub(crate) const PRIORITY: [EventKind; 5] = [
        EventKind::GotHeaders,
        EventKind::BodyChunkAvailable,
        EventKind::Redirect,
        EventKind::Failed,
        EventKind::Finished,
    ];

    fn bit(self) -> u8 {
        match self {
            EventKind::GotHeaders => 1 << 0,
            EventKind::BodyChunkAvailable => 1 << 1,
            EventKind::Redirect => 1 << 2,
            EventKind::Failed => 1 << 3,
            EventKind::Finished => 1 << 4,
        }
    }
}

/// Scope restriction for [`Client::await_next_event_for`](crate::Client::await_next_event_for).
///
/// A query scoped to specific requests also matches their redirect
/// descendants, so waiting on an original request keeps delivering events
/// after the exchange hops to a new URL.
#[derive(Debug, Clone, Default)]
pub struct EventQuery {
    pub(crate) requests: Option<Vec<crate::request::RequestId>>,
}

impl EventQuery {
    /// Match events of every request the client knows.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Match only the given requests and their redirect descendants.
    #[must_use]
    pub fn for_requests(ids: impl IntoIterator<Item = crate::request::RequestId>) -> Self {
        Self {
            requests: Some(ids.into_iter().collect()),
        }
    }
}

/// Pending events of one request, one bit per kind.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct EventSet(u8);

impl EventSet {
    pub(crate) fn set(&mut self, kind: EventKind) {
        self.0 |= kind.bit();
    }

    pub(crate) fn contains(self, kind: EventKind) -> bool {
        self.0 & kind.bit() != 0
    }

    /// Clears and returns the highest-priority pending event, if any.
    pub(crate) fn take_first(&mut self) -> Option<EventKind> {
        for kind in EventKind::PRIORITY {
            if self.contains(kind) {
                self.0 &= !kind.bit();
                return Some(kind);
            }
        }
        None
    }
}
