//! # Shoal public API
//!
//! Event-driven concurrent HTTP/1.1 downloads from a single thread of
//! execution. This crate is the public face of the implementation living in
//! `shoal_client`: it re-exports the client, the request builder, and the
//! event vocabulary, and adds the [`Fetch`] entry point for the common
//! patterns.
//!
//! ```no_run
//! use shoal::{EventKind, Fetch};
//!
//! # fn run() -> Result<(), shoal::Error> {
//! let mut client = Fetch::client()?;
//! let id = client.enqueue(Fetch::get("https://example.com/archive.tar.gz").build()?);
//!
//! let mut body = Vec::new();
//! while client.await_next_event() {
//!     if client.event() == Some(EventKind::BodyChunkAvailable) {
//!         body.extend_from_slice(&client.body_chunk().unwrap_or_default());
//!     }
//! }
//! println!("downloaded {} bytes of {}", body.len(), client.request(id).unwrap().url());
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(clippy::all)]

// Re-export the implementation surface.
pub use shoal_client::{
    BodySource, Client, ClientConfig, Error, EventKind, EventQuery, Kind, Request, RequestBuilder,
    RequestId, RequestState, Response,
};

/// Main entry point providing static shorthands.
pub struct Fetch;

impl Fetch {
    /// A client with the default configuration (concurrency 10, at most 3
    /// redirect hops).
    ///
    /// # Errors
    ///
    /// Fails when the platform readiness primitive cannot be created.
    pub fn client() -> Result<Client, Error> {
        Client::new(ClientConfig::default())
    }

    /// A client with a custom configuration.
    ///
    /// # Errors
    ///
    /// Fails on an invalid configuration or when the platform readiness
    /// primitive cannot be created.
    pub fn client_with(config: ClientConfig) -> Result<Client, Error> {
        Client::new(config)
    }

    /// Shorthand for [`Request::get`].
    pub fn get(url: impl AsRef<str>) -> RequestBuilder {
        Request::get(url)
    }

    /// Shorthand for [`Request::post`].
    pub fn post(url: impl AsRef<str>) -> RequestBuilder {
        Request::post(url)
    }
}
