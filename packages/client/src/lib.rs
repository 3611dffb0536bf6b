//! # Shoal HTTP client
//!
//! A cooperative, event-driven HTTP/1.1 client that downloads many resources
//! concurrently from a single thread. Non-blocking sockets are multiplexed
//! over one readiness poll; each request moves through a small lifecycle
//! state machine; chunked transfer framing and gzip/deflate content
//! encodings are decoded as bytes arrive; redirects are followed up to a
//! configured bound. Progress reaches the caller as a stream of discrete
//! events, pulled one at a time.
//!
//! Every connection is single-use (`Connection: close`): no keep-alive, no
//! pipelining, no HTTP/2.
//!
//! ```no_run
//! use shoal_client::{Client, ClientConfig, EventKind, Request};
//!
//! # fn run() -> Result<(), shoal_client::Error> {
//! let mut client = Client::new(ClientConfig::default())?;
//! client.enqueue(Request::get("https://example.com/a.bin").build()?);
//! client.enqueue(Request::get("https://example.com/b.bin").build()?);
//!
//! while client.await_next_event() {
//!     match client.event() {
//!         Some(EventKind::GotHeaders) => {
//!             let status = client.event_request().and_then(|r| r.response()).map(|r| r.status());
//!             println!("headers in: {status:?}");
//!         }
//!         Some(EventKind::BodyChunkAvailable) => {
//!             let chunk = client.body_chunk().unwrap_or_default();
//!             println!("{} body bytes", chunk.len());
//!         }
//!         Some(EventKind::Failed) => {
//!             let error = client.event_request().and_then(|r| r.error());
//!             eprintln!("failed: {error:?}");
//!         }
//!         _ => {}
//!     }
//! }
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(clippy::all)]

pub mod client;
pub mod config;
mod connect;
mod decode;
pub mod error;
pub mod events;
mod headers;
mod redirect;
pub mod request;
pub mod response;

pub use client::Client;
pub use config::ClientConfig;
pub use error::{Error, Kind};
pub use events::{EventKind, EventQuery};
pub use request::{BodySource, Request, RequestBuilder, RequestId, RequestState};
pub use response::Response;
