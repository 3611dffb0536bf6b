//! Streaming body decoders
//!
//! A decoder chain sits between the raw socket bytes and the caller. Each
//! stage implements [`BodyStream`]: raw bytes are pushed in at the bottom with
//! [`feed`](BodyStream::feed), decoded bytes are pulled from the top with
//! [`read`](BodyStream::read), and no stage ever blocks — a read that has
//! nothing decodable yet returns an empty chunk, distinct from end-of-stream.
//!
//! The chain is built from the response's `Transfer-Encoding` and
//! `Content-Encoding` headers after the head parses; an identity response
//! keeps the bare [`RawSource`] as its stream.

mod chunked;
mod inflate;

use bytes::{Bytes, BytesMut};
use http::header::{HeaderMap, CONTENT_ENCODING, TRANSFER_ENCODING};

use crate::error::{Error, Kind};

pub(crate) use chunked::ChunkedDecoder;
pub(crate) use inflate::InflateDecoder;

/// Decode failure inside the chain. Surfaced to the caller as a
/// `Protocol`-class `Failed` event.
#[derive(Debug, thiserror::Error)]
pub(crate) enum DecodeError {
    #[error("chunked framing violated: {0}")]
    Chunked(&'static str),
    #[error("inflate failed")]
    Inflate(#[source] std::io::Error),
}

/// Pull-style decoded byte source over pushed raw input.
pub(crate) trait BodyStream {
    /// Push raw socket bytes into the bottom of the chain.
    fn feed(&mut self, bytes: &[u8]);

    /// Signal that the socket reached EOF; no more raw input will arrive.
    fn finish_input(&mut self);

    /// Pull up to `max` decoded bytes. An empty chunk means nothing is
    /// decodable right now; check [`is_eof`](Self::is_eof) to distinguish
    /// a dry stream from a finished one.
    fn read(&mut self, max: usize) -> Result<Bytes, DecodeError>;

    /// True once the decoded stream has ended.
    fn is_eof(&self) -> bool;
}

impl std::fmt::Debug for dyn BodyStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BodyStream").finish()
    }
}

/// Bottom of every chain: a plain buffer of raw socket bytes.
#[derive(Default)]
pub(crate) struct RawSource {
    buf: BytesMut,
    eof: bool,
}

impl RawSource {
    pub(crate) fn new() -> Self {
        Self::default()
    }
}

impl BodyStream for RawSource {
    fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    fn finish_input(&mut self) {
        self.eof = true;
    }

    fn read(&mut self, max: usize) -> Result<Bytes, DecodeError> {
        let n = self.buf.len().min(max);
        Ok(self.buf.split_to(n).freeze())
    }

    fn is_eof(&self) -> bool {
        self.eof && self.buf.is_empty()
    }
}

fn encoding_tokens(headers: &HeaderMap, name: http::header::HeaderName) -> Vec<String> {
    headers
        .get_all(name)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|token| token.trim().to_ascii_lowercase())
        .filter(|token| !token.is_empty())
        .collect()
}

/// Build the decoder chain for a parsed response head.
///
/// `Transfer-Encoding` tokens are applied first, then `Content-Encoding`
/// tokens that were not already applied; each supported token wraps the
/// current head of the chain. An unrecognized token fails the request.
pub(crate) fn build_pipeline(headers: &HeaderMap) -> Result<Box<dyn BodyStream>, Error> {
    let transfer = encoding_tokens(headers, TRANSFER_ENCODING);
    let content = encoding_tokens(headers, CONTENT_ENCODING);

    let mut head: Box<dyn BodyStream> = Box::new(RawSource::new());
    let content = content
        .iter()
        .filter(|token| !transfer.contains(*token));
    for token in transfer.iter().chain(content) {
        head = match token.as_str() {
            "chunked" => Box::new(ChunkedDecoder::new(head)),
            "gzip" => Box::new(InflateDecoder::gzip(head)),
            "deflate" => Box::new(InflateDecoder::deflate(head)),
            "identity" => head,
            other => {
                return Err(Error::new(Kind::UnsupportedEncoding)
                    .with(format!("unsupported transfer encoding: {other:?}")));
            }
        };
    }
    Ok(head)
}
