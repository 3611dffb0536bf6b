//! Gzip and raw-deflate decoding over `flate2`

use std::io::{self, BufRead, Read};

use bytes::{Buf, Bytes, BytesMut};
use flate2::bufread::{DeflateDecoder, GzDecoder};

use super::{BodyStream, DecodeError};

/// Buffer the flate2 decoders read compressed input from.
///
/// While dry and not at EOF it reads as `WouldBlock`, which the flate2
/// bufread decoders surface without losing state, so decoding resumes
/// cleanly once more bytes are appended.
#[derive(Default)]
struct FeedBuf {
    buf: BytesMut,
    eof: bool,
}

impl BufRead for FeedBuf {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        if self.buf.is_empty() && !self.eof {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        Ok(&self.buf)
    }

    fn consume(&mut self, amt: usize) {
        self.buf.advance(amt);
    }
}

impl Read for FeedBuf {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let available = self.fill_buf()?;
        let n = available.len().min(out.len());
        out[..n].copy_from_slice(&available[..n]);
        self.consume(n);
        Ok(n)
    }
}

enum Backend {
    Gzip(GzDecoder<FeedBuf>),
    Deflate(DeflateDecoder<FeedBuf>),
}

impl Backend {
    fn feed_buf(&mut self) -> &mut FeedBuf {
        match self {
            Backend::Gzip(decoder) => decoder.get_mut(),
            Backend::Deflate(decoder) => decoder.get_mut(),
        }
    }

    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        match self {
            Backend::Gzip(decoder) => decoder.read(out),
            Backend::Deflate(decoder) => decoder.read(out),
        }
    }
}

/// Decompresses bytes pulled from `upstream`, in the format chosen at
/// construction. End-of-stream follows the inflate library's completion
/// signal (the gzip trailer or the final deflate block).
pub(crate) struct InflateDecoder {
    upstream: Box<dyn BodyStream>,
    backend: Backend,
    finished: bool,
}

impl InflateDecoder {
    pub(crate) fn gzip(upstream: Box<dyn BodyStream>) -> Self {
        Self {
            upstream,
            backend: Backend::Gzip(GzDecoder::new(FeedBuf::default())),
            finished: false,
        }
    }

    pub(crate) fn deflate(upstream: Box<dyn BodyStream>) -> Self {
        Self {
            upstream,
            backend: Backend::Deflate(DeflateDecoder::new(FeedBuf::default())),
            finished: false,
        }
    }
}

impl BodyStream for InflateDecoder {
    fn feed(&mut self, bytes: &[u8]) {
        self.upstream.feed(bytes);
    }

    fn finish_input(&mut self) {
        self.upstream.finish_input();
    }

    fn read(&mut self, max: usize) -> Result<Bytes, DecodeError> {
        if self.finished || max == 0 {
            return Ok(Bytes::new());
        }

        loop {
            let chunk = self.upstream.read(8192)?;
            if chunk.is_empty() {
                break;
            }
            self.backend.feed_buf().buf.extend_from_slice(&chunk);
        }
        if self.upstream.is_eof() {
            self.backend.feed_buf().eof = true;
        }

        let mut out = vec![0u8; max];
        match self.backend.read(&mut out) {
            Ok(0) => {
                self.finished = true;
                Ok(Bytes::new())
            }
            Ok(n) => {
                out.truncate(n);
                Ok(out.into())
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(Bytes::new()),
            Err(e) => Err(DecodeError::Inflate(e)),
        }
    }

    fn is_eof(&self) -> bool {
        self.finished
    }
}
