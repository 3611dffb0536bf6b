//! Chunked transfer decoding (RFC 7230 section 4.1)

use bytes::{Buf, Bytes, BytesMut};

use super::{BodyStream, DecodeError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Expecting a hex size line, optionally with a `;extension`.
    ScanChunkSize,
    /// Copying chunk payload bytes through to the output.
    ScanChunkData,
    /// Expecting the CRLF that closes a chunk's payload.
    ScanChunkTrailer,
    /// Saw the zero-size chunk; the stream is over. Absorbing.
    ScanFinalChunk,
}

/// Decodes a chunked body pulled from `upstream`.
///
/// Every transition tolerates a partial buffer: when the bytes a state needs
/// have not arrived yet, the machine parks and `read` returns whatever was
/// already decoded.
pub(crate) struct ChunkedDecoder {
    upstream: Box<dyn BodyStream>,
    raw: BytesMut,
    decoded: BytesMut,
    state: State,
    remaining: u64,
}

impl ChunkedDecoder {
    pub(crate) fn new(upstream: Box<dyn BodyStream>) -> Self {
        Self {
            upstream,
            raw: BytesMut::new(),
            decoded: BytesMut::new(),
            state: State::ScanChunkSize,
            remaining: 0,
        }
    }

    fn pull_upstream(&mut self) -> Result<(), DecodeError> {
        loop {
            let chunk = self.upstream.read(8192)?;
            if chunk.is_empty() {
                return Ok(());
            }
            self.raw.extend_from_slice(&chunk);
        }
    }

    /// Advance the machine as far as the raw buffer allows.
    fn run(&mut self) -> Result<(), DecodeError> {
        loop {
            match self.state {
                State::ScanChunkSize => {
                    let digits = self
                        .raw
                        .iter()
                        .take_while(|b| b.is_ascii_hexdigit())
                        .count();
                    if digits == self.raw.len() {
                        // The size line may still be streaming in.
                        return Ok(());
                    }
                    if digits == 0 {
                        return Err(DecodeError::Chunked("missing chunk size"));
                    }
                    match self.raw[digits] {
                        b';' | b'\r' => {}
                        _ => return Err(DecodeError::Chunked("invalid byte after chunk size")),
                    }
                    let Some(line_end) = self.raw.windows(2).position(|w| w == b"\r\n") else {
                        return Ok(());
                    };
                    let size_text = std::str::from_utf8(&self.raw[..digits])
                        .map_err(|_| DecodeError::Chunked("invalid chunk size"))?;
                    let size = u64::from_str_radix(size_text, 16)
                        .map_err(|_| DecodeError::Chunked("chunk size overflow"))?;
                    self.raw.advance(line_end + 2);
                    if size == 0 {
                        self.state = State::ScanFinalChunk;
                    } else {
                        self.remaining = size;
                        self.state = State::ScanChunkData;
                    }
                }
                State::ScanChunkData => {
                    if self.raw.is_empty() {
                        return Ok(());
                    }
                    let n = (self.raw.len() as u64).min(self.remaining) as usize;
                    self.decoded.extend_from_slice(&self.raw.split_to(n));
                    self.remaining -= n as u64;
                    if self.remaining > 0 {
                        return Ok(());
                    }
                    self.state = State::ScanChunkTrailer;
                }
                State::ScanChunkTrailer => {
                    if self.raw.len() < 2 {
                        return Ok(());
                    }
                    if &self.raw[..2] != b"\r\n" {
                        return Err(DecodeError::Chunked("missing CRLF after chunk data"));
                    }
                    self.raw.advance(2);
                    self.state = State::ScanChunkSize;
                }
                State::ScanFinalChunk => {
                    // Trailer section, if any, is dropped.
                    self.raw.clear();
                    return Ok(());
                }
            }
        }
    }
}

impl BodyStream for ChunkedDecoder {
    fn feed(&mut self, bytes: &[u8]) {
        self.upstream.feed(bytes);
    }

    fn finish_input(&mut self) {
        self.upstream.finish_input();
    }

    fn read(&mut self, max: usize) -> Result<Bytes, DecodeError> {
        self.pull_upstream()?;
        self.run()?;
        let n = self.decoded.len().min(max);
        Ok(self.decoded.split_to(n).freeze())
    }

    fn is_eof(&self) -> bool {
        self.state == State::ScanFinalChunk && self.decoded.is_empty()
    }
}
