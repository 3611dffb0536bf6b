//! Error type surfaced through `Failed` events
//!
//! Nothing in this crate propagates an error out of the event loop. A failure
//! terminates its own request, is recorded on it, and reaches the caller as a
//! `Failed` event; `Error` is the payload of that record.

use std::error::Error as StdError;
use std::fmt;

/// A `Result` alias where the `Err` case is `shoal_client::Error`.
pub type Result<T> = std::result::Result<T, Error>;

/// Represents a failure of a single request.
pub struct Error {
    inner: Box<Inner>,
}

struct Inner {
    kind: Kind,
    source: Option<Box<dyn StdError + Send + Sync>>,
    url: Option<url::Url>,
}

/// The class of failure, one per way a request can die.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// Request construction rejected before enqueueing (unparseable URL).
    Builder,
    /// URL scheme is neither `http` nor `https`.
    InvalidScheme,
    /// Socket creation, name resolution, or asynchronous connect failed.
    Connect,
    /// TLS handshake returned a hard failure.
    Tls,
    /// Header or body write to the socket failed.
    Write,
    /// Reading the caller-supplied upload body failed.
    UploadRead,
    /// Malformed status line or violated chunked-framing invariant.
    Protocol,
    /// Transfer/Content-Encoding token outside the supported set.
    UnsupportedEncoding,
    /// Redirect chain exceeded the configured bound.
    TooManyRedirects,
    /// A `Location` header resolved to an invalid URL.
    InvalidRedirectUrl,
    /// The readiness primitive itself failed.
    Readiness,
    /// No byte progress for the configured number of ticks.
    Stalled,
    /// The caller tore the request down via `Client::abort`.
    Aborted,
}

impl Error {
    pub(crate) fn new(kind: Kind) -> Error {
        Error {
            inner: Box::new(Inner {
                kind,
                source: None,
                url: None,
            }),
        }
    }

    #[must_use = "builder methods return a new Error and should be used"]
    pub(crate) fn with<E: Into<Box<dyn StdError + Send + Sync>>>(mut self, source: E) -> Error {
        self.inner.source = Some(source.into());
        self
    }

    #[must_use]
    pub(crate) fn with_url(mut self, url: url::Url) -> Error {
        self.inner.url = Some(url);
        self
    }

    /// The failure class.
    pub fn kind(&self) -> Kind {
        self.inner.kind
    }

    /// The URL associated with this error, if any.
    pub fn url(&self) -> Option<&url::Url> {
        self.inner.url.as_ref()
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut f = f.debug_struct("shoal::Error");

        f.field("kind", &self.inner.kind);

        if let Some(ref source) = self.inner.source {
            f.field("source", source);
        }

        if let Some(ref url) = self.inner.url {
            f.field("url", url);
        }

        f.finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self.inner.kind {
            Kind::Builder => "invalid request",
            Kind::InvalidScheme => "unsupported URL scheme",
            Kind::Connect => "connection failed",
            Kind::Tls => "TLS handshake failed",
            Kind::Write => "socket write failed",
            Kind::UploadRead => "error reading the upload body",
            Kind::Protocol => "malformed HTTP response",
            Kind::UnsupportedEncoding => "unsupported transfer encoding",
            Kind::TooManyRedirects => "too many redirects",
            Kind::InvalidRedirectUrl => "invalid redirect URL",
            Kind::Readiness => "socket readiness poll failed",
            Kind::Stalled => "connection made no progress",
            Kind::Aborted => "request aborted",
        };
        f.write_str(msg)?;

        if let Some(ref url) = self.inner.url {
            write!(f, " ({url})")?;
        }

        if let Some(ref source) = self.inner.source {
            write!(f, ": {source}")?;
        }

        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.inner
            .source
            .as_ref()
            .map(|err| &**err as &(dyn StdError + 'static))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_source_chain() {
        let err = Error::new(Kind::Connect).with(std::io::Error::other("refused"));
        let rendered = err.to_string();
        assert!(rendered.starts_with("connection failed"));
        assert!(rendered.contains("refused"));
    }

    #[test]
    fn url_context_is_kept() {
        let url = url::Url::parse("http://example.com/a").expect("test URL should parse");
        let err = Error::new(Kind::TooManyRedirects).with_url(url.clone());
        assert_eq!(err.url(), Some(&url));
        assert_eq!(err.kind(), Kind::TooManyRedirects);
    }
}
