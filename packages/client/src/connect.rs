//! Non-blocking transport: TCP connect, optional TLS, uniform byte I/O
//!
//! Sockets are non-blocking from creation; rustls tolerates handshaking over
//! non-blocking I/O, so there is no deferred non-blocking flip. `WouldBlock`
//! from any operation means "retry on the next readiness pass", never
//! end-of-stream.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;

use mio::net::TcpStream;
use url::Url;

use crate::error::{Error, Kind};

/// Resolve the URL's host and open an asynchronous TCP connect towards it.
///
/// Name resolution is the one potentially slow call here; the connect itself
/// returns immediately and completes under the readiness loop.
pub(crate) fn open_socket(url: &Url) -> Result<TcpStream, Error> {
    let host = url
        .host_str()
        .ok_or_else(|| Error::new(Kind::Connect).with("URL has no host"))?;
    let port = url.port_or_known_default().unwrap_or(80);
    let addr = resolve(host, port)?;
    tracing::debug!(%host, %port, %addr, "opening socket");
    TcpStream::connect(addr)
        .map_err(|e| Error::new(Kind::Connect).with(e).with_url(url.clone()))
}

fn resolve(host: &str, port: u16) -> Result<SocketAddr, Error> {
    let mut addrs = (host, port)
        .to_socket_addrs()
        .map_err(|e| Error::new(Kind::Connect).with(e))?;
    addrs
        .next()
        .ok_or_else(|| Error::new(Kind::Connect).with(format!("no address found for {host:?}")))
}

/// TLS client configuration shared by every HTTPS request of one client.
pub(crate) fn tls_config() -> Arc<rustls::ClientConfig> {
    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    Arc::new(
        rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth(),
    )
}

/// Outcome of one handshake pass.
pub(crate) enum HandshakeProgress {
    Done,
    /// Blocked until the socket is readable again.
    NeedsRead,
    /// Blocked until the socket is writable again.
    NeedsWrite,
}

/// A connected socket, plain or wrapped in TLS.
pub(crate) enum Transport {
    Plain(TcpStream),
    Tls(Box<TlsTransport>),
}

pub(crate) struct TlsTransport {
    sock: TcpStream,
    conn: rustls::ClientConnection,
}

impl Transport {
    pub(crate) fn plain(sock: TcpStream) -> Self {
        Transport::Plain(sock)
    }

    pub(crate) fn tls(
        sock: TcpStream,
        config: Arc<rustls::ClientConfig>,
        host: &str,
    ) -> Result<Self, Error> {
        let name = rustls::pki_types::ServerName::try_from(host.to_owned())
            .map_err(|e| Error::new(Kind::Tls).with(e))?;
        let conn = rustls::ClientConnection::new(config, name)
            .map_err(|e| Error::new(Kind::Tls).with(e))?;
        Ok(Transport::Tls(Box::new(TlsTransport { sock, conn })))
    }

    pub(crate) fn socket_mut(&mut self) -> &mut TcpStream {
        match self {
            Transport::Plain(sock) => sock,
            Transport::Tls(tls) => &mut tls.sock,
        }
    }

    /// A deferred asynchronous-connect failure, reported once by the socket.
    pub(crate) fn take_connect_error(&mut self) -> Option<io::Error> {
        match self.socket_mut().take_error() {
            Ok(maybe) => maybe,
            Err(_) => None,
        }
    }

    /// Drive the TLS handshake one pass forward. Plain sockets are always
    /// `Done`.
    pub(crate) fn drive_handshake(&mut self) -> Result<HandshakeProgress, Error> {
        let Transport::Tls(tls) = self else {
            return Ok(HandshakeProgress::Done);
        };
        while tls.conn.is_handshaking() {
            match tls.conn.complete_io(&mut tls.sock) {
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(if tls.conn.wants_write() {
                        HandshakeProgress::NeedsWrite
                    } else {
                        HandshakeProgress::NeedsRead
                    });
                }
                Err(e) => return Err(Error::new(Kind::Tls).with(e)),
            }
        }
        Ok(HandshakeProgress::Done)
    }

    /// Read decrypted bytes. `Ok(0)` is end-of-stream; a peer that drops the
    /// link without a TLS close-notify is treated as EOF too, since every
    /// response is already delimited by its framing.
    pub(crate) fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Transport::Plain(sock) => sock.read(buf),
            Transport::Tls(tls) => tls.read_decrypted(buf),
        }
    }

    /// Write bytes, encrypting when applicable.
    pub(crate) fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Transport::Plain(sock) => sock.write(buf),
            Transport::Tls(tls) => tls.write_encrypted(buf),
        }
    }

    /// True while encrypted records are still queued for the socket.
    pub(crate) fn has_pending_write(&self) -> bool {
        match self {
            Transport::Plain(_) => false,
            Transport::Tls(tls) => tls.conn.wants_write(),
        }
    }

    /// Push queued encrypted records out. `WouldBlock` leaves the rest
    /// queued for the next writable pass.
    pub(crate) fn flush_pending(&mut self) -> io::Result<()> {
        let Transport::Tls(tls) = self else {
            return Ok(());
        };
        while tls.conn.wants_write() {
            tls.conn.write_tls(&mut tls.sock)?;
        }
        Ok(())
    }
}

impl TlsTransport {
    fn read_decrypted(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            match self.conn.reader().read(buf) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    // No plaintext buffered; pull more records off the socket.
                    match self.conn.read_tls(&mut self.sock) {
                        Ok(0) => return Ok(0),
                        Ok(_) => {
                            self.conn
                                .process_new_packets()
                                .map_err(io::Error::other)?;
                        }
                        Err(e) => return Err(e),
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(0),
                Err(e) => return Err(e),
            }
        }
    }

    fn write_encrypted(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.conn.writer().write(buf)?;
        while self.conn.wants_write() {
            match self.conn.write_tls(&mut self.sock) {
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e),
            }
        }
        Ok(n)
    }
}
