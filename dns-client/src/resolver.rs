//! Transport strategies: how a request reaches the server.
//!
//! RFC 1035 §4.2: UDP carries one message per datagram, TCP prefixes every
//! message with its length as a big-endian `u16`.

use crate::dns::{Header, Message};
use crate::error::{Error, ResponseError};
use crate::request::Request;
use crate::response::Response;
use std::fmt;
use std::io::{self, Read, Write};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, TcpStream, UdpSocket};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Largest payload a single datagram can carry.
const MAX_DATAGRAM_SIZE: usize = 65_535;

/// Custom transport, e.g. a stub in tests or a wrapper that adds retries.
pub type BackendFn =
    dyn Fn(&Request, Option<Instant>) -> Result<Response, Error> + Send + Sync;

/// A resolver chain. `Udp` owns its fallback, so chains are finite and end
/// in whatever the last fallback is (`Null` unless configured otherwise).
#[derive(Clone)]
pub enum Resolver {
    /// Fails every request without touching the network.
    Null,
    /// One datagram out, one datagram back. A truncated answer hands the
    /// whole request to `fallback`.
    Udp { fallback: Box<Resolver> },
    /// Length-prefixed exchange over a fresh connection.
    Tcp,
    Backend(Arc<BackendFn>),
}

impl Resolver {
    /// UDP with no fallback: truncated answers fail with "request failed".
    pub fn udp() -> Self {
        Self::udp_with_fallback(Resolver::Null)
    }

    pub fn udp_with_fallback(fallback: Resolver) -> Self {
        Resolver::Udp {
            fallback: Box::new(fallback),
        }
    }

    pub fn with_backend<F>(backend: F) -> Self
    where
        F: Fn(&Request, Option<Instant>) -> Result<Response, Error> + Send + Sync + 'static,
    {
        Resolver::Backend(Arc::new(backend))
    }

    /// Performs one exchange for `request`. Identifiers and response codes
    /// are not checked here; see [`Request::resolve`].
    pub fn resolve(&self, request: &Request, deadline: Option<Instant>) -> Result<Response, Error> {
        match self {
            Resolver::Null => Err(ResponseError::new("request failed").into()),
            Resolver::Udp { fallback } => resolve_udp(request, fallback, deadline),
            Resolver::Tcp => resolve_tcp(request, deadline),
            Resolver::Backend(backend) => backend(request, deadline),
        }
    }
}

impl Default for Resolver {
    fn default() -> Self {
        Self::udp_with_fallback(Resolver::Tcp)
    }
}

impl fmt::Debug for Resolver {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Resolver::Null => write!(f, "Null"),
            Resolver::Udp { fallback } => f.debug_struct("Udp").field("fallback", fallback).finish(),
            Resolver::Tcp => write!(f, "Tcp"),
            Resolver::Backend(_) => write!(f, "Backend(..)"),
        }
    }
}

fn resolve_udp(
    request: &Request,
    fallback: &Resolver,
    deadline: Option<Instant>,
) -> Result<Response, Error> {
    let server = request.server();
    let query = request.to_bytes()?;

    let bytes = {
        let socket = UdpSocket::bind(unspecified(server))?;
        socket.connect(server)?;

        socket.set_write_timeout(remaining(deadline)?)?;
        let sent = socket.send(&query).map_err(|e| expired(e, deadline))?;
        log::debug!("[udp] → {} bytes to {}", sent, server);

        socket.set_read_timeout(remaining(deadline)?)?;
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        let len = socket.recv(&mut buf).map_err(|e| expired(e, deadline))?;
        buf.truncate(len);
        log::debug!("[udp] ← {} bytes from {}", len, server);

        buf
    };

    // A truncated body may be cut mid-record, so only the header is trusted.
    if Header::peek(&bytes).is_some_and(|h| h.truncated()) {
        log::debug!("[udp] truncated answer from {}; retrying via fallback", server);
        return fallback.resolve(request, deadline);
    }

    let message = Message::decode(&bytes)?;
    Ok(Response::new(request.clone(), message, bytes))
}

fn resolve_tcp(request: &Request, deadline: Option<Instant>) -> Result<Response, Error> {
    let server = request.server();
    let query = request.to_bytes()?;

    let stream = match remaining(deadline)? {
        Some(timeout) => TcpStream::connect_timeout(&server, timeout)?,
        None => TcpStream::connect(server)?,
    };
    let mut stream = DeadlineStream {
        stream: &stream,
        deadline,
    };

    write_framed(&mut stream, &query)?;
    log::debug!("[tcp] → {} bytes to {}", query.len(), server);

    let bytes = read_framed(&mut stream)?;
    log::debug!("[tcp] ← {} bytes from {}", bytes.len(), server);

    let message = Message::decode(&bytes)?;
    Ok(Response::new(request.clone(), message, bytes))
}

/// Writes `payload` behind its two-byte big-endian length.
pub fn write_framed<W: Write>(writer: &mut W, payload: &[u8]) -> io::Result<()> {
    let len = u16::try_from(payload.len()).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("message of {} bytes does not fit a TCP frame", payload.len()),
        )
    })?;
    let mut frame = Vec::with_capacity(2 + payload.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(payload);
    writer.write_all(&frame)?;
    writer.flush()
}

/// Reads one length-prefixed message.
///
/// A stream that closes early yields `UnexpectedEof`, whatever was
/// received so far is discarded.
pub fn read_framed<R: Read>(reader: &mut R) -> io::Result<Vec<u8>> {
    let mut prefix = [0u8; 2];
    fill(reader, &mut prefix)?;
    let mut payload = vec![0u8; u16::from_be_bytes(prefix) as usize];
    fill(reader, &mut payload)?;
    Ok(payload)
}

fn fill<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<()> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "unexpected end of stream",
                ))
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Refreshes the socket timeouts before every blocking call so the whole
/// exchange stays within the deadline.
struct DeadlineStream<'a> {
    stream: &'a TcpStream,
    deadline: Option<Instant>,
}

impl Read for DeadlineStream<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.deadline.is_some() {
            self.stream.set_read_timeout(remaining(self.deadline)?)?;
        }
        self.stream.read(buf).map_err(|e| expired(e, self.deadline))
    }
}

impl Write for DeadlineStream<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.deadline.is_some() {
            self.stream.set_write_timeout(remaining(self.deadline)?)?;
        }
        self.stream.write(buf).map_err(|e| expired(e, self.deadline))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

fn unspecified(server: SocketAddr) -> SocketAddr {
    match server {
        SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
        SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
    }
}

/// Time left before `deadline`. Socket timeouts must be non-zero, so an
/// expired deadline is an error rather than `Some(ZERO)`.
fn remaining(deadline: Option<Instant>) -> io::Result<Option<Duration>> {
    match deadline {
        None => Ok(None),
        Some(deadline) => {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                Err(io::Error::new(io::ErrorKind::TimedOut, "deadline expired"))
            } else {
                Ok(Some(left))
            }
        }
    }
}

/// Unix reports an elapsed socket timeout as `WouldBlock`.
fn expired(err: io::Error, deadline: Option<Instant>) -> io::Error {
    if deadline.is_some() && err.kind() == io::ErrorKind::WouldBlock {
        io::Error::new(io::ErrorKind::TimedOut, "deadline expired")
    } else {
        err
    }
}
