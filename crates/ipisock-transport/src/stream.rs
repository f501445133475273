use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};
use std::time::Duration;

use tracing::debug;

use crate::endpoint::Endpoint;
use crate::error::{Result, TransportError};

/// A connected protocol stream over TCP or a Unix domain socket.
///
/// This is the fundamental I/O type returned by transport operations.
/// It wraps either a TCP stream or, on Unix, a Unix domain socket stream.
pub struct IpiStream {
    inner: IpiStreamInner,
}

enum IpiStreamInner {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(std::os::unix::net::UnixStream),
}

impl Read for IpiStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            IpiStreamInner::Tcp(stream) => stream.read(buf),
            #[cfg(unix)]
            IpiStreamInner::Unix(stream) => stream.read(buf),
        }
    }
}

impl Write for IpiStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            IpiStreamInner::Tcp(stream) => stream.write(buf),
            #[cfg(unix)]
            IpiStreamInner::Unix(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.inner {
            IpiStreamInner::Tcp(stream) => stream.flush(),
            #[cfg(unix)]
            IpiStreamInner::Unix(stream) => stream.flush(),
        }
    }
}

impl IpiStream {
    pub(crate) fn from_tcp(stream: TcpStream) -> Self {
        Self {
            inner: IpiStreamInner::Tcp(stream),
        }
    }

    #[cfg(unix)]
    pub(crate) fn from_unix(stream: std::os::unix::net::UnixStream) -> Self {
        Self {
            inner: IpiStreamInner::Unix(stream),
        }
    }

    /// Connect to a listening endpoint (blocking).
    ///
    /// `host` is only consulted for TCP endpoints.
    pub fn connect(endpoint: &Endpoint, host: &str) -> Result<Self> {
        match endpoint {
            Endpoint::Tcp(port) => {
                let stream = TcpStream::connect((host, *port)).map_err(|e| {
                    TransportError::Connect {
                        endpoint: format!("{host}:{port}"),
                        source: e,
                    }
                })?;
                debug!(host, port, "connected over tcp");
                Ok(Self::from_tcp(stream))
            }
            #[cfg(unix)]
            Endpoint::Unix(path) => {
                let stream = std::os::unix::net::UnixStream::connect(path).map_err(|e| {
                    TransportError::Connect {
                        endpoint: endpoint.to_string(),
                        source: e,
                    }
                })?;
                debug!(?path, "connected to unix domain socket");
                Ok(Self::from_unix(stream))
            }
            #[cfg(not(unix))]
            Endpoint::Unix(_) => Err(TransportError::Connect {
                endpoint: endpoint.to_string(),
                source: std::io::Error::new(
                    std::io::ErrorKind::Unsupported,
                    "unix domain sockets are not available on this platform",
                ),
            }),
        }
    }

    /// Create a connected pair of Unix streams, mostly useful in tests.
    #[cfg(unix)]
    pub fn pair() -> Result<(Self, Self)> {
        let (left, right) = std::os::unix::net::UnixStream::pair()?;
        Ok((Self::from_unix(left), Self::from_unix(right)))
    }

    /// Apply the same timeout to reads and writes.
    ///
    /// `None` blocks indefinitely. A zero duration is rejected.
    pub fn set_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        if timeout == Some(Duration::ZERO) {
            return Err(TransportError::Config(
                "timeout must be greater than zero".to_string(),
            ));
        }
        self.set_read_timeout(timeout)?;
        self.set_write_timeout(timeout)
    }

    /// Set read timeout on the underlying stream.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        match &self.inner {
            IpiStreamInner::Tcp(stream) => stream.set_read_timeout(timeout).map_err(Into::into),
            #[cfg(unix)]
            IpiStreamInner::Unix(stream) => stream.set_read_timeout(timeout).map_err(Into::into),
        }
    }

    /// Set write timeout on the underlying stream.
    pub fn set_write_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        match &self.inner {
            IpiStreamInner::Tcp(stream) => stream.set_write_timeout(timeout).map_err(Into::into),
            #[cfg(unix)]
            IpiStreamInner::Unix(stream) => stream.set_write_timeout(timeout).map_err(Into::into),
        }
    }

    /// Try to clone this stream (creates a new file descriptor).
    pub fn try_clone(&self) -> Result<Self> {
        match &self.inner {
            IpiStreamInner::Tcp(stream) => Ok(Self::from_tcp(stream.try_clone()?)),
            #[cfg(unix)]
            IpiStreamInner::Unix(stream) => Ok(Self::from_unix(stream.try_clone()?)),
        }
    }

    /// Shut down both directions of the connection.
    ///
    /// Every clone of the stream observes the shutdown, so this is the one
    /// call that releases the peer even while a reader clone is still alive.
    /// A peer that already went away is not an error.
    pub fn shutdown(&self) -> Result<()> {
        let result = match &self.inner {
            IpiStreamInner::Tcp(stream) => stream.shutdown(Shutdown::Both),
            #[cfg(unix)]
            IpiStreamInner::Unix(stream) => stream.shutdown(Shutdown::Both),
        };
        match result {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotConnected => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Human-readable address of the connected peer.
    pub fn peer_addr(&self) -> String {
        match &self.inner {
            IpiStreamInner::Tcp(stream) => stream
                .peer_addr()
                .map(|addr| addr.to_string())
                .unwrap_or_else(|_| "<unknown>".to_string()),
            #[cfg(unix)]
            IpiStreamInner::Unix(stream) => stream
                .peer_addr()
                .ok()
                .and_then(|addr| addr.as_pathname().map(|p| p.display().to_string()))
                .unwrap_or_else(|| "<unnamed>".to_string()),
        }
    }
}

impl std::fmt::Debug for IpiStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.inner {
            IpiStreamInner::Tcp(_) => f.debug_struct("IpiStream").field("type", &"tcp").finish(),
            #[cfg(unix)]
            IpiStreamInner::Unix(_) => f.debug_struct("IpiStream").field("type", &"unix").finish(),
        }
    }
}
