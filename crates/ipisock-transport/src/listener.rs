use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info, trace};

use crate::endpoint::Endpoint;
use crate::error::{Result, TransportError};
use crate::stream::IpiStream;

/// Listening side of the rendezvous: binds an [`Endpoint`] and accepts the
/// one client the protocol admits.
///
/// Sockets listen with a backlog of [`IpiListener::BACKLOG`]. Unix socket
/// files created by [`IpiListener::bind`] are removed again on `Drop`.
pub struct IpiListener {
    inner: ListenerInner,
}

enum ListenerInner {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix {
        listener: std::os::unix::net::UnixListener,
        path: PathBuf,
        created_inode: Option<(u64, u64)>,
    },
}

impl IpiListener {
    /// Pending-connection queue length requested from the OS.
    pub const BACKLOG: i32 = 1;
    /// Default permission mode for created socket paths.
    #[cfg(unix)]
    pub const DEFAULT_SOCKET_MODE: u32 = 0o600;
    /// Maximum socket path length.
    /// Unix `sockaddr_un.sun_path` is typically 108 bytes on Linux, 104 on macOS.
    #[cfg(target_os = "linux")]
    const MAX_PATH_LEN: usize = 108;
    #[cfg(not(target_os = "linux"))]
    const MAX_PATH_LEN: usize = 104;

    /// Bind and listen on an endpoint.
    ///
    /// TCP endpoints bind all interfaces. For Unix endpoints an existing
    /// socket file at the path is treated as stale and replaced; any other
    /// kind of file is left alone and the bind fails.
    pub fn bind(endpoint: &Endpoint) -> Result<Self> {
        match endpoint {
            Endpoint::Tcp(port) => Self::bind_tcp(*port),
            Endpoint::Unix(path) => Self::bind_unix(path),
        }
    }

    fn bind_tcp(port: u16) -> Result<Self> {
        let listener =
            TcpListener::bind(("0.0.0.0", port)).map_err(|e| TransportError::Bind {
                endpoint: Endpoint::Tcp(port).to_string(),
                source: e,
            })?;

        #[cfg(unix)]
        {
            use std::os::fd::AsRawFd;
            restrict_backlog(listener.as_raw_fd()).map_err(|e| TransportError::Bind {
                endpoint: Endpoint::Tcp(port).to_string(),
                source: e,
            })?;
        }

        let bound = listener.local_addr()?.port();
        info!(port = bound, "listening on tcp");
        Ok(Self {
            inner: ListenerInner::Tcp(listener),
        })
    }

    #[cfg(unix)]
    fn bind_unix(path: &Path) -> Result<Self> {
        use std::os::fd::AsRawFd;
        use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};

        let path = path.to_path_buf();
        let bind_error = |path: &Path, source: std::io::Error| TransportError::Bind {
            endpoint: Endpoint::Unix(path.to_path_buf()).to_string(),
            source,
        };

        let path_bytes = path.as_os_str().len();
        if path_bytes >= Self::MAX_PATH_LEN {
            return Err(TransportError::PathTooLong {
                path,
                len: path_bytes,
                max: Self::MAX_PATH_LEN,
            });
        }

        // Remove stale socket if it exists, but never remove non-socket files.
        if path.exists() {
            let metadata = std::fs::symlink_metadata(&path).map_err(|e| bind_error(&path, e))?;
            if metadata.file_type().is_socket() {
                debug!(?path, "removing stale socket");
                std::fs::remove_file(&path).map_err(|e| bind_error(&path, e))?;
            } else {
                return Err(bind_error(
                    &path,
                    std::io::Error::new(
                        std::io::ErrorKind::AlreadyExists,
                        "existing path is not a unix socket",
                    ),
                ));
            }
        }

        let listener =
            std::os::unix::net::UnixListener::bind(&path).map_err(|e| bind_error(&path, e))?;
        restrict_backlog(listener.as_raw_fd()).map_err(|e| bind_error(&path, e))?;

        std::fs::set_permissions(
            &path,
            std::fs::Permissions::from_mode(Self::DEFAULT_SOCKET_MODE),
        )
        .map_err(|e| bind_error(&path, e))?;
        let created = std::fs::symlink_metadata(&path).map_err(|e| bind_error(&path, e))?;
        let created_inode = Some((created.dev(), created.ino()));

        info!(?path, "listening on unix domain socket");

        Ok(Self {
            inner: ListenerInner::Unix {
                listener,
                path,
                created_inode,
            },
        })
    }

    #[cfg(not(unix))]
    fn bind_unix(path: &Path) -> Result<Self> {
        Err(TransportError::Bind {
            endpoint: Endpoint::Unix(path.to_path_buf()).to_string(),
            source: std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "unix domain sockets are not available on this platform",
            ),
        })
    }

    /// Accept an incoming connection (blocking).
    pub fn accept(&self) -> Result<IpiStream> {
        let stream = match &self.inner {
            ListenerInner::Tcp(listener) => {
                let (stream, _addr) = listener.accept().map_err(TransportError::Accept)?;
                IpiStream::from_tcp(stream)
            }
            #[cfg(unix)]
            ListenerInner::Unix { listener, .. } => {
                let (stream, _addr) = listener.accept().map_err(TransportError::Accept)?;
                IpiStream::from_unix(stream)
            }
        };
        debug!(peer = %stream.peer_addr(), "accepted connection");
        Ok(stream)
    }

    /// Wait at most `timeout` for a client, then accept it.
    ///
    /// Returns `Ok(None)` when nobody connected in time; the listener stays
    /// usable for another attempt.
    pub fn accept_timeout(&self, timeout: Duration) -> Result<Option<IpiStream>> {
        #[cfg(not(unix))]
        {
            let ListenerInner::Tcp(listener) = &self.inner;
            return Ok(accept_tcp_polling(listener, timeout)?.map(IpiStream::from_tcp));
        }

        #[cfg(unix)]
        {
            if !wait_readable(self.raw_fd(), timeout).map_err(TransportError::Accept)? {
                return Ok(None);
            }
            self.accept().map(Some)
        }
    }

    /// The port actually bound (resolves port 0), for TCP listeners.
    pub fn local_port(&self) -> Option<u16> {
        match &self.inner {
            ListenerInner::Tcp(listener) => listener.local_addr().ok().map(|addr| addr.port()),
            #[cfg(unix)]
            ListenerInner::Unix { .. } => None,
        }
    }

    /// The path this socket is bound to, for Unix listeners.
    pub fn path(&self) -> Option<&Path> {
        match &self.inner {
            ListenerInner::Tcp(_) => None,
            #[cfg(unix)]
            ListenerInner::Unix { path, .. } => Some(path),
        }
    }

    /// The bound endpoint, with an ephemeral port resolved.
    pub fn endpoint(&self) -> Endpoint {
        match &self.inner {
            ListenerInner::Tcp(_) => Endpoint::Tcp(self.local_port().unwrap_or_default()),
            #[cfg(unix)]
            ListenerInner::Unix { path, .. } => Endpoint::Unix(path.clone()),
        }
    }

    #[cfg(unix)]
    fn raw_fd(&self) -> std::os::fd::RawFd {
        use std::os::fd::AsRawFd;

        match &self.inner {
            ListenerInner::Tcp(listener) => listener.as_raw_fd(),
            ListenerInner::Unix { listener, .. } => listener.as_raw_fd(),
        }
    }
}

impl std::fmt::Debug for IpiListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IpiListener")
            .field("endpoint", &self.endpoint())
            .finish()
    }
}

impl Drop for IpiListener {
    fn drop(&mut self) {
        #[cfg(unix)]
        if let ListenerInner::Unix {
            path,
            created_inode: Some((expected_dev, expected_ino)),
            ..
        } = &self.inner
        {
            use std::os::unix::fs::{FileTypeExt, MetadataExt};

            if let Ok(metadata) = std::fs::symlink_metadata(path) {
                if metadata.file_type().is_socket()
                    && metadata.dev() == *expected_dev
                    && metadata.ino() == *expected_ino
                {
                    debug!(?path, "cleaning up socket file");
                    let _ = std::fs::remove_file(path);
                } else {
                    debug!(?path, "socket path identity changed; skipping cleanup");
                }
            }
        }
    }
}

/// Shrink the listen queue of an already listening socket.
///
/// std listens with a large default backlog; calling `listen(2)` again on a
/// listening socket only updates the queue length.
#[cfg(unix)]
fn restrict_backlog(fd: std::os::fd::RawFd) -> std::io::Result<()> {
    // SAFETY: `fd` is an open, bound socket descriptor owned by the caller.
    let rc = unsafe { libc::listen(fd, IpiListener::BACKLOG) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

/// Block until `fd` is readable (a connection is pending) or `timeout`
/// elapses. Signal interruptions resume the wait with the time left.
#[cfg(unix)]
fn wait_readable(fd: std::os::fd::RawFd, timeout: Duration) -> std::io::Result<bool> {
    let deadline = std::time::Instant::now() + timeout;
    let mut remaining = timeout;
    loop {
        let mut pollfd = libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        };
        // Round up so a sub-millisecond remainder still waits.
        let millis = remaining
            .as_micros()
            .div_ceil(1000)
            .min(libc::c_int::MAX as u128) as libc::c_int;

        // SAFETY: `pollfd` is a valid, writable pollfd and we pass a count of 1.
        let rc = unsafe { libc::poll(&mut pollfd, 1, millis) };
        match rc {
            0 => return Ok(false),
            n if n > 0 => return Ok(true),
            _ => {
                let err = std::io::Error::last_os_error();
                if err.kind() != std::io::ErrorKind::Interrupted {
                    return Err(err);
                }
                remaining = deadline.saturating_duration_since(std::time::Instant::now());
                if remaining.is_zero() {
                    return Ok(false);
                }
                trace!(?remaining, "poll interrupted; resuming accept wait");
            }
        }
    }
}

#[cfg(not(unix))]
fn accept_tcp_polling(
    listener: &TcpListener,
    timeout: Duration,
) -> Result<Option<std::net::TcpStream>> {
    const POLL_INTERVAL: Duration = Duration::from_millis(10);

    listener.set_nonblocking(true)?;
    let deadline = std::time::Instant::now() + timeout;
    let outcome = loop {
        match listener.accept() {
            Ok((stream, _addr)) => break Ok(Some(stream)),
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                if std::time::Instant::now() >= deadline {
                    break Ok(None);
                }
                std::thread::sleep(POLL_INTERVAL);
            }
            Err(err) => break Err(TransportError::Accept(err)),
        }
    };
    listener.set_nonblocking(false)?;

    let stream = outcome?;
    if let Some(stream) = &stream {
        stream.set_nonblocking(false)?;
    }
    Ok(stream)
}
