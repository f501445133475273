use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{Result, TransportError};

/// Port used when neither a port nor a socket path is configured.
pub const DEFAULT_PORT: u16 = 31415;

/// Host a TCP client connects to by default.
pub const DEFAULT_HOST: &str = "localhost";

/// Rendezvous point shared by a server and its single client.
///
/// Exactly one of a TCP port or a local socket path; the two are mutually
/// exclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// TCP port. Port 0 asks the OS for an ephemeral port when binding.
    Tcp(u16),
    /// Unix domain socket path.
    Unix(PathBuf),
}

impl Endpoint {
    /// Resolve optional port/path options into an endpoint.
    ///
    /// Falls back to [`DEFAULT_PORT`] when neither is given and rejects
    /// the combination of both.
    pub fn resolve(port: Option<u16>, path: Option<PathBuf>) -> Result<Self> {
        match (port, path) {
            (Some(_), Some(_)) => Err(TransportError::Config(
                "specify only one of port and unix socket path".to_string(),
            )),
            (Some(port), None) => Ok(Self::Tcp(port)),
            (None, Some(path)) => Ok(Self::Unix(path)),
            (None, None) => Ok(Self::Tcp(DEFAULT_PORT)),
        }
    }

    /// Configured TCP port, if this is a TCP endpoint.
    pub fn port(&self) -> Option<u16> {
        match self {
            Self::Tcp(port) => Some(*port),
            Self::Unix(_) => None,
        }
    }

    /// Configured socket path, if this is a Unix endpoint.
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Tcp(_) => None,
            Self::Unix(path) => Some(path),
        }
    }

    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        match self {
            Self::Tcp(_) => "tcp",
            Self::Unix(_) => "unix-domain-socket",
        }
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self::Tcp(DEFAULT_PORT)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp(port) => write!(f, "tcp port {port}"),
            Self::Unix(path) => write!(f, "unix socket {}", path.display()),
        }
    }
}
