//! Single-client socket transport for i-PI style drivers and engines.
//!
//! Provides a unified interface over the two rendezvous mechanisms the
//! protocol supports:
//! - TCP on a port (all platforms)
//! - Unix domain sockets on a filesystem path (Linux/macOS)
//!
//! This is the lowest layer of ipisock. Everything else builds on top of
//! the [`IpiStream`] and [`IpiListener`] types provided here.

pub mod endpoint;
pub mod error;
pub mod listener;
pub mod stream;

pub use endpoint::{Endpoint, DEFAULT_HOST, DEFAULT_PORT};
pub use error::{Result, TransportError};
pub use listener::IpiListener;
pub use stream::IpiStream;
