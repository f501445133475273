use std::process::ExitStatus;

use ipisock_frame::FrameError;
use ipisock_transport::TransportError;

use crate::engine::EngineError;

/// Errors that can occur in driver/engine operations.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Codec-level error, including the clean `PeerClosed` signal.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// Contradictory or unusable configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// The peer sent a token that is not legal at this point of the exchange.
    #[error("protocol violation: expected {expected}, received {received}")]
    ProtocolViolation { expected: String, received: String },

    /// The launched engine exited before it ever connected.
    #[error("subprocess terminated unexpectedly with {0}")]
    SubprocessCrashed(ExitStatus),

    /// The engine command could not be started or waited on.
    #[error("subprocess `{command}` failed: {source}")]
    Launch {
        command: String,
        source: std::io::Error,
    },

    /// The injected engine failed or returned an unusable evaluation.
    #[error("engine evaluation failed: {0}")]
    Engine(EngineError),

    /// A later geometry has a different atom count than the first one.
    #[error("atom count changed from {expected} to {found}; start a new session")]
    GeometryChanged { expected: usize, found: usize },

    /// Geometry violates its shape or finiteness invariants.
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    /// The server or client has already been closed.
    #[error("connection already closed")]
    Closed,
}

impl PeerError {
    pub(crate) fn violation(expected: impl Into<String>, received: impl ToString) -> Self {
        Self::ProtocolViolation {
            expected: expected.into(),
            received: received.to_string(),
        }
    }

    /// Endpoint resolution failures are configuration errors; anything else
    /// stays a transport error.
    pub(crate) fn from_endpoint(err: TransportError) -> Self {
        match err {
            TransportError::Config(msg) => Self::Config(msg),
            other => Self::Transport(other),
        }
    }

    /// Whether this error is the clean end-of-session signal from the codec.
    pub fn is_peer_closed(&self) -> bool {
        matches!(self, Self::Frame(err) if err.is_peer_closed())
    }
}

pub type Result<T> = std::result::Result<T, PeerError>;
