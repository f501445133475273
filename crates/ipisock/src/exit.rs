use std::fmt;
use std::io;

use ipisock_frame::FrameError;
use ipisock_peer::PeerError;
use ipisock_transport::TransportError;

// Exit code constants, sysexits-style.
pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const PROTOCOL_ERROR: i32 = 70;
pub const SUBPROCESS_CRASHED: i32 = 71;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;
pub const INTERRUPTED: i32 = 130;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::NotFound | io::ErrorKind::InvalidData => DATA_INVALID,
        _ => TRANSPORT_ERROR,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Bind { source, .. }
        | TransportError::Connect { source, .. }
        | TransportError::Accept(source)
        | TransportError::Io(source) => io_error(context, source),
        TransportError::TimedOut(_) => CliError::new(TIMEOUT, format!("{context}: {err}")),
        TransportError::Config(_) | TransportError::PathTooLong { .. } => {
            CliError::new(USAGE, format!("{context}: {err}"))
        }
    }
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::Io(source) => io_error(context, source),
        FrameError::PeerClosed => CliError::new(FAILURE, format!("{context}: {err}")),
        FrameError::Truncated { .. } | FrameError::Malformed(_) => {
            CliError::new(PROTOCOL_ERROR, format!("{context}: {err}"))
        }
        FrameError::NonFiniteValue { .. }
        | FrameError::InvalidCount { .. }
        | FrameError::PayloadTooLarge { .. } => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
    }
}

pub fn peer_error(context: &str, err: PeerError) -> CliError {
    match err {
        PeerError::Transport(err) => transport_error(context, err),
        PeerError::Frame(err) => frame_error(context, err),
        PeerError::Config(_) => CliError::new(USAGE, format!("{context}: {err}")),
        PeerError::ProtocolViolation { .. } => {
            CliError::new(PROTOCOL_ERROR, format!("{context}: {err}"))
        }
        PeerError::SubprocessCrashed(_) => {
            CliError::new(SUBPROCESS_CRASHED, format!("{context}: {err}"))
        }
        PeerError::GeometryChanged { .. } | PeerError::InvalidGeometry(_) => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        PeerError::Launch { .. } | PeerError::Engine(_) => {
            CliError::new(FAILURE, format!("{context}: {err}"))
        }
        PeerError::Closed => CliError::new(INTERNAL, format!("{context}: {err}")),
    }
}
