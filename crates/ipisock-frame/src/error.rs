/// Errors that can occur while encoding or decoding protocol messages.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The peer closed the connection at a message boundary.
    ///
    /// This is the clean end-of-session signal: zero bytes arrived where the
    /// next command token was expected.
    #[error("peer closed the connection")]
    PeerClosed,

    /// The connection ended part-way through a token or payload.
    #[error("connection closed mid-message ({received} of {expected} bytes)")]
    Truncated { expected: usize, received: usize },

    /// An I/O error occurred while reading or writing (including timeouts).
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A decoded floating point array contains NaN or infinity.
    #[error("non-finite value in {what} at index {index}")]
    NonFiniteValue { what: &'static str, index: usize },

    /// An element count received from or sent to the peer is out of range.
    #[error("invalid {what} count: {value}")]
    InvalidCount { what: &'static str, value: i64 },

    /// A single array exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// A message is structurally inconsistent (e.g. positions not in xyz triples).
    #[error("malformed message: {0}")]
    Malformed(String),
}

impl FrameError {
    /// Whether this error is the clean end-of-session signal.
    pub fn is_peer_closed(&self) -> bool {
        matches!(self, Self::PeerClosed)
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
