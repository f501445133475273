//! Wire codec for the i-PI socket protocol.
//!
//! The protocol has no general framing. Every message starts with a
//! 12-byte, space-padded ASCII token, optionally followed by a payload whose
//! size is implied by the token and by counts embedded earlier in the
//! payload:
//! - integers are native-order `i32`
//! - reals are native-order `f64` and must be finite
//! - auxiliary data is a count-prefixed raw byte string
//!
//! [`WireReader`] hides partial reads: callers always get complete values,
//! and a close at a message boundary ([`FrameError::PeerClosed`]) is kept
//! apart from a close mid-message ([`FrameError::Truncated`]).

pub mod codec;
pub mod error;
pub mod reader;
pub mod split;
pub mod token;
pub mod writer;

pub use codec::{
    decode_f64s, decode_i32s, decode_token, encode_f64s, encode_force, encode_i32s, encode_init,
    encode_posdata, encode_token, ForceData, InitData, PosData, DEFAULT_MAX_PAYLOAD, F64_SIZE,
    I32_SIZE,
};
pub use error::{FrameError, Result};
pub use reader::WireReader;
pub use split::split;
pub use token::{Token, TOKEN_LEN};
pub use writer::WireWriter;
