use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};
use crate::token::{Token, TOKEN_LEN};

/// Size of one wire integer.
pub const I32_SIZE: usize = 4;

/// Size of one wire float.
pub const F64_SIZE: usize = 8;

/// Default maximum size of a single received array: 256 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 256 * 1024 * 1024;

/// `POSDATA` payload, in protocol units (Bohr).
///
/// Wire format after the token:
/// ```text
/// ┌───────────────┬───────────────┬──────────┬───────────────────┐
/// │ cell          │ inverse cell  │ natoms   │ positions          │
/// │ 9 × f64       │ 9 × f64       │ 1 × i32  │ 3·natoms × f64     │
/// └───────────────┴───────────────┴──────────┴───────────────────┘
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct PosData {
    /// Cell vectors as rows, flattened row-major.
    pub cell: [f64; 9],
    /// Transposed inverse of `cell`, flattened row-major.
    pub inverse_cell: [f64; 9],
    /// xyz triples, flattened.
    pub positions: Vec<f64>,
}

impl PosData {
    pub fn atom_count(&self) -> usize {
        self.positions.len() / 3
    }
}

/// `FORCEREADY` payload, in protocol units (Hartree, Hartree/Bohr).
///
/// Wire format after the token:
/// ```text
/// ┌─────────┬──────────┬───────────────────┬─────────┬──────────┬─────────┐
/// │ energy  │ natoms   │ forces            │ virial  │ nextra   │ extra   │
/// │ 1 × f64 │ 1 × i32  │ 3·natoms × f64    │ 9 × f64 │ 1 × i32  │ bytes   │
/// └─────────┴──────────┴───────────────────┴─────────┴──────────┴─────────┘
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ForceData {
    pub energy: f64,
    /// xyz triples, flattened.
    pub forces: Vec<f64>,
    /// Flattened row-major 3×3 virial.
    pub virial: [f64; 9],
    /// Opaque engine-specific bytes; usually empty.
    pub extra: Bytes,
}

impl ForceData {
    pub fn atom_count(&self) -> usize {
        self.forces.len() / 3
    }
}

/// `INIT` payload: bead index, then a length-prefixed byte string.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InitData {
    pub bead: i32,
    pub payload: Bytes,
}

/// Encode a token as exactly [`TOKEN_LEN`] space-padded bytes.
///
/// Words longer than the field are truncated.
pub fn encode_token(token: &Token, dst: &mut BytesMut) {
    let word = token.as_str().as_bytes();
    let len = word.len().min(TOKEN_LEN);
    dst.reserve(TOKEN_LEN);
    dst.put_slice(&word[..len]);
    dst.put_bytes(b' ', TOKEN_LEN - len);
}

/// Decode a token field, ignoring trailing whitespace and NUL padding.
pub fn decode_token(src: &[u8]) -> Token {
    let word = String::from_utf8_lossy(src);
    Token::parse(word.trim_end_matches(|c: char| c.is_ascii_whitespace() || c == '\0'))
}

pub fn encode_i32s(values: &[i32], dst: &mut BytesMut) {
    dst.reserve(values.len() * I32_SIZE);
    for value in values {
        dst.put_i32_ne(*value);
    }
}

pub fn encode_f64s(values: &[f64], dst: &mut BytesMut) {
    dst.reserve(values.len() * F64_SIZE);
    for value in values {
        dst.put_f64_ne(*value);
    }
}

/// Decode native-order integers. Trailing bytes that do not fill a whole
/// element are ignored.
pub fn decode_i32s(mut src: &[u8]) -> Vec<i32> {
    let mut values = Vec::with_capacity(src.len() / I32_SIZE);
    while src.remaining() >= I32_SIZE {
        values.push(src.get_i32_ne());
    }
    values
}

/// Decode native-order floats, rejecting NaN and infinities.
///
/// `what` names the quantity in the error.
pub fn decode_f64s(mut src: &[u8], what: &'static str) -> Result<Vec<f64>> {
    let mut values = Vec::with_capacity(src.len() / F64_SIZE);
    while src.remaining() >= F64_SIZE {
        let value = src.get_f64_ne();
        if !value.is_finite() {
            return Err(FrameError::NonFiniteValue {
                what,
                index: values.len(),
            });
        }
        values.push(value);
    }
    Ok(values)
}

/// Convert a local element count to its wire representation.
pub fn count_to_wire(what: &'static str, count: usize) -> Result<i32> {
    i32::try_from(count).map_err(|_| FrameError::InvalidCount {
        what,
        value: i64::try_from(count).unwrap_or(i64::MAX),
    })
}

/// Convert a received element count, rejecting negative values.
pub fn count_from_wire(what: &'static str, value: i32) -> Result<usize> {
    usize::try_from(value).map_err(|_| FrameError::InvalidCount {
        what,
        value: i64::from(value),
    })
}

fn check_triples(what: &str, values: &[f64]) -> Result<()> {
    if values.len() % 3 != 0 {
        return Err(FrameError::Malformed(format!(
            "{what} length {} is not a multiple of 3",
            values.len()
        )));
    }
    Ok(())
}

/// Encode a complete `POSDATA` message, token included.
pub fn encode_posdata(data: &PosData, dst: &mut BytesMut) -> Result<()> {
    check_triples("positions", &data.positions)?;
    let natoms = count_to_wire("atom", data.atom_count())?;

    encode_token(&Token::Posdata, dst);
    encode_f64s(&data.cell, dst);
    encode_f64s(&data.inverse_cell, dst);
    encode_i32s(&[natoms], dst);
    encode_f64s(&data.positions, dst);
    Ok(())
}

/// Encode a complete `FORCEREADY` message, token included.
pub fn encode_force(data: &ForceData, dst: &mut BytesMut) -> Result<()> {
    check_triples("forces", &data.forces)?;
    let natoms = count_to_wire("atom", data.atom_count())?;
    let nextra = count_to_wire("extra byte", data.extra.len())?;

    encode_token(&Token::ForceReady, dst);
    encode_f64s(&[data.energy], dst);
    encode_i32s(&[natoms], dst);
    encode_f64s(&data.forces, dst);
    encode_f64s(&data.virial, dst);
    encode_i32s(&[nextra], dst);
    dst.put_slice(&data.extra);
    Ok(())
}

/// Encode a complete `INIT` message, token included.
pub fn encode_init(data: &InitData, dst: &mut BytesMut) -> Result<()> {
    let len = count_to_wire("init byte", data.payload.len())?;

    encode_token(&Token::Init, dst);
    encode_i32s(&[data.bead, len], dst);
    dst.put_slice(&data.payload);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_roundtrip_for_every_word() {
        for token in Token::REQUESTS.iter().chain(Token::REPLIES.iter()) {
            let mut buf = BytesMut::new();
            encode_token(token, &mut buf);
            assert_eq!(buf.len(), TOKEN_LEN);
            assert_eq!(&decode_token(&buf), token);
        }
    }

    #[test]
    fn token_is_left_justified_and_space_padded() {
        let mut buf = BytesMut::new();
        encode_token(&Token::Status, &mut buf);
        assert_eq!(buf.as_ref(), b"STATUS      ");
    }

    #[test]
    fn long_token_is_truncated() {
        let mut buf = BytesMut::new();
        encode_token(&Token::Unknown("ABCDEFGHIJKLMNOP".to_string()), &mut buf);
        assert_eq!(buf.as_ref(), b"ABCDEFGHIJKL");
    }

    #[test]
    fn decode_token_ignores_nul_padding() {
        assert_eq!(decode_token(b"READY\0\0\0\0\0\0\0"), Token::Ready);
    }

    #[test]
    fn f64_decode_rejects_nan_and_infinity() {
        let mut buf = BytesMut::new();
        encode_f64s(&[1.0, f64::NAN], &mut buf);
        let err = decode_f64s(&buf, "cell").unwrap_err();
        assert!(matches!(
            err,
            FrameError::NonFiniteValue {
                what: "cell",
                index: 1
            }
        ));

        let mut buf = BytesMut::new();
        encode_f64s(&[f64::NEG_INFINITY], &mut buf);
        assert!(decode_f64s(&buf, "forces").is_err());
    }

    #[test]
    fn arrays_use_native_byte_order() {
        let mut buf = BytesMut::new();
        encode_i32s(&[7], &mut buf);
        encode_f64s(&[0.5], &mut buf);
        assert_eq!(&buf[..4], &7i32.to_ne_bytes());
        assert_eq!(&buf[4..], &0.5f64.to_ne_bytes());
        assert_eq!(decode_i32s(&buf[..4]), vec![7]);
    }

    #[test]
    fn counts_reject_negative_wire_values() {
        assert_eq!(count_from_wire("atom", 4).unwrap(), 4);
        assert!(matches!(
            count_from_wire("atom", -1),
            Err(FrameError::InvalidCount { value: -1, .. })
        ));
    }

    #[test]
    fn posdata_layout() {
        let data = PosData {
            cell: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
            inverse_cell: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
            positions: vec![0.0; 6],
        };
        let mut buf = BytesMut::new();
        encode_posdata(&data, &mut buf).unwrap();

        assert_eq!(buf.len(), TOKEN_LEN + 18 * F64_SIZE + I32_SIZE + 6 * F64_SIZE);
        assert_eq!(decode_token(&buf[..TOKEN_LEN]), Token::Posdata);
        let count_at = TOKEN_LEN + 18 * F64_SIZE;
        assert_eq!(decode_i32s(&buf[count_at..count_at + I32_SIZE]), vec![2]);
    }

    #[test]
    fn posdata_rejects_partial_triples() {
        let data = PosData {
            cell: [0.0; 9],
            inverse_cell: [0.0; 9],
            positions: vec![0.0; 4],
        };
        let mut buf = BytesMut::new();
        assert!(matches!(
            encode_posdata(&data, &mut buf),
            Err(FrameError::Malformed(_))
        ));
        assert!(buf.is_empty());
    }

    #[test]
    fn force_layout_carries_extra_bytes() {
        let data = ForceData {
            energy: -1.5,
            forces: vec![0.1, 0.2, 0.3],
            virial: [0.0; 9],
            extra: Bytes::from_static(b"{}"),
        };
        let mut buf = BytesMut::new();
        encode_force(&data, &mut buf).unwrap();

        let expected = TOKEN_LEN + F64_SIZE + I32_SIZE + 3 * F64_SIZE + 9 * F64_SIZE + I32_SIZE + 2;
        assert_eq!(buf.len(), expected);
        assert_eq!(decode_token(&buf[..TOKEN_LEN]), Token::ForceReady);
        assert_eq!(&buf[expected - 2..], b"{}");
    }

    #[test]
    fn init_layout() {
        let data = InitData {
            bead: 0,
            payload: Bytes::from_static(b"abc"),
        };
        let mut buf = BytesMut::new();
        encode_init(&data, &mut buf).unwrap();

        assert_eq!(decode_token(&buf[..TOKEN_LEN]), Token::Init);
        assert_eq!(
            decode_i32s(&buf[TOKEN_LEN..TOKEN_LEN + 2 * I32_SIZE]),
            vec![0, 3]
        );
        assert_eq!(&buf[TOKEN_LEN + 2 * I32_SIZE..], b"abc");
    }
}
