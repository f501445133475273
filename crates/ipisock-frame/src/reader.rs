use std::io::{ErrorKind, Read};

use bytes::{Bytes, BytesMut};
use tracing::trace;

use crate::codec::{
    count_from_wire, decode_f64s, decode_i32s, decode_token, ForceData, InitData, PosData,
    DEFAULT_MAX_PAYLOAD, F64_SIZE, I32_SIZE,
};
use crate::error::{FrameError, Result};
use crate::token::{Token, TOKEN_LEN};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Reads tokens and typed arrays from any `Read` stream.
///
/// Handles partial reads internally: every call either returns the complete
/// value or an error. Zero bytes where a token should start is reported as
/// [`FrameError::PeerClosed`]; running dry anywhere else is
/// [`FrameError::Truncated`].
pub struct WireReader<T> {
    inner: T,
    buf: BytesMut,
    max_payload_size: usize,
}

impl<T: Read> WireReader<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            max_payload_size: DEFAULT_MAX_PAYLOAD,
        }
    }

    /// Read exactly `len` bytes into the scratch buffer.
    ///
    /// `at_boundary` marks reads where a clean close is legitimate.
    fn fill(&mut self, len: usize, at_boundary: bool) -> Result<&[u8]> {
        if len > self.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size: len,
                max: self.max_payload_size,
            });
        }

        self.buf.clear();
        self.buf.resize(len, 0);

        let mut filled = 0usize;
        while filled < len {
            match self.inner.read(&mut self.buf[filled..]) {
                Ok(0) if at_boundary && filled == 0 => return Err(FrameError::PeerClosed),
                Ok(0) => {
                    return Err(FrameError::Truncated {
                        expected: len,
                        received: filled,
                    })
                }
                Ok(n) => filled += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }

        Ok(&self.buf[..len])
    }

    /// Read the next command/reply token (blocking).
    pub fn recv_token(&mut self) -> Result<Token> {
        let token = decode_token(self.fill(TOKEN_LEN, true)?);
        trace!(%token, "recv token");
        Ok(token)
    }

    /// Read `count` native-order integers.
    pub fn recv_i32s(&mut self, count: usize) -> Result<Vec<i32>> {
        let values = decode_i32s(self.fill(count * I32_SIZE, false)?);
        trace!(count, "recv i32 array");
        Ok(values)
    }

    /// Read `count` native-order floats, rejecting non-finite values.
    pub fn recv_f64s(&mut self, count: usize, what: &'static str) -> Result<Vec<f64>> {
        let values = decode_f64s(self.fill(count * F64_SIZE, false)?, what)?;
        trace!(count, what, "recv f64 array");
        Ok(values)
    }

    /// Read `len` raw bytes.
    pub fn recv_bytes(&mut self, len: usize) -> Result<Bytes> {
        let bytes = Bytes::copy_from_slice(self.fill(len, false)?);
        trace!(len, "recv raw bytes");
        Ok(bytes)
    }

    fn recv_i32(&mut self) -> Result<i32> {
        let values = self.recv_i32s(1)?;
        Ok(values[0])
    }

    fn recv_mat3(&mut self, what: &'static str) -> Result<[f64; 9]> {
        let values = self.recv_f64s(9, what)?;
        let mut out = [0.0; 9];
        out.copy_from_slice(&values);
        Ok(out)
    }

    /// Read a `POSDATA` payload (the token has already been consumed).
    pub fn recv_posdata(&mut self) -> Result<PosData> {
        let cell = self.recv_mat3("cell")?;
        let inverse_cell = self.recv_mat3("inverse cell")?;
        let natoms = count_from_wire("atom", self.recv_i32()?)?;
        let positions = self.recv_f64s(natoms * 3, "positions")?;
        Ok(PosData {
            cell,
            inverse_cell,
            positions,
        })
    }

    /// Read a `FORCEREADY` payload (the token has already been consumed).
    ///
    /// A negative extra-byte count is read as no extra data, as in `INIT`.
    pub fn recv_force(&mut self) -> Result<ForceData> {
        let energy = self.recv_f64s(1, "energy")?[0];
        let natoms = count_from_wire("atom", self.recv_i32()?)?;
        let forces = self.recv_f64s(natoms * 3, "forces")?;
        let virial = self.recv_mat3("virial")?;
        let nextra = self.recv_i32()?;
        let extra = if nextra > 0 {
            self.recv_bytes(count_from_wire("extra byte", nextra)?)?
        } else {
            Bytes::new()
        };
        Ok(ForceData {
            energy,
            forces,
            virial,
            extra,
        })
    }

    /// Read an `INIT` payload (the token has already been consumed).
    ///
    /// A negative length is read as an empty payload; some engines send -1.
    pub fn recv_init(&mut self) -> Result<InitData> {
        let bead = self.recv_i32()?;
        let len = self.recv_i32()?;
        let payload = if len > 0 {
            self.recv_bytes(count_from_wire("init byte", len)?)?
        } else {
            Bytes::new()
        };
        Ok(InitData { bead, payload })
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Update the maximum size of a single received array.
    pub fn set_max_payload_size(&mut self, max_payload_size: usize) {
        self.max_payload_size = max_payload_size;
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use bytes::BytesMut;

    use super::*;
    use crate::codec::{encode_f64s, encode_force, encode_i32s, encode_init, encode_posdata, encode_token};

    /// Delivers at most `chunk` bytes per read.
    struct ChunkedReader {
        bytes: Vec<u8>,
        pos: usize,
        chunk: usize,
    }

    impl ChunkedReader {
        fn new(bytes: Vec<u8>, chunk: usize) -> Self {
            Self {
                bytes,
                pos: 0,
                chunk,
            }
        }
    }

    impl Read for ChunkedReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.pos >= self.bytes.len() || buf.is_empty() {
                return Ok(0);
            }
            let n = self.chunk.min(buf.len()).min(self.bytes.len() - self.pos);
            buf[..n].copy_from_slice(&self.bytes[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    fn sample_posdata(natoms: usize) -> PosData {
        PosData {
            cell: [10.0, 0.0, 0.0, 0.0, 11.0, 0.0, 0.0, 0.0, 12.0],
            inverse_cell: [0.1, 0.0, 0.0, 0.0, 1.0 / 11.0, 0.0, 0.0, 0.0, 1.0 / 12.0],
            positions: (0..natoms * 3).map(|i| i as f64 * 0.25 - 1.0).collect(),
        }
    }

    #[test]
    fn posdata_survives_fragmented_delivery() {
        for natoms in [0usize, 1, 2, 17] {
            let data = sample_posdata(natoms);
            let mut wire = BytesMut::new();
            encode_posdata(&data, &mut wire).unwrap();

            for chunk in [1usize, 4, 7] {
                let mut reader = WireReader::new(ChunkedReader::new(wire.to_vec(), chunk));
                assert_eq!(reader.recv_token().unwrap(), Token::Posdata);
                assert_eq!(reader.recv_posdata().unwrap(), data);
            }
        }
    }

    #[test]
    fn force_survives_fragmented_delivery() {
        let data = ForceData {
            energy: -0.75,
            forces: vec![0.5, -0.5, 0.25, 1.0, 2.0, 3.0],
            virial: [1.0, 0.0, 0.0, 0.0, 2.0, 0.0, 0.0, 0.0, 3.0],
            extra: Bytes::from_static(b"engine-notes"),
        };
        let mut wire = BytesMut::new();
        encode_force(&data, &mut wire).unwrap();

        let mut reader = WireReader::new(ChunkedReader::new(wire.to_vec(), 1));
        assert_eq!(reader.recv_token().unwrap(), Token::ForceReady);
        assert_eq!(reader.recv_force().unwrap(), data);
    }

    #[test]
    fn init_with_negative_length_reads_empty_payload() {
        let mut wire = BytesMut::new();
        encode_token(&Token::Init, &mut wire);
        encode_i32s(&[0, -1], &mut wire);

        let mut reader = WireReader::new(Cursor::new(wire.to_vec()));
        assert_eq!(reader.recv_token().unwrap(), Token::Init);
        let init = reader.recv_init().unwrap();
        assert_eq!(init.bead, 0);
        assert!(init.payload.is_empty());
    }

    #[test]
    fn force_with_negative_extra_count_reads_empty_extra() {
        let mut wire = BytesMut::new();
        encode_token(&Token::ForceReady, &mut wire);
        encode_f64s(&[-1.5], &mut wire);
        encode_i32s(&[1], &mut wire);
        encode_f64s(&[0.1, 0.2, 0.3], &mut wire);
        encode_f64s(&[0.0; 9], &mut wire);
        encode_i32s(&[-1], &mut wire);
        encode_token(&Token::Ready, &mut wire);

        let mut reader = WireReader::new(Cursor::new(wire.to_vec()));
        assert_eq!(reader.recv_token().unwrap(), Token::ForceReady);
        let force = reader.recv_force().unwrap();
        assert_eq!(force.energy, -1.5);
        assert_eq!(force.forces, vec![0.1, 0.2, 0.3]);
        assert!(force.extra.is_empty());
        // Nothing after the count belongs to the force payload.
        assert_eq!(reader.recv_token().unwrap(), Token::Ready);
    }

    #[test]
    fn init_roundtrip() {
        let data = InitData {
            bead: 0,
            payload: Bytes::from_static(b"<init/>"),
        };
        let mut wire = BytesMut::new();
        encode_init(&data, &mut wire).unwrap();

        let mut reader = WireReader::new(Cursor::new(wire.to_vec()));
        reader.recv_token().unwrap();
        assert_eq!(reader.recv_init().unwrap(), data);
    }

    #[test]
    fn empty_stream_is_peer_closed() {
        let mut reader = WireReader::new(Cursor::new(Vec::<u8>::new()));
        let err = reader.recv_token().unwrap_err();
        assert!(err.is_peer_closed());
    }

    #[test]
    fn partial_token_is_truncated_not_clean_close() {
        let mut reader = WireReader::new(Cursor::new(b"STAT".to_vec()));
        let err = reader.recv_token().unwrap_err();
        assert!(matches!(
            err,
            FrameError::Truncated {
                expected: 12,
                received: 4
            }
        ));
    }

    #[test]
    fn close_before_payload_is_truncated() {
        let mut wire = BytesMut::new();
        encode_token(&Token::Posdata, &mut wire);

        let mut reader = WireReader::new(Cursor::new(wire.to_vec()));
        assert_eq!(reader.recv_token().unwrap(), Token::Posdata);
        let err = reader.recv_posdata().unwrap_err();
        assert!(matches!(err, FrameError::Truncated { received: 0, .. }));
        assert!(!err.is_peer_closed());
    }

    #[test]
    fn non_finite_position_rejected() {
        let mut data = sample_posdata(2);
        data.positions[4] = f64::INFINITY;
        let mut wire = BytesMut::new();
        encode_posdata(&data, &mut wire).unwrap();

        let mut reader = WireReader::new(Cursor::new(wire.to_vec()));
        reader.recv_token().unwrap();
        let err = reader.recv_posdata().unwrap_err();
        assert!(matches!(
            err,
            FrameError::NonFiniteValue {
                what: "positions",
                index: 4
            }
        ));
    }

    #[test]
    fn negative_atom_count_rejected() {
        let mut wire = BytesMut::new();
        encode_f64s(&[0.0; 18], &mut wire);
        encode_i32s(&[-3], &mut wire);

        let mut reader = WireReader::new(Cursor::new(wire.to_vec()));
        let err = reader.recv_posdata().unwrap_err();
        assert!(matches!(err, FrameError::InvalidCount { value: -3, .. }));
    }

    #[test]
    fn oversized_array_rejected_before_reading() {
        let mut wire = BytesMut::new();
        encode_f64s(&[0.0; 18], &mut wire);
        encode_i32s(&[1000], &mut wire);

        let mut reader = WireReader::new(Cursor::new(wire.to_vec()));
        reader.set_max_payload_size(1024);
        let err = reader.recv_posdata().unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { size: 24000, max: 1024 }));
    }

    struct InterruptedThenData {
        interrupted: bool,
        inner: Cursor<Vec<u8>>,
    }

    impl Read for InterruptedThenData {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if !self.interrupted {
                self.interrupted = true;
                return Err(std::io::Error::from(ErrorKind::Interrupted));
            }
            self.inner.read(buf)
        }
    }

    #[test]
    fn interrupted_read_retries() {
        let mut wire = BytesMut::new();
        encode_token(&Token::Ready, &mut wire);

        let mut reader = WireReader::new(InterruptedThenData {
            interrupted: false,
            inner: Cursor::new(wire.to_vec()),
        });
        assert_eq!(reader.recv_token().unwrap(), Token::Ready);
    }

    struct TimedOutReader;

    impl Read for TimedOutReader {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Err(std::io::Error::from(ErrorKind::WouldBlock))
        }
    }

    #[test]
    fn timeout_propagates_as_io_error() {
        let mut reader = WireReader::new(TimedOutReader);
        let err = reader.recv_token().unwrap_err();
        assert!(matches!(err, FrameError::Io(e) if e.kind() == ErrorKind::WouldBlock));
    }

    #[test]
    fn accessors_and_into_inner() {
        let mut reader = WireReader::new(Cursor::new(Vec::<u8>::new()));
        let _ = reader.get_ref();
        let _ = reader.get_mut();
        let _inner = reader.into_inner();
    }
}
