use std::io::{ErrorKind, Write};

use bytes::BytesMut;
use tracing::trace;

use crate::codec::{
    encode_f64s, encode_force, encode_i32s, encode_init, encode_posdata, encode_token, ForceData,
    InitData, PosData,
};
use crate::error::{FrameError, Result};
use crate::token::Token;

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Writes tokens, arrays and complete messages to any `Write` stream.
///
/// Each call encodes into a scratch buffer first and then writes it out in
/// full, so a message is never left half-sent by an encoding error.
pub struct WireWriter<T> {
    inner: T,
    buf: BytesMut,
}

impl<T: Write> WireWriter<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
        }
    }

    /// Send a bare command/reply token.
    pub fn send_token(&mut self, token: &Token) -> Result<()> {
        self.buf.clear();
        encode_token(token, &mut self.buf);
        trace!(%token, "send token");
        self.write_buf()
    }

    pub fn send_i32s(&mut self, values: &[i32]) -> Result<()> {
        self.buf.clear();
        encode_i32s(values, &mut self.buf);
        trace!(count = values.len(), "send i32 array");
        self.write_buf()
    }

    pub fn send_f64s(&mut self, values: &[f64]) -> Result<()> {
        self.buf.clear();
        encode_f64s(values, &mut self.buf);
        trace!(count = values.len(), "send f64 array");
        self.write_buf()
    }

    pub fn send_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.buf.clear();
        self.buf.extend_from_slice(bytes);
        trace!(len = bytes.len(), "send raw bytes");
        self.write_buf()
    }

    /// Send `POSDATA` followed by its payload.
    pub fn send_posdata(&mut self, data: &PosData) -> Result<()> {
        self.buf.clear();
        encode_posdata(data, &mut self.buf)?;
        trace!(natoms = data.atom_count(), bytes = self.buf.len(), "send posdata");
        self.write_buf()
    }

    /// Send `FORCEREADY` followed by its payload.
    pub fn send_force(&mut self, data: &ForceData) -> Result<()> {
        self.buf.clear();
        encode_force(data, &mut self.buf)?;
        trace!(natoms = data.atom_count(), bytes = self.buf.len(), "send force");
        self.write_buf()
    }

    /// Send `INIT` followed by its payload.
    pub fn send_init(&mut self, data: &InitData) -> Result<()> {
        self.buf.clear();
        encode_init(data, &mut self.buf)?;
        trace!(bead = data.bead, len = data.payload.len(), "send init");
        self.write_buf()
    }

    fn write_buf(&mut self) -> Result<()> {
        let mut offset = 0usize;
        while offset < self.buf.len() {
            match self.inner.write(&self.buf[offset..]) {
                Ok(0) => {
                    return Err(FrameError::Truncated {
                        expected: self.buf.len(),
                        received: offset,
                    })
                }
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }

        self.flush()
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }
}
