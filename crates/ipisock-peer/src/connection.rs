use std::time::Duration;

use ipisock_frame::{split, Token, WireReader, WireWriter};
use ipisock_transport::IpiStream;
use tracing::{debug, trace, warn};

use crate::error::{PeerError, Result};

/// Reject a zero timeout up front; `None` means block indefinitely.
pub(crate) fn validate_timeout(timeout: Option<Duration>) -> Result<()> {
    if timeout == Some(Duration::ZERO) {
        return Err(PeerError::Config(
            "timeout must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

/// One connected stream, split into a codec reader and writer.
pub(crate) struct Connection {
    pub(crate) reader: WireReader<IpiStream>,
    pub(crate) writer: WireWriter<IpiStream>,
    peer: String,
}

impl Connection {
    /// Apply the timeout to the stream and split it for reading and writing.
    pub(crate) fn establish(stream: IpiStream, timeout: Option<Duration>) -> Result<Self> {
        stream.set_timeout(timeout)?;
        let peer = stream.peer_addr();
        let (reader, writer) = split(stream)?;
        debug!(%peer, ?timeout, "connection established");
        Ok(Self {
            reader,
            writer,
            peer,
        })
    }

    pub(crate) fn peer(&self) -> &str {
        &self.peer
    }

    /// Send a bare token and read the reply token.
    pub(crate) fn request(&mut self, token: &Token) -> Result<Token> {
        self.writer.send_token(token)?;
        let reply = self.reader.recv_token()?;
        trace!(%token, %reply, "request answered");
        Ok(reply)
    }

    /// Shut the socket down in both directions. Errors are logged only.
    pub(crate) fn close(self) {
        if let Err(err) = self.writer.get_ref().shutdown() {
            warn!(peer = %self.peer, error = %err, "socket shutdown failed");
        }
        debug!(peer = %self.peer, "connection closed");
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("peer", &self.peer)
            .finish_non_exhaustive()
    }
}
