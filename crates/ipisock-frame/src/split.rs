use ipisock_transport::{IpiStream, TransportError};

use crate::error::{FrameError, Result};
use crate::reader::WireReader;
use crate::writer::WireWriter;

/// Split a connected stream into a reader and a writer over two handles of
/// the same socket.
pub fn split(stream: IpiStream) -> Result<(WireReader<IpiStream>, WireWriter<IpiStream>)> {
    let reader_stream = stream.try_clone().map_err(transport_to_frame_error)?;
    Ok((WireReader::new(reader_stream), WireWriter::new(stream)))
}

fn transport_to_frame_error(err: TransportError) -> FrameError {
    match err {
        TransportError::Io(io) | TransportError::Accept(io) => FrameError::Io(io),
        TransportError::Bind { source, .. } | TransportError::Connect { source, .. } => {
            FrameError::Io(source)
        }
        other => FrameError::Io(std::io::Error::other(other.to_string())),
    }
}
