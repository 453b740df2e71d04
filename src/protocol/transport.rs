//! Async frame transport.
//!
//! Wraps any `AsyncRead + AsyncWrite` stream (a `TcpStream` in production,
//! `tokio::io::duplex` in tests) and moves whole [`Frame`]s over it.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::types::errors::ProtocolError;

use super::codec::{encode_frame, Frame, FrameDecoder};

const READ_CHUNK: usize = 4096;

/// Frame-oriented view of a byte stream.
pub struct FrameTransport<T> {
    io: T,
    decoder: FrameDecoder,
    chunk: Box<[u8]>,
}

impl<T> FrameTransport<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    /// Wraps a stream.
    pub fn new(io: T) -> Self {
        Self {
            io,
            decoder: FrameDecoder::new(),
            chunk: vec![0u8; READ_CHUNK].into_boxed_slice(),
        }
    }

    /// Reads the next frame.
    ///
    /// Returns `Ok(None)` on a clean end of stream. Cancel safe: bytes are
    /// only moved into the decoder after a read completes, so dropping the
    /// future (e.g. on an idle timeout) loses nothing.
    pub async fn read_frame(&mut self) -> Result<Option<Frame>, ProtocolError> {
        loop {
            if let Some(frame) = self.decoder.next_frame()? {
                tracing::trace!(kind = frame.kind(), id = frame.id(), "Received frame");
                return Ok(Some(frame));
            }

            let n = self.io.read(&mut self.chunk).await?;
            if n == 0 {
                self.decoder.finish()?;
                return Ok(None);
            }
            self.decoder.feed(&self.chunk[..n]);
        }
    }

    /// Writes one frame and flushes it.
    pub async fn write_frame(&mut self, frame: &Frame) -> Result<(), ProtocolError> {
        let bytes = encode_frame(frame)?;

        self.io.write_all(&bytes).await?;
        // Flush so the peer sees the frame immediately.
        self.io.flush().await?;

        tracing::trace!(kind = frame.kind(), id = frame.id(), "Sent frame");
        Ok(())
    }

    /// Shuts down the write half.
    pub async fn shutdown(&mut self) -> Result<(), ProtocolError> {
        self.io.shutdown().await?;
        Ok(())
    }

    /// Borrows the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.io
    }
}
