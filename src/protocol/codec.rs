//! Frame codec.
//!
//! Frames are newline-delimited JSON: one compact JSON object per line,
//! tagged by `"type"`. JSON string escaping guarantees a body never
//! contains a raw newline, so the newline is an unambiguous delimiter.
//!
//! ```text
//! {"type":"request","id":1,"expression":"(1+2)*4"}\n
//! {"type":"result","id":1,"value":12.0,"steps":["1+2 = 3","3*4 = 12"],"served_from":"computed"}\n
//! ```

use serde::{Deserialize, Serialize};

use crate::types::errors::ProtocolError;
use crate::types::requests::Request;
use crate::types::responses::{ErrorResponse, EvalResponse, Response};

/// Largest accepted frame body, newline excluded.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// One unit of the wire protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// Expression request.
    Request(Request),
    /// Result response.
    Result(EvalResponse),
    /// Error response.
    Error(ErrorResponse),
    /// Client is done with the connection.
    Exit { id: u64 },
}

impl Frame {
    /// Request id carried by the frame.
    pub fn id(&self) -> u64 {
        match self {
            Frame::Request(r) => r.id,
            Frame::Result(r) => r.id,
            Frame::Error(e) => e.id,
            Frame::Exit { id } => *id,
        }
    }

    /// Short name used in logs and errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Request(_) => "request",
            Frame::Result(_) => "result",
            Frame::Error(_) => "error",
            Frame::Exit { .. } => "exit",
        }
    }

    /// Converts a response frame into a [`Response`].
    pub fn into_response(self) -> Result<Response, ProtocolError> {
        match self {
            Frame::Result(r) => Ok(Response::Result(r)),
            Frame::Error(e) => Ok(Response::Error(e)),
            other => Err(ProtocolError::Unexpected(format!(
                "expected a response, got {}",
                other.kind()
            ))),
        }
    }
}

impl From<Response> for Frame {
    fn from(response: Response) -> Self {
        match response {
            Response::Result(r) => Frame::Result(r),
            Response::Error(e) => Frame::Error(e),
        }
    }
}

impl From<Request> for Frame {
    fn from(request: Request) -> Self {
        Frame::Request(request)
    }
}

/// Serializes a frame, newline included.
pub fn encode_frame(frame: &Frame) -> Result<Vec<u8>, ProtocolError> {
    let mut bytes =
        serde_json::to_vec(frame).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

    if bytes.len() > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge {
            limit: MAX_FRAME_LEN,
        });
    }

    bytes.push(b'\n');
    Ok(bytes)
}

/// Incremental decoder.
///
/// Bytes are fed as they arrive; complete frames are pulled out with
/// [`next_frame`](FrameDecoder::next_frame). Partial frames stay buffered
/// across calls.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    // Bytes of `buf` already known to hold no newline.
    scanned: usize,
    max_len: usize,
}

impl FrameDecoder {
    /// Creates a decoder with the default frame limit.
    pub fn new() -> Self {
        Self::with_max_len(MAX_FRAME_LEN)
    }

    /// Creates a decoder with a custom frame limit.
    pub fn with_max_len(max_len: usize) -> Self {
        Self {
            buf: Vec::new(),
            scanned: 0,
            max_len,
        }
    }

    /// Appends received bytes.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Number of buffered bytes not yet consumed.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Extracts the next complete frame, if any.
    ///
    /// Blank lines between frames are skipped.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, ProtocolError> {
        loop {
            let newline = self.buf[self.scanned..]
                .iter()
                .position(|b| *b == b'\n')
                .map(|offset| self.scanned + offset);

            let Some(end) = newline else {
                self.scanned = self.buf.len();
                if self.buf.len() > self.max_len {
                    return Err(ProtocolError::FrameTooLarge {
                        limit: self.max_len,
                    });
                }
                return Ok(None);
            };

            if end > self.max_len {
                return Err(ProtocolError::FrameTooLarge {
                    limit: self.max_len,
                });
            }

            let line: Vec<u8> = self.buf.drain(..=end).collect();
            self.scanned = 0;

            let body = line.trim_ascii();
            if body.is_empty() {
                continue;
            }

            let frame = serde_json::from_slice(body)
                .map_err(|e| ProtocolError::Malformed(e.to_string()))?;
            return Ok(Some(frame));
        }
    }

    /// Called at end of stream: fails if a partial frame is left over.
    pub fn finish(&self) -> Result<(), ProtocolError> {
        if self.buf.trim_ascii().is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::Truncated {
                pending: self.buf.len(),
            })
        }
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Decodes a complete byte string into frames.
pub fn decode_frames(bytes: &[u8]) -> Result<Vec<Frame>, ProtocolError> {
    let mut decoder = FrameDecoder::new();
    decoder.feed(bytes);

    let mut frames = Vec::new();
    while let Some(frame) = decoder.next_frame()? {
        frames.push(frame);
    }
    decoder.finish()?;
    Ok(frames)
}
