//! Wire protocol shared by client, proxy and computation server.
//!
//! - [`codec`] - frame types, encoder and incremental decoder
//! - [`transport`] - async frame reader/writer over a byte stream

mod codec;
mod transport;

pub use codec::{decode_frames, encode_frame, Frame, FrameDecoder, MAX_FRAME_LEN};
pub use transport::FrameTransport;
