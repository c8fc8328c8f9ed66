//! Escape framing for binary-safe message streams.
//!
//! Messages travel as a raw byte stream delimited by in-band escape codes
//! introduced by `ESC` (byte 3):
//! - `ESC 0` is a literal `ESC` byte
//! - `ESC 1` ends the current message
//! - `ESC 2` ends the stream
//! - `ESC 3 <len>` introduces `len` raw bytes (little-endian base-128 length)
//!
//! The decoder is incremental: input may arrive split at any byte.

pub mod codec;
pub mod error;
pub mod reader;
pub mod state;
pub mod writer;

pub use codec::{
    encode_block, encode_eom, encode_eos, encode_frame, encode_varint, Frame, FrameConfig,
    FrameDecoder, BULK_THRESHOLD, CODE_BINARY, CODE_EOM, CODE_EOS, CODE_ESC, DEFAULT_MAX_MESSAGE,
    ESC,
};
pub use error::{FrameError, Result};
pub use reader::FrameReader;
pub use state::{FramerState, Symbol};
pub use writer::FrameWriter;
