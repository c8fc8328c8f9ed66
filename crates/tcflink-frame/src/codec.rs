use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};
use crate::state::{FramerState, Symbol};

/// The escape byte.
pub const ESC: u8 = 3;

/// Escape code for a literal `ESC` byte.
pub const CODE_ESC: u8 = 0;
/// Escape code for end-of-message.
pub const CODE_EOM: u8 = 1;
/// Escape code for end-of-stream.
pub const CODE_EOS: u8 = 2;
/// Escape code introducing a length-prefixed binary run.
pub const CODE_BINARY: u8 = 3;

/// Blocks longer than this use the binary-run fast path on zero-copy transports.
pub const BULK_THRESHOLD: usize = 32;

/// Default maximum message size: 16 MiB.
pub const DEFAULT_MAX_MESSAGE: usize = 16 * 1024 * 1024;

/// A unit read off a framed stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// The bytes of one message, up to (not including) its end-of-message marker.
    Message(Bytes),
    /// The peer ended the stream.
    EndOfStream,
}

/// Configuration for the frame codec.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum message size in bytes. Default: 16 MiB.
    pub max_message_size: usize,
    /// Whether large blocks may be sent as raw binary runs.
    pub zero_copy: bool,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE,
            zero_copy: true,
        }
    }
}

/// Append `len` as a little-endian base-128 varint.
pub fn encode_varint(mut len: u32, dst: &mut BytesMut) {
    loop {
        if len <= 0x7f {
            dst.put_u8(len as u8);
            return;
        }
        dst.put_u8((len & 0x7f) as u8 | 0x80);
        len >>= 7;
    }
}

/// Encode a block of payload bytes.
///
/// With `zero_copy` set and more than [`BULK_THRESHOLD`] bytes, the block is
/// written as `ESC 3 <varint len> <raw bytes>`; otherwise every `ESC` byte
/// is written as `ESC 0`.
pub fn encode_block(buf: &[u8], zero_copy: bool, dst: &mut BytesMut) -> Result<()> {
    if zero_copy && buf.len() > BULK_THRESHOLD {
        let len = u32::try_from(buf.len()).map_err(|_| FrameError::PayloadTooLarge {
            size: buf.len(),
            max: u32::MAX as usize,
        })?;
        dst.reserve(buf.len() + 7);
        dst.put_u8(ESC);
        dst.put_u8(CODE_BINARY);
        encode_varint(len, dst);
        dst.put_slice(buf);
        return Ok(());
    }

    dst.reserve(buf.len() + buf.len() / 16);
    let mut rest = buf;
    while let Some(pos) = rest.iter().position(|&b| b == ESC) {
        dst.put_slice(&rest[..=pos]);
        dst.put_u8(CODE_ESC);
        rest = &rest[pos + 1..];
    }
    dst.put_slice(rest);
    Ok(())
}

/// Append an end-of-message marker.
pub fn encode_eom(dst: &mut BytesMut) {
    dst.put_slice(&[ESC, CODE_EOM]);
}

/// Append an end-of-stream marker.
pub fn encode_eos(dst: &mut BytesMut) {
    dst.put_slice(&[ESC, CODE_EOS]);
}

/// Encode one complete message: escaped payload followed by end-of-message.
pub fn encode_frame(payload: &[u8], zero_copy: bool, dst: &mut BytesMut) -> Result<()> {
    encode_block(payload, zero_copy, dst)?;
    encode_eom(dst);
    Ok(())
}

/// Incremental decoder turning escaped bytes back into frames.
///
/// Keeps the cursor state and the partially assembled message between calls,
/// so input may be split at any byte boundary.
#[derive(Debug)]
pub struct FrameDecoder {
    state: FramerState,
    message: BytesMut,
    max_message_size: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGE)
    }
}

impl FrameDecoder {
    pub fn new(max_message_size: usize) -> Self {
        Self {
            state: FramerState::Idle,
            message: BytesMut::new(),
            max_message_size,
        }
    }

    /// Decode the next frame from `src`.
    ///
    /// Returns `Ok(None)` if `src` doesn't contain a complete frame yet.
    /// Consumed bytes are removed from `src`.
    pub fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        while !src.is_empty() {
            match self.state {
                FramerState::InBinaryRun(remaining) => {
                    let n = remaining.min(src.len());
                    self.message.extend_from_slice(&src[..n]);
                    src.advance(n);
                    self.state = if n == remaining {
                        FramerState::Idle
                    } else {
                        FramerState::InBinaryRun(remaining - n)
                    };
                }
                FramerState::Idle if src[0] != ESC => {
                    let run = src.iter().position(|&b| b == ESC).unwrap_or(src.len());
                    self.check_size(run)?;
                    self.message.extend_from_slice(&src[..run]);
                    src.advance(run);
                }
                _ => {
                    let byte = src.get_u8();
                    match self.state.step(byte)? {
                        Symbol::Byte(b) => {
                            self.check_size(1)?;
                            self.message.put_u8(b);
                        }
                        Symbol::Eom => {
                            return Ok(Some(Frame::Message(self.message.split().freeze())));
                        }
                        Symbol::Eos => {
                            if !self.message.is_empty() {
                                return Err(FrameError::UnexpectedEof);
                            }
                            return Ok(Some(Frame::EndOfStream));
                        }
                        Symbol::Pending => {
                            if let FramerState::InBinaryRun(len) = self.state {
                                self.check_size(len)?;
                            }
                        }
                    }
                }
            }
        }
        Ok(None)
    }

    /// True when no partial message or escape sequence is buffered.
    pub fn is_idle(&self) -> bool {
        self.state.is_idle() && self.message.is_empty()
    }

    /// Current cursor state.
    pub fn state(&self) -> FramerState {
        self.state
    }

    pub fn set_max_message_size(&mut self, max_message_size: usize) {
        self.max_message_size = max_message_size;
    }

    fn check_size(&self, extra: usize) -> Result<()> {
        let size = self.message.len().saturating_add(extra);
        if size > self.max_message_size {
            return Err(FrameError::PayloadTooLarge {
                size,
                max: self.max_message_size,
            });
        }
        Ok(())
    }
}
