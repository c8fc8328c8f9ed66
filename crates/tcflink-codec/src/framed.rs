//! Messages over the escape framing.

use std::io::{Read, Write};

use bytes::BytesMut;
use tcflink_frame::{encode_block, encode_eom, Frame, FrameReader, FrameWriter};

use crate::error::Result;
use crate::message::Message;

/// Append `msg` to `dst` as one escaped frame.
///
/// The header is always escaped byte-by-byte; the arguments may take the
/// binary-run fast path when `zero_copy` is set.
pub fn encode_message(msg: &Message, zero_copy: bool, dst: &mut BytesMut) -> Result<()> {
    let mut header = BytesMut::with_capacity(64);
    msg.encode_header(&mut header);
    encode_block(&header, false, dst)?;
    encode_block(msg.args(), zero_copy, dst)?;
    encode_eom(dst);
    Ok(())
}

/// Write `msg` as one frame. The caller decides when to flush.
pub fn write_message<W: Write>(writer: &mut FrameWriter<W>, msg: &Message) -> Result<()> {
    let mut header = BytesMut::with_capacity(64);
    msg.encode_header(&mut header);
    writer.write_block(&header)?;
    writer.write_block(msg.args())?;
    writer.write_eom()?;
    Ok(())
}

/// Read the next message; `None` at end of stream.
pub fn read_message<R: Read>(reader: &mut FrameReader<R>) -> Result<Option<Message>> {
    match reader.read_frame()? {
        Frame::Message(body) => Message::decode(body).map(Some),
        Frame::EndOfStream => Ok(None),
    }
}
