use bytes::BytesMut;
use tcflink_frame::{Frame, FrameConfig, FrameDecoder, FrameError};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{CodecError, Result};
use crate::framed::encode_message;
use crate::message::Message;

/// Item produced by [`StreamCodec`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Message(Message),
    /// The peer sent an end-of-stream marker.
    EndOfStream,
}

/// `tokio_util` codec for escape-framed messages.
#[derive(Debug)]
pub struct StreamCodec {
    decoder: FrameDecoder,
    zero_copy: bool,
}

impl StreamCodec {
    pub fn new(config: &FrameConfig) -> Self {
        Self {
            decoder: FrameDecoder::new(config.max_message_size),
            zero_copy: config.zero_copy,
        }
    }
}

impl Default for StreamCodec {
    fn default() -> Self {
        Self::new(&FrameConfig::default())
    }
}

impl Decoder for StreamCodec {
    type Item = Inbound;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Inbound>> {
        match self.decoder.decode(src)? {
            Some(Frame::Message(body)) => Message::decode(body).map(|m| Some(Inbound::Message(m))),
            Some(Frame::EndOfStream) => Ok(Some(Inbound::EndOfStream)),
            None => Ok(None),
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Inbound>> {
        if let Some(item) = self.decode(src)? {
            return Ok(Some(item));
        }
        if self.decoder.is_idle() && src.is_empty() {
            Ok(None)
        } else {
            Err(FrameError::UnexpectedEof.into())
        }
    }
}

impl<'a> Encoder<&'a Message> for StreamCodec {
    type Error = CodecError;

    fn encode(&mut self, msg: &'a Message, dst: &mut BytesMut) -> Result<()> {
        encode_message(msg, self.zero_copy, dst)
    }
}
