use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{CodecError, Result};
use crate::token::Token;

/// Message type, identified on the wire by its first byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Command,
    ProgressReply,
    Result,
    Notify,
    Event,
    FlowControl,
}

impl MessageKind {
    /// Wire tag character.
    pub const fn tag(self) -> u8 {
        match self {
            MessageKind::Command => b'C',
            MessageKind::ProgressReply => b'P',
            MessageKind::Result => b'R',
            MessageKind::Notify => b'N',
            MessageKind::Event => b'E',
            MessageKind::FlowControl => b'F',
        }
    }

    pub fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            b'C' => Ok(MessageKind::Command),
            b'P' => Ok(MessageKind::ProgressReply),
            b'R' => Ok(MessageKind::Result),
            b'N' => Ok(MessageKind::Notify),
            b'E' => Ok(MessageKind::Event),
            b'F' => Ok(MessageKind::FlowControl),
            other => Err(CodecError::UnknownType(other)),
        }
    }

    /// True for the reply kinds correlated by token.
    pub fn is_reply(self) -> bool {
        matches!(
            self,
            MessageKind::ProgressReply | MessageKind::Result | MessageKind::Notify
        )
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MessageKind::Command => "command",
            MessageKind::ProgressReply => "progress",
            MessageKind::Result => "result",
            MessageKind::Notify => "notify",
            MessageKind::Event => "event",
            MessageKind::FlowControl => "flow-control",
        })
    }
}

/// One logical message exchanged over a channel.
///
/// `args` is an argument sequence (see [`crate::args`]) carried verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Command {
        token: Token,
        service: String,
        name: String,
        args: Bytes,
    },
    ProgressReply {
        token: Token,
        args: Bytes,
    },
    Result {
        token: Token,
        args: Bytes,
    },
    Notify {
        token: Token,
        args: Bytes,
    },
    Event {
        service: String,
        name: String,
        args: Bytes,
    },
    FlowControl {
        args: Bytes,
    },
}

impl Message {
    pub fn command(
        token: impl Into<Token>,
        service: impl Into<String>,
        name: impl Into<String>,
        args: impl Into<Bytes>,
    ) -> Self {
        Message::Command {
            token: token.into(),
            service: service.into(),
            name: name.into(),
            args: args.into(),
        }
    }

    pub fn event(service: impl Into<String>, name: impl Into<String>, args: impl Into<Bytes>) -> Self {
        Message::Event {
            service: service.into(),
            name: name.into(),
            args: args.into(),
        }
    }

    pub fn result(token: impl Into<Token>, args: impl Into<Bytes>) -> Self {
        Message::Result {
            token: token.into(),
            args: args.into(),
        }
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Command { .. } => MessageKind::Command,
            Message::ProgressReply { .. } => MessageKind::ProgressReply,
            Message::Result { .. } => MessageKind::Result,
            Message::Notify { .. } => MessageKind::Notify,
            Message::Event { .. } => MessageKind::Event,
            Message::FlowControl { .. } => MessageKind::FlowControl,
        }
    }

    pub fn token(&self) -> Option<&Token> {
        match self {
            Message::Command { token, .. }
            | Message::ProgressReply { token, .. }
            | Message::Result { token, .. }
            | Message::Notify { token, .. } => Some(token),
            Message::Event { .. } | Message::FlowControl { .. } => None,
        }
    }

    pub fn service(&self) -> Option<&str> {
        match self {
            Message::Command { service, .. } | Message::Event { service, .. } => Some(service),
            _ => None,
        }
    }

    /// Command or event name.
    pub fn name(&self) -> Option<&str> {
        match self {
            Message::Command { name, .. } | Message::Event { name, .. } => Some(name),
            _ => None,
        }
    }

    pub fn args(&self) -> &Bytes {
        match self {
            Message::Command { args, .. }
            | Message::ProgressReply { args, .. }
            | Message::Result { args, .. }
            | Message::Notify { args, .. }
            | Message::Event { args, .. }
            | Message::FlowControl { args } => args,
        }
    }

    /// True if this is the event `service.name`.
    pub fn is_event(&self, service: &str, name: &str) -> bool {
        matches!(self, Message::Event { service: s, name: n, .. } if s == service && n == name)
    }

    /// Append everything before the arguments: type tag and NUL-terminated fields.
    pub fn encode_header(&self, dst: &mut BytesMut) {
        dst.put_u8(self.kind().tag());
        dst.put_u8(0);
        if let Some(token) = self.token() {
            put_field(dst, token.as_bytes());
        }
        if let (Some(service), Some(name)) = (self.service(), self.name()) {
            put_field(dst, service.as_bytes());
            put_field(dst, name.as_bytes());
        }
    }

    /// Append the unescaped byte representation.
    pub fn encode(&self, dst: &mut BytesMut) {
        self.encode_header(dst);
        dst.put_slice(self.args());
    }

    /// Parse the unescaped body of one framed message.
    pub fn decode(body: Bytes) -> Result<Self> {
        let tag = *body.first().ok_or(CodecError::MissingField("type"))?;
        let kind = MessageKind::from_tag(tag)?;
        if body.get(1) != Some(&0) {
            return Err(CodecError::MissingTerminator { field: "type" });
        }

        let mut fields = Fields { body, pos: 2 };
        let message = match kind {
            MessageKind::Command => Message::Command {
                token: Token::new(fields.next("token")?),
                service: fields.next_text("service")?,
                name: fields.next_text("command")?,
                args: fields.rest(),
            },
            MessageKind::ProgressReply => Message::ProgressReply {
                token: Token::new(fields.next("token")?),
                args: fields.rest(),
            },
            MessageKind::Result => Message::Result {
                token: Token::new(fields.next("token")?),
                args: fields.rest(),
            },
            MessageKind::Notify => Message::Notify {
                token: Token::new(fields.next("token")?),
                args: fields.rest(),
            },
            MessageKind::Event => Message::Event {
                service: fields.next_text("service")?,
                name: fields.next_text("event")?,
                args: fields.rest(),
            },
            MessageKind::FlowControl => Message::FlowControl {
                args: fields.rest(),
            },
        };
        Ok(message)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", char::from(self.kind().tag()))?;
        if let Some(token) = self.token() {
            write!(f, " {token}")?;
        }
        if let (Some(service), Some(name)) = (self.service(), self.name()) {
            write!(f, " {service} {name}")?;
        }
        let args = self.args();
        if !args.is_empty() {
            let text = String::from_utf8_lossy(args);
            write!(f, " {}", text.trim_end_matches('\0').replace('\0', " "))?;
        }
        Ok(())
    }
}

fn put_field(dst: &mut BytesMut, field: &[u8]) {
    dst.put_slice(field);
    dst.put_u8(0);
}

struct Fields {
    body: Bytes,
    pos: usize,
}

impl Fields {
    fn next(&mut self, field: &'static str) -> Result<Bytes> {
        let rest = &self.body[self.pos..];
        let end = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(CodecError::MissingTerminator { field })?;
        let value = self.body.slice(self.pos..self.pos + end);
        self.pos += end + 1;
        Ok(value)
    }

    fn next_text(&mut self, field: &'static str) -> Result<String> {
        let bytes = self.next(field)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| CodecError::InvalidUtf8 { field })
    }

    fn rest(self) -> Bytes {
        self.body.slice(self.pos..)
    }
}
