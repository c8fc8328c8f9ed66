//! JSON form of messages, used in HTTP reply bodies.
//!
//! A reply body is a JSON array of objects:
//!
//! ```json
//! [{"Type":"R","Token":"12","Args":[null,{"ID":"p1"}]},
//!  {"Type":"E","Service":"RunControl","Event":"contextSuspended","Args":["p1"]}]
//! ```
//!
//! An object carrying `Error` reports a failure of the request itself.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::args::{decode_args, encode_args};
use crate::error::{CodecError, Result};
use crate::message::{Message, MessageKind};
use crate::token::Token;

/// One element of a reply array, as it appears on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WireReply {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r#type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A decoded reply element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyItem {
    Message(Message),
    /// The remote agent reported an error for the request.
    Error(String),
}

/// Decode an HTTP reply body.
pub fn decode_reply(body: &[u8]) -> Result<Vec<ReplyItem>> {
    let value: Value = serde_json::from_slice(body)?;
    let Value::Array(items) = value else {
        return Err(CodecError::InvalidReply("expected a JSON array".into()));
    };
    tracing::trace!(items = items.len(), "decoding HTTP reply");
    items
        .into_iter()
        .map(|item| {
            if !item.is_object() {
                return Err(CodecError::InvalidReply(format!(
                    "expected an object, got {item}"
                )));
            }
            let wire: WireReply = serde_json::from_value(item)?;
            wire.into_item()
        })
        .collect()
}

/// Encode messages as an HTTP reply body.
pub fn encode_reply(messages: &[Message]) -> Result<Vec<u8>> {
    let wire = messages
        .iter()
        .map(WireReply::from_message)
        .collect::<Result<Vec<_>>>()?;
    Ok(serde_json::to_vec(&wire)?)
}

/// Encode a reply body holding a single error.
pub fn encode_error_reply(error: &str) -> Result<Vec<u8>> {
    let wire = WireReply {
        error: Some(error.to_string()),
        ..WireReply::default()
    };
    Ok(serde_json::to_vec(&[wire])?)
}

impl WireReply {
    pub fn from_message(msg: &Message) -> Result<Self> {
        let args = if msg.args().is_empty() {
            None
        } else {
            Some(decode_args(msg.args())?)
        };
        let mut wire = WireReply {
            r#type: Some(char::from(msg.kind().tag()).to_string()),
            token: msg.token().map(Token::to_string),
            service: msg.service().map(str::to_string),
            args,
            ..WireReply::default()
        };
        match msg.kind() {
            MessageKind::Command => wire.command = msg.name().map(str::to_string),
            MessageKind::Event => wire.event = msg.name().map(str::to_string),
            _ => {}
        }
        Ok(wire)
    }

    pub fn into_item(self) -> Result<ReplyItem> {
        if let Some(error) = self.error {
            return Ok(ReplyItem::Error(error));
        }
        self.into_message().map(ReplyItem::Message)
    }

    fn into_message(self) -> Result<Message> {
        let tag = self
            .r#type
            .as_deref()
            .and_then(|t| t.bytes().next())
            .ok_or(CodecError::MissingField("Type"))?;
        let kind = MessageKind::from_tag(tag)?;
        let args = match &self.args {
            Some(values) => encode_args(values)?,
            None => Bytes::new(),
        };
        let token = || -> Result<Token> {
            self.token
                .clone()
                .map(Token::from)
                .ok_or(CodecError::MissingField("Token"))
        };
        let message = match kind {
            MessageKind::Command => Message::Command {
                token: token()?,
                service: required(self.service.clone(), "Service")?,
                name: required(self.command.clone(), "Command")?,
                args,
            },
            MessageKind::ProgressReply => Message::ProgressReply {
                token: token()?,
                args,
            },
            MessageKind::Result => Message::Result {
                token: token()?,
                args,
            },
            MessageKind::Notify => Message::Notify {
                token: token()?,
                args,
            },
            MessageKind::Event => Message::Event {
                service: required(self.service.clone(), "Service")?,
                name: required(self.event.clone(), "Event")?,
                args,
            },
            MessageKind::FlowControl => Message::FlowControl { args },
        };
        Ok(message)
    }
}

fn required(value: Option<String>, field: &'static str) -> Result<String> {
    value.ok_or(CodecError::MissingField(field))
}
