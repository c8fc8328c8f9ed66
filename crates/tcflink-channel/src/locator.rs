//! The few Locator service messages a channel itself handles.

use bytes::Bytes;
use serde_json::Value;
use tcflink_codec::{decode_args, encode_args, CodecError, Message};

use crate::error::Result;

/// Locator service name.
pub const LOCATOR: &str = "Locator";
/// Event announcing the services a peer offers.
pub const HELLO: &str = "Hello";
/// No-op command used to pump queued events over HTTP.
pub const SYNC: &str = "sync";

/// Build the hello event listing `services`.
pub fn hello(services: &[String]) -> Result<Message> {
    let list = Value::from(services.to_vec());
    Ok(Message::event(LOCATOR, HELLO, encode_args(&[list])?))
}

/// True if `msg` is a Locator hello.
pub fn is_hello(msg: &Message) -> bool {
    msg.is_event(LOCATOR, HELLO)
}

/// Service names announced by a hello event.
pub fn hello_services(args: &Bytes) -> Result<Vec<String>> {
    let values = decode_args(args)?;
    let Some(Value::Array(list)) = values.into_iter().next() else {
        return Err(CodecError::InvalidReply("hello without a service list".into()).into());
    };
    Ok(list
        .into_iter()
        .filter_map(|v| v.as_str().map(str::to_string))
        .collect())
}
