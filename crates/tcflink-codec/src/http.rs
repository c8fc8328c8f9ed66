//! Request targets for the HTTP binding.
//!
//! Commands map to `/tcf/c/<token>/<service>/<command>`, events to
//! `/tcf/e/<service>/<event>`. Arguments become the query string: each
//! argument field is percent-encoded and fields are joined with `&`.

use bytes::Bytes;

use crate::args::split_args;
use crate::error::Result;
use crate::message::Message;
use crate::token::Token;

/// Path of the server-push event stream.
pub const SSE_PATH: &str = "/tcf/sse";
/// Path of the session stop request.
pub const STOP_PATH: &str = "/tcf/stop/";

/// Where an outgoing command or event is sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestTarget {
    /// Set for commands; replies are correlated with it.
    pub token: Option<Token>,
    pub path: String,
    pub query: Option<String>,
}

impl RequestTarget {
    /// Build the target for `msg`. Only commands and events are sent as
    /// requests; other kinds yield `None`.
    pub fn from_message(msg: &Message) -> Result<Option<Self>> {
        let target = match msg {
            Message::Command {
                token,
                service,
                name,
                args,
            } => RequestTarget {
                token: Some(token.clone()),
                path: format!("/tcf/c/{token}/{service}/{name}"),
                query: encode_query(args)?,
            },
            Message::Event {
                service,
                name,
                args,
            } => RequestTarget {
                token: None,
                path: format!("/tcf/e/{service}/{name}"),
                query: encode_query(args)?,
            },
            _ => return Ok(None),
        };
        Ok(Some(target))
    }

    /// Path plus `?query` if there is one.
    pub fn path_and_query(&self) -> String {
        match &self.query {
            Some(query) => format!("{}?{}", self.path, query),
            None => self.path.clone(),
        }
    }
}

/// Parse one accumulated outgoing message and build its request target.
pub fn parse_request(raw: &[u8]) -> Result<Option<RequestTarget>> {
    let msg = Message::decode(Bytes::copy_from_slice(raw))?;
    RequestTarget::from_message(&msg)
}

/// Build the query string for an argument sequence; `None` when empty.
pub fn encode_query(args: &[u8]) -> Result<Option<String>> {
    let fields = split_args(args)?;
    let mut query = String::with_capacity(args.len());
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            query.push('&');
        }
        percent_encode_into(field, &mut query);
    }
    Ok((!query.is_empty()).then_some(query))
}

/// Percent-encode control bytes, space, `%`, `#`, `&` and bytes >= 127.
pub fn percent_encode_into(field: &[u8], out: &mut String) {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";
    for &b in field {
        if b <= b' ' || b == b'%' || b == b'#' || b == b'&' || b >= 127 {
            out.push('%');
            out.push(char::from(HEX[usize::from(b >> 4)]));
            out.push(char::from(HEX[usize::from(b & 0x0f)]));
        } else {
            out.push(char::from(b));
        }
    }
}
