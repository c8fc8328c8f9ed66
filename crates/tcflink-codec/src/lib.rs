//! Message codec for tcflink channels.
//!
//! A [`Message`] is one of six kinds (command, progress, result, notify,
//! event, flow control). It has two encodings:
//!
//! - bytes carried by the escape framing:
//!   `<type> NUL [<token> NUL] [<service> NUL <name> NUL] <args>`
//! - JSON reply arrays and percent-encoded request targets for the HTTP
//!   binding
//!
//! Arguments are JSON values, each terminated by NUL. The codec carries them
//! as an opaque byte string; [`args`] converts to and from `serde_json`
//! values when needed.

pub mod args;
pub mod error;
pub mod framed;
pub mod http;
pub mod json;
pub mod message;
#[cfg(feature = "async")]
pub mod stream;
pub mod token;

pub use args::{decode_args, encode_args, split_args};
pub use error::{CodecError, Result};
pub use framed::{encode_message, read_message, write_message};
pub use http::{encode_query, parse_request, RequestTarget, SSE_PATH, STOP_PATH};
pub use json::{decode_reply, encode_error_reply, encode_reply, ReplyItem, WireReply};
pub use message::{Message, MessageKind};
#[cfg(feature = "async")]
pub use stream::{Inbound, StreamCodec};
pub use token::Token;
