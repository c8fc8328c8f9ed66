//! Channel bindings for tcflink.
//!
//! A [`Channel`] pairs one [`Transport`] with one [`DispatchCore`]:
//!
//! - [`SocketTransport`] speaks escape-framed messages over TCP or TLS
//! - [`HttpTransport`] maps commands and events to HTTP GETs and listens on a
//!   server-push event stream
//!
//! All decoding results and lifecycle changes funnel into a single dispatch
//! task, which is the only place the core is called from.

pub mod dispatch;
pub mod error;
pub mod http;
pub mod locator;
pub mod socket;
pub mod token;
pub mod transport;

pub use dispatch::{Channel, ChannelConfig, ChannelState, DispatchCore, DEFAULT_QUEUE_CAPACITY};
pub use error::{ChannelError, Result};
pub use http::{new_session_id, HttpConfig, HttpTransport, SESSION_HEADER};
pub use socket::SocketTransport;
pub use token::TokenGenerator;
pub use transport::{EventSender, Transport, TransportEvent};
