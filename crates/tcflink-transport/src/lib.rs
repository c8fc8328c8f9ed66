//! Socket transport abstraction for tcflink channels.
//!
//! Provides a single stream type over the transports a remote agent can be
//! reached through:
//! - plain TCP sockets
//! - TLS-upgraded TCP sockets (rustls)
//!
//! This is the lowest layer of tcflink. The framing and channel crates build
//! on the [`SocketStream`] and [`ShutdownFlag`] types provided here.

pub mod error;
pub mod shutdown;
pub mod stream;

pub use error::{Result, TransportError};
pub use shutdown::ShutdownFlag;
pub use stream::{connect, SocketConfig, SocketStream, TlsConfig};
