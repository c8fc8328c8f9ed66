//! Framed message channels to TCF-style agents.
//!
//! tcflink carries commands, results and events between a client and a
//! remote agent over a raw socket (plain TCP or TLS) or over HTTP with a
//! server-push event stream.
//!
//! # Crate Structure
//!
//! - [`transport`]: socket streams, connect, shutdown flag
//! - [`frame`]: escape framing with an optional bulk path for large blocks
//! - [`codec`]: messages, JSON replies, HTTP request targets
//! - [`channel`]: socket and HTTP bindings plus the dispatch task (behind `channel` feature)

/// Re-export transport types.
pub mod transport {
    pub use tcflink_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use tcflink_frame::*;
}

/// Re-export codec types.
pub mod codec {
    pub use tcflink_codec::*;
}

/// Re-export channel types (requires `channel` feature).
#[cfg(feature = "channel")]
pub mod channel {
    pub use tcflink_channel::*;
}
