use tcflink_codec::CodecError;
use tcflink_frame::FrameError;
use tcflink_transport::TransportError;

/// Errors that end or refuse channel operations.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// Transport-level error (connect, socket, HTTP).
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Framing error on the byte stream.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// Message encoding or decoding error.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The channel is closed.
    #[error("channel closed")]
    Closed,

    /// The dispatch task is no longer running.
    #[error("dispatch task is gone")]
    DispatchGone,
}

pub type Result<T> = std::result::Result<T, ChannelError>;
