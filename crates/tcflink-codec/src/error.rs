use tcflink_frame::FrameError;

/// Errors raised while encoding or decoding messages.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// A variable-length field is not followed by its NUL terminator.
    #[error("invalid message format: missing terminator after {field}")]
    MissingTerminator { field: &'static str },

    /// The message starts with an unknown type character.
    #[error("unknown message type: {0:#04x}")]
    UnknownType(u8),

    /// A name field is not valid UTF-8.
    #[error("invalid UTF-8 in {field}")]
    InvalidUtf8 { field: &'static str },

    /// A required field is absent.
    #[error("missing field: {0}")]
    MissingField(&'static str),

    /// An HTTP reply does not have the expected shape.
    #[error("invalid HTTP reply: {0}")]
    InvalidReply(String),

    /// JSON (de)serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The underlying framing failed.
    #[error(transparent)]
    Frame(#[from] FrameError),
}

impl From<std::io::Error> for CodecError {
    fn from(err: std::io::Error) -> Self {
        CodecError::Frame(FrameError::Io(err))
    }
}

pub type Result<T> = std::result::Result<T, CodecError>;
