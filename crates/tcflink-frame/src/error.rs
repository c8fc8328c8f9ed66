/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// An escape byte was followed by an unknown escape code.
    #[error("invalid escape sequence: ESC {0}")]
    InvalidEscape(u8),

    /// A binary-run length prefix does not fit in 32 bits.
    #[error("binary run length prefix overflows")]
    LengthOverflow,

    /// The message exceeds the configured maximum size.
    #[error("message too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The stream ended in the middle of a message.
    #[error("unexpected end of stream inside a message")]
    UnexpectedEof,

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, FrameError>;
