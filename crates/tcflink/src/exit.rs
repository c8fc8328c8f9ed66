use std::fmt;
use std::io;

use tcflink_channel::ChannelError;
use tcflink_codec::CodecError;
use tcflink_frame::FrameError;
use tcflink_transport::TransportError;

// Exit code constants aligned with rsfulmen/DDR-0002 semantics.
pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: &io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::ConnectionRefused => FAILURE,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: &TransportError) -> CliError {
    match err {
        TransportError::Connect { source, addr } => {
            io_error(&format!("{context} ({addr})"), source)
        }
        TransportError::Io(source) => io_error(context, source),
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn frame_error(context: &str, err: &FrameError) -> CliError {
    match err {
        FrameError::Io(source) => io_error(context, source),
        FrameError::UnexpectedEof => CliError::new(FAILURE, format!("{context}: {err}")),
        other => CliError::new(DATA_INVALID, format!("{context}: {other}")),
    }
}

pub fn codec_error(context: &str, err: &CodecError) -> CliError {
    match err {
        CodecError::Frame(err) => frame_error(context, err),
        other => CliError::new(DATA_INVALID, format!("{context}: {other}")),
    }
}

pub fn channel_error(context: &str, err: &ChannelError) -> CliError {
    match err {
        ChannelError::Transport(err) => transport_error(context, err),
        ChannelError::Frame(err) => frame_error(context, err),
        ChannelError::Codec(err) => codec_error(context, err),
        ChannelError::Closed => CliError::new(FAILURE, format!("{context}: {err}")),
        ChannelError::DispatchGone => CliError::new(INTERNAL, format!("{context}: {err}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refused_connect_is_failure() {
        let err = TransportError::Connect {
            addr: "127.0.0.1:1".to_string(),
            source: io::Error::from(io::ErrorKind::ConnectionRefused),
        };
        let cli = channel_error("connect failed", &ChannelError::Transport(err));
        assert_eq!(cli.code, FAILURE);
        assert!(cli.message.contains("127.0.0.1:1"));
    }

    #[test]
    fn framing_violations_are_invalid_data() {
        let cli = channel_error("receive failed", &FrameError::InvalidEscape(9).into());
        assert_eq!(cli.code, DATA_INVALID);
    }

    #[test]
    fn timeouts_map_to_124() {
        let cli = io_error("connect failed", &io::Error::from(io::ErrorKind::TimedOut));
        assert_eq!(cli.code, TIMEOUT);
    }
}
