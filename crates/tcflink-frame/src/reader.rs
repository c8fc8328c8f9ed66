use std::io::{ErrorKind, Read};

use bytes::BytesMut;
use tcflink_transport::ShutdownFlag;

use crate::codec::{Frame, FrameConfig, FrameDecoder};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Reads complete frames from any `Read` stream.
///
/// Handles partial reads and escape sequences split across reads; callers
/// always get whole messages.
pub struct FrameReader<T> {
    inner: T,
    buf: BytesMut,
    decoder: FrameDecoder,
    config: FrameConfig,
    shutdown: ShutdownFlag,
}

impl<T: Read> FrameReader<T> {
    /// Create a new frame reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame reader with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            decoder: FrameDecoder::new(config.max_message_size),
            config,
            shutdown: ShutdownFlag::new(),
        }
    }

    /// Share a close flag with the writing side.
    ///
    /// Once the flag is tripped, reads report [`Frame::EndOfStream`] and
    /// I/O errors are swallowed.
    pub fn with_shutdown(mut self, shutdown: ShutdownFlag) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Read the next complete frame (blocking).
    ///
    /// EOF between messages is reported as [`Frame::EndOfStream`]; EOF inside
    /// a message is [`FrameError::UnexpectedEof`].
    pub fn read_frame(&mut self) -> Result<Frame> {
        loop {
            if self.shutdown.is_tripped() {
                return Ok(Frame::EndOfStream);
            }

            if let Some(frame) = self.decoder.decode(&mut self.buf)? {
                return Ok(frame);
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    return match self.shutdown.filter(err) {
                        Some(err) => Err(FrameError::Io(err)),
                        None => Ok(Frame::EndOfStream),
                    };
                }
            };

            if read == 0 {
                if self.decoder.is_idle() || self.shutdown.is_tripped() {
                    return Ok(Frame::EndOfStream);
                }
                tracing::debug!(state = ?self.decoder.state(), "stream closed inside a message");
                return Err(FrameError::UnexpectedEof);
            }

            self.buf.extend_from_slice(&chunk[..read]);
        }
    }

    /// The close flag observed by this reader.
    pub fn shutdown(&self) -> &ShutdownFlag {
        &self.shutdown
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Update maximum message size for subsequent decoding.
    pub fn set_max_message_size(&mut self, max_message_size: usize) {
        self.config.max_message_size = max_message_size;
        self.decoder.set_max_message_size(max_message_size);
    }

    /// Current frame reader configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}
