use std::io::{ErrorKind, Write};

use bytes::{BufMut, BytesMut};
use tcflink_transport::ShutdownFlag;

use crate::codec::{encode_block, encode_eom, encode_eos, encode_varint, FrameConfig};
use crate::error::{FrameError, Result};
use crate::{BULK_THRESHOLD, CODE_BINARY, ESC};

/// Size of the staging buffer; it is drained to the stream once full.
const BUFFER_SIZE: usize = 0x1000;

/// Writes escaped message blocks to any `Write` stream.
///
/// Output is staged in a small buffer and pushed to the stream when the
/// buffer fills, when a binary run bypasses it, or on [`flush`](Self::flush).
pub struct FrameWriter<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
    shutdown: ShutdownFlag,
}

impl<T: Write> FrameWriter<T> {
    /// Create a new frame writer with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame writer with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(BUFFER_SIZE),
            config,
            shutdown: ShutdownFlag::new(),
        }
    }

    /// Share a close flag with the reading side.
    ///
    /// Once tripped, every write is discarded.
    pub fn with_shutdown(mut self, shutdown: ShutdownFlag) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Append a block of message bytes.
    ///
    /// On zero-copy configurations a block longer than [`BULK_THRESHOLD`]
    /// is written as a binary run straight from `block`.
    pub fn write_block(&mut self, block: &[u8]) -> Result<()> {
        if self.shutdown.is_tripped() {
            return Ok(());
        }
        if self.config.zero_copy && block.len() > BULK_THRESHOLD {
            let len = u32::try_from(block.len()).map_err(|_| FrameError::PayloadTooLarge {
                size: block.len(),
                max: u32::MAX as usize,
            })?;
            self.buf.put_u8(ESC);
            self.buf.put_u8(CODE_BINARY);
            encode_varint(len, &mut self.buf);
            self.drain()?;
            return write_all(&mut self.inner, block);
        }
        encode_block(block, false, &mut self.buf)?;
        if self.buf.len() >= BUFFER_SIZE {
            self.drain()?;
        }
        Ok(())
    }

    /// Terminate the current message.
    pub fn write_eom(&mut self) -> Result<()> {
        if self.shutdown.is_tripped() {
            return Ok(());
        }
        encode_eom(&mut self.buf);
        if self.buf.len() >= BUFFER_SIZE {
            self.drain()?;
        }
        Ok(())
    }

    /// Terminate the stream. The caller should flush afterwards.
    pub fn write_eos(&mut self) -> Result<()> {
        if self.shutdown.is_tripped() {
            return Ok(());
        }
        encode_eos(&mut self.buf);
        Ok(())
    }

    /// Push staged bytes and flush the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        if self.shutdown.is_tripped() {
            return Ok(());
        }
        self.drain()?;
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    /// Number of staged bytes not yet written to the stream.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the writer and return the inner stream. Staged bytes are dropped.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current frame writer configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }

    fn drain(&mut self) -> Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let staged = self.buf.split();
        write_all(&mut self.inner, &staged)
    }
}

fn write_all<T: Write>(inner: &mut T, bytes: &[u8]) -> Result<()> {
    let mut offset = 0usize;
    while offset < bytes.len() {
        match inner.write(&bytes[offset..]) {
            Ok(0) => return Err(FrameError::Io(ErrorKind::WriteZero.into())),
            Ok(n) => offset += n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
            Err(err) => return Err(FrameError::Io(err)),
        }
    }
    Ok(())
}
