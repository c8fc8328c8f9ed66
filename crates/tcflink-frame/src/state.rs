//! Byte-level state machine of the escape framing read path.

use crate::error::{FrameError, Result};
use crate::{CODE_BINARY, CODE_EOM, CODE_EOS, CODE_ESC, ESC};

/// Logical symbol produced by feeding one wire byte to [`FramerState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Symbol {
    /// A payload byte.
    Byte(u8),
    /// End of the current message.
    Eom,
    /// End of the stream.
    Eos,
    /// The byte was consumed as part of an escape sequence.
    Pending,
}

/// Read-path cursor, one per stream direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FramerState {
    /// Scanning for escape bytes.
    #[default]
    Idle,
    /// The previous byte was `ESC`; the next one is an escape code.
    InEscape,
    /// Accumulating the varint length of a binary run.
    InLength { value: u32, shift: u32 },
    /// Passing the given number of raw bytes through unescaped.
    InBinaryRun(usize),
}

impl FramerState {
    /// Feed one wire byte.
    pub fn step(&mut self, byte: u8) -> Result<Symbol> {
        match *self {
            FramerState::Idle => {
                if byte == ESC {
                    *self = FramerState::InEscape;
                    Ok(Symbol::Pending)
                } else {
                    Ok(Symbol::Byte(byte))
                }
            }
            FramerState::InEscape => {
                *self = FramerState::Idle;
                match byte {
                    CODE_ESC => Ok(Symbol::Byte(ESC)),
                    CODE_EOM => Ok(Symbol::Eom),
                    CODE_EOS => Ok(Symbol::Eos),
                    CODE_BINARY => {
                        *self = FramerState::InLength { value: 0, shift: 0 };
                        Ok(Symbol::Pending)
                    }
                    code => Err(FrameError::InvalidEscape(code)),
                }
            }
            FramerState::InLength { value, shift } => {
                let bits = u32::from(byte & 0x7f);
                if shift > 28 || (shift == 28 && bits > 0x0f) {
                    return Err(FrameError::LengthOverflow);
                }
                let value = value | (bits << shift);
                *self = if byte & 0x80 != 0 {
                    FramerState::InLength {
                        value,
                        shift: shift + 7,
                    }
                } else if value == 0 {
                    FramerState::Idle
                } else {
                    FramerState::InBinaryRun(value as usize)
                };
                Ok(Symbol::Pending)
            }
            FramerState::InBinaryRun(remaining) => {
                *self = if remaining > 1 {
                    FramerState::InBinaryRun(remaining - 1)
                } else {
                    FramerState::Idle
                };
                Ok(Symbol::Byte(byte))
            }
        }
    }

    /// True when no escape sequence or binary run is in progress.
    pub fn is_idle(&self) -> bool {
        matches!(self, FramerState::Idle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(state: &mut FramerState, bytes: &[u8]) -> Vec<Symbol> {
        bytes
            .iter()
            .map(|&b| state.step(b).unwrap())
            .filter(|s| *s != Symbol::Pending)
            .collect()
    }

    #[test]
    fn plain_bytes_pass_through() {
        let mut state = FramerState::default();
        assert_eq!(
            feed(&mut state, &[0, 1, 2, 4, 255]),
            vec![
                Symbol::Byte(0),
                Symbol::Byte(1),
                Symbol::Byte(2),
                Symbol::Byte(4),
                Symbol::Byte(255)
            ]
        );
        assert!(state.is_idle());
    }

    #[test]
    fn escape_codes_map_to_symbols() {
        let mut state = FramerState::default();
        assert_eq!(
            feed(&mut state, &[ESC, 0, ESC, 1, ESC, 2]),
            vec![Symbol::Byte(ESC), Symbol::Eom, Symbol::Eos]
        );
    }

    #[test]
    fn binary_run_passes_escape_bytes_raw() {
        let mut state = FramerState::default();
        let symbols = feed(&mut state, &[ESC, 3, 3, ESC, ESC, 1, 9]);
        assert_eq!(
            symbols,
            vec![
                Symbol::Byte(ESC),
                Symbol::Byte(ESC),
                Symbol::Byte(1),
                Symbol::Byte(9)
            ]
        );
        assert!(state.is_idle());
    }

    #[test]
    fn multi_byte_length_enters_run() {
        let mut state = FramerState::default();
        feed(&mut state, &[ESC, 3, 0x80, 0x01]);
        assert_eq!(state, FramerState::InBinaryRun(128));
    }

    #[test]
    fn zero_length_run_returns_to_idle() {
        let mut state = FramerState::default();
        feed(&mut state, &[ESC, 3, 0]);
        assert!(state.is_idle());
    }

    #[test]
    fn unknown_escape_code_is_rejected() {
        let mut state = FramerState::default();
        state.step(ESC).unwrap();
        assert!(matches!(state.step(4), Err(FrameError::InvalidEscape(4))));
    }

    #[test]
    fn oversized_length_prefix_is_rejected() {
        let mut state = FramerState::default();
        feed(&mut state, &[ESC, 3, 0xff, 0xff, 0xff, 0xff]);
        assert!(matches!(state.step(0x7f), Err(FrameError::LengthOverflow)));
    }
}
