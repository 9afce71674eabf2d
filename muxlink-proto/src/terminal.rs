//! Pseudo-terminal sizes and the encoded terminal modes sent along with a PTY request.

use std::fmt;

use crate::U8ReprEnum;

/// The baud rate hinted for both input and output when requesting a pseudo-terminal.
pub const DEFAULT_BAUD_RATE: u32 = 115200;

/// A terminal size in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminalSize {
    pub height: u16,
    pub width: u16,
}

impl TerminalSize {
    pub const fn new(height: u16, width: u16) -> Self {
        Self { height, width }
    }
}

impl fmt::Display for TerminalSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// The subset of terminal mode opcodes (RFC 4254, section 8) used by muxlink.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalOpcode {
    Echo = 53,
    InputSpeed = 128,
    OutputSpeed = 129,
}

impl U8ReprEnum for TerminalOpcode {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            53 => Some(Self::Echo),
            128 => Some(Self::InputSpeed),
            129 => Some(Self::OutputSpeed),
            _ => None,
        }
    }

    fn into_u8(self) -> u8 {
        self as u8
    }
}

/// An ordered list of terminal modes for a PTY request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TerminalModes(pub Vec<(TerminalOpcode, u32)>);

impl TerminalModes {
    /// Echo disabled, with input and output speeds of [`DEFAULT_BAUD_RATE`].
    pub fn session_defaults() -> Self {
        Self(vec![
            (TerminalOpcode::Echo, 0),
            (TerminalOpcode::InputSpeed, DEFAULT_BAUD_RATE),
            (TerminalOpcode::OutputSpeed, DEFAULT_BAUD_RATE),
        ])
    }

    pub fn get(&self, opcode: TerminalOpcode) -> Option<u32> {
        self.0.iter().find(|(op, _)| *op == opcode).map(|(_, value)| *value)
    }
}
