use std::fmt;

use muxlink_proto::{SignalName, TerminalSize};

/// A control message broadcast to every running session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Message {
    /// The local terminal was resized.
    Resize(TerminalSize),

    /// A signal to deliver to each remote command.
    Signal(SignalName),
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resize(size) => write!(f, "resize to {size}"),
            Self::Signal(signal) => write!(f, "SIG{signal}"),
        }
    }
}
