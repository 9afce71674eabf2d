use std::io::{self, ErrorKind, IsTerminal};

use muxlink_proto::TerminalSize;

/// The terminal type requested for remote commands when `TERM` isn't set locally.
pub const DEFAULT_TERM: &str = "xterm";

/// Returns the size of the terminal attached to standard output.
pub fn local_terminal_size() -> io::Result<TerminalSize> {
    if !io::stdout().is_terminal() {
        return Err(io::Error::new(ErrorKind::Unsupported, "standard output is not a terminal"));
    }

    let (width, height) = crossterm::terminal::size()?;
    Ok(TerminalSize::new(height, width))
}

/// The terminal type to request remotely, taken from the local `TERM`.
pub fn local_terminal_type() -> String {
    std::env::var("TERM")
        .ok()
        .filter(|term| !term.is_empty())
        .unwrap_or_else(|| String::from(DEFAULT_TERM))
}
