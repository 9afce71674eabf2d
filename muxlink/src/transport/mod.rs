//! The capabilities the engine needs from the secure transport.
//!
//! Connection setup and authentication happen elsewhere; by the time a manager is constructed,
//! the transport only has to open command channels and dial TCP or Unix-domain endpoints on the
//! remote side. All methods take `&self`, so a command channel can be driven by the task running
//! the command and by the task applying control messages at the same time.

use std::{io, path::Path};

use muxlink_proto::{Endpoint, SignalName, TerminalModes, TerminalSize};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

mod local;

pub use local::*;

/// A destination for a remote command's output.
pub type OutputSink = Box<dyn AsyncWrite + Unpin>;

/// How a remote command finished, when it did not finish successfully.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("remote command exited with status {0}")]
    ExitStatus(u32),

    #[error("remote command was terminated by signal {0}")]
    ExitSignal(String),

    #[error("command channel failed: {0}")]
    Channel(#[from] io::Error),
}

/// One logical command channel, able to run a single remote command.
#[allow(async_fn_in_trait)]
pub trait CommandChannel {
    /// Requests a pseudo-terminal for the command that will run on this channel.
    async fn request_pty(&self, term: &str, size: TerminalSize, modes: &TerminalModes) -> io::Result<()>;

    fn set_stdout(&self, sink: OutputSink);

    fn set_stderr(&self, sink: OutputSink);

    /// Runs `command` and resolves once it has finished.
    async fn run(&self, command: &str) -> Result<(), CommandError>;

    async fn window_change(&self, size: TerminalSize) -> io::Result<()>;

    async fn signal(&self, signal: SignalName) -> io::Result<()>;
}

/// An established, authenticated connection to a remote host.
#[allow(async_fn_in_trait)]
pub trait Transport {
    type Channel: CommandChannel + 'static;
    type Stream: AsyncRead + AsyncWrite + Unpin + 'static;

    async fn open_command_channel(&self) -> io::Result<Self::Channel>;

    async fn dial_tcp(&self, target: &Endpoint) -> io::Result<Self::Stream>;

    async fn dial_unix(&self, path: &Path) -> io::Result<Self::Stream>;
}
