use std::{
    cell::{Cell, RefCell},
    io::{self, ErrorKind},
    path::Path,
    pin::Pin,
    process::{ExitStatus, Stdio},
    task::{Context, Poll},
};

use muxlink_proto::{Endpoint, SignalName, TerminalModes, TerminalSize};
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf},
    net::TcpStream,
    process::Command,
};
use tracing::debug;

use super::{CommandChannel, CommandError, OutputSink, Transport};

/// A [`Transport`] whose "remote" side is the local machine.
///
/// Command channels run their command through `sh -c`, and dials connect directly. This is what
/// the `muxlink` binary drives, and what the engine's own tests run against.
#[derive(Debug, Default)]
pub struct LocalTransport {
    _private: (),
}

impl LocalTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Transport for LocalTransport {
    type Channel = LocalChannel;
    type Stream = LocalStream;

    async fn open_command_channel(&self) -> io::Result<LocalChannel> {
        Ok(LocalChannel::default())
    }

    async fn dial_tcp(&self, target: &Endpoint) -> io::Result<LocalStream> {
        let stream = TcpStream::connect((target.host(), target.port())).await?;
        Ok(LocalStream::Tcp(stream))
    }

    #[cfg(unix)]
    async fn dial_unix(&self, path: &Path) -> io::Result<LocalStream> {
        let stream = tokio::net::UnixStream::connect(path).await?;
        Ok(LocalStream::Unix(stream))
    }

    #[cfg(not(unix))]
    async fn dial_unix(&self, path: &Path) -> io::Result<LocalStream> {
        Err(io::Error::new(
            ErrorKind::Unsupported,
            format!("cannot dial unix socket {} on this platform", path.display()),
        ))
    }
}

pub enum LocalStream {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(tokio::net::UnixStream),
}

impl AsyncRead for LocalStream {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(stream) => Pin::new(stream).poll_read(cx, buf),
            #[cfg(unix)]
            Self::Unix(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for LocalStream {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Tcp(stream) => Pin::new(stream).poll_write(cx, buf),
            #[cfg(unix)]
            Self::Unix(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(stream) => Pin::new(stream).poll_flush(cx),
            #[cfg(unix)]
            Self::Unix(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(stream) => Pin::new(stream).poll_shutdown(cx),
            #[cfg(unix)]
            Self::Unix(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

/// A command channel backed by a local `sh -c` child process.
///
/// The requested pseudo-terminal is emulated through the `TERM`, `LINES` and `COLUMNS`
/// environment variables; no real terminal device is allocated.
#[derive(Default)]
pub struct LocalChannel {
    pty: RefCell<Option<PtyRequest>>,
    stdout: RefCell<Option<OutputSink>>,
    stderr: RefCell<Option<OutputSink>>,
    pid: Cell<Option<u32>>,
}

struct PtyRequest {
    term: String,
    size: TerminalSize,
    modes: TerminalModes,
}

impl LocalChannel {
    /// The window size most recently requested for this channel, if a pty was requested.
    pub fn window_size(&self) -> Option<TerminalSize> {
        self.pty.borrow().as_ref().map(|pty| pty.size)
    }

    /// The terminal modes sent with the pty request, if one was made.
    pub fn terminal_modes(&self) -> Option<TerminalModes> {
        self.pty.borrow().as_ref().map(|pty| pty.modes.clone())
    }
}

impl CommandChannel for LocalChannel {
    async fn request_pty(&self, term: &str, size: TerminalSize, modes: &TerminalModes) -> io::Result<()> {
        *self.pty.borrow_mut() = Some(PtyRequest {
            term: term.to_string(),
            size,
            modes: modes.clone(),
        });
        Ok(())
    }

    fn set_stdout(&self, sink: OutputSink) {
        *self.stdout.borrow_mut() = Some(sink);
    }

    fn set_stderr(&self, sink: OutputSink) {
        *self.stderr.borrow_mut() = Some(sink);
    }

    async fn run(&self, command: &str) -> Result<(), CommandError> {
        let mut process = Command::new("sh");
        process
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(pty) = self.pty.borrow().as_ref() {
            process
                .env("TERM", &pty.term)
                .env("LINES", pty.size.height.to_string())
                .env("COLUMNS", pty.size.width.to_string());
        }

        let mut child = process.spawn()?;
        self.pid.set(child.id());
        debug!("Started {command:?} as process {:?}", child.id());

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let stdout_sink = self.stdout.borrow_mut().take();
        let stderr_sink = self.stderr.borrow_mut().take();

        let (status, _, _) = tokio::join!(child.wait(), pipe_output(stdout, stdout_sink), pipe_output(stderr, stderr_sink));
        self.pid.set(None);

        exit_result(status?)
    }

    async fn window_change(&self, size: TerminalSize) -> io::Result<()> {
        match self.pty.borrow_mut().as_mut() {
            Some(pty) => {
                pty.size = size;
                Ok(())
            }
            None => Err(io::Error::new(ErrorKind::InvalidInput, "no pseudo-terminal was requested")),
        }
    }

    #[cfg(unix)]
    async fn signal(&self, signal: SignalName) -> io::Result<()> {
        use nix::{sys::signal::kill, unistd::Pid};

        let pid = self
            .pid
            .get()
            .ok_or_else(|| io::Error::new(ErrorKind::NotConnected, "no command is running"))?;

        kill(Pid::from_raw(pid as i32), unix_signal(signal))?;
        Ok(())
    }

    #[cfg(not(unix))]
    async fn signal(&self, signal: SignalName) -> io::Result<()> {
        Err(io::Error::new(
            ErrorKind::Unsupported,
            format!("cannot deliver SIG{signal} on this platform"),
        ))
    }
}

async fn pipe_output<R>(source: Option<R>, sink: Option<OutputSink>)
where
    R: AsyncRead + Unpin,
{
    let Some(mut source) = source else {
        return;
    };

    let result = match sink {
        Some(mut sink) => {
            let result = tokio::io::copy(&mut source, &mut sink).await;
            let _ = sink.flush().await;
            result
        }
        None => tokio::io::copy(&mut source, &mut tokio::io::sink()).await,
    };

    if let Err(error) = result {
        debug!("Stopped piping command output: {error}");
    }
}

fn exit_result(status: ExitStatus) -> Result<(), CommandError> {
    if status.success() {
        return Ok(());
    }

    if let Some(code) = status.code() {
        return Err(CommandError::ExitStatus(code as u32));
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;

        if let Some(number) = status.signal() {
            let name = nix::sys::signal::Signal::try_from(number)
                .map(|signal| signal.as_str().trim_start_matches("SIG").to_string())
                .unwrap_or_else(|_| number.to_string());
            return Err(CommandError::ExitSignal(name));
        }
    }

    Err(CommandError::ExitSignal(String::from("unknown")))
}

#[cfg(unix)]
fn unix_signal(signal: SignalName) -> nix::sys::signal::Signal {
    use nix::sys::signal::Signal;

    match signal {
        SignalName::Abrt => Signal::SIGABRT,
        SignalName::Alrm => Signal::SIGALRM,
        SignalName::Fpe => Signal::SIGFPE,
        SignalName::Hup => Signal::SIGHUP,
        SignalName::Ill => Signal::SIGILL,
        SignalName::Int => Signal::SIGINT,
        SignalName::Kill => Signal::SIGKILL,
        SignalName::Pipe => Signal::SIGPIPE,
        SignalName::Quit => Signal::SIGQUIT,
        SignalName::Segv => Signal::SIGSEGV,
        SignalName::Term => Signal::SIGTERM,
        SignalName::Usr1 => Signal::SIGUSR1,
        SignalName::Usr2 => Signal::SIGUSR2,
    }
}
