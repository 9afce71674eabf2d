//! Forwards the local process's signals to every running session.

use muxlink_proto::SignalName;
use tracing::debug;

use crate::{sessions::Broadcaster, Message};

/// Broadcasts a [`Message`] for every forwarded signal until the signal streams are exhausted.
///
/// SIGHUP, SIGINT, SIGTERM and SIGQUIT are forwarded under their SSH names, and SIGWINCH becomes
/// a resize to the current local terminal size. Installing the handlers means these signals no
/// longer terminate the local process.
#[cfg(unix)]
pub async fn forward_signals(broadcaster: Broadcaster) -> std::io::Result<()> {
    use tokio::{
        select,
        signal::unix::{signal, SignalKind},
    };
    use tracing::warn;

    use crate::terminal;

    let mut hangup = signal(SignalKind::hangup())?;
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut quit = signal(SignalKind::quit())?;
    let mut window_change = signal(SignalKind::window_change())?;

    loop {
        let message = select! {
            Some(()) = hangup.recv() => Message::Signal(SignalName::Hup),
            Some(()) = interrupt.recv() => Message::Signal(SignalName::Int),
            Some(()) = terminate.recv() => Message::Signal(SignalName::Term),
            Some(()) = quit.recv() => Message::Signal(SignalName::Quit),
            Some(()) = window_change.recv() => match terminal::local_terminal_size() {
                Ok(size) => Message::Resize(size),
                Err(error) => {
                    warn!("Ignoring window change, terminal size is unavailable: {error}");
                    continue;
                }
            },
            else => return Ok(()),
        };

        debug!("Forwarding {message} to running sessions");
        broadcaster.broadcast(message);
    }
}

#[cfg(not(unix))]
pub async fn forward_signals(broadcaster: Broadcaster) -> std::io::Result<()> {
    loop {
        tokio::signal::ctrl_c().await?;
        debug!("Forwarding Ctrl-C to running sessions");
        broadcaster.broadcast(Message::Signal(SignalName::Int));
    }
}

#[cfg(all(test, unix))]
mod tests {
    use nix::sys::signal::{raise, Signal};
    use tokio::{
        sync::mpsc,
        task::{spawn_local, yield_now, LocalSet},
        time::{timeout, Duration},
    };

    use super::*;

    #[tokio::test]
    async fn test_hangup_is_broadcast() {
        LocalSet::new()
            .run_until(async {
                let (sender, mut broadcasts) = mpsc::channel(1);
                let forwarding = spawn_local(forward_signals(Broadcaster::new(sender)));

                // Let the forwarder install its handlers before raising.
                for _ in 0..10 {
                    yield_now().await;
                }
                raise(Signal::SIGHUP).unwrap();

                let message = timeout(Duration::from_secs(5), broadcasts.recv()).await.unwrap();
                assert_eq!(message, Some(Message::Signal(SignalName::Hup)));
                forwarding.abort();
            })
            .await;
    }
}
