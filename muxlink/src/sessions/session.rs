use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};

use muxlink_proto::{TerminalModes, TerminalSize};
use tokio::{
    select,
    sync::{mpsc, oneshot, watch},
};
use tracing::{debug, info, warn};

use super::{mailbox::Mailbox, ControlRequest, Message};
use crate::{
    error::Error,
    terminal,
    transport::{CommandChannel, CommandError},
};

/// One remote command running on its own command channel.
///
/// While the command runs, the session is registered with its [`SessionManager`] and applies
/// every broadcast message it receives to the channel. A session that isn't ready when a
/// broadcast arrives is evicted: it stops receiving messages and [`Session::run`] returns early,
/// but the remote command keeps running and can still be awaited through [`Session::wait`].
///
/// [`SessionManager`]: super::SessionManager
pub struct Session<C> {
    id: u64,
    name: String,
    channel: Rc<C>,
    mailbox: Rc<Mailbox>,
    control: mpsc::UnboundedSender<ControlRequest>,
    finished: Rc<watch::Sender<bool>>,
    outcome: Rc<RefCell<Option<CommandError>>>,
    claimed: Cell<bool>,
    started: Cell<bool>,
}

impl<C: CommandChannel + 'static> Session<C> {
    pub(super) fn new(id: u64, name: String, channel: C, control: mpsc::UnboundedSender<ControlRequest>) -> Self {
        let (finished, _) = watch::channel(false);

        Self {
            id,
            mailbox: Rc::new(Mailbox::new(name.clone())),
            name,
            channel: Rc::new(channel),
            control,
            finished: Rc::new(finished),
            outcome: Rc::new(RefCell::new(None)),
            claimed: Cell::new(false),
            started: Cell::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runs `command` remotely under a pseudo-terminal sized like the local terminal.
    pub async fn run(&self, command: &str) -> Result<(), Error> {
        let size = terminal::local_terminal_size().map_err(Error::TerminalQuery)?;
        self.run_with_size(command, size).await
    }

    /// Runs `command` remotely under a pseudo-terminal of the given size.
    ///
    /// Returns once the command finishes, or as soon as the session is evicted. The command's
    /// output goes to the local standard output and standard error.
    ///
    /// A session runs at most one command. Once a run has been claimed, later calls fail with
    /// [`Error::SessionStarted`]; a run that fails before the command starts releases the claim.
    pub async fn run_with_size(&self, command: &str, size: TerminalSize) -> Result<(), Error> {
        if self.claimed.replace(true) {
            return Err(Error::SessionStarted(self.name.clone()));
        }

        let term = terminal::local_terminal_type();
        if let Err(error) = self.prepare(&term, size).await {
            self.claimed.set(false);
            return Err(error);
        }

        self.started.set(true);
        info!("Session {} running {command:?} on a {size} {term} terminal", self.name);

        let mut finished = self.finished.subscribe();
        self.spawn_command(command);

        let evicted = self.dispatch(&mut finished).await;
        self.mailbox.unpark();
        self.unregister();

        if evicted {
            warn!("Session {} stopped receiving messages, its command is still running", self.name);
        }

        self.take_outcome()
    }

    /// Waits for the command to finish. Returns immediately if it was never started.
    ///
    /// A command error already returned by [`Session::run`] isn't returned again.
    pub async fn wait(&self) -> Result<(), Error> {
        if !self.started.get() {
            return Ok(());
        }

        let mut finished = self.finished.subscribe();
        if finished.wait_for(|done| *done).await.is_err() {
            debug!("Session {} lost track of its command", self.name);
        }

        self.take_outcome()
    }

    /// Requests the pty, wires the output and registers with the manager.
    async fn prepare(&self, term: &str, size: TerminalSize) -> Result<(), Error> {
        self.channel
            .request_pty(term, size, &TerminalModes::session_defaults())
            .await
            .map_err(Error::PtyRequest)?;
        self.channel.set_stdout(Box::new(tokio::io::stdout()));
        self.channel.set_stderr(Box::new(tokio::io::stderr()));

        self.register().await
    }

    fn take_outcome(&self) -> Result<(), Error> {
        match self.outcome.borrow_mut().take() {
            Some(error) => Err(error.into()),
            None => Ok(()),
        }
    }

    async fn register(&self) -> Result<(), Error> {
        let (registered, ack) = oneshot::channel();
        let request = ControlRequest::Register {
            id: self.id,
            mailbox: Rc::clone(&self.mailbox),
            registered,
        };

        self.control.send(request).map_err(|_| Error::ManagerStopped)?;
        ack.await.map_err(|_| Error::ManagerStopped)
    }

    fn unregister(&self) {
        if self.control.send(ControlRequest::Unregister { id: self.id }).is_err() {
            debug!("Session manager is gone, closing session {} locally", self.name);
            self.mailbox.close();
        }
    }

    fn spawn_command(&self, command: &str) {
        let channel = Rc::clone(&self.channel);
        let finished = Rc::clone(&self.finished);
        let outcome = Rc::clone(&self.outcome);
        let name = self.name.clone();
        let command = command.to_string();

        tokio::task::spawn_local(async move {
            match channel.run(&command).await {
                Ok(()) => debug!("Session {name} command finished"),
                Err(error) => {
                    debug!("Session {name} command failed: {error}");
                    *outcome.borrow_mut() = Some(error);
                }
            }

            finished.send_replace(true);
        });
    }

    /// Applies messages until the command finishes (returns false) or the mailbox is closed by
    /// eviction (returns true).
    async fn dispatch(&self, finished: &mut watch::Receiver<bool>) -> bool {
        loop {
            let Some(parked) = self.mailbox.park() else {
                return true;
            };

            select! {
                biased;
                _ = finished.wait_for(|done| *done) => return false,
                received = parked => match received {
                    Ok(message) => self.apply(message).await,
                    Err(_) => return true,
                },
            }
        }
    }

    async fn apply(&self, message: Message) {
        debug!("Session {} applying {message}", self.name);

        let result = match message {
            Message::Resize(size) => self.channel.window_change(size).await,
            Message::Signal(signal) => self.channel.signal(signal).await,
        };

        if let Err(error) = result {
            warn!("Session {} failed to apply {message}: {error}", self.name);
        }
    }

    #[cfg(test)]
    pub(super) fn is_ready(&self) -> bool {
        self.mailbox.is_parked()
    }
}
