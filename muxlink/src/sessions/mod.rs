//! Remote command sessions and the manager that fans control messages out to them.
//!
//! The [`SessionManager`] owns the registry of running sessions inside its control loop
//! ([`SessionManager::run`]). Sessions register and unregister by sending requests to that loop,
//! and broadcasts arrive through a separate single-slot queue, so registry changes and
//! deliveries are never interleaved.

use std::{
    cell::{Cell, RefCell},
    collections::HashMap,
    rc::Rc,
};

use tokio::{
    select,
    sync::{
        mpsc::{self, error::TrySendError},
        oneshot,
    },
};
use tracing::{debug, warn};

use crate::{error::Error, transport::Transport};

mod mailbox;
mod messages;
mod session;

pub(crate) use mailbox::Mailbox;
pub use messages::*;
pub use session::*;

/// At most one broadcast can wait for the control loop; further ones are dropped.
const BROADCAST_CAPACITY: usize = 1;

pub(crate) enum ControlRequest {
    Register {
        id: u64,
        mailbox: Rc<Mailbox>,
        registered: oneshot::Sender<()>,
    },
    Unregister {
        id: u64,
    },
    Snapshot {
        reply: oneshot::Sender<Vec<String>>,
    },
}

struct Inbox {
    control: mpsc::UnboundedReceiver<ControlRequest>,
    broadcasts: mpsc::Receiver<Message>,
}

type Registry = HashMap<u64, Rc<Mailbox>>;

/// A cloneable handle for submitting broadcasts to a [`SessionManager`].
#[derive(Debug, Clone)]
pub struct Broadcaster {
    sender: mpsc::Sender<Message>,
}

impl Broadcaster {
    pub(crate) fn new(sender: mpsc::Sender<Message>) -> Self {
        Self { sender }
    }

    /// Submits `message` for delivery to every registered session without waiting.
    ///
    /// Returns false, dropping the message, when a previous broadcast is still pending or the
    /// manager is gone.
    pub fn broadcast(&self, message: Message) -> bool {
        match self.sender.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(message)) => {
                warn!("Dropping {message}, another broadcast is still pending");
                false
            }
            Err(TrySendError::Closed(message)) => {
                warn!("Dropping {message}, the session manager is gone");
                false
            }
        }
    }
}

pub struct SessionManager<T> {
    transport: Rc<T>,
    control: mpsc::UnboundedSender<ControlRequest>,
    broadcaster: Broadcaster,
    inbox: RefCell<Option<Inbox>>,
    next_id: Cell<u64>,
}

impl<T: Transport> SessionManager<T> {
    pub fn new(transport: Rc<T>) -> Self {
        let (control, control_receiver) = mpsc::unbounded_channel();
        let (broadcast_sender, broadcasts) = mpsc::channel(BROADCAST_CAPACITY);

        Self {
            transport,
            control,
            broadcaster: Broadcaster::new(broadcast_sender),
            inbox: RefCell::new(Some(Inbox {
                control: control_receiver,
                broadcasts,
            })),
            next_id: Cell::new(0),
        }
    }

    /// Opens a new command channel and wraps it in a session that hasn't started yet.
    pub async fn new_session(&self, name: impl Into<String>) -> Result<Session<T::Channel>, Error> {
        let name = name.into();
        let channel = self.transport.open_command_channel().await.map_err(Error::ChannelOpen)?;

        let id = self.next_id.get();
        self.next_id.set(id + 1);
        debug!("Opened command channel for session {name}");

        Ok(Session::new(id, name, channel, self.control.clone()))
    }

    /// Submits `message` for delivery to every registered session. See [`Broadcaster::broadcast`].
    pub fn broadcast(&self, message: Message) -> bool {
        self.broadcaster.broadcast(message)
    }

    pub fn broadcaster(&self) -> Broadcaster {
        self.broadcaster.clone()
    }

    /// Returns the sorted names of the currently registered sessions.
    pub async fn session_names(&self) -> Result<Vec<String>, Error> {
        let (reply, names) = oneshot::channel();
        self.control
            .send(ControlRequest::Snapshot { reply })
            .map_err(|_| Error::ManagerStopped)?;
        names.await.map_err(|_| Error::ManagerStopped)
    }

    /// Runs the control loop. This is the only place the session registry is touched.
    ///
    /// The loop runs for as long as the manager exists; only the first call does anything.
    pub async fn run(&self) {
        let Some(mut inbox) = self.inbox.borrow_mut().take() else {
            warn!("Session manager control loop is already running");
            return;
        };

        let mut registry = Registry::new();
        debug!("Session manager control loop started");

        loop {
            select! {
                biased;
                Some(request) = inbox.control.recv() => handle_control(&mut registry, request),
                Some(message) = inbox.broadcasts.recv() => fan_out(&mut registry, message),
                else => break,
            }
        }

        debug!("Session manager control loop stopped");
    }
}

fn handle_control(registry: &mut Registry, request: ControlRequest) {
    match request {
        ControlRequest::Register { id, mailbox, registered } => {
            debug!("Registered session {}", mailbox.owner());
            registry.insert(id, mailbox);
            let _ = registered.send(());
        }
        ControlRequest::Unregister { id } => {
            if let Some(mailbox) = registry.remove(&id) {
                debug!("Unregistered session {}", mailbox.owner());
                mailbox.close();
            }
        }
        ControlRequest::Snapshot { reply } => {
            let mut names: Vec<String> = registry.values().map(|mailbox| mailbox.owner().to_string()).collect();
            names.sort();
            let _ = reply.send(names);
        }
    }
}

fn fan_out(registry: &mut Registry, message: Message) {
    debug!("Broadcasting {message} to {} sessions", registry.len());

    registry.retain(|_, mailbox| match mailbox.try_deliver(message) {
        Ok(()) => true,
        Err(_) => {
            warn!("Session {} isn't ready for {message}, evicting it", mailbox.owner());
            mailbox.close();
            false
        }
    });
}
