use std::cell::{Cell, RefCell};

use tokio::sync::oneshot;

use super::Message;

/// A session's rendezvous point for broadcast messages.
///
/// A delivery only succeeds while the owning session is parked waiting for its next message;
/// there is no buffering. Once closed, the parked receiver (if any) observes the closure and no
/// further deliveries or parks succeed.
pub(crate) struct Mailbox {
    owner: String,
    waiting: RefCell<Option<oneshot::Sender<Message>>>,
    closed: Cell<bool>,
}

impl Mailbox {
    pub fn new(owner: String) -> Self {
        Self {
            owner,
            waiting: RefCell::new(None),
            closed: Cell::new(false),
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    #[cfg(test)]
    pub fn is_closed(&self) -> bool {
        self.closed.get()
    }

    #[cfg(test)]
    pub fn is_parked(&self) -> bool {
        self.waiting.borrow().is_some()
    }

    /// Marks the owner as ready for exactly one message. Returns `None` once closed.
    pub fn park(&self) -> Option<oneshot::Receiver<Message>> {
        if self.closed.get() {
            return None;
        }

        let (sender, receiver) = oneshot::channel();
        *self.waiting.borrow_mut() = Some(sender);
        Some(receiver)
    }

    /// Withdraws a pending park, so later deliveries fail instead of being silently lost.
    pub fn unpark(&self) {
        self.waiting.borrow_mut().take();
    }

    /// Hands `message` to the parked owner, or gives it back if the owner isn't parked.
    pub fn try_deliver(&self, message: Message) -> Result<(), Message> {
        if self.closed.get() {
            return Err(message);
        }

        match self.waiting.borrow_mut().take() {
            Some(sender) => sender.send(message),
            None => Err(message),
        }
    }

    /// Closes the mailbox. Returns whether this call was the one that closed it.
    pub fn close(&self) -> bool {
        let was_open = !self.closed.replace(true);
        self.waiting.borrow_mut().take();
        was_open
    }
}
