use std::io;

use muxlink_proto::Endpoint;
use thiserror::Error;

use crate::transport::CommandError;

/// Errors returned to the caller of a session or tunnel operation.
///
/// Only setup failures and the final outcome of a remote command cross this boundary; failures
/// local to one forwarded connection or one control message are logged where they happen.
#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to open command channel: {0}")]
    ChannelOpen(#[source] io::Error),

    #[error("failed to query local terminal size: {0}")]
    TerminalQuery(#[source] io::Error),

    #[error("pseudo-terminal request was refused: {0}")]
    PtyRequest(#[source] io::Error),

    #[error("failed to listen on {endpoint}: {source}")]
    Listen { endpoint: Endpoint, source: io::Error },

    #[error("session {0} was already started")]
    SessionStarted(String),

    #[error("the manager's control loop is no longer running")]
    ManagerStopped,

    #[error(transparent)]
    Command(#[from] CommandError),
}
