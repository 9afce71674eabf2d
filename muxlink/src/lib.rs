//! # muxlink
//!
//! Multiplexes remote command sessions and local port-forwarding tunnels over one already
//! established secure transport.
//!
//! ## Architecture
//!
//! ```text
//! transport/  : capability traits consumed by the engine, plus a loopback implementation
//! relay.rs    : bidirectional byte copying between two open streams
//! sessions/   : Session (one remote command) and SessionManager (registry + broadcast)
//! tunnels/    : fixed, dynamic (SOCKS) and socket tunnels, and the TunnelManager
//! signals.rs  : turns OS signals into broadcast messages
//! config.rs   : TOML configuration
//! logging.rs  : tracing subscriber setup
//! ```
//!
//! ## Concurrency
//!
//! Everything runs on a single-threaded runtime inside a [`tokio::task::LocalSet`], with state
//! shared through `Rc`. Each manager owns its registry inside its own control loop; sessions,
//! tunnels and signal sources only ever talk to a manager through channels.

pub mod config;
pub mod error;
pub mod logging;
pub mod relay;
pub mod sessions;
pub mod signals;
pub mod terminal;
pub mod transport;
pub mod tunnels;

pub use error::Error;
pub use muxlink_proto::{Endpoint, SignalName, TerminalSize};
pub use sessions::{Broadcaster, Message, Session, SessionManager};
pub use transport::{CommandChannel, CommandError, Transport};
pub use tunnels::{Tunnel, TunnelManager, TunnelOptions, TunnelTarget};
