//! Wire-level building blocks shared by the muxlink engine.
//!
//! This crate holds everything that can be expressed without an async runtime: the [`Endpoint`]
//! value type, the SSH signal names and pseudo-terminal modes sent over command channels, and a
//! hand-rolled decoder for the SOCKS4 and SOCKS5 handshakes used by dynamic tunnels.
//!
//! # SOCKS decoding
//! The decoder in [`socks`] works on the raw bytes read from a freshly accepted connection (at
//! most [`socks::READ_BUFFER_SIZE`] bytes per read). It never performs I/O itself: parsing
//! functions return either the requested destination or a [`socks::SocksError`], and every error
//! knows which reply (if any) must be written back before the connection is closed. The caller is
//! responsible for dialing the destination and writing the success or failure reply.

pub mod endpoint;
pub mod signal;
pub mod socks;
pub mod terminal;
pub mod u8_repr_enum;

pub use endpoint::*;
pub use signal::*;
pub use terminal::*;
pub use u8_repr_enum::*;
