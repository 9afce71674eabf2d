//! A hand-rolled decoder for the SOCKS4 and SOCKS5 handshakes.
//!
//! Only the `CONNECT` command is supported. SOCKS5 is supported without authentication, with
//! IPv4 and domain name destinations. The functions here only look at bytes: the caller reads
//! from the connection, dials the destination and writes the replies produced by this module.

use thiserror::Error;

use crate::U8ReprEnum;

pub mod socks4;
pub mod socks5;

/// The maximum amount of bytes read from the client for each handshake step.
pub const READ_BUFFER_SIZE: usize = 256;

/// The `CONNECT` command byte, the same for SOCKS4 and SOCKS5.
pub const CONNECT_COMMAND: u8 = 1;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocksVersion {
    Four = socks4::VERSION_BYTE,
    Five = socks5::VERSION_BYTE,
}

impl U8ReprEnum for SocksVersion {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            socks4::VERSION_BYTE => Some(Self::Four),
            socks5::VERSION_BYTE => Some(Self::Five),
            _ => None,
        }
    }

    fn into_u8(self) -> u8 {
        self as u8
    }
}

/// Errors found while decoding a SOCKS handshake. All of them are local to one connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SocksError {
    #[error("SOCKS header too short ({0} bytes)")]
    HeaderTooShort(usize),
    #[error("client requested invalid SOCKS version: {0}")]
    InvalidVersion(u8),
    #[error("client requested invalid SOCKS4 command: {0}")]
    Socks4InvalidCommand(u8),
    #[error("malformed SOCKS4 request: {0}")]
    Socks4Malformed(&'static str),
    #[error("no acceptable SOCKS5 authentication method")]
    Socks5NoAuthMethodAcceptable,
    #[error("malformed SOCKS5 method negotiation")]
    Socks5MalformedGreeting,
    #[error("client requested SOCKS5, but then specified another version: {0}")]
    Socks5InvalidVersion(u8),
    #[error("client requested invalid SOCKS5 command: {0}")]
    Socks5InvalidCommand(u8),
    #[error("client requested invalid SOCKS5 address type: {0}")]
    Socks5InvalidAtyp(u8),
    #[error("malformed SOCKS5 request: {0}")]
    Socks5Malformed(&'static str),
    #[error("SOCKS5 domain name is not valid UTF-8")]
    Socks5InvalidDomainname,
}

impl SocksError {
    /// The reply that must be written to the client before closing the connection, if the
    /// protocol defines one for this error.
    pub fn reply(&self) -> Option<&'static [u8]> {
        match self {
            Self::Socks5NoAuthMethodAcceptable => Some(&socks5::NO_ACCEPTABLE_METHODS),
            Self::Socks5InvalidVersion(_) | Self::Socks5InvalidCommand(_) | Self::Socks5Malformed(_) => {
                Some(&socks5::COMMAND_NOT_SUPPORTED)
            }
            Self::Socks5InvalidAtyp(_) => Some(&socks5::ATYP_NOT_SUPPORTED),
            Self::Socks5InvalidDomainname => Some(&socks5::HOST_UNREACHABLE),
            Self::HeaderTooShort(_)
            | Self::InvalidVersion(_)
            | Self::Socks4InvalidCommand(_)
            | Self::Socks4Malformed(_)
            | Self::Socks5MalformedGreeting => None,
        }
    }
}

/// Looks at the first bytes sent by a client and determines which SOCKS version it speaks.
pub fn parse_version(buf: &[u8]) -> Result<SocksVersion, SocksError> {
    if buf.len() < 2 {
        return Err(SocksError::HeaderTooShort(buf.len()));
    }

    SocksVersion::from_u8(buf[0]).ok_or(SocksError::InvalidVersion(buf[0]))
}
