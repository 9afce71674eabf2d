use std::net::{Ipv4Addr, SocketAddrV4};

use crate::U8ReprEnum;

use super::{SocksError, CONNECT_COMMAND};

pub const VERSION_BYTE: u8 = 5;

/// The "no authentication required" method.
pub const NO_AUTH_METHOD: u8 = 0x00;

/// Method selection reply accepting "no authentication".
pub const METHOD_ACCEPTED: [u8; 2] = [VERSION_BYTE, NO_AUTH_METHOD];

/// Method selection reply when none of the offered methods is acceptable.
pub const NO_ACCEPTABLE_METHODS: [u8; 2] = [VERSION_BYTE, 0xFF];

pub const HOST_UNREACHABLE: [u8; 10] = failure_reply(SocksStatus::HostUnreachable);
pub const COMMAND_NOT_SUPPORTED: [u8; 10] = failure_reply(SocksStatus::CommandNotSupported);
pub const ATYP_NOT_SUPPORTED: [u8; 10] = failure_reply(SocksStatus::AtypNotSupported);

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocksStatus {
    Succeeded = 0,
    GeneralFailure = 1,
    NotAllowedByRuleset = 2,
    NetworkUnreachable = 3,
    HostUnreachable = 4,
    ConnectionRefused = 5,
    TTLExpired = 6,
    CommandNotSupported = 7,
    AtypNotSupported = 8,
}

impl U8ReprEnum for SocksStatus {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Succeeded),
            1 => Some(Self::GeneralFailure),
            2 => Some(Self::NotAllowedByRuleset),
            3 => Some(Self::NetworkUnreachable),
            4 => Some(Self::HostUnreachable),
            5 => Some(Self::ConnectionRefused),
            6 => Some(Self::TTLExpired),
            7 => Some(Self::CommandNotSupported),
            8 => Some(Self::AtypNotSupported),
            _ => None,
        }
    }

    fn into_u8(self) -> u8 {
        self as u8
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocksAtyp {
    IPv4 = 1,
    Domainname = 3,
}

impl U8ReprEnum for SocksAtyp {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::IPv4),
            3 => Some(Self::Domainname),
            _ => None,
        }
    }

    fn into_u8(self) -> u8 {
        self as u8
    }
}

/// The destination of a SOCKS5 `CONNECT` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressOrDomainname<'a> {
    Address(SocketAddrV4),
    Domainname(&'a str, u16),
}

/// Builds a reply with the given status and an all-zero IPv4 bound address.
pub const fn failure_reply(status: SocksStatus) -> [u8; 10] {
    [VERSION_BYTE, status as u8, 0, SocksAtyp::IPv4 as u8, 0, 0, 0, 0, 0, 0]
}

/// Builds the success reply carrying the address the connection was made to.
pub fn success_reply(address: SocketAddrV4) -> [u8; 10] {
    let [a, b, c, d] = address.ip().octets();
    let [port_hi, port_lo] = address.port().to_be_bytes();
    let status = SocksStatus::Succeeded as u8;
    [VERSION_BYTE, status, 0, SocksAtyp::IPv4 as u8, a, b, c, d, port_hi, port_lo]
}

/// Parses the method negotiation message, including the version byte:
/// `VER(1) NMETHODS(1) METHODS(NMETHODS)`. Succeeds only if "no authentication" is offered.
///
/// Returns the length of the greeting; any bytes after it already belong to the request.
pub fn parse_greeting(buf: &[u8]) -> Result<usize, SocksError> {
    if buf.len() < 2 {
        return Err(SocksError::HeaderTooShort(buf.len()));
    }

    let nmethods = buf[1] as usize;
    let methods = match buf.get(2..2 + nmethods) {
        Some(methods) => methods,
        None => return Err(SocksError::Socks5MalformedGreeting),
    };

    match methods.contains(&NO_AUTH_METHOD) {
        true => Ok(2 + nmethods),
        false => Err(SocksError::Socks5NoAuthMethodAcceptable),
    }
}

/// Parses a connect request: `VER(1) CMD(1) RSV(1) ATYP(1) DST.ADDR(variable) DST.PORT(2)`.
pub fn parse_request(buf: &[u8]) -> Result<AddressOrDomainname<'_>, SocksError> {
    if buf.len() < 4 {
        return Err(SocksError::Socks5Malformed("request shorter than its fixed header"));
    }

    if buf[0] != VERSION_BYTE {
        return Err(SocksError::Socks5InvalidVersion(buf[0]));
    }

    if buf[1] != CONNECT_COMMAND {
        return Err(SocksError::Socks5InvalidCommand(buf[1]));
    }

    let atyp = SocksAtyp::from_u8(buf[3]).ok_or(SocksError::Socks5InvalidAtyp(buf[3]))?;
    let rest = &buf[4..];

    match atyp {
        SocksAtyp::IPv4 => {
            if rest.len() < 6 {
                return Err(SocksError::Socks5Malformed("IPv4 request too short"));
            }

            let ip = Ipv4Addr::new(rest[0], rest[1], rest[2], rest[3]);
            let port = u16::from_be_bytes([rest[4], rest[5]]);
            Ok(AddressOrDomainname::Address(SocketAddrV4::new(ip, port)))
        }
        SocksAtyp::Domainname => {
            let len = match rest.first() {
                Some(len) => *len as usize,
                None => return Err(SocksError::Socks5Malformed("missing domain name length")),
            };

            if rest.len() < 1 + len + 2 {
                return Err(SocksError::Socks5Malformed("domain name request too short"));
            }

            let name = std::str::from_utf8(&rest[1..1 + len]).map_err(|_| SocksError::Socks5InvalidDomainname)?;
            let port = u16::from_be_bytes([rest[1 + len], rest[2 + len]]);
            Ok(AddressOrDomainname::Domainname(name, port))
        }
    }
}
