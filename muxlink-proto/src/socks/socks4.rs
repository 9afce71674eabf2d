use std::net::{Ipv4Addr, SocketAddrV4};

use super::{SocksError, CONNECT_COMMAND};

pub const VERSION_BYTE: u8 = 4;

/// Reply sent when the connection to the destination was established.
pub const REQUEST_GRANTED: [u8; 8] = [0x00, 0x5A, 0, 0, 0, 0, 0, 0];

/// Reply sent when the connection to the destination could not be established.
pub const REQUEST_REJECTED: [u8; 8] = [0x00, 0x5B, 0, 0, 0, 0, 0, 0];

/// A decoded SOCKS4 `CONNECT` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Socks4Request<'a> {
    pub destination: SocketAddrV4,
    pub user_id: &'a [u8],
}

/// Parses a full SOCKS4 request, including the version byte:
/// `VN(1) CD(1) DSTPORT(2) DSTIP(4) USERID(variable) NULL(1)`.
pub fn parse_request(buf: &[u8]) -> Result<Socks4Request<'_>, SocksError> {
    if buf.len() < 2 {
        return Err(SocksError::HeaderTooShort(buf.len()));
    }

    if buf[1] != CONNECT_COMMAND {
        return Err(SocksError::Socks4InvalidCommand(buf[1]));
    }

    if buf.len() < 8 {
        return Err(SocksError::Socks4Malformed("request shorter than its fixed header"));
    }

    let port = u16::from_be_bytes([buf[2], buf[3]]);
    let ip = Ipv4Addr::new(buf[4], buf[5], buf[6], buf[7]);

    let rest = &buf[8..];
    let user_id = match rest.iter().position(|b| *b == 0) {
        Some(end) => &rest[..end],
        None => return Err(SocksError::Socks4Malformed("missing NUL-terminated user id")),
    };

    Ok(Socks4Request {
        destination: SocketAddrV4::new(ip, port),
        user_id,
    })
}
