use std::{
    io,
    net::{SocketAddr, SocketAddrV4},
};

use muxlink_proto::{
    socks::{self, socks4, socks5, socks5::AddressOrDomainname, SocksError, SocksVersion, READ_BUFFER_SIZE},
    Endpoint,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};
use tracing::{debug, warn};

use super::TunnelOptions;
use crate::{relay::relay, transport::Transport};

/// Serves one SOCKS client: reads its request, dials the destination it names and relays.
///
/// Each handshake message is taken from a single read of up to [`READ_BUFFER_SIZE`] bytes, except
/// that a SOCKS5 request arriving in the same read as the greeting is used as is.
/// Protocol errors are answered with the matching reply (when the protocol has one) and end the
/// connection without an error.
pub(super) async fn forward<T: Transport>(
    transport: &T,
    options: &TunnelOptions,
    mut tcp_stream: TcpStream,
) -> io::Result<(u64, u64)> {
    let mut buf = [0u8; READ_BUFFER_SIZE];
    let length = tcp_stream.read(&mut buf).await?;

    let version = match socks::parse_version(&buf[..length]) {
        Ok(version) => version,
        Err(error) => return reject(&mut tcp_stream, error).await,
    };

    match version {
        SocksVersion::Four => serve_socks4(transport, options, tcp_stream, &buf[..length]).await,
        SocksVersion::Five => serve_socks5(transport, options, tcp_stream, &buf[..length]).await,
    }
}

async fn serve_socks4<T: Transport>(
    transport: &T,
    options: &TunnelOptions,
    mut tcp_stream: TcpStream,
    request: &[u8],
) -> io::Result<(u64, u64)> {
    let request = match socks4::parse_request(request) {
        Ok(request) => request,
        Err(error) => return reject(&mut tcp_stream, error).await,
    };

    debug!(
        "SOCKS4 request from user {:?} to connect to {}",
        String::from_utf8_lossy(request.user_id),
        request.destination
    );

    let destination = Endpoint::from(SocketAddr::V4(request.destination));
    let mut remote_stream = match options.dial(transport.dial_tcp(&destination)).await {
        Ok(stream) => stream,
        Err(error) => {
            warn!("SOCKS4 connection to {destination} failed: {error}");
            tcp_stream.write_all(&socks4::REQUEST_REJECTED).await?;
            return Ok((0, 0));
        }
    };

    tcp_stream.write_all(&socks4::REQUEST_GRANTED).await?;
    relay(&mut tcp_stream, &mut remote_stream).await
}

async fn serve_socks5<T: Transport>(
    transport: &T,
    options: &TunnelOptions,
    mut tcp_stream: TcpStream,
    greeting: &[u8],
) -> io::Result<(u64, u64)> {
    let greeting_length = match socks5::parse_greeting(greeting) {
        Ok(length) => length,
        Err(error) => return reject(&mut tcp_stream, error).await,
    };

    tcp_stream.write_all(&socks5::METHOD_ACCEPTED).await?;

    // Clients that don't wait for the method reply send their request along with the greeting.
    let mut buf = [0u8; READ_BUFFER_SIZE];
    let pipelined = &greeting[greeting_length..];
    let length = match pipelined.is_empty() {
        true => tcp_stream.read(&mut buf).await?,
        false => {
            buf[..pipelined.len()].copy_from_slice(pipelined);
            pipelined.len()
        }
    };

    if length == 0 {
        debug!("SOCKS5 client left before sending a request");
        return Ok((0, 0));
    }

    let address = match socks5::parse_request(&buf[..length]) {
        Ok(AddressOrDomainname::Address(address)) => address,
        Ok(AddressOrDomainname::Domainname(domainname, port)) => match resolve_ipv4(domainname, port).await {
            Some(address) => address,
            None => {
                warn!("SOCKS5 destination {domainname}:{port} has no IPv4 address");
                tcp_stream.write_all(&socks5::HOST_UNREACHABLE).await?;
                return Ok((0, 0));
            }
        },
        Err(error) => return reject(&mut tcp_stream, error).await,
    };

    debug!("SOCKS5 request to connect to {address}");

    let destination = Endpoint::from(SocketAddr::V4(address));
    let mut remote_stream = match options.dial(transport.dial_tcp(&destination)).await {
        Ok(stream) => stream,
        Err(error) => {
            warn!("SOCKS5 connection to {destination} failed: {error}");
            tcp_stream.write_all(&socks5::HOST_UNREACHABLE).await?;
            return Ok((0, 0));
        }
    };

    tcp_stream.write_all(&socks5::success_reply(address)).await?;
    relay(&mut tcp_stream, &mut remote_stream).await
}

async fn resolve_ipv4(domainname: &str, port: u16) -> Option<SocketAddrV4> {
    let addresses = match tokio::net::lookup_host((domainname, port)).await {
        Ok(addresses) => addresses,
        Err(error) => {
            debug!("Failed to resolve {domainname}: {error}");
            return None;
        }
    };

    addresses.into_iter().find_map(|address| match address {
        SocketAddr::V4(v4) => Some(v4),
        SocketAddr::V6(_) => None,
    })
}

async fn reject(tcp_stream: &mut TcpStream, error: SocksError) -> io::Result<(u64, u64)> {
    warn!("Rejecting SOCKS client: {error}");

    if let Some(reply) = error.reply() {
        tcp_stream.write_all(reply).await?;
    }

    Ok((0, 0))
}
