//! Local listeners that forward accepted connections through the transport.
//!
//! Every tunnel owns a TCP listener on the local machine. What happens to an accepted
//! connection depends on its [`TunnelTarget`]: fixed tunnels dial one remote endpoint, dynamic
//! tunnels speak SOCKS4/SOCKS5 to learn the destination, and socket tunnels dial a Unix-domain
//! socket on the remote host.

use std::{fmt, future::Future, io, path::PathBuf, rc::Rc, time::Duration};

use muxlink_proto::Endpoint;
use tokio::{
    net::{TcpListener, TcpStream},
    select,
    sync::mpsc,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::transport::Transport;

mod dynamic;
mod fixed;
mod manager;
mod socket;

use self::manager::ControlRequest;
pub use manager::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TunnelTarget {
    /// Every connection goes to the same remote endpoint.
    Address(Endpoint),

    /// Each connection names its own destination through SOCKS.
    Socks,

    /// Every connection goes to a Unix-domain socket on the remote host.
    Socket(PathBuf),
}

impl fmt::Display for TunnelTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Address(endpoint) => endpoint.fmt(f),
            Self::Socks => f.write_str("SOCKS"),
            Self::Socket(path) => write!(f, "unix:{}", path.display()),
        }
    }
}

/// Settings shared by every tunnel a [`TunnelManager`] opens.
#[derive(Debug, Clone, Copy, Default)]
pub struct TunnelOptions {
    /// Upper bound on dialing a remote destination. `None` waits as long as the transport does.
    pub connect_timeout: Option<Duration>,
}

impl TunnelOptions {
    async fn dial<F, S>(&self, dialing: F) -> io::Result<S>
    where
        F: Future<Output = io::Result<S>>,
    {
        match self.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, dialing)
                .await
                .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, format!("connection attempt timed out after {limit:?}")))?,
            None => dialing.await,
        }
    }
}

/// A running local listener.
///
/// Closing a tunnel stops its listener and tears down the connections it is relaying. Closing
/// is idempotent, and the manager is told about it exactly once.
#[derive(Debug)]
pub struct Tunnel {
    id: u64,
    name: String,
    local: Endpoint,
    target: TunnelTarget,
    shutdown: CancellationToken,
    control: mpsc::UnboundedSender<ControlRequest>,
}

impl Tunnel {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The endpoint actually listened on, with an ephemeral port already resolved.
    pub fn local(&self) -> &Endpoint {
        &self.local
    }

    pub fn target(&self) -> &TunnelTarget {
        &self.target
    }

    pub fn is_running(&self) -> bool {
        !self.shutdown.is_cancelled()
    }

    pub fn close(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }

        self.shutdown.cancel();
        info!("Closed tunnel {} on {}", self.name, self.local);

        if self.control.send(ControlRequest::Unregister { id: self.id }).is_err() {
            debug!("Tunnel manager is gone, tunnel {} was not unregistered", self.name);
        }
    }
}

async fn accept_connections<T: Transport + 'static>(
    transport: Rc<T>,
    options: TunnelOptions,
    listener: TcpListener,
    tunnel: Rc<Tunnel>,
) {
    loop {
        let (tcp_stream, from) = select! {
            biased;
            _ = tunnel.shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(t) => t,
                Err(error) => {
                    error!("Tunnel {} stopped accepting connections: {error}", tunnel.name);
                    break;
                }
            },
        };

        debug!("Incoming connection into tunnel {} from {from}, forwarding to {}", tunnel.name, tunnel.target);

        let transport = Rc::clone(&transport);
        let tunnel = Rc::clone(&tunnel);
        tokio::task::spawn_local(async move {
            select! {
                _ = tunnel.shutdown.cancelled() => debug!("Connection from {from} closed along with tunnel {}", tunnel.name),
                result = forward(&*transport, &options, &tunnel.target, tcp_stream) => match result {
                    Ok((sent, received)) => {
                        debug!("Connection from {from} through tunnel {} ended after {sent} bytes sent and {received} bytes received", tunnel.name);
                    }
                    Err(error) => debug!("Connection from {from} through tunnel {} ended with error: {error}", tunnel.name),
                },
            }
        });
    }

    drop(listener);
    tunnel.close();
}

async fn forward<T: Transport>(
    transport: &T,
    options: &TunnelOptions,
    target: &TunnelTarget,
    tcp_stream: TcpStream,
) -> io::Result<(u64, u64)> {
    match target {
        TunnelTarget::Address(remote) => fixed::forward(transport, options, remote, tcp_stream).await,
        TunnelTarget::Socks => dynamic::forward(transport, options, tcp_stream).await,
        TunnelTarget::Socket(path) => socket::forward(transport, options, path, tcp_stream).await,
    }
}

#[cfg(test)]
mod tests {
    use std::net::{Ipv4Addr, SocketAddrV4};

    use muxlink_proto::socks::{socks4, socks5};
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        task::{spawn_local, yield_now, LocalSet},
    };

    use super::*;
    use crate::{error::Error, transport::LocalTransport};

    fn loopback() -> Endpoint {
        Endpoint::new("127.0.0.1", 0)
    }

    fn start_manager() -> Rc<TunnelManager<LocalTransport>> {
        let manager = Rc::new(TunnelManager::new(Rc::new(LocalTransport::new()), TunnelOptions::default()));

        let running = Rc::clone(&manager);
        spawn_local(async move { running.run().await });
        manager
    }

    async fn connect(endpoint: &Endpoint) -> TcpStream {
        TcpStream::connect((endpoint.host(), endpoint.port())).await.unwrap()
    }

    async fn eventually_tunnels(manager: &TunnelManager<LocalTransport>, expected: &[&str]) {
        for _ in 0..1000 {
            if manager.tunnel_names().await.unwrap() == expected {
                return;
            }
            yield_now().await;
        }

        panic!("running tunnels never became {expected:?}");
    }

    async fn read_reply<const N: usize>(stream: &mut TcpStream) -> [u8; N] {
        let mut reply = [0u8; N];
        stream.read_exact(&mut reply).await.unwrap();
        reply
    }

    async fn assert_closed(stream: &mut TcpStream) {
        let mut rest = Vec::new();
        let _ = stream.read_to_end(&mut rest).await;
        assert!(rest.is_empty());
    }

    /// Exchanges a message in each direction between the client and the accepted remote side.
    async fn assert_relays(client: &mut TcpStream, remote: &mut TcpStream) {
        client.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        remote.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        remote.write_all(b"pong").await.unwrap();
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");
    }

    async fn unused_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn test_fixed_tunnel_relays_and_propagates_close() {
        LocalSet::new()
            .run_until(async {
                let manager = start_manager();
                let remote_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
                let remote = Endpoint::from(remote_listener.local_addr().unwrap());

                let tunnel = manager.fixed("web", loopback(), remote.clone()).await.unwrap();
                assert_ne!(tunnel.local().port(), 0);
                assert_eq!(tunnel.target(), &TunnelTarget::Address(remote));

                let mut client = connect(tunnel.local()).await;
                let (mut accepted, _) = remote_listener.accept().await.unwrap();
                assert_relays(&mut client, &mut accepted).await;

                drop(client);
                assert_closed(&mut accepted).await;
            })
            .await;
    }

    #[tokio::test]
    async fn test_fixed_tunnel_propagates_remote_close() {
        LocalSet::new()
            .run_until(async {
                let manager = start_manager();
                let remote_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
                let remote = Endpoint::from(remote_listener.local_addr().unwrap());

                let tunnel = manager.fixed("web", loopback(), remote).await.unwrap();
                let mut client = connect(tunnel.local()).await;
                let (mut accepted, _) = remote_listener.accept().await.unwrap();
                assert_relays(&mut client, &mut accepted).await;

                drop(accepted);
                let mut rest = Vec::new();
                assert_eq!(client.read_to_end(&mut rest).await.unwrap(), 0);
                assert!(tunnel.is_running());
            })
            .await;
    }

    #[tokio::test]
    async fn test_fixed_tunnel_drops_connection_when_dial_fails() {
        LocalSet::new()
            .run_until(async {
                let manager = start_manager();
                let remote = Endpoint::new("127.0.0.1", unused_port().await);

                let tunnel = manager.fixed("nowhere", loopback(), remote).await.unwrap();
                let mut client = connect(tunnel.local()).await;
                assert_closed(&mut client).await;
                assert!(tunnel.is_running());
            })
            .await;
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_stops_everything() {
        LocalSet::new()
            .run_until(async {
                let manager = start_manager();
                let remote_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
                let remote = Endpoint::from(remote_listener.local_addr().unwrap());

                let tunnel = manager.fixed("db", loopback(), remote).await.unwrap();
                manager.dynamic("proxy", loopback()).await.unwrap();
                eventually_tunnels(&manager, &["db", "proxy"]).await;

                let mut client = connect(tunnel.local()).await;
                let (mut accepted, _) = remote_listener.accept().await.unwrap();
                assert_relays(&mut client, &mut accepted).await;

                tunnel.close();
                tunnel.close();
                assert!(!tunnel.is_running());
                eventually_tunnels(&manager, &["proxy"]).await;

                // The relay is torn down along with the tunnel.
                assert_closed(&mut accepted).await;
                assert_closed(&mut client).await;

                let local = tunnel.local().clone();
                let mut refused = false;
                for _ in 0..1000 {
                    if TcpStream::connect((local.host(), local.port())).await.is_err() {
                        refused = true;
                        break;
                    }
                    yield_now().await;
                }
                assert!(refused);

                manager.close_all();
                eventually_tunnels(&manager, &[]).await;
            })
            .await;
    }

    #[tokio::test]
    async fn test_listen_failure_is_reported() {
        LocalSet::new()
            .run_until(async {
                let manager = start_manager();
                let tunnel = manager.dynamic("first", loopback()).await.unwrap();

                let result = manager.dynamic("second", tunnel.local().clone()).await;
                assert!(matches!(result, Err(Error::Listen { endpoint, .. }) if endpoint == *tunnel.local()));
                eventually_tunnels(&manager, &["first"]).await;
            })
            .await;
    }

    #[tokio::test]
    async fn test_socks4_connect_is_granted_and_relayed() {
        LocalSet::new()
            .run_until(async {
                let manager = start_manager();
                let remote_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
                let port = remote_listener.local_addr().unwrap().port();
                let tunnel = manager.dynamic("proxy", loopback()).await.unwrap();

                let mut client = connect(tunnel.local()).await;
                let mut request = vec![socks4::VERSION_BYTE, 1];
                request.extend_from_slice(&port.to_be_bytes());
                request.extend_from_slice(&[127, 0, 0, 1]);
                request.extend_from_slice(b"alice\0");
                client.write_all(&request).await.unwrap();

                assert_eq!(read_reply::<8>(&mut client).await, socks4::REQUEST_GRANTED);
                let (mut accepted, _) = remote_listener.accept().await.unwrap();
                assert_relays(&mut client, &mut accepted).await;
            })
            .await;
    }

    #[tokio::test]
    async fn test_socks4_unreachable_destination_is_rejected() {
        LocalSet::new()
            .run_until(async {
                let manager = start_manager();
                let port = unused_port().await;
                let tunnel = manager.dynamic("proxy", loopback()).await.unwrap();

                let mut client = connect(tunnel.local()).await;
                let mut request = vec![socks4::VERSION_BYTE, 1];
                request.extend_from_slice(&port.to_be_bytes());
                request.extend_from_slice(&[127, 0, 0, 1, 0]);
                client.write_all(&request).await.unwrap();

                assert_eq!(read_reply::<8>(&mut client).await, socks4::REQUEST_REJECTED);
                assert_closed(&mut client).await;
            })
            .await;
    }

    #[tokio::test]
    async fn test_socks5_without_acceptable_method_is_refused() {
        LocalSet::new()
            .run_until(async {
                let manager = start_manager();
                let tunnel = manager.dynamic("proxy", loopback()).await.unwrap();

                let mut client = connect(tunnel.local()).await;
                client.write_all(&[5, 1, 2]).await.unwrap();

                assert_eq!(read_reply::<2>(&mut client).await, [5, 0xFF]);
                assert_closed(&mut client).await;
            })
            .await;
    }

    #[tokio::test]
    async fn test_socks5_connect_to_address_is_relayed() {
        LocalSet::new()
            .run_until(async {
                let manager = start_manager();
                let remote_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
                let port = remote_listener.local_addr().unwrap().port();
                let tunnel = manager.dynamic("proxy", loopback()).await.unwrap();

                let mut client = connect(tunnel.local()).await;
                client.write_all(&[5, 1, 0]).await.unwrap();
                assert_eq!(read_reply::<2>(&mut client).await, socks5::METHOD_ACCEPTED);

                let mut request = vec![5, 1, 0, 1, 127, 0, 0, 1];
                request.extend_from_slice(&port.to_be_bytes());
                client.write_all(&request).await.unwrap();

                let expected = socks5::success_reply(SocketAddrV4::new(Ipv4Addr::LOCALHOST, port));
                assert_eq!(read_reply::<10>(&mut client).await, expected);

                let (mut accepted, _) = remote_listener.accept().await.unwrap();
                assert_relays(&mut client, &mut accepted).await;
            })
            .await;
    }

    #[tokio::test]
    async fn test_socks5_request_sent_with_greeting_is_served() {
        LocalSet::new()
            .run_until(async {
                let manager = start_manager();
                let remote_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
                let port = remote_listener.local_addr().unwrap().port();
                let tunnel = manager.dynamic("proxy", loopback()).await.unwrap();

                let mut client = connect(tunnel.local()).await;
                let mut handshake = vec![5, 1, 0, 5, 1, 0, 1, 127, 0, 0, 1];
                handshake.extend_from_slice(&port.to_be_bytes());
                client.write_all(&handshake).await.unwrap();

                assert_eq!(read_reply::<2>(&mut client).await, socks5::METHOD_ACCEPTED);
                let expected = socks5::success_reply(SocketAddrV4::new(Ipv4Addr::LOCALHOST, port));
                assert_eq!(read_reply::<10>(&mut client).await, expected);

                let (mut accepted, _) = remote_listener.accept().await.unwrap();
                assert_relays(&mut client, &mut accepted).await;
            })
            .await;
    }

    #[tokio::test]
    async fn test_socks5_unresolvable_domain_is_unreachable() {
        LocalSet::new()
            .run_until(async {
                let manager = start_manager();
                let tunnel = manager.dynamic("proxy", loopback()).await.unwrap();

                let mut client = connect(tunnel.local()).await;
                client.write_all(&[5, 1, 0]).await.unwrap();
                assert_eq!(read_reply::<2>(&mut client).await, socks5::METHOD_ACCEPTED);

                let domainname = b"host.invalid";
                let mut request = vec![5, 1, 0, 3, domainname.len() as u8];
                request.extend_from_slice(domainname);
                request.extend_from_slice(&80u16.to_be_bytes());
                client.write_all(&request).await.unwrap();

                assert_eq!(read_reply::<10>(&mut client).await, socks5::HOST_UNREACHABLE);
                assert_closed(&mut client).await;
            })
            .await;
    }

    #[tokio::test]
    async fn test_socks5_unsupported_command_is_refused() {
        LocalSet::new()
            .run_until(async {
                let manager = start_manager();
                let tunnel = manager.dynamic("proxy", loopback()).await.unwrap();

                let mut client = connect(tunnel.local()).await;
                client.write_all(&[5, 1, 0]).await.unwrap();
                assert_eq!(read_reply::<2>(&mut client).await, socks5::METHOD_ACCEPTED);

                // BIND to 127.0.0.1:80
                client.write_all(&[5, 2, 0, 1, 127, 0, 0, 1, 0, 80]).await.unwrap();
                assert_eq!(read_reply::<10>(&mut client).await, socks5::COMMAND_NOT_SUPPORTED);
                assert_closed(&mut client).await;
            })
            .await;
    }

    #[tokio::test]
    async fn test_unknown_socks_version_is_dropped() {
        LocalSet::new()
            .run_until(async {
                let manager = start_manager();
                let tunnel = manager.dynamic("proxy", loopback()).await.unwrap();

                let mut client = connect(tunnel.local()).await;
                client.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();
                assert_closed(&mut client).await;
            })
            .await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_socket_tunnel_relays_to_unix_socket() {
        LocalSet::new()
            .run_until(async {
                let manager = start_manager();
                let directory = tempfile::tempdir().unwrap();
                let path = directory.path().join("service.sock");
                let socket_listener = tokio::net::UnixListener::bind(&path).unwrap();

                let tunnel = manager.socket("service", loopback(), &path).await.unwrap();
                assert_eq!(tunnel.target(), &TunnelTarget::Socket(path.clone()));

                let mut client = connect(tunnel.local()).await;
                let (mut accepted, _) = socket_listener.accept().await.unwrap();

                client.write_all(b"ping").await.unwrap();
                let mut buf = [0u8; 4];
                accepted.read_exact(&mut buf).await.unwrap();
                assert_eq!(&buf, b"ping");

                accepted.write_all(b"pong").await.unwrap();
                client.read_exact(&mut buf).await.unwrap();
                assert_eq!(&buf, b"pong");
            })
            .await;
    }

    #[tokio::test]
    async fn test_connect_timeout_is_applied() {
        let options = TunnelOptions {
            connect_timeout: Some(Duration::from_millis(10)),
        };

        let result: io::Result<()> = options.dial(std::future::pending()).await;
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::TimedOut);
    }
}
