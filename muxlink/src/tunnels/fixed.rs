use std::io;

use muxlink_proto::Endpoint;
use tokio::net::TcpStream;
use tracing::warn;

use super::TunnelOptions;
use crate::{relay::relay, transport::Transport};

pub(super) async fn forward<T: Transport>(
    transport: &T,
    options: &TunnelOptions,
    remote: &Endpoint,
    mut tcp_stream: TcpStream,
) -> io::Result<(u64, u64)> {
    let mut remote_stream = options.dial(transport.dial_tcp(remote)).await.inspect_err(|error| {
        warn!("Failed to connect to {remote}: {error}");
    })?;

    relay(&mut tcp_stream, &mut remote_stream).await
}
