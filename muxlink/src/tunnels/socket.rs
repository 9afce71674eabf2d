use std::{io, path::Path};

use tokio::net::TcpStream;
use tracing::warn;

use super::TunnelOptions;
use crate::{relay::relay, transport::Transport};

pub(super) async fn forward<T: Transport>(
    transport: &T,
    options: &TunnelOptions,
    path: &Path,
    mut tcp_stream: TcpStream,
) -> io::Result<(u64, u64)> {
    let mut remote_stream = options.dial(transport.dial_unix(path)).await.inspect_err(|error| {
        warn!("Failed to connect to unix socket {}: {error}", path.display());
    })?;

    relay(&mut tcp_stream, &mut remote_stream).await
}
