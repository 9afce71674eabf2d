use std::{
    cell::{Cell, RefCell},
    collections::HashMap,
    path::PathBuf,
    rc::Rc,
};

use muxlink_proto::Endpoint;
use tokio::{
    net::TcpListener,
    sync::{mpsc, oneshot},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{accept_connections, Tunnel, TunnelOptions, TunnelTarget};
use crate::{error::Error, transport::Transport};

pub(crate) enum ControlRequest {
    Register(Rc<Tunnel>),
    Unregister { id: u64 },
    Snapshot { reply: oneshot::Sender<Vec<String>> },
    CloseAll,
}

/// Opens tunnels and keeps the registry of the ones still running.
pub struct TunnelManager<T> {
    transport: Rc<T>,
    options: TunnelOptions,
    control: mpsc::UnboundedSender<ControlRequest>,
    inbox: RefCell<Option<mpsc::UnboundedReceiver<ControlRequest>>>,
    next_id: Cell<u64>,
}

impl<T: Transport + 'static> TunnelManager<T> {
    pub fn new(transport: Rc<T>, options: TunnelOptions) -> Self {
        let (control, inbox) = mpsc::unbounded_channel();

        Self {
            transport,
            options,
            control,
            inbox: RefCell::new(Some(inbox)),
            next_id: Cell::new(0),
        }
    }

    /// Forwards every connection accepted on `local` to `remote`.
    pub async fn fixed(&self, name: impl Into<String>, local: Endpoint, remote: Endpoint) -> Result<Rc<Tunnel>, Error> {
        self.open(name.into(), local, TunnelTarget::Address(remote)).await
    }

    /// Serves SOCKS4 and SOCKS5 (no authentication, CONNECT only) on `local`.
    pub async fn dynamic(&self, name: impl Into<String>, local: Endpoint) -> Result<Rc<Tunnel>, Error> {
        self.open(name.into(), local, TunnelTarget::Socks).await
    }

    /// Forwards every connection accepted on `local` to the remote Unix-domain socket at `path`.
    pub async fn socket(&self, name: impl Into<String>, local: Endpoint, path: impl Into<PathBuf>) -> Result<Rc<Tunnel>, Error> {
        self.open(name.into(), local, TunnelTarget::Socket(path.into())).await
    }

    async fn open(&self, name: String, local: Endpoint, target: TunnelTarget) -> Result<Rc<Tunnel>, Error> {
        let listener = bind_listener(&local).await?;
        let bound_port = listener
            .local_addr()
            .map_err(|source| Error::Listen {
                endpoint: local.clone(),
                source,
            })?
            .port();

        let id = self.next_id.get();
        self.next_id.set(id + 1);

        let tunnel = Rc::new(Tunnel {
            id,
            name,
            local: local.with_port(bound_port),
            target,
            shutdown: CancellationToken::new(),
            control: self.control.clone(),
        });

        if self.control.send(ControlRequest::Register(Rc::clone(&tunnel))).is_err() {
            warn!("Tunnel manager is gone, tunnel {} won't be tracked", tunnel.name);
        }

        info!("Tunnel {} listening on {}, forwarding to {}", tunnel.name, tunnel.local, tunnel.target);
        tokio::task::spawn_local(accept_connections(
            Rc::clone(&self.transport),
            self.options,
            listener,
            Rc::clone(&tunnel),
        ));

        Ok(tunnel)
    }

    /// Returns the sorted names of the tunnels still running.
    pub async fn tunnel_names(&self) -> Result<Vec<String>, Error> {
        let (reply, names) = oneshot::channel();
        self.control
            .send(ControlRequest::Snapshot { reply })
            .map_err(|_| Error::ManagerStopped)?;
        names.await.map_err(|_| Error::ManagerStopped)
    }

    /// Closes every registered tunnel.
    pub fn close_all(&self) {
        if self.control.send(ControlRequest::CloseAll).is_err() {
            warn!("Tunnel manager control loop is gone, cannot close tunnels");
        }
    }

    /// Runs the control loop that owns the tunnel registry.
    pub async fn run(&self) {
        let Some(mut inbox) = self.inbox.borrow_mut().take() else {
            warn!("Tunnel manager control loop is already running");
            return;
        };

        let mut registry: HashMap<u64, Rc<Tunnel>> = HashMap::new();
        while let Some(request) = inbox.recv().await {
            match request {
                ControlRequest::Register(tunnel) => {
                    debug!("Registered tunnel {}", tunnel.name);
                    registry.insert(tunnel.id, tunnel);
                }
                ControlRequest::Unregister { id } => {
                    if let Some(tunnel) = registry.remove(&id) {
                        debug!("Unregistered tunnel {}", tunnel.name);
                        tunnel.close();
                    }
                }
                ControlRequest::Snapshot { reply } => {
                    let mut names: Vec<String> = registry.values().map(|tunnel| tunnel.name.clone()).collect();
                    names.sort();
                    let _ = reply.send(names);
                }
                ControlRequest::CloseAll => {
                    for (_, tunnel) in registry.drain() {
                        tunnel.close();
                    }
                }
            }
        }
    }
}

async fn bind_listener(local: &Endpoint) -> Result<TcpListener, Error> {
    TcpListener::bind((local.host(), local.port()))
        .await
        .map_err(|source| Error::Listen {
            endpoint: local.clone(),
            source,
        })
}
