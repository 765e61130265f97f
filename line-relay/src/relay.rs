use std::{
    future::Future,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use anyhow::{Context, Result};
use tokio::{
    io::{AsyncRead, AsyncWrite, BufReader},
    net::{TcpListener, TcpStream},
    select,
};
use tracing::{debug, info, warn};

use crate::{
    config::{ReadFaultPolicy, RelayConfig},
    link::LineReader,
    receiver::MessageReceiver,
    registry::Registry,
    session::{Session, SessionId},
};

/// A broadcast relay bound to one listening endpoint.
///
/// Every line received from a client is written to all other connected
/// clients. In combo mode a local receiver also gets each client's messages,
/// and the local application injects its own lines through
/// [`RelayHandle::relay_message`] with no sender.
pub struct Relay {
    listener: TcpListener,
    handle: RelayHandle,
}

impl Relay {
    /// Binds the listening endpoint. A port that cannot be bound is reported
    /// to the caller and never retried.
    pub async fn bind(config: RelayConfig) -> Result<Self> {
        Self::bind_with_receiver(config, None).await
    }

    pub async fn bind_with_receiver(
        config: RelayConfig,
        local: Option<Arc<dyn MessageReceiver>>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(config.listen)
            .await
            .with_context(|| format!("failed to bind relay to {}", config.listen))?;
        let local_addr = listener
            .local_addr()
            .context("failed to read relay listening address")?;

        let shared = Arc::new(RelayShared::new(local, config.read_faults));

        Ok(Self {
            listener,
            handle: RelayHandle { shared, local_addr },
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.handle.local_addr
    }

    /// A cloneable handle for injecting messages and inspecting sessions
    /// while the accept loop runs.
    pub fn handle(&self) -> RelayHandle {
        self.handle.clone()
    }

    /// Accepts connections forever. Accept faults are logged and skipped.
    pub async fn run(self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Accepts connections until `shutdown` resolves, then drops the
    /// listening endpoint. Sessions already running are left alone.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Relay { listener, handle } = self;
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    info!(addr = %handle.local_addr, "relay stopped accepting");
                    break;
                }
                accept_result = listener.accept() => {
                    handle_accept_result(accept_result, &handle);
                }
            }
        }

        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

// Registration waits on the registry lock, which a broadcast stuck on a slow
// recipient can hold indefinitely. Attaching on its own task keeps the accept
// loop and its shutdown signal responsive meanwhile.
fn handle_accept_result(result: std::io::Result<(TcpStream, SocketAddr)>, handle: &RelayHandle) {
    match result {
        Ok((stream, peer)) => {
            if let Err(err) = stream.set_nodelay(true) {
                debug!(peer = %peer, error = ?err, "failed to disable nagle");
            }
            let handle = handle.clone();
            tokio::spawn(async move {
                handle.attach(stream, Some(peer)).await;
            });
        }
        Err(err) => warn!(error = ?err, "client connection failed"),
    }
}

/// Shared handle to a running relay.
#[derive(Clone)]
pub struct RelayHandle {
    shared: Arc<RelayShared>,
    local_addr: SocketAddr,
}

impl RelayHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Fans `text` out to every session other than `sender`.
    ///
    /// `None` marks a message typed by the co-located application: it goes to
    /// every client but is not handed back to the local receiver.
    pub async fn relay_message(&self, sender: Option<SessionId>, text: &str) -> usize {
        self.shared.relay_message(sender, text).await
    }

    /// Registers `stream` as a new session and starts its read task.
    ///
    /// The session is a registry member by the time this returns.
    pub async fn attach<S>(&self, stream: S, peer: Option<SocketAddr>) -> SessionId
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let id = self.shared.next_id();
        let (reader, writer) = tokio::io::split(stream);
        let reader = LineReader::new(BufReader::new(reader));
        let session = Arc::new(Session::new(id, peer, writer));

        self.shared.registry.add(Arc::clone(&session)).await;
        session.mark_active();
        info!(session = %id, ?peer, "client connected");

        let shared = Arc::clone(&self.shared);
        tokio::spawn(session.run(reader, shared));
        id
    }

    pub async fn session_count(&self) -> usize {
        self.shared.registry.len().await
    }

    pub async fn session_ids(&self) -> Vec<SessionId> {
        self.shared.registry.ids().await
    }

    pub async fn is_registered(&self, id: SessionId) -> bool {
        self.shared.registry.contains(id).await
    }
}

pub(crate) struct RelayShared {
    registry: Registry,
    local: Option<Arc<dyn MessageReceiver>>,
    read_faults: ReadFaultPolicy,
    next_id: AtomicU64,
}

impl RelayShared {
    pub(crate) fn new(
        local: Option<Arc<dyn MessageReceiver>>,
        read_faults: ReadFaultPolicy,
    ) -> Self {
        Self {
            registry: Registry::new(),
            local,
            read_faults,
            next_id: AtomicU64::new(1),
        }
    }

    fn next_id(&self) -> SessionId {
        SessionId::new(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn registry(&self) -> &Registry {
        &self.registry
    }

    pub(crate) fn read_faults(&self) -> ReadFaultPolicy {
        self.read_faults
    }

    pub(crate) async fn relay_message(&self, sender: Option<SessionId>, text: &str) -> usize {
        self.registry
            .broadcast_except(sender, text, self.local.as_deref())
            .await
    }
}
