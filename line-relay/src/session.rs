//! Server-side state for one accepted connection.

use std::{fmt, net::SocketAddr, sync::Arc};

use tokio::{
    io::{AsyncBufRead, AsyncWrite},
    sync::{Mutex, watch},
};
use tracing::{debug, info, warn};

use crate::{
    link::{LineReader, LineWriter},
    relay::RelayShared,
};

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Identity of a session within one relay. Never reused by that relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Active,
    Closing,
    Closed,
}

/// One connected client as seen by the relay.
///
/// The relay keeps the send side here so the registry can fan out to it; the
/// receive side is owned by the session's read task.
pub struct Session {
    id: SessionId,
    peer: Option<SocketAddr>,
    writer: Mutex<LineWriter<BoxedWriter>>,
    state: watch::Sender<SessionState>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Session {
    pub fn new<W>(id: SessionId, peer: Option<SocketAddr>, writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (state, _) = watch::channel(SessionState::Connecting);
        Self {
            id,
            peer,
            writer: Mutex::new(LineWriter::new(Box::new(writer))),
            state,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Writes one line to this client.
    ///
    /// A failed write is logged and dropped. The session stays registered and
    /// keeps receiving later broadcasts.
    pub async fn send(&self, text: &str) {
        if self.state() == SessionState::Closed {
            debug!(session = %self.id, "dropping message for closed session");
            return;
        }

        let mut writer = self.writer.lock().await;
        if let Err(error) = writer.send_line(text).await {
            warn!(session = %self.id, peer = ?self.peer, %error, "failed to send to client");
        }
    }

    pub(crate) fn mark_active(&self) {
        self.state.send_replace(SessionState::Active);
    }

    /// Reads lines from the client until end-of-stream and hands each one to
    /// the relay for fan-out, then unregisters and closes the connection.
    ///
    /// The session must already be registered.
    pub(crate) async fn run<R>(
        self: Arc<Self>,
        mut reader: LineReader<R>,
        shared: Arc<RelayShared>,
    ) where
        R: AsyncBufRead + Unpin,
    {
        let mut faults = shared.read_faults().tracker();

        loop {
            match reader.receive_line().await {
                Ok(Some(line)) => {
                    faults.reset();
                    debug!(session = %self.id, "client incoming: ({line})");
                    shared.relay_message(Some(self.id), &line).await;
                }
                Ok(None) => {
                    debug!(session = %self.id, "client closed its stream");
                    break;
                }
                Err(error) => {
                    warn!(
                        session = %self.id,
                        peer = ?self.peer,
                        %error,
                        "failed to receive from client"
                    );
                    if !faults.record().await {
                        warn!(
                            session = %self.id,
                            faults = faults.consecutive(),
                            "closing session after repeated read faults"
                        );
                        break;
                    }
                }
            }
        }

        self.close(&shared).await;
    }

    async fn close(&self, shared: &RelayShared) {
        self.state.send_replace(SessionState::Closing);
        shared.registry().remove(self.id).await;

        if let Err(error) = self.writer.lock().await.close().await {
            debug!(session = %self.id, %error, "failed to shut down client stream");
        }

        self.state.send_replace(SessionState::Closed);
        info!(session = %self.id, peer = ?self.peer, "client disconnected");
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::BufReader;

    use super::*;
    use crate::{config::ReadFaultPolicy, link};

    #[tokio::test]
    async fn send_writes_a_line_to_the_client() {
        let (server_side, client_side) = tokio::io::duplex(1024);
        let session = Session::new(SessionId::new(1), None, server_side);
        let (mut client_reader, _client_writer) = link::split(client_side);

        session.send("hello").await;

        assert_eq!(
            client_reader.receive_line().await.expect("read").as_deref(),
            Some("hello")
        );
        assert_eq!(session.state(), SessionState::Connecting);
    }

    #[tokio::test]
    async fn send_swallows_rejected_messages() {
        let (server_side, client_side) = tokio::io::duplex(1024);
        let session = Session::new(SessionId::new(2), None, server_side);
        let (mut client_reader, _client_writer) = link::split(client_side);

        session.send("bad\nline").await;
        session.send("good").await;

        assert_eq!(
            client_reader.receive_line().await.expect("read").as_deref(),
            Some("good")
        );
    }

    #[tokio::test]
    async fn end_of_stream_walks_the_lifecycle_to_closed() {
        let shared = Arc::new(RelayShared::new(None, ReadFaultPolicy::default()));
        let (server_side, client_side) = tokio::io::duplex(1024);
        let (server_reader, server_writer) = tokio::io::split(server_side);
        let session = Arc::new(Session::new(SessionId::new(3), None, server_writer));
        let (mut client_reader, mut client_writer) = link::split(client_side);

        assert!(shared.registry().add(Arc::clone(&session)).await);
        session.mark_active();
        assert_eq!(session.state(), SessionState::Active);

        let mut states = session.state.subscribe();
        let task = tokio::spawn(Arc::clone(&session).run(
            LineReader::new(BufReader::new(server_reader)),
            Arc::clone(&shared),
        ));

        client_writer.close().await.expect("close client side");
        states.changed().await.expect("state change");
        assert_ne!(*states.borrow_and_update(), SessionState::Active);
        task.await.expect("session task");

        assert_eq!(session.state(), SessionState::Closed);
        assert!(!shared.registry().contains(session.id()).await);

        session.send("too late").await;
        assert!(
            client_reader.receive_line().await.expect("read").is_none(),
            "a closed session must not write"
        );
    }

    #[test]
    fn ids_display_with_hash_prefix() {
        assert_eq!(SessionId::new(42).to_string(), "#42");
    }
}
