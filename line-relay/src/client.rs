//! Outbound link from an application to a relay.
//!
//! [`RelayClient::connect`] opens the connection and hands back a
//! [`ClientReader`]. The caller decides where the reader runs, usually with
//! `tokio::spawn(reader.run())`; it delivers each incoming line to the
//! application's [`MessageReceiver`]. Sending goes through the client itself
//! and never waits on the reader.

use std::sync::Arc;

use tokio::{
    io::BufReader,
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::{Mutex, watch},
};
use tracing::{debug, info, warn};

use crate::{
    config::ReadFaultPolicy,
    error::LinkError,
    link::{LineReader, LineWriter},
    receiver::MessageReceiver,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
}

type SharedWriter = Arc<Mutex<Option<LineWriter<OwnedWriteHalf>>>>;

pub struct RelayClient {
    receiver: Option<Arc<dyn MessageReceiver>>,
    read_faults: ReadFaultPolicy,
    writer: SharedWriter,
    state: Arc<watch::Sender<LinkState>>,
    spent: bool,
}

impl RelayClient {
    /// A link that hands incoming lines to `receiver`, or logs and drops
    /// them when there is none.
    pub fn new(receiver: Option<Arc<dyn MessageReceiver>>) -> Self {
        let (state, _) = watch::channel(LinkState::Disconnected);
        Self {
            receiver,
            read_faults: ReadFaultPolicy::default(),
            writer: Arc::new(Mutex::new(None)),
            state: Arc::new(state),
            spent: false,
        }
    }

    pub fn with_read_faults(mut self, policy: ReadFaultPolicy) -> Self {
        self.read_faults = policy;
        self
    }

    pub fn state(&self) -> LinkState {
        *self.state.borrow()
    }

    /// Connects to the relay at `host:port`.
    ///
    /// A link connects at most once. Failures are logged and returned; the
    /// link stays `Disconnected` and may try again only if it never connected.
    pub async fn connect(&mut self, host: &str, port: u16) -> Result<ClientReader, LinkError> {
        if self.spent {
            return Err(LinkError::Spent);
        }

        self.state.send_replace(LinkState::Connecting);
        let stream = match TcpStream::connect((host, port)).await {
            Ok(stream) => stream,
            Err(error) => {
                warn!(%host, port, %error, "failed to connect to relay");
                self.state.send_replace(LinkState::Disconnected);
                return Err(error.into());
            }
        };
        if let Err(error) = stream.set_nodelay(true) {
            debug!(%error, "failed to disable nagle");
        }

        let (reader, writer) = stream.into_split();
        *self.writer.lock().await = Some(LineWriter::new(writer));
        self.spent = true;
        self.state.send_replace(LinkState::Connected);
        info!(%host, port, "connected to relay");

        Ok(ClientReader {
            reader: LineReader::new(BufReader::new(reader)),
            writer: Arc::clone(&self.writer),
            receiver: self.receiver.clone(),
            read_faults: self.read_faults,
            state: Arc::clone(&self.state),
        })
    }

    /// Sends one line to the relay. Failures are logged and returned to the
    /// caller, who is free to ignore them.
    pub async fn send(&self, text: &str) -> Result<(), LinkError> {
        let mut writer = self.writer.lock().await;
        let Some(writer) = writer.as_mut() else {
            warn!("cannot send, link is not connected");
            return Err(LinkError::NotConnected);
        };

        writer.send_line(text).await.inspect_err(|error| {
            warn!(%error, "error sending to relay");
        })
    }

    /// Closes the sending half. The relay drops this client from its
    /// registry and closes its side, which ends the reader.
    pub async fn disconnect(&self) {
        close_writer(&self.writer).await;
    }

    /// Resolves once the link is `Disconnected`, immediately if it never
    /// connected.
    pub async fn closed(&self) {
        wait_disconnected(&self.state).await;
    }
}

async fn close_writer(writer: &SharedWriter) {
    let Some(mut writer) = writer.lock().await.take() else {
        return;
    };
    if let Err(error) = writer.close().await {
        debug!(%error, "failed to shut down link");
    }
}

async fn wait_disconnected(state: &watch::Sender<LinkState>) {
    let mut state = state.subscribe();
    let _ = state
        .wait_for(|state| *state == LinkState::Disconnected)
        .await;
}

/// Receive task of a connected [`RelayClient`].
pub struct ClientReader {
    reader: LineReader<BufReader<OwnedReadHalf>>,
    writer: SharedWriter,
    receiver: Option<Arc<dyn MessageReceiver>>,
    read_faults: ReadFaultPolicy,
    state: Arc<watch::Sender<LinkState>>,
}

impl ClientReader {
    /// Delivers incoming lines until the relay closes the connection.
    pub async fn run(mut self) {
        let mut faults = self.read_faults.tracker();

        loop {
            match self.reader.receive_line().await {
                Ok(Some(line)) => {
                    faults.reset();
                    match &self.receiver {
                        Some(receiver) => receiver.receive_message(&line),
                        None => info!("no app to receive: ({line})"),
                    }
                }
                Ok(None) => break,
                Err(error) => {
                    warn!(%error, "error receiving from relay");
                    if !faults.record().await {
                        warn!(
                            faults = faults.consecutive(),
                            "closing link after repeated read faults"
                        );
                        break;
                    }
                }
            }
        }

        close_writer(&self.writer).await;
        self.state.send_replace(LinkState::Disconnected);
        info!("connection closed");
    }
}
