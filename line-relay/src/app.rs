//! Terminal front ends for the `relay`, `client` and `combo` commands.
//!
//! They read lines from stdin and print `Received: (<text>)` for every
//! incoming message. Printing happens on its own task so the receive
//! callback only hands the text over.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use tokio::{
    io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader},
    select,
    sync::mpsc,
    task::JoinHandle,
    time::timeout,
};
use tracing::{debug, info, warn};

use crate::{
    cli::{ClientArgs, ComboArgs, RelayArgs},
    client::RelayClient,
    receiver::MessageReceiver,
    relay::{Relay, RelayHandle},
};

/// How long a leaving client waits for the relay to close its side.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

const CLIENT_BANNER: &str = "Connected...";
const COMBO_CLIENT_BANNER: &str = "Started as client...";
const COMBO_SERVER_BANNER: &str = "Started as server host...";

pub async fn relay(args: RelayArgs) -> Result<()> {
    let relay = Relay::bind(args.config()).await?;
    info!("relay listening on {}", relay.local_addr());

    if let Err(err) = relay.run_until_ctrl_c().await {
        warn!("relay exited with error: {err:?}");
        return Err(err);
    }
    Ok(())
}

pub async fn client(args: ClientArgs) -> Result<()> {
    run_client(args, CLIENT_BANNER).await
}

async fn run_client(args: ClientArgs, banner: &str) -> Result<()> {
    let (receiver, printer) = printing_receiver();
    let mut link = RelayClient::new(Some(receiver)).with_read_faults(args.faults.policy());

    let reader = link
        .connect(&args.host, args.port)
        .await
        .with_context(|| format!("could not connect to {}:{}", args.host, args.port))?;
    write_stdout(banner).await?;
    tokio::spawn(reader.run());

    run_input_loop(Outlet::Client(&link)).await?;

    link.disconnect().await;
    if timeout(CLOSE_GRACE, link.closed()).await.is_err() {
        debug!("relay did not close the connection in time");
    }
    drop(link);
    if timeout(CLOSE_GRACE, printer).await.is_err() {
        debug!("printer still busy at exit");
    }
    Ok(())
}

pub async fn combo(args: ComboArgs) -> Result<()> {
    if !args.hosts_relay() {
        return run_client(args.client_args(), COMBO_CLIENT_BANNER).await;
    }

    let (receiver, printer) = printing_receiver();
    let relay = Relay::bind_with_receiver(args.relay_config(), Some(receiver)).await?;
    info!("relay listening on {}", relay.local_addr());
    let handle = relay.handle();
    let accept = tokio::spawn(relay.run());
    write_stdout(COMBO_SERVER_BANNER).await?;

    let result = run_input_loop(Outlet::Relay(&handle)).await;

    accept.abort();
    printer.abort();
    result
}

/// Where stdin lines go: through a client link, or straight into a local
/// relay as messages without a sender.
enum Outlet<'a> {
    Client(&'a RelayClient),
    Relay(&'a RelayHandle),
}

impl Outlet<'_> {
    async fn send(&self, text: &str) {
        match self {
            // The link logs its own failures.
            Outlet::Client(link) => {
                let _ = link.send(text).await;
            }
            Outlet::Relay(handle) => {
                handle.relay_message(None, text).await;
            }
        }
    }

    async fn closed(&self) {
        match self {
            Outlet::Client(link) => link.closed().await,
            Outlet::Relay(_) => std::future::pending().await,
        }
    }
}

async fn run_input_loop(outlet: Outlet<'_>) -> Result<()> {
    let mut stdin = BufReader::new(io::stdin()).lines();
    write_stderr("Enter a string to send:").await?;

    loop {
        select! {
            line = stdin.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    break;
                };
                let text = line.trim_end_matches('\r');
                if text.is_empty() {
                    continue;
                }
                debug!("sending: ({text})");
                outlet.send(text).await;
            }
            _ = outlet.closed() => {
                write_stderr("*** relay closed the connection").await?;
                break;
            }
            ctrl_c = tokio::signal::ctrl_c() => {
                if let Err(error) = ctrl_c {
                    warn!(?error, "ctrl-c handler failed");
                }
                break;
            }
        }
    }
    Ok(())
}

fn printing_receiver() -> (Arc<dyn MessageReceiver>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let printer = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if let Err(error) = write_stdout(&format!("Received: ({text})")).await {
                warn!(?error, "failed to print message");
                break;
            }
        }
    });

    let receiver: Arc<dyn MessageReceiver> = Arc::new(move |text: &str| {
        let _ = tx.send(text.to_string());
    });
    (receiver, printer)
}

async fn write_stdout(line: &str) -> io::Result<()> {
    let mut stdout = io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}

async fn write_stderr(line: &str) -> io::Result<()> {
    let mut stderr = io::stderr();
    stderr.write_all(line.as_bytes()).await?;
    stderr.write_all(b"\n").await?;
    stderr.flush().await
}
