use std::{sync::Arc, time::Duration};

use anyhow::{Result, anyhow};
use line_relay::{
    LinkError, LinkState, MessageReceiver, ReadFaultPolicy, RelayClient, link::LineReader,
};
use tokio::{
    io::{AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    sync::mpsc,
    time::timeout,
};

const WAIT: Duration = Duration::from_secs(2);

fn channel_receiver() -> (Arc<dyn MessageReceiver>, mpsc::UnboundedReceiver<String>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let receiver: Arc<dyn MessageReceiver> = Arc::new(move |text: &str| {
        let _ = tx.send(text.to_string());
    });
    (receiver, rx)
}

/// A bare listener standing in for a relay so the test controls every byte.
async fn fake_relay() -> Result<(TcpListener, u16)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();
    Ok((listener, port))
}

async fn accept(listener: &TcpListener) -> Result<TcpStream> {
    let (stream, _) = timeout(WAIT, listener.accept()).await??;
    Ok(stream)
}

async fn next(inbox: &mut mpsc::UnboundedReceiver<String>) -> Result<String> {
    timeout(WAIT, inbox.recv())
        .await?
        .ok_or_else(|| anyhow!("receiver dropped"))
}

#[tokio::test]
async fn delivers_lines_to_the_callback_until_the_relay_closes() -> Result<()> {
    let (listener, port) = fake_relay().await?;
    let (receiver, mut inbox) = channel_receiver();
    let mut link = RelayClient::new(Some(receiver));
    assert_eq!(link.state(), LinkState::Disconnected);

    let reader = link.connect("127.0.0.1", port).await?;
    assert_eq!(link.state(), LinkState::Connected);
    let reader_task = tokio::spawn(reader.run());

    let mut server = accept(&listener).await?;
    server.write_all(b"first\nsecond\r\n").await?;
    assert_eq!(next(&mut inbox).await?, "first");
    assert_eq!(next(&mut inbox).await?, "second");

    drop(server);
    timeout(WAIT, reader_task).await??;
    assert_eq!(link.state(), LinkState::Disconnected);

    let err = link.send("too late").await.expect_err("link is closed");
    assert!(matches!(err, LinkError::NotConnected));
    Ok(())
}

#[tokio::test]
async fn send_writes_one_line_per_call() -> Result<()> {
    let (listener, port) = fake_relay().await?;
    let mut link = RelayClient::new(None);
    let reader = link.connect("127.0.0.1", port).await?;
    tokio::spawn(reader.run());

    let server = accept(&listener).await?;
    let mut server = LineReader::new(BufReader::new(server));

    link.send("one").await?;
    link.send("two").await?;
    assert!(matches!(
        link.send("three\nfour").await,
        Err(LinkError::EmbeddedNewline)
    ));

    assert_eq!(server.receive_line().await?.as_deref(), Some("one"));
    assert_eq!(server.receive_line().await?.as_deref(), Some("two"));

    link.disconnect().await;
    assert!(server.receive_line().await?.is_none());
    Ok(())
}

#[tokio::test]
async fn lines_without_a_receiver_are_dropped() -> Result<()> {
    let (listener, port) = fake_relay().await?;
    let mut link = RelayClient::new(None);
    let reader_task = tokio::spawn(link.connect("127.0.0.1", port).await?.run());

    let mut server = accept(&listener).await?;
    server.write_all(b"nobody listens\n").await?;
    server.shutdown().await?;

    timeout(WAIT, reader_task).await??;
    timeout(WAIT, link.closed()).await?;
    Ok(())
}

#[tokio::test]
async fn connect_failure_is_reported_and_link_stays_disconnected() -> Result<()> {
    let (listener, port) = fake_relay().await?;
    drop(listener);

    let mut link = RelayClient::new(None);
    let err = link
        .connect("127.0.0.1", port)
        .await
        .err()
        .expect("nothing is listening");
    assert!(err.is_transport());
    assert_eq!(link.state(), LinkState::Disconnected);

    let err = link.send("hello").await.expect_err("never connected");
    assert!(matches!(err, LinkError::NotConnected));
    Ok(())
}

#[tokio::test]
async fn a_link_connects_only_once() -> Result<()> {
    let (listener, port) = fake_relay().await?;
    let mut link = RelayClient::new(None);
    let _reader = link.connect("127.0.0.1", port).await?;
    let _server = accept(&listener).await?;

    let err = link
        .connect("127.0.0.1", port)
        .await
        .err()
        .expect("second connect must be refused");
    assert!(matches!(err, LinkError::Spent));
    Ok(())
}

#[tokio::test]
async fn read_faults_are_skipped_by_default() -> Result<()> {
    let (listener, port) = fake_relay().await?;
    let (receiver, mut inbox) = channel_receiver();
    let mut link = RelayClient::new(Some(receiver));
    tokio::spawn(link.connect("127.0.0.1", port).await?.run());

    let mut server = accept(&listener).await?;
    server.write_all(b"\xff\xff\nreadable\n").await?;

    assert_eq!(next(&mut inbox).await?, "readable");
    assert_eq!(link.state(), LinkState::Connected);
    Ok(())
}

#[tokio::test]
async fn read_fault_limit_closes_the_link() -> Result<()> {
    let (listener, port) = fake_relay().await?;
    let (receiver, mut inbox) = channel_receiver();
    let mut link =
        RelayClient::new(Some(receiver)).with_read_faults(ReadFaultPolicy::close_after(2));
    let reader_task = tokio::spawn(link.connect("127.0.0.1", port).await?.run());

    let mut server = accept(&listener).await?;
    server.write_all(b"\xff\n\xfe\nnever delivered\n").await?;

    timeout(WAIT, reader_task).await??;
    assert_eq!(link.state(), LinkState::Disconnected);
    assert!(inbox.try_recv().is_err());
    Ok(())
}
