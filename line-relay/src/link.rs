//! Line-oriented send/receive halves over any async byte stream.
//!
//! Both the relay's per-client sessions and the outbound client link speak
//! through these two types, so the wire rules live in one place: a message is
//! one line of UTF-8 text terminated by `\n`, with no other framing.

use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf,
    WriteHalf,
};

use crate::error::LinkError;

const LINE_ENDINGS: &[char] = &['\n', '\r'];

/// Splits a bidirectional stream into a line reader and a line writer.
pub fn split<S>(stream: S) -> (LineReader<BufReader<ReadHalf<S>>>, LineWriter<WriteHalf<S>>)
where
    S: AsyncRead + AsyncWrite,
{
    let (reader, writer) = tokio::io::split(stream);
    (LineReader::new(BufReader::new(reader)), LineWriter::new(writer))
}

/// Receive side of a link.
#[derive(Debug)]
pub struct LineReader<R> {
    inner: R,
    line: String,
}

impl<R> LineReader<R>
where
    R: AsyncBufRead + Unpin,
{
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            line: String::new(),
        }
    }

    /// Waits for the next complete line.
    ///
    /// Only `\n` ends a line; the terminator and any `\r` before it are
    /// stripped.
    ///
    /// Returns `Ok(None)` once the remote side has closed its half of the
    /// stream. A trailing fragment without a terminator is still delivered
    /// as a line before the close is reported.
    ///
    /// A line that is not valid UTF-8 yields a transport error; its bytes are
    /// consumed, so calling again continues with the following line.
    pub async fn receive_line(&mut self) -> Result<Option<String>, LinkError> {
        self.line.clear();
        let bytes = self.inner.read_line(&mut self.line).await?;
        if bytes == 0 {
            return Ok(None);
        }

        let text = self.line.trim_end_matches(LINE_ENDINGS);
        Ok(Some(text.to_string()))
    }
}

/// Send side of a link.
#[derive(Debug)]
pub struct LineWriter<W> {
    inner: W,
}

impl<W> LineWriter<W>
where
    W: AsyncWrite + Unpin,
{
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Writes `text` followed by a single `\n` and flushes before returning.
    ///
    /// Text the far side could not read back unchanged is rejected without
    /// touching the stream: a `\n` anywhere, or a trailing `\r` that would be
    /// taken for part of the terminator. A bare `\r` inside the text is
    /// ordinary content, so every line [`LineReader`] yields can be resent.
    pub async fn send_line(&mut self, text: &str) -> Result<(), LinkError> {
        if text.contains('\n') || text.ends_with('\r') {
            return Err(LinkError::EmbeddedNewline);
        }

        let mut encoded = Vec::with_capacity(text.len() + 1);
        encoded.extend_from_slice(text.as_bytes());
        encoded.push(b'\n');
        self.inner.write_all(&encoded).await?;
        self.inner.flush().await?;
        Ok(())
    }

    /// Shuts down the write half. The peer observes end-of-stream.
    pub async fn close(&mut self) -> Result<(), LinkError> {
        self.inner.shutdown().await?;
        Ok(())
    }
}
