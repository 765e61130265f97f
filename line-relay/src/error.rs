use std::io;

use thiserror::Error;

/// Failures surfaced by a line link.
///
/// None of these are reported to the remote peer; callers log them and decide
/// whether the connection survives.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    #[error("message contains a line break")]
    EmbeddedNewline,

    #[error("link is not connected")]
    NotConnected,

    #[error("link cannot be reused once it has connected")]
    Spent,
}

impl LinkError {
    /// True when the underlying stream reported a fault, as opposed to a
    /// rejected message or a link that was never connected.
    pub fn is_transport(&self) -> bool {
        matches!(self, LinkError::Transport(_))
    }
}
