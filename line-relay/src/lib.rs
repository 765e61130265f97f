//! Broadcast relay for newline-delimited text.
//!
//! Clients hold a TCP connection to a relay and send one message per line;
//! the relay writes every line to all other connected clients. The same
//! crate provides the client side of that connection and a combined mode in
//! which one process is both the relay and a local participant.
//!
//! - [`link`] turns a byte stream into line send/receive halves.
//! - [`session`] is the relay's view of one connected client and owns its
//!   read loop.
//! - [`registry`] holds the live sessions behind the single lock that
//!   serializes every broadcast.
//! - [`relay`] binds the listening endpoint, accepts clients and dispatches
//!   messages, optionally to a co-located [`receiver::MessageReceiver`].
//! - [`client`] connects outward to a relay and delivers incoming lines to a
//!   callback.
//! - [`config`] and [`cli`] carry startup settings; [`app`] contains the
//!   terminal front ends used by the binary.

pub mod app;
pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod link;
pub mod receiver;
pub mod registry;
pub mod relay;
pub mod session;

pub use client::{ClientReader, LinkState, RelayClient};
pub use config::{ReadFaultPolicy, RelayConfig};
pub use error::LinkError;
pub use receiver::MessageReceiver;
pub use relay::{Relay, RelayHandle};
pub use session::{SessionId, SessionState};
