//! Startup configuration for relays and client links.

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::Duration,
};

/// Port a bare relay listens on when none is given.
pub const DEFAULT_RELAY_PORT: u16 = 9000;
/// Port the client and combo front ends connect to when none is given.
pub const DEFAULT_CLIENT_PORT: u16 = 9001;
/// Host the client and combo front ends connect to when none is given.
pub const DEFAULT_HOST: &str = "localhost";

#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address the listening endpoint binds to. Port 0 picks an ephemeral port.
    pub listen: SocketAddr,
    /// Applied to every session's read loop.
    pub read_faults: ReadFaultPolicy,
}

impl RelayConfig {
    /// Listens on every interface at `port`.
    pub fn on_port(port: u16) -> Self {
        Self {
            listen: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port),
            read_faults: ReadFaultPolicy::default(),
        }
    }

    pub fn with_read_faults(mut self, policy: ReadFaultPolicy) -> Self {
        self.read_faults = policy;
        self
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self::on_port(DEFAULT_RELAY_PORT)
    }
}

/// What a read loop does when `receive_line` fails without the peer closing.
///
/// The default logs the fault and reads again forever. Setting
/// `max_consecutive` closes the connection once that many faults arrive in a
/// row; any successful read resets the count.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadFaultPolicy {
    pub max_consecutive: Option<u32>,
    /// Pause before the next read after a fault.
    pub backoff: Duration,
}

impl ReadFaultPolicy {
    /// Never give up on a connection because of read faults.
    pub fn retry_forever() -> Self {
        Self::default()
    }

    /// Close after `limit` consecutive faults.
    pub fn close_after(limit: u32) -> Self {
        Self {
            max_consecutive: Some(limit),
            backoff: Duration::ZERO,
        }
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub(crate) fn tracker(self) -> FaultTracker {
        FaultTracker {
            policy: self,
            consecutive: 0,
        }
    }
}

/// Per-loop counter of consecutive read faults.
#[derive(Debug)]
pub(crate) struct FaultTracker {
    policy: ReadFaultPolicy,
    consecutive: u32,
}

impl FaultTracker {
    pub(crate) fn reset(&mut self) {
        self.consecutive = 0;
    }

    /// Records one fault. Returns `false` once the loop should stop reading.
    pub(crate) async fn record(&mut self) -> bool {
        self.consecutive = self.consecutive.saturating_add(1);
        if self
            .policy
            .max_consecutive
            .is_some_and(|limit| self.consecutive >= limit)
        {
            return false;
        }

        if self.policy.backoff.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(self.policy.backoff).await;
        }
        true
    }

    pub(crate) fn consecutive(&self) -> u32 {
        self.consecutive
    }
}
