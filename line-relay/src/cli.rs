use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use clap::{Args, Parser, Subcommand};

use crate::config::{
    DEFAULT_CLIENT_PORT, DEFAULT_HOST, DEFAULT_RELAY_PORT, ReadFaultPolicy, RelayConfig,
};

/// Host value that makes `combo` run the relay in-process.
pub const COMBO_SERVER: &str = "server";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a relay that forwards every line to all other connected clients.
    Relay(RelayArgs),
    /// Connect to a relay, send stdin lines and print what others send.
    Client(ClientArgs),
    /// Act as the relay (`server`) or as a client of another combo host.
    Combo(ComboArgs),
}

#[derive(Args, Debug, Clone)]
pub struct RelayArgs {
    /// Port to listen on. Use 0 for an ephemeral port.
    #[arg(default_value_t = DEFAULT_RELAY_PORT)]
    pub port: u16,

    /// Interface address to bind.
    #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub bind: IpAddr,

    #[command(flatten)]
    pub faults: FaultArgs,
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Relay host name or IP address.
    #[arg(default_value = DEFAULT_HOST)]
    pub host: String,

    /// Relay port.
    #[arg(default_value_t = DEFAULT_CLIENT_PORT)]
    pub port: u16,

    #[command(flatten)]
    pub faults: FaultArgs,
}

#[derive(Args, Debug, Clone)]
pub struct ComboArgs {
    /// `server` to host the relay here, otherwise the host to connect to.
    #[arg(default_value = DEFAULT_HOST)]
    pub target: String,

    /// Port to listen on as `server`, or to connect to otherwise.
    #[arg(default_value_t = DEFAULT_CLIENT_PORT)]
    pub port: u16,

    /// Interface address to bind when hosting.
    #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub bind: IpAddr,

    #[command(flatten)]
    pub faults: FaultArgs,
}

#[derive(Args, Debug, Clone, Default)]
pub struct FaultArgs {
    /// Close a connection after this many consecutive read faults.
    /// Without it, faults are logged and reading continues.
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u32).range(1..))]
    pub max_read_faults: Option<u32>,
}

impl FaultArgs {
    pub fn policy(&self) -> ReadFaultPolicy {
        match self.max_read_faults {
            Some(limit) => ReadFaultPolicy::close_after(limit),
            None => ReadFaultPolicy::retry_forever(),
        }
    }
}

impl RelayArgs {
    pub fn config(&self) -> RelayConfig {
        RelayConfig {
            listen: SocketAddr::new(self.bind, self.port),
            read_faults: self.faults.policy(),
        }
    }
}

impl ComboArgs {
    pub fn hosts_relay(&self) -> bool {
        self.target == COMBO_SERVER
    }

    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            listen: SocketAddr::new(self.bind, self.port),
            read_faults: self.faults.policy(),
        }
    }

    pub fn client_args(&self) -> ClientArgs {
        ClientArgs {
            host: self.target.clone(),
            port: self.port,
            faults: self.faults.clone(),
        }
    }
}
