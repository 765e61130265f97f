use anyhow::Result;
use clap::Parser;

use line_relay::{
    app,
    cli::{Cli, Command},
};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::Relay(args) => app::relay(args).await?,
        Command::Client(args) => app::client(args).await?,
        Command::Combo(args) => app::combo(args).await?,
    }

    Ok(())
}
