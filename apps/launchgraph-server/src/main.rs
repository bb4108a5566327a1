use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::error;

use launchgraph_server::{run_server, BootError};

#[derive(Debug, Parser)]
#[command(name = "launchgraph-server", about = "Launchgraph runtime server")]
struct Args {
    #[arg(long, default_value = "config/launchgraph.yaml")]
    config: PathBuf,
    /// Override the configured listen address.
    #[arg(long)]
    listen: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    match run_server(args.config, args.listen).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "server exited with error");
            match err {
                BootError::Config(_) => ExitCode::from(2),
                BootError::Store(_) => ExitCode::from(3),
                BootError::Migration(_) => ExitCode::from(4),
                BootError::Serve(_) => ExitCode::FAILURE,
            }
        }
    }
}
