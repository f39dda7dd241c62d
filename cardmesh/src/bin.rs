// Entry point: load config, start logging, bootstrap a node, run it
// until the process is killed. There is no graceful-shutdown signal
// handling in this workspace, so a deployment relies on the orchestrator
// sending a hard kill rather than an in-process drain.

use std::path::PathBuf;

use cardmesh::Node;
use cardmesh_registry::{init_logging, Config};
use clap::Parser;

#[derive(Parser)]
#[command(about = "Peer-replicated pack/trade transaction core for a card game backend")]
struct Cli {
    /// Path to this peer's TOML config file (self id, listen address,
    /// peer table, timeouts, initial stock).
    #[arg(short, long)]
    config: PathBuf,
}

fn main() {
    init_logging();
    let cli = Cli::parse();

    let config = match Config::from_file(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(target: "cardmesh", error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    let node = match Node::bootstrap(config) {
        Ok(n) => n,
        Err(e) => {
            tracing::error!(target: "cardmesh", error = %e, "failed to bootstrap node");
            std::process::exit(1);
        }
    };

    if let Err(e) = node.run() {
        tracing::error!(target: "cardmesh", error = %e, "node exited with error");
        std::process::exit(1);
    }
}
