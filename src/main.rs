//! Cellbridge - main entry point.
//!
//! Reads line-delimited JSON commands on stdin, drives the kernel, and
//! emits correlated events on stdout. Exits non-zero only when the kernel
//! cannot be bootstrapped.

use clap::Parser;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

use cellbridge::controller::SessionController;
use cellbridge::protocol::{CommandReader, StdoutSink};
use cellbridge::session::ProcessLauncher;
use cellbridge::types::BridgeConfig;

#[derive(Debug, Parser)]
#[command(name = "cellbridge", about = "Editor-to-kernel execution bridge")]
struct Args {
    /// Path to a JSON config file.
    #[arg(long, env = "CELLBRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Kernel adapter command (overrides config).
    #[arg(long)]
    kernel_cmd: Option<String>,

    /// Kernel adapter argument (repeatable, overrides config).
    #[arg(long = "kernel-arg")]
    kernel_args: Vec<String>,

    /// Directory for decoded image artifacts (overrides config).
    #[arg(long)]
    artifact_dir: Option<PathBuf>,
}

fn load_config(args: &Args) -> Result<BridgeConfig, Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
        None => BridgeConfig::default(),
    };
    if let Some(cmd) = &args.kernel_cmd {
        config.kernel.command = cmd.clone();
        config.kernel.args = args.kernel_args.clone();
    }
    if args.artifact_dir.is_some() {
        config.artifacts.dir = args.artifact_dir.clone();
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Stderr only; stdout belongs to the event protocol.
    cellbridge::observability::init_tracing();

    let config = load_config(&args)?;
    let cancel = CancellationToken::new();

    // Ctrl-C ends the dispatch loop; the controller then tears the session
    // down the same way an explicit shutdown command would.
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, shutting down");
            signal_cancel.cancel();
        }
    });

    let launcher = ProcessLauncher::new(config.kernel.clone());
    let controller = SessionController::new(launcher, config, cancel);

    let mut reader = CommandReader::stdin();
    let mut sink = StdoutSink::new();
    controller.run(&mut reader, &mut sink).await?;
    Ok(())
}
