//! dbgstr - debug output capture
//!
//! Entry point that handles CLI argument parsing, logging setup and Ctrl+C
//! cancellation before handing over to the selected subcommand.

use std::process::ExitCode;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use dbgstr::ui::cli::{self, Args};

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // 1. Parse command line arguments
    let args = Args::parse();

    // 2. Initialize logger with verbosity level
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(args.log_filter()))
        .init();

    log::info!("dbgstr v{} initialized", env!("CARGO_PKG_VERSION"));
    log::debug!("Command: {:?}", args.command);

    // 3. Ctrl+C stops the stream at the next wait boundary
    let cancellation = CancellationToken::new();
    {
        let cancellation = cancellation.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::info!("Interrupted");
                cancellation.cancel();
            }
        });
    }

    let code = cli::run_platform(&args, cancellation).await?;
    Ok(ExitCode::from(code))
}
