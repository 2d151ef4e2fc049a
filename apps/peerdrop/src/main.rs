//! peerdrop command-line entry point.

mod app;
mod cli;
mod config;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = config::Config::load()?;
    tracing::debug!(?config, "configuration loaded");

    let rt = tokio::runtime::Runtime::new()?;
    match cli.command {
        Command::Listen(args) => {
            let bind = args.bind.unwrap_or(config.bind);
            let out_dir = args.out.unwrap_or(config.out_dir);
            let transfer = args.transfer.apply(config.transfer);
            transfer.validate()?;
            rt.block_on(app::listen(&bind, &out_dir, transfer, args.once))?;
        }
        Command::Send(args) => {
            let transfer = args.transfer.apply(config.transfer);
            transfer.validate()?;
            let summary = rt.block_on(app::send(&args.url, &args.file, transfer))?;
            println!(
                "sent {} ({} bytes, {} chunks) in {:.1?}",
                summary.file_name, summary.total_size, summary.chunks, summary.elapsed
            );
        }
    }

    Ok(())
}
