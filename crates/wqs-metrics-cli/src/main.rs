mod commands;
mod config;

use anyhow::Result;
use clap::Parser;
use tracing::level_filters::LevelFilter;
use utils::logging;
use utils::version;

use crate::config::Cli;
use crate::config::Commands;

/// Sets up global panic hooks.
fn setup_global_hooks() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        default_hook(panic_info);
        tracing::error!("Thread panicked: {}", panic_info);
    }));
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_global_hooks();

    let cli = Cli::parse();
    logging::init(LevelFilter::INFO);
    tracing::debug!("wqs-metrics {}", &**version::VERSION);

    match cli.command {
        Commands::Send(args) => commands::run_send(cli.collector, args).await,
        Commands::Query(args) => commands::run_query(cli.collector, args).await,
        Commands::Listen(args) => commands::run_listen(args).await,
    }
}
