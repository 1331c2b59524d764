mod cli;

use crate::cli::TunnelpxArguments;
use anyhow::Result;
use clap::Parser;
use log::{LevelFilter, info, trace, warn};
use tunnelpx::{config::Config, proxy};

#[tokio::main]
async fn main() -> Result<()> {
    let args = TunnelpxArguments::parse();
    pretty_env_logger::env_logger::builder()
        .format_timestamp(None)
        .filter_level(if args.verbose { LevelFilter::Trace } else { LevelFilter::Info })
        .init();

    // Handle command line arguments
    args.handle_arguments().await?;

    info!("Starting tunnelpx");
    trace!("Arguments: {:#?}", args);

    let mut config = Config::try_load(args.effective_config_path()).await?;
    if args.apply_overrides(&mut config) {
        config.publish().await;
        if args.watch_config {
            warn!("--listen/--remote overrides are lost when the watched config file changes");
        }
    }
    config.validate()?;
    info!("Forwarding to {}", config.get_remote());

    if args.watch_config {
        config.watch_config_file();
    }

    tokio::select! {
        result = proxy::start_rp_server() => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
            Ok(())
        }
    }
}
