//! Code supporting the `server` sub command.

use clap::Parser;
use tracing::info;

use crate::common;
use crate::config::ConfigArgs;

pub mod rest;

/// Command line arguments for `server` sub command.
#[derive(Parser, Debug)]
#[command(author, version, about = "Run the htsget/DRS/Beacon server", long_about = None)]
pub struct Args {
    #[command(flatten)]
    pub config: ConfigArgs,
}

/// Main entry point for `server` sub command.
pub fn run(args_common: &common::Args, args: &Args) -> Result<(), anyhow::Error> {
    info!("args_common = {:?}", &args_common);
    info!("args = {:?}", &args);

    let config = args.config.to_config();
    if config.debug {
        std::env::set_var("RUST_LOG", "actix_web=debug");
    }
    common::trace_rss_now();

    info!(
        "Launching server on {}:{} ...",
        &config.listen_host, config.listen_port
    );
    rest::main(config)?;

    info!("All done. Have a nice day!");
    Ok(())
}
