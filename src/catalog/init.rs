//! Code supporting the `db init` sub command.

use clap::Parser;

use super::CatalogStore;
use crate::common;

/// Command line arguments for `db init` sub command.
#[derive(Parser, Debug)]
#[command(author, version, about = "Create the catalog schema", long_about = None)]
pub struct Args {
    /// Connection URI or path of the catalog database.
    #[arg(long, default_value = "htsget.sqlite")]
    pub db_path: String,
}

/// Main entry point for `db init` sub command.
pub fn run(args_common: &common::Args, args: &Args) -> Result<(), anyhow::Error> {
    tracing::info!("args_common = {:?}", &args_common);
    tracing::info!("args = {:?}", &args);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async {
        // Opening migrates and seeds the contig tables.
        CatalogStore::open(&args.db_path, 1, "http://localhost").await?;
        tracing::info!("catalog schema is up to date at {}", &args.db_path);
        Ok::<(), anyhow::Error>(())
    })?;

    Ok(())
}
