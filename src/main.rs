//! htsget-server main executable

pub mod authz;
pub mod beacon;
pub mod buckets;
pub mod catalog;
pub mod common;
pub mod config;
pub mod drs;
pub mod err;
pub mod htsget;
pub mod indexer;
pub mod reader;
pub mod server;

use clap::{Args, Parser, Subcommand};
use console::{Emoji, Term};

/// CLI parser based on clap.
#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "htsget/DRS/Beacon server for genomic data",
    long_about = "Serves GA4GH htsget tickets, DRS objects, and Beacon v2 variant \
    queries over a private catalog of variant and alignment files"
)]
struct Cli {
    /// Commonly used arguments
    #[command(flatten)]
    common: common::Args,

    /// The sub command to run
    #[command(subcommand)]
    command: Commands,
}

/// Enum supporting the parsing of top-level commands.
#[allow(clippy::large_enum_variant)]
#[derive(Debug, Subcommand)]
enum Commands {
    /// Database-related commands.
    Db(Db),
    /// Run the HTTP server.
    Server(server::Args),
    /// Run the background indexing worker.
    Indexer(indexer::Args),
}

/// Parsing of "db *" sub commands.
#[derive(Debug, Args)]
#[command(args_conflicts_with_subcommands = true)]
struct Db {
    /// The sub command to run
    #[command(subcommand)]
    command: DbCommands,
}

/// Enum supporting the parsing of "db *" sub commands.
#[derive(Debug, Subcommand)]
enum DbCommands {
    Init(catalog::init::Args),
    LoadRefseq(catalog::refseq::LoadArgs),
}

fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();

    // Build a tracing subscriber according to the configuration in `cli.common`.
    let collector = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(match cli.common.verbose.log_level() {
            Some(level) => match level {
                log::Level::Error => tracing::Level::ERROR,
                log::Level::Warn => tracing::Level::WARN,
                log::Level::Info => tracing::Level::INFO,
                log::Level::Debug => tracing::Level::DEBUG,
                log::Level::Trace => tracing::Level::TRACE,
            },
            None => tracing::Level::INFO,
        })
        .compact()
        .finish();

    // Install collector and go into sub commands.
    let term = Term::stderr();
    tracing::subscriber::with_default(collector, || {
        match &cli.command {
            Commands::Db(db) => match &db.command {
                DbCommands::Init(args) => {
                    catalog::init::run(&cli.common, args)?;
                }
                DbCommands::LoadRefseq(args) => {
                    catalog::refseq::run_load(&cli.common, args)?;
                }
            },
            Commands::Server(args) => {
                server::run(&cli.common, args)?;
            }
            Commands::Indexer(args) => {
                indexer::run(&cli.common, args)?;
            }
        }

        Ok::<(), anyhow::Error>(())
    })?;
    term.write_line(&format!("All done. Have a nice day!{}", Emoji(" 😃", "")))?;

    Ok(())
}
