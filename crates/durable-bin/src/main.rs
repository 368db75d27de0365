use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use durable_fs::{SafeWriteConfig, SafeWriteOptions};
use tracing_subscriber::{filter::LevelFilter, util::SubscriberInitExt, EnvFilter};

mod commands;

/// Durable filesystem operations
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// A TOML file with safe-write settings
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Copy a directory tree
    Copy(commands::copy::Opt),

    /// Compare two directory trees
    Equal(commands::equal::Opt),

    /// Atomically write standard input to a file
    Write(commands::write::Opt),

    /// Remove temporary files left behind by interrupted writes
    CleanTmp(commands::clean_tmp::Opt),

    /// Concatenate chunk files to standard output
    Cat(commands::cat::Opt),
}

fn load_options(config: Option<&PathBuf>) -> anyhow::Result<SafeWriteOptions> {
    let Some(path) = config else {
        return Ok(SafeWriteOptions::default());
    };
    SafeWriteConfig::from_path(path)
        .and_then(SafeWriteConfig::into_options)
        .with_context(|| format!("failed to load configuration from '{}'", path.display()))
}

/// Entry point of the `durable` cli.
fn main() -> anyhow::Result<()> {
    // Parse the command line arguments
    let cli = Cli::parse();

    // Setup default logging level
    let default_filter = LevelFilter::INFO;

    let env_filter = EnvFilter::builder()
        .with_default_directive(default_filter.into())
        .from_env()?;

    // Setup the tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .without_time()
        .finish()
        .try_init()?;

    let options = load_options(cli.config.as_ref())?;

    // Dispatch the selected command
    match cli.command {
        Commands::Copy(opt) => commands::copy::copy(opt, &options),
        Commands::Equal(opt) => commands::equal::equal(opt, &options),
        Commands::Write(opt) => commands::write::write(opt, &options),
        Commands::CleanTmp(opt) => commands::clean_tmp::clean_tmp(opt, &options),
        Commands::Cat(opt) => commands::cat::cat(opt),
    }
}
