//! Command-line front end of jarcloak.

/// Subcommand implementations.
pub mod commands;

use clap::Parser;
use commands::Cmd;
use tracing_subscriber::EnvFilter;

/// Jarcloak: JVM archive obfuscator
#[derive(Debug, Parser)]
#[command(name = "jarcloak", version)]
#[command(about = "Jarcloak: rename, encode and scramble the classes of a JVM archive")]
pub struct Cli {
    /// The subcommand to run.
    #[command(subcommand)]
    pub command: Cmd,

    /// Log per-class progress
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Installs the fmt subscriber. `RUST_LOG` wins over `verbose`.
pub fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    // a second init (tests) keeps the first subscriber
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
