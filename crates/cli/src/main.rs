/// Entry point for the jarcloak CLI.
use clap::Parser;
use jarcloak_cli::commands::Command;
use jarcloak_cli::{init_tracing, Cli};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    cli.command.execute().await
}
