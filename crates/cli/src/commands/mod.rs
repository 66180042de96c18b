use async_trait::async_trait;
use clap::Subcommand;

/// Class and archive summaries.
pub mod inspect;
/// The archive obfuscation command.
pub mod obfuscate;
/// Standalone trap class output.
pub mod trap;

/// Top-level subcommands.
#[derive(Debug, Subcommand)]
pub enum Cmd {
    /// Obfuscate the matched classes of an archive
    Obfuscate(obfuscate::ObfuscateArgs),

    /// Print the structure of a class file or of the classes in an archive
    Inspect(inspect::InspectArgs),

    /// Write the decompiler trap class
    Trap(trap::TrapArgs),
}

/// A runnable subcommand.
#[async_trait]
pub trait Command {
    async fn execute(self) -> anyhow::Result<()>;
}

#[async_trait]
impl Command for Cmd {
    async fn execute(self) -> anyhow::Result<()> {
        match self {
            Cmd::Obfuscate(args) => args.execute().await,
            Cmd::Inspect(args) => args.execute().await,
            Cmd::Trap(args) => args.execute().await,
        }
    }
}
