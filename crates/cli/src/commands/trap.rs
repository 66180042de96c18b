use anyhow::Context;
use async_trait::async_trait;
use clap::Args;
use jarcloak_transform::trap;
use std::fs;
use std::path::PathBuf;

/// Arguments for the `trap` subcommand.
#[derive(Debug, Args)]
pub struct TrapArgs {
    /// Where to write `ClassFileFormatViolation.class`.
    pub output: PathBuf,
}

#[async_trait]
impl super::Command for TrapArgs {
    async fn execute(self) -> anyhow::Result<()> {
        let bytes = trap::generate().context("failed to build the trap class")?;
        fs::write(&self.output, &bytes)
            .with_context(|| format!("failed to write {}", self.output.display()))?;
        println!("Wrote {} ({} bytes)", self.output.display(), bytes.len());
        Ok(())
    }
}
