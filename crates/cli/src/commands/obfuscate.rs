//! The `obfuscate` subcommand: one archive in, one archive out.
use anyhow::Context;
use async_trait::async_trait;
use clap::Args;
use jarcloak_transform::archive::ArchiveProcessor;
use jarcloak_transform::control_flow::FlowLevel;
use jarcloak_transform::obfuscator::ObfuscationConfig;
use std::fs;
use std::path::PathBuf;
use tracing::info;

/// Arguments for the `obfuscate` subcommand. Flags override the settings file.
#[derive(Debug, Args)]
pub struct ObfuscateArgs {
    /// Archive to read.
    pub input: PathBuf,
    /// Archive to write.
    pub output: PathBuf,
    /// Settings JSON.
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Dotted class pattern, e.g. `com.example.*`. Repeatable.
    #[arg(long = "include")]
    pub include: Vec<String>,
    /// Rename classes.
    #[arg(long)]
    pub classes: bool,
    /// Rename packages.
    #[arg(long)]
    pub packages: bool,
    /// Rename fields and local variables.
    #[arg(long)]
    pub variables: bool,
    /// Encode string literals.
    #[arg(long)]
    pub strings: bool,
    /// Rename methods.
    #[arg(long)]
    pub methods: bool,
    /// Shuffle method declaration order.
    #[arg(long)]
    pub order: bool,
    /// Add the decompiler trap class.
    #[arg(long)]
    pub crash_class: bool,
    /// Write `<output>_mappings.json`.
    #[arg(long)]
    pub mappings: bool,
    /// Dead control flow: none, light or heavy.
    #[arg(long)]
    pub flow: Option<FlowLevel>,
    /// Prefix of generated names.
    #[arg(long)]
    pub watermark: Option<String>,
    /// Seed for a reproducible run.
    #[arg(long)]
    pub seed: Option<u64>,
    /// Path to emit the run statistics as JSON.
    #[arg(long)]
    pub report: Option<PathBuf>,
}

impl ObfuscateArgs {
    /// The settings file (or defaults) with the command-line flags applied on top.
    pub fn config(&self) -> anyhow::Result<ObfuscationConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let json = fs::read_to_string(path)
                    .with_context(|| format!("failed to read {}", path.display()))?;
                ObfuscationConfig::from_json(&json)
                    .with_context(|| format!("invalid settings in {}", path.display()))?
            }
            None => ObfuscationConfig::default(),
        };
        config.include.extend(self.include.iter().cloned());
        config.obfuscate_class_names |= self.classes;
        config.obfuscate_packages |= self.packages;
        config.obfuscate_variables |= self.variables;
        config.obfuscate_strings |= self.strings;
        config.obfuscate_method_names |= self.methods;
        config.change_methods_orders |= self.order;
        config.crash_class |= self.crash_class;
        config.generate_mappings |= self.mappings;
        if let Some(flow) = self.flow {
            config.flow_obfuscation = flow;
        }
        if let Some(watermark) = &self.watermark {
            config.watermark = watermark.clone();
        }
        if self.seed.is_some() {
            config.seed = self.seed;
        }
        Ok(config)
    }
}

#[async_trait]
impl super::Command for ObfuscateArgs {
    async fn execute(self) -> anyhow::Result<()> {
        let config = self.config()?;
        if config.include.is_empty() {
            tracing::warn!("No include patterns given, the archive will be copied unchanged");
        }

        let (input, output) = (self.input.clone(), self.output.clone());
        let report = tokio::task::spawn_blocking(move || {
            ArchiveProcessor::new(config).process(&input, &output)
        })
        .await?
        .with_context(|| format!("failed to obfuscate {}", self.input.display()))?;

        println!("{}", report.stats);
        if let Some(path) = &report.mappings_path {
            println!("Mappings: {}", path.display());
        }
        if let Some(path) = &self.report {
            fs::write(path, serde_json::to_string_pretty(&report)?)?;
            info!("Report written to {}", path.display());
        }
        Ok(())
    }
}
