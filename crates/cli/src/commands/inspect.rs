//! The `inspect` subcommand: decode a class file, or the classes of an archive, and print them.
use anyhow::{bail, Context};
use async_trait::async_trait;
use clap::Args;
use jarcloak_core::class_ir::ClassSummary;
use jarcloak_core::decode_class;
use jarcloak_core::decoder::is_class_file;
use std::fs::{self, File};
use std::io::Read;
use std::path::PathBuf;
use zip::ZipArchive;

/// Arguments for the `inspect` subcommand.
#[derive(Debug, Args)]
pub struct InspectArgs {
    /// A `.class` file or an archive.
    pub path: PathBuf,
    /// Only this archive entry, e.g. `com/example/A.class`.
    #[arg(long)]
    pub entry: Option<String>,
    /// Print JSON instead of text.
    #[arg(long)]
    pub json: bool,
}

fn render(summary: &ClassSummary) -> String {
    let mut out = format!("class {} (version {})\n", summary.name, summary.version);
    if let Some(super_name) = &summary.super_name {
        out.push_str(&format!("  extends {super_name}\n"));
    }
    for iface in &summary.interfaces {
        out.push_str(&format!("  implements {iface}\n"));
    }
    for field in &summary.fields {
        out.push_str(&format!("  field {field}\n"));
    }
    for method in &summary.methods {
        out.push_str(&format!(
            "  method {}{} [0x{:04x}] {} insns\n",
            method.name, method.desc, method.access, method.instructions
        ));
    }
    out
}

impl InspectArgs {
    /// Summaries of every class the path names.
    pub fn summaries(&self) -> anyhow::Result<Vec<ClassSummary>> {
        let bytes = fs::read(&self.path)
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        if is_class_file(&bytes) {
            return Ok(vec![decode_class(&bytes)?.summary()]);
        }

        let mut archive = ZipArchive::new(File::open(&self.path)?)
            .with_context(|| format!("{} is neither a class file nor an archive", self.path.display()))?;
        let mut summaries = Vec::new();
        for index in 0..archive.len() {
            let mut entry = archive.by_index(index)?;
            let selected = match &self.entry {
                Some(wanted) => entry.name() == wanted,
                None => entry.name().ends_with(".class"),
            };
            if !selected {
                continue;
            }
            let mut data = Vec::new();
            entry.read_to_end(&mut data)?;
            let unit = decode_class(&data).with_context(|| format!("failed to decode {}", entry.name()))?;
            summaries.push(unit.summary());
        }
        if summaries.is_empty() {
            if let Some(wanted) = &self.entry {
                bail!("no entry {wanted} in {}", self.path.display());
            }
        }
        Ok(summaries)
    }
}

#[async_trait]
impl super::Command for InspectArgs {
    async fn execute(self) -> anyhow::Result<()> {
        let summaries = self.summaries()?;
        if self.json {
            println!("{}", serde_json::to_string_pretty(&summaries)?);
        } else {
            for summary in &summaries {
                print!("{}", render(summary));
            }
        }
        Ok(())
    }
}
