//! Whole-archive processing: a naming scan over every class, then a streaming rewrite.

use crate::control_flow::FlowLevel;
use crate::mappings_export::MappingsExporter;
use crate::obfuscator::{ObfuscatedClass, ObfuscationConfig, ObfuscationEngine};
use crate::stats::Stats;
use crate::trap::{self, TRAP_ENTRY};
use jarcloak_core::decoder::is_class_file;
use jarcloak_core::{decode_class, ClassUnit};
use jarcloak_utils::errors::{ArchiveError, EngineError};
use serde::Serialize;
use std::collections::HashSet;
use std::fs::File;
use std::io::{Read, Seek, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Archive manifest entry; always written first and never modified.
pub const MANIFEST: &str = "META-INF/MANIFEST.MF";
const MODULE_INFO: &str = "module-info.class";

/// Outcome of one archive run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    /// Run totals.
    pub stats: Stats,
    /// Where the mappings were written, when they were
    pub mappings_path: Option<PathBuf>,
}

fn is_class_entry(name: &str) -> bool {
    name.ends_with(".class") && !name.ends_with(MODULE_INFO)
}

fn read_entry<R: Read + Seek>(archive: &mut ZipArchive<R>, index: usize) -> Result<Vec<u8>, ArchiveError> {
    let mut entry = archive.by_index(index)?;
    let mut bytes = Vec::with_capacity(entry.size() as usize);
    entry.read_to_end(&mut bytes)?;
    Ok(bytes)
}

/// Runs one [`ObfuscationEngine`] over a whole archive.
#[derive(Debug)]
pub struct ArchiveProcessor {
    engine: ObfuscationEngine,
}

impl ArchiveProcessor {
    /// Creates a processor with a fresh engine for `config`.
    pub fn new(config: ObfuscationConfig) -> Self {
        Self {
            engine: ObfuscationEngine::new(config),
        }
    }

    /// The engine, with the mappings and stats of the last run.
    pub fn engine(&self) -> &ObfuscationEngine {
        &self.engine
    }

    /// Reads `input`, writes the obfuscated archive to `output`.
    pub fn process(&mut self, input: &Path, output: &Path) -> Result<RunReport, ArchiveError> {
        self.engine.reset();
        let mut archive = ZipArchive::new(File::open(input)?)?;
        info!("Processing {} ({} entries)", input.display(), archive.len());

        let matched = self.scan(&mut archive)?;
        debug!("{} classes selected for obfuscation", matched.len());

        let mut writer = ZipWriter::new(File::create(output)?);
        self.rewrite(&mut archive, &mut writer, &matched)?;

        if self.engine.config().crash_class && archive.index_for_name(TRAP_ENTRY).is_some() {
            warn!("{} already exists, not adding the crash class", TRAP_ENTRY);
        } else if self.engine.config().crash_class {
            match trap::generate() {
                Ok(bytes) => {
                    writer.start_file(TRAP_ENTRY, Self::options())?;
                    writer.write_all(&bytes)?;
                }
                Err(e) => error!("Skipping the crash class: {}", ArchiveError::Trap(e)),
            }
        }
        writer.finish()?;

        let mappings_path = if self.engine.config().generate_mappings {
            let path = MappingsExporter::mappings_path(output);
            match MappingsExporter::new(self.engine.mappings()).export(&path) {
                Ok(()) => Some(path),
                Err(e) => {
                    error!("Failed to write mappings: {}", e);
                    None
                }
            }
        } else {
            None
        };

        let stats = *self.engine.stats();
        info!("{}", stats);
        Ok(RunReport {
            stats,
            mappings_path,
        })
    }

    fn options() -> SimpleFileOptions {
        SimpleFileOptions::default().compression_method(CompressionMethod::Deflated)
    }

    /// Registers every class with the engine, then runs the naming scan over the matched ones.
    /// Returns the entry names of the matched classes.
    fn scan<R: Read + Seek>(&mut self, archive: &mut ZipArchive<R>) -> Result<HashSet<String>, ArchiveError> {
        let mut units: Vec<(String, ClassUnit)> = Vec::new();
        for index in 0..archive.len() {
            let name = archive.by_index(index)?.name().to_string();
            if !is_class_entry(&name) {
                continue;
            }
            let bytes = read_entry(archive, index)?;
            if !is_class_file(&bytes) {
                continue;
            }
            match decode_class(&bytes) {
                Ok(unit) => {
                    self.engine.register_class(&unit);
                    units.push((name, unit));
                }
                Err(e) => warn!("Cannot read {}, it will be copied as is: {}", name, e),
            }
        }

        let mut matched = HashSet::new();
        for (entry, unit) in &units {
            if self.engine.matches(&unit.name) {
                self.engine.scan_class(unit);
                matched.insert(entry.clone());
            }
        }
        Ok(matched)
    }

    /// Obfuscates one matched class, retrying without flow when flow broke it.
    fn obfuscate(&mut self, entry: &str, bytes: &[u8]) -> Result<ObfuscatedClass, EngineError> {
        match self.engine.obfuscate_class(bytes) {
            Err(e) if e.is_flow_skipped() => {
                warn!("Flow obfuscation skipped for {}: {}", entry, e);
                self.engine.stats_mut().flow_skipped += 1;
                self.engine.obfuscate_class_with_flow(bytes, FlowLevel::None)
            }
            other => other,
        }
    }

    fn rewrite<R: Read + Seek, W: Write + Seek>(
        &mut self,
        archive: &mut ZipArchive<R>,
        writer: &mut ZipWriter<W>,
        matched: &HashSet<String>,
    ) -> Result<(), ArchiveError> {
        let mut written: HashSet<String> = HashSet::new();
        // names that stay in the output whatever the renames do
        let mut reserved: HashSet<String> = archive
            .file_names()
            .filter(|name| !matched.contains(*name))
            .map(str::to_string)
            .collect();
        if self.engine.config().crash_class {
            reserved.insert(TRAP_ENTRY.to_string());
        }

        if let Some(index) = archive.index_for_name(MANIFEST) {
            writer.raw_copy_file(archive.by_index(index)?)?;
            written.insert(MANIFEST.to_string());
        }

        for index in 0..archive.len() {
            let name = archive.by_index(index)?.name().to_string();
            if name == MANIFEST {
                continue;
            }
            if !matched.contains(&name) {
                if written.insert(name.clone()) {
                    writer.raw_copy_file(archive.by_index(index)?)?;
                } else {
                    warn!("Dropping duplicate entry {}", name);
                }
                continue;
            }

            let bytes = read_entry(archive, index)?;
            self.engine.stats_mut().classes_processed += 1;
            match self.obfuscate(&name, &bytes) {
                Ok(class) => {
                    let target = class.entry_name();
                    if !reserved.contains(&target) && written.insert(target.clone()) {
                        writer.start_file(target.as_str(), Self::options())?;
                        writer.write_all(&class.bytes)?;
                        self.engine.commit(&class);
                        debug!("{} -> {}", name, target);
                    } else if written.insert(name.clone()) {
                        error!("{} collides with an existing entry, writing it unchanged", target);
                        self.engine.stats_mut().classes_failed += 1;
                        writer.raw_copy_file(archive.by_index(index)?)?;
                    }
                }
                Err(e) => {
                    error!("Failed to obfuscate {}, writing it unchanged: {}", name, e);
                    self.engine.stats_mut().classes_failed += 1;
                    if written.insert(name.clone()) {
                        writer.raw_copy_file(archive.by_index(index)?)?;
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jarcloak_core::class_ir::access;
    use jarcloak_core::encode_class;
    use jarcloak_core::frames::ObjectSuperResolver;

    fn class_bytes(name: &str) -> Vec<u8> {
        let unit = ClassUnit::new(52, access::PUBLIC | access::SUPER, name, Some("java/lang/Object"));
        encode_class(&unit, &ObjectSuperResolver).unwrap()
    }

    fn write_jar(path: &Path, entries: &[(&str, Vec<u8>)]) {
        let mut writer = ZipWriter::new(File::create(path).unwrap());
        for (name, bytes) in entries {
            writer.start_file(*name, SimpleFileOptions::default()).unwrap();
            writer.write_all(bytes).unwrap();
        }
        writer.finish().unwrap();
    }

    fn entry_names(path: &Path) -> Vec<String> {
        let archive = ZipArchive::new(File::open(path).unwrap()).unwrap();
        archive.file_names().map(str::to_string).collect()
    }

    #[test]
    fn manifest_first_and_unmatched_entries_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let (input, output) = (dir.path().join("in.jar"), dir.path().join("out.jar"));
        let manifest = b"Manifest-Version: 1.0\r\n\r\n".to_vec();
        write_jar(
            &input,
            &[
                ("com/other/B.class", class_bytes("com/other/B")),
                ("com/example/A.class", class_bytes("com/example/A")),
                (MANIFEST, manifest.clone()),
                ("config.yml", b"key: value".to_vec()),
            ],
        );

        let mut config = ObfuscationConfig::light(["com.example.*"]);
        config.generate_mappings = true;
        config.crash_class = true;
        let report = ArchiveProcessor::new(config).process(&input, &output).unwrap();

        let names = entry_names(&output);
        assert_eq!(names[0], MANIFEST);
        assert!(names.contains(&"com/other/B.class".to_string()));
        assert!(names.contains(&"config.yml".to_string()));
        assert!(!names.contains(&"com/example/A.class".to_string()));
        assert!(names.contains(&TRAP_ENTRY.to_string()));
        assert_eq!(names.len(), 5);

        let mut archive = ZipArchive::new(File::open(&output).unwrap()).unwrap();
        let manifest_index = archive.index_for_name(MANIFEST).unwrap();
        assert_eq!(read_entry(&mut archive, manifest_index).unwrap(), manifest);
        let b_index = archive.index_for_name("com/other/B.class").unwrap();
        assert_eq!(read_entry(&mut archive, b_index).unwrap(), class_bytes("com/other/B"));

        assert_eq!(report.stats.classes_processed, 1);
        assert_eq!(report.stats.classes_obfuscated, 1);
        assert_eq!(report.stats.class_names_obfuscated, 1);
        assert_eq!(report.mappings_path, Some(dir.path().join("out_mappings.json")));
    }

    #[test]
    fn renamed_class_never_replaces_a_later_entry() {
        let dir = tempfile::tempdir().unwrap();
        let config = ObfuscationConfig {
            include: vec!["com.x.Foo".into()],
            obfuscate_class_names: true,
            seed: Some(3),
            ..ObfuscationConfig::default()
        };

        // learn where Foo goes, then put a real class there
        let (first_in, first_out) = (dir.path().join("first.jar"), dir.path().join("first-out.jar"));
        write_jar(&first_in, &[("com/x/Foo.class", class_bytes("com/x/Foo"))]);
        ArchiveProcessor::new(config.clone()).process(&first_in, &first_out).unwrap();
        let taken = entry_names(&first_out).remove(0);
        assert_ne!(taken, "com/x/Foo.class");

        let mut occupant = ClassUnit::new(
            52,
            access::PUBLIC | access::SUPER,
            taken.trim_end_matches(".class"),
            Some("java/lang/Object"),
        );
        occupant.fields.push(jarcloak_core::class_ir::FieldUnit::new(access::PUBLIC, "marker", "I"));
        let occupant = encode_class(&occupant, &ObjectSuperResolver).unwrap();

        let (input, output) = (dir.path().join("in.jar"), dir.path().join("out.jar"));
        write_jar(
            &input,
            &[
                ("com/x/Foo.class", class_bytes("com/x/Foo")),
                (taken.as_str(), occupant.clone()),
            ],
        );
        let report = ArchiveProcessor::new(config).process(&input, &output).unwrap();

        let mut archive = ZipArchive::new(File::open(&output).unwrap()).unwrap();
        assert_eq!(archive.len(), 2);
        let index = archive.index_for_name(&taken).unwrap();
        assert_eq!(read_entry(&mut archive, index).unwrap(), occupant);
        let index = archive.index_for_name("com/x/Foo.class").unwrap();
        assert_eq!(read_entry(&mut archive, index).unwrap(), class_bytes("com/x/Foo"));
        assert_eq!(report.stats.classes_failed, 1);
        assert_eq!(report.stats.classes_obfuscated, 0);
    }

    #[test]
    fn unreadable_class_is_passed_through() {
        let dir = tempfile::tempdir().unwrap();
        let (input, output) = (dir.path().join("in.jar"), dir.path().join("out.jar"));
        let mut broken = class_bytes("com/example/Broken");
        broken.truncate(broken.len() / 2);
        write_jar(&input, &[("com/example/Broken.class", broken.clone())]);

        let report = ArchiveProcessor::new(ObfuscationConfig::full(["com.example.*"]))
            .process(&input, &output)
            .unwrap();
        assert_eq!(report.stats.classes_obfuscated, 0);
        let mut archive = ZipArchive::new(File::open(&output).unwrap()).unwrap();
        let index = archive.index_for_name("com/example/Broken.class").unwrap();
        assert_eq!(read_entry(&mut archive, index).unwrap(), broken);
    }

    #[test]
    fn missing_input_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = ArchiveProcessor::new(ObfuscationConfig::default())
            .process(&dir.path().join("absent.jar"), &dir.path().join("out.jar"));
        assert!(matches!(result, Err(ArchiveError::Io(_))));
    }
}
