use crate::support::{
    app_class, base_class, constructor, encode, init_tracing, other_class, read_jar, write_jar, MANIFEST,
};
use anyhow::Context;
use jarcloak_core::class_ir::{access, MethodUnit};
use jarcloak_core::insn::{Code, Insn};
use jarcloak_core::{decode_class, opcode, ClassUnit};
use jarcloak_transform::archive::ArchiveProcessor;
use jarcloak_transform::control_flow::FlowLevel;
use jarcloak_transform::obfuscator::ObfuscationConfig;
use jarcloak_transform::trap::TRAP_ENTRY;
use serde_json::Value;
use std::path::Path;

const RESOURCE: &[u8] = b"logo";

fn input_jar(path: &Path) {
    write_jar(
        path,
        &[
            ("META-INF/MANIFEST.MF", MANIFEST.to_vec()),
            ("com/example/Base.class", encode(&base_class())),
            ("com/example/A.class", encode(&app_class())),
            ("com/other/B.class", encode(&other_class())),
            ("assets/logo.txt", RESOURCE.to_vec()),
        ],
    );
}

fn seeded(seed: u64) -> ObfuscationConfig {
    let mut config = ObfuscationConfig::full(["com.example.*"]);
    config.seed = Some(seed);
    config
}

fn bytes_of<'a>(entries: &'a [(String, Vec<u8>)], name: &str) -> &'a [u8] {
    entries
        .iter()
        .find(|(n, _)| n == name)
        .map(|(_, b)| b.as_slice())
        .unwrap_or_else(|| panic!("missing entry {name}"))
}

#[test]
fn full_run_rewrites_only_included_classes() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let (input, output) = (dir.path().join("app.jar"), dir.path().join("app-obf.jar"));
    input_jar(&input);

    let report = ArchiveProcessor::new(seeded(42)).process(&input, &output).unwrap();
    let entries = read_jar(&output);

    assert_eq!(entries[0].0, "META-INF/MANIFEST.MF");
    assert_eq!(entries[0].1, MANIFEST);
    assert_eq!(bytes_of(&entries, "com/other/B.class"), encode(&other_class()));
    assert_eq!(bytes_of(&entries, "assets/logo.txt"), RESOURCE);
    assert!(entries.iter().any(|(n, _)| n == TRAP_ENTRY));
    assert!(!entries.iter().any(|(n, _)| n.starts_with("com/example/")));

    let mappings_path = report.mappings_path.clone().unwrap();
    assert_eq!(mappings_path, dir.path().join("app-obf_mappings.json"));
    let doc: Value = serde_json::from_str(&std::fs::read_to_string(&mappings_path).unwrap()).unwrap();
    let classes = doc["classes"].as_object().unwrap();
    assert_eq!(classes.len(), 2);
    let base_name = classes["com/example/Base"].as_str().unwrap();
    let app_name = classes["com/example/A"].as_str().unwrap();
    assert!(doc["methods"]["com/example/Base"]["add(I)I"].is_string());
    assert!(doc["fields"]["com/example/Base"]["total"].is_string());
    assert!(doc["localVariables"]["com/example/A"].is_object());

    let app = decode_class(bytes_of(&entries, &format!("{app_name}.class"))).unwrap();
    assert_eq!(app.name, app_name);
    assert_eq!(app.super_name.as_deref(), Some(base_name));
    let base = decode_class(bytes_of(&entries, &format!("{base_name}.class"))).unwrap();
    assert_eq!(base.name, base_name);

    assert_eq!(report.stats.classes_processed, 2);
    assert_eq!(report.stats.classes_obfuscated, 2);
    assert_eq!(report.stats.classes_failed, 0);
}

#[test]
fn same_seed_gives_same_mappings() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let input = dir.path().join("app.jar");
    input_jar(&input);

    let mut documents = Vec::new();
    for run in ["first", "second"] {
        let output = dir.path().join(format!("{run}.jar"));
        let report = ArchiveProcessor::new(seeded(7)).process(&input, &output)?;
        let path = report.mappings_path.context("mappings were not written")?;
        documents.push(std::fs::read_to_string(path)?);
    }
    assert_eq!(documents[0], documents[1]);
    Ok(())
}

#[test]
fn nothing_included_copies_everything() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let (input, output) = (dir.path().join("app.jar"), dir.path().join("out.jar"));
    input_jar(&input);

    let mut config = seeded(1);
    config.include = vec!["org.absent.*".into()];
    config.crash_class = false;
    let report = ArchiveProcessor::new(config).process(&input, &output)?;

    assert_eq!(read_jar(&output), read_jar(&input));
    assert_eq!(report.stats.classes_processed, 0);
    let path = report.mappings_path.context("mappings were not written")?;
    let doc: Value = serde_json::from_str(&std::fs::read_to_string(path)?)?;
    assert!(doc["classes"].as_object().is_some_and(|c| c.is_empty()));
    Ok(())
}

#[test]
fn one_matched_class_gives_one_class_mapping() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let (input, output) = (dir.path().join("app.jar"), dir.path().join("out.jar"));
    let mut a = ClassUnit::new(52, access::PUBLIC | access::SUPER, "com/example/A", Some("java/lang/Object"));
    a.methods.push(constructor("java/lang/Object"));
    write_jar(
        &input,
        &[
            ("META-INF/MANIFEST.MF", MANIFEST.to_vec()),
            ("com/example/A.class", encode(&a)),
            ("com/other/B.class", encode(&other_class())),
        ],
    );

    let config = ObfuscationConfig {
        include: vec!["com.example.*".into()],
        obfuscate_class_names: true,
        obfuscate_packages: true,
        obfuscate_method_names: true,
        generate_mappings: true,
        ..ObfuscationConfig::default()
    };
    let report = ArchiveProcessor::new(config).process(&input, &output)?;
    let entries = read_jar(&output);

    assert_eq!(entries[0].0, "META-INF/MANIFEST.MF");
    assert_eq!(entries[0].1, MANIFEST);
    assert_eq!(bytes_of(&entries, "com/other/B.class"), encode(&other_class()));

    let path = report.mappings_path.context("mappings were not written")?;
    let doc: Value = serde_json::from_str(&std::fs::read_to_string(path)?)?;
    let classes = doc["classes"].as_object().context("classes section")?;
    assert_eq!(classes.len(), 1);
    let renamed = classes["com/example/A"].as_str().context("renamed A")?;
    assert_ne!(renamed, "com/example/A");
    assert_eq!(decode_class(bytes_of(&entries, &format!("{renamed}.class")))?.name, renamed);
    assert_eq!(entries.len(), 3);
    Ok(())
}

/// A static method whose body sits just under the 64 KiB code limit.
fn near_limit_class() -> ClassUnit {
    let mut unit = ClassUnit::new(52, access::PUBLIC | access::SUPER, "com/example/Big", Some("java/lang/Object"));
    unit.methods.push(constructor("java/lang/Object"));
    let mut fill = MethodUnit::new(access::PUBLIC | access::STATIC, "fill", "()V");
    let mut code = Code::new(2);
    for _ in 0..32_760 {
        code.insns.push(Insn::Simple(opcode::ICONST_0));
        code.insns.push(Insn::Var { op: opcode::ISTORE, var: 1 });
    }
    code.insns.push(Insn::Simple(opcode::RETURN));
    fill.code = Some(code);
    unit.methods.push(fill);
    unit
}

#[test]
fn oversized_flow_result_is_retried_without_flow() -> anyhow::Result<()> {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let (input, output) = (dir.path().join("big.jar"), dir.path().join("out.jar"));
    write_jar(&input, &[("com/example/Big.class", encode(&near_limit_class()))]);

    let config = ObfuscationConfig {
        include: vec!["com.example.*".into()],
        obfuscate_class_names: true,
        flow_obfuscation: FlowLevel::Heavy,
        seed: Some(9),
        ..ObfuscationConfig::default()
    };
    let report = ArchiveProcessor::new(config).process(&input, &output)?;

    assert_eq!(report.stats.flow_skipped, 1);
    assert_eq!(report.stats.classes_obfuscated, 1);
    assert_eq!(report.stats.classes_failed, 0);
    assert_eq!(report.stats.methods_flow_obfuscated, 0);

    let entries = read_jar(&output);
    assert_eq!(entries.len(), 1);
    assert_ne!(entries[0].0, "com/example/Big.class");
    let class = decode_class(&entries[0].1)?;
    let fill = class.find_method("fill", "()V").context("fill kept its name")?;
    let code = fill.code.as_ref().context("fill has code")?;
    assert_eq!(code.instruction_count(), 65_521);
    Ok(())
}
