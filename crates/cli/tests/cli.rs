use clap::Parser;
use jarcloak_cli::commands::{Cmd, Command};
use jarcloak_cli::Cli;
use jarcloak_core::class_ir::access;
use jarcloak_core::frames::ObjectSuperResolver;
use jarcloak_core::{decode_class, encode_class, ClassUnit};
use jarcloak_transform::control_flow::FlowLevel;
use std::fs::File;
use std::io::Write;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

fn class_bytes(name: &str) -> Vec<u8> {
    let unit = ClassUnit::new(52, access::PUBLIC | access::SUPER, name, Some("java/lang/Object"));
    encode_class(&unit, &ObjectSuperResolver).unwrap()
}

fn write_jar(path: &std::path::Path) {
    let mut writer = ZipWriter::new(File::create(path).unwrap());
    for name in ["com/example/A", "com/other/B"] {
        writer
            .start_file(format!("{name}.class"), SimpleFileOptions::default())
            .unwrap();
        writer.write_all(&class_bytes(name)).unwrap();
    }
    writer.finish().unwrap();
}

#[test]
fn flags_override_the_settings_file() {
    let dir = tempfile::tempdir().unwrap();
    let settings = dir.path().join("settings.json");
    std::fs::write(
        &settings,
        r#"{"include":["com.example.*"],"obfuscatePackages":true,"flowObfuscation":"HEAVY","seed":1}"#,
    )
    .unwrap();

    let cli = Cli::try_parse_from([
        "jarcloak",
        "obfuscate",
        "in.jar",
        "out.jar",
        "--config",
        settings.to_str().unwrap(),
        "--include",
        "org.demo",
        "--classes",
        "--flow",
        "light",
        "--seed",
        "7",
    ])
    .unwrap();
    let Cmd::Obfuscate(args) = cli.command else {
        panic!("expected obfuscate");
    };
    let config = args.config().unwrap();
    assert_eq!(config.include, vec!["com.example.*", "org.demo"]);
    assert!(config.obfuscate_packages && config.obfuscate_class_names);
    assert_eq!(config.flow_obfuscation, FlowLevel::Light);
    assert_eq!(config.seed, Some(7));
}

#[tokio::test]
async fn obfuscate_writes_archive_report_and_mappings() {
    let dir = tempfile::tempdir().unwrap();
    let (input, output, report) = (
        dir.path().join("app.jar"),
        dir.path().join("app-obf.jar"),
        dir.path().join("report.json"),
    );
    write_jar(&input);

    let cli = Cli::try_parse_from([
        "jarcloak",
        "obfuscate",
        input.to_str().unwrap(),
        output.to_str().unwrap(),
        "--include",
        "com.example.*",
        "--classes",
        "--packages",
        "--mappings",
        "--report",
        report.to_str().unwrap(),
    ])
    .unwrap();
    cli.command.execute().await.unwrap();

    assert!(output.exists());
    assert!(dir.path().join("app-obf_mappings.json").exists());
    let stats: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&report).unwrap()).unwrap();
    assert_eq!(stats["stats"]["classNamesObfuscated"], 1);
}

#[tokio::test]
async fn trap_and_inspect_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("Trap.class");
    Cli::try_parse_from(["jarcloak", "trap", path.to_str().unwrap()])
        .unwrap()
        .command
        .execute()
        .await
        .unwrap();
    let class = decode_class(&std::fs::read(&path).unwrap()).unwrap();
    assert_eq!(class.name, "ClassFileFormatViolation");

    let cli = Cli::try_parse_from(["jarcloak", "inspect", path.to_str().unwrap(), "--json"]).unwrap();
    let Cmd::Inspect(args) = cli.command else {
        panic!("expected inspect");
    };
    let summaries = args.summaries().unwrap();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].methods.len(), 13);
}

#[tokio::test]
async fn inspect_reads_one_archive_entry() {
    let dir = tempfile::tempdir().unwrap();
    let jar = dir.path().join("app.jar");
    write_jar(&jar);
    let cli = Cli::try_parse_from([
        "jarcloak",
        "inspect",
        jar.to_str().unwrap(),
        "--entry",
        "com/other/B.class",
    ])
    .unwrap();
    let Cmd::Inspect(args) = cli.command else {
        panic!("expected inspect");
    };
    let summaries = args.summaries().unwrap();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].name, "com/other/B");
}
