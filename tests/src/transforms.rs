use crate::support::{app_class, base_class, encode, init_tracing};
use jarcloak_core::insn::{Insn, Loadable};
use jarcloak_core::{decode_class, opcode, ClassUnit};
use jarcloak_transform::control_flow::FlowLevel;
use jarcloak_transform::obfuscator::{ObfuscatedClass, ObfuscationConfig, ObfuscationEngine};
use jarcloak_transform::string_encoding::DECODER_DESC;

fn engine(config: ObfuscationConfig) -> ObfuscationEngine {
    let mut engine = ObfuscationEngine::new(config);
    let (base, app) = (base_class(), app_class());
    engine.register_class(&base);
    engine.register_class(&app);
    engine.scan_class(&base);
    engine.scan_class(&app);
    engine
}

fn run_all(engine: &mut ObfuscationEngine) -> (ObfuscatedClass, ObfuscatedClass) {
    let base = engine.obfuscate_class(&encode(&base_class())).unwrap();
    engine.commit(&base);
    let app = engine.obfuscate_class(&encode(&app_class())).unwrap();
    engine.commit(&app);
    (base, app)
}

fn method<'a>(unit: &'a ClassUnit, name: &str) -> &'a jarcloak_core::class_ir::MethodUnit {
    unit.methods.iter().find(|m| m.name == name).unwrap()
}

#[test]
fn every_stage_agrees_on_shared_names() {
    init_tracing();
    let mut config = ObfuscationConfig::full(["com.example.*"]);
    config.flow_obfuscation = FlowLevel::Light;
    config.seed = Some(11);
    let mut engine = engine(config);
    let (base_out, app_out) = run_all(&mut engine);

    let base = decode_class(&base_out.bytes).unwrap();
    let app = decode_class(&app_out.bytes).unwrap();
    let mappings = engine.mappings();

    assert_ne!(base.name, "com/example/Base");
    assert_eq!(mappings.classes.renamed("com/example/Base"), Some(base.name.as_str()));
    assert_eq!(app.super_name.as_deref(), Some(base.name.as_str()));

    // `add` is declared on Base and called through A
    let add = mappings.method_name("com/example/Base", "add(I)I").unwrap();
    assert!(base.methods.iter().any(|m| m.name == add && m.desc == "(I)I"));
    let run_name = mappings
        .method_name("com/example/A", "run(I)Ljava/lang/String;")
        .unwrap();
    let code = method(&app, run_name).code.as_ref().unwrap();
    assert!(code.insns.iter().any(|i| matches!(
        i,
        Insn::Method { op, owner, name, .. }
            if *op == opcode::INVOKEVIRTUAL && *owner == app.name && name == add
    )));

    // field references inside Base follow the field rename
    let total = mappings.field_name("com/example/Base", "total").unwrap();
    assert!(base.fields.iter().any(|f| f.name == total));
    let add_code = method(&base, add).code.as_ref().unwrap();
    assert!(add_code
        .insns
        .iter()
        .filter_map(|i| match i {
            Insn::Field { name, .. } => Some(name.as_str()),
            _ => None,
        })
        .all(|name| name == total));

    // the literal now goes through the class's own decoder
    assert!(!code
        .insns
        .iter()
        .any(|i| matches!(i, Insn::Ldc(Loadable::String(s)) if s == "finished")));
    assert!(app.methods.iter().any(|m| m.desc == DECODER_DESC && m.is_static()));
    assert!(code.insns.iter().any(|i| matches!(
        i,
        Insn::Method { op, owner, desc, .. }
            if *op == opcode::INVOKESTATIC && *owner == app.name && desc == DECODER_DESC
    )));

    // locals lose their source names
    assert!(code
        .local_vars
        .iter()
        .all(|l| l.name != "limit" && l.name != "i"));

    let stats = engine.stats();
    assert_eq!(stats.classes_obfuscated, 2);
    assert_eq!(stats.class_names_obfuscated, 2);
    assert_eq!(stats.strings_obfuscated, 1);
    assert!(stats.method_names_obfuscated >= 2);
}

#[test]
fn disabled_stages_leave_their_concern_alone() {
    let mut config = ObfuscationConfig::light(["com.example.*"]);
    config.obfuscate_variables = false;
    config.seed = Some(5);
    let mut engine = engine(config);
    let (_, app_out) = run_all(&mut engine);
    let app = decode_class(&app_out.bytes).unwrap();

    let run = method(&app, "run");
    let code = run.code.as_ref().unwrap();
    assert!(code
        .insns
        .iter()
        .any(|i| matches!(i, Insn::Ldc(Loadable::String(s)) if s == "finished")));
    let locals: Vec<_> = code.local_vars.iter().map(|l| l.name.as_str()).collect();
    assert_eq!(locals, vec!["limit", "i"]);
    assert!(engine.mappings().method_name("com/example/A", "helper()V").is_none());
    assert_eq!(app.methods.len(), 3);
}
