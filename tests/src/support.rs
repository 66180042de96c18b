use jarcloak_core::class_ir::{access, FieldUnit, MethodUnit};
use jarcloak_core::frames::ObjectSuperResolver;
use jarcloak_core::insn::{Code, Insn, Label, Loadable, LocalVar};
use jarcloak_core::{encode_class, opcode, ClassUnit};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

pub(crate) const MANIFEST: &[u8] = b"Manifest-Version: 1.0\r\nMain-Class: com.example.A\r\n\r\n";

pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// A default constructor calling `super_name.<init>()V`.
pub(crate) fn constructor(super_name: &str) -> MethodUnit {
    let mut init = MethodUnit::new(access::PUBLIC, "<init>", "()V");
    let mut code = Code::new(1);
    code.insns = vec![
        Insn::Var { op: opcode::ALOAD, var: 0 },
        Insn::Method {
            op: opcode::INVOKESPECIAL,
            owner: super_name.into(),
            name: "<init>".into(),
            desc: "()V".into(),
            interface: false,
        },
        Insn::Simple(opcode::RETURN),
    ];
    init.code = Some(code);
    init
}

/// `class com/example/Base { int total; int add(int) }`.
pub(crate) fn base_class() -> ClassUnit {
    let mut unit = ClassUnit::new(52, access::PUBLIC | access::SUPER, "com/example/Base", Some("java/lang/Object"));
    unit.fields.push(FieldUnit::new(access::PROTECTED, "total", "I"));
    unit.methods.push(constructor("java/lang/Object"));

    let mut add = MethodUnit::new(access::PUBLIC, "add", "(I)I");
    let mut code = Code::new(2);
    let (start, end) = (code.new_label(), code.new_label());
    code.insns = vec![
        Insn::Label(start),
        Insn::Var { op: opcode::ALOAD, var: 0 },
        Insn::Simple(opcode::DUP),
        Insn::Field {
            op: opcode::GETFIELD,
            owner: "com/example/Base".into(),
            name: "total".into(),
            desc: "I".into(),
        },
        Insn::Var { op: opcode::ILOAD, var: 1 },
        Insn::Simple(opcode::IADD),
        Insn::Field {
            op: opcode::PUTFIELD,
            owner: "com/example/Base".into(),
            name: "total".into(),
            desc: "I".into(),
        },
        Insn::Var { op: opcode::ALOAD, var: 0 },
        Insn::Field {
            op: opcode::GETFIELD,
            owner: "com/example/Base".into(),
            name: "total".into(),
            desc: "I".into(),
        },
        Insn::Simple(opcode::IRETURN),
        Insn::Label(end),
    ];
    code.local_vars.push(local("amount", "I", start, end, 1));
    add.code = Some(code);
    unit.methods.push(add);
    unit
}

pub(crate) fn local(name: &str, desc: &str, start: Label, end: Label, index: u16) -> LocalVar {
    LocalVar {
        name: name.into(),
        desc: desc.into(),
        signature: None,
        start,
        end,
        index,
    }
}

/// `class com/example/A extends Base` with a string literal, a loop and a call into `Base`.
pub(crate) fn app_class() -> ClassUnit {
    let mut unit = ClassUnit::new(52, access::PUBLIC | access::SUPER, "com/example/A", Some("com/example/Base"));
    unit.methods.push(constructor("com/example/Base"));

    let mut run = MethodUnit::new(access::PUBLIC, "run", "(I)Ljava/lang/String;");
    let mut code = Code::new(3);
    let (start, top, done, end) = (code.new_label(), code.new_label(), code.new_label(), code.new_label());
    code.insns = vec![
        Insn::Label(start),
        Insn::Simple(opcode::ICONST_0),
        Insn::Var { op: opcode::ISTORE, var: 2 },
        Insn::Label(top),
        Insn::Var { op: opcode::ILOAD, var: 2 },
        Insn::Var { op: opcode::ILOAD, var: 1 },
        Insn::Jump { op: opcode::IF_ICMPGE, target: done },
        Insn::Var { op: opcode::ALOAD, var: 0 },
        Insn::Var { op: opcode::ILOAD, var: 2 },
        Insn::Method {
            op: opcode::INVOKEVIRTUAL,
            owner: "com/example/A".into(),
            name: "add".into(),
            desc: "(I)I".into(),
            interface: false,
        },
        Insn::Simple(opcode::POP),
        Insn::Iinc { var: 2, incr: 1 },
        Insn::Jump { op: opcode::GOTO, target: top },
        Insn::Label(done),
        Insn::Ldc(Loadable::String("finished".into())),
        Insn::Simple(opcode::ARETURN),
        Insn::Label(end),
    ];
    code.local_vars.push(local("limit", "I", start, end, 1));
    code.local_vars.push(local("i", "I", start, end, 2));
    run.code = Some(code);
    unit.methods.push(run);

    let mut helper = MethodUnit::new(access::PRIVATE | access::STATIC, "helper", "()V");
    let mut code = Code::new(0);
    code.insns = vec![Insn::Simple(opcode::RETURN)];
    helper.code = Some(code);
    unit.methods.push(helper);
    unit
}

/// `class com/other/B` outside every include pattern.
pub(crate) fn other_class() -> ClassUnit {
    let mut unit = ClassUnit::new(52, access::PUBLIC | access::SUPER, "com/other/B", Some("java/lang/Object"));
    unit.methods.push(constructor("java/lang/Object"));
    unit
}

pub(crate) fn encode(unit: &ClassUnit) -> Vec<u8> {
    encode_class(unit, &ObjectSuperResolver).unwrap()
}

pub(crate) fn write_jar(path: &Path, entries: &[(&str, Vec<u8>)]) {
    let mut writer = ZipWriter::new(File::create(path).unwrap());
    for (name, bytes) in entries {
        writer.start_file(*name, SimpleFileOptions::default()).unwrap();
        writer.write_all(bytes).unwrap();
    }
    writer.finish().unwrap();
}

/// Entry names and contents, in archive order.
pub(crate) fn read_jar(path: &Path) -> Vec<(String, Vec<u8>)> {
    let mut archive = ZipArchive::new(File::open(path).unwrap()).unwrap();
    (0..archive.len())
        .map(|i| {
            let mut entry = archive.by_index(i).unwrap();
            let mut bytes = Vec::new();
            entry.read_to_end(&mut bytes).unwrap();
            (entry.name().to_string(), bytes)
        })
        .collect()
}
