//! A standalone class full of constructs that trip up decompilers while staying loadable.

use jarcloak_core::class_ir::{access, Annotation, ElementValue, FieldUnit, MethodUnit};
use jarcloak_core::frames::ObjectSuperResolver;
use jarcloak_core::insn::{Code, Insn, Label, Loadable, LocalVar, TryCatch};
use jarcloak_core::{encode_class, opcode, ClassUnit};
use jarcloak_utils::errors::EncodeError;

/// Internal name of the trap class.
pub const TRAP_CLASS: &str = "ClassFileFormatViolation";
/// Archive entry the trap class is written under.
pub const TRAP_ENTRY: &str = "ClassFileFormatViolation.class";

const DEGENERATE_SIGNATURE: &str =
    "<T::Ljava/lang/Object;U::Ljava/lang/Object;V::Ljava/lang/Object;>Ljava/lang/Object;";

/// `ABC...ZABC...` of the given length.
fn long_name(len: usize) -> String {
    (0..len).map(|i| char::from(b'A' + (i % 26) as u8)).collect()
}

fn static_method(name: String, max_locals: u16) -> (MethodUnit, Code) {
    (
        MethodUnit::new(access::PUBLIC | access::STATIC, name, "()V"),
        Code::new(max_locals),
    )
}

/// `for (int i = 0; i < 10; i++);` with a local table and line numbers.
fn counting_method(name: String) -> MethodUnit {
    let (mut method, mut code) = static_method(name, 1);
    let (start, middle, end) = (code.new_label(), code.new_label(), code.new_label());
    code.insns = vec![
        Insn::Label(start),
        Insn::Line(1),
        Insn::Simple(opcode::ICONST_0),
        Insn::Var { op: opcode::ISTORE, var: 0 },
        Insn::Label(middle),
        Insn::Line(2),
        Insn::Iinc { var: 0, incr: 1 },
        Insn::Var { op: opcode::ILOAD, var: 0 },
        Insn::Int { op: opcode::BIPUSH, operand: 10 },
        Insn::Jump { op: opcode::IF_ICMPLT, target: middle },
        Insn::Label(end),
        Insn::Line(3),
        Insn::Simple(opcode::RETURN),
    ];
    code.local_vars.push(LocalVar {
        name: "i".into(),
        desc: "I".into(),
        signature: None,
        start,
        end,
        index: 0,
    });
    method.code = Some(code);
    method
}

fn bounded_loop(name: String) -> MethodUnit {
    let (mut method, mut code) = static_method(name, 2);
    let (head, exit) = (code.new_label(), code.new_label());
    code.insns = vec![
        Insn::Simple(opcode::ICONST_0),
        Insn::Var { op: opcode::ISTORE, var: 1 },
        Insn::Label(head),
        Insn::Var { op: opcode::ILOAD, var: 1 },
        Insn::Int { op: opcode::BIPUSH, operand: 5 },
        Insn::Jump { op: opcode::IF_ICMPGE, target: exit },
        Insn::Iinc { var: 1, incr: 1 },
        Insn::Jump { op: opcode::GOTO, target: head },
        Insn::Label(exit),
        Insn::Simple(opcode::RETURN),
    ];
    method.code = Some(code);
    method
}

/// Eight loops chained through each other's exits.
fn chained_loops(name: String) -> MethodUnit {
    let (mut method, mut code) = static_method(name, 1);
    let labels: Vec<Label> = (0..10).map(|_| code.new_label()).collect();
    let mut insns = vec![
        Insn::Label(labels[0]),
        Insn::Simple(opcode::ICONST_0),
        Insn::Var { op: opcode::ISTORE, var: 0 },
    ];
    for i in 1..labels.len() - 1 {
        insns.extend([
            Insn::Label(labels[i]),
            Insn::Var { op: opcode::ILOAD, var: 0 },
            Insn::Int { op: opcode::BIPUSH, operand: i as i32 },
            Insn::Jump { op: opcode::IF_ICMPGE, target: labels[i + 1] },
            Insn::Iinc { var: 0, incr: 1 },
            Insn::Jump { op: opcode::GOTO, target: labels[i] },
        ]);
    }
    insns.push(Insn::Label(labels[labels.len() - 1]));
    insns.push(Insn::Simple(opcode::RETURN));
    code.insns = insns;
    method.code = Some(code);
    method
}

fn throwing_method(name: String) -> MethodUnit {
    let (mut method, mut code) = static_method(name, 1);
    method.exceptions = ["java/lang/Exception", "java/lang/RuntimeException", "java/lang/Error"]
        .into_iter()
        .map(String::from)
        .collect();
    let (start, end, handler) = (code.new_label(), code.new_label(), code.new_label());
    code.insns = vec![
        Insn::Label(start),
        Insn::Simple(opcode::ICONST_0),
        Insn::Simple(opcode::POP),
        Insn::Label(end),
        Insn::Simple(opcode::RETURN),
        Insn::Label(handler),
        Insn::Var { op: opcode::ASTORE, var: 0 },
        Insn::Simple(opcode::RETURN),
    ];
    code.try_catches.push(TryCatch {
        start,
        end,
        handler,
        catch_type: Some("java/lang/Exception".into()),
    });
    method.code = Some(code);
    method
}

/// The trap class as an unencoded unit.
pub fn trap_class() -> ClassUnit {
    let mut class = ClassUnit::new(52, access::PUBLIC, TRAP_CLASS, Some("java/lang/Object"));
    class.annotations.visible.push(Annotation {
        desc: format!("L{};", long_name(500)),
        values: vec![(
            "value".into(),
            ElementValue::Const {
                tag: b's',
                value: Loadable::String(long_name(1000)),
            },
        )],
    });

    for i in 0..5 {
        let mut field = FieldUnit::new(
            access::PUBLIC | access::STATIC | access::FINAL,
            format!("field{}", long_name(100 + i * 50)),
            "Ljava/lang/Object;",
        );
        field.signature = Some(DEGENERATE_SIGNATURE.into());
        field.annotations.invisible.push(Annotation {
            desc: format!("L{};", long_name(300)),
            values: Vec::new(),
        });
        class.fields.push(field);
    }

    for i in 0..10 {
        class.methods.push(counting_method(format!("method{i}{}", long_name(50 + i * 10))));
    }
    class.methods.push(bounded_loop(format!("complexMethod{}", long_name(100))));
    class.methods.push(chained_loops(format!("nestedMethod{}", long_name(100))));
    class.methods.push(throwing_method(format!("exceptionMethod{}", long_name(100))));
    class
}

/// Encoded bytes of the trap class.
pub fn generate() -> Result<Vec<u8>, EncodeError> {
    encode_class(&trap_class(), &ObjectSuperResolver)
}
