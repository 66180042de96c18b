use crate::support::{app_class, base_class, encode};
use jarcloak_core::decoder::is_class_file;
use jarcloak_core::insn::Insn;
use jarcloak_core::{decode_class, opcode};
use jarcloak_utils::errors::DecodeError;

#[test]
fn decoded_class_keeps_members_and_debug_tables() {
    let bytes = encode(&app_class());
    assert!(is_class_file(&bytes));
    let class = decode_class(&bytes).unwrap();
    assert_eq!(class.name, "com/example/A");
    assert_eq!(class.super_name.as_deref(), Some("com/example/Base"));

    let run = class.find_method("run", "(I)Ljava/lang/String;").unwrap();
    let code = run.code.as_ref().unwrap();
    assert_eq!(code.max_stack, Some(2));
    assert_eq!(code.max_locals, 3);
    let locals: Vec<_> = code.local_vars.iter().map(|l| l.name.as_str()).collect();
    assert_eq!(locals, vec!["limit", "i"]);
    // the loop head needs a frame
    assert!(!code.frames.is_empty());
    assert!(code
        .insns
        .iter()
        .any(|i| matches!(i, Insn::Jump { op, .. } if *op == opcode::IF_ICMPGE)));
}

#[test]
fn unmodified_class_survives_a_second_pass() {
    let first = decode_class(&encode(&base_class())).unwrap();
    let second = decode_class(&encode(&first)).unwrap();
    assert_eq!(first, second);
}

#[test]
fn truncated_input_is_an_error_not_a_panic() {
    let bytes = encode(&app_class());
    for len in [0, 3, 10, bytes.len() / 2, bytes.len() - 1] {
        assert!(decode_class(&bytes[..len]).is_err(), "length {len}");
    }
    assert!(matches!(
        decode_class(b"PK\x03\x04rest"),
        Err(DecodeError::BadMagic(_))
    ));
}
