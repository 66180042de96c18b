//! String literal encoding.
//!
//! Every `ldc "..."` of two or more characters becomes an inline byte array holding the
//! XOR-encoded UTF-8 bytes, followed by the class key and a call to a private decoder that
//! this stage appends to the class.

use crate::context::ClassContext;
use crate::util::push_int;
use crate::{StageOutcome, Transform};
use jarcloak_core::class_ir::{access, MethodUnit};
use jarcloak_core::insn::{Code, Insn, Loadable};
use jarcloak_core::opcode;
use jarcloak_core::ClassUnit;
use jarcloak_utils::errors::TransformError;
use rand::Rng;
use tracing::debug;

/// Descriptor of the generated decoder: `(byte[] data, int key) -> String`.
pub const DECODER_DESC: &str = "([BI)Ljava/lang/String;";

const DECODER_NAME: &str = "decode";
const MAX_CODE_SIZE: usize = 65535;
/// First class version that allows private interface methods.
const PRIVATE_INTERFACE_METHODS: u16 = 53;

/// XORs every UTF-8 byte of `value` with `key`.
pub fn encode(value: &str, key: u8) -> Vec<u8> {
    value.bytes().map(|b| b ^ key).collect()
}

/// Inverse of [`encode`], the same computation the generated decoder performs.
pub fn decode(bytes: &[u8], key: u8) -> Option<String> {
    String::from_utf8(bytes.iter().map(|b| b ^ key).collect()).ok()
}

/// Instructions leaving a fresh `byte[]` holding `bytes` on the stack.
fn push_byte_array(bytes: &[u8]) -> Vec<Insn> {
    let mut insns = Vec::with_capacity(bytes.len() * 4 + 2);
    insns.push(push_int(bytes.len() as i32));
    insns.push(Insn::Int {
        op: opcode::NEWARRAY,
        operand: i32::from(opcode::T_BYTE),
    });
    for (i, b) in bytes.iter().enumerate() {
        insns.push(Insn::Simple(opcode::DUP));
        insns.push(push_int(i as i32));
        insns.push(push_int(i32::from(*b as i8)));
        insns.push(Insn::Simple(opcode::BASTORE));
    }
    insns
}

/// `static String decode(byte[] data, int key)`.
fn decoder_method(name: &str) -> MethodUnit {
    let mut method = MethodUnit::new(
        access::PRIVATE | access::STATIC | access::SYNTHETIC,
        name,
        DECODER_DESC,
    );
    let mut code = Code::new(4);
    let (top, done) = (code.new_label(), code.new_label());
    code.insns = vec![
        Insn::Var { op: opcode::ALOAD, var: 0 },
        Insn::Simple(opcode::ARRAYLENGTH),
        Insn::Int {
            op: opcode::NEWARRAY,
            operand: i32::from(opcode::T_BYTE),
        },
        Insn::Var { op: opcode::ASTORE, var: 2 },
        Insn::Simple(opcode::ICONST_0),
        Insn::Var { op: opcode::ISTORE, var: 3 },
        Insn::Label(top),
        Insn::Var { op: opcode::ILOAD, var: 3 },
        Insn::Var { op: opcode::ALOAD, var: 0 },
        Insn::Simple(opcode::ARRAYLENGTH),
        Insn::Jump {
            op: opcode::IF_ICMPGE,
            target: done,
        },
        Insn::Var { op: opcode::ALOAD, var: 2 },
        Insn::Var { op: opcode::ILOAD, var: 3 },
        Insn::Var { op: opcode::ALOAD, var: 0 },
        Insn::Var { op: opcode::ILOAD, var: 3 },
        Insn::Simple(opcode::BALOAD),
        Insn::Var { op: opcode::ILOAD, var: 1 },
        Insn::Simple(opcode::IXOR),
        Insn::Simple(opcode::I2B),
        Insn::Simple(opcode::BASTORE),
        Insn::Iinc { var: 3, incr: 1 },
        Insn::Jump {
            op: opcode::GOTO,
            target: top,
        },
        Insn::Label(done),
        Insn::Type {
            op: opcode::NEW,
            class: "java/lang/String".into(),
        },
        Insn::Simple(opcode::DUP),
        Insn::Var { op: opcode::ALOAD, var: 2 },
        Insn::Ldc(Loadable::String("UTF-8".into())),
        Insn::Method {
            op: opcode::INVOKESPECIAL,
            owner: "java/lang/String".into(),
            name: "<init>".into(),
            desc: "([BLjava/lang/String;)V".into(),
            interface: false,
        },
        Insn::Simple(opcode::ARETURN),
    ];
    method.code = Some(code);
    method
}

/// Length as the JVM counts it.
fn java_length(value: &str) -> usize {
    value.encode_utf16().count()
}

fn estimated_size(insns: &[Insn]) -> usize {
    let mut code = Code::new(0);
    code.insns = insns.to_vec();
    code.estimated_size()
}

/// Replaces string literals with XOR-encoded byte arrays and a decoder call.
#[derive(Debug, Clone, Copy, Default)]
pub struct StringEncodingTransform;

impl StringEncodingTransform {
    pub const fn new() -> Self {
        Self
    }

    /// `decode`, or the first `decodeN` that neither the class nor its known ancestors use.
    fn decoder_name(unit: &ClassUnit, cx: &ClassContext<'_>) -> String {
        let hierarchy = &cx.run.hierarchy;
        let taken = |name: &str| {
            let key = format!("{name}{DECODER_DESC}");
            unit.methods.iter().any(|m| m.name == name)
                || hierarchy
                    .lookup_chain(&cx.original_name)
                    .into_iter()
                    .any(|c| hierarchy.declares_method(c, &key))
        };
        std::iter::once(DECODER_NAME.to_string())
            .chain((0..).map(|i| format!("{DECODER_NAME}{i}")))
            .find(|name| !taken(name))
            .unwrap_or_else(|| DECODER_NAME.to_string())
    }
}

impl Transform for StringEncodingTransform {
    fn name(&self) -> &'static str {
        "StringEncoding"
    }

    fn apply(
        &self,
        unit: &mut ClassUnit,
        cx: &mut ClassContext<'_>,
    ) -> Result<StageOutcome, TransformError> {
        if !cx.is_included()
            || (unit.is_interface() && unit.major_version < PRIVATE_INTERFACE_METHODS)
        {
            return Ok(StageOutcome::unchanged());
        }
        let key: u8 = cx.run.rng.random_range(0..=255);
        let decoder = Self::decoder_name(unit, cx);
        let owner = unit.name.clone();
        let interface = unit.is_interface();
        let mut encoded = 0;

        for method in &mut unit.methods {
            let Some(code) = &mut method.code else {
                continue;
            };
            let mut size = code.estimated_size();
            let mut rewritten = Vec::with_capacity(code.insns.len());
            let mut touched = false;
            for insn in std::mem::take(&mut code.insns) {
                let Insn::Ldc(Loadable::String(value)) = &insn else {
                    rewritten.push(insn);
                    continue;
                };
                if java_length(value) < 2 {
                    rewritten.push(insn);
                    continue;
                }
                let mut block = push_byte_array(&encode(value, key));
                block.push(push_int(i32::from(key)));
                block.push(Insn::Method {
                    op: opcode::INVOKESTATIC,
                    owner: owner.clone(),
                    name: decoder.clone(),
                    desc: DECODER_DESC.into(),
                    interface,
                });
                let grown =
                    size + estimated_size(&block) - estimated_size(std::slice::from_ref(&insn));
                if grown > MAX_CODE_SIZE {
                    debug!("keeping a literal of {}.{}: body would overflow", owner, method.name);
                    rewritten.push(insn);
                    continue;
                }
                size = grown;
                rewritten.extend(block);
                encoded += 1;
                touched = true;
            }
            code.insns = rewritten;
            if touched {
                code.invalidate();
            }
        }

        if encoded == 0 {
            return Ok(StageOutcome::unchanged());
        }
        unit.methods.push(decoder_method(&decoder));
        cx.stats.strings_obfuscated += encoded;
        cx.stats.classes_with_obfuscated_strings += 1;
        debug!("encoded {} literals in {}", encoded, owner);
        Ok(StageOutcome {
            changed: true,
            recovered: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RunContext;
    use crate::matcher::IncludeMatcher;

    fn class_with_literals(literals: &[&str]) -> ClassUnit {
        let mut unit = ClassUnit::new(52, access::PUBLIC, "a/A", Some("java/lang/Object"));
        let mut m = MethodUnit::new(access::PUBLIC | access::STATIC, "greet", "()V");
        let mut code = Code::new(0);
        for literal in literals {
            code.insns.push(Insn::Ldc(Loadable::String((*literal).into())));
            code.insns.push(Insn::Simple(opcode::POP));
        }
        code.insns.push(Insn::Simple(opcode::RETURN));
        code.max_stack = Some(1);
        m.code = Some(code);
        unit.methods.push(m);
        unit
    }

    #[test]
    fn encoding_round_trips_for_every_key() {
        for key in 0..=255u8 {
            for value in ["hello", "zażółć gęślą jaźń", "\u{1F600} ok", ""] {
                assert_eq!(decode(&encode(value, key), key).as_deref(), Some(value));
            }
        }
    }

    #[test]
    fn short_literals_stay_plain() {
        let mut run = RunContext::new(IncludeMatcher::new(["a.*"]), "", Some(1));
        let mut unit = class_with_literals(&["x", ""]);
        let mut cx = ClassContext::new(&mut run, "a/A");
        let outcome = StringEncodingTransform::new().apply(&mut unit, &mut cx).unwrap();
        assert!(!outcome.changed);
        assert_eq!(unit.methods.len(), 1);
    }

    #[test]
    fn literals_route_through_one_decoder() {
        let mut run = RunContext::new(IncludeMatcher::new(["a.*"]), "", Some(1));
        let mut unit = class_with_literals(&["hello", "x", "world"]);
        unit.methods.push(MethodUnit::new(access::PUBLIC, "decode", "()V"));
        let mut cx = ClassContext::new(&mut run, "a/A");
        StringEncodingTransform::new().apply(&mut unit, &mut cx).unwrap();
        assert_eq!(cx.stats.strings_obfuscated, 2);
        assert_eq!(cx.stats.classes_with_obfuscated_strings, 1);

        let decoder = unit.methods.last().unwrap();
        assert_eq!(decoder.name, "decode0");
        assert_eq!(decoder.desc, DECODER_DESC);
        assert!(decoder.is_static() && decoder.access & access::PRIVATE != 0);

        let code = unit.methods[0].code.as_ref().unwrap();
        assert!(code.max_stack.is_none());
        let calls = code
            .insns
            .iter()
            .filter(|i| matches!(i, Insn::Method { name, .. } if name == "decode0"))
            .count();
        assert_eq!(calls, 2);
        assert!(code.insns.contains(&Insn::Ldc(Loadable::String("x".into()))));
        assert!(!code.insns.contains(&Insn::Ldc(Loadable::String("hello".into()))));
    }

    #[test]
    fn old_interfaces_are_skipped() {
        let mut run = RunContext::new(IncludeMatcher::new(["a.*"]), "", Some(1));
        let mut unit = class_with_literals(&["hello"]);
        unit.access = access::PUBLIC | access::INTERFACE | access::ABSTRACT;
        let mut cx = ClassContext::new(&mut run, "a/A");
        let outcome = StringEncodingTransform::new().apply(&mut unit, &mut cx).unwrap();
        assert!(!outcome.changed);
    }
}
