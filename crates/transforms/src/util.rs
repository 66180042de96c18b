//! Small helpers shared by the stages.

use crate::StageOutcome;
use jarcloak_core::insn::{Code, Handle, Insn, Loadable};
use jarcloak_core::opcode;
use jarcloak_utils::errors::DescriptorError;
use tracing::warn;

/// The shortest instruction that pushes `value` as an `int`.
pub fn push_int(value: i32) -> Insn {
    match value {
        -1..=5 => Insn::Simple((opcode::ICONST_0 as i32 + value) as u8),
        -128..=127 => Insn::Int {
            op: opcode::BIPUSH,
            operand: value,
        },
        -32768..=32767 => Insn::Int {
            op: opcode::SIPUSH,
            operand: value,
        },
        _ => Insn::Ldc(Loadable::Int(value)),
    }
}

/// Calls `f` on every method handle inside a loadable constant, nested condy included.
pub fn visit_handles<F>(value: &mut Loadable, f: &mut F)
where
    F: FnMut(&mut Handle),
{
    match value {
        Loadable::MethodHandle(handle) => f(handle),
        Loadable::Dynamic(condy) => {
            f(&mut condy.bsm);
            for arg in &mut condy.args {
                visit_handles(arg, f);
            }
        }
        _ => {}
    }
}

/// Calls `f` on every method handle a method body mentions: bootstrap methods, their
/// arguments, and loaded constants.
pub fn visit_code_handles<F>(code: &mut Code, f: &mut F)
where
    F: FnMut(&mut Handle),
{
    for insn in &mut code.insns {
        match insn {
            Insn::InvokeDynamic { bsm, args, .. } => {
                f(bsm);
                for arg in args {
                    visit_handles(arg, f);
                }
            }
            Insn::Ldc(value) => visit_handles(value, f),
            _ => {}
        }
    }
}

/// Replaces `target` with the rewritten value, or keeps it and counts a recovered failure.
pub fn apply_rewrite(
    target: &mut String,
    rewritten: Result<String, DescriptorError>,
    outcome: &mut StageOutcome,
) {
    match rewritten {
        Ok(value) => {
            if *target != value {
                *target = value;
                outcome.changed = true;
            }
        }
        Err(e) => {
            warn!("keeping `{}` unchanged: {}", target, e);
            outcome.recovered += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jarcloak_core::insn::{handle_kind, ConstantDynamic};

    #[test]
    fn push_int_picks_shortest_form() {
        assert_eq!(push_int(-1), Insn::Simple(opcode::ICONST_M1));
        assert_eq!(push_int(5), Insn::Simple(opcode::ICONST_5));
        assert_eq!(
            push_int(100),
            Insn::Int {
                op: opcode::BIPUSH,
                operand: 100
            }
        );
        assert_eq!(
            push_int(-200),
            Insn::Int {
                op: opcode::SIPUSH,
                operand: -200
            }
        );
        assert_eq!(push_int(70_000), Insn::Ldc(Loadable::Int(70_000)));
    }

    #[test]
    fn handles_are_found_inside_condy() {
        let handle = |name: &str| Handle {
            kind: handle_kind::INVOKE_STATIC,
            owner: "a/A".into(),
            name: name.into(),
            desc: "()V".into(),
            is_interface: false,
        };
        let mut value = Loadable::Dynamic(Box::new(ConstantDynamic {
            name: "x".into(),
            desc: "I".into(),
            bsm: handle("bsm"),
            args: vec![Loadable::MethodHandle(handle("arg")), Loadable::Int(1)],
        }));
        let mut seen = Vec::new();
        visit_handles(&mut value, &mut |h: &mut Handle| seen.push(h.name.clone()));
        assert_eq!(seen, vec!["bsm", "arg"]);
    }
}
