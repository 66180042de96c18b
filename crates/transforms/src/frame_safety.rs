//! Conservative max-locals recomputation for rewritten method bodies.

use jarcloak_core::class_ir::MethodUnit;
use jarcloak_core::descriptor::parse_method_descriptor;
use jarcloak_core::insn::Insn;
use jarcloak_core::opcode;
use jarcloak_core::ClassUnit;
use jarcloak_utils::errors::TransformError;

/// Slots added on top of what the body visibly needs.
pub const LOCALS_BUFFER: usize = 5;

const MAX_LOCALS_LIMIT: usize = u16::MAX as usize;

/// Keeps declared max-locals large enough for every slot a method touches.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameSafetyRepairer;

impl FrameSafetyRepairer {
    /// Slots `method` needs: the larger of its parameter area and its highest referenced slot,
    /// plus [`LOCALS_BUFFER`].
    pub fn required_locals(method: &MethodUnit) -> Result<usize, TransformError> {
        let instance = usize::from(!method.is_static());
        let params = parse_method_descriptor(&method.desc)?.param_slots() + instance;
        let highest = method.code.as_ref().map_or(0, |code| {
            code.insns
                .iter()
                .filter_map(|insn| match insn {
                    Insn::Var { op, var } => Some(usize::from(*var) + opcode::var_width(*op)),
                    Insn::Iinc { var, .. } => Some(usize::from(*var) + 1),
                    _ => None,
                })
                .max()
                .unwrap_or(0)
        });
        Ok((params.max(highest) + LOCALS_BUFFER).max(instance))
    }

    /// Raises max-locals of every body in `unit` to at least the required count. Returns the
    /// number of bodies that changed.
    pub fn repair(unit: &mut ClassUnit) -> Result<usize, TransformError> {
        let mut repaired = 0;
        for method in &mut unit.methods {
            if method.code.is_none() {
                continue;
            }
            let required = Self::required_locals(method)?;
            if required > MAX_LOCALS_LIMIT {
                return Err(TransformError::InvalidMaxLocals {
                    method: format!("{}.{}{}", unit.name, method.name, method.desc),
                    value: required,
                });
            }
            if let Some(code) = &mut method.code {
                let required = required as u16;
                if code.max_locals < required {
                    code.max_locals = required;
                    repaired += 1;
                }
            }
        }
        Ok(repaired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jarcloak_core::class_ir::access;
    use jarcloak_core::insn::Code;

    fn method(access: u16, desc: &str, insns: Vec<Insn>) -> MethodUnit {
        let mut m = MethodUnit::new(access, "m", desc);
        let mut code = Code::new(0);
        code.insns = insns;
        m.code = Some(code);
        m
    }

    #[test]
    fn covers_parameters_and_instance_slot() {
        let m = method(access::PUBLIC, "(JI)V", vec![Insn::Simple(opcode::RETURN)]);
        // this + long + int
        assert_eq!(FrameSafetyRepairer::required_locals(&m).unwrap(), 4 + LOCALS_BUFFER);
        let s = method(access::STATIC, "()V", vec![Insn::Simple(opcode::RETURN)]);
        assert_eq!(FrameSafetyRepairer::required_locals(&s).unwrap(), LOCALS_BUFFER);
    }

    #[test]
    fn covers_highest_referenced_slot() {
        let m = method(
            access::STATIC,
            "()V",
            vec![
                Insn::Simple(opcode::LCONST_0),
                Insn::Var { op: opcode::LSTORE, var: 9 },
                Insn::Iinc { var: 3, incr: 1 },
                Insn::Simple(opcode::RETURN),
            ],
        );
        assert_eq!(FrameSafetyRepairer::required_locals(&m).unwrap(), 11 + LOCALS_BUFFER);
    }

    #[test]
    fn repair_only_raises() {
        let mut unit = ClassUnit::new(52, access::PUBLIC, "a/A", Some("java/lang/Object"));
        unit.methods.push(method(access::PUBLIC, "(I)V", vec![Insn::Simple(opcode::RETURN)]));
        unit.methods.push(method(access::STATIC, "()V", vec![Insn::Simple(opcode::RETURN)]));
        unit.methods[1].code.as_mut().unwrap().max_locals = 40;
        assert_eq!(FrameSafetyRepairer::repair(&mut unit).unwrap(), 1);
        assert_eq!(unit.methods[0].code.as_ref().unwrap().max_locals, 7);
        assert_eq!(unit.methods[1].code.as_ref().unwrap().max_locals, 40);
    }

    #[test]
    fn out_of_range_slot_is_reported() {
        let mut unit = ClassUnit::new(52, access::PUBLIC, "a/A", Some("java/lang/Object"));
        unit.methods.push(method(
            access::STATIC,
            "()V",
            vec![Insn::Var { op: opcode::ILOAD, var: u16::MAX }, Insn::Simple(opcode::RETURN)],
        ));
        let err = FrameSafetyRepairer::repair(&mut unit).unwrap_err();
        assert!(matches!(err, TransformError::InvalidMaxLocals { .. }));
    }
}
