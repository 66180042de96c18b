//! Symbolic method bodies.
//!
//! A [`Code`] holds an ordered instruction list in which every branch target, exception range
//! boundary and debug-table position is a [`Label`] pseudo-instruction rather than a byte
//! offset. Offsets only exist again once the encoder lays the list out.

use crate::opcode;
use std::fmt;

/// A position in an instruction list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label(pub u32);

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// `REF_*` kinds of a method handle.
pub mod handle_kind {
    pub const GET_FIELD: u8 = 1;
    pub const GET_STATIC: u8 = 2;
    pub const PUT_FIELD: u8 = 3;
    pub const PUT_STATIC: u8 = 4;
    pub const INVOKE_VIRTUAL: u8 = 5;
    pub const INVOKE_STATIC: u8 = 6;
    pub const INVOKE_SPECIAL: u8 = 7;
    pub const NEW_INVOKE_SPECIAL: u8 = 8;
    pub const INVOKE_INTERFACE: u8 = 9;
}

/// A `CONSTANT_MethodHandle`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Handle {
    /// `REF_*` kind, 1 to 9.
    pub kind: u8,
    pub owner: String,
    pub name: String,
    pub desc: String,
    /// The owner is an interface.
    pub is_interface: bool,
}

impl Handle {
    /// True if the handle refers to a field rather than a method.
    pub const fn is_field(&self) -> bool {
        self.kind <= handle_kind::PUT_STATIC
    }
}

/// A dynamically-computed constant (`CONSTANT_Dynamic`).
#[derive(Debug, Clone, PartialEq)]
pub struct ConstantDynamic {
    pub name: String,
    pub desc: String,
    /// Bootstrap method.
    pub bsm: Handle,
    /// Static bootstrap arguments.
    pub args: Vec<Loadable>,
}

/// Any value an `ldc` or a bootstrap argument can load.
#[derive(Debug, Clone, PartialEq)]
pub enum Loadable {
    Int(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    String(String),
    /// Internal name or array descriptor.
    Class(String),
    MethodType(String),
    MethodHandle(Handle),
    Dynamic(Box<ConstantDynamic>),
}

impl Loadable {
    /// True for values that need `ldc2_w` (two stack slots).
    pub fn is_wide(&self) -> bool {
        match self {
            Self::Long(_) | Self::Double(_) => true,
            Self::Dynamic(d) => d.desc == "J" || d.desc == "D",
            _ => false,
        }
    }
}

/// One entry of an instruction list.
#[derive(Debug, Clone, PartialEq)]
pub enum Insn {
    /// A position marker; emits no bytes.
    Label(Label),
    /// Source line of the instructions that follow; emits no bytes.
    Line(u16),
    /// Any instruction without operands.
    Simple(u8),
    /// `bipush`, `sipush`, `newarray`.
    Int { op: u8, operand: i32 },
    /// Loads, stores and `ret`, always in explicit form.
    Var { op: u8, var: u16 },
    Iinc { var: u16, incr: i16 },
    /// `new`, `anewarray`, `checkcast`, `instanceof`.
    Type { op: u8, class: String },
    Field { op: u8, owner: String, name: String, desc: String },
    Method { op: u8, owner: String, name: String, desc: String, interface: bool },
    InvokeDynamic { name: String, desc: String, bsm: Handle, args: Vec<Loadable> },
    Jump { op: u8, target: Label },
    Ldc(Loadable),
    TableSwitch { low: i32, high: i32, default: Label, targets: Vec<Label> },
    LookupSwitch { default: Label, pairs: Vec<(i32, Label)> },
    MultiANewArray { desc: String, dims: u8 },
}

impl Insn {
    /// False for the `Label` and `Line` pseudo-instructions.
    pub const fn is_real(&self) -> bool {
        !matches!(self, Self::Label(_) | Self::Line(_))
    }

    /// The opcode this instruction encodes to (`ldc` family collapses to `LDC`).
    pub const fn opcode(&self) -> Option<u8> {
        Some(match self {
            Self::Label(_) | Self::Line(_) => return None,
            Self::Simple(op)
            | Self::Int { op, .. }
            | Self::Var { op, .. }
            | Self::Type { op, .. }
            | Self::Field { op, .. }
            | Self::Method { op, .. }
            | Self::Jump { op, .. } => *op,
            Self::Iinc { .. } => opcode::IINC,
            Self::InvokeDynamic { .. } => opcode::INVOKEDYNAMIC,
            Self::Ldc(_) => opcode::LDC,
            Self::TableSwitch { .. } => opcode::TABLESWITCH,
            Self::LookupSwitch { .. } => opcode::LOOKUPSWITCH,
            Self::MultiANewArray { .. } => opcode::MULTIANEWARRAY,
        })
    }

    /// All labels this instruction may transfer control to.
    pub fn targets(&self) -> Vec<Label> {
        match self {
            Self::Jump { target, .. } => vec![*target],
            Self::TableSwitch { default, targets, .. } => {
                let mut all = vec![*default];
                all.extend(targets.iter().copied());
                all
            }
            Self::LookupSwitch { default, pairs } => {
                let mut all = vec![*default];
                all.extend(pairs.iter().map(|(_, l)| *l));
                all
            }
            _ => Vec::new(),
        }
    }
}

/// One `exception_table` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TryCatch {
    pub start: Label,
    pub end: Label,
    pub handler: Label,
    /// `None` catches everything (`finally`).
    pub catch_type: Option<String>,
}

/// One local-variable debug entry, merged from `LocalVariableTable` and
/// `LocalVariableTypeTable`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalVar {
    pub name: String,
    pub desc: String,
    pub signature: Option<String>,
    pub start: Label,
    pub end: Label,
    /// Local slot.
    pub index: u16,
}

/// A verification type as written in a `StackMapTable`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FrameType {
    Top,
    Integer,
    Float,
    Long,
    Double,
    Null,
    UninitializedThis,
    /// Internal name or array descriptor.
    Object(String),
    /// The object created by the `new` right after this label.
    Uninitialized(Label),
}

/// A fully expanded stack-map frame. Long and double values are single entries.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeclaredFrame {
    pub locals: Vec<FrameType>,
    pub stack: Vec<FrameType>,
}

/// The body of a non-abstract, non-native method.
#[derive(Debug, Clone, PartialEq)]
pub struct Code {
    /// Declared max-stack; `None` marks the body as modified, so the encoder recomputes
    /// max-stack and frames for it.
    pub max_stack: Option<u16>,
    pub max_locals: u16,
    /// Instructions in code order, with labels as branch targets.
    pub insns: Vec<Insn>,
    pub try_catches: Vec<TryCatch>,
    pub local_vars: Vec<LocalVar>,
    /// Stack-map frames, anchored at labels.
    pub frames: Vec<(Label, DeclaredFrame)>,
    /// Next free label id.
    pub next_label: u32,
}

impl Code {
    /// An empty, modified body.
    pub const fn new(max_locals: u16) -> Self {
        Self {
            max_stack: None,
            max_locals,
            insns: Vec::new(),
            try_catches: Vec::new(),
            local_vars: Vec::new(),
            frames: Vec::new(),
            next_label: 0,
        }
    }

    /// Allocates a label that is unique within this body.
    pub fn new_label(&mut self) -> Label {
        let label = Label(self.next_label);
        self.next_label += 1;
        label
    }

    /// Number of real (byte-emitting) instructions.
    pub fn instruction_count(&self) -> usize {
        self.insns.iter().filter(|i| i.is_real()).count()
    }

    /// Marks the body as modified so max-stack and frames get recomputed.
    pub fn invalidate(&mut self) {
        self.max_stack = None;
    }

    /// Upper bound of the encoded code length, assuming wide constant indices and short
    /// branches.
    pub fn estimated_size(&self) -> usize {
        let mut size = 0usize;
        for insn in &self.insns {
            size += match insn {
                Insn::Label(_) | Insn::Line(_) => 0,
                Insn::Simple(_) => 1,
                Insn::Int { op, .. } => {
                    if *op == opcode::SIPUSH {
                        3
                    } else {
                        2
                    }
                }
                Insn::Var { var, .. } => {
                    if *var > 255 {
                        4
                    } else {
                        2
                    }
                }
                Insn::Iinc { .. } => 6,
                Insn::Type { .. } | Insn::Field { .. } | Insn::Ldc(_) | Insn::Jump { .. } => 3,
                Insn::Method { op, .. } => {
                    if *op == opcode::INVOKEINTERFACE {
                        5
                    } else {
                        3
                    }
                }
                Insn::InvokeDynamic { .. } => 5,
                Insn::MultiANewArray { .. } => 4,
                Insn::TableSwitch { targets, .. } => 16 + 4 * targets.len(),
                Insn::LookupSwitch { pairs, .. } => 12 + 8 * pairs.len(),
            };
        }
        size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_are_unique_per_body() {
        let mut code = Code::new(1);
        let a = code.new_label();
        let b = code.new_label();
        assert_ne!(a, b);
        assert_eq!(code.next_label, 2);
    }

    #[test]
    fn pseudo_instructions_are_not_real() {
        assert!(!Insn::Label(Label(0)).is_real());
        assert!(!Insn::Line(3).is_real());
        assert!(Insn::Simple(opcode::NOP).is_real());
        assert_eq!(Insn::Ldc(Loadable::Int(5)).opcode(), Some(opcode::LDC));
        assert!(Loadable::Double(1.0).is_wide());
        assert!(!Loadable::String("x".into()).is_wide());
    }

    #[test]
    fn switch_targets_include_default() {
        let sw = Insn::LookupSwitch {
            default: Label(9),
            pairs: vec![(1, Label(2)), (5, Label(3))],
        };
        assert_eq!(sw.targets(), vec![Label(9), Label(2), Label(3)]);
        assert_eq!(Code::new(0).estimated_size(), 0);
    }
}
