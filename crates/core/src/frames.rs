//! Max-stack and stack-map frame recomputation for modified method bodies.
//!
//! The analysis is a per-instruction data-flow pass over the symbolic instruction list. Frames
//! that are still attached to a body (from the decoder) are treated as authoritative at their
//! labels, so only control-flow merges introduced by transforms need a [`CommonSuperResolver`].

use crate::{
    descriptor::{parse_field_descriptor, parse_method_descriptor, JavaType},
    insn::{Code, DeclaredFrame, FrameType, Insn, Label, Loadable},
    opcode,
};
use jarcloak_utils::errors::FrameError;
use std::collections::{BTreeSet, HashMap};

const OBJECT: &str = "java/lang/Object";
const THROWABLE: &str = "java/lang/Throwable";

/// Answers "what is the closest common superclass of these two classes".
pub trait CommonSuperResolver {
    /// Both arguments are internal names of non-array classes.
    fn common_super_class(&self, a: &str, b: &str) -> String;
}

/// A resolver that only knows that every class extends `java/lang/Object`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ObjectSuperResolver;

impl CommonSuperResolver for ObjectSuperResolver {
    fn common_super_class(&self, a: &str, b: &str) -> String {
        if a == b {
            a.to_string()
        } else {
            OBJECT.to_string()
        }
    }
}

/// The method a body belongs to.
#[derive(Debug, Clone, Copy)]
pub struct MethodContext<'a> {
    /// Class declaring the method; the type of `this`.
    pub class_name: &'a str,
    pub name: &'a str,
    pub desc: &'a str,
    /// Decides whether slot 0 holds `this`.
    pub access: u16,
}

impl MethodContext<'_> {
    const fn is_static(&self) -> bool {
        self.access & crate::class_ir::access::STATIC != 0
    }
}

/// A verification type; long and double occupy two slots, the second one `Top`.
#[derive(Debug, Clone, PartialEq, Eq)]
enum VType {
    Top,
    Int,
    Float,
    Long,
    Double,
    Null,
    UninitThis,
    Object(String),
    /// Created by the `new` at this instruction index.
    Uninit(usize),
}

impl VType {
    const fn is_wide(&self) -> bool {
        matches!(self, Self::Long | Self::Double)
    }

    fn of(ty: &JavaType) -> Self {
        match ty {
            JavaType::Boolean | JavaType::Byte | JavaType::Char | JavaType::Short | JavaType::Int => {
                Self::Int
            }
            JavaType::Float => Self::Float,
            JavaType::Long => Self::Long,
            JavaType::Double => Self::Double,
            JavaType::Object(name) | JavaType::Array(name) => Self::Object(name.clone()),
            JavaType::Void => Self::Top,
        }
    }

    fn object(name: &str) -> Self {
        Self::Object(name.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct State {
    locals: Vec<VType>,
    stack: Vec<VType>,
}

fn push_slots(out: &mut Vec<VType>, t: VType) {
    let wide = t.is_wide();
    out.push(t);
    if wide {
        out.push(VType::Top);
    }
}

/// Collapses a slot vector into frame entries (one per value).
fn to_entries(slots: &[VType], labels: &HashMap<usize, Label>) -> Vec<FrameType> {
    let mut out = Vec::with_capacity(slots.len());
    let mut i = 0;
    while i < slots.len() {
        let t = &slots[i];
        out.push(match t {
            VType::Top => FrameType::Top,
            VType::Int => FrameType::Integer,
            VType::Float => FrameType::Float,
            VType::Long => FrameType::Long,
            VType::Double => FrameType::Double,
            VType::Null => FrameType::Null,
            VType::UninitThis => FrameType::UninitializedThis,
            VType::Object(name) => FrameType::Object(name.clone()),
            VType::Uninit(at) => match labels.get(at) {
                Some(label) => FrameType::Uninitialized(*label),
                None => FrameType::Top,
            },
        });
        i += if t.is_wide() { 2 } else { 1 };
    }
    out
}

fn array_dims(desc: &str) -> usize {
    desc.bytes().take_while(|b| *b == b'[').count()
}

fn merge_objects(a: &str, b: &str, resolver: &dyn CommonSuperResolver) -> String {
    if a == b {
        return a.to_string();
    }
    let (da, db) = (array_dims(a), array_dims(b));
    match (da, db) {
        (0, 0) => resolver.common_super_class(a, b),
        (x, y) if x == y => {
            let (ea, eb) = (&a[x..], &b[y..]);
            if ea.starts_with('L') && eb.starts_with('L') {
                let common = resolver
                    .common_super_class(&ea[1..ea.len() - 1], &eb[1..eb.len() - 1]);
                format!("{}L{};", "[".repeat(x), common)
            } else {
                OBJECT.to_string()
            }
        }
        _ => OBJECT.to_string(),
    }
}

/// Merges two values; `None` means the values cannot share a slot.
fn merge_value(a: &VType, b: &VType, resolver: &dyn CommonSuperResolver) -> Option<VType> {
    if a == b {
        return Some(a.clone());
    }
    match (a, b) {
        (VType::Null, VType::Object(_)) => Some(b.clone()),
        (VType::Object(_), VType::Null) => Some(a.clone()),
        (VType::Object(x), VType::Object(y)) => Some(VType::Object(merge_objects(x, y, resolver))),
        _ => None,
    }
}

/// Everything the analysis learned about one body.
struct Analysis {
    states: Vec<Option<State>>,
    max_stack: usize,
    positions: HashMap<Label, usize>,
}

struct HandlerRange {
    start: usize,
    end: usize,
    handler: usize,
    catch_type: String,
}

struct Analyzer<'a> {
    code: &'a Code,
    ctx: &'a MethodContext<'a>,
    resolver: &'a dyn CommonSuperResolver,
    max_locals: usize,
    positions: HashMap<Label, usize>,
    anchors: HashMap<usize, State>,
    ranges: Vec<HandlerRange>,
    states: Vec<Option<State>>,
    work: Vec<usize>,
    max_stack: usize,
}

fn label_positions(insns: &[Insn]) -> HashMap<Label, usize> {
    insns
        .iter()
        .enumerate()
        .filter_map(|(i, insn)| match insn {
            Insn::Label(l) => Some((*l, i)),
            _ => None,
        })
        .collect()
}

impl<'a> Analyzer<'a> {
    fn new(
        code: &'a Code,
        ctx: &'a MethodContext<'a>,
        resolver: &'a dyn CommonSuperResolver,
    ) -> Result<Self, FrameError> {
        let positions = label_positions(&code.insns);
        let mut analyzer = Self {
            code,
            ctx,
            resolver,
            max_locals: code.max_locals as usize,
            positions,
            anchors: HashMap::new(),
            ranges: Vec::new(),
            states: vec![None; code.insns.len()],
            work: Vec::new(),
            max_stack: 0,
        };
        for tc in &code.try_catches {
            analyzer.ranges.push(HandlerRange {
                start: analyzer.position(tc.start)?,
                end: analyzer.position(tc.end)?,
                handler: analyzer.position(tc.handler)?,
                catch_type: tc.catch_type.clone().unwrap_or_else(|| THROWABLE.to_string()),
            });
        }
        for (label, frame) in &code.frames {
            let at = analyzer.position(*label)?;
            let state = analyzer.declared_state(frame, at)?;
            analyzer.anchors.insert(at, state);
        }
        Ok(analyzer)
    }

    fn position(&self, label: Label) -> Result<usize, FrameError> {
        self.positions.get(&label).copied().ok_or(FrameError::UnknownLabel(label.0))
    }

    /// Index of the first real instruction at or after `at`.
    fn next_real(&self, at: usize) -> Option<usize> {
        (at..self.code.insns.len()).find(|i| self.code.insns[*i].is_real())
    }

    fn declared_slots(&self, entries: &[FrameType]) -> Result<Vec<VType>, FrameError> {
        let mut slots = Vec::with_capacity(entries.len());
        for entry in entries {
            let t = match entry {
                FrameType::Top => VType::Top,
                FrameType::Integer => VType::Int,
                FrameType::Float => VType::Float,
                FrameType::Long => VType::Long,
                FrameType::Double => VType::Double,
                FrameType::Null => VType::Null,
                FrameType::UninitializedThis => VType::UninitThis,
                FrameType::Object(name) => VType::Object(name.clone()),
                FrameType::Uninitialized(label) => {
                    let pos = self.position(*label)?;
                    VType::Uninit(self.next_real(pos).ok_or(FrameError::UnknownLabel(label.0))?)
                }
            };
            push_slots(&mut slots, t);
        }
        Ok(slots)
    }

    fn declared_state(&self, frame: &DeclaredFrame, at: usize) -> Result<State, FrameError> {
        let mut locals = self.declared_slots(&frame.locals)?;
        if locals.len() > self.max_locals {
            return Err(FrameError::LocalOutOfRange { index: at, slot: locals.len() - 1 });
        }
        locals.resize(self.max_locals, VType::Top);
        let stack = self.declared_slots(&frame.stack)?;
        Ok(State { locals, stack })
    }

    fn initial_state(&self) -> Result<State, FrameError> {
        let mut locals = Vec::with_capacity(self.max_locals);
        if !self.ctx.is_static() {
            if self.ctx.name == "<init>" && self.ctx.class_name != OBJECT {
                locals.push(VType::UninitThis);
            } else {
                locals.push(VType::object(self.ctx.class_name));
            }
        }
        let desc = parse_method_descriptor(self.ctx.desc)?;
        for param in &desc.params {
            push_slots(&mut locals, VType::of(param));
        }
        if locals.len() > self.max_locals {
            return Err(FrameError::LocalOutOfRange { index: 0, slot: locals.len() - 1 });
        }
        locals.resize(self.max_locals, VType::Top);
        Ok(State { locals, stack: Vec::new() })
    }

    fn run(mut self) -> Result<Analysis, FrameError> {
        if self.code.insns.is_empty() {
            return Err(FrameError::FallsOffEnd);
        }
        let initial = self.initial_state()?;
        self.flow_into(0, initial)?;
        while let Some(i) = self.work.pop() {
            let Some(before) = self.states[i].clone() else { continue };
            self.max_stack = self.max_stack.max(before.stack.len());
            let code = self.code;
            let insn = &code.insns[i];
            if !insn.is_real() {
                self.fall_through(i, before)?;
                continue;
            }
            self.flow_to_handlers(i, &before.locals)?;
            let mut after = before;
            self.execute(insn, i, &mut after)?;
            self.max_stack = self.max_stack.max(after.stack.len());
            if matches!(insn, Insn::Iinc { .. })
                || matches!(insn, Insn::Var { op, .. } if opcode::is_store(*op))
            {
                let locals = after.locals.clone();
                self.flow_to_handlers(i, &locals)?;
            }
            for target in insn.targets() {
                let at = self.position(target)?;
                self.flow_into(at, after.clone())?;
            }
            let op = insn.opcode().unwrap_or(opcode::NOP);
            if !opcode::ends_flow(op) {
                self.fall_through(i, after)?;
            }
        }
        Ok(Analysis { states: self.states, max_stack: self.max_stack, positions: self.positions })
    }

    fn fall_through(&mut self, i: usize, state: State) -> Result<(), FrameError> {
        if i + 1 >= self.code.insns.len() {
            return Err(FrameError::FallsOffEnd);
        }
        self.flow_into(i + 1, state)
    }

    fn flow_to_handlers(&mut self, i: usize, locals: &[VType]) -> Result<(), FrameError> {
        let targets: Vec<(usize, String)> = self
            .ranges
            .iter()
            .filter(|r| r.start <= i && i < r.end)
            .map(|r| (r.handler, r.catch_type.clone()))
            .collect();
        for (handler, catch_type) in targets {
            let state = State { locals: locals.to_vec(), stack: vec![VType::Object(catch_type)] };
            self.flow_into(handler, state)?;
        }
        Ok(())
    }

    fn flow_into(&mut self, at: usize, incoming: State) -> Result<(), FrameError> {
        if let Some(anchor) = self.anchors.get(&at) {
            if anchor.stack.len() != incoming.stack.len() {
                return Err(FrameError::StackHeightMismatch {
                    index: at,
                    expected: anchor.stack.len(),
                    found: incoming.stack.len(),
                });
            }
            if self.states[at].is_none() {
                self.states[at] = Some(anchor.clone());
                self.work.push(at);
            }
            return Ok(());
        }
        let Some(existing) = &self.states[at] else {
            self.states[at] = Some(incoming);
            self.work.push(at);
            return Ok(());
        };
        if existing.stack.len() != incoming.stack.len() {
            return Err(FrameError::StackHeightMismatch {
                index: at,
                expected: existing.stack.len(),
                found: incoming.stack.len(),
            });
        }
        let mut merged = existing.clone();
        for (slot, value) in merged.locals.iter_mut().zip(&incoming.locals) {
            *slot = merge_value(slot, value, self.resolver).unwrap_or(VType::Top);
        }
        for (slot, value) in merged.stack.iter_mut().zip(&incoming.stack) {
            *slot = merge_value(slot, value, self.resolver).ok_or(FrameError::IncompatibleStack(at))?;
        }
        if &merged != existing {
            self.states[at] = Some(merged);
            self.work.push(at);
        }
        Ok(())
    }

    fn execute(&self, insn: &Insn, i: usize, s: &mut State) -> Result<(), FrameError> {
        let mut f = Exec { s, i, max_locals: self.max_locals };
        match insn {
            Insn::Label(_) | Insn::Line(_) => {}
            Insn::Simple(op) => f.simple(*op)?,
            Insn::Int { op, operand } => {
                if *op == opcode::NEWARRAY {
                    f.pop(1)?;
                    let elem = match *operand {
                        4 => 'Z',
                        5 => 'C',
                        6 => 'F',
                        7 => 'D',
                        8 => 'B',
                        9 => 'S',
                        10 => 'I',
                        _ => 'J',
                    };
                    f.push(VType::Object(format!("[{elem}")));
                } else {
                    f.push(VType::Int);
                }
            }
            Insn::Var { op, var } => {
                let var = *var as usize;
                match *op {
                    opcode::ILOAD => f.load_checked(var, VType::Int)?,
                    opcode::LLOAD => f.load_checked(var, VType::Long)?,
                    opcode::FLOAD => f.load_checked(var, VType::Float)?,
                    opcode::DLOAD => f.load_checked(var, VType::Double)?,
                    opcode::ALOAD => {
                        let value = f.local(var)?;
                        f.push(value);
                    }
                    opcode::RET => return Err(FrameError::Unsupported("ret")),
                    _ => {
                        let value = f.pop_value()?;
                        f.store(var, value)?;
                    }
                }
            }
            Insn::Iinc { var, .. } => f.store(*var as usize, VType::Int)?,
            Insn::Type { op, class } => match *op {
                opcode::NEW => f.push(VType::Uninit(i)),
                opcode::ANEWARRAY => {
                    f.pop(1)?;
                    let array = if class.starts_with('[') {
                        format!("[{class}")
                    } else {
                        format!("[L{class};")
                    };
                    f.push(VType::Object(array));
                }
                opcode::CHECKCAST => {
                    f.pop(1)?;
                    f.push(VType::object(class));
                }
                _ => {
                    f.pop(1)?;
                    f.push(VType::Int);
                }
            },
            Insn::Field { op, desc, .. } => {
                let ty = VType::of(&parse_field_descriptor(desc)?);
                let size = if ty.is_wide() { 2 } else { 1 };
                match *op {
                    opcode::GETSTATIC => f.push(ty),
                    opcode::PUTSTATIC => f.pop(size)?,
                    opcode::GETFIELD => {
                        f.pop(1)?;
                        f.push(ty);
                    }
                    _ => f.pop(size + 1)?,
                }
            }
            Insn::Method { op, name, desc, .. } => {
                let parsed = parse_method_descriptor(desc)?;
                f.pop(parsed.param_slots())?;
                if *op != opcode::INVOKESTATIC {
                    let receiver = f.pop_value()?;
                    if *op == opcode::INVOKESPECIAL && name == "<init>" {
                        let initialized = match &receiver {
                            VType::UninitThis => Some(self.ctx.class_name.to_string()),
                            VType::Uninit(at) => match self.code.insns.get(*at) {
                                Some(Insn::Type { class, .. }) => Some(class.clone()),
                                _ => None,
                            },
                            _ => None,
                        };
                        if let Some(class) = initialized {
                            f.initialize(&receiver, &class);
                        }
                    }
                }
                if parsed.ret != JavaType::Void {
                    f.push(VType::of(&parsed.ret));
                }
            }
            Insn::InvokeDynamic { desc, .. } => {
                let parsed = parse_method_descriptor(desc)?;
                f.pop(parsed.param_slots())?;
                if parsed.ret != JavaType::Void {
                    f.push(VType::of(&parsed.ret));
                }
            }
            Insn::Jump { op, .. } => match *op {
                opcode::GOTO => {}
                opcode::JSR => return Err(FrameError::Unsupported("jsr")),
                opcode::IF_ICMPEQ..=opcode::IF_ACMPNE => f.pop(2)?,
                _ => f.pop(1)?,
            },
            Insn::Ldc(value) => f.push(match value {
                Loadable::Int(_) => VType::Int,
                Loadable::Float(_) => VType::Float,
                Loadable::Long(_) => VType::Long,
                Loadable::Double(_) => VType::Double,
                Loadable::String(_) => VType::object("java/lang/String"),
                Loadable::Class(_) => VType::object("java/lang/Class"),
                Loadable::MethodType(_) => VType::object("java/lang/invoke/MethodType"),
                Loadable::MethodHandle(_) => VType::object("java/lang/invoke/MethodHandle"),
                Loadable::Dynamic(d) => VType::of(&parse_field_descriptor(&d.desc)?),
            }),
            Insn::TableSwitch { .. } | Insn::LookupSwitch { .. } => f.pop(1)?,
            Insn::MultiANewArray { desc, dims } => {
                f.pop(*dims as usize)?;
                f.push(VType::object(desc));
            }
        }
        Ok(())
    }
}

/// Applies one instruction to a state.
struct Exec<'s> {
    s: &'s mut State,
    i: usize,
    max_locals: usize,
}

impl Exec<'_> {
    fn push(&mut self, t: VType) {
        push_slots(&mut self.s.stack, t);
    }

    fn pop(&mut self, slots: usize) -> Result<(), FrameError> {
        if self.s.stack.len() < slots {
            return Err(FrameError::StackUnderflow(self.i));
        }
        let keep = self.s.stack.len() - slots;
        self.s.stack.truncate(keep);
        Ok(())
    }

    /// Pops one value, both slots for long and double.
    fn pop_value(&mut self) -> Result<VType, FrameError> {
        let top = self.s.stack.pop().ok_or(FrameError::StackUnderflow(self.i))?;
        if top == VType::Top {
            if let Some(below) = self.s.stack.last() {
                if below.is_wide() {
                    return self.s.stack.pop().ok_or(FrameError::StackUnderflow(self.i));
                }
            }
        }
        Ok(top)
    }

    /// Removes the top `n` slots and returns them bottom-first.
    fn take(&mut self, n: usize) -> Result<Vec<VType>, FrameError> {
        if self.s.stack.len() < n {
            return Err(FrameError::StackUnderflow(self.i));
        }
        let at = self.s.stack.len() - n;
        Ok(self.s.stack.split_off(at))
    }

    fn local(&self, var: usize) -> Result<VType, FrameError> {
        self.s
            .locals
            .get(var)
            .cloned()
            .ok_or(FrameError::LocalOutOfRange { index: self.i, slot: var })
    }

    fn load_checked(&mut self, var: usize, t: VType) -> Result<(), FrameError> {
        let width = if t.is_wide() { 2 } else { 1 };
        if var + width > self.max_locals {
            return Err(FrameError::LocalOutOfRange { index: self.i, slot: var });
        }
        self.push(t);
        Ok(())
    }

    fn store(&mut self, var: usize, t: VType) -> Result<(), FrameError> {
        let width = if t.is_wide() { 2 } else { 1 };
        if var + width > self.max_locals {
            return Err(FrameError::LocalOutOfRange { index: self.i, slot: var });
        }
        if var > 0 && self.s.locals[var - 1].is_wide() {
            self.s.locals[var - 1] = VType::Top;
        }
        if width == 2 {
            self.s.locals[var + 1] = VType::Top;
        } else if self.s.locals[var].is_wide() && var + 1 < self.max_locals {
            self.s.locals[var + 1] = VType::Top;
        }
        self.s.locals[var] = t;
        Ok(())
    }

    fn initialize(&mut self, uninit: &VType, class: &str) {
        for slot in self.s.locals.iter_mut().chain(self.s.stack.iter_mut()) {
            if slot == uninit {
                *slot = VType::object(class);
            }
        }
    }

    fn simple(&mut self, op: u8) -> Result<(), FrameError> {
        use opcode::*;
        match op {
            NOP => {}
            ACONST_NULL => self.push(VType::Null),
            ICONST_M1..=ICONST_5 => self.push(VType::Int),
            LCONST_0 | LCONST_1 => self.push(VType::Long),
            FCONST_0..=FCONST_2 => self.push(VType::Float),
            DCONST_0 | DCONST_1 => self.push(VType::Double),
            IALOAD | BALOAD | CALOAD | SALOAD => {
                self.pop(2)?;
                self.push(VType::Int);
            }
            LALOAD => {
                self.pop(2)?;
                self.push(VType::Long);
            }
            FALOAD => {
                self.pop(2)?;
                self.push(VType::Float);
            }
            DALOAD => {
                self.pop(2)?;
                self.push(VType::Double);
            }
            AALOAD => {
                self.pop(1)?;
                let array = self.pop_value()?;
                self.push(match array {
                    VType::Object(desc) if desc.starts_with('[') => {
                        let elem = &desc[1..];
                        match elem.strip_prefix('L').and_then(|e| e.strip_suffix(';')) {
                            Some(name) => VType::object(name),
                            None => VType::object(elem),
                        }
                    }
                    VType::Null => VType::Null,
                    _ => VType::object(OBJECT),
                });
            }
            IASTORE | FASTORE | AASTORE | BASTORE | CASTORE | SASTORE => self.pop(3)?,
            LASTORE | DASTORE => self.pop(4)?,
            POP => self.pop(1)?,
            POP2 => self.pop(2)?,
            DUP => {
                let v = self.take(1)?;
                self.s.stack.extend(v.clone());
                self.s.stack.extend(v);
            }
            DUP_X1 => self.dup_under(1, 1)?,
            DUP_X2 => self.dup_under(1, 2)?,
            DUP2 => {
                let v = self.take(2)?;
                self.s.stack.extend(v.clone());
                self.s.stack.extend(v);
            }
            DUP2_X1 => self.dup_under(2, 1)?,
            DUP2_X2 => self.dup_under(2, 2)?,
            SWAP => {
                let v = self.take(2)?;
                self.s.stack.push(v[1].clone());
                self.s.stack.push(v[0].clone());
            }
            IADD..=DNEG => {
                let (ty, operands) = match (op - IADD) % 4 {
                    0 => (VType::Int, 2),
                    1 => (VType::Long, 4),
                    2 => (VType::Float, 2),
                    _ => (VType::Double, 4),
                };
                self.pop(if op >= INEG { operands / 2 } else { operands })?;
                self.push(ty);
            }
            ISHL..=LUSHR => {
                if (op - ISHL) % 2 == 0 {
                    self.pop(2)?;
                    self.push(VType::Int);
                } else {
                    self.pop(3)?;
                    self.push(VType::Long);
                }
            }
            IAND..=LXOR => {
                if (op - IAND) % 2 == 0 {
                    self.pop(2)?;
                    self.push(VType::Int);
                } else {
                    self.pop(4)?;
                    self.push(VType::Long);
                }
            }
            I2L..=I2S => {
                let (from, to) = match op {
                    I2L => (1, VType::Long),
                    I2F => (1, VType::Float),
                    I2D => (1, VType::Double),
                    L2I => (2, VType::Int),
                    L2F => (2, VType::Float),
                    L2D => (2, VType::Double),
                    F2I => (1, VType::Int),
                    F2L => (1, VType::Long),
                    F2D => (1, VType::Double),
                    D2I => (2, VType::Int),
                    D2L => (2, VType::Long),
                    D2F => (2, VType::Float),
                    _ => (1, VType::Int),
                };
                self.pop(from)?;
                self.push(to);
            }
            LCMP | DCMPL | DCMPG => {
                self.pop(4)?;
                self.push(VType::Int);
            }
            FCMPL | FCMPG => {
                self.pop(2)?;
                self.push(VType::Int);
            }
            IRETURN | FRETURN | ARETURN | ATHROW | ARRAYLENGTH => {
                self.pop(1)?;
                if op == ARRAYLENGTH {
                    self.push(VType::Int);
                }
            }
            LRETURN | DRETURN => self.pop(2)?,
            MONITORENTER | MONITOREXIT => self.pop(1)?,
            RETURN => {}
            _ => return Err(FrameError::Unsupported(opcode::mnemonic(op))),
        }
        Ok(())
    }

    /// Copies the top `n` slots below the `depth` slots underneath them.
    fn dup_under(&mut self, n: usize, depth: usize) -> Result<(), FrameError> {
        let top = self.take(n)?;
        let under = self.take(depth)?;
        self.s.stack.extend(top.iter().cloned());
        self.s.stack.extend(under);
        self.s.stack.extend(top);
        Ok(())
    }
}

/// Per-instruction operand-stack heights (in slots) before each instruction, `None` for
/// unreachable positions.
pub fn stack_heights(
    code: &Code,
    ctx: &MethodContext<'_>,
    resolver: &dyn CommonSuperResolver,
) -> Result<Vec<Option<usize>>, FrameError> {
    let analysis = Analyzer::new(code, ctx, resolver)?.run()?;
    Ok(analysis.states.iter().map(|s| s.as_ref().map(|s| s.stack.len())).collect())
}

/// Recomputes max-stack and the stack-map frames of a modified body.
///
/// Unreachable instructions are removed, handler ranges that no longer cover reachable code are
/// dropped, and a label is placed before every `new` whose result appears in a frame.
pub fn recompute(
    code: &mut Code,
    ctx: &MethodContext<'_>,
    resolver: &dyn CommonSuperResolver,
) -> Result<(), FrameError> {
    let analysis = Analyzer::new(code, ctx, resolver)?.run()?;
    let reached = |i: usize| analysis.states[i].is_some();
    let pos = |l: Label| analysis.positions.get(&l).copied().ok_or(FrameError::UnknownLabel(l.0));

    let mut kept_try_catches = Vec::with_capacity(code.try_catches.len());
    for tc in &code.try_catches {
        let (start, end, handler) = (pos(tc.start)?, pos(tc.end)?, pos(tc.handler)?);
        let covers_code = (start..end).any(|i| code.insns[i].is_real() && reached(i));
        if covers_code && reached(handler) {
            kept_try_catches.push(tc.clone());
        }
    }

    let mut frame_positions: BTreeSet<usize> = BTreeSet::new();
    for (i, insn) in code.insns.iter().enumerate() {
        if insn.is_real() && reached(i) {
            for target in insn.targets() {
                frame_positions.insert(pos(target)?);
            }
        }
    }
    for tc in &kept_try_catches {
        frame_positions.insert(pos(tc.handler)?);
    }

    // Labels for `new` instructions referenced by uninitialized entries.
    let mut new_labels: HashMap<usize, Label> = HashMap::new();
    for at in &frame_positions {
        let Some(state) = &analysis.states[*at] else { continue };
        for t in state.locals.iter().chain(&state.stack) {
            if let VType::Uninit(new_at) = t {
                if new_labels.contains_key(new_at) {
                    continue;
                }
                let existing = code.insns[..*new_at]
                    .iter()
                    .rev()
                    .take_while(|insn| !insn.is_real())
                    .find_map(|insn| match insn {
                        Insn::Label(l) => Some(*l),
                        _ => None,
                    });
                let label = match existing {
                    Some(l) => l,
                    None => code.new_label(),
                };
                new_labels.insert(*new_at, label);
            }
        }
    }

    let mut frames = Vec::with_capacity(frame_positions.len());
    for at in &frame_positions {
        let (Insn::Label(label), Some(state)) = (&code.insns[*at], &analysis.states[*at]) else {
            continue;
        };
        let mut locals = to_entries(&state.locals, &new_labels);
        while locals.last() == Some(&FrameType::Top) {
            locals.pop();
        }
        frames.push((*label, DeclaredFrame { locals, stack: to_entries(&state.stack, &new_labels) }));
    }

    let old = std::mem::take(&mut code.insns);
    let mut insns = Vec::with_capacity(old.len() + new_labels.len());
    for (i, insn) in old.into_iter().enumerate() {
        if !matches!(insn, Insn::Label(_)) && !reached(i) {
            continue;
        }
        if let Some(label) = new_labels.get(&i) {
            if !matches!(code_label_before(&insns), Some(l) if l == *label) {
                insns.push(Insn::Label(*label));
            }
        }
        insns.push(insn);
    }
    code.insns = insns;
    code.try_catches = kept_try_catches;
    code.frames = frames;
    code.max_stack = Some(analysis.max_stack.min(u16::MAX as usize) as u16);
    Ok(())
}

/// The label directly in front of the next instruction, skipping line markers.
fn code_label_before(insns: &[Insn]) -> Option<Label> {
    insns.iter().rev().take_while(|i| !i.is_real()).find_map(|i| match i {
        Insn::Label(l) => Some(*l),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::insn::TryCatch;
    use opcode::*;

    fn ctx<'a>(name: &'a str, desc: &'a str, access: u16) -> MethodContext<'a> {
        MethodContext { class_name: "demo/Main", name, desc, access }
    }

    #[test]
    fn straight_line_max_stack() {
        let mut code = Code::new(1);
        code.insns = vec![
            Insn::Simple(LCONST_1),
            Insn::Simple(LCONST_1),
            Insn::Simple(LADD),
            Insn::Simple(L2I),
            Insn::Simple(IRETURN),
        ];
        let c = ctx("f", "()I", crate::class_ir::access::STATIC);
        recompute(&mut code, &c, &ObjectSuperResolver).unwrap();
        assert_eq!(code.max_stack, Some(4));
        assert!(code.frames.is_empty());
    }

    #[test]
    fn dup_forms_copy_the_top_values() {
        let mut code = Code::new(0);
        code.insns = vec![
            Insn::Simple(ICONST_1),
            Insn::Simple(ICONST_2),
            Insn::Simple(DUP2),
            Insn::Simple(IADD),
            Insn::Simple(IADD),
            Insn::Simple(IADD),
            Insn::Simple(DUP),
            Insn::Simple(IMUL),
            Insn::Simple(IRETURN),
        ];
        let c = ctx("f", "()I", crate::class_ir::access::STATIC);
        let heights = stack_heights(&code, &c, &ObjectSuperResolver).unwrap();
        assert_eq!(heights[3], Some(4));
        assert_eq!(heights[7], Some(2));
        assert_eq!(heights[8], Some(1));
        recompute(&mut code, &c, &ObjectSuperResolver).unwrap();
        assert_eq!(code.max_stack, Some(4));
    }

    #[test]
    fn branch_targets_get_frames() {
        let mut code = Code::new(2);
        let skip = code.new_label();
        code.insns = vec![
            Insn::Var { op: ILOAD, var: 1 },
            Insn::Jump { op: IFEQ, target: skip },
            Insn::Simple(ICONST_1),
            Insn::Var { op: ISTORE, var: 1 },
            Insn::Label(skip),
            Insn::Simple(RETURN),
        ];
        let c = ctx("f", "(I)V", 0);
        recompute(&mut code, &c, &ObjectSuperResolver).unwrap();
        assert_eq!(code.frames.len(), 1);
        let (label, frame) = &code.frames[0];
        assert_eq!(*label, skip);
        assert_eq!(frame.locals, vec![FrameType::Object("demo/Main".into()), FrameType::Integer]);
        assert!(frame.stack.is_empty());
    }

    #[test]
    fn unreachable_code_is_removed() {
        let mut code = Code::new(0);
        let end = code.new_label();
        code.insns = vec![
            Insn::Jump { op: GOTO, target: end },
            Insn::Simple(NOP),
            Insn::Simple(ATHROW),
            Insn::Label(end),
            Insn::Simple(RETURN),
        ];
        let c = ctx("f", "()V", crate::class_ir::access::STATIC);
        recompute(&mut code, &c, &ObjectSuperResolver).unwrap();
        assert_eq!(code.instruction_count(), 2);
    }

    #[test]
    fn constructor_call_initializes_new_object() {
        let mut code = Code::new(1);
        let target = code.new_label();
        code.insns = vec![
            Insn::Type { op: NEW, class: "demo/Thing".into() },
            Insn::Simple(DUP),
            Insn::Simple(ICONST_0),
            Insn::Jump { op: IFEQ, target },
            Insn::Label(target),
            Insn::Method {
                op: INVOKESPECIAL,
                owner: "demo/Thing".into(),
                name: "<init>".into(),
                desc: "()V".into(),
                interface: false,
            },
            Insn::Var { op: ASTORE, var: 0 },
            Insn::Simple(RETURN),
        ];
        let c = ctx("f", "()V", crate::class_ir::access::STATIC);
        recompute(&mut code, &c, &ObjectSuperResolver).unwrap();
        let new_label = match &code.insns[0] {
            Insn::Label(l) => *l,
            other => panic!("expected label before new, got {other:?}"),
        };
        let (_, frame) = &code.frames[0];
        assert_eq!(
            frame.stack,
            vec![FrameType::Uninitialized(new_label), FrameType::Uninitialized(new_label)]
        );
    }

    #[test]
    fn handler_sees_catch_type() {
        let mut code = Code::new(1);
        let (start, end, handler) = (code.new_label(), code.new_label(), code.new_label());
        code.insns = vec![
            Insn::Label(start),
            Insn::Simple(ICONST_1),
            Insn::Var { op: ISTORE, var: 0 },
            Insn::Label(end),
            Insn::Simple(RETURN),
            Insn::Label(handler),
            Insn::Var { op: ASTORE, var: 0 },
            Insn::Simple(RETURN),
        ];
        code.try_catches.push(TryCatch {
            start,
            end,
            handler,
            catch_type: Some("java/lang/Exception".into()),
        });
        let c = ctx("f", "()V", crate::class_ir::access::STATIC);
        recompute(&mut code, &c, &ObjectSuperResolver).unwrap();
        assert_eq!(code.frames.len(), 1);
        assert_eq!(code.frames[0].1.stack, vec![FrameType::Object("java/lang/Exception".into())]);
        assert!(code.frames[0].1.locals.is_empty());
    }

    #[test]
    fn mismatched_heights_fail() {
        let mut code = Code::new(0);
        let join = code.new_label();
        code.insns = vec![
            Insn::Simple(ICONST_0),
            Insn::Jump { op: IFEQ, target: join },
            Insn::Simple(ICONST_1),
            Insn::Label(join),
            Insn::Simple(RETURN),
        ];
        let c = ctx("f", "()V", crate::class_ir::access::STATIC);
        let err = recompute(&mut code, &c, &ObjectSuperResolver).unwrap_err();
        assert!(matches!(err, FrameError::StackHeightMismatch { .. }));
    }

    #[test]
    fn merged_arrays_keep_dimensions() {
        struct Fixed;
        impl CommonSuperResolver for Fixed {
            fn common_super_class(&self, _: &str, _: &str) -> String {
                "demo/Base".into()
            }
        }
        assert_eq!(merge_objects("[Ldemo/A;", "[Ldemo/B;", &Fixed), "[Ldemo/Base;");
        assert_eq!(merge_objects("[I", "[F", &Fixed), OBJECT);
        assert_eq!(merge_objects("demo/A", "[I", &Fixed), OBJECT);
    }

    #[test]
    fn jsr_is_rejected() {
        let mut code = Code::new(0);
        let sub = code.new_label();
        code.insns = vec![Insn::Jump { op: JSR, target: sub }, Insn::Simple(RETURN), Insn::Label(sub), Insn::Simple(RETURN)];
        let c = ctx("f", "()V", crate::class_ir::access::STATIC);
        assert!(matches!(
            recompute(&mut code, &c, &ObjectSuperResolver),
            Err(FrameError::Unsupported("jsr"))
        ));
    }
}
