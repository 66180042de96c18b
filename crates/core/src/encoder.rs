//! Serializes a [`ClassUnit`] back into class-file bytes.
//!
//! The constant pool is rebuilt from scratch. Method bodies are laid out from their labels;
//! branches that do not fit a 16-bit offset are widened until the layout is stable. Bodies
//! marked as modified get their max-stack and frames recomputed first.

use crate::{
    class_ir::{Annotation, Annotations, ClassUnit, ElementValue, FieldUnit, MethodUnit, TypeAnnotation},
    constant_pool::PoolBuilder,
    decoder::{initial_frame_locals, MAGIC},
    descriptor::parse_method_descriptor,
    frames::{self, CommonSuperResolver, MethodContext},
    insn::{Code, DeclaredFrame, FrameType, Insn, Label, Loadable},
    opcode,
};
use jarcloak_utils::errors::EncodeError;
use std::{
    borrow::Cow,
    collections::{BTreeMap, HashMap, HashSet},
};

/// Largest code array a method may have.
pub const MAX_CODE_SIZE: usize = 65535;

/// First class-file version that carries `StackMapTable` attributes.
const STACK_MAP_VERSION: u16 = 50;

fn put_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_be_bytes());
}

fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_be_bytes());
}

fn checked_u16(what: &'static str, value: usize) -> Result<u16, EncodeError> {
    u16::try_from(value).map_err(|_| EncodeError::OutOfRange { what, value: value as i64 })
}

/// Attribute bodies of one class, field, method or code attribute.
#[derive(Default)]
struct Attributes {
    entries: Vec<(u16, Vec<u8>)>,
}

impl Attributes {
    fn add(&mut self, pool: &mut PoolBuilder, name: &str, body: Vec<u8>) -> Result<(), EncodeError> {
        let name = pool.utf8(name)?;
        self.entries.push((name, body));
        Ok(())
    }

    fn add_index(&mut self, pool: &mut PoolBuilder, name: &str, index: u16) -> Result<(), EncodeError> {
        self.add(pool, name, index.to_be_bytes().to_vec())
    }

    fn write(&self, out: &mut Vec<u8>) -> Result<(), EncodeError> {
        put_u16(out, checked_u16("attribute count", self.entries.len())?);
        for (name, body) in &self.entries {
            put_u16(out, *name);
            put_u32(out, body.len() as u32);
            out.extend_from_slice(body);
        }
        Ok(())
    }
}

/// Encodes a class. `resolver` answers common-superclass queries for modified bodies.
pub fn encode_class(
    class: &ClassUnit,
    resolver: &dyn CommonSuperResolver,
) -> Result<Vec<u8>, EncodeError> {
    let mut pool = PoolBuilder::new();

    // `ldc` only reaches the first 256 entries.
    for method in &class.methods {
        if let Some(code) = &method.code {
            for insn in &code.insns {
                if let Insn::Ldc(value) = insn {
                    if !value.is_wide() {
                        pool.loadable(value)?;
                    }
                }
            }
        }
    }

    let this_class = pool.class(&class.name)?;
    let super_class = match &class.super_name {
        Some(name) => pool.class(name)?,
        None => 0,
    };
    let interfaces = class
        .interfaces
        .iter()
        .map(|i| pool.class(i))
        .collect::<Result<Vec<_>, _>>()?;

    let mut body = Vec::new();
    put_u16(&mut body, class.access);
    put_u16(&mut body, this_class);
    put_u16(&mut body, super_class);
    put_u16(&mut body, checked_u16("interface count", interfaces.len())?);
    for i in interfaces {
        put_u16(&mut body, i);
    }

    put_u16(&mut body, checked_u16("field count", class.fields.len())?);
    for field in &class.fields {
        encode_field(field, &mut pool, &mut body)?;
    }
    put_u16(&mut body, checked_u16("method count", class.methods.len())?);
    for method in &class.methods {
        encode_method(class, method, resolver, &mut pool, &mut body)?;
    }

    let mut attributes = class_attributes(class, &mut pool)?;
    if pool.has_bootstrap_methods() {
        let table = pool.bootstrap_attribute();
        attributes.add(&mut pool, "BootstrapMethods", table)?;
    }
    attributes.write(&mut body)?;

    let mut out = Vec::with_capacity(body.len() + 1024);
    out.extend_from_slice(&MAGIC);
    put_u16(&mut out, class.minor_version);
    put_u16(&mut out, class.major_version);
    pool.write(&mut out);
    out.extend_from_slice(&body);
    Ok(out)
}

fn common_attributes(
    annotations: &Annotations,
    signature: Option<&str>,
    synthetic: bool,
    deprecated: bool,
    pool: &mut PoolBuilder,
    attributes: &mut Attributes,
) -> Result<(), EncodeError> {
    if let Some(signature) = signature {
        let index = pool.utf8(signature)?;
        attributes.add_index(pool, "Signature", index)?;
    }
    if synthetic {
        attributes.add(pool, "Synthetic", Vec::new())?;
    }
    if deprecated {
        attributes.add(pool, "Deprecated", Vec::new())?;
    }
    let lists: [(&str, &Vec<Annotation>); 2] = [
        ("RuntimeVisibleAnnotations", &annotations.visible),
        ("RuntimeInvisibleAnnotations", &annotations.invisible),
    ];
    for (name, list) in lists {
        if !list.is_empty() {
            let mut data = Vec::new();
            write_annotations(list, pool, &mut data)?;
            attributes.add(pool, name, data)?;
        }
    }
    let type_lists: [(&str, &Vec<TypeAnnotation>); 2] = [
        ("RuntimeVisibleTypeAnnotations", &annotations.visible_type),
        ("RuntimeInvisibleTypeAnnotations", &annotations.invisible_type),
    ];
    for (name, list) in type_lists {
        if !list.is_empty() {
            let mut data = Vec::new();
            put_u16(&mut data, checked_u16("type annotation count", list.len())?);
            for ta in list {
                data.push(ta.target_type);
                data.extend_from_slice(&ta.target_info);
                data.extend_from_slice(&ta.type_path);
                write_annotation(&ta.annotation, pool, &mut data)?;
            }
            attributes.add(pool, name, data)?;
        }
    }
    Ok(())
}

fn write_annotations(
    list: &[Annotation],
    pool: &mut PoolBuilder,
    out: &mut Vec<u8>,
) -> Result<(), EncodeError> {
    put_u16(out, checked_u16("annotation count", list.len())?);
    for annotation in list {
        write_annotation(annotation, pool, out)?;
    }
    Ok(())
}

fn write_annotation(
    annotation: &Annotation,
    pool: &mut PoolBuilder,
    out: &mut Vec<u8>,
) -> Result<(), EncodeError> {
    put_u16(out, pool.utf8(&annotation.desc)?);
    put_u16(out, checked_u16("element count", annotation.values.len())?);
    for (name, value) in &annotation.values {
        put_u16(out, pool.utf8(name)?);
        write_element_value(value, pool, out)?;
    }
    Ok(())
}

fn write_element_value(
    value: &ElementValue,
    pool: &mut PoolBuilder,
    out: &mut Vec<u8>,
) -> Result<(), EncodeError> {
    match value {
        ElementValue::Const { tag, value } => {
            out.push(*tag);
            let index = match value {
                Loadable::String(s) if *tag == b's' => pool.utf8(s)?,
                other => pool.loadable(other)?,
            };
            put_u16(out, index);
        }
        ElementValue::Enum { desc, name } => {
            out.push(b'e');
            put_u16(out, pool.utf8(desc)?);
            put_u16(out, pool.utf8(name)?);
        }
        ElementValue::Class(desc) => {
            out.push(b'c');
            put_u16(out, pool.utf8(desc)?);
        }
        ElementValue::Annotation(annotation) => {
            out.push(b'@');
            write_annotation(annotation, pool, out)?;
        }
        ElementValue::Array(values) => {
            out.push(b'[');
            put_u16(out, checked_u16("array length", values.len())?);
            for v in values {
                write_element_value(v, pool, out)?;
            }
        }
    }
    Ok(())
}

fn encode_field(field: &FieldUnit, pool: &mut PoolBuilder, out: &mut Vec<u8>) -> Result<(), EncodeError> {
    put_u16(out, field.access);
    put_u16(out, pool.utf8(&field.name)?);
    put_u16(out, pool.utf8(&field.desc)?);
    let mut attributes = Attributes::default();
    if let Some(value) = &field.constant_value {
        let index = pool.loadable(value)?;
        attributes.add_index(pool, "ConstantValue", index)?;
    }
    common_attributes(
        &field.annotations,
        field.signature.as_deref(),
        field.synthetic_attr,
        field.deprecated,
        pool,
        &mut attributes,
    )?;
    for raw in &field.attributes {
        attributes.add(pool, &raw.name, raw.data.clone())?;
    }
    attributes.write(out)
}

fn encode_method(
    class: &ClassUnit,
    method: &MethodUnit,
    resolver: &dyn CommonSuperResolver,
    pool: &mut PoolBuilder,
    out: &mut Vec<u8>,
) -> Result<(), EncodeError> {
    put_u16(out, method.access);
    put_u16(out, pool.utf8(&method.name)?);
    put_u16(out, pool.utf8(&method.desc)?);
    let mut attributes = Attributes::default();
    if let Some(code) = &method.code {
        let method_id = || format!("{}.{}{}", class.name, method.name, method.desc);
        let ctx = MethodContext {
            class_name: &class.name,
            name: &method.name,
            desc: &method.desc,
            access: method.access,
        };
        let recompute = |body: &mut Code| {
            frames::recompute(body, &ctx, resolver)
                .map_err(|source| EncodeError::Frames { method: method_id(), source })
        };
        let mut body = Cow::Borrowed(code);
        if body.max_stack.is_none() {
            recompute(body.to_mut())?;
        }
        let initial = initial_frame_locals(&class.name, method)?;
        let data = loop {
            let encoded = encode_code(&body, &initial, class.major_version, pool).map_err(|e| match e {
                EncodeError::CodeTooLarge { size, .. } => {
                    EncodeError::CodeTooLarge { method: method_id(), size }
                }
                other => other,
            })?;
            match encoded {
                EncodedCode::Done(data) => break data,
                EncodedCode::FarBranches(indices) => {
                    widen_conditionals(body.to_mut(), &indices);
                    recompute(body.to_mut())?;
                }
            }
        };
        attributes.add(pool, "Code", data)?;
    }
    if !method.exceptions.is_empty() {
        let mut data = Vec::new();
        put_u16(&mut data, checked_u16("exception count", method.exceptions.len())?);
        for e in &method.exceptions {
            put_u16(&mut data, pool.class(e)?);
        }
        attributes.add(pool, "Exceptions", data)?;
    }
    common_attributes(
        &method.annotations,
        method.signature.as_deref(),
        method.synthetic_attr,
        method.deprecated,
        pool,
        &mut attributes,
    )?;
    let parameter_lists = [
        ("RuntimeVisibleParameterAnnotations", &method.visible_parameter_annotations),
        ("RuntimeInvisibleParameterAnnotations", &method.invisible_parameter_annotations),
    ];
    for (name, lists) in parameter_lists {
        if let Some(lists) = lists {
            let mut data = vec![u8::try_from(lists.len()).map_err(|_| EncodeError::OutOfRange {
                what: "parameter count",
                value: lists.len() as i64,
            })?];
            for list in lists {
                write_annotations(list, pool, &mut data)?;
            }
            attributes.add(pool, name, data)?;
        }
    }
    if let Some(default) = &method.annotation_default {
        let mut data = Vec::new();
        write_element_value(default, pool, &mut data)?;
        attributes.add(pool, "AnnotationDefault", data)?;
    }
    if let Some(parameters) = &method.parameters {
        let mut data = vec![parameters.len() as u8];
        for p in parameters {
            let name = match &p.name {
                Some(n) => pool.utf8(n)?,
                None => 0,
            };
            put_u16(&mut data, name);
            put_u16(&mut data, p.access);
        }
        attributes.add(pool, "MethodParameters", data)?;
    }
    for raw in &method.attributes {
        attributes.add(pool, &raw.name, raw.data.clone())?;
    }
    attributes.write(out)
}

fn class_attributes(class: &ClassUnit, pool: &mut PoolBuilder) -> Result<Attributes, EncodeError> {
    let mut attributes = Attributes::default();
    if let Some(source) = &class.source_file {
        let index = pool.utf8(source)?;
        attributes.add_index(pool, "SourceFile", index)?;
    }
    common_attributes(
        &class.annotations,
        class.signature.as_deref(),
        class.synthetic_attr,
        class.deprecated,
        pool,
        &mut attributes,
    )?;
    if !class.inner_classes.is_empty() {
        let mut data = Vec::new();
        put_u16(&mut data, checked_u16("inner class count", class.inner_classes.len())?);
        for ic in &class.inner_classes {
            put_u16(&mut data, pool.class(&ic.inner)?);
            put_u16(&mut data, match &ic.outer {
                Some(o) => pool.class(o)?,
                None => 0,
            });
            put_u16(&mut data, match &ic.name {
                Some(n) => pool.utf8(n)?,
                None => 0,
            });
            put_u16(&mut data, ic.access);
        }
        attributes.add(pool, "InnerClasses", data)?;
    }
    if let Some(em) = &class.enclosing_method {
        let mut data = Vec::new();
        put_u16(&mut data, pool.class(&em.owner)?);
        put_u16(&mut data, match &em.method {
            Some((name, desc)) => pool.name_and_type(name, desc)?,
            None => 0,
        });
        attributes.add(pool, "EnclosingMethod", data)?;
    }
    if let Some(host) = &class.nest_host {
        let index = pool.class(host)?;
        attributes.add_index(pool, "NestHost", index)?;
    }
    for (name, list) in [
        ("NestMembers", &class.nest_members),
        ("PermittedSubclasses", &class.permitted_subclasses),
    ] {
        if !list.is_empty() {
            let mut data = Vec::new();
            put_u16(&mut data, checked_u16("class list length", list.len())?);
            for c in list {
                put_u16(&mut data, pool.class(c)?);
            }
            attributes.add(pool, name, data)?;
        }
    }
    if let Some(components) = &class.record {
        let mut data = Vec::new();
        put_u16(&mut data, checked_u16("record component count", components.len())?);
        for component in components {
            put_u16(&mut data, pool.utf8(&component.name)?);
            put_u16(&mut data, pool.utf8(&component.desc)?);
            let mut sub = Attributes::default();
            common_attributes(
                &component.annotations,
                component.signature.as_deref(),
                false,
                false,
                pool,
                &mut sub,
            )?;
            for raw in &component.attributes {
                sub.add(pool, &raw.name, raw.data.clone())?;
            }
            sub.write(&mut data)?;
        }
        attributes.add(pool, "Record", data)?;
    }
    for raw in &class.attributes {
        attributes.add(pool, &raw.name, raw.data.clone())?;
    }
    Ok(attributes)
}

/// Byte offsets of a laid-out body.
struct Layout {
    offsets: Vec<usize>,
    labels: HashMap<Label, usize>,
    /// Unconditional jumps emitted as `goto_w`/`jsr_w`.
    wide_jumps: HashSet<usize>,
    /// Conditional jumps whose target is out of 16-bit reach.
    far_conditionals: Vec<usize>,
    code_len: usize,
}

impl Layout {
    fn label(&self, label: Label) -> Result<usize, EncodeError> {
        self.labels.get(&label).copied().ok_or(EncodeError::UnknownLabel(label.0))
    }
}

const fn switch_padding(offset: usize) -> usize {
    (4 - (offset + 1) % 4) % 4
}

fn insn_size(
    insn: &Insn,
    offset: usize,
    wide_jump: bool,
    pool: &mut PoolBuilder,
) -> Result<usize, EncodeError> {
    Ok(match insn {
        Insn::Label(_) | Insn::Line(_) => 0,
        Insn::Simple(_) => 1,
        Insn::Int { op, .. } => {
            if *op == opcode::SIPUSH {
                3
            } else {
                2
            }
        }
        Insn::Var { op, var } => {
            if opcode::implicit_var(*op, *var).is_some() {
                1
            } else if *var <= 255 {
                2
            } else {
                4
            }
        }
        Insn::Iinc { var, incr } => {
            if *var <= 255 && i8::try_from(*incr).is_ok() {
                3
            } else {
                6
            }
        }
        Insn::Type { .. } | Insn::Field { .. } => 3,
        Insn::Method { op, .. } => {
            if *op == opcode::INVOKEINTERFACE {
                5
            } else {
                3
            }
        }
        Insn::InvokeDynamic { .. } => 5,
        Insn::MultiANewArray { .. } => 4,
        Insn::Ldc(value) => {
            if !value.is_wide() && pool.loadable(value)? <= 255 {
                2
            } else {
                3
            }
        }
        Insn::Jump { .. } => {
            if wide_jump {
                5
            } else {
                3
            }
        }
        Insn::TableSwitch { targets, .. } => 1 + switch_padding(offset) + 12 + 4 * targets.len(),
        Insn::LookupSwitch { pairs, .. } => 1 + switch_padding(offset) + 8 + 8 * pairs.len(),
    })
}

fn layout(code: &Code, pool: &mut PoolBuilder) -> Result<Layout, EncodeError> {
    let mut wide_jumps = HashSet::new();
    loop {
        let mut offsets = Vec::with_capacity(code.insns.len());
        let mut labels = HashMap::new();
        let mut offset = 0usize;
        for (i, insn) in code.insns.iter().enumerate() {
            offsets.push(offset);
            if let Insn::Label(l) = insn {
                labels.insert(*l, offset);
            }
            offset += insn_size(insn, offset, wide_jumps.contains(&i), pool)?;
        }
        let mut layout = Layout {
            offsets,
            labels,
            wide_jumps: wide_jumps.clone(),
            far_conditionals: Vec::new(),
            code_len: offset,
        };
        let mut grew = false;
        for (i, insn) in code.insns.iter().enumerate() {
            if let Insn::Jump { op, target } = insn {
                if wide_jumps.contains(&i) {
                    continue;
                }
                let delta = layout.label(*target)? as i64 - layout.offsets[i] as i64;
                if i16::try_from(delta).is_ok() {
                    continue;
                }
                if *op == opcode::GOTO || *op == opcode::JSR {
                    wide_jumps.insert(i);
                    grew = true;
                } else {
                    layout.far_conditionals.push(i);
                }
            }
        }
        if !grew {
            return Ok(layout);
        }
    }
}

fn emit_insn(
    insn: &Insn,
    i: usize,
    layout: &Layout,
    pool: &mut PoolBuilder,
    out: &mut Vec<u8>,
) -> Result<(), EncodeError> {
    let here = layout.offsets[i];
    let rel = |target: Label| -> Result<i64, EncodeError> {
        Ok(layout.label(target)? as i64 - here as i64)
    };
    match insn {
        Insn::Label(_) | Insn::Line(_) => {}
        Insn::Simple(op) => out.push(*op),
        Insn::Int { op, operand } => {
            out.push(*op);
            match *op {
                opcode::SIPUSH => {
                    let v = i16::try_from(*operand).map_err(|_| EncodeError::OutOfRange {
                        what: "sipush",
                        value: *operand as i64,
                    })?;
                    out.extend_from_slice(&v.to_be_bytes());
                }
                opcode::BIPUSH => {
                    let v = i8::try_from(*operand).map_err(|_| EncodeError::OutOfRange {
                        what: "bipush",
                        value: *operand as i64,
                    })?;
                    out.push(v as u8);
                }
                _ => {
                    let v = u8::try_from(*operand).map_err(|_| EncodeError::OutOfRange {
                        what: "newarray",
                        value: *operand as i64,
                    })?;
                    out.push(v);
                }
            }
        }
        Insn::Var { op, var } => {
            if let Some(short) = opcode::implicit_var(*op, *var) {
                out.push(short);
            } else if *var <= 255 {
                out.push(*op);
                out.push(*var as u8);
            } else {
                out.push(opcode::WIDE);
                out.push(*op);
                put_u16(out, *var);
            }
        }
        Insn::Iinc { var, incr } => match i8::try_from(*incr) {
            Ok(small) if *var <= 255 => {
                out.push(opcode::IINC);
                out.push(*var as u8);
                out.push(small as u8);
            }
            _ => {
                out.push(opcode::WIDE);
                out.push(opcode::IINC);
                put_u16(out, *var);
                out.extend_from_slice(&incr.to_be_bytes());
            }
        },
        Insn::Type { op, class } => {
            out.push(*op);
            put_u16(out, pool.class(class)?);
        }
        Insn::Field { op, owner, name, desc } => {
            out.push(*op);
            put_u16(out, pool.field_ref(owner, name, desc)?);
        }
        Insn::Method { op, owner, name, desc, interface } => {
            out.push(*op);
            put_u16(out, pool.method_ref(owner, name, desc, *interface)?);
            if *op == opcode::INVOKEINTERFACE {
                let count = parse_method_descriptor(desc)?.param_slots() + 1;
                out.push(u8::try_from(count).map_err(|_| EncodeError::OutOfRange {
                    what: "invokeinterface count",
                    value: count as i64,
                })?);
                out.push(0);
            }
        }
        Insn::InvokeDynamic { name, desc, bsm, args } => {
            out.push(opcode::INVOKEDYNAMIC);
            put_u16(out, pool.invoke_dynamic(name, desc, bsm, args)?);
            put_u16(out, 0);
        }
        Insn::MultiANewArray { desc, dims } => {
            out.push(opcode::MULTIANEWARRAY);
            put_u16(out, pool.class(desc)?);
            out.push(*dims);
        }
        Insn::Ldc(value) => {
            let index = pool.loadable(value)?;
            if value.is_wide() {
                out.push(opcode::LDC2_W);
                put_u16(out, index);
            } else if index <= 255 {
                out.push(opcode::LDC);
                out.push(index as u8);
            } else {
                out.push(opcode::LDC_W);
                put_u16(out, index);
            }
        }
        Insn::Jump { op, target } => {
            if layout.wide_jumps.contains(&i) {
                out.push(if *op == opcode::GOTO { opcode::GOTO_W } else { opcode::JSR_W });
                out.extend_from_slice(&(rel(*target)? as i32).to_be_bytes());
            } else {
                out.push(*op);
                out.extend_from_slice(&(rel(*target)? as i16).to_be_bytes());
            }
        }
        Insn::TableSwitch { low, high, default, targets } => {
            out.push(opcode::TABLESWITCH);
            out.resize(out.len() + switch_padding(here), 0);
            out.extend_from_slice(&(rel(*default)? as i32).to_be_bytes());
            out.extend_from_slice(&low.to_be_bytes());
            out.extend_from_slice(&high.to_be_bytes());
            for t in targets {
                out.extend_from_slice(&(rel(*t)? as i32).to_be_bytes());
            }
        }
        Insn::LookupSwitch { default, pairs } => {
            out.push(opcode::LOOKUPSWITCH);
            out.resize(out.len() + switch_padding(here), 0);
            out.extend_from_slice(&(rel(*default)? as i32).to_be_bytes());
            out.extend_from_slice(&(pairs.len() as i32).to_be_bytes());
            let mut sorted = pairs.clone();
            sorted.sort_by_key(|(k, _)| *k);
            for (key, t) in sorted {
                out.extend_from_slice(&key.to_be_bytes());
                out.extend_from_slice(&(rel(t)? as i32).to_be_bytes());
            }
        }
    }
    Ok(())
}

/// Rewrites far conditional jumps into an inverted jump over a `goto`.
fn widen_conditionals(code: &mut Code, indices: &[usize]) {
    let mut sorted = indices.to_vec();
    sorted.sort_unstable_by(|a, b| b.cmp(a));
    for i in sorted {
        let Insn::Jump { op, target } = code.insns[i] else { continue };
        let skip = code.new_label();
        code.insns.splice(
            i..=i,
            [
                Insn::Jump { op: opcode::invert_condition(op), target: skip },
                Insn::Jump { op: opcode::GOTO, target },
                Insn::Label(skip),
            ],
        );
    }
    code.invalidate();
}

enum EncodedCode {
    Done(Vec<u8>),
    /// Conditional jumps (by instruction index) that must be widened first.
    FarBranches(Vec<usize>),
}

/// Encodes the body of a `Code` attribute.
fn encode_code(
    code: &Code,
    initial_locals: &[FrameType],
    major_version: u16,
    pool: &mut PoolBuilder,
) -> Result<EncodedCode, EncodeError> {
    let layout = layout(code, pool)?;
    if !layout.far_conditionals.is_empty() {
        return Ok(EncodedCode::FarBranches(layout.far_conditionals));
    }
    if layout.code_len > MAX_CODE_SIZE {
        return Err(EncodeError::CodeTooLarge { method: String::new(), size: layout.code_len });
    }
    let mut bytes = Vec::with_capacity(layout.code_len);
    let mut lines = Vec::new();
    for (i, insn) in code.insns.iter().enumerate() {
        if let Insn::Line(n) = insn {
            lines.push((layout.offsets[i], *n));
        }
        emit_insn(insn, i, &layout, pool, &mut bytes)?;
    }
    debug_assert_eq!(bytes.len(), layout.code_len);

    let mut out = Vec::with_capacity(bytes.len() + 64);
    put_u16(&mut out, code.max_stack.unwrap_or(0));
    put_u16(&mut out, code.max_locals);
    put_u32(&mut out, bytes.len() as u32);
    out.extend_from_slice(&bytes);

    let mut handlers = Vec::new();
    for tc in &code.try_catches {
        let (start, end) = (layout.label(tc.start)?, layout.label(tc.end)?);
        if start >= end {
            continue;
        }
        let catch_type = match &tc.catch_type {
            Some(t) => pool.class(t)?,
            None => 0,
        };
        handlers.push((start, end, layout.label(tc.handler)?, catch_type));
    }
    put_u16(&mut out, checked_u16("exception table length", handlers.len())?);
    for (start, end, handler, catch_type) in handlers {
        put_u16(&mut out, start as u16);
        put_u16(&mut out, end as u16);
        put_u16(&mut out, handler as u16);
        put_u16(&mut out, catch_type);
    }

    let mut attributes = Attributes::default();
    if !lines.is_empty() {
        let mut data = Vec::new();
        put_u16(&mut data, checked_u16("line table length", lines.len())?);
        for (pc, line) in &lines {
            put_u16(&mut data, *pc as u16);
            put_u16(&mut data, *line);
        }
        attributes.add(pool, "LineNumberTable", data)?;
    }
    let mut locals = Vec::new();
    for lv in &code.local_vars {
        let (start, end) = (layout.label(lv.start)?, layout.label(lv.end)?);
        if end >= start {
            locals.push((start, end - start, lv));
        }
    }
    if !locals.is_empty() {
        let mut data = Vec::new();
        put_u16(&mut data, checked_u16("local variable count", locals.len())?);
        for (start, len, lv) in &locals {
            put_u16(&mut data, *start as u16);
            put_u16(&mut data, *len as u16);
            put_u16(&mut data, pool.utf8(&lv.name)?);
            put_u16(&mut data, pool.utf8(&lv.desc)?);
            put_u16(&mut data, lv.index);
        }
        attributes.add(pool, "LocalVariableTable", data)?;
        let typed: Vec<_> = locals.iter().filter(|(_, _, lv)| lv.signature.is_some()).collect();
        if !typed.is_empty() {
            let mut data = Vec::new();
            put_u16(&mut data, checked_u16("local variable type count", typed.len())?);
            for (start, len, lv) in typed {
                put_u16(&mut data, *start as u16);
                put_u16(&mut data, *len as u16);
                put_u16(&mut data, pool.utf8(&lv.name)?);
                put_u16(&mut data, pool.utf8(lv.signature.as_deref().unwrap_or_default())?);
                put_u16(&mut data, lv.index);
            }
            attributes.add(pool, "LocalVariableTypeTable", data)?;
        }
    }
    if major_version >= STACK_MAP_VERSION && !code.frames.is_empty() {
        if let Some(data) = stack_map_table(code, initial_locals, &layout, pool)? {
            attributes.add(pool, "StackMapTable", data)?;
        }
    }
    attributes.write(&mut out)?;
    Ok(EncodedCode::Done(out))
}

fn write_verification_type(
    t: &FrameType,
    layout: &Layout,
    pool: &mut PoolBuilder,
    out: &mut Vec<u8>,
) -> Result<(), EncodeError> {
    match t {
        FrameType::Top => out.push(0),
        FrameType::Integer => out.push(1),
        FrameType::Float => out.push(2),
        FrameType::Double => out.push(3),
        FrameType::Long => out.push(4),
        FrameType::Null => out.push(5),
        FrameType::UninitializedThis => out.push(6),
        FrameType::Object(name) => {
            out.push(7);
            put_u16(out, pool.class(name)?);
        }
        FrameType::Uninitialized(label) => {
            out.push(8);
            put_u16(out, layout.label(*label)? as u16);
        }
    }
    Ok(())
}

fn write_verification_types(
    types: &[FrameType],
    layout: &Layout,
    pool: &mut PoolBuilder,
    out: &mut Vec<u8>,
) -> Result<(), EncodeError> {
    for t in types {
        write_verification_type(t, layout, pool, out)?;
    }
    Ok(())
}

/// Builds a compressed `StackMapTable`; `None` if no frame lands inside the code.
fn stack_map_table(
    code: &Code,
    initial_locals: &[FrameType],
    layout: &Layout,
    pool: &mut PoolBuilder,
) -> Result<Option<Vec<u8>>, EncodeError> {
    let mut by_offset: BTreeMap<usize, &DeclaredFrame> = BTreeMap::new();
    for (label, frame) in &code.frames {
        let offset = layout.label(*label)?;
        if offset < layout.code_len {
            by_offset.entry(offset).or_insert(frame);
        }
    }
    if by_offset.is_empty() {
        return Ok(None);
    }

    let mut data = Vec::new();
    put_u16(&mut data, checked_u16("stack map frame count", by_offset.len())?);
    let mut prev_locals: &[FrameType] = initial_locals;
    let mut prev_offset: Option<usize> = None;
    for (offset, frame) in by_offset {
        let delta = match prev_offset {
            None => offset,
            Some(p) => offset - p - 1,
        };
        let locals = frame.locals.as_slice();
        let same_locals = locals == prev_locals;
        let common = prev_locals.len().min(locals.len());
        let shares_prefix = locals[..common] == prev_locals[..common];
        let grown = locals.len().saturating_sub(prev_locals.len());
        let shrunk = prev_locals.len().saturating_sub(locals.len());
        if frame.stack.is_empty() && same_locals {
            if delta < 64 {
                data.push(delta as u8);
            } else {
                data.push(251);
                put_u16(&mut data, delta as u16);
            }
        } else if frame.stack.len() == 1 && same_locals {
            if delta < 64 {
                data.push(64 + delta as u8);
            } else {
                data.push(247);
                put_u16(&mut data, delta as u16);
            }
            write_verification_type(&frame.stack[0], layout, pool, &mut data)?;
        } else if frame.stack.is_empty() && shares_prefix && (1..=3).contains(&grown) {
            data.push(251 + grown as u8);
            put_u16(&mut data, delta as u16);
            write_verification_types(&locals[common..], layout, pool, &mut data)?;
        } else if frame.stack.is_empty() && shares_prefix && (1..=3).contains(&shrunk) {
            data.push(251 - shrunk as u8);
            put_u16(&mut data, delta as u16);
        } else {
            data.push(255);
            put_u16(&mut data, delta as u16);
            put_u16(&mut data, checked_u16("frame locals", locals.len())?);
            write_verification_types(locals, layout, pool, &mut data)?;
            put_u16(&mut data, checked_u16("frame stack", frame.stack.len())?);
            write_verification_types(&frame.stack, layout, pool, &mut data)?;
        }
        prev_locals = locals;
        prev_offset = Some(offset);
    }
    Ok(Some(data))
}
