//! jarcloak's single entry-point for turning class-file bytes into a [`ClassUnit`].
//!
//! Decoding happens in two passes. The first pass splits the file into raw fields, methods and
//! attributes so the `BootstrapMethods` table is known before anything refers to it. The second
//! pass resolves every constant-pool index into symbols and turns each `Code` attribute into a
//! label-based instruction list.

use crate::{
    class_ir::{
        Annotation, Annotations, ClassUnit, ElementValue, EnclosingMethod, FieldUnit, InnerClass,
        MethodParameter, MethodUnit, RawAttribute, RecordComponent, TypeAnnotation,
    },
    constant_pool::{BootstrapMethod, ConstantPool},
    descriptor::{parse_method_descriptor, JavaType},
    insn::{Code, DeclaredFrame, FrameType, Insn, Label, Loadable, LocalVar, TryCatch},
    opcode::{self, OperandKind},
    reader::Reader,
};
use jarcloak_utils::errors::DecodeError;
use std::{
    collections::{BTreeMap, BTreeSet},
    fs,
    path::Path,
};

/// The four bytes every class file starts with.
pub const MAGIC: [u8; 4] = [0xca, 0xfe, 0xba, 0xbe];

/// An attribute whose name is resolved but whose body is still raw.
struct RawAttr<'d, 'p> {
    name: &'p str,
    data: &'d [u8],
}

struct RawMember<'d, 'p> {
    access: u16,
    name: String,
    desc: String,
    attributes: Vec<RawAttr<'d, 'p>>,
}

fn bad_attr(name: &str, reason: impl Into<String>) -> DecodeError {
    DecodeError::BadAttribute { name: name.to_string(), reason: reason.into() }
}

fn read_attributes<'d, 'p>(
    r: &mut Reader<'d>,
    pool: &'p ConstantPool,
) -> Result<Vec<RawAttr<'d, 'p>>, DecodeError> {
    let count = r.u16()?;
    let mut attributes = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let name = pool.utf8(r.u16()?)?;
        let len = r.u32()? as usize;
        let data = r.bytes(len)?;
        attributes.push(RawAttr { name, data });
    }
    Ok(attributes)
}

fn read_members<'d, 'p>(
    r: &mut Reader<'d>,
    pool: &'p ConstantPool,
) -> Result<Vec<RawMember<'d, 'p>>, DecodeError> {
    let count = r.u16()?;
    let mut members = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let access = r.u16()?;
        let name = pool.utf8(r.u16()?)?.to_string();
        let desc = pool.utf8(r.u16()?)?.to_string();
        let attributes = read_attributes(r, pool)?;
        members.push(RawMember { access, name, desc, attributes });
    }
    Ok(members)
}

/// Returns true if the bytes start with the class-file magic.
pub fn is_class_file(bytes: &[u8]) -> bool {
    bytes.len() >= 4 && bytes[..4] == MAGIC
}

/// Reads and decodes a class file from disk.
pub fn read_class_file(path: &Path) -> Result<ClassUnit, DecodeError> {
    let bytes = fs::read(path).map_err(|e| DecodeError::FileRead {
        path: path.display().to_string(),
        source: e,
    })?;
    decode_class(&bytes)
}

/// Decodes a complete class file.
pub fn decode_class(bytes: &[u8]) -> Result<ClassUnit, DecodeError> {
    let mut r = Reader::new(bytes);
    let magic = r.bytes(4)?;
    if magic != MAGIC {
        return Err(DecodeError::BadMagic([magic[0], magic[1], magic[2], magic[3]]));
    }
    let minor_version = r.u16()?;
    let major_version = r.u16()?;
    let mut pool = ConstantPool::parse(&mut r)?;

    // The bootstrap table has to be known before any dynamic constant is resolved.
    let bootstrap = {
        let mut scan = r.clone();
        skip_to_class_attributes(&mut scan, &pool)?;
        let attributes = read_attributes(&mut scan, &pool)?;
        match attributes.iter().find(|a| a.name == "BootstrapMethods") {
            Some(attr) => parse_bootstrap_methods(attr.data)?,
            None => Vec::new(),
        }
    };
    pool.set_bootstrap(bootstrap);

    let access = r.u16()?;
    let name = pool.class_name(r.u16()?)?;
    let super_name = pool.optional_class_name(r.u16()?)?;
    let interface_count = r.u16()?;
    let interfaces = (0..interface_count)
        .map(|_| pool.class_name(r.u16()?))
        .collect::<Result<Vec<_>, _>>()?;
    let raw_fields = read_members(&mut r, &pool)?;
    let raw_methods = read_members(&mut r, &pool)?;
    let class_attributes = read_attributes(&mut r, &pool)?;

    let mut class = ClassUnit::new(major_version, access, name, super_name.as_deref());
    class.minor_version = minor_version;
    class.interfaces = interfaces;

    for raw in &raw_fields {
        class.fields.push(decode_field(raw, &pool)?);
    }
    for raw in &raw_methods {
        class.methods.push(decode_method(raw, &class.name, &pool)?);
    }
    decode_class_attributes(&mut class, &class_attributes, &pool)?;

    tracing::trace!(
        "Decoded {} ({} fields, {} methods)",
        class.name,
        class.fields.len(),
        class.methods.len()
    );
    Ok(class)
}

fn skip_to_class_attributes(r: &mut Reader<'_>, pool: &ConstantPool) -> Result<(), DecodeError> {
    r.skip(6)?;
    let interface_count = r.u16()? as usize;
    r.skip(interface_count * 2)?;
    for _ in 0..2 {
        read_members(r, pool)?;
    }
    Ok(())
}

fn parse_bootstrap_methods(data: &[u8]) -> Result<Vec<BootstrapMethod>, DecodeError> {
    let mut r = Reader::new(data);
    let count = r.u16()?;
    let mut methods = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let handle = r.u16()?;
        let argc = r.u16()?;
        let args = (0..argc).map(|_| r.u16()).collect::<Result<Vec<_>, _>>()?;
        methods.push(BootstrapMethod { handle, args });
    }
    Ok(methods)
}

fn class_list(data: &[u8], pool: &ConstantPool) -> Result<Vec<String>, DecodeError> {
    let mut r = Reader::new(data);
    let count = r.u16()?;
    (0..count).map(|_| pool.class_name(r.u16()?)).collect()
}

fn single_u16(attr: &RawAttr<'_, '_>) -> Result<u16, DecodeError> {
    Reader::new(attr.data).u16().map_err(|_| bad_attr(attr.name, "truncated"))
}

/// Handles the attributes every annotated element shares. Returns false for anything else.
fn decode_common_attribute(
    attr: &RawAttr<'_, '_>,
    annotations: &mut Annotations,
    pool: &ConstantPool,
) -> Result<bool, DecodeError> {
    let mut r = Reader::new(attr.data);
    match attr.name {
        "RuntimeVisibleAnnotations" => annotations.visible = parse_annotations(&mut r, pool)?,
        "RuntimeInvisibleAnnotations" => annotations.invisible = parse_annotations(&mut r, pool)?,
        "RuntimeVisibleTypeAnnotations" => {
            annotations.visible_type = parse_type_annotations(&mut r, pool)?
        }
        "RuntimeInvisibleTypeAnnotations" => {
            annotations.invisible_type = parse_type_annotations(&mut r, pool)?
        }
        _ => return Ok(false),
    }
    Ok(true)
}

fn raw(attr: &RawAttr<'_, '_>) -> RawAttribute {
    RawAttribute { name: attr.name.to_string(), data: attr.data.to_vec() }
}

fn decode_field(raw_field: &RawMember<'_, '_>, pool: &ConstantPool) -> Result<FieldUnit, DecodeError> {
    let mut field = FieldUnit::new(raw_field.access, raw_field.name.clone(), raw_field.desc.clone());
    for attr in &raw_field.attributes {
        if decode_common_attribute(attr, &mut field.annotations, pool)? {
            continue;
        }
        match attr.name {
            "ConstantValue" => field.constant_value = Some(pool.loadable(single_u16(attr)?)?),
            "Signature" => field.signature = Some(pool.utf8(single_u16(attr)?)?.to_string()),
            "Synthetic" => field.synthetic_attr = true,
            "Deprecated" => field.deprecated = true,
            _ => field.attributes.push(raw(attr)),
        }
    }
    Ok(field)
}

fn decode_method(
    raw_method: &RawMember<'_, '_>,
    class_name: &str,
    pool: &ConstantPool,
) -> Result<MethodUnit, DecodeError> {
    let mut method =
        MethodUnit::new(raw_method.access, raw_method.name.clone(), raw_method.desc.clone());
    for attr in &raw_method.attributes {
        if decode_common_attribute(attr, &mut method.annotations, pool)? {
            continue;
        }
        let mut r = Reader::new(attr.data);
        match attr.name {
            "Code" => {
                let context = FrameSeed { class_name, method: &method };
                method.code = Some(decode_code(attr.data, &context, pool)?);
            }
            "Exceptions" => method.exceptions = class_list(attr.data, pool)?,
            "Signature" => method.signature = Some(pool.utf8(single_u16(attr)?)?.to_string()),
            "RuntimeVisibleParameterAnnotations" => {
                method.visible_parameter_annotations =
                    Some(parse_parameter_annotations(&mut r, pool)?)
            }
            "RuntimeInvisibleParameterAnnotations" => {
                method.invisible_parameter_annotations =
                    Some(parse_parameter_annotations(&mut r, pool)?)
            }
            "AnnotationDefault" => {
                method.annotation_default = Some(parse_element_value(&mut r, pool)?)
            }
            "MethodParameters" => {
                let count = r.u8()?;
                let mut parameters = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let name = pool.optional_utf8(r.u16()?)?;
                    parameters.push(MethodParameter { name, access: r.u16()? });
                }
                method.parameters = Some(parameters);
            }
            "Synthetic" => method.synthetic_attr = true,
            "Deprecated" => method.deprecated = true,
            _ => method.attributes.push(raw(attr)),
        }
    }
    Ok(method)
}

fn decode_class_attributes(
    class: &mut ClassUnit,
    attributes: &[RawAttr<'_, '_>],
    pool: &ConstantPool,
) -> Result<(), DecodeError> {
    for attr in attributes {
        if decode_common_attribute(attr, &mut class.annotations, pool)? {
            continue;
        }
        let mut r = Reader::new(attr.data);
        match attr.name {
            "SourceFile" => class.source_file = Some(pool.utf8(single_u16(attr)?)?.to_string()),
            "Signature" => class.signature = Some(pool.utf8(single_u16(attr)?)?.to_string()),
            "InnerClasses" => {
                let count = r.u16()?;
                for _ in 0..count {
                    let inner = pool.class_name(r.u16()?)?;
                    let outer = pool.optional_class_name(r.u16()?)?;
                    let name = pool.optional_utf8(r.u16()?)?;
                    let access = r.u16()?;
                    class.inner_classes.push(InnerClass { inner, outer, name, access });
                }
            }
            "EnclosingMethod" => {
                let owner = pool.class_name(r.u16()?)?;
                let nat = r.u16()?;
                let method = if nat == 0 { None } else { Some(pool.name_and_type(nat)?) };
                class.enclosing_method = Some(EnclosingMethod { owner, method });
            }
            "NestHost" => class.nest_host = Some(pool.class_name(single_u16(attr)?)?),
            "NestMembers" => class.nest_members = class_list(attr.data, pool)?,
            "PermittedSubclasses" => class.permitted_subclasses = class_list(attr.data, pool)?,
            "Record" => {
                let count = r.u16()?;
                let mut components = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let name = pool.utf8(r.u16()?)?.to_string();
                    let desc = pool.utf8(r.u16()?)?.to_string();
                    let mut component = RecordComponent {
                        name,
                        desc,
                        signature: None,
                        annotations: Annotations::default(),
                        attributes: Vec::new(),
                    };
                    for sub in read_attributes(&mut r, pool)? {
                        if decode_common_attribute(&sub, &mut component.annotations, pool)? {
                            continue;
                        }
                        if sub.name == "Signature" {
                            component.signature = Some(pool.utf8(single_u16(&sub)?)?.to_string());
                        } else {
                            component.attributes.push(raw(&sub));
                        }
                    }
                    components.push(component);
                }
                class.record = Some(components);
            }
            "Synthetic" => class.synthetic_attr = true,
            "Deprecated" => class.deprecated = true,
            // Rebuilt from the instruction list on encode.
            "BootstrapMethods" => {}
            _ => class.attributes.push(raw(attr)),
        }
    }
    Ok(())
}

fn parse_annotations(r: &mut Reader<'_>, pool: &ConstantPool) -> Result<Vec<Annotation>, DecodeError> {
    let count = r.u16()?;
    (0..count).map(|_| parse_annotation(r, pool)).collect()
}

fn parse_annotation(r: &mut Reader<'_>, pool: &ConstantPool) -> Result<Annotation, DecodeError> {
    let desc = pool.utf8(r.u16()?)?.to_string();
    let pairs = r.u16()?;
    let mut values = Vec::with_capacity(pairs as usize);
    for _ in 0..pairs {
        let name = pool.utf8(r.u16()?)?.to_string();
        values.push((name, parse_element_value(r, pool)?));
    }
    Ok(Annotation { desc, values })
}

fn parse_parameter_annotations(
    r: &mut Reader<'_>,
    pool: &ConstantPool,
) -> Result<Vec<Vec<Annotation>>, DecodeError> {
    let count = r.u8()?;
    (0..count).map(|_| parse_annotations(r, pool)).collect()
}

fn parse_element_value(r: &mut Reader<'_>, pool: &ConstantPool) -> Result<ElementValue, DecodeError> {
    let tag = r.u8()?;
    Ok(match tag {
        b's' => ElementValue::Const {
            tag,
            value: Loadable::String(pool.utf8(r.u16()?)?.to_string()),
        },
        b'B' | b'C' | b'D' | b'F' | b'I' | b'J' | b'S' | b'Z' => {
            ElementValue::Const { tag, value: pool.loadable(r.u16()?)? }
        }
        b'e' => ElementValue::Enum {
            desc: pool.utf8(r.u16()?)?.to_string(),
            name: pool.utf8(r.u16()?)?.to_string(),
        },
        b'c' => ElementValue::Class(pool.utf8(r.u16()?)?.to_string()),
        b'@' => ElementValue::Annotation(parse_annotation(r, pool)?),
        b'[' => {
            let count = r.u16()?;
            ElementValue::Array(
                (0..count).map(|_| parse_element_value(r, pool)).collect::<Result<_, _>>()?,
            )
        }
        other => {
            return Err(bad_attr("annotation", format!("unknown element tag {:?}", other as char)))
        }
    })
}

fn parse_type_annotations(
    r: &mut Reader<'_>,
    pool: &ConstantPool,
) -> Result<Vec<TypeAnnotation>, DecodeError> {
    let count = r.u16()?;
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let target_type = r.u8()?;
        let info_len = match target_type {
            0x00 | 0x01 | 0x16 => 1,
            0x10 | 0x11 | 0x12 | 0x17 | 0x42..=0x46 => 2,
            0x13..=0x15 => 0,
            0x47..=0x4b => 3,
            0x40 | 0x41 => {
                let mut probe = r.clone();
                2 + 6 * probe.u16()? as usize
            }
            other => return Err(bad_attr("type annotation", format!("target type {other:#x}"))),
        };
        let target_info = r.bytes(info_len)?.to_vec();
        let path_len = r.clone().u8()? as usize;
        let type_path = r.bytes(1 + 2 * path_len)?.to_vec();
        let annotation = parse_annotation(r, pool)?;
        out.push(TypeAnnotation { target_type, target_info, type_path, annotation });
    }
    Ok(out)
}

/// What the implicit first stack-map frame is derived from.
struct FrameSeed<'a> {
    class_name: &'a str,
    method: &'a MethodUnit,
}

impl FrameSeed<'_> {
    fn initial_locals(&self) -> Result<Vec<FrameType>, DecodeError> {
        Ok(initial_frame_locals(self.class_name, self.method)?)
    }
}

/// Locals of the implicit first frame of a method.
pub fn initial_frame_locals(
    class_name: &str,
    method: &MethodUnit,
) -> Result<Vec<FrameType>, jarcloak_utils::errors::DescriptorError> {
    let mut locals = Vec::new();
    if !method.is_static() {
        if method.name == "<init>" && class_name != "java/lang/Object" {
            locals.push(FrameType::UninitializedThis);
        } else {
            locals.push(FrameType::Object(class_name.to_string()));
        }
    }
    let desc = parse_method_descriptor(&method.desc)?;
    locals.extend(desc.params.iter().map(frame_type_of));
    Ok(locals)
}

/// Verification type of a parameter or field type.
pub fn frame_type_of(ty: &JavaType) -> FrameType {
    match ty {
        JavaType::Boolean | JavaType::Byte | JavaType::Char | JavaType::Short | JavaType::Int => {
            FrameType::Integer
        }
        JavaType::Float => FrameType::Float,
        JavaType::Long => FrameType::Long,
        JavaType::Double => FrameType::Double,
        JavaType::Object(name) | JavaType::Array(name) => FrameType::Object(name.clone()),
        JavaType::Void => FrameType::Top,
    }
}

/// A decoded instruction that still refers to byte offsets.
enum RawInsn {
    Resolved(Insn),
    Jump { op: u8, target: usize },
    TableSwitch { low: i32, high: i32, default: usize, targets: Vec<usize> },
    LookupSwitch { default: usize, pairs: Vec<(i32, usize)> },
}

/// A verification type that may still name an offset.
enum RawFrameType {
    Resolved(FrameType),
    Uninitialized(usize),
}

struct RawFrame {
    offset: usize,
    locals: Vec<RawFrameType>,
    stack: Vec<RawFrameType>,
}

fn branch_target(offset: usize, delta: i64, code_len: usize) -> Result<usize, DecodeError> {
    let target = offset as i64 + delta;
    if target < 0 || target >= code_len as i64 {
        return Err(DecodeError::BadBranchTarget { target, code_len });
    }
    Ok(target as usize)
}

fn decode_instructions(
    code: &[u8],
    pool: &ConstantPool,
) -> Result<Vec<(usize, RawInsn)>, DecodeError> {
    let code_len = code.len();
    let mut r = Reader::new(code);
    let mut out = Vec::new();
    while r.remaining() > 0 {
        let offset = r.pos();
        let op = r.u8()?;
        let kind = opcode::operand_kind(op).ok_or(DecodeError::UnknownOpcode { opcode: op, offset })?;
        let insn = match kind {
            OperandKind::None => RawInsn::Resolved(Insn::Simple(op)),
            OperandKind::Byte => {
                let operand = if op == opcode::BIPUSH { r.i8()? as i32 } else { r.u8()? as i32 };
                RawInsn::Resolved(Insn::Int { op, operand })
            }
            OperandKind::Short => RawInsn::Resolved(Insn::Int { op, operand: r.i16()? as i32 }),
            OperandKind::Ldc => {
                let index = if op == opcode::LDC { r.u8()? as u16 } else { r.u16()? };
                RawInsn::Resolved(Insn::Ldc(pool.loadable(index)?))
            }
            OperandKind::Var => RawInsn::Resolved(Insn::Var { op, var: r.u8()? as u16 }),
            OperandKind::ImplicitVar => {
                let (op, var) = opcode::expand_implicit_var(op);
                RawInsn::Resolved(Insn::Var { op, var })
            }
            OperandKind::Iinc => RawInsn::Resolved(Insn::Iinc {
                var: r.u8()? as u16,
                incr: r.i8()? as i16,
            }),
            OperandKind::Jump => {
                let target = branch_target(offset, r.i16()? as i64, code_len)?;
                RawInsn::Jump { op, target }
            }
            OperandKind::JumpWide => {
                let target = branch_target(offset, r.i32()? as i64, code_len)?;
                let op = if op == opcode::GOTO_W { opcode::GOTO } else { opcode::JSR };
                RawInsn::Jump { op, target }
            }
            OperandKind::TableSwitch => {
                r.skip((4 - (offset + 1) % 4) % 4)?;
                let default = branch_target(offset, r.i32()? as i64, code_len)?;
                let low = r.i32()?;
                let high = r.i32()?;
                if high < low {
                    return Err(bad_attr("Code", format!("tableswitch bounds {low}..{high}")));
                }
                let count = (high as i64 - low as i64 + 1) as usize;
                if count * 4 > r.remaining() {
                    return Err(DecodeError::UnexpectedEof(r.pos()));
                }
                let targets = (0..count)
                    .map(|_| branch_target(offset, r.i32()? as i64, code_len))
                    .collect::<Result<Vec<_>, _>>()?;
                RawInsn::TableSwitch { low, high, default, targets }
            }
            OperandKind::LookupSwitch => {
                r.skip((4 - (offset + 1) % 4) % 4)?;
                let default = branch_target(offset, r.i32()? as i64, code_len)?;
                let count = r.i32()?;
                if count < 0 || count as usize * 8 > r.remaining() {
                    return Err(bad_attr("Code", format!("lookupswitch with {count} pairs")));
                }
                let mut pairs = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let key = r.i32()?;
                    pairs.push((key, branch_target(offset, r.i32()? as i64, code_len)?));
                }
                RawInsn::LookupSwitch { default, pairs }
            }
            OperandKind::Field => {
                let (owner, name, desc, _) = pool.member_ref(r.u16()?)?;
                RawInsn::Resolved(Insn::Field { op, owner, name, desc })
            }
            OperandKind::Method => {
                let (owner, name, desc, interface) = pool.member_ref(r.u16()?)?;
                if op == opcode::INVOKEINTERFACE {
                    r.skip(2)?;
                }
                RawInsn::Resolved(Insn::Method { op, owner, name, desc, interface })
            }
            OperandKind::InvokeDynamic => {
                let (name, desc, bsm, args) = pool.invoke_dynamic(r.u16()?)?;
                r.skip(2)?;
                RawInsn::Resolved(Insn::InvokeDynamic { name, desc, bsm, args })
            }
            OperandKind::Type => RawInsn::Resolved(Insn::Type { op, class: pool.class_name(r.u16()?)? }),
            OperandKind::MultiANewArray => {
                let desc = pool.class_name(r.u16()?)?;
                RawInsn::Resolved(Insn::MultiANewArray { desc, dims: r.u8()? })
            }
            OperandKind::Wide => {
                let inner = r.u8()?;
                if inner == opcode::IINC {
                    RawInsn::Resolved(Insn::Iinc { var: r.u16()?, incr: r.i16()? })
                } else if matches!(opcode::operand_kind(inner), Some(OperandKind::Var)) {
                    RawInsn::Resolved(Insn::Var { op: inner, var: r.u16()? })
                } else {
                    return Err(DecodeError::UnknownOpcode { opcode: inner, offset: offset + 1 });
                }
            }
        };
        out.push((offset, insn));
    }
    Ok(out)
}

fn read_verification_type(
    r: &mut Reader<'_>,
    pool: &ConstantPool,
) -> Result<RawFrameType, DecodeError> {
    Ok(RawFrameType::Resolved(match r.u8()? {
        0 => FrameType::Top,
        1 => FrameType::Integer,
        2 => FrameType::Float,
        3 => FrameType::Double,
        4 => FrameType::Long,
        5 => FrameType::Null,
        6 => FrameType::UninitializedThis,
        7 => FrameType::Object(pool.class_name(r.u16()?)?),
        8 => return Ok(RawFrameType::Uninitialized(r.u16()? as usize)),
        other => return Err(bad_attr("StackMapTable", format!("verification tag {other}"))),
    }))
}

fn read_verification_types(
    r: &mut Reader<'_>,
    count: usize,
    pool: &ConstantPool,
) -> Result<Vec<RawFrameType>, DecodeError> {
    (0..count).map(|_| read_verification_type(r, pool)).collect()
}

/// Expands a `StackMapTable` into full frames, each still at a byte offset.
fn parse_stack_map(
    data: &[u8],
    initial: Vec<FrameType>,
    pool: &ConstantPool,
) -> Result<Vec<RawFrame>, DecodeError> {
    let mut r = Reader::new(data);
    let count = r.u16()?;
    let mut frames: Vec<RawFrame> = Vec::with_capacity(count as usize);
    let mut locals: Vec<RawFrameType> = initial.into_iter().map(RawFrameType::Resolved).collect();
    let mut offset: Option<usize> = None;
    for _ in 0..count {
        let frame_type = r.u8()?;
        let (delta, stack) = match frame_type {
            0..=63 => (frame_type as usize, Vec::new()),
            64..=127 => ((frame_type - 64) as usize, read_verification_types(&mut r, 1, pool)?),
            247 => {
                let delta = r.u16()? as usize;
                (delta, read_verification_types(&mut r, 1, pool)?)
            }
            248..=250 => {
                let delta = r.u16()? as usize;
                let chop = (251 - frame_type) as usize;
                if chop > locals.len() {
                    return Err(bad_attr("StackMapTable", "chop below zero locals"));
                }
                locals.truncate(locals.len() - chop);
                (delta, Vec::new())
            }
            251 => (r.u16()? as usize, Vec::new()),
            252..=254 => {
                let delta = r.u16()? as usize;
                locals.extend(read_verification_types(&mut r, (frame_type - 251) as usize, pool)?);
                (delta, Vec::new())
            }
            255 => {
                let delta = r.u16()? as usize;
                let n_locals = r.u16()? as usize;
                locals = read_verification_types(&mut r, n_locals, pool)?;
                let n_stack = r.u16()? as usize;
                (delta, read_verification_types(&mut r, n_stack, pool)?)
            }
            other => return Err(bad_attr("StackMapTable", format!("reserved frame type {other}"))),
        };
        let at = match offset {
            None => delta,
            Some(prev) => prev + delta + 1,
        };
        offset = Some(at);
        frames.push(RawFrame { offset: at, locals: clone_raw(&locals), stack });
    }
    Ok(frames)
}

fn clone_raw(types: &[RawFrameType]) -> Vec<RawFrameType> {
    types
        .iter()
        .map(|t| match t {
            RawFrameType::Resolved(ft) => RawFrameType::Resolved(ft.clone()),
            RawFrameType::Uninitialized(o) => RawFrameType::Uninitialized(*o),
        })
        .collect()
}

struct RawLocal {
    start: usize,
    end: usize,
    name: String,
    desc: String,
    index: u16,
}

fn decode_code(data: &[u8], seed: &FrameSeed<'_>, pool: &ConstantPool) -> Result<Code, DecodeError> {
    let mut r = Reader::new(data);
    let max_stack = r.u16()?;
    let max_locals = r.u16()?;
    let code_len = r.u32()? as usize;
    let bytes = r.bytes(code_len)?;
    let raw_insns = decode_instructions(bytes, pool)?;

    let mut handlers = Vec::new();
    for _ in 0..r.u16()? {
        let start = r.u16()? as usize;
        let end = r.u16()? as usize;
        let handler = r.u16()? as usize;
        let catch_type = pool.optional_class_name(r.u16()?)?;
        handlers.push((start, end, handler, catch_type));
    }

    let mut lines: BTreeMap<usize, Vec<u16>> = BTreeMap::new();
    let mut locals: Vec<RawLocal> = Vec::new();
    let mut local_signatures: Vec<(usize, usize, u16, String)> = Vec::new();
    let mut frames = Vec::new();
    for attr in read_attributes(&mut r, pool)? {
        let mut a = Reader::new(attr.data);
        match attr.name {
            "LineNumberTable" => {
                for _ in 0..a.u16()? {
                    let pc = a.u16()? as usize;
                    lines.entry(pc).or_default().push(a.u16()?);
                }
            }
            "LocalVariableTable" => {
                for _ in 0..a.u16()? {
                    let start = a.u16()? as usize;
                    let len = a.u16()? as usize;
                    let name = pool.utf8(a.u16()?)?.to_string();
                    let desc = pool.utf8(a.u16()?)?.to_string();
                    let index = a.u16()?;
                    locals.push(RawLocal { start, end: start + len, name, desc, index });
                }
            }
            "LocalVariableTypeTable" => {
                for _ in 0..a.u16()? {
                    let start = a.u16()? as usize;
                    let len = a.u16()? as usize;
                    a.skip(2)?;
                    let signature = pool.utf8(a.u16()?)?.to_string();
                    let index = a.u16()?;
                    local_signatures.push((start, start + len, index, signature));
                }
            }
            "StackMapTable" => frames = parse_stack_map(attr.data, seed.initial_locals()?, pool)?,
            // Code-level type annotations and unknown attributes hold offsets that do not
            // survive re-layout.
            _ => {}
        }
    }

    let boundaries: BTreeSet<usize> = raw_insns.iter().map(|(o, _)| *o).collect();
    let is_boundary = |o: usize| boundaries.contains(&o);
    let is_boundary_or_end = |o: usize| o == code_len || boundaries.contains(&o);

    let mut wanted: BTreeSet<usize> = BTreeSet::new();
    for (_, insn) in &raw_insns {
        match insn {
            RawInsn::Jump { target, .. } => {
                wanted.insert(*target);
            }
            RawInsn::TableSwitch { default, targets, .. } => {
                wanted.insert(*default);
                wanted.extend(targets.iter().copied());
            }
            RawInsn::LookupSwitch { default, pairs } => {
                wanted.insert(*default);
                wanted.extend(pairs.iter().map(|(_, t)| *t));
            }
            RawInsn::Resolved(_) => {}
        }
    }
    for (start, end, handler, _) in &handlers {
        if !is_boundary(*start) || !is_boundary_or_end(*end) || !is_boundary(*handler) || start >= end {
            return Err(bad_attr("Code", format!("bad exception range {start}..{end} -> {handler}")));
        }
        wanted.extend([*start, *end, *handler]);
    }
    locals.retain(|l| is_boundary(l.start) && is_boundary_or_end(l.end));
    for local in &locals {
        wanted.extend([local.start, local.end]);
    }
    lines.retain(|pc, _| is_boundary(*pc));
    for frame in &frames {
        if !is_boundary(frame.offset) {
            return Err(bad_attr("StackMapTable", format!("frame at offset {}", frame.offset)));
        }
        wanted.insert(frame.offset);
        for t in frame.locals.iter().chain(&frame.stack) {
            if let RawFrameType::Uninitialized(o) = t {
                if !is_boundary(*o) {
                    return Err(bad_attr("StackMapTable", format!("uninitialized at offset {o}")));
                }
                wanted.insert(*o);
            }
        }
    }

    let mut code = Code::new(max_locals);
    code.max_stack = Some(max_stack);
    let labels: BTreeMap<usize, Label> = wanted.into_iter().map(|o| (o, code.new_label())).collect();
    let label = |o: usize| labels[&o];

    for (offset, raw_insn) in raw_insns {
        if let Some(l) = labels.get(&offset) {
            code.insns.push(Insn::Label(*l));
        }
        if let Some(numbers) = lines.get(&offset) {
            code.insns.extend(numbers.iter().map(|n| Insn::Line(*n)));
        }
        code.insns.push(match raw_insn {
            RawInsn::Resolved(insn) => insn,
            RawInsn::Jump { op, target } => Insn::Jump { op, target: label(target) },
            RawInsn::TableSwitch { low, high, default, targets } => Insn::TableSwitch {
                low,
                high,
                default: label(default),
                targets: targets.into_iter().map(label).collect(),
            },
            RawInsn::LookupSwitch { default, pairs } => Insn::LookupSwitch {
                default: label(default),
                pairs: pairs.into_iter().map(|(k, t)| (k, label(t))).collect(),
            },
        });
    }
    if let Some(l) = labels.get(&code_len) {
        code.insns.push(Insn::Label(*l));
    }

    code.try_catches = handlers
        .into_iter()
        .map(|(start, end, handler, catch_type)| TryCatch {
            start: label(start),
            end: label(end),
            handler: label(handler),
            catch_type,
        })
        .collect();
    code.local_vars = locals
        .into_iter()
        .map(|l| {
            let signature = local_signatures
                .iter()
                .find(|(s, e, i, _)| *s == l.start && *e == l.end && *i == l.index)
                .map(|(_, _, _, sig)| sig.clone());
            LocalVar {
                name: l.name,
                desc: l.desc,
                signature,
                start: label(l.start),
                end: label(l.end),
                index: l.index,
            }
        })
        .collect();
    let resolve = |types: Vec<RawFrameType>| -> Vec<FrameType> {
        types
            .into_iter()
            .map(|t| match t {
                RawFrameType::Resolved(ft) => ft,
                RawFrameType::Uninitialized(o) => FrameType::Uninitialized(label(o)),
            })
            .collect()
    };
    code.frames = frames
        .into_iter()
        .map(|f| (label(f.offset), DeclaredFrame { locals: resolve(f.locals), stack: resolve(f.stack) }))
        .collect();
    Ok(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_magic() {
        let err = decode_class(&[0xde, 0xad, 0xbe, 0xef, 0, 0, 0, 52]).unwrap_err();
        assert!(matches!(err, DecodeError::BadMagic(_)));
        assert!(err.to_string().contains("deadbeef"));
    }

    #[test]
    fn truncated_input_is_eof() {
        let err = decode_class(&[0xca, 0xfe, 0xba, 0xbe, 0, 0]).unwrap_err();
        assert!(matches!(err, DecodeError::UnexpectedEof(_)));
        assert!(!is_class_file(b"PK\x03\x04"));
    }

    #[test]
    fn switch_padding_is_relative_to_code_start() {
        // nop; tableswitch (pad 2) default=+19 low=0 high=0 [+19]; return
        let mut code = vec![opcode::NOP, opcode::TABLESWITCH, 0, 0];
        code.extend_from_slice(&19i32.to_be_bytes());
        code.extend_from_slice(&0i32.to_be_bytes());
        code.extend_from_slice(&0i32.to_be_bytes());
        code.extend_from_slice(&19i32.to_be_bytes());
        code.push(opcode::RETURN);
        let pool = ConstantPool::default();
        let insns = decode_instructions(&code, &pool).unwrap();
        assert_eq!(insns.len(), 3);
        match &insns[1].1 {
            RawInsn::TableSwitch { default, targets, .. } => {
                assert_eq!(*default, 20);
                assert_eq!(targets, &vec![20]);
            }
            _ => panic!("expected tableswitch"),
        }
    }

    #[test]
    fn wide_forms_fold_into_plain_instructions() {
        let code = [opcode::WIDE, opcode::IINC, 0x01, 0x00, 0xff, 0xff, 0x2b, opcode::RETURN];
        let insns = decode_instructions(&code, &ConstantPool::default()).unwrap();
        assert!(matches!(insns[0].1, RawInsn::Resolved(Insn::Iinc { var: 256, incr: -1 })));
        assert!(matches!(
            insns[1].1,
            RawInsn::Resolved(Insn::Var { op: opcode::ALOAD, var: 1 })
        ));
    }

    #[test]
    fn jump_outside_code_is_rejected() {
        let code = [opcode::GOTO, 0x00, 0x10];
        let err = decode_instructions(&code, &ConstantPool::default()).err().unwrap();
        assert!(matches!(err, DecodeError::BadBranchTarget { target: 16, code_len: 3 }));
    }
}
