//! Constant pool reading and building.
//!
//! [`ConstantPool`] is the read side: it holds the raw entries of a decoded class and resolves
//! indices into strings, references and [`Loadable`] values. [`PoolBuilder`] is the write side:
//! the encoder interns every constant it needs and gets back deduplicated indices.

use crate::{
    insn::{ConstantDynamic, Handle, Loadable},
    mutf8,
    reader::Reader,
};
use jarcloak_utils::errors::{DecodeError, EncodeError};
use std::collections::HashMap;

/// Constant pool tags.
#[allow(missing_docs)]
pub mod tag {
    pub const UTF8: u8 = 1;
    pub const INTEGER: u8 = 3;
    pub const FLOAT: u8 = 4;
    pub const LONG: u8 = 5;
    pub const DOUBLE: u8 = 6;
    pub const CLASS: u8 = 7;
    pub const STRING: u8 = 8;
    pub const FIELD_REF: u8 = 9;
    pub const METHOD_REF: u8 = 10;
    pub const INTERFACE_METHOD_REF: u8 = 11;
    pub const NAME_AND_TYPE: u8 = 12;
    pub const METHOD_HANDLE: u8 = 15;
    pub const METHOD_TYPE: u8 = 16;
    pub const DYNAMIC: u8 = 17;
    pub const INVOKE_DYNAMIC: u8 = 18;
    pub const MODULE: u8 = 19;
    pub const PACKAGE: u8 = 20;
}

/// Deepest nesting of dynamic constants inside bootstrap arguments that is resolved.
const MAX_DYNAMIC_DEPTH: usize = 32;

/// One raw constant pool entry.
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    /// Index 0 and the slot after a long or double.
    Unusable,
    Utf8(String),
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    Class(u16),
    String(u16),
    FieldRef { class: u16, name_and_type: u16 },
    MethodRef { class: u16, name_and_type: u16 },
    InterfaceMethodRef { class: u16, name_and_type: u16 },
    NameAndType { name: u16, desc: u16 },
    MethodHandle { kind: u8, reference: u16 },
    MethodType(u16),
    Dynamic { bootstrap: u16, name_and_type: u16 },
    InvokeDynamic { bootstrap: u16, name_and_type: u16 },
    Module(u16),
    Package(u16),
}

/// One `BootstrapMethods` entry, still in index form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapMethod {
    /// Pool index of the bootstrap method handle.
    pub handle: u16,
    /// Pool indices of the static arguments.
    pub args: Vec<u16>,
}

/// The constant pool of a class being decoded.
#[derive(Debug, Clone, Default)]
pub struct ConstantPool {
    entries: Vec<Constant>,
    bootstrap: Vec<BootstrapMethod>,
}

impl ConstantPool {
    /// Parses `constant_pool_count` and the entries that follow it.
    pub(crate) fn parse(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let count = r.u16()?;
        let mut entries = Vec::with_capacity(count as usize);
        entries.push(Constant::Unusable);
        let mut index = 1u16;
        while index < count {
            let t = r.u8()?;
            let constant = match t {
                tag::UTF8 => {
                    let len = r.u16()? as usize;
                    let bytes = r.bytes(len)?;
                    Constant::Utf8(mutf8::decode(bytes).ok_or(DecodeError::InvalidUtf8(index))?)
                }
                tag::INTEGER => Constant::Integer(r.i32()?),
                tag::FLOAT => Constant::Float(f32::from_bits(r.u32()?)),
                tag::LONG => Constant::Long(r.u64()? as i64),
                tag::DOUBLE => Constant::Double(f64::from_bits(r.u64()?)),
                tag::CLASS => Constant::Class(r.u16()?),
                tag::STRING => Constant::String(r.u16()?),
                tag::FIELD_REF => Constant::FieldRef { class: r.u16()?, name_and_type: r.u16()? },
                tag::METHOD_REF => Constant::MethodRef { class: r.u16()?, name_and_type: r.u16()? },
                tag::INTERFACE_METHOD_REF => {
                    Constant::InterfaceMethodRef { class: r.u16()?, name_and_type: r.u16()? }
                }
                tag::NAME_AND_TYPE => Constant::NameAndType { name: r.u16()?, desc: r.u16()? },
                tag::METHOD_HANDLE => Constant::MethodHandle { kind: r.u8()?, reference: r.u16()? },
                tag::METHOD_TYPE => Constant::MethodType(r.u16()?),
                tag::DYNAMIC => Constant::Dynamic { bootstrap: r.u16()?, name_and_type: r.u16()? },
                tag::INVOKE_DYNAMIC => {
                    Constant::InvokeDynamic { bootstrap: r.u16()?, name_and_type: r.u16()? }
                }
                tag::MODULE => Constant::Module(r.u16()?),
                tag::PACKAGE => Constant::Package(r.u16()?),
                _ => return Err(DecodeError::BadConstantTag { index, tag: t }),
            };
            let wide = matches!(constant, Constant::Long(_) | Constant::Double(_));
            entries.push(constant);
            index += 1;
            if wide {
                entries.push(Constant::Unusable);
                index = index.saturating_add(1);
            }
        }
        Ok(Self { entries, bootstrap: Vec::new() })
    }

    /// Installs the `BootstrapMethods` table used to resolve dynamic constants.
    pub(crate) fn set_bootstrap(&mut self, bootstrap: Vec<BootstrapMethod>) {
        self.bootstrap = bootstrap;
    }

    /// Slot count, including the unusable slot 0 and the second slots of longs and doubles.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.len() <= 1
    }

    pub fn get(&self, index: u16) -> Option<&Constant> {
        self.entries.get(index as usize)
    }

    fn bad(index: u16, expected: &'static str) -> DecodeError {
        DecodeError::BadConstantIndex { index, expected }
    }

    /// The decoded string of a `CONSTANT_Utf8` entry.
    pub fn utf8(&self, index: u16) -> Result<&str, DecodeError> {
        match self.get(index) {
            Some(Constant::Utf8(s)) => Ok(s),
            _ => Err(Self::bad(index, "Utf8")),
        }
    }

    /// Like [`utf8`](Self::utf8) but index 0 means "absent".
    pub fn optional_utf8(&self, index: u16) -> Result<Option<String>, DecodeError> {
        if index == 0 {
            Ok(None)
        } else {
            self.utf8(index).map(|s| Some(s.to_string()))
        }
    }

    /// Internal name of a `CONSTANT_Class` entry.
    pub fn class_name(&self, index: u16) -> Result<String, DecodeError> {
        match self.get(index) {
            Some(Constant::Class(name)) => Ok(self.utf8(*name)?.to_string()),
            _ => Err(Self::bad(index, "Class")),
        }
    }

    /// Like [`Self::class_name`], with index 0 meaning absent.
    pub fn optional_class_name(&self, index: u16) -> Result<Option<String>, DecodeError> {
        if index == 0 {
            Ok(None)
        } else {
            self.class_name(index).map(Some)
        }
    }

    /// Name and descriptor of a `CONSTANT_NameAndType` entry.
    pub fn name_and_type(&self, index: u16) -> Result<(String, String), DecodeError> {
        match self.get(index) {
            Some(Constant::NameAndType { name, desc }) => {
                Ok((self.utf8(*name)?.to_string(), self.utf8(*desc)?.to_string()))
            }
            _ => Err(Self::bad(index, "NameAndType")),
        }
    }

    /// Resolves a field, method or interface-method reference into
    /// `(owner, name, descriptor, is_interface)`.
    pub fn member_ref(&self, index: u16) -> Result<(String, String, String, bool), DecodeError> {
        let (class, nat, interface) = match self.get(index) {
            Some(Constant::FieldRef { class, name_and_type })
            | Some(Constant::MethodRef { class, name_and_type }) => (*class, *name_and_type, false),
            Some(Constant::InterfaceMethodRef { class, name_and_type }) => {
                (*class, *name_and_type, true)
            }
            _ => return Err(Self::bad(index, "member reference")),
        };
        let owner = self.class_name(class)?;
        let (name, desc) = self.name_and_type(nat)?;
        Ok((owner, name, desc, interface))
    }

    pub fn handle(&self, index: u16) -> Result<Handle, DecodeError> {
        match self.get(index) {
            Some(Constant::MethodHandle { kind, reference }) => {
                let (owner, name, desc, is_interface) = self.member_ref(*reference)?;
                Ok(Handle { kind: *kind, owner, name, desc, is_interface })
            }
            _ => Err(Self::bad(index, "MethodHandle")),
        }
    }

    /// Resolves a loadable constant (anything `ldc` or a bootstrap argument may name).
    pub fn loadable(&self, index: u16) -> Result<Loadable, DecodeError> {
        self.loadable_at_depth(index, 0)
    }

    fn loadable_at_depth(&self, index: u16, depth: usize) -> Result<Loadable, DecodeError> {
        Ok(match self.get(index) {
            Some(Constant::Integer(v)) => Loadable::Int(*v),
            Some(Constant::Float(v)) => Loadable::Float(*v),
            Some(Constant::Long(v)) => Loadable::Long(*v),
            Some(Constant::Double(v)) => Loadable::Double(*v),
            Some(Constant::String(s)) => Loadable::String(self.utf8(*s)?.to_string()),
            Some(Constant::Class(name)) => Loadable::Class(self.utf8(*name)?.to_string()),
            Some(Constant::MethodType(desc)) => Loadable::MethodType(self.utf8(*desc)?.to_string()),
            Some(Constant::MethodHandle { .. }) => Loadable::MethodHandle(self.handle(index)?),
            Some(Constant::Dynamic { bootstrap, name_and_type }) => {
                if depth >= MAX_DYNAMIC_DEPTH {
                    return Err(Self::bad(index, "bounded dynamic constant"));
                }
                let (name, desc) = self.name_and_type(*name_and_type)?;
                let (bsm, args) = self.bootstrap_at_depth(*bootstrap, depth + 1)?;
                Loadable::Dynamic(Box::new(ConstantDynamic { name, desc, bsm, args }))
            }
            _ => return Err(Self::bad(index, "loadable constant")),
        })
    }

    /// Resolves bootstrap-method entry `index` into its handle and arguments.
    pub fn bootstrap(&self, index: u16) -> Result<(Handle, Vec<Loadable>), DecodeError> {
        self.bootstrap_at_depth(index, 0)
    }

    fn bootstrap_at_depth(
        &self,
        index: u16,
        depth: usize,
    ) -> Result<(Handle, Vec<Loadable>), DecodeError> {
        let entry = self.bootstrap.get(index as usize).ok_or_else(|| DecodeError::BadAttribute {
            name: "BootstrapMethods".into(),
            reason: format!("no entry {index}"),
        })?;
        let handle = self.handle(entry.handle)?;
        let args = entry
            .args
            .iter()
            .map(|arg| self.loadable_at_depth(*arg, depth))
            .collect::<Result<Vec<_>, _>>()?;
        Ok((handle, args))
    }

    /// Resolves an `invokedynamic` operand into `(name, descriptor, bootstrap, args)`.
    pub fn invoke_dynamic(
        &self,
        index: u16,
    ) -> Result<(String, String, Handle, Vec<Loadable>), DecodeError> {
        match self.get(index) {
            Some(Constant::InvokeDynamic { bootstrap, name_and_type }) => {
                let (name, desc) = self.name_and_type(*name_and_type)?;
                let (bsm, args) = self.bootstrap(*bootstrap)?;
                Ok((name, desc, bsm, args))
            }
            _ => Err(Self::bad(index, "InvokeDynamic")),
        }
    }
}

/// Deduplication key of a pool entry; floats are keyed by their bits.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum PoolKey {
    Utf8(String),
    Integer(i32),
    Float(u32),
    Long(i64),
    Double(u64),
    Class(u16),
    String(u16),
    FieldRef(u16, u16),
    MethodRef(u16, u16),
    InterfaceMethodRef(u16, u16),
    NameAndType(u16, u16),
    MethodHandle(u8, u16),
    MethodType(u16),
    Dynamic(u16, u16),
    InvokeDynamic(u16, u16),
}

/// Builds a fresh, deduplicated constant pool plus its `BootstrapMethods` table.
#[derive(Debug, Default)]
pub struct PoolBuilder {
    entries: Vec<PoolKey>,
    index: HashMap<PoolKey, u16>,
    next: u32,
    bootstrap: Vec<(u16, Vec<u16>)>,
    bootstrap_index: HashMap<(u16, Vec<u16>), u16>,
}

impl PoolBuilder {
    /// An empty pool.
    pub fn new() -> Self {
        Self { next: 1, ..Self::default() }
    }

    fn intern(&mut self, key: PoolKey) -> Result<u16, EncodeError> {
        if let Some(index) = self.index.get(&key) {
            return Ok(*index);
        }
        let width = if matches!(key, PoolKey::Long(_) | PoolKey::Double(_)) { 2 } else { 1 };
        if self.next + width > u16::MAX as u32 {
            return Err(EncodeError::ConstantPoolOverflow);
        }
        let index = self.next as u16;
        self.next += width;
        self.entries.push(key.clone());
        self.index.insert(key, index);
        Ok(index)
    }

    /// Interns a string as modified UTF-8.
    pub fn utf8(&mut self, s: &str) -> Result<u16, EncodeError> {
        let len = mutf8::encode(s).len();
        if len > u16::MAX as usize {
            return Err(EncodeError::StringTooLong(len));
        }
        self.intern(PoolKey::Utf8(s.to_string()))
    }

    pub fn class(&mut self, name: &str) -> Result<u16, EncodeError> {
        let name = self.utf8(name)?;
        self.intern(PoolKey::Class(name))
    }

    pub fn string(&mut self, value: &str) -> Result<u16, EncodeError> {
        let value = self.utf8(value)?;
        self.intern(PoolKey::String(value))
    }

    pub fn integer(&mut self, value: i32) -> Result<u16, EncodeError> {
        self.intern(PoolKey::Integer(value))
    }

    pub fn float(&mut self, value: f32) -> Result<u16, EncodeError> {
        self.intern(PoolKey::Float(value.to_bits()))
    }

    pub fn long(&mut self, value: i64) -> Result<u16, EncodeError> {
        self.intern(PoolKey::Long(value))
    }

    pub fn double(&mut self, value: f64) -> Result<u16, EncodeError> {
        self.intern(PoolKey::Double(value.to_bits()))
    }

    pub fn name_and_type(&mut self, name: &str, desc: &str) -> Result<u16, EncodeError> {
        let name = self.utf8(name)?;
        let desc = self.utf8(desc)?;
        self.intern(PoolKey::NameAndType(name, desc))
    }

    pub fn field_ref(&mut self, owner: &str, name: &str, desc: &str) -> Result<u16, EncodeError> {
        let class = self.class(owner)?;
        let nat = self.name_and_type(name, desc)?;
        self.intern(PoolKey::FieldRef(class, nat))
    }

    pub fn method_ref(
        &mut self,
        owner: &str,
        name: &str,
        desc: &str,
        interface: bool,
    ) -> Result<u16, EncodeError> {
        let class = self.class(owner)?;
        let nat = self.name_and_type(name, desc)?;
        if interface {
            self.intern(PoolKey::InterfaceMethodRef(class, nat))
        } else {
            self.intern(PoolKey::MethodRef(class, nat))
        }
    }

    pub fn method_type(&mut self, desc: &str) -> Result<u16, EncodeError> {
        let desc = self.utf8(desc)?;
        self.intern(PoolKey::MethodType(desc))
    }

    pub fn handle(&mut self, handle: &Handle) -> Result<u16, EncodeError> {
        let reference = if handle.is_field() {
            self.field_ref(&handle.owner, &handle.name, &handle.desc)?
        } else {
            self.method_ref(&handle.owner, &handle.name, &handle.desc, handle.is_interface)?
        };
        self.intern(PoolKey::MethodHandle(handle.kind, reference))
    }

    /// Interns any value `ldc` can push.
    pub fn loadable(&mut self, value: &Loadable) -> Result<u16, EncodeError> {
        match value {
            Loadable::Int(v) => self.integer(*v),
            Loadable::Float(v) => self.float(*v),
            Loadable::Long(v) => self.long(*v),
            Loadable::Double(v) => self.double(*v),
            Loadable::String(s) => self.string(s),
            Loadable::Class(name) => self.class(name),
            Loadable::MethodType(desc) => self.method_type(desc),
            Loadable::MethodHandle(handle) => self.handle(handle),
            Loadable::Dynamic(dynamic) => {
                let bootstrap = self.bootstrap(&dynamic.bsm, &dynamic.args)?;
                let nat = self.name_and_type(&dynamic.name, &dynamic.desc)?;
                self.intern(PoolKey::Dynamic(bootstrap, nat))
            }
        }
    }

    /// Interns a call site along with its bootstrap method entry.
    pub fn invoke_dynamic(
        &mut self,
        name: &str,
        desc: &str,
        bsm: &Handle,
        args: &[Loadable],
    ) -> Result<u16, EncodeError> {
        let bootstrap = self.bootstrap(bsm, args)?;
        let nat = self.name_and_type(name, desc)?;
        self.intern(PoolKey::InvokeDynamic(bootstrap, nat))
    }

    /// Interns a bootstrap-method entry and returns its table index.
    pub fn bootstrap(&mut self, bsm: &Handle, args: &[Loadable]) -> Result<u16, EncodeError> {
        let handle = self.handle(bsm)?;
        let args = args.iter().map(|a| self.loadable(a)).collect::<Result<Vec<_>, _>>()?;
        let key = (handle, args);
        if let Some(index) = self.bootstrap_index.get(&key) {
            return Ok(*index);
        }
        let index = u16::try_from(self.bootstrap.len()).map_err(|_| EncodeError::ConstantPoolOverflow)?;
        self.bootstrap.push(key.clone());
        self.bootstrap_index.insert(key, index);
        Ok(index)
    }

    /// Whether a `BootstrapMethods` attribute has to be written.
    pub fn has_bootstrap_methods(&self) -> bool {
        !self.bootstrap.is_empty()
    }

    /// Body of the `BootstrapMethods` attribute (without name and length).
    pub fn bootstrap_attribute(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&(self.bootstrap.len() as u16).to_be_bytes());
        for (handle, args) in &self.bootstrap {
            out.extend_from_slice(&handle.to_be_bytes());
            out.extend_from_slice(&(args.len() as u16).to_be_bytes());
            for arg in args {
                out.extend_from_slice(&arg.to_be_bytes());
            }
        }
        out
    }

    /// Writes `constant_pool_count` followed by every entry.
    pub fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&(self.next as u16).to_be_bytes());
        for key in &self.entries {
            match key {
                PoolKey::Utf8(s) => {
                    let bytes = mutf8::encode(s);
                    out.push(tag::UTF8);
                    out.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
                    out.extend_from_slice(&bytes);
                }
                PoolKey::Integer(v) => {
                    out.push(tag::INTEGER);
                    out.extend_from_slice(&v.to_be_bytes());
                }
                PoolKey::Float(bits) => {
                    out.push(tag::FLOAT);
                    out.extend_from_slice(&bits.to_be_bytes());
                }
                PoolKey::Long(v) => {
                    out.push(tag::LONG);
                    out.extend_from_slice(&v.to_be_bytes());
                }
                PoolKey::Double(bits) => {
                    out.push(tag::DOUBLE);
                    out.extend_from_slice(&bits.to_be_bytes());
                }
                PoolKey::Class(i) => push_u16_entry(out, tag::CLASS, *i),
                PoolKey::String(i) => push_u16_entry(out, tag::STRING, *i),
                PoolKey::MethodType(i) => push_u16_entry(out, tag::METHOD_TYPE, *i),
                PoolKey::FieldRef(a, b) => push_pair_entry(out, tag::FIELD_REF, *a, *b),
                PoolKey::MethodRef(a, b) => push_pair_entry(out, tag::METHOD_REF, *a, *b),
                PoolKey::InterfaceMethodRef(a, b) => {
                    push_pair_entry(out, tag::INTERFACE_METHOD_REF, *a, *b)
                }
                PoolKey::NameAndType(a, b) => push_pair_entry(out, tag::NAME_AND_TYPE, *a, *b),
                PoolKey::Dynamic(a, b) => push_pair_entry(out, tag::DYNAMIC, *a, *b),
                PoolKey::InvokeDynamic(a, b) => push_pair_entry(out, tag::INVOKE_DYNAMIC, *a, *b),
                PoolKey::MethodHandle(kind, reference) => {
                    out.push(tag::METHOD_HANDLE);
                    out.push(*kind);
                    out.extend_from_slice(&reference.to_be_bytes());
                }
            }
        }
    }
}

fn push_u16_entry(out: &mut Vec<u8>, t: u8, index: u16) {
    out.push(t);
    out.extend_from_slice(&index.to_be_bytes());
}

fn push_pair_entry(out: &mut Vec<u8>, t: u8, a: u16, b: u16) {
    out.push(t);
    out.extend_from_slice(&a.to_be_bytes());
    out.extend_from_slice(&b.to_be_bytes());
}
