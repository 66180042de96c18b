//! Symbolic class model.
//!
//! Every constant-pool reference is resolved to the string or value it names, so transforms
//! can rename freely; the encoder builds a fresh constant pool from whatever is left.

use crate::insn::{Code, Loadable};
use serde::Serialize;

/// Access and property flags (`ACC_*`).
#[allow(missing_docs)]
pub mod access {
    pub const PUBLIC: u16 = 0x0001;
    pub const PRIVATE: u16 = 0x0002;
    pub const PROTECTED: u16 = 0x0004;
    pub const STATIC: u16 = 0x0008;
    pub const FINAL: u16 = 0x0010;
    pub const SUPER: u16 = 0x0020;
    pub const BRIDGE: u16 = 0x0040;
    pub const VARARGS: u16 = 0x0080;
    pub const NATIVE: u16 = 0x0100;
    pub const INTERFACE: u16 = 0x0200;
    pub const ABSTRACT: u16 = 0x0400;
    pub const SYNTHETIC: u16 = 0x1000;
    pub const ANNOTATION: u16 = 0x2000;
    pub const ENUM: u16 = 0x4000;
}

/// An annotation instance.
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    /// Field descriptor of the annotation type.
    pub desc: String,
    /// Element name and value pairs, in declaration order.
    pub values: Vec<(String, ElementValue)>,
}

/// An annotation element value.
#[derive(Debug, Clone, PartialEq)]
pub enum ElementValue {
    /// Tags `B C I S Z D F J s`; `s` strings are stored as `Loadable::String`.
    Const { tag: u8, value: Loadable },
    Enum { desc: String, name: String },
    /// Return descriptor of the class literal (`V` for `void.class`).
    Class(String),
    Annotation(Annotation),
    Array(Vec<ElementValue>),
}

/// A type annotation on a class, field or method signature.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeAnnotation {
    /// `target_type` byte of the `type_annotation` structure.
    pub target_type: u8,
    /// Raw `target_info`; class/field/method targets carry no pool indices.
    pub target_info: Vec<u8>,
    /// Raw `type_path` including its length byte.
    pub type_path: Vec<u8>,
    pub annotation: Annotation,
}

/// Annotation attributes shared by classes, fields, methods and record components.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Annotations {
    pub visible: Vec<Annotation>,
    pub invisible: Vec<Annotation>,
    pub visible_type: Vec<TypeAnnotation>,
    pub invisible_type: Vec<TypeAnnotation>,
}

impl Annotations {
    /// No annotations of any kind.
    pub fn is_empty(&self) -> bool {
        self.visible.is_empty()
            && self.invisible.is_empty()
            && self.visible_type.is_empty()
            && self.invisible_type.is_empty()
    }

    /// True if an annotation of the given descriptor is attached, visible or not.
    pub fn has(&self, desc: &str) -> bool {
        self.visible.iter().chain(&self.invisible).any(|a| a.desc == desc)
    }
}

/// An attribute the codec does not model; written back byte-for-byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawAttribute {
    pub name: String,
    pub data: Vec<u8>,
}

/// One `InnerClasses` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InnerClass {
    /// Internal name of the nested class.
    pub inner: String,
    /// Enclosing class for member classes; `None` for local and anonymous ones.
    pub outer: Option<String>,
    pub name: Option<String>,
    pub access: u16,
}

/// The `EnclosingMethod` attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnclosingMethod {
    /// Class whose method encloses this one.
    pub owner: String,
    /// Name and descriptor, absent for classes enclosed by initializers.
    pub method: Option<(String, String)>,
}

/// One `Record` component.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordComponent {
    pub name: String,
    pub desc: String,
    pub signature: Option<String>,
    pub annotations: Annotations,
    /// Attributes kept as opaque bytes.
    pub attributes: Vec<RawAttribute>,
}

/// One `MethodParameters` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodParameter {
    pub name: Option<String>,
    pub access: u16,
}

/// A declared field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldUnit {
    pub access: u16,
    pub name: String,
    pub desc: String,
    pub signature: Option<String>,
    /// `ConstantValue` attribute.
    pub constant_value: Option<Loadable>,
    pub annotations: Annotations,
    pub synthetic_attr: bool,
    pub deprecated: bool,
    pub attributes: Vec<RawAttribute>,
}

impl FieldUnit {
    /// A field with no attributes.
    pub fn new(access: u16, name: impl Into<String>, desc: impl Into<String>) -> Self {
        Self {
            access,
            name: name.into(),
            desc: desc.into(),
            signature: None,
            constant_value: None,
            annotations: Annotations::default(),
            synthetic_attr: false,
            deprecated: false,
            attributes: Vec::new(),
        }
    }

    /// `ACC_SYNTHETIC` or a `Synthetic` attribute.
    pub const fn is_synthetic(&self) -> bool {
        self.access & access::SYNTHETIC != 0 || self.synthetic_attr
    }
}

/// A declared method.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodUnit {
    pub access: u16,
    pub name: String,
    pub desc: String,
    pub signature: Option<String>,
    /// Internal names from the `Exceptions` attribute.
    pub exceptions: Vec<String>,
    /// `None` for abstract and native methods.
    pub code: Option<Code>,
    pub annotations: Annotations,
    pub visible_parameter_annotations: Option<Vec<Vec<Annotation>>>,
    pub invisible_parameter_annotations: Option<Vec<Vec<Annotation>>>,
    /// Default value of an annotation interface element.
    pub annotation_default: Option<ElementValue>,
    pub parameters: Option<Vec<MethodParameter>>,
    pub synthetic_attr: bool,
    pub deprecated: bool,
    pub attributes: Vec<RawAttribute>,
}

impl MethodUnit {
    /// A method with no body and no attributes.
    pub fn new(access: u16, name: impl Into<String>, desc: impl Into<String>) -> Self {
        Self {
            access,
            name: name.into(),
            desc: desc.into(),
            signature: None,
            exceptions: Vec::new(),
            code: None,
            annotations: Annotations::default(),
            visible_parameter_annotations: None,
            invisible_parameter_annotations: None,
            annotation_default: None,
            parameters: None,
            synthetic_attr: false,
            deprecated: false,
            attributes: Vec::new(),
        }
    }

    /// `name + descriptor`, the key used by the method rename tables.
    pub fn key(&self) -> String {
        format!("{}{}", self.name, self.desc)
    }

    pub const fn is_static(&self) -> bool {
        self.access & access::STATIC != 0
    }

    /// `ACC_SYNTHETIC` or a `Synthetic` attribute.
    pub const fn is_synthetic(&self) -> bool {
        self.access & access::SYNTHETIC != 0 || self.synthetic_attr
    }

    /// Constructors and static initializers.
    pub fn is_initializer(&self) -> bool {
        self.name == "<init>" || self.name == "<clinit>"
    }
}

/// One decoded class file.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassUnit {
    pub minor_version: u16,
    /// Class file major version; 52 is Java 8.
    pub major_version: u16,
    pub access: u16,
    pub name: String,
    /// `None` only for `java/lang/Object` and `module-info`.
    pub super_name: Option<String>,
    pub interfaces: Vec<String>,
    pub signature: Option<String>,
    pub source_file: Option<String>,
    pub inner_classes: Vec<InnerClass>,
    pub enclosing_method: Option<EnclosingMethod>,
    pub nest_host: Option<String>,
    pub nest_members: Vec<String>,
    pub permitted_subclasses: Vec<String>,
    /// Components of a record class.
    pub record: Option<Vec<RecordComponent>>,
    pub annotations: Annotations,
    pub synthetic_attr: bool,
    pub deprecated: bool,
    pub fields: Vec<FieldUnit>,
    pub methods: Vec<MethodUnit>,
    pub attributes: Vec<RawAttribute>,
}

impl ClassUnit {
    /// An empty class with the given identity and superclass.
    pub fn new(major_version: u16, access: u16, name: impl Into<String>, super_name: Option<&str>) -> Self {
        Self {
            minor_version: 0,
            major_version,
            access,
            name: name.into(),
            super_name: super_name.map(str::to_string),
            interfaces: Vec::new(),
            signature: None,
            source_file: None,
            inner_classes: Vec::new(),
            enclosing_method: None,
            nest_host: None,
            nest_members: Vec::new(),
            permitted_subclasses: Vec::new(),
            record: None,
            annotations: Annotations::default(),
            synthetic_attr: false,
            deprecated: false,
            fields: Vec::new(),
            methods: Vec::new(),
            attributes: Vec::new(),
        }
    }

    pub const fn is_interface(&self) -> bool {
        self.access & access::INTERFACE != 0
    }

    /// Looks a method up by exact name and descriptor.
    pub fn find_method(&self, name: &str, desc: &str) -> Option<&MethodUnit> {
        self.methods.iter().find(|m| m.name == name && m.desc == desc)
    }

    /// A short, serializable overview of the class.
    pub fn summary(&self) -> ClassSummary {
        ClassSummary {
            name: self.name.clone(),
            super_name: self.super_name.clone(),
            interfaces: self.interfaces.clone(),
            version: format!("{}.{}", self.major_version, self.minor_version),
            access: self.access,
            fields: self.fields.iter().map(|f| format!("{} {}", f.name, f.desc)).collect(),
            methods: self
                .methods
                .iter()
                .map(|m| MethodSummary {
                    name: m.name.clone(),
                    desc: m.desc.clone(),
                    access: m.access,
                    instructions: m.code.as_ref().map_or(0, Code::instruction_count),
                    max_locals: m.code.as_ref().map(|c| c.max_locals),
                })
                .collect(),
        }
    }
}

/// Serializable overview of a class, used by the `inspect` command.
#[derive(Debug, Clone, Serialize)]
pub struct ClassSummary {
    pub name: String,
    pub super_name: Option<String>,
    pub interfaces: Vec<String>,
    /// `major.minor`.
    pub version: String,
    pub access: u16,
    pub fields: Vec<String>,
    pub methods: Vec<MethodSummary>,
}

/// Serializable overview of a method.
#[derive(Debug, Clone, Serialize)]
pub struct MethodSummary {
    pub name: String,
    pub desc: String,
    pub access: u16,
    /// Real instructions, labels and line markers excluded.
    pub instructions: usize,
    /// `None` for methods without code.
    pub max_locals: Option<u16>,
}
