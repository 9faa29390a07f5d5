//! Core data structures for the dependency graph

use crate::symbols::{SymbolId, SymbolTable};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Stable record id inside one pool. Never reused after deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId(pub u32);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// Class-file access flag bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct AccessFlags(pub u16);

impl AccessFlags {
    pub const PUBLIC: u16 = 0x0001;
    pub const PRIVATE: u16 = 0x0002;
    pub const PROTECTED: u16 = 0x0004;
    pub const STATIC: u16 = 0x0008;
    pub const FINAL: u16 = 0x0010;
    pub const SYNCHRONIZED: u16 = 0x0020;
    pub const BRIDGE: u16 = 0x0040;
    pub const VARARGS: u16 = 0x0080;
    pub const NATIVE: u16 = 0x0100;
    pub const INTERFACE: u16 = 0x0200;
    pub const ABSTRACT: u16 = 0x0400;
    pub const STRICT: u16 = 0x0800;
    pub const SYNTHETIC: u16 = 0x1000;
    pub const ANNOTATION: u16 = 0x2000;
    pub const ENUM: u16 = 0x4000;

    pub fn has(self, bit: u16) -> bool {
        self.0 & bit != 0
    }

    pub fn is_public(self) -> bool {
        self.has(Self::PUBLIC)
    }

    pub fn is_private(self) -> bool {
        self.has(Self::PRIVATE)
    }

    pub fn is_protected(self) -> bool {
        self.has(Self::PROTECTED)
    }

    pub fn is_static(self) -> bool {
        self.has(Self::STATIC)
    }

    pub fn is_final(self) -> bool {
        self.has(Self::FINAL)
    }

    pub fn is_abstract(self) -> bool {
        self.has(Self::ABSTRACT)
    }

    pub fn is_interface(self) -> bool {
        self.has(Self::INTERFACE)
    }

    pub fn is_annotation(self) -> bool {
        self.has(Self::ANNOTATION)
    }

    pub fn is_bridge(self) -> bool {
        self.has(Self::BRIDGE)
    }

    /// 3 = public, 2 = protected, 1 = package, 0 = private.
    pub fn access_level(self) -> u8 {
        if self.is_public() {
            3
        } else if self.is_protected() {
            2
        } else if self.is_private() {
            0
        } else {
            1
        }
    }

    /// True when `self` grants strictly wider access than `other`.
    pub fn is_more_accessible_than(self, other: AccessFlags) -> bool {
        self.access_level() > other.access_level()
    }
}

/// A compile-time constant, annotation member value or annotation default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ConstantValue {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
    /// Class literal, as a field descriptor.
    Class(String),
    Enum { type_descriptor: String, name: String },
    Annotation(Annotation),
    Array(Vec<ConstantValue>),
}

// Floats compare by bit pattern so an unchanged NaN constant is not a change.
impl PartialEq for ConstantValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Long(a), Self::Long(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::Double(a), Self::Double(b)) => a.to_bits() == b.to_bits(),
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Class(a), Self::Class(b)) => a == b,
            (
                Self::Enum {
                    type_descriptor: t1,
                    name: n1,
                },
                Self::Enum {
                    type_descriptor: t2,
                    name: n2,
                },
            ) => t1 == t2 && n1 == n2,
            (Self::Annotation(a), Self::Annotation(b)) => a == b,
            (Self::Array(a), Self::Array(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for ConstantValue {}

/// One `name = value` pair of an annotation instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotationMember {
    pub name: String,
    pub value: ConstantValue,
}

/// An annotation instance attached to a class, member or parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Annotation {
    /// Dotted qualified name of the annotation type.
    pub type_name: String,
    #[serde(default)]
    pub members: Vec<AnnotationMember>,
}

impl Annotation {
    pub fn member(&self, name: &str) -> Option<&ConstantValue> {
        self.members.iter().find(|m| m.name == name).map(|m| &m.value)
    }
}

/// Field or method, used to tag member references.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberKind {
    Field,
    Method,
}

/// Per-kind payload of a [`MemberInfo`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemberPayload {
    Field {
        constant: Option<ConstantValue>,
    },
    Method {
        throws: Vec<SymbolId>,
        is_constructor: bool,
        parameter_annotations: Vec<Vec<Annotation>>,
        annotation_default: Option<ConstantValue>,
    },
}

/// Value snapshot of one field or method declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberInfo {
    pub name: SymbolId,
    pub descriptor: SymbolId,
    pub generic_signature: Option<SymbolId>,
    pub flags: AccessFlags,
    pub visible_annotations: Vec<Annotation>,
    pub invisible_annotations: Vec<Annotation>,
    pub payload: MemberPayload,
}

/// Identity of a member inside its class: name plus full descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MemberKey {
    pub name: SymbolId,
    pub descriptor: SymbolId,
}

impl MemberInfo {
    pub fn key(&self) -> MemberKey {
        MemberKey {
            name: self.name,
            descriptor: self.descriptor,
        }
    }

    pub fn kind(&self) -> MemberKind {
        match self.payload {
            MemberPayload::Field { .. } => MemberKind::Field,
            MemberPayload::Method { .. } => MemberKind::Method,
        }
    }

    pub fn is_field(&self) -> bool {
        self.kind() == MemberKind::Field
    }

    pub fn is_method(&self) -> bool {
        self.kind() == MemberKind::Method
    }

    pub fn is_constructor(&self) -> bool {
        matches!(
            self.payload,
            MemberPayload::Method {
                is_constructor: true,
                ..
            }
        )
    }

    pub fn constant(&self) -> Option<&ConstantValue> {
        match &self.payload {
            MemberPayload::Field { constant } => constant.as_ref(),
            MemberPayload::Method { .. } => None,
        }
    }

    pub fn throws(&self) -> &[SymbolId] {
        match &self.payload {
            MemberPayload::Method { throws, .. } => throws,
            MemberPayload::Field { .. } => &[],
        }
    }

    pub fn annotation_default(&self) -> Option<&ConstantValue> {
        match &self.payload {
            MemberPayload::Method {
                annotation_default, ..
            } => annotation_default.as_ref(),
            MemberPayload::Field { .. } => None,
        }
    }

    pub fn parameter_annotations(&self) -> &[Vec<Annotation>] {
        match &self.payload {
            MemberPayload::Method {
                parameter_annotations,
                ..
            } => parameter_annotations,
            MemberPayload::Field { .. } => &[],
        }
    }

    /// Every annotation on the member and, for methods, on its parameters.
    pub fn all_annotations(&self) -> impl Iterator<Item = &Annotation> {
        self.visible_annotations
            .iter()
            .chain(self.invisible_annotations.iter())
            .chain(self.parameter_annotations().iter().flatten())
    }

    pub fn from_raw_field(raw: &RawField, symbols: &SymbolTable) -> Self {
        MemberInfo {
            name: symbols.intern(&raw.name),
            descriptor: symbols.intern(&raw.descriptor),
            generic_signature: raw.generic_signature.as_deref().map(|s| symbols.intern(s)),
            flags: AccessFlags(raw.access_flags),
            visible_annotations: raw.visible_annotations.clone(),
            invisible_annotations: raw.invisible_annotations.clone(),
            payload: MemberPayload::Field {
                constant: raw.constant_value.clone(),
            },
        }
    }

    pub fn from_raw_method(raw: &RawMethod, symbols: &SymbolTable) -> Self {
        MemberInfo {
            name: symbols.intern(&raw.name),
            descriptor: symbols.intern(&raw.descriptor),
            generic_signature: raw.generic_signature.as_deref().map(|s| symbols.intern(s)),
            flags: AccessFlags(raw.access_flags),
            visible_annotations: raw.visible_annotations.clone(),
            invisible_annotations: raw.invisible_annotations.clone(),
            payload: MemberPayload::Method {
                throws: raw.exceptions.iter().map(|e| symbols.intern(e)).collect(),
                is_constructor: raw.name == CONSTRUCTOR_NAME,
                parameter_annotations: raw.parameter_annotations.clone(),
                annotation_default: raw.annotation_default.clone(),
            },
        }
    }
}

pub const CONSTRUCTOR_NAME: &str = "<init>";

/// Member part of a [`ReferenceInfo`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MemberRef {
    pub kind: MemberKind,
    pub name: SymbolId,
    pub descriptor: SymbolId,
}

/// One call or field-access site: the referenced class and optionally the member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReferenceInfo {
    pub class: SymbolId,
    pub member: Option<MemberRef>,
}

/// Persisted per-class record, keyed by qualified name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassRecord {
    pub qualified_name: SymbolId,
    pub generic_signature: Option<SymbolId>,
    pub source_path: Option<String>,
    pub source_file_name: Option<String>,
    /// `None` only for the hierarchy root.
    pub superclass: Option<SymbolId>,
    pub super_interfaces: Vec<SymbolId>,
    pub flags: AccessFlags,
    pub visible_annotations: Vec<Annotation>,
    pub invisible_annotations: Vec<Annotation>,
    pub referenced_classes: BTreeSet<SymbolId>,
    pub references: BTreeSet<ReferenceInfo>,
    pub subclasses: BTreeSet<SymbolId>,
    pub is_remote: bool,
}

impl ClassRecord {
    pub fn all_annotations(&self) -> impl Iterator<Item = &Annotation> {
        self.visible_annotations
            .iter()
            .chain(self.invisible_annotations.iter())
    }
}

/// A declaration-pool slot pointing at one member record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberSlot {
    pub id: RecordId,
    pub name: SymbolId,
    pub descriptor: SymbolId,
}

impl MemberSlot {
    pub fn key(&self) -> MemberKey {
        MemberKey {
            name: self.name,
            descriptor: self.descriptor,
        }
    }
}

/// Persisted member list of one class. Exists even for classes never imported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeclarationRecord {
    pub qualified_name: SymbolId,
    pub fields: Vec<MemberSlot>,
    pub methods: Vec<MemberSlot>,
}

impl DeclarationRecord {
    pub fn new(qualified_name: SymbolId) -> Self {
        DeclarationRecord {
            qualified_name,
            fields: Vec::new(),
            methods: Vec::new(),
        }
    }
}

// ── Bytecode reader output ──────────────────────────────────

/// A parsed class as delivered by the bytecode reader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawClass {
    pub qualified_name: String,
    #[serde(default)]
    pub generic_signature: Option<String>,
    #[serde(default)]
    pub superclass: Option<String>,
    #[serde(default)]
    pub super_interfaces: Vec<String>,
    #[serde(default)]
    pub source_file_name: Option<String>,
    #[serde(default)]
    pub source_path: Option<String>,
    #[serde(default)]
    pub access_flags: u16,
    #[serde(default)]
    pub visible_annotations: Vec<Annotation>,
    #[serde(default)]
    pub invisible_annotations: Vec<Annotation>,
    #[serde(default)]
    pub fields: Vec<RawField>,
    #[serde(default)]
    pub methods: Vec<RawMethod>,
    #[serde(default)]
    pub references: Vec<RawReference>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawField {
    pub name: String,
    pub descriptor: String,
    #[serde(default)]
    pub generic_signature: Option<String>,
    #[serde(default)]
    pub access_flags: u16,
    #[serde(default)]
    pub constant_value: Option<ConstantValue>,
    #[serde(default)]
    pub visible_annotations: Vec<Annotation>,
    #[serde(default)]
    pub invisible_annotations: Vec<Annotation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMethod {
    pub name: String,
    pub descriptor: String,
    #[serde(default)]
    pub generic_signature: Option<String>,
    #[serde(default)]
    pub access_flags: u16,
    #[serde(default)]
    pub exceptions: Vec<String>,
    #[serde(default)]
    pub visible_annotations: Vec<Annotation>,
    #[serde(default)]
    pub invisible_annotations: Vec<Annotation>,
    #[serde(default)]
    pub parameter_annotations: Vec<Vec<Annotation>>,
    #[serde(default)]
    pub annotation_default: Option<ConstantValue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawReference {
    pub class_name: String,
    #[serde(default)]
    pub member: Option<RawMemberRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawMemberRef {
    pub kind: MemberKind,
    pub name: String,
    pub descriptor: String,
}

impl RawReference {
    pub fn intern(&self, symbols: &SymbolTable) -> ReferenceInfo {
        ReferenceInfo {
            class: symbols.intern(&self.class_name),
            member: self.member.as_ref().map(|m| MemberRef {
                kind: m.kind,
                name: symbols.intern(&m.name),
                descriptor: symbols.intern(&m.descriptor),
            }),
        }
    }
}
