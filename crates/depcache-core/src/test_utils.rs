//! Test utilities: class fixtures and descriptor directories

use crate::model::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

pub const OBJECT: &str = "java.lang.Object";

/// Builder for [`RawClass`] fixtures, public class extending `Object` by default.
#[derive(Debug, Clone)]
pub struct ClassBuilder {
    raw: RawClass,
}

impl ClassBuilder {
    pub fn class(qualified_name: &str) -> Self {
        let top_level = crate::descriptor::top_level_name(qualified_name);
        let simple = top_level.rsplit('.').next().unwrap_or(top_level);
        ClassBuilder {
            raw: RawClass {
                qualified_name: qualified_name.to_string(),
                generic_signature: None,
                superclass: Some(OBJECT.to_string()),
                super_interfaces: Vec::new(),
                source_file_name: Some(format!("{simple}.java")),
                source_path: Some(format!("src/{}.java", top_level.replace('.', "/"))),
                access_flags: AccessFlags::PUBLIC,
                visible_annotations: Vec::new(),
                invisible_annotations: Vec::new(),
                fields: Vec::new(),
                methods: Vec::new(),
                references: Vec::new(),
            },
        }
    }

    pub fn interface(qualified_name: &str) -> Self {
        Self::class(qualified_name)
            .flags(AccessFlags::PUBLIC | AccessFlags::INTERFACE | AccessFlags::ABSTRACT)
    }

    pub fn annotation_type(qualified_name: &str) -> Self {
        Self::class(qualified_name).flags(
            AccessFlags::PUBLIC | AccessFlags::INTERFACE | AccessFlags::ABSTRACT | AccessFlags::ANNOTATION,
        )
    }

    pub fn flags(mut self, flags: u16) -> Self {
        self.raw.access_flags = flags;
        self
    }

    pub fn extends(mut self, superclass: &str) -> Self {
        self.raw.superclass = Some(superclass.to_string());
        self
    }

    pub fn implements(mut self, interface: &str) -> Self {
        self.raw.super_interfaces.push(interface.to_string());
        self
    }

    pub fn generic_signature(mut self, signature: &str) -> Self {
        self.raw.generic_signature = Some(signature.to_string());
        self
    }

    pub fn source_path(mut self, path: &str) -> Self {
        self.raw.source_path = Some(path.to_string());
        self
    }

    pub fn annotated(mut self, annotation: Annotation) -> Self {
        self.raw.visible_annotations.push(annotation);
        self
    }

    pub fn field(self, name: &str, descriptor: &str) -> Self {
        self.field_with(raw_field(name, descriptor, AccessFlags::PUBLIC))
    }

    /// `public static final` field with a compile-time constant.
    pub fn constant(self, name: &str, descriptor: &str, value: ConstantValue) -> Self {
        let mut field = raw_field(
            name,
            descriptor,
            AccessFlags::PUBLIC | AccessFlags::STATIC | AccessFlags::FINAL,
        );
        field.constant_value = Some(value);
        self.field_with(field)
    }

    pub fn field_with(mut self, field: RawField) -> Self {
        self.raw.fields.push(field);
        self
    }

    pub fn method(self, name: &str, descriptor: &str) -> Self {
        self.method_with(raw_method(name, descriptor, AccessFlags::PUBLIC))
    }

    pub fn abstract_method(self, name: &str, descriptor: &str) -> Self {
        self.method_with(raw_method(
            name,
            descriptor,
            AccessFlags::PUBLIC | AccessFlags::ABSTRACT,
        ))
    }

    pub fn constructor(self, descriptor: &str) -> Self {
        self.method_with(raw_method(CONSTRUCTOR_NAME, descriptor, AccessFlags::PUBLIC))
    }

    pub fn method_with(mut self, method: RawMethod) -> Self {
        self.raw.methods.push(method);
        self
    }

    /// A type-only reference to `class`.
    pub fn uses(mut self, class: &str) -> Self {
        self.raw.references.push(RawReference {
            class_name: class.to_string(),
            member: None,
        });
        self
    }

    pub fn calls(self, owner: &str, name: &str, descriptor: &str) -> Self {
        self.member_ref(owner, MemberKind::Method, name, descriptor)
    }

    pub fn reads(self, owner: &str, name: &str, descriptor: &str) -> Self {
        self.member_ref(owner, MemberKind::Field, name, descriptor)
    }

    fn member_ref(mut self, owner: &str, kind: MemberKind, name: &str, descriptor: &str) -> Self {
        self.raw.references.push(RawReference {
            class_name: owner.to_string(),
            member: Some(RawMemberRef {
                kind,
                name: name.to_string(),
                descriptor: descriptor.to_string(),
            }),
        });
        self
    }

    pub fn build(self) -> RawClass {
        self.raw
    }
}

pub fn raw_field(name: &str, descriptor: &str, flags: u16) -> RawField {
    RawField {
        name: name.to_string(),
        descriptor: descriptor.to_string(),
        generic_signature: None,
        access_flags: flags,
        constant_value: None,
        visible_annotations: Vec::new(),
        invisible_annotations: Vec::new(),
    }
}

pub fn raw_method(name: &str, descriptor: &str, flags: u16) -> RawMethod {
    RawMethod {
        name: name.to_string(),
        descriptor: descriptor.to_string(),
        generic_signature: None,
        access_flags: flags,
        exceptions: Vec::new(),
        visible_annotations: Vec::new(),
        invisible_annotations: Vec::new(),
        parameter_annotations: Vec::new(),
        annotation_default: None,
    }
}

pub fn annotation(type_name: &str) -> Annotation {
    Annotation {
        type_name: type_name.to_string(),
        members: Vec::new(),
    }
}

pub fn enum_constant(type_descriptor: &str, name: &str) -> ConstantValue {
    ConstantValue::Enum {
        type_descriptor: type_descriptor.to_string(),
        name: name.to_string(),
    }
}

/// `@Retention(policy)` meta-annotation.
pub fn retention(policy: &str) -> Annotation {
    Annotation {
        type_name: crate::annotations::RETENTION.to_string(),
        members: vec![AnnotationMember {
            name: "value".to_string(),
            value: enum_constant("Ljava/lang/annotation/RetentionPolicy;", policy),
        }],
    }
}

/// A fresh in-memory cache with its own symbol table.
pub fn memory_cache() -> crate::cache::Cache {
    crate::cache::Cache::in_memory(Arc::new(crate::symbols::SymbolTable::new()))
}

/// Write each class as `<qualified name>.json` into `dir`.
pub fn write_descriptors(dir: &Path, classes: &[RawClass]) -> Vec<PathBuf> {
    fs::create_dir_all(dir).unwrap();
    classes
        .iter()
        .map(|class| {
            let path = dir.join(format!("{}.json", class.qualified_name));
            fs::write(&path, serde_json::to_string_pretty(class).unwrap()).unwrap();
            path
        })
        .collect()
}

/// A temporary project directory holding the given class descriptors under `classes/`.
pub fn create_descriptor_dir(classes: &[RawClass]) -> TempDir {
    let temp_dir = TempDir::new().unwrap();
    write_descriptors(&temp_dir.path().join("classes"), classes);
    temp_dir
}
