//! Meta-annotation semantics of annotation types

use crate::model::{Annotation, ConstantValue};
use std::collections::BTreeMap;

pub const RETENTION: &str = "java.lang.annotation.Retention";
pub const TARGET: &str = "java.lang.annotation.Target";

/// Where an annotation survives. Ordered from weakest to strongest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RetentionPolicy {
    Source,
    Class,
    Runtime,
}

impl RetentionPolicy {
    /// Policy declared by `@Retention`, `Class` when absent.
    pub fn of<'a>(annotations: impl IntoIterator<Item = &'a Annotation>) -> Self {
        let declared = annotations
            .into_iter()
            .find(|a| a.type_name == RETENTION)
            .and_then(|a| a.member("value"));
        match declared {
            Some(ConstantValue::Enum { name, .. }) => match name.as_str() {
                "SOURCE" => RetentionPolicy::Source,
                "RUNTIME" => RetentionPolicy::Runtime,
                _ => RetentionPolicy::Class,
            },
            _ => RetentionPolicy::Class,
        }
    }

    /// SOURCE -> CLASS/RUNTIME or CLASS -> RUNTIME.
    pub fn is_escalated_to(self, new: RetentionPolicy) -> bool {
        new > self
    }
}

/// Bitmask of `ElementType` declaration contexts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnnotationTargets(pub u16);

impl AnnotationTargets {
    pub const TYPE: u16 = 0x01;
    pub const FIELD: u16 = 0x02;
    pub const METHOD: u16 = 0x04;
    pub const PARAMETER: u16 = 0x08;
    pub const CONSTRUCTOR: u16 = 0x10;
    pub const LOCAL_VARIABLE: u16 = 0x20;
    pub const ANNOTATION_TYPE: u16 = 0x40;
    pub const PACKAGE: u16 = 0x80;
    pub const ALL: u16 = 0xFF;

    fn bit(element: &str) -> u16 {
        match element {
            "TYPE" => Self::TYPE,
            "FIELD" => Self::FIELD,
            "METHOD" => Self::METHOD,
            "PARAMETER" => Self::PARAMETER,
            "CONSTRUCTOR" => Self::CONSTRUCTOR,
            "LOCAL_VARIABLE" => Self::LOCAL_VARIABLE,
            "ANNOTATION_TYPE" => Self::ANNOTATION_TYPE,
            "PACKAGE" => Self::PACKAGE,
            _ => 0,
        }
    }

    /// Targets declared by `@Target`; every classic target when absent.
    pub fn of<'a>(annotations: impl IntoIterator<Item = &'a Annotation>) -> Self {
        let declared = annotations
            .into_iter()
            .find(|a| a.type_name == TARGET)
            .and_then(|a| a.member("value"));
        let Some(value) = declared else {
            return AnnotationTargets(Self::ALL);
        };
        let elements: Vec<&ConstantValue> = match value {
            ConstantValue::Array(items) => items.iter().collect(),
            single => vec![single],
        };
        let mask = elements.into_iter().fold(0, |mask, element| match element {
            ConstantValue::Enum { name, .. } => mask | Self::bit(name),
            _ => mask,
        });
        AnnotationTargets(mask)
    }

    /// True when some target allowed before is no longer allowed.
    pub fn removed_in(self, new: AnnotationTargets) -> bool {
        self.0 & !new.0 != 0
    }
}

/// Meta-annotations of an annotation type other than `@Retention`/`@Target`,
/// keyed by annotation type name.
pub fn semantic_annotations<'a>(
    annotations: impl IntoIterator<Item = &'a Annotation>,
) -> BTreeMap<&'a str, &'a Annotation> {
    annotations
        .into_iter()
        .filter(|a| a.type_name != RETENTION && a.type_name != TARGET)
        .map(|a| (a.type_name.as_str(), a))
        .collect()
}

/// Same annotation types with the same member values, member order ignored.
pub fn semantics_differ(old: &BTreeMap<&str, &Annotation>, new: &BTreeMap<&str, &Annotation>) -> bool {
    if old.len() != new.len() {
        return true;
    }
    old.iter().any(|(name, old_annotation)| match new.get(name) {
        None => true,
        Some(new_annotation) => member_values_differ(old_annotation, new_annotation),
    })
}

fn member_values_differ(old: &Annotation, new: &Annotation) -> bool {
    if old.members.len() != new.members.len() {
        return true;
    }
    new.members
        .iter()
        .any(|member| old.member(&member.name) != Some(&member.value))
}
