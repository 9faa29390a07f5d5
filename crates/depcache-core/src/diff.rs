//! Structural diff of one class's members between two snapshots

use crate::descriptor;
use crate::error::Result;
use crate::model::{MemberInfo, MemberKind};
use crate::symbols::{SymbolId, SymbolTable};
use std::collections::{BTreeMap, BTreeSet};

/// What differs between two versions of the same member.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeDescription {
    /// Field type, or method return type.
    pub descriptor_changed: bool,
    pub flags_changed: bool,
    pub generic_signature_changed: bool,
    pub return_generic_changed: bool,
    pub params_generic_changed: bool,
    pub throws_changed: bool,
    pub static_changed: bool,
    pub access_restricted: bool,
    pub became_abstract: bool,
    pub constant_changed: bool,
    pub annotation_default_changed: bool,
    pub annotation_default_removed: bool,
}

impl ChangeDescription {
    pub fn for_fields(old: &MemberInfo, new: &MemberInfo) -> Self {
        ChangeDescription {
            descriptor_changed: old.descriptor != new.descriptor,
            flags_changed: old.flags != new.flags,
            generic_signature_changed: old.generic_signature != new.generic_signature,
            static_changed: old.flags.is_static() != new.flags.is_static(),
            access_restricted: old.flags.is_more_accessible_than(new.flags),
            constant_changed: old.constant() != new.constant(),
            ..ChangeDescription::default()
        }
    }

    pub fn for_methods(old: &MemberInfo, new: &MemberInfo, symbols: &SymbolTable) -> Result<Self> {
        let old_descriptor = symbols.resolve(old.descriptor)?;
        let new_descriptor = symbols.resolve(new.descriptor)?;
        let old_generic = generic_text(old.generic_signature, symbols)?;
        let new_generic = generic_text(new.generic_signature, symbols)?;
        let (return_generic_changed, params_generic_changed) = match (&old_generic, &new_generic) {
            (Some(o), Some(n)) => (
                descriptor::generic_return_part(o) != descriptor::generic_return_part(n),
                descriptor::generic_params_part(o) != descriptor::generic_params_part(n),
            ),
            (None, None) => (false, false),
            _ => (true, true),
        };
        let old_throws: BTreeSet<SymbolId> = old.throws().iter().copied().collect();
        let new_throws: BTreeSet<SymbolId> = new.throws().iter().copied().collect();
        Ok(ChangeDescription {
            descriptor_changed: descriptor::return_descriptor(&old_descriptor)?
                != descriptor::return_descriptor(&new_descriptor)?,
            flags_changed: old.flags != new.flags,
            generic_signature_changed: old.generic_signature != new.generic_signature,
            return_generic_changed,
            params_generic_changed,
            throws_changed: old_throws != new_throws,
            static_changed: old.flags.is_static() != new.flags.is_static(),
            access_restricted: old.flags.is_more_accessible_than(new.flags),
            became_abstract: !old.flags.is_abstract() && new.flags.is_abstract(),
            constant_changed: false,
            annotation_default_changed: old.annotation_default() != new.annotation_default(),
            annotation_default_removed: old.annotation_default().is_some()
                && new.annotation_default().is_none(),
        })
    }

    pub fn is_changed(&self) -> bool {
        self.descriptor_changed
            || self.flags_changed
            || self.generic_signature_changed
            || self.throws_changed
            || self.constant_changed
            || self.annotation_default_changed
    }

    /// Whether code calling the method must be recompiled.
    pub fn affects_callers(&self) -> bool {
        self.descriptor_changed
            || self.return_generic_changed
            || self.params_generic_changed
            || self.throws_changed
            || self.static_changed
            || self.access_restricted
    }
}

fn generic_text(signature: Option<SymbolId>, symbols: &SymbolTable) -> Result<Option<String>> {
    signature.map(|id| symbols.resolve(id)).transpose()
}

/// A member present in both snapshots whose declaration differs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberChange {
    pub old: MemberInfo,
    pub new: MemberInfo,
    pub description: ChangeDescription,
}

/// Added, removed and changed members of one kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemberDiff {
    /// Members only in the new snapshot.
    pub added: Vec<MemberInfo>,
    /// Members only in the old snapshot.
    pub removed: Vec<MemberInfo>,
    /// Members in both, keyed by their old version.
    pub changed: Vec<MemberChange>,
}

impl MemberDiff {
    /// Fields are the same field when their names match.
    pub fn fields(old: &[MemberInfo], new: &[MemberInfo]) -> Self {
        let old_by_name: BTreeMap<SymbolId, &MemberInfo> = old.iter().map(|f| (f.name, f)).collect();
        let new_by_name: BTreeMap<SymbolId, &MemberInfo> = new.iter().map(|f| (f.name, f)).collect();
        let mut diff = MemberDiff::default();
        for (name, field) in &new_by_name {
            if !old_by_name.contains_key(name) {
                diff.added.push((*field).clone());
            }
        }
        for (name, old_field) in &old_by_name {
            match new_by_name.get(name) {
                None => diff.removed.push((*old_field).clone()),
                Some(new_field) => {
                    let description = ChangeDescription::for_fields(old_field, new_field);
                    if description.is_changed() {
                        diff.changed.push(MemberChange {
                            old: (*old_field).clone(),
                            new: (*new_field).clone(),
                            description,
                        });
                    }
                }
            }
        }
        diff
    }

    /// Methods are grouped by `name(params)`. A group present on one side
    /// only is added or removed as a whole; within a shared group, equal
    /// descriptors pair up first (when both sides have the same count) and
    /// the leftovers are compared pairwise.
    pub fn methods(old: &[MemberInfo], new: &[MemberInfo], symbols: &SymbolTable) -> Result<Self> {
        let old_groups = group_by_signature(old, symbols)?;
        let new_groups = group_by_signature(new, symbols)?;
        let mut diff = MemberDiff::default();

        for (signature, methods) in &new_groups {
            if !old_groups.contains_key(signature) {
                diff.added.extend(methods.iter().map(|m| (*m).clone()));
            }
        }

        for (signature, old_methods) in &old_groups {
            let Some(new_methods) = new_groups.get(signature) else {
                diff.removed.extend(old_methods.iter().map(|m| (*m).clone()));
                continue;
            };
            let mut old_done = vec![false; old_methods.len()];
            let mut new_done = vec![false; new_methods.len()];
            if old_methods.len() == new_methods.len() {
                for (i, old_method) in old_methods.iter().enumerate() {
                    let Some(j) = new_methods.iter().position(|n| n.key() == old_method.key()) else {
                        continue;
                    };
                    old_done[i] = true;
                    new_done[j] = true;
                    diff.push_if_changed(old_method, new_methods[j], symbols)?;
                }
            }
            for (i, old_method) in old_methods.iter().enumerate() {
                if old_done[i] {
                    continue;
                }
                for (j, new_method) in new_methods.iter().enumerate() {
                    if !new_done[j] {
                        diff.push_if_changed(old_method, new_method, symbols)?;
                    }
                }
            }
        }
        Ok(diff)
    }

    fn push_if_changed(&mut self, old: &MemberInfo, new: &MemberInfo, symbols: &SymbolTable) -> Result<()> {
        let description = ChangeDescription::for_methods(old, new, symbols)?;
        if description.is_changed() {
            self.changed.push(MemberChange {
                old: old.clone(),
                new: new.clone(),
                description,
            });
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }

    /// Change description for a member as it was in the old snapshot.
    pub fn change_of(&self, old: &MemberInfo) -> Option<&ChangeDescription> {
        let kind = old.kind();
        self.changed
            .iter()
            .find(|c| match kind {
                MemberKind::Field => c.old.name == old.name,
                MemberKind::Method => c.old.key() == old.key(),
            })
            .map(|c| &c.description)
    }

    pub fn is_removed(&self, old: &MemberInfo) -> bool {
        match old.kind() {
            MemberKind::Field => self.removed.iter().any(|r| r.name == old.name),
            MemberKind::Method => self.removed.iter().any(|r| r.key() == old.key()),
        }
    }
}

fn group_by_signature<'a>(
    methods: &'a [MemberInfo],
    symbols: &SymbolTable,
) -> Result<BTreeMap<String, Vec<&'a MemberInfo>>> {
    let mut groups: BTreeMap<String, Vec<&MemberInfo>> = BTreeMap::new();
    for method in methods {
        let name = symbols.resolve(method.name)?;
        let descriptor = symbols.resolve(method.descriptor)?;
        groups
            .entry(descriptor::method_signature(&name, &descriptor)?)
            .or_default()
            .push(method);
    }
    Ok(groups)
}
