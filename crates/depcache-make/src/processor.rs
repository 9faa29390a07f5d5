//! Change classification and propagation for one recompiled class
//!
//! The processor compares the persisted declaration of a class with the one
//! produced by this round's compilation and marks every class whose compiled
//! form may no longer match.

use crate::collaborators::MethodPattern;
use crate::constants;
use crate::dependency_cache::Propagation;
use depcache_core::annotations::{semantic_annotations, semantics_differ};
use depcache_core::{
    descriptor, AccessFlags, AnnotationTargets, CacheCorrupted, Dependency, GraphNavigator, MemberDiff, MemberInfo,
    Result, RetentionPolicy, SymbolId, SymbolTable,
};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

pub(crate) struct DependencyProcessor<'a> {
    prop: Propagation<'a>,
    symbols: Arc<SymbolTable>,
    q: SymbolId,
    name: String,
    back_dependencies: Vec<Dependency>,
    fields: MemberDiff,
    methods: MemberDiff,
    old_flags: AccessFlags,
    new_flags: AccessFlags,
    superclass_changed: bool,
    superclass_added: bool,
    interface_added: bool,
    interface_removed: bool,
    superlist_generic_changed: bool,
    is_annotation: bool,
    is_remote_interface: bool,
    targets_removed: bool,
    retention_escalated: bool,
    semantics_changed: bool,
}

impl<'a> DependencyProcessor<'a> {
    pub fn new(prop: Propagation<'a>, q: SymbolId) -> Result<Self> {
        let symbols = prop.old.symbols().clone();
        let name = symbols.resolve(q)?;
        let missing = |snapshot: &str| CacheCorrupted::invariant(format!("{name} is missing from the {snapshot} snapshot"));
        let old = prop.old.class_record(q)?.ok_or_else(|| missing("old"))?;
        let new = prop.new.class_record(q)?.ok_or_else(|| missing("new"))?;

        let fields = MemberDiff::fields(&prop.old.fields(q)?, &prop.new.fields(q)?);
        let methods = MemberDiff::methods(&prop.old.methods(q)?, &prop.new.methods(q)?, &symbols)?;

        let root_class = symbols.lookup(&prop.config.root_class);
        let derived_from_root = old.superclass.is_some() && old.superclass == root_class;
        let superclasses_differ = old.superclass != new.superclass;

        let old_interfaces: BTreeSet<SymbolId> = old.super_interfaces.iter().copied().collect();
        let new_interfaces: BTreeSet<SymbolId> = new.super_interfaces.iter().copied().collect();

        let superlist_generic_changed = match (old.generic_signature, new.generic_signature) {
            (None, None) => false,
            (Some(o), Some(n)) if o == n => false,
            (Some(o), Some(n)) => {
                let o = symbols.resolve(o)?;
                let n = symbols.resolve(n)?;
                descriptor::cut_formal_params(&o) != descriptor::cut_formal_params(&n)
            }
            _ => true,
        };

        let is_annotation = old.flags.is_annotation();
        let (targets_removed, retention_escalated, semantics_changed) = if is_annotation {
            (
                AnnotationTargets::of(old.all_annotations()).removed_in(AnnotationTargets::of(new.all_annotations())),
                RetentionPolicy::of(old.all_annotations())
                    .is_escalated_to(RetentionPolicy::of(new.all_annotations())),
                semantics_differ(
                    &semantic_annotations(old.all_annotations()),
                    &semantic_annotations(new.all_annotations()),
                ),
            )
        } else {
            (false, false, false)
        };

        let back_dependencies = prop.old.back_dependencies(q)?;
        Ok(DependencyProcessor {
            symbols,
            q,
            name,
            back_dependencies,
            fields,
            methods,
            old_flags: old.flags,
            new_flags: new.flags,
            superclass_changed: !derived_from_root && superclasses_differ,
            superclass_added: derived_from_root && superclasses_differ,
            interface_added: new_interfaces.difference(&old_interfaces).next().is_some(),
            interface_removed: old_interfaces.difference(&new_interfaces).next().is_some(),
            superlist_generic_changed,
            is_annotation,
            is_remote_interface: old.flags.is_interface() && old.is_remote,
            targets_removed,
            retention_escalated,
            semantics_changed,
            prop,
        })
    }

    pub fn run(mut self) -> Result<()> {
        let superlist_changed = self.superclass_changed
            || self.superclass_added
            || self.interface_added
            || self.interface_removed
            || self.superlist_generic_changed;
        if superlist_changed {
            self.prop.state.superlist_changed.insert(self.q);
        }
        if self.fields.is_empty()
            && self.methods.is_empty()
            && self.old_flags == self.new_flags
            && !superlist_changed
            && !self.targets_removed
            && !self.retention_escalated
            && !self.semantics_changed
        {
            tracing::debug!("No changes detected in {}", self.name);
            return Ok(());
        }
        tracing::debug!("Processing changes of {}", self.name);

        constants::process_constant_fields(&mut self.prop, self.q, &self.fields)?;

        if self.is_annotation && self.process_annotation_changes()? {
            return Ok(());
        }

        if self.superclass_changed || self.superclass_added || self.interface_removed || self.superlist_generic_changed {
            self.mark_all_with_subclass_dependents("superlist changed in")?;
            return Ok(());
        }
        if self.old_flags.is_interface() != self.new_flags.is_interface() {
            self.mark_all_with_subclass_dependents("class kind changed for")?;
            return Ok(());
        }

        if !self.old_flags.is_final() && self.new_flags.is_final() {
            self.mark_all("became final:");
        } else {
            self.mark_direct_dependents()?;
        }

        let mut methods_to_check: Vec<MemberInfo> = self
            .methods
            .removed
            .iter()
            .filter(|m| !m.is_constructor())
            .cloned()
            .collect();
        self.process_inheritance(&methods_to_check)?;

        if descriptor::is_anonymous(&self.name) {
            return Ok(());
        }
        methods_to_check.extend(self.methods.added.iter().filter(|m| !m.is_constructor()).cloned());
        self.process_field_names()?;
        if !methods_to_check.is_empty() {
            self.process_equivalent_methods(&methods_to_check)?;
        }
        Ok(())
    }

    fn mark(&mut self, q: SymbolId, reason: &str) -> bool {
        let cause = self.q;
        self.prop.mark(q, false, reason, cause)
    }

    fn mark_all(&mut self, reason: &str) {
        let dependents: Vec<SymbolId> = self.back_dependencies.iter().map(|d| d.class).collect();
        for dependent in dependents {
            self.mark(dependent, reason);
        }
    }

    /// Back-dependencies of this class and of every class below it.
    fn mark_all_with_subclass_dependents(&mut self, reason: &str) -> Result<()> {
        self.mark_all(reason);
        let navigator = GraphNavigator::new(self.prop.old);
        for subclass in navigator.all_subclasses(self.q)? {
            for dependency in self.prop.old.back_dependencies(subclass)? {
                self.mark(dependency.class, reason);
            }
        }
        Ok(())
    }

    // ── Annotation types ────────────────────────────────────

    /// Returns true when the annotation rules decided the outcome.
    fn process_annotation_changes(&mut self) -> Result<bool> {
        if self.semantics_changed {
            let mut visited = HashSet::from([self.q]);
            let dependencies = std::mem::take(&mut self.back_dependencies);
            self.mark_annotation_dependents(&dependencies, self.q, &mut visited)?;
            self.back_dependencies = dependencies;
            return Ok(true);
        }
        if self.methods.added.iter().any(|m| m.annotation_default().is_none()) {
            self.mark_all("added annotation member without default to");
            return Ok(true);
        }
        if !self.methods.removed.is_empty() || !self.fields.removed.is_empty() {
            self.mark_all("removed annotation member from");
            return Ok(true);
        }
        if self.methods.changed.iter().any(|c| c.description.descriptor_changed) {
            self.mark_all("changed annotation member type in");
            return Ok(true);
        }
        if self.methods.changed.iter().any(|c| c.description.annotation_default_removed) {
            self.mark_all("removed annotation member default in");
            return Ok(true);
        }
        if self.targets_removed {
            self.mark_all("removed annotation targets of");
            return Ok(true);
        }
        if self.retention_escalated {
            self.mark_all("retention policy escalated for");
            constants::process_retention_change(&mut self.prop, self.q)?;
            return Ok(true);
        }
        Ok(false)
    }

    fn mark_annotation_dependents(
        &mut self,
        dependencies: &[Dependency],
        cause: SymbolId,
        visited: &mut HashSet<SymbolId>,
    ) -> Result<()> {
        for dependency in dependencies {
            let reason = if cause == self.q {
                "annotation semantics changed for"
            } else {
                "cascaded annotation semantics change of"
            };
            self.prop.mark(dependency.class, false, reason, cause);
            if self.prop.old.flags(dependency.class)?.is_annotation() && visited.insert(dependency.class) {
                let cascaded = self.prop.old.back_dependencies(dependency.class)?;
                self.mark_annotation_dependents(&cascaded, dependency.class, visited)?;
            }
        }
        Ok(())
    }

    // ── Direct dependents ───────────────────────────────────

    fn mark_direct_dependents(&mut self) -> Result<()> {
        let access_restricted = self.old_flags.is_more_accessible_than(self.new_flags);
        let became_abstract = !self.old_flags.is_abstract() && self.new_flags.is_abstract();
        let dependencies = std::mem::take(&mut self.back_dependencies);
        for dependency in &dependencies {
            if self.prop.is_marked(dependency.class) {
                continue;
            }
            if let Some(reason) = self.direct_dependency_reason(dependency, access_restricted, became_abstract)? {
                self.mark(dependency.class, reason);
            }
        }
        self.back_dependencies = dependencies;
        Ok(())
    }

    fn direct_dependency_reason(
        &self,
        dependency: &Dependency,
        access_restricted: bool,
        became_abstract: bool,
    ) -> Result<Option<&'static str>> {
        if access_restricted {
            return Ok(Some("access restricted for"));
        }
        if became_abstract && dependency.uses_constructor() {
            return Ok(Some("became abstract and its constructor is used:"));
        }
        if dependency.fields.iter().any(|f| self.fields.is_removed(f))
            || dependency.methods.iter().any(|m| self.methods.is_removed(m))
        {
            return Ok(Some("uses a member removed from"));
        }
        let changed_field = dependency.fields.iter().any(|f| self.fields.change_of(f).is_some());
        let changed_method = dependency
            .methods
            .iter()
            .any(|m| self.methods.change_of(m).is_some_and(|c| c.affects_callers()));
        if changed_field || changed_method {
            return Ok(Some("uses a member changed in"));
        }
        if self.has_equivalent_method(&dependency.methods, &self.methods.removed)? {
            return Ok(Some("uses an overload equivalent to one removed from"));
        }
        if self.has_equivalent_method(&dependency.methods, &self.methods.added)? {
            return Ok(Some("uses an overload equivalent to one added to"));
        }
        Ok(None)
    }

    /// Some used method shares name and arity with a candidate but differs
    /// in a parameter type, so overload resolution may now pick another one.
    fn has_equivalent_method(&self, used: &[MemberInfo], candidates: &[MemberInfo]) -> Result<bool> {
        for method in used {
            let params = self.parameters(method)?;
            for candidate in candidates {
                if candidate.name != method.name {
                    continue;
                }
                let candidate_params = self.parameters(candidate)?;
                if candidate_params.len() == params.len() && candidate_params != params {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    fn parameters(&self, method: &MemberInfo) -> Result<Vec<String>> {
        descriptor::parameter_descriptors(&self.symbols.resolve(method.descriptor)?)
    }

    fn signature(&self, method: &MemberInfo) -> Result<String> {
        descriptor::method_signature(
            &self.symbols.resolve(method.name)?,
            &self.symbols.resolve(method.descriptor)?,
        )
    }

    fn return_type(&self, method: &MemberInfo) -> Result<String> {
        descriptor::return_descriptor(&self.symbols.resolve(method.descriptor)?)
    }

    // ── Subclasses ──────────────────────────────────────────

    fn process_inheritance(&mut self, removed_methods: &[MemberInfo]) -> Result<()> {
        let removed_concrete: Vec<MemberInfo> = removed_methods
            .iter()
            .filter(|m| !m.flags.is_abstract() && !m.is_constructor())
            .cloned()
            .collect();
        let removed_overridable: Vec<SymbolId> = removed_methods
            .iter()
            .filter(|m| {
                !m.is_constructor() && !m.flags.is_final() && !m.flags.is_static() && !m.flags.is_private()
            })
            .map(|m| m.name)
            .collect();
        let navigator = GraphNavigator::new(self.prop.old);
        navigator.walk_sub_classes(self.q, |subclass| {
            if !self.prop.is_marked(subclass) && self.prop.old.contains_class(subclass) {
                if let Some(reason) =
                    self.subclass_reason(subclass, removed_methods, &removed_concrete, &removed_overridable)?
                {
                    self.mark(subclass, reason);
                }
            }
            Ok(true)
        })
    }

    fn subclass_reason(
        &self,
        subclass: SymbolId,
        removed_methods: &[MemberInfo],
        removed_concrete: &[MemberInfo],
        removed_overridable: &[SymbolId],
    ) -> Result<Option<&'static str>> {
        let old = self.prop.old;
        let subclass_flags = old.flags(subclass)?;

        if !removed_methods.is_empty() && self.is_remote_interface && !subclass_flags.is_interface() {
            return Ok(Some("methods removed from remote interface"));
        }
        if self.superclass_added || self.interface_added {
            return Ok(Some("superlist extended for"));
        }
        if !self.old_flags.is_final() && self.new_flags.is_final() && old.superclass(subclass)? == Some(self.q) {
            return Ok(Some("extends a class that became final:"));
        }

        for method in &self.methods.added {
            if method.flags.is_abstract() {
                return Ok(Some("abstract method added to"));
            }
            if method.flags.is_private() {
                continue;
            }
            let signature = self.signature(method)?;
            if let Some(derived) = old.find_methods_by_signature(subclass, &signature)?.first() {
                if self.override_conflicts(method, derived)? {
                    return Ok(Some("overrides incompatibly a method added to"));
                }
            }
            if self.has_generics_name_clash(subclass, method)? {
                return Ok(Some("generics name clash with a method added to"));
            }
        }
        for field in &self.fields.added {
            if old.find_field_by_name(subclass, field.name)?.is_some() {
                return Ok(Some("declares a field added to"));
            }
        }

        for change in &self.methods.changed {
            if change.description.became_abstract && !subclass_flags.is_abstract() {
                return Ok(Some("a method became abstract in"));
            }
            let signature = self.signature(&change.old)?;
            if !old.find_methods_by_signature(subclass, &signature)?.is_empty() {
                return Ok(Some("overrides a method changed in"));
            }
            for supertype in GraphNavigator::new(old).all_supertypes(subclass)? {
                if old.flags(supertype)?.is_interface()
                    && !old.find_methods_by_signature(supertype, &signature)?.is_empty()
                {
                    return Ok(Some("implements an interface method changed in"));
                }
            }
        }

        if !subclass_flags.is_abstract() && !removed_concrete.is_empty() {
            let mut methods = removed_concrete.to_vec();
            if self.has_unimplemented_abstract(subclass, &mut methods, &mut HashSet::new())? {
                return Ok(Some("relied on a concrete method removed from"));
            }
        }

        if !removed_overridable.is_empty() && !self.prop.new.contains_class(subclass) {
            for method in old.methods(subclass)? {
                if !method.is_constructor() && removed_overridable.contains(&method.name) {
                    return Ok(Some("overrides a method removed from"));
                }
            }
        }
        Ok(None)
    }

    /// Whether `derived` in a subclass clashes with `base` newly added here.
    fn override_conflicts(&self, base: &MemberInfo, derived: &MemberInfo) -> Result<bool> {
        if self.return_type(base)? != self.return_type(derived)? {
            return Ok(true);
        }
        if base.flags.is_more_accessible_than(derived.flags) {
            return Ok(true);
        }
        if !base.flags.is_static() && derived.flags.is_static() {
            return Ok(true);
        }
        if base.flags.is_final() && !derived.flags.is_final() {
            return Ok(true);
        }
        let base_throws: BTreeSet<SymbolId> = base.throws().iter().copied().collect();
        let derived_throws: BTreeSet<SymbolId> = derived.throws().iter().copied().collect();
        Ok(base_throws != derived_throws)
    }

    /// Same erasure, different generic signature.
    fn has_generics_name_clash(&self, subclass: SymbolId, method: &MemberInfo) -> Result<bool> {
        Ok(self
            .prop
            .old
            .find_methods_by_name(subclass, method.name)?
            .iter()
            .any(|m| {
                !m.flags.is_bridge()
                    && m.descriptor == method.descriptor
                    && m.generic_signature != method.generic_signature
            }))
    }

    /// Walk up from `q` looking for an abstract declaration of one of
    /// `methods` that nothing on the way implements. Implemented methods are
    /// dropped from `methods` as they are found.
    fn has_unimplemented_abstract(
        &self,
        q: SymbolId,
        methods: &mut Vec<MemberInfo>,
        visited: &mut HashSet<SymbolId>,
    ) -> Result<bool> {
        if !visited.insert(q) {
            return Ok(false);
        }
        let old = self.prop.old;
        if !old.contains_class(q) {
            let name = self.symbols.resolve(q)?;
            if name == self.prop.config.root_class {
                return Ok(false);
            }
            return self.library_has_abstract(&name, methods);
        }
        if self.declares_abstract(q, methods)? {
            return Ok(true);
        }
        if methods.is_empty() {
            return Ok(false);
        }
        if let Some(superclass) = old.superclass(q)? {
            if self.has_unimplemented_abstract(superclass, methods, visited)? {
                return Ok(true);
            }
        }
        for interface in old.super_interfaces(q)? {
            if methods.is_empty() {
                break;
            }
            if self.has_unimplemented_abstract(interface, methods, visited)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Checks the freshest known declaration of `q`.
    fn declares_abstract(&self, q: SymbolId, methods: &mut Vec<MemberInfo>) -> Result<bool> {
        let cache = if self.prop.new.contains_class(q) {
            self.prop.new
        } else {
            self.prop.old
        };
        let mut remaining = Vec::with_capacity(methods.len());
        for method in methods.drain(..) {
            let signature = self.signature(&method)?;
            match cache.find_methods_by_signature(q, &signature)?.first() {
                Some(found) if found.flags.is_abstract() => return Ok(true),
                Some(_) => {}
                None => remaining.push(method),
            }
        }
        *methods = remaining;
        Ok(false)
    }

    fn library_has_abstract(&self, class: &str, methods: &mut Vec<MemberInfo>) -> Result<bool> {
        let mut remaining = Vec::with_capacity(methods.len());
        for method in methods.drain(..) {
            let name = self.symbols.resolve(method.name)?;
            if name.starts_with('<') {
                remaining.push(method);
                continue;
            }
            let (parameters, return_type) =
                descriptor::split_method_descriptor(&self.symbols.resolve(method.descriptor)?)?;
            let pattern = MethodPattern {
                name,
                return_type: descriptor::to_source_type_name(&return_type)?,
                parameter_types: parameters
                    .iter()
                    .map(|p| descriptor::to_source_type_name(p))
                    .collect::<Result<_>>()?,
            };
            tracing::trace!("Looking up `{}` in library class {}", pattern.to_source_text(), class);
            match self.prop.searcher.library_method(class, &pattern)? {
                Some(found) if found.is_abstract => return Ok(true),
                Some(_) => {}
                None => remaining.push(method),
            }
        }
        *methods = remaining;
        Ok(false)
    }

    // ── Hierarchy-wide name checks ──────────────────────────

    fn process_field_names(&mut self) -> Result<()> {
        let names: BTreeSet<SymbolId> = self
            .fields
            .added
            .iter()
            .chain(self.fields.removed.iter())
            .map(|f| f.name)
            .collect();
        if names.is_empty() {
            return Ok(());
        }
        let navigator = GraphNavigator::new(self.prop.old);
        navigator.walk_super_classes(self.q, |ancestor| {
            self.mark_field_users(ancestor, &names)?;
            Ok(true)
        })?;

        if !self.fields.added.is_empty() && self.old_flags.is_interface() {
            let mut visited = HashSet::from([self.q]);
            navigator.walk_sub_classes(self.q, |subclass| {
                self.mark_field_users(subclass, &names)?;
                visited.insert(subclass);
                navigator.walk_super_classes(subclass, |ancestor| {
                    if !visited.insert(ancestor) {
                        return Ok(false);
                    }
                    self.mark_field_users(ancestor, &names)?;
                    Ok(true)
                })?;
                Ok(true)
            })?;
        }
        Ok(())
    }

    /// Mark dependents of `owner` using a field named like an added or
    /// removed field; a hidden or unhidden field changes their binding.
    fn mark_field_users(&mut self, owner: SymbolId, names: &BTreeSet<SymbolId>) -> Result<()> {
        for dependency in self.prop.old.back_dependencies(owner)? {
            if self.prop.is_marked(dependency.class) {
                continue;
            }
            if dependency.fields.iter().any(|f| names.contains(&f.name)) {
                self.mark(dependency.class, "uses a field hidden or unhidden by");
                self.prop.state.to_update.insert(owner);
            }
        }
        Ok(())
    }

    fn process_equivalent_methods(&mut self, methods: &[MemberInfo]) -> Result<()> {
        let navigator = GraphNavigator::new(self.prop.old);
        navigator.walk_super_classes(self.q, |ancestor| {
            self.mark_equivalent_method_users(ancestor, methods)?;
            Ok(true)
        })?;
        navigator.walk_sub_classes(self.q, |subclass| {
            self.mark_equivalent_method_users(subclass, methods)?;
            Ok(true)
        })
    }

    fn mark_equivalent_method_users(&mut self, owner: SymbolId, methods: &[MemberInfo]) -> Result<()> {
        for dependency in self.prop.old.back_dependencies(owner)? {
            if self.prop.is_marked(dependency.class) {
                continue;
            }
            if self.has_equivalent_method(&dependency.methods, methods)? {
                self.mark(dependency.class, "uses an overload equivalent to one changed in");
                self.prop.state.to_update.insert(owner);
            }
        }
        Ok(())
    }
}
