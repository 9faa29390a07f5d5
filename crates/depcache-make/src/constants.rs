//! Changes whose uses leave no trace in bytecode
//!
//! Compile-time constants are inlined at their use sites, and `SOURCE`
//! retention annotations vanish from class files entirely. Neither produces a
//! back-reference, so their users come from the source searcher and are
//! force-marked: even a class recompiled earlier in the round may hold a stale
//! inlined value.

use crate::collaborators::UsageTarget;
use crate::dependency_cache::Propagation;
use depcache_core::{descriptor, MemberDiff, MemberInfo, Result, SymbolId};

fn is_inlined_constant(field: &MemberInfo) -> bool {
    field.flags.is_static() && field.flags.is_final() && field.constant().is_some()
}

/// Force-mark the users of every removed constant and every constant whose
/// value or accessibility changed.
pub(crate) fn process_constant_fields(prop: &mut Propagation<'_>, owner: SymbolId, fields: &MemberDiff) -> Result<()> {
    let mut affected: Vec<SymbolId> = fields
        .removed
        .iter()
        .filter(|f| is_inlined_constant(f))
        .map(|f| f.name)
        .collect();
    affected.extend(
        fields
            .changed
            .iter()
            .filter(|c| is_inlined_constant(&c.old) || is_inlined_constant(&c.new))
            .filter(|c| c.description.constant_changed || c.description.access_restricted)
            .map(|c| c.old.name),
    );
    if affected.is_empty() {
        return Ok(());
    }
    let owner_name = prop.symbols().resolve(owner)?;
    for name in affected {
        let target = UsageTarget::Field {
            owner: owner_name.clone(),
            name: prop.symbols().resolve(name)?,
        };
        mark_usages(prop, &target, owner, "uses an inlined constant of")?;
    }
    Ok(())
}

/// Force-mark every user of an annotation type whose retention escalated.
pub(crate) fn process_retention_change(prop: &mut Propagation<'_>, annotation: SymbolId) -> Result<()> {
    let target = UsageTarget::Annotation {
        type_name: prop.symbols().resolve(annotation)?,
    };
    mark_usages(prop, &target, annotation, "uses an annotation with escalated retention:")
}

fn mark_usages(prop: &mut Propagation<'_>, target: &UsageTarget, owner: SymbolId, reason: &str) -> Result<()> {
    let owner_name = prop.symbols().resolve(owner)?;
    let owner_top_level = descriptor::top_level_name(&owner_name);
    let usages = prop.searcher.find_usages(target)?;
    tracing::trace!("{} usages of {:?}", usages.len(), target);
    for usage in usages {
        let top_level = descriptor::top_level_name(&usage);
        if top_level == owner_top_level {
            continue;
        }
        // Classes never compiled into the snapshot cannot be marked.
        let Some(q) = prop.symbols().lookup(top_level) else {
            continue;
        };
        prop.mark(q, true, reason, owner);
    }
    Ok(())
}
