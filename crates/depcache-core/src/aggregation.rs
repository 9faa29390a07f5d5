//! Grouping of referencer edges into per-class back-dependencies

use crate::model::{MemberInfo, MemberKey};
use crate::symbols::SymbolId;
use std::collections::{BTreeMap, BTreeSet};

/// Everything one referencing class uses of a target class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    /// The referencing class.
    pub class: SymbolId,
    /// Target fields the referencing class's code accesses.
    pub fields: Vec<MemberInfo>,
    /// Target methods (constructors included) the referencing class's code calls.
    pub methods: Vec<MemberInfo>,
}

impl Dependency {
    fn new(class: SymbolId) -> Self {
        Dependency {
            class,
            fields: Vec::new(),
            methods: Vec::new(),
        }
    }

    pub fn uses_field(&self, name: SymbolId) -> bool {
        self.fields.iter().any(|f| f.name == name)
    }

    pub fn uses_method(&self, key: MemberKey) -> bool {
        self.methods.iter().any(|m| m.key() == key)
    }

    pub fn uses_constructor(&self) -> bool {
        self.methods.iter().any(MemberInfo::is_constructor)
    }
}

/// Fold class-level and member-level referencer sets of `target` into one
/// [`Dependency`] per referencing class. `target` never depends on itself.
pub fn aggregate_back_dependencies(
    target: SymbolId,
    class_referencers: &BTreeSet<SymbolId>,
    fields: impl IntoIterator<Item = (MemberInfo, BTreeSet<SymbolId>)>,
    methods: impl IntoIterator<Item = (MemberInfo, BTreeSet<SymbolId>)>,
) -> Vec<Dependency> {
    let mut agg_map: BTreeMap<SymbolId, Dependency> = BTreeMap::new();

    for referencer in class_referencers {
        if *referencer != target {
            agg_map
                .entry(*referencer)
                .or_insert_with(|| Dependency::new(*referencer));
        }
    }

    for (field, referencers) in fields {
        for referencer in referencers {
            if referencer == target {
                continue;
            }
            agg_map
                .entry(referencer)
                .or_insert_with(|| Dependency::new(referencer))
                .fields
                .push(field.clone());
        }
    }

    for (method, referencers) in methods {
        for referencer in referencers {
            if referencer == target {
                continue;
            }
            agg_map
                .entry(referencer)
                .or_insert_with(|| Dependency::new(referencer))
                .methods
                .push(method.clone());
        }
    }

    agg_map.into_values().collect()
}
