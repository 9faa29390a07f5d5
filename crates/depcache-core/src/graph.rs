//! Class hierarchy traversal over a [`Cache`]

use crate::cache::Cache;
use crate::error::{CacheCorrupted, Result};
use crate::symbols::SymbolId;
use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use std::collections::HashSet;

/// Walks supertypes and subclasses recorded in one snapshot.
///
/// Walks are depth-first, following edges in declaration order (superclass
/// before interfaces). Visitors return `Ok(false)` to stop descending past
/// the visited class.
/// Every class is visited at most once per walk.
#[derive(Clone, Copy)]
pub struct GraphNavigator<'a> {
    cache: &'a Cache,
}

impl<'a> GraphNavigator<'a> {
    pub fn new(cache: &'a Cache) -> Self {
        GraphNavigator { cache }
    }

    fn direct_supertypes(&self, q: SymbolId) -> Result<Vec<SymbolId>> {
        let Some((superclass, interfaces)) = self
            .cache
            .with_class(q, |r| (r.superclass, r.super_interfaces.clone()))?
        else {
            return Ok(Vec::new());
        };
        Ok(superclass.into_iter().chain(interfaces).collect())
    }

    /// Superclass chain and super-interfaces of `start`.
    pub fn walk_super_classes(
        &self,
        start: SymbolId,
        visitor: impl FnMut(SymbolId) -> Result<bool>,
    ) -> Result<()> {
        self.walk(start, visitor, |q| self.direct_supertypes(q), "supertype")
    }

    /// Every class that extends or implements `start`, directly or not.
    pub fn walk_sub_classes(
        &self,
        start: SymbolId,
        visitor: impl FnMut(SymbolId) -> Result<bool>,
    ) -> Result<()> {
        self.walk(start, visitor, |q| self.cache.subclasses(q), "subclass")
    }

    fn walk(
        &self,
        start: SymbolId,
        mut visitor: impl FnMut(SymbolId) -> Result<bool>,
        next: impl Fn(SymbolId) -> Result<Vec<SymbolId>>,
        relation: &str,
    ) -> Result<()> {
        let mut visited = HashSet::from([start]);
        let mut stack: Vec<SymbolId> = next(start)?.into_iter().rev().collect();
        while let Some(current) = stack.pop() {
            if current == start {
                return Err(CacheCorrupted::invariant(format!(
                    "class {} is its own {}",
                    self.cache.symbols().display(start),
                    relation
                )));
            }
            if !visited.insert(current) {
                continue;
            }
            if visitor(current)? {
                stack.extend(next(current)?.into_iter().rev());
            }
        }
        Ok(())
    }

    pub fn all_supertypes(&self, start: SymbolId) -> Result<Vec<SymbolId>> {
        let mut found = Vec::new();
        self.walk_super_classes(start, |q| {
            found.push(q);
            Ok(true)
        })?;
        Ok(found)
    }

    pub fn all_subclasses(&self, start: SymbolId) -> Result<Vec<SymbolId>> {
        let mut found = Vec::new();
        self.walk_sub_classes(start, |q| {
            found.push(q);
            Ok(true)
        })?;
        Ok(found)
    }

    /// Fail if the supertype edges reachable from `roots` form a cycle.
    pub fn check_acyclic(&self, roots: impl IntoIterator<Item = SymbolId>) -> Result<()> {
        let mut hierarchy: DiGraphMap<SymbolId, ()> = DiGraphMap::new();
        let mut pending: Vec<SymbolId> = roots.into_iter().collect();
        let mut seen = HashSet::new();
        while let Some(q) = pending.pop() {
            if !seen.insert(q) {
                continue;
            }
            hierarchy.add_node(q);
            for supertype in self.direct_supertypes(q)? {
                hierarchy.add_edge(q, supertype, ());
                pending.push(supertype);
            }
        }
        toposort(&hierarchy, None).map(|_| ()).map_err(|cycle| {
            CacheCorrupted::invariant(format!(
                "inheritance cycle through {}",
                self.cache.symbols().display(cycle.node_id())
            ))
        })
    }
}
