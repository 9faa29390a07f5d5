//! Round driver over the persisted snapshot and the freshly compiled one
//!
//! A round is: import every recompiled class, then [`DependencyCache::update`]
//! and [`DependencyCache::find_dependent_classes`] in either order. The next
//! import after an update starts a new round.

use crate::collaborators::{BuildContext, ClassReader, NoSourceSearch, OutputDirContext, SourceSearcher};
use crate::config::{MakeConfig, PropagationConfig};
use crate::processor::DependencyProcessor;
use crate::reader::JsonClassReader;
use depcache_core::{
    descriptor, layout, Cache, GraphNavigator, MemberKind, MemberRef, RawClass, RecordId, Result, SymbolId,
    SymbolTable,
};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Working sets of one compilation round.
#[derive(Debug, Default)]
pub struct RoundState {
    /// Classes whose declaration is merged into the persisted snapshot on update.
    pub to_update: BTreeSet<SymbolId>,
    /// Classes whose changes are propagated.
    pub traverse_roots: BTreeSet<SymbolId>,
    processed_roots: BTreeSet<SymbolId>,
    pub source_removed: BTreeSet<SymbolId>,
    /// Roots whose superclass or interface list changed.
    pub superlist_changed: BTreeSet<SymbolId>,
    pub marked: BTreeSet<SymbolId>,
    /// Marked regardless of being recompiled already.
    pub force_marked: BTreeSet<SymbolId>,
    pub no_longer_remote: BTreeSet<SymbolId>,
    merged: bool,
}

impl RoundState {
    fn mark(&mut self, old: &Cache, new: &Cache, q: SymbolId, force: bool) -> bool {
        if !old.contains_class(q) || self.source_removed.contains(&q) {
            return false;
        }
        if !force && new.contains_class(q) {
            return false;
        }
        if force {
            self.force_marked.insert(q);
        }
        self.marked.insert(q)
    }
}

/// What a change processor sees of the round: both snapshots, the working
/// sets and the collaborators.
pub(crate) struct Propagation<'a> {
    pub old: &'a Cache,
    pub new: &'a Cache,
    pub state: &'a mut RoundState,
    pub searcher: &'a dyn SourceSearcher,
    pub config: &'a PropagationConfig,
}

impl Propagation<'_> {
    pub fn symbols(&self) -> &SymbolTable {
        self.old.symbols()
    }

    pub fn is_marked(&self, q: SymbolId) -> bool {
        self.state.marked.contains(&q)
    }

    /// Mark `q` for recompilation because of a change in `cause`.
    pub fn mark(&mut self, q: SymbolId, force: bool, reason: &str, cause: SymbolId) -> bool {
        let marked = self.state.mark(self.old, self.new, q, force);
        if marked {
            tracing::debug!(
                "Mark dependent class {}; reason: {} {}",
                self.symbols().display(q),
                reason,
                self.symbols().display(cause)
            );
        }
        marked
    }
}

pub struct DependencyCache {
    cache_dir: Option<PathBuf>,
    symbols: Arc<SymbolTable>,
    old: Cache,
    new: Cache,
    state: RoundState,
    config: PropagationConfig,
    reader: Box<dyn ClassReader>,
    searcher: Box<dyn SourceSearcher>,
    context: Box<dyn BuildContext>,
}

impl std::fmt::Debug for DependencyCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyCache")
            .field("cache_dir", &self.cache_dir)
            .field("old", &self.old)
            .field("new", &self.new)
            .field("state", &self.state)
            .finish()
    }
}

impl DependencyCache {
    /// Open the cache of the project at `project_root`. A directory left
    /// without a manifest by an interrupted dispose is wiped first.
    pub fn open(project_root: &Path, config: &MakeConfig) -> Result<Self> {
        let cache_dir = config.cache_path(project_root);
        prepare_cache_dir(&cache_dir)?;
        let symbols = Arc::new(SymbolTable::open(cache_dir.join(layout::SYMBOLS_FILE))?);
        let old = Cache::open(
            cache_dir.join(layout::SNAPSHOT_DIR),
            symbols.clone(),
            config.cache_options(),
        )?;
        // Dirty until the next successful dispose.
        layout::invalidate_manifest(&cache_dir)?;
        tracing::info!(
            "Opened dependency cache at {} with {} classes",
            cache_dir.display(),
            old.class_count()
        );
        Ok(DependencyCache {
            cache_dir: Some(cache_dir),
            new: Cache::in_memory(symbols.clone()),
            symbols,
            old,
            state: RoundState::default(),
            config: config.propagation.clone(),
            reader: Box::new(JsonClassReader),
            searcher: Box::new(NoSourceSearch),
            context: Box::new(OutputDirContext::new(project_root, config.output_path(project_root))),
        })
    }

    /// A cache that never touches disk.
    pub fn in_memory(config: &MakeConfig) -> Self {
        let symbols = Arc::new(SymbolTable::new());
        DependencyCache {
            cache_dir: None,
            old: Cache::in_memory(symbols.clone()),
            new: Cache::in_memory(symbols.clone()),
            symbols,
            state: RoundState::default(),
            config: config.propagation.clone(),
            reader: Box::new(JsonClassReader),
            searcher: Box::new(NoSourceSearch),
            context: Box::new(OutputDirContext::new(".", &config.output_dir)),
        }
    }

    pub fn with_reader(mut self, reader: Box<dyn ClassReader>) -> Self {
        self.reader = reader;
        self
    }

    pub fn with_searcher(mut self, searcher: Box<dyn SourceSearcher>) -> Self {
        self.searcher = searcher;
        self
    }

    pub fn with_context(mut self, context: Box<dyn BuildContext>) -> Self {
        self.context = context;
        self
    }

    pub fn symbols(&self) -> &Arc<SymbolTable> {
        &self.symbols
    }

    /// Snapshot as of the last merged round.
    pub fn old_cache(&self) -> &Cache {
        &self.old
    }

    /// Classes recompiled in the current round.
    pub fn new_cache(&self) -> &Cache {
        &self.new
    }

    pub fn state(&self) -> &RoundState {
        &self.state
    }

    // ── Round input ─────────────────────────────────────────

    /// Parse a compiled class with the configured reader and import it.
    pub fn reparse_class_file(&mut self, path: &Path) -> Result<SymbolId> {
        let raw = self.reader.parse(path)?;
        self.import_class(&raw)
    }

    /// Record a freshly compiled class of this round.
    pub fn import_class(&mut self, raw: &RawClass) -> Result<SymbolId> {
        self.begin_round_if_merged()?;
        let q = self.new.import_class(raw)?;
        self.state.to_update.insert(q);
        self.state.traverse_roots.insert(q);
        tracing::debug!("Imported recompiled class {}", raw.qualified_name);
        Ok(q)
    }

    /// The source of `qualified_name` was deleted.
    pub fn add_source_removed(&mut self, qualified_name: &str) -> Result<SymbolId> {
        self.begin_round_if_merged()?;
        let q = self.symbols.intern(qualified_name);
        self.state.source_removed.insert(q);
        self.state.traverse_roots.insert(q);
        Ok(q)
    }

    pub fn add_traverse_root(&mut self, q: SymbolId) {
        self.state.traverse_roots.insert(q);
    }

    pub fn add_class_to_update(&mut self, q: SymbolId) {
        self.state.to_update.insert(q);
    }

    /// Returns whether `q` was newly marked.
    pub fn mark_class(&mut self, q: SymbolId, force: bool) -> bool {
        self.state.mark(&self.old, &self.new, q, force)
    }

    pub fn is_marked(&self, q: SymbolId) -> bool {
        self.state.marked.contains(&q)
    }

    fn begin_round_if_merged(&mut self) -> Result<()> {
        if self.state.merged {
            self.new.wipe()?;
            self.state = RoundState::default();
            tracing::debug!("Starting a new round");
        }
        Ok(())
    }

    // ── Propagation ─────────────────────────────────────────

    /// Classes to recompile because of this round's changes. Classes in
    /// `already_successful` are left out unless an inlined value forced them.
    pub fn find_dependent_classes(&mut self, already_successful: &BTreeSet<String>) -> Result<Vec<String>> {
        self.propagate()?;
        let mut names = Vec::with_capacity(self.state.marked.len());
        for q in &self.state.marked {
            let name = self.symbols.resolve(*q)?;
            if already_successful.contains(&name) && !self.state.force_marked.contains(q) {
                continue;
            }
            names.push(name);
        }
        names.sort();
        tracing::info!("{} dependent classes need recompilation", names.len());
        Ok(names)
    }

    fn propagate(&mut self) -> Result<()> {
        let pending: Vec<SymbolId> = self
            .state
            .traverse_roots
            .difference(&self.state.processed_roots)
            .copied()
            .collect();
        for q in pending {
            self.state.processed_roots.insert(q);
            if self.new.contains_class(q) {
                if !self.old.contains_class(q) {
                    tracing::trace!("{} is a new class", self.symbols.display(q));
                    continue;
                }
                let propagation = Propagation {
                    old: &self.old,
                    new: &self.new,
                    state: &mut self.state,
                    searcher: &*self.searcher,
                    config: &self.config,
                };
                DependencyProcessor::new(propagation, q)?.run()?;
            } else if self.old.contains_class(q) && self.is_removed(q)? {
                let dependents = self.old.back_dependencies(q)?;
                let mut propagation = Propagation {
                    old: &self.old,
                    new: &self.new,
                    state: &mut self.state,
                    searcher: &*self.searcher,
                    config: &self.config,
                };
                for dependency in dependents {
                    propagation.mark(dependency.class, false, "removed class", q);
                }
            }
        }
        Ok(())
    }

    fn is_removed(&self, q: SymbolId) -> Result<bool> {
        let name = self.symbols.resolve(q)?;
        if self.context.class_file_exists(&name) {
            return Ok(false);
        }
        if self.state.source_removed.contains(&q) {
            return Ok(true);
        }
        let source_path = self.old.source_path(q)?;
        Ok(!self.context.source_exists(source_path.as_deref()))
    }

    // ── Merge ───────────────────────────────────────────────

    /// Propagate pending roots, then merge this round into the persisted
    /// snapshot and delete removed classes.
    pub fn update(&mut self) -> Result<()> {
        self.propagate()?;
        let to_update = std::mem::take(&mut self.state.to_update);
        let source_removed = std::mem::take(&mut self.state.source_removed);
        if to_update.is_empty() && source_removed.is_empty() {
            tracing::debug!("Nothing to update");
            return Ok(());
        }

        let mut merged = Vec::with_capacity(to_update.len());
        for q in to_update {
            if self.new.contains_class(q) {
                self.old.detach_class(q)?;
                self.old.import_from(&self.new, q)?;
                merged.push(q);
            } else if self.old.contains_class(q) {
                self.old.detach_class(q)?;
                merged.push(q);
            }
        }
        for q in &merged {
            self.rebuild_forward_edges(*q)?;
            self.register_subclass(*q)?;
        }
        for q in &merged {
            self.recompute_remote(*q)?;
        }
        GraphNavigator::new(&self.old).check_acyclic(merged.iter().copied())?;

        let mut removed = 0;
        for q in source_removed {
            if self.old.contains_class(q) {
                self.old.remove_class(q)?;
                removed += 1;
            }
        }
        self.state.merged = true;
        tracing::info!("Updated {} classes, removed {}", merged.len(), removed);
        Ok(())
    }

    /// Re-register `q` as a referencer of every class and member its code uses.
    fn rebuild_forward_edges(&self, q: SymbolId) -> Result<()> {
        let Some(record) = self.old.class_record(q)? else {
            return Ok(());
        };
        let mut targets: BTreeSet<SymbolId> = BTreeSet::new();
        targets.extend(record.superclass);
        targets.extend(record.super_interfaces.iter().copied());

        for reference in &record.references {
            targets.insert(reference.class);
            let Some(member) = &reference.member else {
                continue;
            };
            // Unresolvable member references keep only the class-level edge.
            if let Some((owner, id)) = self.resolve_member_owner(reference.class, member)? {
                targets.insert(owner);
                if owner != q {
                    match member.kind {
                        MemberKind::Field => self.old.add_field_referencer(id, q)?,
                        MemberKind::Method => self.old.add_method_referencer(id, q)?,
                    }
                }
            }
        }

        for annotation in record.all_annotations() {
            targets.insert(self.symbols.intern(&annotation.type_name));
        }
        let fields = self.old.fields(q)?;
        let methods = self.old.methods(q)?;
        for member in fields.iter().chain(methods.iter()) {
            for annotation in member.all_annotations() {
                targets.insert(self.symbols.intern(&annotation.type_name));
            }
            let member_descriptor = self.symbols.resolve(member.descriptor)?;
            for class_name in descriptor::object_types(&member_descriptor)? {
                targets.insert(self.symbols.intern(&class_name));
            }
            targets.extend(member.throws().iter().copied());
        }

        targets.remove(&q);
        for target in targets {
            self.old.add_class_referencer(target, q)?;
            self.old.add_referenced_class(q, target)?;
        }
        Ok(())
    }

    /// The class declaring `member`: `class` itself or, when the bytecode
    /// named a subclass that only inherits it, the first declaring ancestor
    /// up the superclass chain, then through interfaces.
    fn resolve_member_owner(&self, class: SymbolId, member: &MemberRef) -> Result<Option<(SymbolId, RecordId)>> {
        let find = |owner: SymbolId| match member.kind {
            MemberKind::Field => self.old.find_field(owner, member.name, member.descriptor),
            MemberKind::Method => self.old.find_method(owner, member.name, member.descriptor),
        };
        if let Some(id) = find(class)? {
            return Ok(Some((class, id)));
        }
        if !self.config.resolve_inherited_member_refs {
            return Ok(None);
        }
        let mut found = None;
        GraphNavigator::new(&self.old).walk_super_classes(class, |ancestor| {
            if found.is_some() {
                return Ok(false);
            }
            if let Some(id) = find(ancestor)? {
                found = Some((ancestor, id));
                return Ok(false);
            }
            Ok(true)
        })?;
        Ok(found)
    }

    fn register_subclass(&self, q: SymbolId) -> Result<()> {
        let superclass = self.old.superclass(q)?;
        for supertype in superclass.into_iter().chain(self.old.super_interfaces(q)?) {
            self.old.add_subclass(supertype, q)?;
        }
        Ok(())
    }

    fn recompute_remote(&mut self, q: SymbolId) -> Result<()> {
        let remote = match self.symbols.lookup(&self.config.remote_marker) {
            None => false,
            Some(marker) => {
                let navigator = GraphNavigator::new(&self.old);
                let mut remote = false;
                for interface in self.old.super_interfaces(q)? {
                    if interface == marker || navigator.all_supertypes(interface)?.contains(&marker) {
                        remote = true;
                        break;
                    }
                }
                remote
            }
        };
        if self.old.set_remote(q, remote)? == Some(true) && !remote {
            tracing::debug!("{} is no longer remote", self.symbols.display(q));
            self.state.no_longer_remote.insert(q);
        }
        Ok(())
    }

    /// Classes that stopped implementing the remote marker in this round.
    pub fn classes_no_longer_remote(&self) -> Result<Vec<String>> {
        self.state
            .no_longer_remote
            .iter()
            .map(|q| self.symbols.resolve(*q))
            .collect()
    }

    // ── Lifecycle ───────────────────────────────────────────

    /// Persist the snapshot and symbol table, then write the manifest.
    pub fn dispose(&self) -> Result<()> {
        let Some(dir) = &self.cache_dir else {
            return Ok(());
        };
        layout::invalidate_manifest(dir)?;
        self.old.dispose()?;
        self.symbols.save()?;
        layout::save_manifest(dir, self.old.class_count())?;
        tracing::info!("Saved dependency cache with {} classes", self.old.class_count());
        Ok(())
    }

    /// Forget everything. The recovery path for any [`depcache_core::CacheCorrupted`].
    pub fn wipe(&mut self) -> Result<()> {
        tracing::warn!("Wiping dependency cache");
        self.state = RoundState::default();
        self.new.wipe()?;
        self.old.wipe()?;
        self.symbols.wipe()?;
        if let Some(dir) = &self.cache_dir {
            layout::invalidate_manifest(dir)?;
        }
        Ok(())
    }
}

fn prepare_cache_dir(dir: &Path) -> Result<()> {
    match layout::load_manifest(dir) {
        Ok(Some(manifest)) => {
            tracing::debug!(
                "Cache manifest from {} with {} classes",
                manifest.saved_at,
                manifest.class_count
            );
        }
        Ok(None) => {
            if dir.exists() && std::fs::read_dir(dir)?.next().is_some() {
                tracing::warn!("No manifest in {}, discarding interrupted cache", dir.display());
                layout::clear_cache(dir)?;
            }
        }
        Err(err) => {
            tracing::warn!("Discarding cache at {}: {}", dir.display(), err);
            layout::clear_cache(dir)?;
        }
    }
    layout::ensure_cache_dir(dir)?;
    Ok(())
}
