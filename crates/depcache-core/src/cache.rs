//! One dependency-graph snapshot
//!
//! A [`Cache`] owns the class, declaration, field and method pools, the three
//! referencer-set stores and two qualified-name indexes that are rebuilt from
//! the pools when their files are missing. Locks are taken in the order
//! index -> classes -> declarations -> fields -> methods -> referencer sets,
//! and never held across a call back into another `Cache` method.

use crate::aggregation::{Dependency, aggregate_back_dependencies};
use crate::error::{CacheCorrupted, Result};
use crate::layout;
use crate::model::*;
use crate::refset::ReferencerSets;
use crate::store::{PoolState, RecordPool};
use crate::symbols::{SymbolId, SymbolTable};
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const INDEX_MAGIC: [u8; 4] = *b"QIDX";

pub const CLASSES_FILE: &str = "classes.pool";
pub const DECLARATIONS_FILE: &str = "declarations.pool";
pub const FIELDS_FILE: &str = "fields.pool";
pub const METHODS_FILE: &str = "methods.pool";
pub const CLASS_REFERENCERS_FILE: &str = "class-referencers.log";
pub const FIELD_REFERENCERS_FILE: &str = "field-referencers.log";
pub const METHOD_REFERENCERS_FILE: &str = "method-referencers.log";
pub const CLASS_INDEX_FILE: &str = "class.index";
pub const DECLARATION_INDEX_FILE: &str = "declaration.index";

/// Tuning knobs for a persisted cache.
#[derive(Debug, Clone, Copy)]
pub struct CacheOptions {
    /// Referencer-set keys buffered before an eviction flush.
    pub pending_limit: usize,
}

impl Default for CacheOptions {
    fn default() -> Self {
        CacheOptions {
            pending_limit: ReferencerSets::DEFAULT_PENDING_LIMIT,
        }
    }
}

type QNameIndex = HashMap<SymbolId, RecordId>;

/// qName -> record id map, loaded from disk or rebuilt from its pool on first use.
struct LazyIndex {
    name: &'static str,
    path: Option<PathBuf>,
    map: Mutex<Option<QNameIndex>>,
}

impl LazyIndex {
    fn in_memory(name: &'static str) -> Self {
        LazyIndex {
            name,
            path: None,
            map: Mutex::new(Some(QNameIndex::new())),
        }
    }

    fn open(name: &'static str, path: PathBuf) -> Result<Self> {
        let entries: Option<Vec<(SymbolId, RecordId)>> = layout::load_versioned(&path, INDEX_MAGIC)?;
        Ok(LazyIndex {
            name,
            map: Mutex::new(entries.map(|e| e.into_iter().collect())),
            path: Some(path),
        })
    }

    fn with<T, R>(
        &self,
        pool: &RecordPool<T>,
        key_of: impl Fn(&T) -> SymbolId,
        f: impl FnOnce(&mut QNameIndex) -> R,
    ) -> R
    where
        T: Serialize + DeserializeOwned + Clone,
    {
        let mut guard = self.map.lock();
        let index = guard.get_or_insert_with(|| {
            let index: QNameIndex = pool.lock().iter().map(|(id, r)| (key_of(r), id)).collect();
            tracing::debug!("Rebuilt {} index with {} entries", self.name, index.len());
            index
        });
        f(index)
    }

    /// A loaded index must cover exactly the records of its pool.
    fn verify<T>(&self, pool: &RecordPool<T>) -> Result<()>
    where
        T: Serialize + DeserializeOwned + Clone,
    {
        let guard = self.map.lock();
        if let Some(map) = guard.as_ref() {
            let records = pool.lock();
            if map.len() != records.len() || map.values().any(|id| records.get(*id).is_none()) {
                return Err(CacheCorrupted::invariant(format!(
                    "{} index out of sync with its pool",
                    self.name
                )));
            }
        }
        Ok(())
    }

    fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let guard = self.map.lock();
        if let Some(map) = guard.as_ref() {
            let mut entries: Vec<(SymbolId, RecordId)> = map.iter().map(|(k, v)| (*k, *v)).collect();
            entries.sort_unstable();
            layout::save_versioned(path, INDEX_MAGIC, &entries)?;
        }
        Ok(())
    }

    fn discard_file(&self) -> std::io::Result<()> {
        match &self.path {
            Some(path) => layout::remove_if_exists(path),
            None => Ok(()),
        }
    }

    fn reset(&self) -> std::io::Result<()> {
        *self.map.lock() = Some(QNameIndex::new());
        self.discard_file()
    }
}

/// One snapshot of the class graph.
pub struct Cache {
    dir: Option<PathBuf>,
    symbols: Arc<SymbolTable>,
    class_index: LazyIndex,
    declaration_index: LazyIndex,
    classes: RecordPool<ClassRecord>,
    declarations: RecordPool<DeclarationRecord>,
    fields: RecordPool<MemberInfo>,
    methods: RecordPool<MemberInfo>,
    class_referencers: ReferencerSets,
    field_referencers: ReferencerSets,
    method_referencers: ReferencerSets,
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("dir", &self.dir)
            .field("class_count", &self.classes.len())
            .finish()
    }
}

impl Cache {
    /// A scratch snapshot that never touches disk.
    pub fn in_memory(symbols: Arc<SymbolTable>) -> Self {
        Cache {
            dir: None,
            symbols,
            class_index: LazyIndex::in_memory("class"),
            declaration_index: LazyIndex::in_memory("declaration"),
            classes: RecordPool::in_memory("classes"),
            declarations: RecordPool::in_memory("declarations"),
            fields: RecordPool::in_memory("fields"),
            methods: RecordPool::in_memory("methods"),
            class_referencers: ReferencerSets::in_memory("class referencer"),
            field_referencers: ReferencerSets::in_memory("field referencer"),
            method_referencers: ReferencerSets::in_memory("method referencer"),
        }
    }

    /// Open the snapshot persisted under `dir`, creating it if needed.
    pub fn open(dir: impl AsRef<Path>, symbols: Arc<SymbolTable>, options: CacheOptions) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        layout::ensure_cache_dir(&dir)?;
        let limit = options.pending_limit;
        let cache = Cache {
            symbols,
            class_index: LazyIndex::open("class", dir.join(CLASS_INDEX_FILE))?,
            declaration_index: LazyIndex::open("declaration", dir.join(DECLARATION_INDEX_FILE))?,
            classes: RecordPool::open("classes", dir.join(CLASSES_FILE))?,
            declarations: RecordPool::open("declarations", dir.join(DECLARATIONS_FILE))?,
            fields: RecordPool::open("fields", dir.join(FIELDS_FILE))?,
            methods: RecordPool::open("methods", dir.join(METHODS_FILE))?,
            class_referencers: ReferencerSets::open(
                "class referencer",
                dir.join(CLASS_REFERENCERS_FILE),
                limit,
            )?,
            field_referencers: ReferencerSets::open(
                "field referencer",
                dir.join(FIELD_REFERENCERS_FILE),
                limit,
            )?,
            method_referencers: ReferencerSets::open(
                "method referencer",
                dir.join(METHOD_REFERENCERS_FILE),
                limit,
            )?,
            dir: Some(dir),
        };
        cache.class_index.verify(&cache.classes)?;
        cache.declaration_index.verify(&cache.declarations)?;
        Ok(cache)
    }

    pub fn symbols(&self) -> &Arc<SymbolTable> {
        &self.symbols
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    // ── Import ──────────────────────────────────────────────

    /// Upsert a class parsed by the bytecode reader. Members keep their record
    /// id when an incoming member has the same name and descriptor.
    pub fn import_class(&self, raw: &RawClass) -> Result<SymbolId> {
        let symbols = &*self.symbols;
        let qualified_name = symbols.intern(&raw.qualified_name);
        let references: BTreeSet<ReferenceInfo> =
            raw.references.iter().map(|r| r.intern(symbols)).collect();
        let referenced_classes = references
            .iter()
            .map(|r| r.class)
            .filter(|class| *class != qualified_name)
            .collect();
        let record = ClassRecord {
            qualified_name,
            generic_signature: raw.generic_signature.as_deref().map(|s| symbols.intern(s)),
            source_path: raw.source_path.clone(),
            source_file_name: raw.source_file_name.clone(),
            superclass: raw.superclass.as_deref().map(|s| symbols.intern(s)),
            super_interfaces: raw.super_interfaces.iter().map(|s| symbols.intern(s)).collect(),
            flags: AccessFlags(raw.access_flags),
            visible_annotations: raw.visible_annotations.clone(),
            invisible_annotations: raw.invisible_annotations.clone(),
            referenced_classes,
            references,
            subclasses: BTreeSet::new(),
            is_remote: false,
        };
        if record.superclass == Some(qualified_name) || record.super_interfaces.contains(&qualified_name) {
            return Err(CacheCorrupted::invariant(format!(
                "class {} lists itself as a supertype",
                raw.qualified_name
            )));
        }
        let fields = raw
            .fields
            .iter()
            .map(|f| MemberInfo::from_raw_field(f, symbols))
            .collect();
        let methods = raw
            .methods
            .iter()
            .map(|m| MemberInfo::from_raw_method(m, symbols))
            .collect();
        self.store_class(record, fields, methods)?;
        Ok(qualified_name)
    }

    /// Copy class `q` from `other`, which must share this cache's symbol table.
    pub fn import_from(&self, other: &Cache, q: SymbolId) -> Result<()> {
        let mut record = other.class_record(q)?.ok_or_else(|| {
            CacheCorrupted::invariant(format!(
                "cannot import unknown class {}",
                self.symbols.display(q)
            ))
        })?;
        record.subclasses.clear();
        record.is_remote = false;
        let fields = other.fields(q)?;
        let methods = other.methods(q)?;
        self.store_class(record, fields, methods)
    }

    /// Replace the scalar part of a class record. Graph-derived state
    /// (subclasses, remoteness) of an existing record is preserved.
    fn store_class(&self, mut record: ClassRecord, fields: Vec<MemberInfo>, methods: Vec<MemberInfo>) -> Result<()> {
        let q = record.qualified_name;
        self.class_index.with(
            &self.classes,
            |r| r.qualified_name,
            |index| -> Result<()> {
                let mut classes = self.classes.lock();
                match index.get(&q) {
                    Some(&id) => {
                        let existing = classes.require(id, "class")?;
                        record.subclasses = existing.subclasses.clone();
                        record.is_remote = existing.is_remote;
                        classes.put(id, record)?;
                    }
                    None => {
                        let id = classes.allocate(record);
                        index.insert(q, id);
                    }
                }
                Ok(())
            },
        )?;
        self.put_members(q, fields, methods)
    }

    fn put_members(&self, q: SymbolId, fields: Vec<MemberInfo>, methods: Vec<MemberInfo>) -> Result<()> {
        let decl_id = self.declaration_id(q);
        let (dropped_fields, dropped_methods) = {
            let mut declarations = self.declarations.lock();
            let mut field_pool = self.fields.lock();
            let mut method_pool = self.methods.lock();
            let decl = declarations
                .get_mut(decl_id)
                .ok_or_else(|| CacheCorrupted::invariant(format!("dangling declaration record {decl_id}")))?;
            let dropped_fields = reconcile_members(&mut decl.fields, fields, &mut field_pool)?;
            let dropped_methods = reconcile_members(&mut decl.methods, methods, &mut method_pool)?;
            (dropped_fields, dropped_methods)
        };
        for id in dropped_fields {
            self.field_referencers.drop_key(id)?;
        }
        for id in dropped_methods {
            self.method_referencers.drop_key(id)?;
        }
        Ok(())
    }

    // ── Lookup ──────────────────────────────────────────────

    pub fn class_id(&self, q: SymbolId) -> Option<RecordId> {
        self.class_index
            .with(&self.classes, |r| r.qualified_name, |index| index.get(&q).copied())
    }

    pub fn contains_class(&self, q: SymbolId) -> bool {
        self.class_id(q).is_some()
    }

    /// Declaration id of `q`, allocated on first use even for unknown classes.
    pub fn declaration_id(&self, q: SymbolId) -> RecordId {
        self.declaration_index.with(
            &self.declarations,
            |r| r.qualified_name,
            |index| {
                *index
                    .entry(q)
                    .or_insert_with(|| self.declarations.allocate(DeclarationRecord::new(q)))
            },
        )
    }

    fn existing_declaration_id(&self, q: SymbolId) -> Option<RecordId> {
        self.declaration_index
            .with(&self.declarations, |r| r.qualified_name, |index| index.get(&q).copied())
    }

    /// Run `f` against the record of `q`; `None` if the class is unknown.
    pub fn with_class<R>(&self, q: SymbolId, f: impl FnOnce(&ClassRecord) -> R) -> Result<Option<R>> {
        let Some(id) = self.class_id(q) else {
            return Ok(None);
        };
        let classes = self.classes.lock();
        Ok(Some(f(classes.require(id, "class")?)))
    }

    fn update_class<R>(&self, q: SymbolId, f: impl FnOnce(&mut ClassRecord) -> R) -> Result<Option<R>> {
        let Some(id) = self.class_id(q) else {
            return Ok(None);
        };
        let mut classes = self.classes.lock();
        let record = classes
            .get_mut(id)
            .ok_or_else(|| CacheCorrupted::invariant(format!("dangling class record {id}")))?;
        Ok(Some(f(record)))
    }

    pub fn class_record(&self, q: SymbolId) -> Result<Option<ClassRecord>> {
        self.with_class(q, ClassRecord::clone)
    }

    /// Flags of `q`, empty when unknown.
    pub fn flags(&self, q: SymbolId) -> Result<AccessFlags> {
        Ok(self.with_class(q, |r| r.flags)?.unwrap_or_default())
    }

    pub fn superclass(&self, q: SymbolId) -> Result<Option<SymbolId>> {
        Ok(self.with_class(q, |r| r.superclass)?.flatten())
    }

    pub fn super_interfaces(&self, q: SymbolId) -> Result<Vec<SymbolId>> {
        Ok(self.with_class(q, |r| r.super_interfaces.clone())?.unwrap_or_default())
    }

    pub fn subclasses(&self, q: SymbolId) -> Result<Vec<SymbolId>> {
        Ok(self
            .with_class(q, |r| r.subclasses.iter().copied().collect())?
            .unwrap_or_default())
    }

    pub fn generic_signature(&self, q: SymbolId) -> Result<Option<SymbolId>> {
        Ok(self.with_class(q, |r| r.generic_signature)?.flatten())
    }

    pub fn source_path(&self, q: SymbolId) -> Result<Option<String>> {
        Ok(self.with_class(q, |r| r.source_path.clone())?.flatten())
    }

    pub fn references(&self, q: SymbolId) -> Result<BTreeSet<ReferenceInfo>> {
        Ok(self.with_class(q, |r| r.references.clone())?.unwrap_or_default())
    }

    pub fn referenced_classes(&self, q: SymbolId) -> Result<BTreeSet<SymbolId>> {
        Ok(self
            .with_class(q, |r| r.referenced_classes.clone())?
            .unwrap_or_default())
    }

    /// Class-level annotations, visible and invisible.
    pub fn annotations(&self, q: SymbolId) -> Result<Vec<Annotation>> {
        Ok(self
            .with_class(q, |r| r.all_annotations().cloned().collect())?
            .unwrap_or_default())
    }

    pub fn is_remote(&self, q: SymbolId) -> Result<bool> {
        Ok(self.with_class(q, |r| r.is_remote)?.unwrap_or(false))
    }

    /// Returns the previous value, `None` for an unknown class.
    pub fn set_remote(&self, q: SymbolId, remote: bool) -> Result<Option<bool>> {
        self.update_class(q, |r| std::mem::replace(&mut r.is_remote, remote))
    }

    pub fn all_classes(&self) -> Vec<SymbolId> {
        let mut classes: Vec<SymbolId> = self.class_index.with(
            &self.classes,
            |r| r.qualified_name,
            |index| index.keys().copied().collect(),
        );
        classes.sort_unstable();
        classes
    }

    pub fn class_count(&self) -> usize {
        self.classes.len()
    }

    // ── Members ─────────────────────────────────────────────

    fn slots(&self, q: SymbolId, kind: MemberKind) -> Result<Vec<MemberSlot>> {
        let Some(id) = self.existing_declaration_id(q) else {
            return Ok(Vec::new());
        };
        let declarations = self.declarations.lock();
        let decl = declarations.require(id, "declaration")?;
        Ok(match kind {
            MemberKind::Field => decl.fields.clone(),
            MemberKind::Method => decl.methods.clone(),
        })
    }

    fn member_pool(&self, kind: MemberKind) -> &RecordPool<MemberInfo> {
        match kind {
            MemberKind::Field => &self.fields,
            MemberKind::Method => &self.methods,
        }
    }

    fn referencer_sets(&self, kind: MemberKind) -> &ReferencerSets {
        match kind {
            MemberKind::Field => &self.field_referencers,
            MemberKind::Method => &self.method_referencers,
        }
    }

    /// Members of one kind with their record ids, in declaration order.
    pub fn members(&self, q: SymbolId, kind: MemberKind) -> Result<Vec<(RecordId, MemberInfo)>> {
        let slots = self.slots(q, kind)?;
        let pool = self.member_pool(kind).lock();
        slots
            .iter()
            .map(|slot| Ok((slot.id, pool.require(slot.id, "member")?.clone())))
            .collect()
    }

    pub fn fields(&self, q: SymbolId) -> Result<Vec<MemberInfo>> {
        Ok(self.members(q, MemberKind::Field)?.into_iter().map(|(_, m)| m).collect())
    }

    pub fn methods(&self, q: SymbolId) -> Result<Vec<MemberInfo>> {
        Ok(self.members(q, MemberKind::Method)?.into_iter().map(|(_, m)| m).collect())
    }

    pub fn member(&self, id: RecordId, kind: MemberKind) -> Option<MemberInfo> {
        self.member_pool(kind).get(id)
    }

    fn find_slot(&self, q: SymbolId, kind: MemberKind, name: SymbolId, descriptor: SymbolId) -> Result<Option<RecordId>> {
        Ok(self
            .slots(q, kind)?
            .into_iter()
            .find(|slot| slot.name == name && slot.descriptor == descriptor)
            .map(|slot| slot.id))
    }

    pub fn find_field(&self, q: SymbolId, name: SymbolId, descriptor: SymbolId) -> Result<Option<RecordId>> {
        self.find_slot(q, MemberKind::Field, name, descriptor)
    }

    pub fn find_method(&self, q: SymbolId, name: SymbolId, descriptor: SymbolId) -> Result<Option<RecordId>> {
        self.find_slot(q, MemberKind::Method, name, descriptor)
    }

    pub fn find_field_by_name(&self, q: SymbolId, name: SymbolId) -> Result<Option<MemberInfo>> {
        Ok(self.fields(q)?.into_iter().find(|f| f.name == name))
    }

    pub fn find_methods_by_name(&self, q: SymbolId, name: SymbolId) -> Result<Vec<MemberInfo>> {
        Ok(self.methods(q)?.into_iter().filter(|m| m.name == name).collect())
    }

    /// Methods whose `name(params)` text equals `signature`. Covariant-return
    /// bridges make this a list.
    pub fn find_methods_by_signature(&self, q: SymbolId, signature: &str) -> Result<Vec<MemberInfo>> {
        let mut found = Vec::new();
        for method in self.methods(q)? {
            let name = self.symbols.resolve(method.name)?;
            let descriptor = self.symbols.resolve(method.descriptor)?;
            if crate::descriptor::method_signature(&name, &descriptor)? == signature {
                found.push(method);
            }
        }
        Ok(found)
    }

    // ── Edges ───────────────────────────────────────────────

    pub fn add_subclass(&self, q: SymbolId, subclass: SymbolId) -> Result<()> {
        if q == subclass {
            return Err(CacheCorrupted::invariant(format!(
                "class {} registered as its own subclass",
                self.symbols.display(q)
            )));
        }
        self.update_class(q, |r| r.subclasses.insert(subclass))?;
        Ok(())
    }

    pub fn remove_subclass(&self, q: SymbolId, subclass: SymbolId) -> Result<()> {
        self.update_class(q, |r| r.subclasses.remove(&subclass))?;
        Ok(())
    }

    pub fn add_referenced_class(&self, q: SymbolId, target: SymbolId) -> Result<()> {
        if q != target {
            self.update_class(q, |r| r.referenced_classes.insert(target))?;
        }
        Ok(())
    }

    pub fn add_class_referencer(&self, q: SymbolId, referencer: SymbolId) -> Result<()> {
        let id = self.declaration_id(q);
        self.class_referencers.add(id, referencer)
    }

    pub fn remove_class_referencer(&self, q: SymbolId, referencer: SymbolId) -> Result<()> {
        match self.existing_declaration_id(q) {
            Some(id) => self.class_referencers.remove(id, referencer),
            None => Ok(()),
        }
    }

    pub fn class_referencers(&self, q: SymbolId) -> BTreeSet<SymbolId> {
        match self.existing_declaration_id(q) {
            Some(id) => self.class_referencers.get(id),
            None => BTreeSet::new(),
        }
    }

    pub fn add_field_referencer(&self, field: RecordId, referencer: SymbolId) -> Result<()> {
        self.field_referencers.add(field, referencer)
    }

    pub fn remove_field_referencer(&self, field: RecordId, referencer: SymbolId) -> Result<()> {
        self.field_referencers.remove(field, referencer)
    }

    pub fn field_referencers(&self, field: RecordId) -> BTreeSet<SymbolId> {
        self.field_referencers.get(field)
    }

    pub fn add_method_referencer(&self, method: RecordId, referencer: SymbolId) -> Result<()> {
        self.method_referencers.add(method, referencer)
    }

    pub fn remove_method_referencer(&self, method: RecordId, referencer: SymbolId) -> Result<()> {
        self.method_referencers.remove(method, referencer)
    }

    pub fn method_referencers(&self, method: RecordId) -> BTreeSet<SymbolId> {
        self.method_referencers.get(method)
    }

    /// Every class that uses `q`, with the members of `q` it uses.
    pub fn back_dependencies(&self, q: SymbolId) -> Result<Vec<Dependency>> {
        let Some(decl_id) = self.existing_declaration_id(q) else {
            return Ok(Vec::new());
        };
        let class_referencers = self.class_referencers.get(decl_id);
        let fields: Vec<_> = self
            .members(q, MemberKind::Field)?
            .into_iter()
            .map(|(id, field)| (field, self.field_referencers.get(id)))
            .collect();
        let methods: Vec<_> = self
            .members(q, MemberKind::Method)?
            .into_iter()
            .map(|(id, method)| (method, self.method_referencers.get(id)))
            .collect();
        Ok(aggregate_back_dependencies(q, &class_referencers, fields, methods))
    }

    /// Drop every outgoing edge of `q`: subclass registrations on its direct
    /// supertypes and its referencer entries on classes and members it uses.
    pub fn detach_class(&self, q: SymbolId) -> Result<()> {
        let Some(record) = self.class_record(q)? else {
            return Ok(());
        };
        for supertype in record.superclass.iter().chain(record.super_interfaces.iter()) {
            self.remove_subclass(*supertype, q)?;
        }
        for target in &record.referenced_classes {
            self.remove_class_referencer(*target, q)?;
            for kind in [MemberKind::Field, MemberKind::Method] {
                let sets = self.referencer_sets(kind);
                for slot in self.slots(*target, kind)? {
                    sets.remove(slot.id, q)?;
                }
            }
        }
        self.update_class(q, |r| r.referenced_classes.clear())?;
        Ok(())
    }

    /// Delete `q` with its declaration, members, referencer sets and index
    /// entries. `q` is erased from every other referencer set and from the
    /// referenced classes of its users.
    pub fn remove_class(&self, q: SymbolId) -> Result<()> {
        self.detach_class(q)?;

        let declaration = self.declaration_index.with(
            &self.declarations,
            |r| r.qualified_name,
            |index| index.remove(&q).map(|id| (id, self.declarations.lock().remove(id))),
        );
        if let Some((decl_id, decl)) = declaration {
            let decl = decl.ok_or_else(|| CacheCorrupted::invariant(format!("dangling declaration record {decl_id}")))?;
            {
                let mut fields = self.fields.lock();
                for slot in &decl.fields {
                    fields.remove(slot.id);
                }
            }
            {
                let mut methods = self.methods.lock();
                for slot in &decl.methods {
                    methods.remove(slot.id);
                }
            }
            // Users of q keep no forward edge to a class that is gone.
            let mut referencers = self.class_referencers.get(decl_id);
            for slot in &decl.fields {
                referencers.extend(self.field_referencers.get(slot.id));
            }
            for slot in &decl.methods {
                referencers.extend(self.method_referencers.get(slot.id));
            }
            for referencer in referencers {
                self.update_class(referencer, |r| r.referenced_classes.remove(&q))?;
            }

            self.class_referencers.drop_key(decl_id)?;
            for slot in &decl.fields {
                self.field_referencers.drop_key(slot.id)?;
            }
            for slot in &decl.methods {
                self.method_referencers.drop_key(slot.id)?;
            }
        }

        self.class_index.with(
            &self.classes,
            |r| r.qualified_name,
            |index| {
                if let Some(id) = index.remove(&q) {
                    self.classes.lock().remove(id);
                }
            },
        );

        self.class_referencers.remove_everywhere(q)?;
        self.field_referencers.remove_everywhere(q)?;
        self.method_referencers.remove_everywhere(q)?;
        tracing::debug!("Removed class {}", self.symbols.display(q));
        Ok(())
    }

    // ── Lifecycle ───────────────────────────────────────────

    /// Write every dirty pool and pending referencer set.
    pub fn flush(&self) -> Result<()> {
        self.classes.flush()?;
        self.declarations.flush()?;
        self.fields.flush()?;
        self.methods.flush()?;
        self.class_referencers.flush()?;
        self.field_referencers.flush()?;
        self.method_referencers.flush()?;
        Ok(())
    }

    /// Flush and persist both index maps. On failure the index files are
    /// deleted so the next open rebuilds them from the pools.
    pub fn dispose(&self) -> Result<()> {
        let result = self
            .flush()
            .and_then(|_| self.class_index.save())
            .and_then(|_| self.declaration_index.save());
        if let Err(err) = result {
            tracing::warn!("Discarding cache index files after failed dispose: {}", err);
            self.class_index.discard_file()?;
            self.declaration_index.discard_file()?;
            return Err(err);
        }
        Ok(())
    }

    /// Forget everything, on disk and in memory.
    pub fn wipe(&self) -> Result<()> {
        self.class_index.reset()?;
        self.declaration_index.reset()?;
        self.classes.wipe()?;
        self.declarations.wipe()?;
        self.fields.wipe()?;
        self.methods.wipe()?;
        self.class_referencers.wipe()?;
        self.field_referencers.wipe()?;
        self.method_referencers.wipe()?;
        Ok(())
    }
}

/// Rewrite `slots` to describe `incoming`, reusing the record id of any
/// existing slot with the same name and descriptor. Returns the ids of
/// slots that no incoming member claimed; their records are deleted.
fn reconcile_members(
    slots: &mut Vec<MemberSlot>,
    incoming: Vec<MemberInfo>,
    pool: &mut PoolState<MemberInfo>,
) -> Result<Vec<RecordId>> {
    let mut unclaimed: Vec<Option<MemberSlot>> = slots.drain(..).map(Some).collect();
    for member in incoming {
        let key = member.key();
        let reused = unclaimed
            .iter_mut()
            .find(|slot| slot.as_ref().is_some_and(|s| s.key() == key))
            .and_then(Option::take);
        let id = match reused {
            Some(slot) => {
                pool.put(slot.id, member)?;
                slot.id
            }
            None => pool.allocate(member),
        };
        slots.push(MemberSlot {
            id,
            name: key.name,
            descriptor: key.descriptor,
        });
    }
    let dropped: Vec<RecordId> = unclaimed.into_iter().flatten().map(|slot| slot.id).collect();
    for id in &dropped {
        pool.remove(*id);
    }
    Ok(dropped)
}
