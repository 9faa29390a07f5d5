//! Symbol table: append-only string <-> id interning shared by every snapshot

use crate::error::{CacheCorrupted, Result};
use crate::layout;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

const MAGIC: [u8; 4] = *b"SYMT";

/// Interned string id. Stable for the lifetime of the table that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SymbolId(pub u32);

impl fmt::Display for SymbolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Symbol table mapping strings to ids and back. Thread-safe for concurrent access.
pub struct SymbolTable {
    ids: DashMap<String, SymbolId>,
    /// Reverse index; position is the id.
    names: RwLock<Vec<String>>,
    path: Option<PathBuf>,
    dirty: AtomicBool,
}

impl SymbolTable {
    /// An in-memory table that is never persisted.
    pub fn new() -> Self {
        SymbolTable {
            ids: DashMap::new(),
            names: RwLock::new(Vec::new()),
            path: None,
            dirty: AtomicBool::new(false),
        }
    }

    /// Open the table persisted at `path`, or start empty if there is none.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let names: Vec<String> = layout::load_versioned(&path, MAGIC)?.unwrap_or_default();
        let ids = DashMap::with_capacity(names.len());
        for (idx, name) in names.iter().enumerate() {
            if ids.insert(name.clone(), SymbolId(idx as u32)).is_some() {
                return Err(CacheCorrupted::invariant(format!(
                    "duplicate symbol {:?} in {}",
                    name,
                    path.display()
                )));
            }
        }
        tracing::debug!("Loaded {} symbols from {}", names.len(), path.display());
        Ok(SymbolTable {
            ids,
            names: RwLock::new(names),
            path: Some(path),
            dirty: AtomicBool::new(false),
        })
    }

    /// Intern a string, returning its existing id when already known.
    pub fn intern(&self, name: &str) -> SymbolId {
        if let Some(id) = self.ids.get(name) {
            return *id.value();
        }
        let mut names = self.names.write();
        match self.ids.entry(name.to_string()) {
            Entry::Occupied(e) => *e.get(),
            Entry::Vacant(e) => {
                let id = SymbolId(names.len() as u32);
                names.push(name.to_string());
                e.insert(id);
                self.dirty.store(true, Ordering::Release);
                id
            }
        }
    }

    /// Look up a string without interning it.
    pub fn lookup(&self, name: &str) -> Option<SymbolId> {
        self.ids.get(name).map(|r| *r.value())
    }

    /// Resolve an id back to its string. An id this table never issued means corruption.
    pub fn resolve(&self, id: SymbolId) -> Result<String> {
        self.names
            .read()
            .get(id.0 as usize)
            .cloned()
            .ok_or_else(|| CacheCorrupted::invariant(format!("unknown symbol id {}", id.0)))
    }

    /// Resolve for log output, never failing.
    pub fn display(&self, id: SymbolId) -> String {
        self.resolve(id).unwrap_or_else(|_| id.to_string())
    }

    pub fn len(&self) -> usize {
        self.names.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write the table back if anything was interned since the last save.
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if !self.dirty.load(Ordering::Acquire) {
            return Ok(());
        }
        let names = self.names.read();
        layout::save_versioned(path, MAGIC, &*names)?;
        self.dirty.store(false, Ordering::Release);
        tracing::debug!("Saved {} symbols to {}", names.len(), path.display());
        Ok(())
    }

    /// Forget every symbol and delete the persisted file.
    pub fn wipe(&self) -> Result<()> {
        let mut names = self.names.write();
        names.clear();
        self.ids.clear();
        self.dirty.store(false, Ordering::Release);
        if let Some(path) = &self.path {
            layout::remove_if_exists(path)?;
        }
        Ok(())
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SymbolTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SymbolTable")
            .field("len", &self.len())
            .field("path", &self.path)
            .finish()
    }
}
