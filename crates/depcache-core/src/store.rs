//! Persistent record pools with stable ids
//!
//! Each pool owns one backing file and one lock. Callers that touch several
//! pools in one logical operation take the locks in the order
//! classes -> declarations -> fields -> methods and release them before
//! calling back into anything that may lock again.

use crate::error::{CacheCorrupted, Result};
use crate::layout;
use crate::model::RecordId;
use parking_lot::{Mutex, MutexGuard};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

const MAGIC: [u8; 4] = *b"POOL";

/// In-memory state of a pool, reachable through [`RecordPool::lock`].
#[derive(Debug, Serialize, Deserialize)]
pub struct PoolState<T> {
    next_id: u32,
    records: BTreeMap<u32, T>,
    #[serde(skip)]
    dirty: bool,
}

impl<T> PoolState<T> {
    fn empty() -> Self {
        PoolState {
            next_id: 0,
            records: BTreeMap::new(),
            dirty: false,
        }
    }

    /// Store a new record under a fresh id.
    pub fn allocate(&mut self, record: T) -> RecordId {
        let id = self.next_id;
        self.next_id += 1;
        self.records.insert(id, record);
        self.dirty = true;
        RecordId(id)
    }

    pub fn get(&self, id: RecordId) -> Option<&T> {
        self.records.get(&id.0)
    }

    /// A live record, or corruption if `id` is dangling.
    pub fn require(&self, id: RecordId, pool: &str) -> Result<&T> {
        self.records
            .get(&id.0)
            .ok_or_else(|| CacheCorrupted::invariant(format!("dangling {pool} record {id}")))
    }

    /// Mutable access; marks the pool dirty.
    pub fn get_mut(&mut self, id: RecordId) -> Option<&mut T> {
        let record = self.records.get_mut(&id.0);
        if record.is_some() {
            self.dirty = true;
        }
        record
    }

    /// Overwrite an existing record. Writing an id never allocated is corruption.
    pub fn put(&mut self, id: RecordId, record: T) -> Result<()> {
        if id.0 >= self.next_id {
            return Err(CacheCorrupted::invariant(format!(
                "write to unallocated record {id}"
            )));
        }
        self.records.insert(id.0, record);
        self.dirty = true;
        Ok(())
    }

    pub fn remove(&mut self, id: RecordId) -> Option<T> {
        let removed = self.records.remove(&id.0);
        if removed.is_some() {
            self.dirty = true;
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (RecordId, &T)> {
        self.records.iter().map(|(id, r)| (RecordId(*id), r))
    }
}

/// A pool of records of one kind (class infos, declarations, fields, methods).
pub struct RecordPool<T> {
    name: &'static str,
    path: Option<PathBuf>,
    state: Mutex<PoolState<T>>,
}

impl<T> RecordPool<T>
where
    T: Serialize + DeserializeOwned + Clone,
{
    /// A pool that lives only in memory.
    pub fn in_memory(name: &'static str) -> Self {
        RecordPool {
            name,
            path: None,
            state: Mutex::new(PoolState::empty()),
        }
    }

    /// Open the pool persisted at `path`, or start empty if the file is absent.
    pub fn open(name: &'static str, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let state = match layout::load_versioned::<PoolState<T>>(&path, MAGIC)? {
            Some(state) => {
                if let Some(last) = state.records.keys().next_back() {
                    if *last >= state.next_id {
                        return Err(CacheCorrupted::invariant(format!(
                            "{name} pool record {last} beyond allocation mark {}",
                            state.next_id
                        )));
                    }
                }
                tracing::debug!("Loaded {} {} records", state.records.len(), name);
                state
            }
            None => PoolState::empty(),
        };
        Ok(RecordPool {
            name,
            path: Some(path),
            state: Mutex::new(state),
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Hold this pool's lock for the duration of one logical operation.
    pub fn lock(&self) -> MutexGuard<'_, PoolState<T>> {
        self.state.lock()
    }

    pub fn allocate(&self, record: T) -> RecordId {
        self.lock().allocate(record)
    }

    pub fn get(&self, id: RecordId) -> Option<T> {
        self.lock().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Persist the pool if it changed since the last flush.
    pub fn flush(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let mut state = self.lock();
        if !state.dirty {
            return Ok(());
        }
        layout::save_versioned(path, MAGIC, &*state)?;
        state.dirty = false;
        tracing::debug!("Flushed {} {} records", state.records.len(), self.name);
        Ok(())
    }

    /// Drop every record and the backing file. Ids restart from zero.
    pub fn wipe(&self) -> Result<()> {
        let mut state = self.lock();
        *state = PoolState::empty();
        if let Some(path) = &self.path {
            layout::remove_if_exists(path)?;
        }
        Ok(())
    }
}
