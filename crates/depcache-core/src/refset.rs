//! Persistent referencer sets keyed by record id
//!
//! Adds and removes are buffered per key. On flush (explicit, or when the
//! buffer outgrows its limit) every touched key is written as whichever frame
//! is smaller: the complete new set, or just the delta. The log is rewritten
//! from scratch once it holds more than twice as many frames as live keys.

use crate::error::{CacheCorrupted, Result};
use crate::layout;
use crate::model::RecordId;
use crate::symbols::SymbolId;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

const MAGIC: [u8; 4] = *b"REFS";
const MIN_COMPACTION_FRAMES: usize = 64;

#[derive(Debug, Serialize, Deserialize)]
enum Frame {
    Full { key: u32, values: Vec<u32> },
    Delta { key: u32, added: Vec<u32>, removed: Vec<u32> },
    Drop { key: u32 },
}

#[derive(Debug, Default)]
struct PendingDelta {
    added: BTreeSet<u32>,
    removed: BTreeSet<u32>,
    dropped: bool,
}

#[derive(Debug, Default)]
struct RefSetState {
    committed: HashMap<u32, BTreeSet<u32>>,
    pending: HashMap<u32, PendingDelta>,
    log_frames: usize,
    log_exists: bool,
}

impl RefSetState {
    fn resolved(&self, key: u32) -> BTreeSet<u32> {
        let pending = self.pending.get(&key);
        let mut set = match pending {
            Some(delta) if delta.dropped => BTreeSet::new(),
            _ => self.committed.get(&key).cloned().unwrap_or_default(),
        };
        if let Some(delta) = pending {
            set.extend(delta.added.iter().copied());
            for value in &delta.removed {
                set.remove(value);
            }
        }
        set
    }

    fn apply(&mut self, frame: Frame) {
        match frame {
            Frame::Full { key, values } => {
                self.committed.insert(key, values.into_iter().collect());
            }
            Frame::Delta {
                key,
                added,
                removed,
            } => {
                let set = self.committed.entry(key).or_default();
                set.extend(added);
                for value in removed {
                    set.remove(&value);
                }
            }
            Frame::Drop { key } => {
                self.committed.remove(&key);
            }
        }
    }
}

/// Map from one record id to a set of referencing class qName ids.
pub struct ReferencerSets {
    name: &'static str,
    path: Option<PathBuf>,
    pending_limit: usize,
    state: Mutex<RefSetState>,
}

impl ReferencerSets {
    pub const DEFAULT_PENDING_LIMIT: usize = 4096;

    pub fn in_memory(name: &'static str) -> Self {
        ReferencerSets {
            name,
            path: None,
            pending_limit: Self::DEFAULT_PENDING_LIMIT,
            state: Mutex::new(RefSetState::default()),
        }
    }

    /// Replay the log at `path`, or start empty if it is absent.
    pub fn open(name: &'static str, path: impl AsRef<Path>, pending_limit: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut state = RefSetState::default();
        if path.exists() {
            let bytes = std::fs::read(&path)?;
            let mut cursor = Cursor::new(bytes.as_slice());
            layout::read_header(&path, MAGIC, &mut cursor)?;
            while (cursor.position() as usize) < bytes.len() {
                let frame: Frame = bincode::deserialize_from(&mut cursor)?;
                state.apply(frame);
                state.log_frames += 1;
            }
            state.committed.retain(|_, set| !set.is_empty());
            state.log_exists = true;
            tracing::debug!(
                "Replayed {} {} frames into {} sets",
                state.log_frames,
                name,
                state.committed.len()
            );
        }
        Ok(ReferencerSets {
            name,
            path: Some(path),
            pending_limit: pending_limit.max(1),
            state: Mutex::new(state),
        })
    }

    pub fn add(&self, key: RecordId, value: SymbolId) -> Result<()> {
        let mut state = self.state.lock();
        let delta = state.pending.entry(key.0).or_default();
        delta.removed.remove(&value.0);
        delta.added.insert(value.0);
        self.evict_if_full(&mut state)
    }

    pub fn remove(&self, key: RecordId, value: SymbolId) -> Result<()> {
        let mut state = self.state.lock();
        if !state.resolved(key.0).contains(&value.0) {
            return Ok(());
        }
        let delta = state.pending.entry(key.0).or_default();
        if !delta.added.remove(&value.0) || !delta.dropped {
            delta.removed.insert(value.0);
        }
        self.evict_if_full(&mut state)
    }

    /// Forget the whole set stored under `key`.
    pub fn drop_key(&self, key: RecordId) -> Result<()> {
        let mut state = self.state.lock();
        state.pending.insert(
            key.0,
            PendingDelta {
                dropped: true,
                ..PendingDelta::default()
            },
        );
        self.evict_if_full(&mut state)
    }

    pub fn get(&self, key: RecordId) -> BTreeSet<SymbolId> {
        self.state
            .lock()
            .resolved(key.0)
            .into_iter()
            .map(SymbolId)
            .collect()
    }

    pub fn contains(&self, key: RecordId, value: SymbolId) -> bool {
        self.state.lock().resolved(key.0).contains(&value.0)
    }

    /// Remove `value` from every set. Used when a referencer class disappears.
    pub fn remove_everywhere(&self, value: SymbolId) -> Result<()> {
        let mut state = self.state.lock();
        let keys: Vec<u32> = state
            .committed
            .keys()
            .chain(state.pending.keys())
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .filter(|key| state.resolved(*key).contains(&value.0))
            .collect();
        for key in keys {
            let delta = state.pending.entry(key).or_default();
            delta.added.remove(&value.0);
            delta.removed.insert(value.0);
        }
        self.evict_if_full(&mut state)
    }

    pub fn flush(&self) -> Result<()> {
        let mut state = self.state.lock();
        self.flush_locked(&mut state)
    }

    pub fn wipe(&self) -> Result<()> {
        let mut state = self.state.lock();
        *state = RefSetState::default();
        if let Some(path) = &self.path {
            layout::remove_if_exists(path)?;
        }
        Ok(())
    }

    fn evict_if_full(&self, state: &mut RefSetState) -> Result<()> {
        if state.pending.len() > self.pending_limit {
            tracing::debug!("Evicting {} pending {} sets", state.pending.len(), self.name);
            self.flush_locked(state)?;
        }
        Ok(())
    }

    fn flush_locked(&self, state: &mut RefSetState) -> Result<()> {
        if state.pending.is_empty() {
            return Ok(());
        }
        let mut keys: Vec<u32> = state.pending.keys().copied().collect();
        keys.sort_unstable();
        let mut frames = Vec::with_capacity(keys.len());
        for key in keys {
            let result = state.resolved(key);
            let Some(delta) = state.pending.remove(&key) else {
                continue;
            };
            let frame = if result.is_empty() {
                Frame::Drop { key }
            } else if delta.dropped || result.len() <= delta.added.len() + delta.removed.len() {
                Frame::Full {
                    key,
                    values: result.iter().copied().collect(),
                }
            } else {
                Frame::Delta {
                    key,
                    added: delta.added.into_iter().collect(),
                    removed: delta.removed.into_iter().collect(),
                }
            };
            if result.is_empty() {
                state.committed.remove(&key);
            } else {
                state.committed.insert(key, result);
            }
            frames.push(frame);
        }

        let Some(path) = &self.path else {
            return Ok(());
        };
        if state.log_frames + frames.len() > (2 * state.committed.len()).max(MIN_COMPACTION_FRAMES) {
            self.compact(path, state)
        } else {
            self.append(path, state, &frames)
        }
    }

    fn append(&self, path: &Path, state: &mut RefSetState, frames: &[Frame]) -> Result<()> {
        let mut bytes = if state.log_exists {
            Vec::new()
        } else {
            layout::encode_versioned(MAGIC, &())?
        };
        for frame in frames {
            bincode::serialize_into(&mut bytes, frame)?;
        }
        if let Some(parent) = path.parent() {
            layout::ensure_cache_dir(parent)?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        file.write_all(&bytes)?;
        file.sync_data()?;
        state.log_exists = true;
        state.log_frames += frames.len();
        Ok(())
    }

    fn compact(&self, path: &Path, state: &mut RefSetState) -> Result<()> {
        let mut keys: Vec<&u32> = state.committed.keys().collect();
        keys.sort_unstable();
        let mut bytes = layout::encode_versioned(MAGIC, &())?;
        for key in &keys {
            let values = state
                .committed
                .get(*key)
                .ok_or_else(|| CacheCorrupted::invariant("referencer key vanished during compaction"))?;
            let frame = Frame::Full {
                key: **key,
                values: values.iter().copied().collect(),
            };
            bincode::serialize_into(&mut bytes, &frame)?;
        }
        let frame_count = keys.len();
        layout::write_atomic(path, &bytes)?;
        state.log_exists = true;
        state.log_frames = frame_count;
        tracing::debug!("Compacted {} log to {} frames", self.name, frame_count);
        Ok(())
    }
}
