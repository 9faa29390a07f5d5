//! On-disk layout of a dependency cache directory

use crate::error::{CacheCorrupted, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::path::{Path, PathBuf};

/// Cache directory: .depcache/
pub const CACHE_DIR: &str = ".depcache";

/// Marker written by a completed `dispose()`.
pub const MANIFEST: &str = "manifest.json";

/// Symbol table shared by both snapshots.
pub const SYMBOLS_FILE: &str = "symbols.bin";

/// Subdirectory holding the last successful build snapshot.
pub const SNAPSHOT_DIR: &str = "snapshot";

/// Bumped whenever any record layout changes.
pub const FORMAT_VERSION: u32 = 1;

/// Get cache directory path
pub fn cache_dir(root: &Path) -> PathBuf {
    root.join(CACHE_DIR)
}

/// Get manifest file path
pub fn manifest_path(cache_dir: &Path) -> PathBuf {
    cache_dir.join(MANIFEST)
}

/// Ensure cache directory exists
pub fn ensure_cache_dir(dir: &Path) -> std::io::Result<()> {
    if !dir.exists() {
        std::fs::create_dir_all(dir)?;
    }
    Ok(())
}

/// Clear cache directory
pub fn clear_cache(dir: &Path) -> std::io::Result<()> {
    if dir.exists() {
        std::fs::remove_dir_all(dir)?;
    }
    Ok(())
}

/// Contents of `manifest.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Manifest {
    pub version: String,
    pub format: u32,
    pub class_count: usize,
    pub saved_at: String,
}

/// Write the manifest marking `dir` as a consistent cache.
pub fn save_manifest(dir: &Path, class_count: usize) -> Result<()> {
    ensure_cache_dir(dir)?;
    let manifest = Manifest {
        version: env!("CARGO_PKG_VERSION").to_string(),
        format: FORMAT_VERSION,
        class_count,
        saved_at: chrono::Utc::now().to_rfc3339(),
    };
    let json_str = serde_json::to_string_pretty(&manifest)?;
    write_atomic(&manifest_path(dir), json_str.as_bytes())?;
    tracing::debug!("Cache manifest saved: {}", dir.display());
    Ok(())
}

/// Load the manifest, `None` if the directory was never disposed cleanly.
pub fn load_manifest(dir: &Path) -> Result<Option<Manifest>> {
    let path = manifest_path(dir);
    if !path.exists() {
        return Ok(None);
    }
    let json_str = std::fs::read_to_string(&path)?;
    let manifest: Manifest = serde_json::from_str(&json_str)?;
    if manifest.format != FORMAT_VERSION {
        return Err(CacheCorrupted::VersionMismatch {
            file: path.display().to_string(),
            expected: FORMAT_VERSION,
            found: manifest.format,
        });
    }
    Ok(Some(manifest))
}

/// Remove the manifest so an interrupted write is detected on next open.
pub fn invalidate_manifest(dir: &Path) -> std::io::Result<()> {
    let path = manifest_path(dir);
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    Ok(())
}

#[derive(Serialize, Deserialize)]
struct FileHeader {
    magic: [u8; 4],
    version: u32,
}

/// Write `bytes` to a sibling temp file and rename it over `path`.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        ensure_cache_dir(parent)?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)
}

/// Encode `payload` behind a magic tag and [`FORMAT_VERSION`].
pub fn encode_versioned<T: Serialize>(magic: [u8; 4], payload: &T) -> Result<Vec<u8>> {
    let mut bytes = bincode::serialize(&FileHeader {
        magic,
        version: FORMAT_VERSION,
    })?;
    bincode::serialize_into(&mut bytes, payload)?;
    Ok(bytes)
}

/// Decode the header written by [`encode_versioned`], leaving the cursor on the payload.
pub fn read_header(path: &Path, magic: [u8; 4], cursor: &mut Cursor<&[u8]>) -> Result<()> {
    let header: FileHeader = bincode::deserialize_from(&mut *cursor)?;
    if header.magic != magic {
        return Err(CacheCorrupted::invariant(format!(
            "{} is not a {} file",
            path.display(),
            String::from_utf8_lossy(&magic)
        )));
    }
    if header.version != FORMAT_VERSION {
        return Err(CacheCorrupted::VersionMismatch {
            file: path.display().to_string(),
            expected: FORMAT_VERSION,
            found: header.version,
        });
    }
    Ok(())
}

/// Read a file written with [`encode_versioned`]; `None` if it does not exist.
pub fn load_versioned<T: DeserializeOwned>(path: &Path, magic: [u8; 4]) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let bytes = std::fs::read(path)?;
    let mut cursor = Cursor::new(bytes.as_slice());
    read_header(path, magic, &mut cursor)?;
    let payload = bincode::deserialize_from(&mut cursor)?;
    if (cursor.position() as usize) != bytes.len() {
        return Err(CacheCorrupted::invariant(format!(
            "trailing bytes in {}",
            path.display()
        )));
    }
    Ok(Some(payload))
}

/// Persist `payload` with [`encode_versioned`] through [`write_atomic`].
pub fn save_versioned<T: Serialize>(path: &Path, magic: [u8; 4], payload: &T) -> Result<()> {
    let bytes = encode_versioned(magic, payload)?;
    write_atomic(path, &bytes)?;
    Ok(())
}

/// Delete a file if present, ignoring "not found".
pub fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}
