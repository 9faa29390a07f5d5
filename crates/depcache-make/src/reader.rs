//! Class descriptors stored as JSON, one class per file

use crate::collaborators::ClassReader;
use depcache_core::{RawClass, Result};
use std::path::Path;

/// Reads the JSON form of [`RawClass`] written by an external bytecode
/// front end.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonClassReader;

impl ClassReader for JsonClassReader {
    fn parse(&self, path: &Path) -> Result<RawClass> {
        let content = std::fs::read_to_string(path)?;
        let raw: RawClass = serde_json::from_str(&content)?;
        tracing::trace!("Parsed class descriptor {} from {}", raw.qualified_name, path.display());
        Ok(raw)
    }
}
