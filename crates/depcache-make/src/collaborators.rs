//! Seams to the world outside the dependency graph

use depcache_core::{RawClass, Result};
use std::path::{Path, PathBuf};

/// Produces the parsed form of one compiled class file.
pub trait ClassReader: Send + Sync {
    fn parse(&self, path: &Path) -> Result<RawClass>;
}

/// Something whose uses leave no trace in bytecode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UsageTarget {
    /// A `static final` field whose constant value the compiler inlines.
    Field { owner: String, name: String },
    /// An annotation type; with `SOURCE` retention its uses vanish from bytecode.
    Annotation { type_name: String },
}

/// Source-level description of a method, used to look it up in a class
/// known only to the source index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodPattern {
    pub name: String,
    pub return_type: String,
    pub parameter_types: Vec<String>,
}

impl MethodPattern {
    /// `int size(java.lang.String arg0)` style text.
    pub fn to_source_text(&self) -> String {
        let params: Vec<String> = self
            .parameter_types
            .iter()
            .enumerate()
            .map(|(idx, ty)| format!("{ty} arg{idx}"))
            .collect();
        format!("{} {}({})", self.return_type, self.name, params.join(","))
    }
}

/// A method found through the source index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LibraryMethod {
    pub is_abstract: bool,
}

/// Text-level search over project and library sources.
pub trait SourceSearcher: Send + Sync {
    /// Qualified names of the classes whose source mentions `target`.
    fn find_usages(&self, target: &UsageTarget) -> Result<Vec<String>>;

    /// Find a method matching `pattern` in `class` or its supertypes.
    fn library_method(&self, class: &str, pattern: &MethodPattern) -> Result<Option<LibraryMethod>>;
}

/// Searcher for builds without a source index. Finds nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSourceSearch;

impl SourceSearcher for NoSourceSearch {
    fn find_usages(&self, _target: &UsageTarget) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    fn library_method(&self, _class: &str, _pattern: &MethodPattern) -> Result<Option<LibraryMethod>> {
        Ok(None)
    }
}

/// File-system facts about the build the graph cannot know by itself.
pub trait BuildContext: Send + Sync {
    /// Whether the compiled class file of `qualified_name` is on disk.
    fn class_file_exists(&self, qualified_name: &str) -> bool;

    /// Whether the source file a class was compiled from still exists.
    fn source_exists(&self, source_path: Option<&str>) -> bool;
}

/// Class files under one output directory, sources relative to a project root.
#[derive(Debug, Clone)]
pub struct OutputDirContext {
    project_root: PathBuf,
    output_dir: PathBuf,
}

impl OutputDirContext {
    pub fn new(project_root: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        OutputDirContext {
            project_root: project_root.into(),
            output_dir: output_dir.into(),
        }
    }

    /// `a.b.C$D` -> `<output_dir>/a/b/C$D.class`
    pub fn class_file(&self, qualified_name: &str) -> PathBuf {
        let mut path = self.output_dir.clone();
        let mut segments = qualified_name.split('.').peekable();
        while let Some(segment) = segments.next() {
            if segments.peek().is_some() {
                path.push(segment);
            } else {
                path.push(format!("{segment}.class"));
            }
        }
        path
    }
}

impl BuildContext for OutputDirContext {
    fn class_file_exists(&self, qualified_name: &str) -> bool {
        self.class_file(qualified_name).is_file()
    }

    fn source_exists(&self, source_path: Option<&str>) -> bool {
        match source_path {
            Some(path) => self.project_root.join(path).is_file(),
            None => false,
        }
    }
}
