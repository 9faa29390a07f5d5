//! depcache core: symbol table, persistent record stores and the class graph snapshot

pub mod aggregation;
pub mod annotations;
pub mod cache;
pub mod descriptor;
pub mod diff;
pub mod error;
pub mod graph;
pub mod layout;
pub mod model;
pub mod refset;
pub mod store;
pub mod symbols;

#[cfg(test)]
pub mod tests;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use aggregation::{Dependency, aggregate_back_dependencies};
pub use annotations::{AnnotationTargets, RetentionPolicy};
pub use cache::{Cache, CacheOptions};
pub use diff::{ChangeDescription, MemberChange, MemberDiff};
pub use error::{CacheCorrupted, Result};
pub use graph::GraphNavigator;
pub use model::*;
pub use refset::ReferencerSets;
pub use store::RecordPool;
pub use symbols::{SymbolId, SymbolTable};
