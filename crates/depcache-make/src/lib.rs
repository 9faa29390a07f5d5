//! Incremental recompilation: decides which unchanged classes must be rebuilt
//! after a round of compilation

pub mod collaborators;
pub mod config;
mod constants;
pub mod dependency_cache;
mod processor;
pub mod reader;


pub use collaborators::{
    BuildContext, ClassReader, LibraryMethod, MethodPattern, NoSourceSearch, OutputDirContext, SourceSearcher,
    UsageTarget,
};
pub use config::{ConfigError, MakeConfig, PropagationConfig, StoreConfig, CONFIG_FILE};
pub use dependency_cache::{DependencyCache, RoundState};
pub use reader::JsonClassReader;
