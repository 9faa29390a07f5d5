//! CLI command implementations

use anyhow::Context;
use depcache_core::layout;
use depcache_make::{DependencyCache, MakeConfig};
use ignore::WalkBuilder;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

pub struct RoundOptions {
    pub classes: Option<PathBuf>,
    pub removed: Vec<String>,
    pub successful: BTreeSet<String>,
    pub json: bool,
}

pub fn round(root: &Path, options: RoundOptions) -> anyhow::Result<()> {
    let config = MakeConfig::load(root)?;
    let mut cache = DependencyCache::open(root, &config)
        .with_context(|| format!("Failed to open dependency cache under {}", root.display()))?;

    let descriptors = match &options.classes {
        Some(dir) => collect_descriptors(dir)?,
        None => Vec::new(),
    };
    tracing::info!(
        "Round with {} compiled classes, {} removed sources",
        descriptors.len(),
        options.removed.len()
    );

    let marked = match run_round(&mut cache, &descriptors, &options) {
        Ok(marked) => marked,
        Err(err) => {
            // Nothing of a failed round can be trusted; the next build starts clean.
            tracing::error!("Dependency cache corrupted: {}", err);
            cache.wipe()?;
            cache.dispose()?;
            return Err(err).context("Dependency cache was wiped; rebuild all classes");
        }
    };

    if options.json {
        println!("{}", serde_json::to_string_pretty(&marked)?);
    } else {
        for name in &marked {
            println!("{name}");
        }
    }
    Ok(())
}

fn run_round(
    cache: &mut DependencyCache,
    descriptors: &[PathBuf],
    options: &RoundOptions,
) -> depcache_core::Result<Vec<String>> {
    for path in descriptors {
        cache.reparse_class_file(path)?;
    }
    for name in &options.removed {
        cache.add_source_removed(name)?;
    }
    let marked = cache.find_dependent_classes(&options.successful)?;
    cache.update()?;
    for name in cache.classes_no_longer_remote()? {
        tracing::info!("{} is no longer remote; its stubs are stale", name);
    }
    cache.dispose()?;
    tracing::info!("{} classes to recompile", marked.len());
    Ok(marked)
}

/// Every `*.json` descriptor under `dir`, in path order.
fn collect_descriptors(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let walker = WalkBuilder::new(dir)
        .hidden(true)
        .git_ignore(false)
        .git_exclude(false)
        .ignore(false)
        .build();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("Cannot read entry: {}", e);
                continue;
            }
        };
        let path = entry.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
            files.push(path.to_path_buf());
        }
    }
    files.sort();
    Ok(files)
}

pub fn show(root: &Path, qname: &str) -> anyhow::Result<()> {
    let config = MakeConfig::load(root)?;
    let cache = DependencyCache::open(root, &config)?;
    let snapshot = cache.old_cache();
    let symbols = cache.symbols();

    let q = match symbols.lookup(qname) {
        Some(q) if snapshot.contains_class(q) => q,
        _ => {
            cache.dispose()?;
            anyhow::bail!("Class {} is not in the dependency cache", qname);
        }
    };

    let names = |ids: Vec<depcache_core::SymbolId>| -> Vec<String> {
        ids.into_iter().map(|id| symbols.display(id)).collect()
    };

    println!("class       {}", qname);
    if let Some(source) = snapshot.source_path(q)? {
        println!("source      {}", source);
    }
    if let Some(superclass) = snapshot.superclass(q)? {
        println!("extends     {}", symbols.display(superclass));
    }
    let interfaces = names(snapshot.super_interfaces(q)?);
    if !interfaces.is_empty() {
        println!("implements  {}", interfaces.join(", "));
    }
    println!("remote      {}", snapshot.is_remote(q)?);
    println!("subclasses  {}", names(snapshot.subclasses(q)?).join(", "));
    for dependency in snapshot.back_dependencies(q)? {
        println!(
            "used by     {} ({} fields, {} methods)",
            symbols.display(dependency.class),
            dependency.fields.len(),
            dependency.methods.len()
        );
    }

    cache.dispose()?;
    Ok(())
}

pub fn clear(root: &Path) -> anyhow::Result<()> {
    let config = MakeConfig::load(root)?;
    let dir = config.cache_path(root);
    tracing::info!("Clearing cache at: {}", dir.display());

    layout::clear_cache(&dir)?;

    tracing::info!("Cache cleared");
    Ok(())
}
