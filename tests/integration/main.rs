//! Integration tests for depcache
//!
//! Full build rounds through the public API and the CLI, with the cache
//! persisted between rounds.

use depcache_core::layout;
use depcache_core::test_utils::*;
use depcache_make::{DependencyCache, MakeConfig, CONFIG_FILE};
use std::collections::BTreeSet;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

fn depcache(root: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_depcache"))
        .arg("--root")
        .arg(root)
        .args(args)
        .output()
        .expect("Failed to execute depcache")
}

fn stdout_lines(output: &Output) -> Vec<String> {
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(str::to_string)
        .collect()
}

/// One round through the library, reading descriptors the way the CLI does.
fn library_round(root: &Path, round_dir: &str, classes: &[depcache_core::RawClass]) -> Vec<String> {
    let paths = write_descriptors(&root.join(round_dir), classes);
    let mut cache = DependencyCache::open(root, &MakeConfig::default()).unwrap();
    for path in &paths {
        cache.reparse_class_file(path).unwrap();
    }
    let marked = cache.find_dependent_classes(&BTreeSet::new()).unwrap();
    cache.update().unwrap();
    cache.dispose().unwrap();
    marked
}

#[test]
fn test_rounds_persist_between_sessions() {
    let project = TempDir::new().unwrap();
    let a = ClassBuilder::class("p.A").method("f", "()V").method("g", "()V").build();
    let b = ClassBuilder::class("p.B").calls("p.A", "f", "()V").build();
    let c = ClassBuilder::class("p.C").calls("p.A", "g", "()V").build();
    assert!(library_round(project.path(), "round1", &[a, b, c]).is_empty());

    let a2 = ClassBuilder::class("p.A").method("g", "()V").build();
    assert_eq!(library_round(project.path(), "round2", &[a2]), vec!["p.B"]);

    // The second round's snapshot was merged and saved.
    let a3 = ClassBuilder::class("p.A").build();
    assert_eq!(library_round(project.path(), "round3", &[a3]), vec!["p.C"]);
}

#[test]
fn test_subclass_dependents_survive_reopen() {
    let project = TempDir::new().unwrap();
    let base = ClassBuilder::class("p.Base").build();
    let derived = ClassBuilder::class("p.Derived").extends("p.Base").build();
    let user = ClassBuilder::class("p.User").uses("p.Derived").build();
    library_round(project.path(), "round1", &[base, derived, user]);

    let other = ClassBuilder::class("p.Other").build();
    let base2 = ClassBuilder::class("p.Base").extends("p.Other").build();
    let marked = library_round(project.path(), "round2", &[other, base2]);
    assert_eq!(marked, vec!["p.Derived", "p.User"]);
}

#[test]
fn test_config_moves_cache_dir() {
    let project = TempDir::new().unwrap();
    std::fs::write(project.path().join(CONFIG_FILE), "cache_dir = \"build/deps\"\n").unwrap();
    let config = MakeConfig::load(project.path()).unwrap();

    let mut cache = DependencyCache::open(project.path(), &config).unwrap();
    cache.import_class(&ClassBuilder::class("p.A").build()).unwrap();
    cache.update().unwrap();
    cache.dispose().unwrap();

    let manifest = layout::manifest_path(&project.path().join("build/deps"));
    assert!(manifest.exists());
    assert!(!project.path().join(".depcache").exists());
}

// ── CLI ─────────────────────────────────────────────────────

#[test]
fn test_cli_help() {
    let project = TempDir::new().unwrap();
    let output = depcache(project.path(), &["--help"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("depcache"));
    assert!(stdout.contains("round"));
}

#[test]
fn test_cli_version() {
    let project = TempDir::new().unwrap();
    let output = depcache(project.path(), &["version"]);
    assert!(output.status.success());
    assert_eq!(
        stdout_lines(&output),
        vec![format!("depcache v{}", env!("CARGO_PKG_VERSION"))]
    );
}

#[test]
fn test_cli_rounds_report_dependents() {
    let project = TempDir::new().unwrap();
    let a = ClassBuilder::class("p.A").method("f", "()V").build();
    let b = ClassBuilder::class("p.B").calls("p.A", "f", "()V").build();
    write_descriptors(&project.path().join("round1"), &[a, b]);
    let round1 = project.path().join("round1");
    let output = depcache(project.path(), &["round", "--classes", round1.to_str().unwrap()]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert!(stdout_lines(&output).is_empty());

    write_descriptors(&project.path().join("round2"), &[ClassBuilder::class("p.A").build()]);
    let round2 = project.path().join("round2");
    let output = depcache(project.path(), &["round", "--classes", round2.to_str().unwrap(), "--json"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let marked: Vec<String> = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(marked, vec!["p.B"]);
}

#[test]
fn test_cli_removed_source_marks_users() {
    let project = TempDir::new().unwrap();
    let a = ClassBuilder::class("p.A").build();
    let b = ClassBuilder::class("p.B").uses("p.A").build();
    write_descriptors(&project.path().join("round1"), &[a, b]);
    let round1 = project.path().join("round1");
    assert!(depcache(project.path(), &["round", "--classes", round1.to_str().unwrap()])
        .status
        .success());

    let output = depcache(project.path(), &["round", "--removed", "p.A"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert_eq!(stdout_lines(&output), vec!["p.B"]);

    let output = depcache(project.path(), &["show", "p.A"]);
    assert!(!output.status.success());
}

#[test]
fn test_cli_successful_classes_are_skipped() {
    let project = TempDir::new().unwrap();
    let a = ClassBuilder::class("p.A").method("f", "()V").build();
    let b = ClassBuilder::class("p.B").calls("p.A", "f", "()V").build();
    let c = ClassBuilder::class("p.C").calls("p.A", "f", "()V").build();
    write_descriptors(&project.path().join("round1"), &[a, b, c]);
    let round1 = project.path().join("round1");
    depcache(project.path(), &["round", "--classes", round1.to_str().unwrap()]);

    write_descriptors(&project.path().join("round2"), &[ClassBuilder::class("p.A").build()]);
    let round2 = project.path().join("round2");
    let output = depcache(
        project.path(),
        &["round", "--classes", round2.to_str().unwrap(), "--successful", "p.B"],
    );
    assert_eq!(stdout_lines(&output), vec!["p.C"]);
}

#[test]
fn test_cli_show_and_clear() {
    let project = TempDir::new().unwrap();
    let base = ClassBuilder::class("p.Base").build();
    let derived = ClassBuilder::class("p.Derived").extends("p.Base").build();
    let user = ClassBuilder::class("p.User").uses("p.Base").build();
    write_descriptors(&project.path().join("round1"), &[base, derived, user]);
    let round1 = project.path().join("round1");
    depcache(project.path(), &["round", "--classes", round1.to_str().unwrap()]);

    let output = depcache(project.path(), &["show", "p.Base"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("subclasses  p.Derived"));
    assert!(stdout.contains("used by     p.User"));

    let output = depcache(project.path(), &["clear"]);
    assert!(output.status.success());
    assert!(!project.path().join(".depcache").exists());
}

#[test]
fn test_cli_malformed_descriptor_wipes_cache() {
    let project = TempDir::new().unwrap();
    write_descriptors(&project.path().join("round1"), &[ClassBuilder::class("p.A").build()]);
    let round1 = project.path().join("round1");
    depcache(project.path(), &["round", "--classes", round1.to_str().unwrap()]);

    let round2 = project.path().join("round2");
    std::fs::create_dir_all(&round2).unwrap();
    std::fs::write(round2.join("p.B.json"), "{ not json").unwrap();
    let output = depcache(project.path(), &["round", "--classes", round2.to_str().unwrap()]);
    assert!(!output.status.success());

    let config = MakeConfig::default();
    let cache = DependencyCache::open(project.path(), &config).unwrap();
    assert_eq!(cache.old_cache().class_count(), 0);
}
