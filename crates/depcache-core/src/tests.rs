//! Unit tests for depcache-core

use crate::test_utils::*;
use crate::*;
use std::sync::Arc;
use tempfile::TempDir;

fn sym(cache: &Cache, name: &str) -> SymbolId {
    cache.symbols().intern(name)
}

fn method_id(cache: &Cache, class: &str, name: &str, descriptor: &str) -> RecordId {
    cache
        .find_method(sym(cache, class), sym(cache, name), sym(cache, descriptor))
        .unwrap()
        .unwrap()
}

fn field_id(cache: &Cache, class: &str, name: &str, descriptor: &str) -> RecordId {
    cache
        .find_field(sym(cache, class), sym(cache, name), sym(cache, descriptor))
        .unwrap()
        .unwrap()
}

#[test]
fn test_import_reuses_member_ids() {
    let cache = memory_cache();
    let a = cache
        .import_class(
            &ClassBuilder::class("app.A")
                .method("f", "()V")
                .method("g", "()V")
                .field("x", "I")
                .build(),
        )
        .unwrap();
    let f = method_id(&cache, "app.A", "f", "()V");
    let g = method_id(&cache, "app.A", "g", "()V");
    let user = sym(&cache, "app.User");
    cache.add_method_referencer(g, user).unwrap();

    cache
        .import_class(
            &ClassBuilder::class("app.A")
                .method("f", "()V")
                .method("h", "()V")
                .field("x", "J")
                .build(),
        )
        .unwrap();

    assert_eq!(method_id(&cache, "app.A", "f", "()V"), f);
    assert!(cache.find_method(a, sym(&cache, "g"), sym(&cache, "()V")).unwrap().is_none());
    assert!(cache.member(g, MemberKind::Method).is_none());
    assert!(cache.method_referencers(g).is_empty());
    // a field whose type changed is a different member
    assert!(cache.find_field(a, sym(&cache, "x"), sym(&cache, "I")).unwrap().is_none());
    assert_eq!(cache.methods(a).unwrap().len(), 2);
}

#[test]
fn test_import_keeps_graph_state() {
    let cache = memory_cache();
    let a = cache.import_class(&ClassBuilder::class("app.A").build()).unwrap();
    let b = sym(&cache, "app.B");
    cache.add_subclass(a, b).unwrap();
    cache.set_remote(a, true).unwrap();

    cache
        .import_class(&ClassBuilder::class("app.A").method("f", "()V").build())
        .unwrap();
    assert_eq!(cache.subclasses(a).unwrap(), vec![b]);
    assert!(cache.is_remote(a).unwrap());
}

#[test]
fn test_self_supertype_is_corruption() {
    let cache = memory_cache();
    let err = cache
        .import_class(&ClassBuilder::class("app.A").extends("app.A").build())
        .unwrap_err();
    assert!(matches!(err, CacheCorrupted::Invariant(_)));

    let a = cache.import_class(&ClassBuilder::class("app.A").build()).unwrap();
    assert!(cache.add_subclass(a, a).is_err());
}

#[test]
fn test_declaration_allocated_for_unknown_class() {
    let cache = memory_cache();
    let lib = sym(&cache, "lib.Missing");
    let user = sym(&cache, "app.User");
    cache.add_class_referencer(lib, user).unwrap();

    assert!(!cache.contains_class(lib));
    assert_eq!(cache.class_referencers(lib).into_iter().collect::<Vec<_>>(), vec![user]);
    let deps = cache.back_dependencies(lib).unwrap();
    assert_eq!(deps.len(), 1);
    assert_eq!(deps[0].class, user);
}

#[test]
fn test_back_dependencies_group_by_referencer() {
    let cache = memory_cache();
    let a = cache
        .import_class(
            &ClassBuilder::class("app.A")
                .method("f", "()V")
                .constructor("()V")
                .field("x", "I")
                .build(),
        )
        .unwrap();
    let b = sym(&cache, "app.B");
    let c = sym(&cache, "app.C");
    cache.add_method_referencer(method_id(&cache, "app.A", "f", "()V"), b).unwrap();
    cache.add_method_referencer(method_id(&cache, "app.A", "<init>", "()V"), b).unwrap();
    cache.add_field_referencer(field_id(&cache, "app.A", "x", "I"), c).unwrap();
    cache.add_class_referencer(a, c).unwrap();
    // references from the class itself are not dependencies
    cache.add_class_referencer(a, a).unwrap();
    cache.add_method_referencer(method_id(&cache, "app.A", "f", "()V"), a).unwrap();

    let deps = cache.back_dependencies(a).unwrap();
    assert_eq!(deps.len(), 2);
    let dep_b = deps.iter().find(|d| d.class == b).unwrap();
    assert_eq!(dep_b.methods.len(), 2);
    assert!(dep_b.fields.is_empty());
    assert!(dep_b.uses_constructor());
    let dep_c = deps.iter().find(|d| d.class == c).unwrap();
    assert!(dep_c.uses_field(sym(&cache, "x")));
    assert!(dep_c.methods.is_empty());
}

#[test]
fn test_find_methods_by_signature_sees_covariant_pair() {
    let cache = memory_cache();
    let a = cache
        .import_class(
            &ClassBuilder::class("app.A")
                .method("get", "()Ljava/lang/String;")
                .method_with(raw_method(
                    "get",
                    "()Ljava/lang/Object;",
                    AccessFlags::PUBLIC | AccessFlags::BRIDGE,
                ))
                .method("get", "(I)Ljava/lang/String;")
                .build(),
        )
        .unwrap();
    assert_eq!(cache.find_methods_by_signature(a, "get()").unwrap().len(), 2);
    assert_eq!(cache.find_methods_by_signature(a, "get(I)").unwrap().len(), 1);
    assert_eq!(cache.find_methods_by_name(a, sym(&cache, "get")).unwrap().len(), 3);
}

#[test]
fn test_remove_class_cascades() {
    let cache = memory_cache();
    let a = cache
        .import_class(&ClassBuilder::class("app.A").method("f", "()V").build())
        .unwrap();
    let b = cache
        .import_class(
            &ClassBuilder::class("app.B")
                .extends("app.A")
                .field("y", "I")
                .calls("app.A", "f", "()V")
                .build(),
        )
        .unwrap();
    let f = method_id(&cache, "app.A", "f", "()V");
    let y = field_id(&cache, "app.B", "y", "I");
    cache.add_subclass(a, b).unwrap();
    cache.add_class_referencer(a, b).unwrap();
    cache.add_method_referencer(f, b).unwrap();
    cache.add_field_referencer(y, a).unwrap();

    cache.remove_class(b).unwrap();
    assert!(!cache.contains_class(b));
    assert!(cache.class_record(b).unwrap().is_none());
    assert!(cache.fields(b).unwrap().is_empty());
    assert!(cache.member(y, MemberKind::Field).is_none());
    assert!(cache.subclasses(a).unwrap().is_empty());
    assert!(cache.class_referencers(a).is_empty());
    assert!(cache.method_referencers(f).is_empty());
    assert!(cache.back_dependencies(a).unwrap().is_empty());
    assert_eq!(cache.all_classes(), vec![a]);

    // A user that outlives A loses its forward edge too.
    let c = cache
        .import_class(&ClassBuilder::class("app.C").calls("app.A", "f", "()V").build())
        .unwrap();
    cache.add_referenced_class(c, a).unwrap();
    cache.add_method_referencer(f, c).unwrap();
    assert!(cache.referenced_classes(c).unwrap().contains(&a));

    cache.remove_class(a).unwrap();
    assert!(cache.field_referencers(y).is_empty());
    assert!(cache.referenced_classes(c).unwrap().is_empty());
    assert_eq!(cache.all_classes(), vec![c]);
}

#[test]
fn test_import_from_other_snapshot() {
    let symbols = Arc::new(SymbolTable::new());
    let old = Cache::in_memory(symbols.clone());
    let new = Cache::in_memory(symbols.clone());
    let a = old
        .import_class(&ClassBuilder::class("app.A").method("f", "()V").method("g", "()V").build())
        .unwrap();
    let f = method_id(&old, "app.A", "f", "()V");
    let b = symbols.intern("app.B");
    old.add_subclass(a, b).unwrap();
    old.add_method_referencer(f, b).unwrap();

    new.import_class(
        &ClassBuilder::class("app.A")
            .flags(AccessFlags::PUBLIC | AccessFlags::FINAL)
            .method("f", "()V")
            .build(),
    )
    .unwrap();
    old.import_from(&new, a).unwrap();

    assert!(old.flags(a).unwrap().is_final());
    assert_eq!(old.methods(a).unwrap().len(), 1);
    assert_eq!(method_id(&old, "app.A", "f", "()V"), f);
    assert!(old.method_referencers(f).contains(&b));
    assert_eq!(old.subclasses(a).unwrap(), vec![b]);
    assert!(old.import_from(&new, symbols.intern("app.Unknown")).is_err());
}

#[test]
fn test_persistence_round_trip() {
    let dir = TempDir::new().unwrap();
    let symbols_path = dir.path().join(layout::SYMBOLS_FILE);
    let snapshot = dir.path().join(layout::SNAPSHOT_DIR);

    let (a, b, f) = {
        let symbols = Arc::new(SymbolTable::open(&symbols_path).unwrap());
        let cache = Cache::open(&snapshot, symbols.clone(), CacheOptions { pending_limit: 2 }).unwrap();
        let a = cache
            .import_class(
                &ClassBuilder::class("app.A")
                    .method("f", "()V")
                    .constant("LIMIT", "I", ConstantValue::Int(3))
                    .build(),
            )
            .unwrap();
        let b = cache
            .import_class(&ClassBuilder::class("app.B").extends("app.A").uses("app.A").build())
            .unwrap();
        let f = method_id(&cache, "app.A", "f", "()V");
        cache.add_subclass(a, b).unwrap();
        cache.add_class_referencer(a, b).unwrap();
        cache.add_method_referencer(f, b).unwrap();
        cache.dispose().unwrap();
        symbols.save().unwrap();
        (a, b, f)
    };

    let reopen = || {
        let symbols = Arc::new(SymbolTable::open(&symbols_path).unwrap());
        Cache::open(&snapshot, symbols, CacheOptions::default()).unwrap()
    };

    let cache = reopen();
    assert_eq!(cache.all_classes(), vec![a, b]);
    assert_eq!(cache.subclasses(a).unwrap(), vec![b]);
    assert_eq!(cache.superclass(b).unwrap(), Some(a));
    assert_eq!(
        cache.fields(a).unwrap()[0].constant(),
        Some(&ConstantValue::Int(3))
    );
    let deps = cache.back_dependencies(a).unwrap();
    assert_eq!(deps.len(), 1);
    assert_eq!(deps[0].class, b);
    assert_eq!(deps[0].methods.len(), 1);
    assert!(cache.method_referencers(f).contains(&b));
    let record_before = cache.class_record(b).unwrap();
    drop(cache);

    // indexes are rebuilt from the pools when their files are gone
    std::fs::remove_file(snapshot.join(cache::CLASS_INDEX_FILE)).unwrap();
    std::fs::remove_file(snapshot.join(cache::DECLARATION_INDEX_FILE)).unwrap();
    let cache = reopen();
    assert_eq!(cache.class_record(b).unwrap(), record_before);
    assert_eq!(cache.back_dependencies(a).unwrap().len(), 1);
    let c = cache.import_class(&ClassBuilder::class("app.C").build()).unwrap();
    assert!(cache.contains_class(c));
}

#[test]
fn test_wipe_forgets_everything() {
    let dir = TempDir::new().unwrap();
    let symbols = Arc::new(SymbolTable::new());
    let cache = Cache::open(dir.path(), symbols.clone(), CacheOptions::default()).unwrap();
    let a = cache.import_class(&ClassBuilder::class("app.A").method("f", "()V").build()).unwrap();
    cache.add_class_referencer(a, symbols.intern("app.B")).unwrap();
    cache.dispose().unwrap();

    cache.wipe().unwrap();
    assert_eq!(cache.class_count(), 0);
    assert!(!cache.contains_class(a));
    assert!(cache.class_referencers(a).is_empty());
    assert!(!dir.path().join(cache::CLASSES_FILE).exists());
}

#[test]
fn test_corrupted_pool_refuses_to_open() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join(cache::METHODS_FILE), b"garbage").unwrap();
    let symbols = Arc::new(SymbolTable::new());
    assert!(Cache::open(dir.path(), symbols, CacheOptions::default()).is_err());
}

// ── Graph navigation ────────────────────────────────────────

fn hierarchy() -> (Cache, SymbolId, SymbolId, SymbolId, SymbolId) {
    let cache = memory_cache();
    let a = cache.import_class(&ClassBuilder::class("app.A").build()).unwrap();
    let i = cache.import_class(&ClassBuilder::interface("app.I").build()).unwrap();
    let b = cache
        .import_class(&ClassBuilder::class("app.B").extends("app.A").implements("app.I").build())
        .unwrap();
    let c = cache
        .import_class(&ClassBuilder::class("app.C").extends("app.B").build())
        .unwrap();
    cache.add_subclass(a, b).unwrap();
    cache.add_subclass(i, b).unwrap();
    cache.add_subclass(b, c).unwrap();
    (cache, a, i, b, c)
}

#[test]
fn test_walk_super_classes_depth_first() {
    let (cache, a, i, b, c) = hierarchy();
    let object = sym(&cache, OBJECT);
    let navigator = GraphNavigator::new(&cache);
    // The superclass chain is exhausted before B's interface is entered.
    assert_eq!(navigator.all_supertypes(c).unwrap(), vec![b, a, object, i]);

    let mut visited = Vec::new();
    navigator
        .walk_super_classes(c, |q| {
            visited.push(q);
            Ok(q != b)
        })
        .unwrap();
    assert_eq!(visited, vec![b]);
}

#[test]
fn test_walk_sub_classes_is_transitive() {
    let (cache, a, i, b, c) = hierarchy();
    let navigator = GraphNavigator::new(&cache);
    assert_eq!(navigator.all_subclasses(a).unwrap(), vec![b, c]);
    assert_eq!(navigator.all_subclasses(i).unwrap(), vec![b, c]);
    assert!(navigator.all_subclasses(c).unwrap().is_empty());
    navigator.check_acyclic([a, i, b, c]).unwrap();
}

#[test]
fn test_inheritance_cycle_is_corruption() {
    let cache = memory_cache();
    let a = cache
        .import_class(&ClassBuilder::class("app.A").extends("app.B").build())
        .unwrap();
    cache
        .import_class(&ClassBuilder::class("app.B").extends("app.A").build())
        .unwrap();
    let navigator = GraphNavigator::new(&cache);
    assert!(navigator.check_acyclic([a]).is_err());
    assert!(navigator.all_supertypes(a).is_err());
}

// ── Member diff ─────────────────────────────────────────────

#[test]
fn test_field_diff_matches_by_name() {
    let cache = memory_cache();
    let old = cache
        .import_class(&ClassBuilder::class("app.Old").field("x", "I").field("y", "I").build())
        .unwrap();
    let new = cache
        .import_class(&ClassBuilder::class("app.New").field("x", "J").field("z", "I").build())
        .unwrap();
    let diff = MemberDiff::fields(&cache.fields(old).unwrap(), &cache.fields(new).unwrap());

    let names = |members: &[MemberInfo]| -> Vec<String> {
        members.iter().map(|m| cache.symbols().display(m.name)).collect()
    };
    assert_eq!(names(&diff.added), vec!["z"]);
    assert_eq!(names(&diff.removed), vec!["y"]);
    assert_eq!(diff.changed.len(), 1);
    assert!(diff.changed[0].description.descriptor_changed);
}

#[test]
fn test_method_diff_covariant_group() {
    let cache = memory_cache();
    let old = cache
        .import_class(
            &ClassBuilder::class("app.Old")
                .method("get", "()Ljava/lang/Object;")
                .method("f", "(I)V")
                .build(),
        )
        .unwrap();
    let new = cache
        .import_class(
            &ClassBuilder::class("app.New")
                .method("get", "()Ljava/lang/String;")
                .method("get", "()Ljava/lang/Object;")
                .method("f", "(I)V")
                .method("f", "(J)V")
                .build(),
        )
        .unwrap();
    let diff = MemberDiff::methods(
        &cache.methods(old).unwrap(),
        &cache.methods(new).unwrap(),
        cache.symbols(),
    )
    .unwrap();

    assert_eq!(diff.added.len(), 1);
    assert_eq!(cache.symbols().display(diff.added[0].descriptor), "(J)V");
    assert!(diff.removed.is_empty());
    assert_eq!(diff.changed.len(), 1);
    let change = &diff.changed[0];
    assert_eq!(cache.symbols().display(change.new.descriptor), "()Ljava/lang/String;");
    assert!(change.description.descriptor_changed);
    assert!(change.description.affects_callers());
}

#[test]
fn test_method_change_description() {
    let cache = memory_cache();
    let mut restricted = raw_method("run", "()V", AccessFlags::PROTECTED | AccessFlags::ABSTRACT);
    restricted.exceptions.push("java.io.IOException".to_string());
    let old = cache
        .import_class(&ClassBuilder::class("app.Old").method("run", "()V").build())
        .unwrap();
    let new = cache
        .import_class(&ClassBuilder::class("app.New").method_with(restricted).build())
        .unwrap();
    let diff = MemberDiff::methods(
        &cache.methods(old).unwrap(),
        &cache.methods(new).unwrap(),
        cache.symbols(),
    )
    .unwrap();

    let description = diff.change_of(&cache.methods(old).unwrap()[0]).unwrap();
    assert!(description.access_restricted);
    assert!(description.became_abstract);
    assert!(description.throws_changed);
    assert!(!description.descriptor_changed);
    assert!(!description.static_changed);
    assert!(description.affects_callers());
}

#[test]
fn test_unchanged_members_produce_empty_diff() {
    let cache = memory_cache();
    let build = |name: &str| {
        ClassBuilder::class(name)
            .field("x", "I")
            .method("f", "(Ljava/lang/String;)V")
            .build()
    };
    let old = cache.import_class(&build("app.Old")).unwrap();
    let new = cache.import_class(&build("app.New")).unwrap();
    assert!(MemberDiff::fields(&cache.fields(old).unwrap(), &cache.fields(new).unwrap()).is_empty());
    assert!(
        MemberDiff::methods(&cache.methods(old).unwrap(), &cache.methods(new).unwrap(), cache.symbols())
            .unwrap()
            .is_empty()
    );
}

#[test]
fn test_back_dependencies_snapshot() {
    let cache = memory_cache();
    let a = cache
        .import_class(&ClassBuilder::class("app.A").method("f", "()V").field("x", "I").build())
        .unwrap();
    let b = sym(&cache, "app.B");
    let c = sym(&cache, "app.C");
    cache.add_method_referencer(method_id(&cache, "app.A", "f", "()V"), b).unwrap();
    cache.add_field_referencer(field_id(&cache, "app.A", "x", "I"), c).unwrap();
    cache.add_class_referencer(a, c).unwrap();

    let symbols = cache.symbols();
    let rendered: Vec<String> = cache
        .back_dependencies(a)
        .unwrap()
        .iter()
        .map(|dep| {
            let fields: Vec<String> = dep.fields.iter().map(|f| symbols.display(f.name)).collect();
            let methods: Vec<String> = dep.methods.iter().map(|m| symbols.display(m.name)).collect();
            format!(
                "{} fields={:?} methods={:?}",
                symbols.display(dep.class),
                fields,
                methods
            )
        })
        .collect();
    insta::assert_snapshot!(rendered.join("\n"), @r#"
    app.B fields=[] methods=["f"]
    app.C fields=["x"] methods=[]
    "#);
}
