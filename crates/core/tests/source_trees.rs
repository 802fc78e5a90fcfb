mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{write_tree, FakeToolchain};
use semdiff_core::model::Symbol;
use semdiff_core::source::{
    BuildError, ProjectTree, ResolveStep, SourceError, SourceTree, SymbolState, TreeKind,
};
use tempfile::tempdir;

const A_C: &str = "int foo(void) { return 1; }\nint bar(void) { return 2; }\n";
const B_C: &str = "int baz(void) { return 3; }\n";

fn project(
    files: &[(&str, &str)],
    toolchain: Arc<FakeToolchain>,
) -> (tempfile::TempDir, ProjectTree) {
    let dir = tempdir().expect("tempdir");
    write_tree(dir.path(), files);
    let tree = ProjectTree::open(dir.path(), None, toolchain).expect("open project");
    (dir, tree)
}

#[test]
fn symbols_in_one_unit_share_a_single_build() {
    let toolchain = Arc::new(FakeToolchain::new());
    let (_dir, tree) = project(&[("a.c", A_C), ("b.c", B_C)], toolchain.clone());

    let foo = tree.resolve_and_build(&Symbol::function("foo")).expect("foo");
    let bar = tree.resolve_and_build(&Symbol::function("bar")).expect("bar");
    assert!(Arc::ptr_eq(&foo.module, &bar.module));
    assert_eq!(foo.function, "foo");
    assert_eq!(toolchain.invocations(), 1);

    let baz = tree.resolve_and_build(&Symbol::function("baz")).expect("baz");
    assert!(!Arc::ptr_eq(&foo.module, &baz.module));
    assert_eq!(toolchain.invocations(), 2);
    assert_eq!(tree.built_units(), 2);

    let again = tree.resolve_and_build(&Symbol::function("foo")).expect("foo again");
    assert!(Arc::ptr_eq(&foo.module, &again.module));
    assert_eq!(toolchain.invocations(), 2);
    assert_eq!(tree.state(&Symbol::function("foo")), SymbolState::Ready);
}

#[test]
fn concurrent_requests_for_one_unit_build_once() {
    let toolchain = Arc::new(FakeToolchain::new().with_delay(Duration::from_millis(50)));
    let (_dir, tree) = project(&[("a.c", A_C)], toolchain.clone());

    let modules: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let tree = &tree;
                scope.spawn(move || {
                    let name = if i % 2 == 0 { "foo" } else { "bar" };
                    tree.resolve_and_build(&Symbol::function(name)).expect("resolve")
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().expect("join")).collect()
    });

    assert_eq!(toolchain.invocations(), 1);
    assert!(modules.iter().all(|m| Arc::ptr_eq(&m.module, &modules[0].module)));
}

#[test]
fn build_failures_are_remembered() {
    let toolchain = Arc::new(FakeToolchain::new().failing_on("a.c"));
    let (_dir, tree) = project(&[("a.c", A_C)], toolchain.clone());

    let first = tree.resolve_and_build(&Symbol::function("foo")).unwrap_err();
    assert!(matches!(first, SourceError::Build(BuildError::Compiler { status: Some(1), .. })));
    let second = tree.resolve_and_build(&Symbol::function("foo")).unwrap_err();
    assert_eq!(first, second);

    // Another symbol of the failed unit reuses the cached failure.
    assert!(tree.resolve_and_build(&Symbol::function("bar")).is_err());
    assert_eq!(toolchain.invocations(), 1);
    assert_eq!(tree.state(&Symbol::function("foo")), SymbolState::BuildFailed);
}

#[test]
fn unknown_functions_are_not_found() {
    let toolchain = Arc::new(FakeToolchain::new());
    let (_dir, tree) = project(&[("a.c", A_C)], toolchain.clone());

    let missing = Symbol::function("nowhere");
    assert_eq!(tree.state(&missing), SymbolState::Unresolved);
    let err = tree.resolve_and_build(&missing).unwrap_err();
    assert!(matches!(err, SourceError::NotFound { ref symbol } if symbol == "nowhere"));
    assert_eq!(tree.state(&missing), SymbolState::NotFound);
    assert_eq!(toolchain.invocations(), 0);
}

#[test]
fn project_trees_reject_kernel_only_symbols() {
    let toolchain = Arc::new(FakeToolchain::new());
    let (_dir, tree) = project(&[("a.c", A_C)], toolchain);

    let sysctl = Symbol::sysctl("kernel.panic");
    let err = tree.resolve_and_build(&sysctl).unwrap_err();
    assert_eq!(err.step(), Some(ResolveStep::SymbolLookup));
    assert_eq!(tree.state(&sysctl), SymbolState::ResolveFailed);
}

#[test]
fn hints_narrow_the_definition_search() {
    let toolchain = Arc::new(FakeToolchain::new());
    let (dir, tree) = project(
        &[
            ("lib/dup.c", "int dup(void) { return 1; }\n"),
            ("src/dup.c", "int dup(void) { return 2; }\n"),
        ],
        toolchain,
    );

    let hinted = Symbol::function("dup").with_hint(Some("src".to_string()));
    let module = tree.resolve_and_build(&hinted).expect("hinted dup");
    assert_eq!(module.module.source.as_deref(), Some(dir.path().join("src/dup.c").as_path()));
}

#[test]
fn compile_database_supplies_units_and_flags() {
    let toolchain = Arc::new(FakeToolchain::new());
    let dir = tempdir().expect("tempdir");
    write_tree(dir.path(), &[("src/a.c", A_C), ("unlisted.c", B_C)]);
    let build = dir.path().join("build");
    std::fs::create_dir_all(&build).expect("build dir");
    let database = serde_json::json!([{
        "directory": build,
        "file": dir.path().join("src/a.c"),
        "arguments": ["cc", "-I../include", "-DFAST=1", "-O2", "-c", "../src/a.c"],
    }]);
    std::fs::write(dir.path().join("compile_commands.json"), database.to_string())
        .expect("write database");
    let out = tempdir().expect("out dir");
    let tree = ProjectTree::open(dir.path(), Some(out.path().to_path_buf()), toolchain.clone())
        .expect("open");

    let foo = tree.resolve_and_build(&Symbol::function("foo")).expect("foo");
    assert_eq!(foo.llvm(), out.path().join("src/a.ll").as_path());
    let jobs = toolchain.jobs();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].workdir, build);
    assert_eq!(jobs[0].flags, vec!["-I../include".to_string(), "-DFAST=1".to_string()]);

    // Only database units are indexed.
    assert!(tree.resolve_and_build(&Symbol::function("baz")).is_err());
}

#[test]
fn functions_enumerates_every_definition() {
    let toolchain = Arc::new(FakeToolchain::new());
    let (dir, tree) = project(&[("a.c", A_C), ("b.c", B_C)], toolchain);

    let names: Vec<String> = tree.functions().into_iter().map(|s| s.name).collect();
    assert_eq!(names, vec!["bar", "baz", "foo"]);
    assert_eq!(tree.kind(), TreeKind::GenericBuild);
    assert_eq!(tree.root(), dir.path());
    assert_eq!(tree.toolchain_version(), Some(16));
}

#[test]
fn temporary_output_is_removed_with_the_tree() {
    let toolchain = Arc::new(FakeToolchain::new());
    let (_dir, tree) = project(&[("a.c", A_C)], toolchain);
    let module = tree.resolve_and_build(&Symbol::function("foo")).expect("foo");
    let output = tree.output_dir().to_path_buf();
    assert!(module.llvm().is_file());

    drop(module);
    drop(tree);
    assert!(!output.exists());
}
