#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use predicates::prelude::*;
use tempfile::tempdir;

/// Stand-in for clang: lowers `int NAME(void) { return N; }` lines to IR.
/// Arguments end with `<source> -o <output>`.
const FAKE_CLANG: &str = r#"#!/bin/sh
if [ "$1" = "--version" ]; then
  echo "clang version 16.0.6"
  exit 0
fi
while [ $# -gt 3 ]; do shift; done
awk '$1 == "int" && $3 == "{" && $4 == "return" && $6 == "}" {
  name = $2; sub(/[(]void[)]/, "", name)
  value = $5; sub(/;/, "", value)
  printf "define i32 @%s() {\n  ret i32 %s\n}\n\n", name, value
}' "$1" > "$3"
"#;

fn install_fake_clang(dir: &Path) -> PathBuf {
    let path = dir.join("fake-clang");
    fs::write(&path, FAKE_CLANG).expect("write fake clang");
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod fake clang");
    path
}

fn semdiff(cwd: &Path, clang: &Path) -> assert_cmd::Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("semdiff");
    cmd.current_dir(cwd)
        .env("SEMDIFF_CLANG", clang)
        .env("SEMDIFF_FAKE_LLVM_VERSION", "16")
        .env_remove("SEMDIFF_SIMPLL_FAKE_REPORT")
        .env_remove("RUST_LOG");
    cmd
}

/// Build two snapshots with the fake compiler, then compare them through
/// every output mode.
#[test]
fn build_then_compare_two_revisions() {
    let work = tempdir().expect("tempdir");
    let root = work.path();
    let clang = install_fake_clang(root);

    let old_src = root.join("v1");
    let new_src = root.join("v2");
    fs::create_dir_all(&old_src).expect("v1");
    fs::create_dir_all(&new_src).expect("v2");
    fs::write(old_src.join("a.c"), "int foo(void) { return 1; }\nint bar(void) { return 2; }\n")
        .expect("v1 source");
    fs::write(new_src.join("a.c"), "int foo(void) { return 1; }\nint bar(void) { return 3; }\n")
        .expect("v2 source");
    fs::write(root.join("symbols.txt"), "foo\nbar\n# comment\nmissing\n").expect("symbol list");

    // Old side from a symbol list, new side from every defined function.
    semdiff(root, &clang)
        .args(["build", "v1", "snap-old", "symbols.txt"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Snapshot written to"))
        .stdout(predicate::str::contains("Symbols: 3"))
        .stdout(predicate::str::contains("Failed:  1"))
        .stdout(predicate::str::contains("- missing: symbol missing not found"));
    semdiff(root, &clang)
        .args(["build", "v2", "snap-new"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Symbols: 2"));
    assert!(root.join("snap-old/snapshot.yaml").is_file());
    assert!(root.join("snap-old/ir/a.ll").is_file());

    // Rebuilding into an existing snapshot needs --force.
    semdiff(root, &clang)
        .args(["build", "v2", "snap-new"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("use --force"));
    semdiff(root, &clang).args(["build", "v2", "snap-new", "--force"]).assert().success();

    semdiff(root, &clang)
        .args(["compare", "snap-old", "snap-new", "--report-stat"])
        .assert()
        .success()
        .stdout(predicate::str::contains("bar: not-equal"))
        .stdout(predicate::str::contains("    -  ret i32 2"))
        .stdout(predicate::str::contains("    +  ret i32 3"))
        .stdout(predicate::str::contains("missing: error"))
        .stdout(predicate::str::contains("foo: equal").not())
        .stdout(predicate::str::contains("Total symbols: 3"));

    semdiff(root, &clang)
        .args(["compare", "snap-old", "snap-new", "--function", "foo", "--show-equal"])
        .assert()
        .success()
        .stdout(predicate::str::contains("foo: equal"))
        .stdout(predicate::str::contains("bar:").not());

    let output = semdiff(root, &clang)
        .args(["compare", "snap-old", "snap-new", "--json", "--regex-filter", "ba."])
        .output()
        .expect("run compare --json");
    assert!(output.status.success());
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json report");
    assert_eq!(report["checker"], "ir-text");
    assert_eq!(report["results"].as_array().map(|r| r.len()), Some(1));
    assert_eq!(report["results"][0]["symbol"]["name"], "bar");
    assert_eq!(report["results"][0]["kind"], "not-equal");
    assert_eq!(report["statistics"]["not_equal"], 1);

    semdiff(root, &clang)
        .args(["compare", "snap-old", "snap-new", "--emit-ir", "simplified", "--function", "bar"])
        .assert()
        .success()
        .stdout(predicate::str::contains("simplified IR:"));
    assert!(root.join("simplified/bar.old.ll").is_file());

    // Record a run and read it back.
    semdiff(root, &clang)
        .args(["compare", "snap-old", "snap-new", "--db", "runs.db"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Recorded run 1 in runs.db"));
    semdiff(root, &clang)
        .args(["runs", "--db", "runs.db"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Run 1 [ir-text]"))
        .stdout(predicate::str::contains("Not equal:"));
    semdiff(root, &clang)
        .args(["runs", "--db", "runs.db", "--run", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("bar: not-equal"))
        .stdout(predicate::str::contains("missing: error"));

    // The simpll checker reads a canned report instead of running a binary.
    fs::write(root.join("report.yaml"), "result: unknown\nmessage: loop detected\n")
        .expect("fake report");
    semdiff(root, &clang)
        .env("SEMDIFF_SIMPLL_FAKE_REPORT", root.join("report.yaml"))
        .args(["compare", "snap-old", "snap-new", "--checker", "simpll", "--function", "foo"])
        .assert()
        .success()
        .stdout(predicate::str::contains("foo: unknown"))
        .stdout(predicate::str::contains("  loop detected"));
}

#[test]
fn build_reports_compiler_failures_per_symbol() {
    let work = tempdir().expect("tempdir");
    let root = work.path();
    let clang = root.join("failing-clang");
    fs::write(&clang, "#!/bin/sh\necho 'a.c:1:1: error: expected expression' >&2\nexit 1\n")
        .expect("write failing clang");
    fs::set_permissions(&clang, fs::Permissions::from_mode(0o755)).expect("chmod");
    fs::create_dir_all(root.join("src")).expect("src");
    fs::write(root.join("src/a.c"), "int foo(void) { return 1; }\n").expect("source");

    semdiff(root, &clang)
        .args(["build", "src", "snap", "--symbol", "foo"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Failed:  1"))
        .stdout(predicate::str::contains("expected expression"));
}

#[test]
fn hung_compiles_fail_their_symbols_instead_of_stalling_the_build() {
    let work = tempdir().expect("tempdir");
    let root = work.path();
    let clang = root.join("hanging-clang");
    fs::write(&clang, "#!/bin/sh\nexec sleep 30\n").expect("write hanging clang");
    fs::set_permissions(&clang, fs::Permissions::from_mode(0o755)).expect("chmod");
    fs::create_dir_all(root.join("src")).expect("src");
    fs::write(root.join("src/a.c"), "int foo(void) { return 1; }\n").expect("source");
    fs::create_dir_all(root.join(".semdiff")).expect("settings dir");
    fs::write(root.join(".semdiff/config.json"), r#"{ "build_timeout_secs": 1 }"#)
        .expect("settings");

    let started = std::time::Instant::now();
    semdiff(root, &clang)
        .args(["build", "src", "snap", "--symbol", "foo"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Failed:  1"))
        .stdout(predicate::str::contains("timed out"));
    assert!(started.elapsed() < std::time::Duration::from_secs(20));
}
