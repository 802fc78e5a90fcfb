use std::fs;
use std::path::{Path, PathBuf};

use semdiff::commands::{format_results, format_statistics};
use semdiff::{canonicalize_or_current, log_filter, settings_for};
use semdiff_core::compare::RunReport;
use semdiff_core::model::{ResultKind, Statistics, Symbol, SymbolResult};
use semdiff_core::patterns::PatternSet;
use tempfile::tempdir;

fn report(results: Vec<SymbolResult>) -> RunReport {
    RunReport {
        checker: "ir-text".to_string(),
        patterns: PatternSet::DEFAULT,
        statistics: Statistics::from_results(&results),
        results,
        cancelled: false,
    }
}

#[test]
fn canonicalize_or_current_returns_cwd_for_dot() {
    let original = std::env::current_dir().expect("cwd");
    let tmp = tempdir().expect("tempdir");
    std::env::set_current_dir(tmp.path()).expect("chdir tmp");

    let result = canonicalize_or_current(Path::new(".")).expect("canonicalize");
    let expected = tmp.path().canonicalize().expect("canon tmp");
    std::env::set_current_dir(original).expect("restore cwd");
    assert_eq!(result.canonicalize().expect("canon"), expected);
}

#[test]
fn canonicalize_or_current_keeps_missing_absolute_paths() {
    let missing = PathBuf::from("/definitely/not/here/snapshot");
    assert_eq!(canonicalize_or_current(&missing).expect("absolute"), missing);
}

#[test]
fn log_filter_grows_with_verbosity() {
    assert_eq!(log_filter(0), "warn");
    assert_eq!(log_filter(1), "info");
    assert_eq!(log_filter(2), "debug");
    assert_eq!(log_filter(9), "debug");
}

#[test]
fn settings_for_reads_an_explicit_file() {
    let tmp = tempdir().expect("tempdir");
    let file = tmp.path().join("settings.json");
    fs::write(&file, r#"{ "arch": "riscv", "timeout_secs": 9 }"#).expect("write settings");
    let settings = settings_for(Some(&file)).expect("settings");
    assert_eq!(settings.arch, "riscv");
    assert_eq!(settings.timeout_secs, 9);

    let err = settings_for(Some(&tmp.path().join("missing.json"))).unwrap_err();
    assert!(err.to_string().contains("Failed to load settings"), "unexpected error: {err}");
}

#[test]
fn results_hide_equal_symbols_unless_asked() {
    let report = report(vec![
        SymbolResult::new(Symbol::function("same"), ResultKind::Equal),
        SymbolResult::new(Symbol::function("changed"), ResultKind::NotEqual)
            .with_diff(" a\n-b\n+c\n"),
        SymbolResult::error(Symbol::sysctl("kernel.panic"), "old: entry-lookup failed"),
    ]);

    let text = format_results(&report, false);
    assert!(!text.contains("same"));
    assert!(text.contains("changed: not-equal\n     a\n    -b\n    +c\n"));
    assert!(text.contains("sysctl:kernel.panic: error\n  old: entry-lookup failed\n"));

    assert!(format_results(&report, true).starts_with("same: equal\n"));
}

#[test]
fn statistics_block_totals_the_run() {
    let stats = Statistics { equal: 3, not_equal: 0, unknown: 0, error: 0, timeout: 1 };
    let text = format_statistics(&stats);
    assert!(text.starts_with("Statistics\n----------\nTotal symbols: 4\n"));
    assert!(text.contains("Timeouts:      1 (25%)"));
    assert!(text.contains("Not equal:     0 (0%)"));
}
