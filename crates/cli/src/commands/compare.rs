use std::fmt::Write as _;
use std::path::PathBuf;

use anyhow::{Context, Result};
use semdiff_core::compare::{CancelToken, CompareOptions, RunReport};
use semdiff_core::config::Settings;
use semdiff_core::model::{ResultKind, Statistics};
use semdiff_core::patterns::PatternConfig;
use semdiff_core::pipeline::{self, SymbolFilter};
use semdiff_core::snapshot::{Snapshot, SnapshotSide};
use semdiff_core::store::{NewRun, ResultStore};

use crate::canonicalize_or_current;

/// Inputs of `compare`.
#[derive(Debug, Clone, Default)]
pub struct CompareArgs {
    pub old: PathBuf,
    pub new: PathBuf,
    pub pattern_config: Option<PathBuf>,
    pub enable_patterns: Vec<String>,
    pub disable_patterns: Vec<String>,
    pub control_flow_only: bool,
    pub function: Option<String>,
    pub regex_filter: Option<String>,
    pub timeout: Option<u64>,
    pub jobs: Option<usize>,
    pub enable_module_cache: bool,
    pub checker: Option<String>,
    pub emit_ir: Option<PathBuf>,
    pub db: Option<PathBuf>,
    pub json: bool,
    pub report_stat: bool,
    /// Also list symbols that compared equal.
    pub show_equal: bool,
}

/// Compare two snapshot sides and report per-symbol results.
pub fn compare_command(args: &CompareArgs, settings: &Settings) -> Result<()> {
    let settings = apply_overrides(args, settings);
    let old_dir = canonicalize_or_current(&args.old)?;
    let new_dir = canonicalize_or_current(&args.new)?;
    let old = SnapshotSide::load(&old_dir)
        .with_context(|| format!("Failed to load snapshot {}", old_dir.display()))?;
    let new = SnapshotSide::load(&new_dir)
        .with_context(|| format!("Failed to load snapshot {}", new_dir.display()))?;

    let mut snapshot = Snapshot::pair(old, new);
    let filter = SymbolFilter::new(args.function.clone(), args.regex_filter.as_deref())?;
    if !filter.is_empty() {
        snapshot.retain(|symbol| filter.matches(symbol));
    }

    let patterns = PatternConfig::from_names(&args.enable_patterns[..], &args.disable_patterns[..])?
        .with_file(args.pattern_config.clone());
    let options = CompareOptions {
        control_flow_only: args.control_flow_only,
        timeout: settings.timeout(),
        jobs: settings.jobs,
        emit_ir: args.emit_ir.clone(),
        cancel: CancelToken::new(),
    };

    let report = pipeline::compare(&snapshot, &patterns, &options, &settings)?;

    if let Some(db) = &args.db {
        let run = NewRun {
            old_snapshot: old_dir.clone(),
            new_snapshot: new_dir.clone(),
            checker: report.checker.clone(),
            patterns: report.patterns.to_string(),
        };
        let run_id = record_run(db, &run, &report)?;
        if !args.json {
            println!("Recorded run {run_id} in {}", db.display());
        }
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", format_results(&report, args.show_equal));
        if args.report_stat {
            print!("{}", format_statistics(&report.statistics));
        }
    }
    Ok(())
}

fn apply_overrides(args: &CompareArgs, settings: &Settings) -> Settings {
    let mut settings = settings.clone();
    if let Some(timeout) = args.timeout {
        settings.timeout_secs = timeout;
    }
    if let Some(jobs) = args.jobs {
        settings.jobs = jobs;
    }
    if let Some(checker) = &args.checker {
        settings.checker = checker.clone();
    }
    settings.module_cache |= args.enable_module_cache;
    settings
}

fn record_run(db: &std::path::Path, run: &NewRun, report: &RunReport) -> Result<i64> {
    let store = ResultStore::open(db)
        .with_context(|| format!("Failed to open result database at {}", db.display()))?;
    let run_id = store.insert_run(run).context("Failed to record run")?;
    store.insert_results(run_id, &report.results).context("Failed to record results")?;
    store
        .finish_run(run_id, &report.statistics, report.cancelled)
        .context("Failed to finish run")?;
    Ok(run_id)
}

/// One line per symbol that did not compare equal, with its detail and diff.
pub fn format_results(report: &RunReport, show_equal: bool) -> String {
    let mut out = String::new();
    for result in &report.results {
        if result.kind == ResultKind::Equal && !show_equal {
            continue;
        }
        let _ = writeln!(out, "{}: {}", result.symbol, result.kind);
        if let Some(detail) = &result.detail {
            let _ = writeln!(out, "  {detail}");
        }
        if let Some(diff) = &result.diff {
            for line in diff.lines() {
                let _ = writeln!(out, "    {line}");
            }
        }
        for artifact in &result.artifacts {
            let _ = writeln!(out, "  simplified IR: {}", artifact.display());
        }
    }
    out
}

/// Statistics block printed by `--report-stat`.
pub fn format_statistics(stats: &Statistics) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Statistics");
    let _ = writeln!(out, "----------");
    let _ = writeln!(out, "Total symbols: {}", stats.total());
    for (label, kind) in [
        ("Equal", ResultKind::Equal),
        ("Not equal", ResultKind::NotEqual),
        ("Unknown", ResultKind::Unknown),
        ("Errors", ResultKind::Error),
        ("Timeouts", ResultKind::Timeout),
    ] {
        let _ = writeln!(
            out,
            "{:<14} {} ({:.0}%)",
            format!("{label}:"),
            stats.count(kind),
            stats.percent(kind)
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statistics_block_lists_every_kind() {
        let stats = Statistics { equal: 1, not_equal: 1, unknown: 0, error: 2, timeout: 0 };
        let text = format_statistics(&stats);
        assert!(text.contains("Total symbols: 4"));
        assert!(text.contains("Equal:         1 (25%)"));
        assert!(text.contains("Errors:        2 (50%)"));
    }

    #[test]
    fn overrides_take_precedence_over_settings() {
        let args =
            CompareArgs { timeout: Some(5), enable_module_cache: true, ..Default::default() };
        let settings = apply_overrides(&args, &Settings::default());
        assert_eq!(settings.timeout_secs, 5);
        assert!(settings.module_cache);
        assert_eq!(settings.timeout(), std::time::Duration::from_secs(5));
    }
}
