use std::path::Path;

use anyhow::{Context, Result};
use semdiff_core::store::ResultStore;

use crate::commands::compare::format_statistics;

/// List recorded runs, or the results of one run.
pub fn runs_command(db: &Path, run: Option<i64>, json: bool) -> Result<()> {
    if !db.is_file() {
        anyhow::bail!("No result database at {}", db.display());
    }
    let store = ResultStore::open(db)
        .with_context(|| format!("Failed to open result database at {}", db.display()))?;

    match run {
        Some(run_id) => {
            let results = store
                .list_results(run_id)
                .with_context(|| format!("Failed to read results of run {run_id}"))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&results)?);
                return Ok(());
            }
            println!("Run {run_id}:");
            for result in results {
                match &result.detail {
                    Some(detail) => println!("  {}: {} ({detail})", result.symbol, result.kind),
                    None => println!("  {}: {}", result.symbol, result.kind),
                }
            }
        }
        None => {
            let runs = store.list_runs().context("Failed to list runs")?;
            if json {
                println!("{}", serde_json::to_string_pretty(&runs)?);
                return Ok(());
            }
            if runs.is_empty() {
                println!("No runs recorded.");
                return Ok(());
            }
            for run in runs {
                println!(
                    "Run {} [{}] {} -> {}",
                    run.id,
                    run.checker,
                    run.old_snapshot.display(),
                    run.new_snapshot.display()
                );
                println!("  Started:  {}", run.started_at);
                println!("  Finished: {}", run.finished_at.as_deref().unwrap_or("-"));
                let patterns = if run.patterns.is_empty() { "-" } else { run.patterns.as_str() };
                println!("  Patterns: {patterns}");
                if let Some(stats) = &run.statistics {
                    for line in format_statistics(stats).lines().skip(2) {
                        println!("  {line}");
                    }
                }
            }
        }
    }
    Ok(())
}
