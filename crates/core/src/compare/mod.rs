//! Comparison of a snapshot pair through an equivalence checker.
//!
//! The [`Comparator`] emits exactly one [`SymbolResult`] per symbol in the
//! snapshot's order. Per-symbol problems (build or resolution failures,
//! checker errors, timeouts, cancellation) become results; nothing aborts
//! the run.

pub mod checker;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, info_span, warn};

use crate::model::{ResultKind, Statistics, Symbol, SymbolResult};
use crate::patterns::{PatternSet, ResolvedPatterns};
use crate::pool::run_in_pool;
use crate::snapshot::{Lookup, Snapshot};

pub use checker::{
    CheckOutcome, CheckRequest, CheckerError, CheckerRegistry, EquivalenceChecker, IrFunction,
    Severity, Verdict,
};

/// Extra time granted past the checker timeout before the guard gives up.
pub const DEFAULT_GRACE: Duration = Duration::from_secs(2);

/// Cooperative cancellation flag shared with a running comparison.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Per-run comparison options.
#[derive(Debug, Clone)]
pub struct CompareOptions {
    pub control_flow_only: bool,
    pub timeout: Duration,
    /// Worker threads; 0 picks the number of CPUs.
    pub jobs: usize,
    pub emit_ir: Option<std::path::PathBuf>,
    pub cancel: CancelToken,
}

impl Default for CompareOptions {
    fn default() -> Self {
        Self {
            control_flow_only: false,
            timeout: Duration::from_secs(40),
            jobs: 0,
            emit_ir: None,
            cancel: CancelToken::new(),
        }
    }
}

/// Results of one comparison run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub checker: String,
    pub patterns: PatternSet,
    pub results: Vec<SymbolResult>,
    pub statistics: Statistics,
    /// The run was cancelled; unstarted symbols were reported as errors.
    pub cancelled: bool,
}

impl RunReport {
    fn new(
        checker: &str,
        patterns: PatternSet,
        results: Vec<SymbolResult>,
        cancelled: bool,
    ) -> Self {
        let statistics = Statistics::from_results(&results);
        Self { checker: checker.to_string(), patterns, results, statistics, cancelled }
    }

    pub fn result(&self, name: &str) -> Option<&SymbolResult> {
        self.results.iter().find(|r| r.symbol.name == name)
    }
}

/// Drives an [`EquivalenceChecker`] over a snapshot pair.
pub struct Comparator {
    checker: Arc<dyn EquivalenceChecker>,
    grace: Duration,
}

impl Comparator {
    pub fn new(checker: Arc<dyn EquivalenceChecker>) -> Self {
        Self { checker, grace: DEFAULT_GRACE }
    }

    /// Override the time granted past the checker timeout.
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn checker_name(&self) -> &'static str {
        self.checker.name()
    }

    pub fn run(
        &self,
        snapshot: &Snapshot,
        patterns: &ResolvedPatterns,
        options: &CompareOptions,
    ) -> RunReport {
        info!(
            checker = self.checker.name(),
            symbols = snapshot.len(),
            patterns = %patterns.set,
            "comparing snapshot"
        );
        let results: Vec<SymbolResult> = run_in_pool(options.jobs, || {
            (0..snapshot.len())
                .into_par_iter()
                .map(|index| self.compare_at(snapshot, index, patterns, options))
                .collect()
        });
        let report = RunReport::new(
            self.checker.name(),
            patterns.set,
            results,
            options.cancel.is_cancelled(),
        );
        info!(
            equal = report.statistics.equal,
            not_equal = report.statistics.not_equal,
            unknown = report.statistics.unknown,
            error = report.statistics.error,
            timeout = report.statistics.timeout,
            "comparison finished"
        );
        report
    }

    fn compare_at(
        &self,
        snapshot: &Snapshot,
        index: usize,
        patterns: &ResolvedPatterns,
        options: &CompareOptions,
    ) -> SymbolResult {
        let symbol = &snapshot.order()[index];
        let span = info_span!("compare", %symbol);
        let _enter = span.enter();

        if options.cancel.is_cancelled() {
            return SymbolResult::error(symbol.clone(), "cancelled before comparison");
        }
        let Some(entry) = snapshot.entry(index) else {
            return SymbolResult::error(symbol.clone(), "symbol missing from snapshot");
        };
        let (old, new) = match (entry.old, entry.new) {
            (Lookup::Ready(old), Lookup::Ready(new)) => (old, new),
            (old, new) => {
                let detail = failure_detail(old, new);
                debug!(%detail, "skipping checker");
                return SymbolResult::error(symbol.clone(), detail);
            }
        };

        let request = CheckRequest {
            old: IrFunction::from(old),
            new: IrFunction::from(new),
            patterns: patterns.clone(),
            control_flow_only: options.control_flow_only,
            timeout: options.timeout,
            emit_ir: options.emit_ir.clone(),
        };
        let outcome = self.check_guarded(request, options.timeout + self.grace);
        let result = classify(symbol, outcome);
        debug!(kind = %result.kind, "compared");
        result
    }

    /// Run the checker on its own thread and stop waiting after `limit`.
    ///
    /// A checker still running at the deadline is left to finish in the
    /// background; its late result is discarded.
    fn check_guarded(
        &self,
        request: CheckRequest,
        limit: Duration,
    ) -> Result<CheckOutcome, CheckerError> {
        let (tx, rx) = mpsc::channel();
        let checker = Arc::clone(&self.checker);
        std::thread::Builder::new()
            .name(format!("{}-check", checker.name()))
            .spawn(move || {
                let _ = tx.send(checker.check(&request));
            })
            .map_err(|e| CheckerError::Failed(format!("cannot start checker thread: {e}")))?;

        match rx.recv_timeout(limit) {
            Ok(outcome) => outcome,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                warn!(limit_ms = limit.as_millis() as u64, "checker exceeded its time limit");
                Ok(CheckOutcome::new(Verdict::Timeout))
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                Err(CheckerError::Failed("checker crashed".to_string()))
            }
        }
    }
}

/// Map a checker outcome to a result kind.
pub fn classify(symbol: &Symbol, outcome: Result<CheckOutcome, CheckerError>) -> SymbolResult {
    let outcome = match outcome {
        Ok(outcome) => outcome,
        Err(err) => return SymbolResult::error(symbol.clone(), err.to_string()),
    };
    let mut result = match outcome.verdict {
        Verdict::Equal => SymbolResult::new(symbol.clone(), ResultKind::Equal),
        Verdict::Different { diff } => {
            SymbolResult::new(symbol.clone(), ResultKind::NotEqual).with_diff(diff)
        }
        Verdict::Timeout => SymbolResult::new(symbol.clone(), ResultKind::Timeout),
        Verdict::InternalError { severity: Severity::Unknown, message } => {
            SymbolResult::new(symbol.clone(), ResultKind::Unknown).with_detail(message)
        }
        Verdict::InternalError { severity: Severity::Error, message } => {
            SymbolResult::error(symbol.clone(), message)
        }
    };
    result.artifacts = outcome.artifacts;
    result
}

fn failure_detail(old: Lookup<'_>, new: Lookup<'_>) -> String {
    let side = |label: &str, lookup: Lookup<'_>| match lookup {
        Lookup::Ready(_) => None,
        Lookup::Failed(err) => Some(format!("{label}: {err}")),
        Lookup::Missing => Some(format!("{label}: not in snapshot")),
    };
    [side("old", old), side("new", new)].into_iter().flatten().collect::<Vec<_>>().join("; ")
}
