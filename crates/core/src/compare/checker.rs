use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ModuleRef;
use crate::patterns::ResolvedPatterns;

/// An IR function (or global) inside a built module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IrFunction {
    pub module: PathBuf,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub glob_var: Option<String>,
}

impl From<&ModuleRef> for IrFunction {
    fn from(module_ref: &ModuleRef) -> Self {
        Self {
            module: module_ref.llvm().to_path_buf(),
            name: module_ref.function.clone(),
            glob_var: module_ref.glob_var.clone(),
        }
    }
}

/// Everything a checker needs to compare one symbol.
#[derive(Debug, Clone)]
pub struct CheckRequest {
    pub old: IrFunction,
    pub new: IrFunction,
    pub patterns: ResolvedPatterns,
    pub control_flow_only: bool,
    pub timeout: Duration,
    /// Directory to write simplified IR into, if requested.
    pub emit_ir: Option<PathBuf>,
}

/// How serious a checker-internal failure is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Severity {
    /// The checker could not decide; the functions may still be equal.
    Unknown,
    /// The checker failed outright.
    Error,
}

/// Raw checker verdict for one function pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Equal,
    Different { diff: String },
    Timeout,
    InternalError { severity: Severity, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOutcome {
    pub verdict: Verdict,
    /// Simplified IR files written for this pair.
    pub artifacts: Vec<PathBuf>,
}

impl CheckOutcome {
    pub fn new(verdict: Verdict) -> Self {
        Self { verdict, artifacts: Vec::new() }
    }

    pub fn with_artifacts(mut self, artifacts: Vec<PathBuf>) -> Self {
        self.artifacts = artifacts;
        self
    }
}

#[derive(Debug, Error)]
pub enum CheckerError {
    #[error("checker unavailable: {0}")]
    Unavailable(String),

    #[error("I/O error at {}: {message}", .path.display())]
    Io { path: PathBuf, message: String },

    #[error("checker failed: {0}")]
    Failed(String),
}

/// Decides whether two IR functions are semantically equal.
///
/// Implementations may run in-process or spawn a tool; the comparator only
/// sees this interface.
pub trait EquivalenceChecker: Send + Sync {
    fn name(&self) -> &'static str;

    fn check(&self, request: &CheckRequest) -> Result<CheckOutcome, CheckerError>;

    /// Fail early when the checker cannot run at all (missing binary, etc).
    fn ensure_available(&self) -> Result<(), CheckerError> {
        Ok(())
    }
}

/// Registry for checkers; callers select by name.
#[derive(Default)]
pub struct CheckerRegistry {
    checkers: HashMap<String, Arc<dyn EquivalenceChecker>>,
}

impl CheckerRegistry {
    pub fn new() -> Self {
        Self { checkers: HashMap::new() }
    }

    pub fn register<C: EquivalenceChecker + 'static>(&mut self, checker: C) -> &mut Self {
        self.checkers.insert(checker.name().to_string(), Arc::new(checker));
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn EquivalenceChecker>> {
        self.checkers.get(name).cloned()
    }

    /// Sorted checker names for error messages/help.
    pub fn names(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.checkers.keys().cloned().collect();
        keys.sort();
        keys
    }
}
