//! Core data model shared by source trees, snapshots, and the comparator.
//!
//! - `Symbol`: what the caller asked to compare.
//! - `Module` / `ModuleRef`: a built IR artifact and the IR symbol inside it.
//! - `ResultKind`, `SymbolResult`, `Statistics`: comparison outputs.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Kind of a requested symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SymbolKind {
    Function,
    Sysctl,
    ModuleParam,
}

impl SymbolKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SymbolKind::Function => "function",
            SymbolKind::Sysctl => "sysctl",
            SymbolKind::ModuleParam => "module-param",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        [SymbolKind::Function, SymbolKind::Sysctl, SymbolKind::ModuleParam]
            .into_iter()
            .find(|k| k.as_str() == value)
    }
}

/// A symbol targeted for comparison.
///
/// For module parameters, `hint` holds `<module-dir>/<module>` relative to the
/// source root. For functions it optionally narrows the definition search to a
/// directory or file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl Symbol {
    pub fn function(name: impl Into<String>) -> Self {
        Self { name: name.into(), kind: SymbolKind::Function, hint: None }
    }

    pub fn sysctl(name: impl Into<String>) -> Self {
        Self { name: name.into(), kind: SymbolKind::Sysctl, hint: None }
    }

    /// Module parameter `param` of the kernel module at `module` (`<dir>/<name>`).
    pub fn module_param(module: impl Into<String>, param: impl Into<String>) -> Self {
        Self { name: param.into(), kind: SymbolKind::ModuleParam, hint: Some(module.into()) }
    }

    /// Builder-style helper to attach a location hint.
    pub fn with_hint(mut self, hint: Option<String>) -> Self {
        self.hint = hint;
        self
    }

    /// Parse one symbol-list entry.
    ///
    /// Accepted forms: `name`, `sysctl:<name>`, `param:<dir>/<module>:<param>`.
    /// Returns `None` for entries that cannot name a C symbol.
    pub fn parse(entry: &str) -> Option<Self> {
        let entry = entry.trim();
        if let Some(rest) = entry.strip_prefix("sysctl:") {
            let rest = rest.trim();
            return (!rest.is_empty()).then(|| Symbol::sysctl(rest));
        }
        if let Some(rest) = entry.strip_prefix("param:") {
            let (module, param) = rest.rsplit_once(':')?;
            if module.is_empty() || !is_identifier(param) {
                return None;
            }
            return Some(Symbol::module_param(module, param));
        }
        is_identifier(entry).then(|| Symbol::function(entry))
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.kind, &self.hint) {
            (SymbolKind::Function, _) => write!(f, "{}", self.name),
            (SymbolKind::Sysctl, _) => write!(f, "sysctl:{}", self.name),
            (SymbolKind::ModuleParam, Some(module)) => write!(f, "param:{}:{}", module, self.name),
            (SymbolKind::ModuleParam, None) => write!(f, "param:{}", self.name),
        }
    }
}

/// True for names that start with a letter or underscore and continue with
/// identifier characters.
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// A compiled IR artifact for one compilation unit.
///
/// Owned by a source tree's build cache and shared by every symbol defined in
/// the same unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Module {
    /// Path to the compiled IR (`.ll`).
    pub llvm: PathBuf,
    /// Originating source file, when known.
    pub source: Option<PathBuf>,
}

/// Reference from a symbol to the IR entity compared for it.
#[derive(Debug, Clone)]
pub struct ModuleRef {
    pub module: Arc<Module>,
    /// IR symbol compared for the request (function, or global for module params).
    pub function: String,
    /// Global variable whose uses anchor the comparison (sysctl data, module params).
    pub glob_var: Option<String>,
}

impl ModuleRef {
    pub fn new(module: Arc<Module>, function: impl Into<String>) -> Self {
        Self { module, function: function.into(), glob_var: None }
    }

    pub fn with_glob_var(mut self, glob_var: Option<String>) -> Self {
        self.glob_var = glob_var;
        self
    }

    pub fn llvm(&self) -> &std::path::Path {
        &self.module.llvm
    }
}

impl PartialEq for ModuleRef {
    fn eq(&self, other: &Self) -> bool {
        self.module.llvm == other.module.llvm
            && self.function == other.function
            && self.glob_var == other.glob_var
    }
}

impl Eq for ModuleRef {}

/// Outcome classes for one compared symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResultKind {
    Equal,
    NotEqual,
    Unknown,
    Error,
    Timeout,
}

impl ResultKind {
    pub const ALL: [ResultKind; 5] = [
        ResultKind::Equal,
        ResultKind::NotEqual,
        ResultKind::Unknown,
        ResultKind::Error,
        ResultKind::Timeout,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ResultKind::Equal => "equal",
            ResultKind::NotEqual => "not-equal",
            ResultKind::Unknown => "unknown",
            ResultKind::Error => "error",
            ResultKind::Timeout => "timeout",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        ResultKind::ALL.into_iter().find(|k| k.as_str() == value)
    }
}

impl fmt::Display for ResultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_str().replace('-', " "))
    }
}

/// Result of comparing one requested symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolResult {
    pub symbol: Symbol,
    pub kind: ResultKind,
    /// Textual diff when the checker reported a difference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff: Option<String>,
    /// Diagnostic for failed comparisons (failing resolution step, checker message).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Simplified IR files emitted by the checker, if requested.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<PathBuf>,
}

impl SymbolResult {
    pub fn new(symbol: Symbol, kind: ResultKind) -> Self {
        Self { symbol, kind, diff: None, detail: None, artifacts: Vec::new() }
    }

    pub fn error(symbol: Symbol, detail: impl Into<String>) -> Self {
        Self::new(symbol, ResultKind::Error).with_detail(detail)
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_diff(mut self, diff: impl Into<String>) -> Self {
        self.diff = Some(diff.into());
        self
    }
}

/// Per-kind counts over the results of one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statistics {
    pub equal: usize,
    pub not_equal: usize,
    pub unknown: usize,
    pub error: usize,
    pub timeout: usize,
}

impl Statistics {
    /// Fold a sequence of results into counts.
    pub fn from_results<'a>(results: impl IntoIterator<Item = &'a SymbolResult>) -> Self {
        results.into_iter().fold(Self::default(), |mut stats, r| {
            stats.record(r.kind);
            stats
        })
    }

    pub fn record(&mut self, kind: ResultKind) {
        *self.slot(kind) += 1;
    }

    pub fn count(&self, kind: ResultKind) -> usize {
        match kind {
            ResultKind::Equal => self.equal,
            ResultKind::NotEqual => self.not_equal,
            ResultKind::Unknown => self.unknown,
            ResultKind::Error => self.error,
            ResultKind::Timeout => self.timeout,
        }
    }

    pub fn total(&self) -> usize {
        ResultKind::ALL.iter().map(|k| self.count(*k)).sum()
    }

    /// Share of `kind` in the total, in percent. Zero for an empty run.
    pub fn percent(&self, kind: ResultKind) -> f64 {
        let total = self.total();
        if total == 0 {
            0.0
        } else {
            self.count(kind) as f64 * 100.0 / total as f64
        }
    }

    fn slot(&mut self, kind: ResultKind) -> &mut usize {
        match kind {
            ResultKind::Equal => &mut self.equal,
            ResultKind::NotEqual => &mut self.not_equal,
            ResultKind::Unknown => &mut self.unknown,
            ResultKind::Error => &mut self.error,
            ResultKind::Timeout => &mut self.timeout,
        }
    }
}
