//! Source trees: mapping a requested symbol to a built IR module in one revision.
//!
//! Two tree kinds share the [`SourceTree`] contract:
//! - [`ProjectTree`]: a generic C project, optionally described by `compile_commands.json`.
//! - [`KernelTree`]: a kernel checkout, with sysctl and module-parameter indirection.
//!
//! Both memoize per compilation unit and per symbol through [`SingleFlight`], so a
//! unit is compiled at most once per tree and repeated lookups return the same
//! `Arc<Module>`.

pub mod cache;
pub mod index;
pub mod kernel;
pub mod project;
pub mod toolchain;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use thiserror::Error;
use tracing::{debug, info};

use crate::model::{Module, ModuleRef, Symbol};

pub use cache::SingleFlight;
pub use index::SymbolIndex;
pub use kernel::KernelTree;
pub use project::ProjectTree;
pub use toolchain::{ClangToolchain, CompileJob, Toolchain};

/// Resolution strategy of a source tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TreeKind {
    GenericBuild,
    KernelBuild,
}

impl TreeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TreeKind::GenericBuild => "generic-build",
            TreeKind::KernelBuild => "kernel-build",
        }
    }
}

impl fmt::Display for TreeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One step of a symbol resolution chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResolveStep {
    /// Symbol kind is not supported by this tree.
    SymbolLookup,
    /// sysctl prefix -> file holding the control table.
    TableLookup,
    /// `.procname` entry inside the control table.
    EntryLookup,
    /// `.data` field of the entry.
    DataVariable,
    /// `.proc_handler` field of the entry.
    Handler,
    /// Source files of a kernel module.
    ModuleSources,
    /// `module_param*` declaration naming the parameter.
    ParamDeclaration,
    /// Compilation unit holding the final definition.
    Definition,
}

impl ResolveStep {
    pub fn as_str(self) -> &'static str {
        match self {
            ResolveStep::SymbolLookup => "symbol-lookup",
            ResolveStep::TableLookup => "table-lookup",
            ResolveStep::EntryLookup => "entry-lookup",
            ResolveStep::DataVariable => "data-variable",
            ResolveStep::Handler => "handler",
            ResolveStep::ModuleSources => "module-sources",
            ResolveStep::ParamDeclaration => "param-declaration",
            ResolveStep::Definition => "definition",
        }
    }
}

impl fmt::Display for ResolveStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resolution chain stopped at `step`.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("cannot resolve {symbol}: {step} failed: {reason}")]
pub struct ResolveError {
    pub symbol: String,
    pub step: ResolveStep,
    pub reason: String,
}

impl ResolveError {
    pub fn new(symbol: &Symbol, step: ResolveStep, reason: impl Into<String>) -> Self {
        Self { symbol: symbol.to_string(), step, reason: reason.into() }
    }
}

/// Building a compilation unit failed.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum BuildError {
    #[error("failed to run {tool}: {message}")]
    Spawn { tool: String, message: String },

    #[error("compiling {} failed (status {}): {stderr}", .unit.display(), status_text(.status))]
    Compiler { unit: PathBuf, status: Option<i32>, stderr: String },

    #[error("compiler produced no output at {}", .path.display())]
    MissingOutput { path: PathBuf },

    #[error("invalid compilation database {}: {message}", .path.display())]
    CompileDatabase { path: PathBuf, message: String },

    #[error("I/O error at {}: {message}", .path.display())]
    Io { path: PathBuf, message: String },
}

fn status_text(status: &Option<i32>) -> String {
    status.map_or_else(|| "signal".to_string(), |code| code.to_string())
}

/// Per-symbol failure of a source tree lookup.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "failure", rename_all = "kebab-case")]
pub enum SourceError {
    #[error("symbol {symbol} not found")]
    NotFound { symbol: String },

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Build(#[from] BuildError),
}

impl SourceError {
    pub fn not_found(symbol: &Symbol) -> Self {
        SourceError::NotFound { symbol: symbol.to_string() }
    }

    /// Failing resolution step, if this is a resolution failure.
    pub fn step(&self) -> Option<ResolveStep> {
        match self {
            SourceError::Resolve(err) => Some(err.step),
            _ => None,
        }
    }
}

/// Observable lifecycle state of a symbol inside one tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolState {
    /// Not requested yet, or still resolving/building.
    Unresolved,
    Ready,
    BuildFailed,
    NotFound,
    ResolveFailed,
}

/// One revision of a C code base able to turn symbols into built IR modules.
pub trait SourceTree: Send + Sync {
    fn kind(&self) -> TreeKind;
    fn root(&self) -> &Path;
    /// Directory receiving built IR.
    fn output_dir(&self) -> &Path;
    /// Major LLVM version of the toolchain building this tree.
    fn toolchain_version(&self) -> Option<u32>;
    /// Resolve `symbol` and build its compilation unit.
    ///
    /// Outcomes are cached: a second call returns the same module reference, or
    /// the same failure without retrying.
    fn resolve_and_build(&self, symbol: &Symbol) -> Result<ModuleRef, SourceError>;
    fn state(&self, symbol: &Symbol) -> SymbolState;
    /// Number of distinct compilation units built (or attempted).
    fn built_units(&self) -> usize;
    /// Every function the tree can enumerate; empty when it cannot.
    fn functions(&self) -> Vec<Symbol> {
        Vec::new()
    }
}

enum OutputDir {
    Given(PathBuf),
    Temp(TempDir),
}

impl OutputDir {
    fn path(&self) -> &Path {
        match self {
            OutputDir::Given(path) => path,
            OutputDir::Temp(dir) => dir.path(),
        }
    }
}

/// State shared by every tree kind: toolchain, output location, and the two
/// memo tables.
pub(crate) struct TreeCore {
    root: PathBuf,
    output: OutputDir,
    toolchain: Arc<dyn Toolchain>,
    units: SingleFlight<PathBuf, Result<Arc<Module>, BuildError>>,
    symbols: SingleFlight<Symbol, Result<ModuleRef, SourceError>>,
}

impl TreeCore {
    /// Without an explicit output directory, IR goes to a temporary directory
    /// removed together with the tree.
    pub(crate) fn new(
        root: &Path,
        output: Option<PathBuf>,
        toolchain: Arc<dyn Toolchain>,
    ) -> Result<Self, BuildError> {
        let output = match output {
            Some(dir) => {
                std::fs::create_dir_all(&dir)
                    .map_err(|e| BuildError::Io { path: dir.clone(), message: e.to_string() })?;
                OutputDir::Given(dir)
            }
            None => OutputDir::Temp(tempfile::tempdir().map_err(|e| BuildError::Io {
                path: std::env::temp_dir(),
                message: e.to_string(),
            })?),
        };
        Ok(Self {
            root: root.to_path_buf(),
            output,
            toolchain,
            units: SingleFlight::new(),
            symbols: SingleFlight::new(),
        })
    }

    pub(crate) fn root(&self) -> &Path {
        &self.root
    }

    pub(crate) fn output_dir(&self) -> &Path {
        self.output.path()
    }

    pub(crate) fn toolchain_version(&self) -> Option<u32> {
        self.toolchain.version()
    }

    /// IR location for `unit`, mirroring its path below the source root.
    pub(crate) fn ir_path(&self, unit: &Path) -> PathBuf {
        let rel = unit
            .strip_prefix(&self.root)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| unit.file_name().map(PathBuf::from).unwrap_or_default());
        self.output_dir().join(rel).with_extension("ll")
    }

    /// Build `unit` once; later callers share the published outcome.
    pub(crate) fn build_unit(
        &self,
        unit: &Path,
        workdir: &Path,
        flags: &[String],
    ) -> Result<Arc<Module>, BuildError> {
        self.units.get_or_run(&unit.to_path_buf(), || {
            let output = self.ir_path(unit);
            info!(
                unit = %unit.display(),
                toolchain = self.toolchain.name(),
                "building compilation unit"
            );
            let job = CompileJob {
                source: unit.to_path_buf(),
                output: output.clone(),
                workdir: workdir.to_path_buf(),
                flags: flags.to_vec(),
            };
            self.toolchain.emit_ir(&job)?;
            Ok(Arc::new(Module { llvm: output, source: Some(unit.to_path_buf()) }))
        })
    }

    /// Memoize a symbol's whole resolve-and-build outcome.
    pub(crate) fn resolve_once<F>(
        &self,
        symbol: &Symbol,
        resolve: F,
    ) -> Result<ModuleRef, SourceError>
    where
        F: FnOnce() -> Result<ModuleRef, SourceError>,
    {
        if let Some(done) = self.symbols.get(symbol) {
            debug!(%symbol, "symbol cache hit");
            return done;
        }
        self.symbols.get_or_run(symbol, resolve)
    }

    pub(crate) fn state(&self, symbol: &Symbol) -> SymbolState {
        match self.symbols.get(symbol) {
            None => SymbolState::Unresolved,
            Some(Ok(_)) => SymbolState::Ready,
            Some(Err(SourceError::NotFound { .. })) => SymbolState::NotFound,
            Some(Err(SourceError::Resolve(_))) => SymbolState::ResolveFailed,
            Some(Err(SourceError::Build(_))) => SymbolState::BuildFailed,
        }
    }

    pub(crate) fn built_units(&self) -> usize {
        self.units.len()
    }
}
