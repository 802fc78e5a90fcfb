//! The two entry operations: build a snapshot side from a source tree, and
//! compare a pair of sides.
//!
//! Everything that can abort a run (an empty symbol list, an unknown pattern, a
//! missing checker, mismatched toolchains) is checked here, before the first
//! comparison starts.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use regex::Regex;
use tracing::{info, warn};

use crate::checkers::{default_checker_registry, modules_to_cache, ModuleCache, MIN_FREQUENCY};
use crate::compare::{Comparator, CompareOptions, EquivalenceChecker, RunReport};
use crate::config::{ConfigError, Settings};
use crate::model::Symbol;
use crate::patterns::PatternConfig;
use crate::snapshot::{BuildMode, Snapshot, SnapshotSide};
use crate::source::{ClangToolchain, KernelTree, ProjectTree, SourceTree, Toolchain, TreeKind};

/// Where a source tree lives and where its IR goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeSpec {
    pub kind: TreeKind,
    pub root: PathBuf,
    /// Output directory for built IR; a temporary directory when absent.
    pub output_dir: Option<PathBuf>,
}

impl TreeSpec {
    pub fn project(root: impl Into<PathBuf>) -> Self {
        Self { kind: TreeKind::GenericBuild, root: root.into(), output_dir: None }
    }

    pub fn kernel(root: impl Into<PathBuf>) -> Self {
        Self { kind: TreeKind::KernelBuild, root: root.into(), output_dir: None }
    }

    pub fn with_output(mut self, output_dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(output_dir.into());
        self
    }
}

/// The IR-emitting compiler described by `settings`.
pub fn toolchain(settings: &Settings) -> Arc<dyn Toolchain> {
    Arc::new(
        ClangToolchain::new(settings.clang.clone())
            .with_flags(settings.clang_append.clone(), settings.clang_drop.clone())
            .with_timeout(settings.build_timeout()),
    )
}

/// Open the tree described by `spec`, building with `toolchain`.
pub fn open_tree(
    spec: &TreeSpec,
    toolchain: Arc<dyn Toolchain>,
    settings: &Settings,
) -> Result<Arc<dyn SourceTree>, ConfigError> {
    if !spec.root.is_dir() {
        return Err(ConfigError::Read {
            path: spec.root.clone(),
            message: "source tree is not a directory".to_string(),
        });
    }
    let tree: Arc<dyn SourceTree> = match spec.kind {
        TreeKind::GenericBuild => {
            Arc::new(ProjectTree::open(&spec.root, spec.output_dir.clone(), toolchain)?)
        }
        TreeKind::KernelBuild => Arc::new(KernelTree::open(
            &spec.root,
            spec.output_dir.clone(),
            toolchain,
            &settings.arch,
        )?),
    };
    Ok(tree)
}

/// Build a snapshot side for `symbols`. Per-symbol failures are recorded in
/// the side; only an empty symbol list is an error.
pub fn build_snapshot(
    tree: Arc<dyn SourceTree>,
    symbols: &[Symbol],
    mode: BuildMode,
    settings: &Settings,
) -> Result<SnapshotSide, ConfigError> {
    if symbols.is_empty() {
        return Err(ConfigError::EmptySymbolList);
    }
    info!(
        root = %tree.root().display(),
        kind = %tree.kind(),
        symbols = symbols.len(),
        "building snapshot"
    );
    let side = SnapshotSide::build(tree, symbols, mode, settings.jobs);
    if mode == BuildMode::Eager {
        let failed = side.symbols().filter(|s| side.lookup(s).module().is_none()).count();
        if failed > 0 {
            warn!(failed, total = side.len(), "some symbols could not be built");
        }
    }
    Ok(side)
}

/// Compare a snapshot pair with the checker named in `settings`.
pub fn compare(
    snapshot: &Snapshot,
    patterns: &PatternConfig,
    options: &CompareOptions,
    settings: &Settings,
) -> Result<RunReport, ConfigError> {
    let cache = settings.module_cache.then(|| {
        let cache = Arc::new(ModuleCache::new());
        let loaded = cache.preload(modules_to_cache(snapshot, MIN_FREQUENCY));
        info!(modules = loaded, "preloaded shared modules");
        cache
    });
    let registry = default_checker_registry(settings, cache);
    let checker = registry.get(&settings.checker).ok_or_else(|| ConfigError::BackendUnavailable {
        name: settings.checker.clone(),
        reason: format!("unknown checker; available: {}", registry.names().join(", ")),
    })?;
    compare_with(snapshot, patterns, options, checker)
}

/// Compare a snapshot pair with an explicit checker.
pub fn compare_with(
    snapshot: &Snapshot,
    patterns: &PatternConfig,
    options: &CompareOptions,
    checker: Arc<dyn EquivalenceChecker>,
) -> Result<RunReport, ConfigError> {
    let old = snapshot.old_side().info().llvm_version;
    let new = snapshot.new_side().info().llvm_version;
    if old != new {
        return Err(ConfigError::IncompatibleSnapshots { old, new });
    }
    let resolved = patterns.resolve(old)?;
    checker.ensure_available().map_err(|e| ConfigError::BackendUnavailable {
        name: checker.name().to_string(),
        reason: e.to_string(),
    })?;
    Ok(Comparator::new(checker).run(snapshot, &resolved, options))
}

/// Read a symbol list: one entry per line; entries that cannot name a symbol
/// (blank lines, comments) are skipped.
pub fn read_symbol_list(path: &Path) -> Result<Vec<Symbol>, ConfigError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Read { path: path.to_path_buf(), message: e.to_string() })?;
    Ok(text.lines().filter_map(Symbol::parse).collect())
}

/// Name predicate applied to a snapshot before comparison.
#[derive(Debug, Clone, Default)]
pub struct SymbolFilter {
    function: Option<String>,
    regex: Option<Regex>,
}

impl SymbolFilter {
    /// Keep only `function` (exact name) and/or names matching `pattern`.
    pub fn new(function: Option<String>, pattern: Option<&str>) -> Result<Self, ConfigError> {
        let regex = pattern
            .map(|p| {
                Regex::new(&format!("^(?:{p})$")).map_err(|e| ConfigError::InvalidFilter {
                    pattern: p.to_string(),
                    message: e.to_string(),
                })
            })
            .transpose()?;
        Ok(Self { function, regex })
    }

    pub fn is_empty(&self) -> bool {
        self.function.is_none() && self.regex.is_none()
    }

    pub fn matches(&self, symbol: &Symbol) -> bool {
        let by_name = self.function.as_deref().map_or(true, |f| f == symbol.name);
        let by_regex = self.regex.as_ref().map_or(true, |re| re.is_match(&symbol.name));
        by_name && by_regex
    }
}
