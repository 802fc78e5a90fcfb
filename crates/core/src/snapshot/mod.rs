//! Snapshots: per-symbol built IR for one revision (a side) or two (a pair).
//!
//! A side records, in request order, what each symbol resolved to in one
//! source tree. Sides are persisted as a directory holding `snapshot.yaml` and
//! the IR artifacts, and reload without touching a compiler. A pair holds an
//! `old` and a `new` side plus the request order.

pub mod manifest;

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use chrono::Utc;
use rayon::prelude::*;
use thiserror::Error;
use tracing::{debug, info};

use crate::model::{Module, ModuleRef, Symbol};
use crate::pool::run_in_pool;
use crate::source::{SourceError, SourceTree};

pub use manifest::{
    Manifest, ManifestEntry, PairManifest, SideInfo, IR_DIR, MANIFEST_FILE, PAIR_FILE,
};

/// Errors persisting or loading snapshots.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("failed to read {}: {message}", .path.display())]
    Read { path: PathBuf, message: String },

    #[error("failed to write {}: {message}", .path.display())]
    Write { path: PathBuf, message: String },

    #[error("invalid manifest {}: {message}", .path.display())]
    Manifest { path: PathBuf, message: String },

    #[error("artifact {} for {symbol} is missing", .path.display())]
    MissingArtifact { symbol: String, path: PathBuf },

    #[error("artifact {} for {symbol} changed since the snapshot was taken", .path.display())]
    DigestMismatch { symbol: String, path: PathBuf },
}

/// When a side resolves its symbols.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BuildMode {
    /// Resolve and build every symbol during construction.
    #[default]
    Eager,
    /// Resolve each symbol on first access.
    Lazy,
}

/// A symbol's state as seen through a side.
#[derive(Debug, Clone, Copy)]
pub enum Lookup<'a> {
    Ready(&'a ModuleRef),
    Failed(&'a SourceError),
    /// The side was not asked for this symbol.
    Missing,
}

impl<'a> Lookup<'a> {
    pub fn module(self) -> Option<&'a ModuleRef> {
        match self {
            Lookup::Ready(module) => Some(module),
            _ => None,
        }
    }
}

struct Slot {
    symbol: Symbol,
    outcome: OnceLock<Result<ModuleRef, SourceError>>,
}

impl Slot {
    fn pending(symbol: Symbol) -> Self {
        Self { symbol, outcome: OnceLock::new() }
    }

    fn settled(symbol: Symbol, outcome: Result<ModuleRef, SourceError>) -> Self {
        Self { symbol, outcome: OnceLock::from(outcome) }
    }
}

/// Built modules for a symbol list in one revision.
pub struct SnapshotSide {
    info: SideInfo,
    slots: Vec<Slot>,
    positions: HashMap<Symbol, usize>,
    tree: Option<Arc<dyn SourceTree>>,
}

impl std::fmt::Debug for SnapshotSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotSide")
            .field("info", &self.info)
            .field("symbols", &self.slots.len())
            .field("attached", &self.tree.is_some())
            .finish()
    }
}

impl SnapshotSide {
    /// Build a side from `tree`. Duplicate symbols keep their first position.
    ///
    /// Per-symbol failures are recorded, never returned.
    pub fn build(
        tree: Arc<dyn SourceTree>,
        symbols: &[Symbol],
        mode: BuildMode,
        jobs: usize,
    ) -> Self {
        let info = SideInfo {
            tool_version: crate::version().to_string(),
            llvm_version: tree.toolchain_version(),
            created_time: Utc::now().to_rfc3339(),
            tree_kind: tree.kind(),
            source_root: tree.root().to_path_buf(),
        };
        let mut seen = HashSet::new();
        let slots: Vec<Slot> = symbols
            .iter()
            .filter(|s| seen.insert(*s))
            .cloned()
            .map(Slot::pending)
            .collect();
        let side = Self::assemble(info, slots, Some(tree));
        if mode == BuildMode::Eager {
            side.settle_all(jobs);
        }
        side
    }

    fn assemble(info: SideInfo, slots: Vec<Slot>, tree: Option<Arc<dyn SourceTree>>) -> Self {
        let positions = slots.iter().enumerate().map(|(i, s)| (s.symbol.clone(), i)).collect();
        Self { info, slots, positions, tree }
    }

    /// A side from already-known outcomes, not attached to any tree.
    pub fn from_entries(
        info: SideInfo,
        entries: impl IntoIterator<Item = (Symbol, Result<ModuleRef, SourceError>)>,
    ) -> Self {
        let mut seen = HashSet::new();
        let slots = entries
            .into_iter()
            .filter(|(symbol, _)| seen.insert(symbol.clone()))
            .map(|(symbol, outcome)| Slot::settled(symbol, outcome))
            .collect();
        Self::assemble(info, slots, None)
    }

    pub fn info(&self) -> &SideInfo {
        &self.info
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Symbols in request order.
    pub fn symbols(&self) -> impl Iterator<Item = &Symbol> {
        self.slots.iter().map(|slot| &slot.symbol)
    }

    pub fn contains(&self, symbol: &Symbol) -> bool {
        self.positions.contains_key(symbol)
    }

    /// Outcome for `symbol`, building it now if the side is lazy.
    pub fn lookup(&self, symbol: &Symbol) -> Lookup<'_> {
        match self.positions.get(symbol) {
            Some(&i) => self.settle(&self.slots[i]),
            None => Lookup::Missing,
        }
    }

    fn settle<'a>(&'a self, slot: &'a Slot) -> Lookup<'a> {
        let outcome = match (&self.tree, slot.outcome.get()) {
            (_, Some(done)) => done,
            (Some(tree), None) => slot.outcome.get_or_init(|| tree.resolve_and_build(&slot.symbol)),
            (None, None) => return Lookup::Missing,
        };
        match outcome {
            Ok(module) => Lookup::Ready(module),
            Err(err) => Lookup::Failed(err),
        }
    }

    /// Resolve every pending symbol on a pool of `jobs` workers.
    pub fn settle_all(&self, jobs: usize) {
        run_in_pool(jobs, || {
            self.slots.par_iter().for_each(|slot| {
                self.settle(slot);
            });
        });
    }

    /// Keep only the symbols matching `keep`.
    pub fn retain<F: FnMut(&Symbol) -> bool>(&mut self, mut keep: F) {
        self.slots.retain(|slot| keep(&slot.symbol));
        self.positions =
            self.slots.iter().enumerate().map(|(i, s)| (s.symbol.clone(), i)).collect();
    }

    /// Write the side to `dir`.
    ///
    /// Artifacts outside `dir` are copied into `dir/ir/` (one copy per module).
    /// Once the manifest is written the side's references are rebound to the
    /// copies, so the side refers to the same locations a later
    /// [`SnapshotSide::load`] produces. On failure the side is left untouched.
    pub fn persist(&mut self, dir: &Path) -> Result<(), SnapshotError> {
        self.settle_all(0);
        let ir_dir = dir.join(IR_DIR);
        fs::create_dir_all(&ir_dir)
            .map_err(|e| SnapshotError::Write { path: ir_dir.clone(), message: e.to_string() })?;

        let output_root = self.tree.as_ref().map(|t| t.output_dir().to_path_buf());
        let mut copies: HashMap<PathBuf, Arc<Module>> = HashMap::new();
        let mut entries = Vec::with_capacity(self.slots.len());
        let mut rebinds = Vec::new();

        for (index, slot) in self.slots.iter().enumerate() {
            let mut entry = ManifestEntry::empty(&slot.symbol);
            match slot.outcome.get() {
                Some(Ok(module_ref)) => {
                    let module = match copies.get(&module_ref.module.llvm) {
                        Some(copy) => Arc::clone(copy),
                        None => {
                            let stored = store_artifact(
                                &module_ref.module,
                                dir,
                                &ir_dir,
                                output_root.as_deref(),
                            )?;
                            copies.insert(module_ref.module.llvm.clone(), Arc::clone(&stored));
                            stored
                        }
                    };
                    entry.llvm = Some(relative_to(&module.llvm, dir));
                    entry.source = module.source.clone();
                    entry.function = Some(module_ref.function.clone());
                    entry.glob_var = module_ref.glob_var.clone();
                    entry.digest = Some(manifest::sha256_file(&module.llvm)?);
                    if !Arc::ptr_eq(&module, &module_ref.module) {
                        rebinds.push((index, ModuleRef { module, ..module_ref.clone() }));
                    }
                }
                Some(Err(err)) => entry.failure = Some(err.clone()),
                None => {}
            }
            entries.push(entry);
        }

        let manifest = Manifest { info: self.info.clone(), entries };
        manifest::write_yaml(&dir.join(MANIFEST_FILE), &manifest)?;
        for (index, rebound) in rebinds {
            self.slots[index].outcome = OnceLock::from(Ok(rebound));
        }
        info!(
            dir = %dir.display(),
            symbols = self.slots.len(),
            modules = copies.len(),
            "persisted snapshot"
        );
        Ok(())
    }

    /// Reload a side written by [`SnapshotSide::persist`], without building.
    ///
    /// Fails if any referenced artifact is gone or was modified.
    pub fn load(dir: &Path) -> Result<Self, SnapshotError> {
        let manifest: Manifest = manifest::read_yaml(&dir.join(MANIFEST_FILE))?;
        let mut modules: HashMap<PathBuf, Arc<Module>> = HashMap::new();
        let mut entries = Vec::with_capacity(manifest.entries.len());

        for entry in manifest.entries {
            let symbol = entry.symbol();
            let outcome = match (entry.failure, entry.llvm, entry.function) {
                (Some(failure), _, _) => Err(failure),
                (None, Some(llvm), Some(function)) => {
                    let path = if llvm.is_absolute() { llvm } else { dir.join(llvm) };
                    if !path.is_file() {
                        return Err(SnapshotError::MissingArtifact {
                            symbol: symbol.to_string(),
                            path,
                        });
                    }
                    if let Some(expected) = &entry.digest {
                        if &manifest::sha256_file(&path)? != expected {
                            return Err(SnapshotError::DigestMismatch {
                                symbol: symbol.to_string(),
                                path,
                            });
                        }
                    }
                    let module = modules
                        .entry(path.clone())
                        .or_insert_with(|| Arc::new(Module { llvm: path, source: entry.source }))
                        .clone();
                    Ok(ModuleRef { module, function, glob_var: entry.glob_var })
                }
                (None, _, _) => {
                    return Err(SnapshotError::Manifest {
                        path: dir.join(MANIFEST_FILE),
                        message: format!("entry {symbol} has neither an artifact nor a failure"),
                    })
                }
            };
            entries.push((symbol, outcome));
        }
        debug!(dir = %dir.display(), symbols = entries.len(), "loaded snapshot");
        Ok(Self::from_entries(manifest.info, entries))
    }
}

/// Place `module`'s artifact inside the side directory, returning the module to
/// reference from now on.
fn store_artifact(
    module: &Arc<Module>,
    dir: &Path,
    ir_dir: &Path,
    output_root: Option<&Path>,
) -> Result<Arc<Module>, SnapshotError> {
    if module.llvm.starts_with(dir) {
        return Ok(Arc::clone(module));
    }
    let rel = output_root
        .and_then(|root| module.llvm.strip_prefix(root).ok())
        .map(Path::to_path_buf)
        .or_else(|| module.llvm.file_name().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("module.ll"));
    let target = unique_path(ir_dir.join(rel));
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(|e| SnapshotError::Write {
            path: parent.to_path_buf(),
            message: e.to_string(),
        })?;
    }
    fs::copy(&module.llvm, &target)
        .map_err(|e| SnapshotError::Write { path: target.clone(), message: e.to_string() })?;
    Ok(Arc::new(Module { llvm: target, source: module.source.clone() }))
}

fn unique_path(path: PathBuf) -> PathBuf {
    if !path.exists() {
        return path;
    }
    let stem = path.file_stem().map(|s| s.to_string_lossy().to_string()).unwrap_or_default();
    (1..)
        .map(|n| path.with_file_name(format!("{stem}.{n}.ll")))
        .find(|candidate| !candidate.exists())
        .unwrap_or(path)
}

fn relative_to(path: &Path, base: &Path) -> PathBuf {
    path.strip_prefix(base).map(Path::to_path_buf).unwrap_or_else(|_| path.to_path_buf())
}

/// One step of iterating a pair.
#[derive(Debug, Clone, Copy)]
pub struct SnapshotEntry<'a> {
    pub symbol: &'a Symbol,
    pub old: Lookup<'a>,
    pub new: Lookup<'a>,
}

/// Old and new sides for one revision pair.
#[derive(Debug)]
pub struct Snapshot {
    old: SnapshotSide,
    new: SnapshotSide,
    order: Vec<Symbol>,
}

impl Snapshot {
    /// Build both sides for `symbols` (request order is kept).
    pub fn build(
        old_tree: Arc<dyn SourceTree>,
        new_tree: Arc<dyn SourceTree>,
        symbols: &[Symbol],
        mode: BuildMode,
        jobs: usize,
    ) -> Self {
        let old = SnapshotSide::build(old_tree, symbols, mode, jobs);
        let new = SnapshotSide::build(new_tree, symbols, mode, jobs);
        Self::pair(old, new)
    }

    /// Pair two sides. Order: the old side's symbols, then those only in the new side.
    pub fn pair(old: SnapshotSide, new: SnapshotSide) -> Self {
        let mut order: Vec<Symbol> = old.symbols().cloned().collect();
        order.extend(new.symbols().filter(|s| !old.contains(s)).cloned());
        Self { old, new, order }
    }

    pub fn old_side(&self) -> &SnapshotSide {
        &self.old
    }

    pub fn new_side(&self) -> &SnapshotSide {
        &self.new
    }

    pub fn order(&self) -> &[Symbol] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn entry(&self, index: usize) -> Option<SnapshotEntry<'_>> {
        let symbol = self.order.get(index)?;
        Some(SnapshotEntry { symbol, old: self.old.lookup(symbol), new: self.new.lookup(symbol) })
    }

    /// Entries in request order.
    pub fn iterate(&self) -> impl Iterator<Item = SnapshotEntry<'_>> {
        (0..self.order.len()).filter_map(move |i| self.entry(i))
    }

    /// Keep only the symbols matching `keep` (in both sides).
    pub fn retain<F: FnMut(&Symbol) -> bool>(&mut self, mut keep: F) {
        self.order.retain(&mut keep);
        let kept: HashSet<Symbol> = self.order.iter().cloned().collect();
        self.old.retain(|s| kept.contains(s));
        self.new.retain(|s| kept.contains(s));
    }

    /// Write `old/`, `new/` and `pair.yaml` under `dir`.
    pub fn persist(&mut self, dir: &Path) -> Result<(), SnapshotError> {
        self.old.persist(&dir.join("old"))?;
        self.new.persist(&dir.join("new"))?;
        manifest::write_yaml(&dir.join(PAIR_FILE), &PairManifest { order: self.order.clone() })
    }

    pub fn load(dir: &Path) -> Result<Self, SnapshotError> {
        let old = SnapshotSide::load(&dir.join("old"))?;
        let new = SnapshotSide::load(&dir.join("new"))?;
        let pair: PairManifest = manifest::read_yaml(&dir.join(PAIR_FILE))?;
        Ok(Self { old, new, order: pair.order })
    }
}
