#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use semdiff_core::compare::{CheckOutcome, CheckRequest, CheckerError, EquivalenceChecker, Verdict};
use semdiff_core::snapshot::SideInfo;
use semdiff_core::source::{BuildError, CompileJob, Toolchain, TreeKind};

/// Toolchain that lowers `int NAME(void) { return N; }` lines into IR
/// without spawning a compiler.
pub struct FakeToolchain {
    pub invocations: AtomicUsize,
    pub version: Option<u32>,
    pub delay: Duration,
    /// Units (file names) whose build fails.
    pub failing: HashSet<String>,
    /// Every job seen, in order.
    pub jobs: Mutex<Vec<CompileJob>>,
}

impl FakeToolchain {
    pub fn new() -> Self {
        Self {
            invocations: AtomicUsize::new(0),
            version: Some(16),
            delay: Duration::ZERO,
            failing: HashSet::new(),
            jobs: Mutex::new(Vec::new()),
        }
    }

    pub fn with_version(mut self, version: Option<u32>) -> Self {
        self.version = version;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing_on(mut self, unit: &str) -> Self {
        self.failing.insert(unit.to_string());
        self
    }

    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    pub fn jobs(&self) -> Vec<CompileJob> {
        self.jobs.lock().clone()
    }
}

impl Toolchain for FakeToolchain {
    fn name(&self) -> &str {
        "fake"
    }

    fn version(&self) -> Option<u32> {
        self.version
    }

    fn emit_ir(&self, job: &CompileJob) -> Result<(), BuildError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        self.jobs.lock().push(job.clone());
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        let file_name = job.source.file_name().map(|n| n.to_string_lossy().to_string());
        if file_name.is_some_and(|n| self.failing.contains(&n)) {
            return Err(BuildError::Compiler {
                unit: job.source.clone(),
                status: Some(1),
                stderr: "error: expected ';'".to_string(),
            });
        }
        let source = fs::read_to_string(&job.source).map_err(|e| BuildError::Io {
            path: job.source.clone(),
            message: e.to_string(),
        })?;
        if let Some(parent) = job.output.parent() {
            fs::create_dir_all(parent).expect("create IR dir");
        }
        fs::write(&job.output, translate(&source)).expect("write IR");
        Ok(())
    }
}

/// IR for every `int NAME(void) { return N; }` line in `source`.
pub fn translate(source: &str) -> String {
    let mut out = String::new();
    for line in source.lines() {
        let Some(rest) = line.trim().strip_prefix("int ") else { continue };
        let Some((name, rest)) = rest.split_once("(void) { return ") else { continue };
        let Some(value) = rest.strip_suffix("; }") else { continue };
        out.push_str(&format!("define i32 @{name}() {{\n  ret i32 {value}\n}}\n\n"));
    }
    out
}

/// Write `files` (relative path, contents) under `root`.
pub fn write_tree(root: &Path, files: &[(&str, &str)]) {
    for (rel, body) in files {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent");
        }
        fs::write(&path, body).expect("write fixture");
    }
}

pub fn side_info(root: &Path, llvm_version: Option<u32>) -> SideInfo {
    SideInfo {
        tool_version: semdiff_core::version().to_string(),
        llvm_version,
        created_time: "2026-01-01T00:00:00+00:00".to_string(),
        tree_kind: TreeKind::GenericBuild,
        source_root: root.to_path_buf(),
    }
}

/// Checker returning preset verdicts per IR function name (default: equal).
#[derive(Default)]
pub struct ScriptedChecker {
    pub verdicts: HashMap<String, Verdict>,
    pub delays: HashMap<String, Duration>,
    pub panics: HashSet<String>,
    pub calls: AtomicUsize,
    pub seen: Mutex<Vec<CheckRequest>>,
}

impl ScriptedChecker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn verdict(mut self, name: &str, verdict: Verdict) -> Self {
        self.verdicts.insert(name.to_string(), verdict);
        self
    }

    pub fn sleeping(mut self, name: &str, delay: Duration) -> Self {
        self.delays.insert(name.to_string(), delay);
        self
    }

    pub fn panicking(mut self, name: &str) -> Self {
        self.panics.insert(name.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<CheckRequest> {
        self.seen.lock().clone()
    }
}

impl EquivalenceChecker for ScriptedChecker {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn check(&self, request: &CheckRequest) -> Result<CheckOutcome, CheckerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().push(request.clone());
        let name = &request.old.name;
        if let Some(delay) = self.delays.get(name) {
            std::thread::sleep(*delay);
        }
        if self.panics.contains(name) {
            panic!("scripted checker crash for {name}");
        }
        let verdict = self.verdicts.get(name).cloned().unwrap_or(Verdict::Equal);
        Ok(CheckOutcome::new(verdict))
    }
}

/// Checker that reports itself unavailable.
pub struct MissingChecker;

impl EquivalenceChecker for MissingChecker {
    fn name(&self) -> &'static str {
        "missing"
    }

    fn check(&self, _request: &CheckRequest) -> Result<CheckOutcome, CheckerError> {
        Err(CheckerError::Unavailable("not installed".to_string()))
    }

    fn ensure_available(&self) -> Result<(), CheckerError> {
        Err(CheckerError::Unavailable("not installed".to_string()))
    }
}
