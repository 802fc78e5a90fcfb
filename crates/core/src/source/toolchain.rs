//! Boundary to the external compiler that emits LLVM IR.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use tracing::{debug, warn};

use super::BuildError;
use crate::process::{run_with_deadline, tail, RunError, Waited};

/// Default limit on a single compiler invocation.
pub const DEFAULT_BUILD_TIMEOUT: Duration = Duration::from_secs(300);

/// One compilation unit to lower into textual IR.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileJob {
    pub source: PathBuf,
    pub output: PathBuf,
    /// Working directory for the compiler (relative include paths resolve here).
    pub workdir: PathBuf,
    pub flags: Vec<String>,
}

/// Compiler capable of emitting IR for a compilation unit.
pub trait Toolchain: Send + Sync {
    fn name(&self) -> &str;
    /// Major LLVM version, if it can be determined.
    fn version(&self) -> Option<u32>;
    fn emit_ir(&self, job: &CompileJob) -> Result<(), BuildError>;
}

const STDERR_TAIL: usize = 20;

/// Flags that make clang emit unoptimized-but-canonical IR suitable for diffing.
const IR_FLAGS: &[&str] = &[
    "-S",
    "-emit-llvm",
    "-O1",
    "-Xclang",
    "-disable-llvm-passes",
    "-g",
    "-fno-discard-value-names",
];

/// `clang` driven as a subprocess.
#[derive(Debug, Clone)]
pub struct ClangToolchain {
    pub clang: PathBuf,
    /// Extra flags appended to every compile command.
    pub append: Vec<String>,
    /// Flags removed from every compile command (exact match).
    pub drop: Vec<String>,
    /// A compile still running after this long is killed and reported as failed.
    pub timeout: Duration,
    version: OnceLock<Option<u32>>,
}

impl ClangToolchain {
    pub fn new(clang: impl Into<PathBuf>) -> Self {
        Self {
            clang: clang.into(),
            append: Vec::new(),
            drop: Vec::new(),
            timeout: DEFAULT_BUILD_TIMEOUT,
            version: OnceLock::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_flags(mut self, append: Vec<String>, drop: Vec<String>) -> Self {
        self.append = append;
        self.drop = drop;
        self
    }

    /// Final argument list for a job, after applying the drop and append lists.
    pub fn command_args(&self, job: &CompileJob) -> Vec<String> {
        let mut args: Vec<String> = IR_FLAGS.iter().map(|s| s.to_string()).collect();
        args.extend(job.flags.iter().filter(|f| !self.drop.contains(f)).cloned());
        args.extend(self.append.iter().cloned());
        args.push(job.source.display().to_string());
        args.push("-o".to_string());
        args.push(job.output.display().to_string());
        args
    }
}

impl Toolchain for ClangToolchain {
    fn name(&self) -> &str {
        "clang"
    }

    fn version(&self) -> Option<u32> {
        *self.version.get_or_init(|| detect_llvm_version(&self.clang))
    }

    fn emit_ir(&self, job: &CompileJob) -> Result<(), BuildError> {
        if let Some(parent) = job.output.parent() {
            std::fs::create_dir_all(parent).map_err(|e| BuildError::Io {
                path: parent.to_path_buf(),
                message: e.to_string(),
            })?;
        }
        let args = self.command_args(job);
        debug!(source = %job.source.display(), "emitting IR");
        let mut command = Command::new(&self.clang);
        command.args(&args).current_dir(&job.workdir);
        let finished = match run_with_deadline(&mut command, self.timeout) {
            Ok(Waited::Finished(finished)) => finished,
            Ok(Waited::TimedOut) => {
                warn!(
                    source = %job.source.display(),
                    timeout = ?self.timeout,
                    "compiler timed out"
                );
                return Err(BuildError::Compiler {
                    unit: job.source.clone(),
                    status: None,
                    stderr: format!("timed out after {:?}", self.timeout),
                });
            }
            Err(RunError::Spawn(e)) => {
                return Err(BuildError::Spawn {
                    tool: self.clang.display().to_string(),
                    message: e.to_string(),
                })
            }
            Err(e) => {
                return Err(BuildError::Io { path: job.workdir.clone(), message: e.to_string() })
            }
        };
        if !finished.status.success() {
            return Err(BuildError::Compiler {
                unit: job.source.clone(),
                status: finished.status.code(),
                stderr: tail(&finished.stderr, STDERR_TAIL),
            });
        }
        if !job.output.is_file() {
            return Err(BuildError::MissingOutput { path: job.output.clone() });
        }
        Ok(())
    }
}

/// Major LLVM version reported by `<clang> --version`.
///
/// `SEMDIFF_FAKE_LLVM_VERSION` overrides detection so tests do not need a compiler.
pub fn detect_llvm_version(clang: &Path) -> Option<u32> {
    if let Some(fake) = std::env::var_os("SEMDIFF_FAKE_LLVM_VERSION") {
        return fake.to_str().and_then(|v| v.trim().parse().ok());
    }
    let output = Command::new(clang).arg("--version").output().ok()?;
    if !output.status.success() {
        return None;
    }
    parse_version(&String::from_utf8_lossy(&output.stdout))
}

static VERSION_PATTERN: OnceLock<Option<Regex>> = OnceLock::new();

/// Extract the major version from compiler `--version` output.
pub fn parse_version(text: &str) -> Option<u32> {
    let pattern =
        VERSION_PATTERN.get_or_init(|| Regex::new(r"version\s+(\d+)(?:\.\d+)*").ok()).as_ref()?;
    pattern.captures(text)?.get(1)?.as_str().parse().ok()
}
