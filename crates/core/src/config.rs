//! Toolchain and run settings, and the configuration error type.
//!
//! Settings live (optionally) at `.semdiff/config.json` below a working root.
//! Environment variables override the file:
//! - `SEMDIFF_CLANG`: compiler used to emit IR.
//! - `SEMDIFF_SIMPLL`: path of the `simpll` checker binary.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::source::BuildError;

/// Directory holding tool metadata below a working root.
pub const META_DIR: &str = ".semdiff";
/// Settings file name inside [`META_DIR`].
pub const SETTINGS_FILE: &str = "config.json";

/// Configuration-time failures. Any of these aborts a run before comparison starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown pattern '{0}'")]
    UnknownPattern(String),

    #[error("failed to read {}: {message}", .path.display())]
    Read { path: PathBuf, message: String },

    #[error("failed to write {}: {message}", .path.display())]
    Write { path: PathBuf, message: String },

    #[error("failed to parse {}: {message}", .path.display())]
    Parse { path: PathBuf, message: String },

    #[error("pattern file {} has no '{variant}' variant", .path.display())]
    MissingVariant { path: PathBuf, variant: String },

    #[error("equivalence checker '{name}' unavailable: {reason}")]
    BackendUnavailable { name: String, reason: String },

    #[error("snapshots built with different LLVM versions (old {old:?}, new {new:?})")]
    IncompatibleSnapshots { old: Option<u32>, new: Option<u32> },

    #[error("symbol list is empty")]
    EmptySymbolList,

    #[error("invalid symbol filter '{pattern}': {message}")]
    InvalidFilter { pattern: String, message: String },

    #[error("cannot open source tree: {0}")]
    SourceTree(#[from] BuildError),
}

/// Tool settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Compiler used to emit IR.
    pub clang: PathBuf,
    /// Extra flags appended to every compile command.
    pub clang_append: Vec<String>,
    /// Flags removed from every compile command.
    pub clang_drop: Vec<String>,
    /// Kernel architecture include directory (`arch/<arch>`).
    pub arch: String,
    /// Name of the equivalence checker to use.
    pub checker: String,
    /// Path to the `simpll` binary, if installed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub simpll: Option<PathBuf>,
    /// Per-symbol checker timeout in seconds.
    pub timeout_secs: u64,
    /// Limit on a single compiler invocation, in seconds.
    pub build_timeout_secs: u64,
    /// Worker threads; 0 picks the number of CPUs.
    pub jobs: usize,
    /// Preload modules shared by several comparisons.
    pub module_cache: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            clang: PathBuf::from("clang"),
            clang_append: Vec::new(),
            clang_drop: Vec::new(),
            arch: "x86".to_string(),
            checker: "ir-text".to_string(),
            simpll: None,
            timeout_secs: 40,
            build_timeout_secs: 300,
            jobs: 0,
            module_cache: false,
        }
    }
}

impl Settings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn build_timeout(&self) -> Duration {
        Duration::from_secs(self.build_timeout_secs)
    }

    /// Apply `SEMDIFF_*` environment overrides.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var_os(key))
    }

    /// Apply overrides looked up through `lookup` instead of the process environment.
    pub fn with_overrides_from<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<OsString>,
    {
        if let Some(clang) = lookup("SEMDIFF_CLANG") {
            self.clang = PathBuf::from(clang);
        }
        if let Some(simpll) = lookup("SEMDIFF_SIMPLL") {
            self.simpll = Some(PathBuf::from(simpll));
        }
        self
    }
}

/// Default settings location for a working root.
pub fn settings_path(root: &Path) -> PathBuf {
    root.join(META_DIR).join(SETTINGS_FILE)
}

/// Load settings from `explicit`, else from the root's default location if it
/// exists, else defaults. Environment overrides are applied last.
pub fn load_settings(explicit: Option<&Path>, root: &Path) -> Result<Settings, ConfigError> {
    let default_path = settings_path(root);
    let path = match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => default_path.is_file().then_some(default_path),
    };
    let settings = match path {
        Some(path) => read_settings(&path)?,
        None => Settings::default(),
    };
    Ok(settings.with_env_overrides())
}

fn read_settings(path: &Path) -> Result<Settings, ConfigError> {
    let body = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Read { path: path.to_path_buf(), message: e.to_string() })?;
    serde_json::from_str(&body)
        .map_err(|e| ConfigError::Parse { path: path.to_path_buf(), message: e.to_string() })
}

/// Write `settings` to the root's default location, creating the metadata directory.
pub fn save_settings(root: &Path, settings: &Settings) -> Result<PathBuf, ConfigError> {
    let path = settings_path(root);
    let write_err =
        |e: std::io::Error| ConfigError::Write { path: path.clone(), message: e.to_string() };
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(write_err)?;
    }
    let body = serde_json::to_string_pretty(settings)
        .map_err(|e| ConfigError::Parse { path: path.clone(), message: e.to_string() })?;
    std::fs::write(&path, body).map_err(write_err)?;
    Ok(path)
}
