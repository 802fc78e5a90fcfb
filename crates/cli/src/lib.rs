use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use semdiff_core::config::{load_settings, Settings};
use tracing::debug;

pub mod commands;

/// Canonicalize a path if possible, falling back to the path joined onto the
/// current working directory (for paths that do not exist yet).
pub fn canonicalize_or_current(path: &Path) -> Result<PathBuf> {
    if path == Path::new(".") {
        return env::current_dir().context("Failed to get current directory");
    }
    match path.canonicalize() {
        Ok(p) => Ok(p),
        Err(_) if path.is_absolute() => Ok(path.to_path_buf()),
        Err(_) => {
            let cwd = env::current_dir().context("Failed to get current directory")?;
            Ok(cwd.join(path))
        }
    }
}

/// Default log filter for a `-v` count, used when `RUST_LOG` is unset.
pub fn log_filter(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    }
}

/// Settings from `--config`, else `.semdiff/config.json` under the current
/// directory, else defaults; environment overrides applied.
pub fn settings_for(config: Option<&Path>) -> Result<Settings> {
    let cwd = env::current_dir().context("Failed to get current directory")?;
    let settings = load_settings(config, &cwd).context("Failed to load settings")?;
    debug!(?settings, "loaded settings");
    Ok(settings)
}
