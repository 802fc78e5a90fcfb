use std::path::Path;

use anyhow::{Context, Result};
use semdiff_core::config::{save_settings, Settings};

use crate::canonicalize_or_current;

/// Print the effective settings; with `write`, save them under `root`.
pub fn config_command(settings: &Settings, root: &Path, write: bool) -> Result<()> {
    if write {
        let root = canonicalize_or_current(root)?;
        let path = save_settings(&root, settings)
            .with_context(|| format!("Failed to save settings under {}", root.display()))?;
        println!("Settings written to {}", path.display());
        return Ok(());
    }
    println!("{}", serde_json::to_string_pretty(settings)?);
    Ok(())
}
