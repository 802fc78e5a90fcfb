use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use semdiff_core::config::Settings;
use semdiff_core::model::Symbol;
use semdiff_core::pipeline::{self, read_symbol_list, TreeSpec};
use semdiff_core::snapshot::{BuildMode, Lookup, IR_DIR, MANIFEST_FILE};
use semdiff_core::source::TreeKind;

use crate::canonicalize_or_current;

/// Inputs of `build` and `build-kernel`.
#[derive(Debug, Clone)]
pub struct BuildArgs {
    pub kind: TreeKind,
    pub source: PathBuf,
    pub output: PathBuf,
    pub list: Option<PathBuf>,
    /// Extra symbols given on the command line.
    pub symbols: Vec<String>,
    /// Replace an existing snapshot at `output`.
    pub force: bool,
}

/// Build a snapshot side of `source` into `output`.
pub fn build_command(args: &BuildArgs, settings: &Settings) -> Result<()> {
    let source = canonicalize_or_current(&args.source)?;
    let output = canonicalize_or_current(&args.output)?;
    prepare_output(&output, args.force)?;

    let mut symbols = match &args.list {
        Some(list) => read_symbol_list(list)
            .with_context(|| format!("Failed to read symbol list {}", list.display()))?,
        None => Vec::new(),
    };
    for entry in &args.symbols {
        let symbol = Symbol::parse(entry)
            .with_context(|| format!("'{entry}' does not name a symbol"))?;
        symbols.push(symbol);
    }

    let spec = TreeSpec { kind: args.kind, root: source, output_dir: Some(output.join(IR_DIR)) };
    let tree = pipeline::open_tree(&spec, pipeline::toolchain(settings), settings)
        .with_context(|| format!("Failed to open source tree {}", spec.root.display()))?;
    if symbols.is_empty() && args.list.is_none() {
        symbols = tree.functions();
    }

    let mut side = pipeline::build_snapshot(tree, &symbols, BuildMode::Eager, settings)
        .context("Failed to build snapshot")?;
    side.persist(&output)
        .with_context(|| format!("Failed to write snapshot to {}", output.display()))?;

    let failures: Vec<(Symbol, String)> = side
        .symbols()
        .filter_map(|symbol| match side.lookup(symbol) {
            Lookup::Ready(_) => None,
            Lookup::Failed(err) => Some((symbol.clone(), err.to_string())),
            Lookup::Missing => Some((symbol.clone(), "not built".to_string())),
        })
        .collect();

    println!("Snapshot written to {}", output.display());
    println!("  Symbols: {}", side.len());
    println!("  Built:   {}", side.len() - failures.len());
    println!("  Failed:  {}", failures.len());
    for (symbol, reason) in &failures {
        println!("  - {symbol}: {reason}");
    }
    Ok(())
}

/// Refuse to overwrite an existing snapshot unless forced; with `force`, the
/// old manifest and IR directory are removed first.
fn prepare_output(output: &Path, force: bool) -> Result<()> {
    let manifest = output.join(MANIFEST_FILE);
    if manifest.exists() {
        if !force {
            bail!(
                "A snapshot already exists at {} (use --force to replace it)",
                output.display()
            );
        }
        fs::remove_file(&manifest)
            .with_context(|| format!("Failed to remove {}", manifest.display()))?;
        let ir = output.join(IR_DIR);
        if ir.is_dir() {
            fs::remove_dir_all(&ir).with_context(|| format!("Failed to remove {}", ir.display()))?;
        }
    }
    fs::create_dir_all(output)
        .with_context(|| format!("Failed to create output directory {}", output.display()))?;
    Ok(())
}
