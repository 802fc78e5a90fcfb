//! Kernel source tree with sysctl and module-parameter indirection.
//!
//! Indirect symbols are located through explicit resolver chains. Each chain
//! yields a [`Resolution`], which names the step that stopped it when it fails:
//!
//! - sysctl: `TableLookup` -> `EntryLookup` -> `DataVariable` -> `Handler` -> `Definition`
//! - module parameter: `ModuleSources` -> `ParamDeclaration` -> `Definition`

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use regex::Regex;
use tracing::debug;

use super::{
    BuildError, ResolveError, ResolveStep, SourceError, SourceTree, SymbolIndex, SymbolState,
    Toolchain, TreeCore, TreeKind,
};
use crate::model::{ModuleRef, Symbol, SymbolKind};

/// sysctl name prefixes and the sources holding their control tables,
/// most specific prefix first. Entries ending in `/` are directories.
const SYSCTL_TABLES: &[(&str, &[&str])] = &[
    ("net.core.", &["net/core/sysctl_net_core.c"]),
    ("net.ipv4.", &["net/ipv4/sysctl_net_ipv4.c"]),
    ("kernel.", &["kernel/sysctl.c", "kernel/"]),
    ("vm.", &["kernel/sysctl.c", "mm/"]),
    ("fs.", &["fs/"]),
];

/// Where a resolved symbol lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// IR symbol to compare.
    pub function: String,
    /// Global variable anchoring the comparison.
    pub glob_var: Option<String>,
    /// Compilation unit defining `function`.
    pub unit: PathBuf,
}

/// Outcome of a resolver chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Resolved(Target),
    Unresolved { step: ResolveStep, reason: String },
}

impl From<Result<Target, (ResolveStep, String)>> for Resolution {
    fn from(chain: Result<Target, (ResolveStep, String)>) -> Self {
        match chain {
            Ok(target) => Resolution::Resolved(target),
            Err((step, reason)) => Resolution::Unresolved { step, reason },
        }
    }
}

type Chain<T> = Result<T, (ResolveStep, String)>;

/// Kernel checkout built with kernel include paths and `-D__KERNEL__`.
pub struct KernelTree {
    core: TreeCore,
    index: SymbolIndex,
    flags: Vec<String>,
}

impl KernelTree {
    /// Open a kernel tree for `arch` (the `arch/<arch>` include directory).
    pub fn open(
        root: &Path,
        output: Option<PathBuf>,
        toolchain: Arc<dyn Toolchain>,
        arch: &str,
    ) -> Result<Self, BuildError> {
        let index = SymbolIndex::scan(root);
        let flags = kernel_flags(root, arch);
        debug!(root = %root.display(), arch, units = index.files().len(), "opened kernel tree");
        Ok(Self { core: TreeCore::new(root, output, toolchain)?, index, flags })
    }

    pub fn flags(&self) -> &[String] {
        &self.flags
    }

    /// Locate the handler (and data variable) behind sysctl `name`.
    pub fn resolve_sysctl(&self, name: &str) -> Resolution {
        self.sysctl_chain(name).into()
    }

    /// Locate the global backing parameter `param` of the module at `module`
    /// (`<dir>/<module-name>` relative to the root).
    pub fn resolve_module_param(&self, module: &str, param: &str) -> Resolution {
        self.module_param_chain(module, param).into()
    }

    fn sysctl_chain(&self, name: &str) -> Chain<Target> {
        let (prefix, sources) = SYSCTL_TABLES
            .iter()
            .find(|(prefix, _)| name.starts_with(*prefix))
            .ok_or_else(|| (ResolveStep::TableLookup, format!("unknown sysctl prefix in {name}")))?;
        let leaf = &name[prefix.len()..];
        let tables = self.table_sources(sources);
        if tables.is_empty() {
            return Err((ResolveStep::TableLookup, format!("no control table source for {prefix}")));
        }

        let procname = Regex::new(&format!(r#"\.procname\s*=\s*"{}""#, regex::escape(leaf)))
            .map_err(|e| (ResolveStep::EntryLookup, e.to_string()))?;
        let (table, entry) = tables
            .iter()
            .find_map(|file| {
                let text = std::fs::read_to_string(file).ok()?;
                let at = procname.find(&text)?;
                enclosing_block(&text, at.start()).map(|body| (file.clone(), body.to_string()))
            })
            .ok_or_else(|| (ResolveStep::EntryLookup, format!("no table entry for \"{leaf}\"")))?;

        let glob_var = data_variable(&entry)?;
        let handler = entry_field(&entry, FieldKind::Handler)
            .ok_or_else(|| (ResolveStep::Handler, "entry has no .proc_handler".to_string()))?;

        let unit = if index_defines_function(&table, &handler) {
            table
        } else {
            self.index.find_function(&handler, None).ok_or_else(|| {
                (ResolveStep::Definition, format!("no definition of handler {handler}"))
            })?
        };
        Ok(Target { function: handler, glob_var, unit })
    }

    fn module_param_chain(&self, module: &str, param: &str) -> Chain<Target> {
        let sources = self.module_sources(module);
        if sources.is_empty() {
            return Err((ResolveStep::ModuleSources, format!("no sources for module {module}")));
        }
        let var = sources
            .iter()
            .find_map(|file| {
                let text = std::fs::read_to_string(file).ok()?;
                param_variable(&text, param)
            })
            .ok_or_else(|| {
                (ResolveStep::ParamDeclaration, format!("no module_param declaring {param}"))
            })?;
        let unit = self
            .index
            .find_global(&var, &sources)
            .ok_or_else(|| (ResolveStep::Definition, format!("no definition of variable {var}")))?;
        Ok(Target { function: var.clone(), glob_var: Some(var), unit })
    }

    /// Existing table sources for one prefix: listed files first, then the
    /// units of listed directories.
    fn table_sources(&self, sources: &[&str]) -> Vec<PathBuf> {
        let mut out: Vec<PathBuf> = Vec::new();
        for source in sources {
            let candidates = if source.ends_with('/') {
                self.index.files_under(source)
            } else {
                vec![self.core.root().join(source)]
            };
            for file in candidates {
                if file.is_file() && !out.contains(&file) {
                    out.push(file);
                }
            }
        }
        out
    }

    /// Source files of the module at `<dir>/<name>`: objects listed in the
    /// directory Makefile, or `<name>.c`.
    fn module_sources(&self, module: &str) -> Vec<PathBuf> {
        let module_path = Path::new(module);
        let (dir, name) = match (module_path.parent(), module_path.file_name()) {
            (Some(dir), Some(name)) => (self.core.root().join(dir), name.to_string_lossy()),
            _ => return Vec::new(),
        };
        let mut sources: Vec<PathBuf> = std::fs::read_to_string(dir.join("Makefile"))
            .ok()
            .map(|makefile| makefile_objects(&makefile, &name))
            .unwrap_or_default()
            .into_iter()
            .map(|obj| dir.join(obj).with_extension("c"))
            .filter(|src| src.is_file())
            .collect();
        if sources.is_empty() {
            let single = dir.join(format!("{name}.c"));
            if single.is_file() {
                sources.push(single);
            }
        }
        sources
    }

    fn resolve(&self, symbol: &Symbol) -> Result<ModuleRef, SourceError> {
        let resolution = match symbol.kind {
            SymbolKind::Function => {
                let unit = self
                    .index
                    .find_function(&symbol.name, symbol.hint.as_deref())
                    .ok_or_else(|| SourceError::not_found(symbol))?;
                Resolution::Resolved(Target { function: symbol.name.clone(), glob_var: None, unit })
            }
            SymbolKind::Sysctl => self.resolve_sysctl(&symbol.name),
            SymbolKind::ModuleParam => match symbol.hint.as_deref() {
                Some(module) => self.resolve_module_param(module, &symbol.name),
                None => Resolution::Unresolved {
                    step: ResolveStep::ModuleSources,
                    reason: "module parameter without a module path".to_string(),
                },
            },
        };
        match resolution {
            Resolution::Resolved(target) => {
                debug!(
                    %symbol,
                    function = %target.function,
                    unit = %target.unit.display(),
                    "resolved"
                );
                let module = self.core.build_unit(&target.unit, self.core.root(), &self.flags)?;
                Ok(ModuleRef::new(module, target.function).with_glob_var(target.glob_var))
            }
            Resolution::Unresolved { step, reason } => {
                Err(ResolveError::new(symbol, step, reason).into())
            }
        }
    }
}

impl SourceTree for KernelTree {
    fn kind(&self) -> TreeKind {
        TreeKind::KernelBuild
    }

    fn root(&self) -> &Path {
        self.core.root()
    }

    fn output_dir(&self) -> &Path {
        self.core.output_dir()
    }

    fn toolchain_version(&self) -> Option<u32> {
        self.core.toolchain_version()
    }

    fn resolve_and_build(&self, symbol: &Symbol) -> Result<ModuleRef, SourceError> {
        self.core.resolve_once(symbol, || self.resolve(symbol))
    }

    fn state(&self, symbol: &Symbol) -> SymbolState {
        self.core.state(symbol)
    }

    fn built_units(&self) -> usize {
        self.core.built_units()
    }
}

/// Compile flags for kernel units of `arch`.
pub fn kernel_flags(root: &Path, arch: &str) -> Vec<String> {
    let mut flags: Vec<String> = [
        "-D__KERNEL__".to_string(),
        "-nostdinc".to_string(),
        format!("-Iarch/{arch}/include"),
        format!("-Iarch/{arch}/include/generated"),
        "-Iinclude".to_string(),
        format!("-Iarch/{arch}/include/uapi"),
        "-Iinclude/uapi".to_string(),
        "-Wno-everything".to_string(),
    ]
    .into();
    if root.join("include/linux/kconfig.h").is_file() {
        flags.push("-include".to_string());
        flags.push("include/linux/kconfig.h".to_string());
    }
    flags
}

fn index_defines_function(file: &Path, name: &str) -> bool {
    std::fs::read_to_string(file).is_ok_and(|text| super::index::defines_function(&text, name))
}

/// Text between the braces enclosing byte offset `at`.
fn enclosing_block(text: &str, at: usize) -> Option<&str> {
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut start = None;
    for i in (0..at).rev() {
        match bytes[i] {
            b'}' => depth += 1,
            b'{' if depth == 0 => {
                start = Some(i + 1);
                break;
            }
            b'{' => depth -= 1,
            _ => {}
        }
    }
    let start = start?;
    let mut depth = 0usize;
    for (offset, byte) in bytes[at..].iter().enumerate() {
        match byte {
            b'{' => depth += 1,
            b'}' if depth == 0 => return Some(&text[start..at + offset]),
            b'}' => depth -= 1,
            _ => {}
        }
    }
    None
}

#[derive(Clone, Copy)]
enum FieldKind {
    Data,
    Handler,
}

static DATA_FIELD: OnceLock<Option<Regex>> = OnceLock::new();
static HANDLER_FIELD: OnceLock<Option<Regex>> = OnceLock::new();
static DATA_PRESENT: OnceLock<Option<Regex>> = OnceLock::new();

fn field_pattern(kind: FieldKind) -> Option<&'static Regex> {
    let (cell, pattern) = match kind {
        FieldKind::Data => (&DATA_FIELD, r"(?m)\.data\s*=\s*&\s*([A-Za-z_]\w*)\s*(?:,|$)"),
        FieldKind::Handler => (&HANDLER_FIELD, r"\.proc_handler\s*=\s*&?\s*([A-Za-z_]\w*)"),
    };
    cell.get_or_init(|| Regex::new(pattern).ok()).as_ref()
}

fn entry_field(entry: &str, kind: FieldKind) -> Option<String> {
    let caps = field_pattern(kind)?.captures(entry)?;
    Some(caps.get(1)?.as_str().to_string())
}

/// The `.data` variable of an entry; an entry without `.data` has none, one
/// whose `.data` is not `&variable` stops the chain.
fn data_variable(entry: &str) -> Chain<Option<String>> {
    if let Some(var) = entry_field(entry, FieldKind::Data) {
        return Ok(Some(var));
    }
    let present = DATA_PRESENT
        .get_or_init(|| Regex::new(r"\.data\s*=").ok())
        .as_ref()
        .is_some_and(|re| re.is_match(entry));
    if present {
        Err((ResolveStep::DataVariable, "unsupported .data expression".to_string()))
    } else {
        Ok(None)
    }
}

/// Variable behind `param` in one source file, from `module_param`,
/// `module_param_named`, `module_param_cb`, or `module_param_array`.
fn param_variable(text: &str, param: &str) -> Option<String> {
    let p = regex::escape(param);
    let patterns = [
        format!(r"module_param(?:_array)?\s*\(\s*({p})\s*,"),
        format!(r"module_param_named\s*\(\s*{p}\s*,\s*([A-Za-z_]\w*)\s*,"),
        format!(r"module_param_cb\s*\(\s*{p}\s*,[^,]*,\s*&\s*([A-Za-z_]\w*)\s*,"),
    ];
    patterns.iter().find_map(|pattern| {
        let caps = Regex::new(pattern).ok()?.captures(text)?;
        Some(caps.get(1)?.as_str().to_string())
    })
}

/// Object files making up module `name` in a kbuild Makefile
/// (`name-objs`/`name-y`, with line continuations).
fn makefile_objects(makefile: &str, name: &str) -> Vec<String> {
    let joined = makefile.replace("\\\n", " ");
    let Ok(pattern) =
        Regex::new(&format!(r"(?m)^\s*{}-(?:objs|y)\s*[:+]?=\s*(.*)$", regex::escape(name)))
    else {
        return Vec::new();
    };
    pattern
        .captures_iter(&joined)
        .filter_map(|caps| caps.get(1))
        .flat_map(|m| m.as_str().split_whitespace().map(str::to_string).collect::<Vec<_>>())
        .filter(|obj| obj.ends_with(".o"))
        .collect()
}
