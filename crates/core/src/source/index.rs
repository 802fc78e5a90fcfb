//! Locating C definitions in a source tree by textual scan.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use ignore::WalkBuilder;
use rayon::prelude::*;
use regex::Regex;
use tracing::debug;

/// The set of C compilation units a source tree knows about.
#[derive(Debug, Clone)]
pub struct SymbolIndex {
    root: PathBuf,
    files: Vec<PathBuf>,
}

impl SymbolIndex {
    /// Every `*.c` file under `root`, in sorted order.
    pub fn scan(root: &Path) -> Self {
        let mut files: Vec<PathBuf> = WalkBuilder::new(root)
            .hidden(true)
            .git_ignore(false)
            .build()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_some_and(|t| t.is_file()))
            .map(|entry| entry.into_path())
            .filter(|path| is_c_source(path))
            .collect();
        files.sort();
        debug!(root = %root.display(), files = files.len(), "indexed C sources");
        Self { root: root.to_path_buf(), files }
    }

    /// Index over an explicit list of units (paths relative to `root` are joined).
    pub fn from_files(root: &Path, files: impl IntoIterator<Item = PathBuf>) -> Self {
        let mut files: Vec<PathBuf> = files
            .into_iter()
            .map(|f| if f.is_absolute() { f } else { root.join(f) })
            .filter(|f| is_c_source(f))
            .collect();
        files.sort();
        files.dedup();
        Self { root: root.to_path_buf(), files }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// Files whose path relative to the root starts with `hint`.
    pub fn files_under(&self, hint: &str) -> Vec<PathBuf> {
        let hint = Path::new(hint.trim_end_matches('/'));
        self.files
            .iter()
            .filter(|f| f.strip_prefix(&self.root).is_ok_and(|rel| rel.starts_with(hint)))
            .cloned()
            .collect()
    }

    /// First unit (in index order) that defines function `name`.
    pub fn find_function(&self, name: &str, hint: Option<&str>) -> Option<PathBuf> {
        let pattern = function_definition(name)?;
        let candidates = match hint {
            Some(hint) => self.files_under(hint),
            None => self.files.clone(),
        };
        find_first(&candidates, |text| pattern.is_match(text))
    }

    /// Names of every function defined in the indexed units, sorted.
    pub fn function_names(&self) -> Vec<String> {
        let Some(pattern) = any_function_definition() else {
            return Vec::new();
        };
        let mut names: Vec<String> = self
            .files
            .par_iter()
            .flat_map_iter(|file| {
                let text = std::fs::read_to_string(file).unwrap_or_default();
                pattern.captures_iter(&text).map(|c| c[1].to_string()).collect::<Vec<_>>()
            })
            .filter(|name| !C_KEYWORDS.contains(&name.as_str()))
            .collect();
        names.sort();
        names.dedup();
        names
    }

    /// First unit among `within` that defines (non-extern) global `name`.
    pub fn find_global(&self, name: &str, within: &[PathBuf]) -> Option<PathBuf> {
        let pattern = global_definition(name)?;
        find_first(within, |text| has_definition(&pattern, text))
    }
}

fn find_first<F>(files: &[PathBuf], matches: F) -> Option<PathBuf>
where
    F: Fn(&str) -> bool + Sync,
{
    files.par_iter().find_map_first(|file| {
        let text = std::fs::read_to_string(file).ok()?;
        matches(&text).then(|| file.clone())
    })
}

const C_KEYWORDS: &[&str] = &["if", "for", "while", "switch", "return", "sizeof", "do"];

fn any_function_definition() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^(?:[A-Za-z_][^;(){}=\n]*[\s\*])?([A-Za-z_]\w*)\s*\([^;{}]*\)\s*\{").ok()
    })
    .as_ref()
}

fn has_definition(pattern: &Regex, text: &str) -> bool {
    pattern.find_iter(text).any(|m| !m.as_str().starts_with("extern"))
}

fn is_c_source(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "c")
}

/// Regex matching a top-level definition of function `name`.
///
/// Handles the return type on the same line or on the preceding one; prototypes
/// (terminated by `;`) and indented call sites do not match.
pub fn function_definition(name: &str) -> Option<Regex> {
    let name = regex::escape(name);
    Regex::new(&format!(r"(?m)^(?:[A-Za-z_][^;(){{}}=\n]*[\s\*])?{name}\s*\([^;{{}}]*\)\s*\{{"))
        .ok()
}

/// Regex matching a top-level declaration of global `name`.
///
/// Matches include `extern` declarations; callers filter those out.
pub fn global_definition(name: &str) -> Option<Regex> {
    let name = regex::escape(name);
    Regex::new(&format!(
        r"(?m)^(?:[A-Za-z_]\w*[ \t\*]+)+{name}(?:\s+__\w+)*\s*(?:\[[^\]]*\]\s*)*(?:=|;)"
    ))
    .ok()
}

/// True if `text` holds a definition of function `name`.
pub fn defines_function(text: &str, name: &str) -> bool {
    function_definition(name).is_some_and(|re| re.is_match(text))
}

/// True if `text` holds a non-`extern` definition of global `name`.
pub fn defines_global(text: &str, name: &str) -> bool {
    global_definition(name).is_some_and(|re| has_definition(&re, text))
}
