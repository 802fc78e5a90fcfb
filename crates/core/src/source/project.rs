use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use tracing::debug;

use super::{
    BuildError, ResolveError, ResolveStep, SourceError, SourceTree, SymbolIndex, SymbolState,
    Toolchain, TreeCore, TreeKind,
};
use crate::model::{ModuleRef, Symbol, SymbolKind};

/// Name of the compilation database looked up at the project root.
pub const COMPILE_DATABASE: &str = "compile_commands.json";

/// One entry of `compile_commands.json`.
#[derive(Debug, Clone, Deserialize)]
struct CompileCommand {
    directory: PathBuf,
    file: PathBuf,
    #[serde(default)]
    arguments: Option<Vec<String>>,
    #[serde(default)]
    command: Option<String>,
}

impl CompileCommand {
    /// Argument vector of the command; a `command` string is split with shell quoting rules.
    fn words(&self) -> Result<Vec<String>, shell_words::ParseError> {
        match (&self.arguments, &self.command) {
            (Some(args), _) => Ok(args.clone()),
            (None, Some(cmd)) => shell_words::split(cmd),
            (None, None) => Ok(Vec::new()),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct UnitFlags {
    workdir: PathBuf,
    flags: Vec<String>,
}

/// Generic C project.
///
/// Compilation units and their flags come from `compile_commands.json` when the
/// project has one; otherwise every `*.c` file under the root is a unit built
/// without extra flags.
pub struct ProjectTree {
    core: TreeCore,
    index: SymbolIndex,
    units: HashMap<PathBuf, UnitFlags>,
}

impl ProjectTree {
    pub fn open(
        root: &Path,
        output: Option<PathBuf>,
        toolchain: Arc<dyn Toolchain>,
    ) -> Result<Self, BuildError> {
        let database = root.join(COMPILE_DATABASE);
        let (index, units) = if database.is_file() {
            let units = load_compile_database(&database)?;
            let index = SymbolIndex::from_files(root, units.keys().cloned());
            (index, units)
        } else {
            (SymbolIndex::scan(root), HashMap::new())
        };
        debug!(root = %root.display(), units = index.files().len(), "opened project tree");
        Ok(Self { core: TreeCore::new(root, output, toolchain)?, index, units })
    }

    pub fn index(&self) -> &SymbolIndex {
        &self.index
    }

    fn unit_flags(&self, unit: &Path) -> UnitFlags {
        self.units.get(unit).cloned().unwrap_or_else(|| UnitFlags {
            workdir: self.core.root().to_path_buf(),
            flags: Vec::new(),
        })
    }

    fn resolve(&self, symbol: &Symbol) -> Result<ModuleRef, SourceError> {
        if symbol.kind != SymbolKind::Function {
            return Err(ResolveError::new(
                symbol,
                ResolveStep::SymbolLookup,
                format!("{} symbols need a kernel tree", symbol.kind.as_str()),
            )
            .into());
        }
        let unit = self
            .index
            .find_function(&symbol.name, symbol.hint.as_deref())
            .ok_or_else(|| SourceError::not_found(symbol))?;
        let flags = self.unit_flags(&unit);
        let module = self.core.build_unit(&unit, &flags.workdir, &flags.flags)?;
        Ok(ModuleRef::new(module, symbol.name.clone()))
    }
}

impl SourceTree for ProjectTree {
    fn kind(&self) -> TreeKind {
        TreeKind::GenericBuild
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

    fn functions(&self) -> Vec<Symbol> {
        self.index.function_names().into_iter().map(Symbol::function).collect()
    }
}

fn load_compile_database(path: &Path) -> Result<HashMap<PathBuf, UnitFlags>, BuildError> {
    let invalid =
        |message: String| BuildError::CompileDatabase { path: path.to_path_buf(), message };
    let body = std::fs::read_to_string(path).map_err(|e| invalid(e.to_string()))?;
    let commands: Vec<CompileCommand> =
        serde_json::from_str(&body).map_err(|e| invalid(e.to_string()))?;
    let mut units = HashMap::with_capacity(commands.len());
    for cmd in commands {
        let file = if cmd.file.is_absolute() {
            cmd.file.clone()
        } else {
            cmd.directory.join(&cmd.file)
        };
        let words = cmd
            .words()
            .map_err(|e| invalid(format!("command for {}: {e}", file.display())))?;
        let flags = preprocessor_flags(&words);
        units.insert(file, UnitFlags { workdir: cmd.directory, flags });
    }
    Ok(units)
}

/// Flags that influence preprocessing and language mode; everything else
/// (outputs, optimization, warnings) is dropped.
pub fn preprocessor_flags(words: &[String]) -> Vec<String> {
    const JOINED: &[&str] = &["-I", "-D", "-U", "-std=", "-isystem", "-iquote", "-include"];
    const SEPARATE: &[&str] = &["-I", "-D", "-U", "-isystem", "-iquote", "-include"];

    let mut out = Vec::new();
    let mut iter = words.iter().skip(1).peekable();
    while let Some(word) = iter.next() {
        if SEPARATE.contains(&word.as_str()) {
            if let Some(value) = iter.next() {
                out.push(word.clone());
                out.push(value.clone());
            }
        } else if JOINED.iter().any(|p| word.starts_with(p)) {
            out.push(word.clone());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(line: &str) -> Vec<String> {
        line.split_whitespace().map(str::to_string).collect()
    }

    #[test]
    fn keeps_only_preprocessor_flags() {
        let flags = preprocessor_flags(&words(
            "cc -O2 -Iinclude -DNDEBUG -Wall -c src/a.c -o a.o -include config.h -std=gnu11",
        ));
        assert_eq!(flags, words("-Iinclude -DNDEBUG -include config.h -std=gnu11"));
    }

    #[test]
    fn loads_arguments_and_command_forms() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join(COMPILE_DATABASE);
        let body = serde_json::json!([
            { "directory": dir.path(), "file": "a.c", "arguments": ["cc", "-Iinc", "-c", "a.c"] },
            { "directory": dir.path(), "file": "b.c", "command": "cc -DX=1 -c b.c" }
        ]);
        std::fs::write(&db, body.to_string()).unwrap();
        let units = load_compile_database(&db).unwrap();
        assert_eq!(units[&dir.path().join("a.c")].flags, words("-Iinc"));
        assert_eq!(units[&dir.path().join("b.c")].flags, words("-DX=1"));
    }

    #[test]
    fn command_strings_keep_quoted_arguments_whole() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join(COMPILE_DATABASE);
        let body = serde_json::json!([{
            "directory": dir.path(),
            "file": "a.c",
            "command": r#"cc -DNAME="a b" -I 'dir with space' -c a.c"#
        }]);
        std::fs::write(&db, body.to_string()).unwrap();
        let units = load_compile_database(&db).unwrap();
        assert_eq!(
            units[&dir.path().join("a.c")].flags,
            vec!["-DNAME=a b", "-I", "dir with space"]
        );
    }

    #[test]
    fn unbalanced_quotes_are_database_errors() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join(COMPILE_DATABASE);
        let body = serde_json::json!([
            { "directory": dir.path(), "file": "a.c", "command": "cc -DNAME=\"oops -c a.c" }
        ]);
        std::fs::write(&db, body.to_string()).unwrap();
        assert!(matches!(
            load_compile_database(&db),
            Err(BuildError::CompileDatabase { .. })
        ));
    }
}
