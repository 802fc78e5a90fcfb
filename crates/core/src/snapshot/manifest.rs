use std::fs;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::SnapshotError;
use crate::model::{Symbol, SymbolKind};
use crate::source::{SourceError, TreeKind};

/// Manifest file written into every snapshot side directory.
pub const MANIFEST_FILE: &str = "snapshot.yaml";
/// Pair file written next to the `old/` and `new/` sides.
pub const PAIR_FILE: &str = "pair.yaml";
/// Directory inside a snapshot side receiving copied IR artifacts.
pub const IR_DIR: &str = "ir";

/// Provenance of one snapshot side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SideInfo {
    /// Version of this tool that built the snapshot.
    pub tool_version: String,
    /// Major LLVM version of the toolchain that built the IR.
    pub llvm_version: Option<u32>,
    /// RFC 3339 UTC timestamp.
    pub created_time: String,
    pub tree_kind: TreeKind,
    pub source_root: PathBuf,
}

/// On-disk form of a snapshot side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub info: SideInfo,
    pub entries: Vec<ManifestEntry>,
}

/// One symbol's record: either a built artifact or the failure that stopped it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub name: String,
    pub kind: SymbolKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    /// IR artifact, relative to the side directory when stored inside it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llvm: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub glob_var: Option<String>,
    /// sha256 of the artifact at persist time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<SourceError>,
}

impl ManifestEntry {
    pub fn symbol(&self) -> Symbol {
        Symbol { name: self.name.clone(), kind: self.kind, hint: self.hint.clone() }
    }

    pub(crate) fn empty(symbol: &Symbol) -> Self {
        Self {
            name: symbol.name.clone(),
            kind: symbol.kind,
            hint: symbol.hint.clone(),
            llvm: None,
            source: None,
            function: None,
            glob_var: None,
            digest: None,
            failure: None,
        }
    }
}

/// Request order of a paired snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairManifest {
    pub order: Vec<Symbol>,
}

pub fn read_yaml<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, SnapshotError> {
    let text = fs::read_to_string(path)
        .map_err(|e| SnapshotError::Read { path: path.to_path_buf(), message: e.to_string() })?;
    serde_yaml::from_str(&text)
        .map_err(|e| SnapshotError::Manifest { path: path.to_path_buf(), message: e.to_string() })
}

pub fn write_yaml<T: Serialize>(path: &Path, value: &T) -> Result<(), SnapshotError> {
    let text = serde_yaml::to_string(value)
        .map_err(|e| SnapshotError::Manifest { path: path.to_path_buf(), message: e.to_string() })?;
    fs::write(path, text)
        .map_err(|e| SnapshotError::Write { path: path.to_path_buf(), message: e.to_string() })
}

/// Hex-encoded sha256 of a file's contents.
pub fn sha256_file(path: &Path) -> Result<String, SnapshotError> {
    let read_err = |e: std::io::Error| SnapshotError::Read {
        path: path.to_path_buf(),
        message: e.to_string(),
    };
    let mut reader = BufReader::new(fs::File::open(path).map_err(read_err)?);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];

    loop {
        let n = reader.read(&mut buf).map_err(read_err)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}
