//! Pattern configuration files and their resolution for one run.
//!
//! A pattern file is YAML in one of two shapes:
//!
//! ```yaml
//! enable: [kernel-prints]
//! disable: [dead-code]
//! patterns: [custom/lock-rename.ll]
//! on-parse-failure: warn
//! ```
//!
//! or, with a body per IR schema variant:
//!
//! ```yaml
//! variants:
//!   opaque: { enable: [all], patterns: [opaque/lock-rename.ll] }
//!   explicit: { enable: [all], patterns: [explicit/lock-rename.ll] }
//! ```
//!
//! Custom pattern paths are relative to the file. The variant is chosen from the
//! toolchain version; both resolve to the same in-memory [`PatternSet`].

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{merge, parse_selectors, PatternSelector, PatternSet};
use crate::config::ConfigError;

/// First LLVM major version whose IR uses opaque pointers.
pub const OPAQUE_POINTER_LLVM_VERSION: u32 = 15;

/// On-disk pattern schema, tied to the pointer representation of the IR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SchemaVariant {
    Opaque,
    Explicit,
}

impl SchemaVariant {
    /// Variant matching a toolchain; an unknown version is treated as current.
    pub fn for_toolchain(llvm_version: Option<u32>) -> Self {
        match llvm_version {
            Some(v) if v < OPAQUE_POINTER_LLVM_VERSION => SchemaVariant::Explicit,
            _ => SchemaVariant::Opaque,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SchemaVariant::Opaque => "opaque",
            SchemaVariant::Explicit => "explicit",
        }
    }
}

impl fmt::Display for SchemaVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the checker should do with a custom pattern it cannot parse.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ParseFailure {
    #[default]
    Warn,
    Error,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct RawBody {
    #[serde(default)]
    enable: Vec<String>,
    #[serde(default)]
    disable: Vec<String>,
    #[serde(default)]
    patterns: Vec<PathBuf>,
    #[serde(default)]
    on_parse_failure: ParseFailure,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawVariants {
    #[serde(default)]
    opaque: Option<RawBody>,
    #[serde(default)]
    explicit: Option<RawBody>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawVariantFile {
    variants: RawVariants,
}

/// One schema variant's content.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatternBody {
    pub enable: Vec<PatternSelector>,
    pub disable: Vec<PatternSelector>,
    /// Custom pattern files, absolute.
    pub patterns: Vec<PathBuf>,
    pub on_parse_failure: ParseFailure,
}

impl PatternBody {
    fn from_raw(raw: RawBody, base: &Path) -> Result<Self, ConfigError> {
        Ok(Self {
            enable: parse_selectors(&raw.enable)?,
            disable: parse_selectors(&raw.disable)?,
            patterns: raw.patterns.into_iter().map(|p| base.join(p)).collect(),
            on_parse_failure: raw.on_parse_failure,
        })
    }
}

/// A loaded pattern file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternFile {
    pub path: PathBuf,
    opaque: Option<PatternBody>,
    explicit: Option<PatternBody>,
}

impl PatternFile {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Read { path: path.to_path_buf(), message: e.to_string() })?;
        Self::parse(&text, path)
    }

    /// Parse file contents; `path` anchors relative custom pattern paths.
    pub fn parse(text: &str, path: &Path) -> Result<Self, ConfigError> {
        let parse_err = |e: serde_yaml::Error| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        };
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        let value: serde_yaml::Value = serde_yaml::from_str(text).map_err(parse_err)?;
        let has_variants = value.get("variants").is_some();
        let (opaque, explicit) = if has_variants {
            let raw: RawVariantFile = serde_yaml::from_value(value).map_err(parse_err)?;
            (
                raw.variants.opaque.map(|b| PatternBody::from_raw(b, base)).transpose()?,
                raw.variants.explicit.map(|b| PatternBody::from_raw(b, base)).transpose()?,
            )
        } else {
            let raw: RawBody = if value.is_null() {
                RawBody::default()
            } else {
                serde_yaml::from_value(value).map_err(parse_err)?
            };
            let body = PatternBody::from_raw(raw, base)?;
            (Some(body.clone()), Some(body))
        };
        Ok(Self { path: path.to_path_buf(), opaque, explicit })
    }

    pub fn variant(&self, variant: SchemaVariant) -> Result<&PatternBody, ConfigError> {
        let body = match variant {
            SchemaVariant::Opaque => self.opaque.as_ref(),
            SchemaVariant::Explicit => self.explicit.as_ref(),
        };
        body.ok_or_else(|| ConfigError::MissingVariant {
            path: self.path.clone(),
            variant: variant.to_string(),
        })
    }
}

/// Pattern configuration for one run, before the toolchain is known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternConfig {
    pub defaults: PatternSet,
    pub enable: Vec<PatternSelector>,
    pub disable: Vec<PatternSelector>,
    pub file: Option<PathBuf>,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self { defaults: PatternSet::DEFAULT, enable: Vec::new(), disable: Vec::new(), file: None }
    }
}

impl PatternConfig {
    /// Configuration from pattern names given on the command line.
    pub fn from_names<S: AsRef<str>>(enable: &[S], disable: &[S]) -> Result<Self, ConfigError> {
        Ok(Self {
            enable: parse_selectors(enable)?,
            disable: parse_selectors(disable)?,
            ..Self::default()
        })
    }

    pub fn with_file(mut self, file: Option<PathBuf>) -> Self {
        self.file = file;
        self
    }

    /// Resolve against a toolchain version.
    ///
    /// Enables and disables from the file are merged with the explicit ones;
    /// every disable is applied after every enable.
    pub fn resolve(&self, llvm_version: Option<u32>) -> Result<ResolvedPatterns, ConfigError> {
        let variant = SchemaVariant::for_toolchain(llvm_version);
        let body = match &self.file {
            Some(path) => PatternFile::load(path)?.variant(variant)?.clone(),
            None => PatternBody::default(),
        };
        for custom in &body.patterns {
            if !custom.is_file() {
                return Err(ConfigError::Read {
                    path: custom.clone(),
                    message: "custom pattern file not found".to_string(),
                });
            }
        }
        let enable: Vec<PatternSelector> =
            body.enable.iter().chain(&self.enable).copied().collect();
        let disable: Vec<PatternSelector> =
            body.disable.iter().chain(&self.disable).copied().collect();
        let set = merge(self.defaults, &enable, &disable);
        debug!(%variant, patterns = %set, "resolved pattern set");
        Ok(ResolvedPatterns {
            set,
            variant,
            custom: body.patterns,
            on_parse_failure: body.on_parse_failure,
        })
    }
}

/// Pattern configuration ready for the checker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedPatterns {
    pub set: PatternSet,
    pub variant: SchemaVariant,
    /// Custom pattern files for the selected variant.
    pub custom: Vec<PathBuf>,
    pub on_parse_failure: ParseFailure,
}

impl ResolvedPatterns {
    /// Built-in patterns only, no custom files.
    pub fn builtin(set: PatternSet) -> Self {
        Self {
            set,
            variant: SchemaVariant::Opaque,
            custom: Vec::new(),
            on_parse_failure: ParseFailure::Warn,
        }
    }
}
