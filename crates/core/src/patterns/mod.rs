//! Closed vocabulary of harmless-difference patterns and its resolution.

pub mod config;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::config::ConfigError;

pub use config::{
    ParseFailure, PatternBody, PatternConfig, PatternFile, ResolvedPatterns, SchemaVariant,
    OPAQUE_POINTER_LLVM_VERSION,
};

/// A named category of semantic difference tolerated when enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Pattern {
    StructAlignment,
    FunctionSplits,
    UnusedReturns,
    KernelPrints,
    DeadCode,
    NumericalMacros,
    TypeCasts,
    ControlFlowOnly,
}

impl Pattern {
    pub const ALL: [Pattern; 8] = [
        Pattern::StructAlignment,
        Pattern::FunctionSplits,
        Pattern::UnusedReturns,
        Pattern::KernelPrints,
        Pattern::DeadCode,
        Pattern::NumericalMacros,
        Pattern::TypeCasts,
        Pattern::ControlFlowOnly,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Pattern::StructAlignment => "struct-alignment",
            Pattern::FunctionSplits => "function-splits",
            Pattern::UnusedReturns => "unused-returns",
            Pattern::KernelPrints => "kernel-prints",
            Pattern::DeadCode => "dead-code",
            Pattern::NumericalMacros => "numerical-macros",
            Pattern::TypeCasts => "type-casts",
            Pattern::ControlFlowOnly => "control-flow-only",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Pattern::StructAlignment => "changed padding or alignment of structure fields",
            Pattern::FunctionSplits => "code moved into or out of a called function",
            Pattern::UnusedReturns => "callee return values that callers ignore",
            Pattern::KernelPrints => "changed kernel print calls and their arguments",
            Pattern::DeadCode => "code unreachable from the function entry",
            Pattern::NumericalMacros => "renamed macros expanding to the same number",
            Pattern::TypeCasts => "casts between types of equal representation",
            Pattern::ControlFlowOnly => "everything except control flow",
        }
    }

    fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Pattern {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Pattern::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| ConfigError::UnknownPattern(s.to_string()))
    }
}

/// Set of patterns as a bitset over [`Pattern::ALL`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PatternSet(u8);

impl PatternSet {
    pub const EMPTY: PatternSet = PatternSet(0);
    pub const FULL: PatternSet = PatternSet(u8::MAX);

    /// Patterns enabled when nothing is configured: all except the two that
    /// change what the comparison means.
    pub const DEFAULT: PatternSet = PatternSet(
        u8::MAX & !(1 << Pattern::TypeCasts as u8) & !(1 << Pattern::ControlFlowOnly as u8),
    );

    pub fn from_patterns(patterns: impl IntoIterator<Item = Pattern>) -> Self {
        patterns.into_iter().fold(Self::EMPTY, |set, p| set.with(p))
    }

    pub fn contains(self, pattern: Pattern) -> bool {
        self.0 & pattern.bit() != 0
    }

    pub fn with(self, pattern: Pattern) -> Self {
        PatternSet(self.0 | pattern.bit())
    }

    pub fn without(self, pattern: Pattern) -> Self {
        PatternSet(self.0 & !pattern.bit())
    }

    pub fn union(self, other: PatternSet) -> Self {
        PatternSet(self.0 | other.0)
    }

    pub fn difference(self, other: PatternSet) -> Self {
        PatternSet(self.0 & !other.0)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn iter(self) -> impl Iterator<Item = Pattern> {
        Pattern::ALL.into_iter().filter(move |p| self.contains(*p))
    }

    pub fn names(self) -> Vec<&'static str> {
        self.iter().map(Pattern::as_str).collect()
    }
}

impl fmt::Debug for PatternSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl fmt::Display for PatternSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.names().join(","))
    }
}

impl FromIterator<Pattern> for PatternSet {
    fn from_iter<I: IntoIterator<Item = Pattern>>(iter: I) -> Self {
        Self::from_patterns(iter)
    }
}

impl Serialize for PatternSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter())
    }
}

impl<'de> Deserialize<'de> for PatternSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let selectors = Vec::<PatternSelector>::deserialize(deserializer)?;
        Ok(PatternSelector::expand(&selectors))
    }
}

/// A pattern name as written in configuration: one pattern or the wildcard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PatternSelector {
    All,
    One(Pattern),
}

impl PatternSelector {
    pub fn set(self) -> PatternSet {
        match self {
            PatternSelector::All => PatternSet::FULL,
            PatternSelector::One(p) => PatternSet::EMPTY.with(p),
        }
    }

    pub fn expand(selectors: &[PatternSelector]) -> PatternSet {
        selectors.iter().fold(PatternSet::EMPTY, |set, s| set.union(s.set()))
    }
}

impl FromStr for PatternSelector {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "all" => Ok(PatternSelector::All),
            other => other.parse().map(PatternSelector::One),
        }
    }
}

impl fmt::Display for PatternSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatternSelector::All => f.write_str("all"),
            PatternSelector::One(p) => fmt::Display::fmt(p, f),
        }
    }
}

impl Serialize for PatternSelector {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PatternSelector {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Parse a list of pattern names, failing on the first unknown one.
pub fn parse_selectors<S: AsRef<str>>(names: &[S]) -> Result<Vec<PatternSelector>, ConfigError> {
    names.iter().map(|n| n.as_ref().parse()).collect()
}

/// `(defaults ∪ enable) \ disable`.
///
/// Disabling wins over enabling regardless of the order the two were given in.
/// `all` in `enable` adds every pattern; `all` in `disable` leaves the empty set.
pub fn merge(
    defaults: PatternSet,
    enable: &[PatternSelector],
    disable: &[PatternSelector],
) -> PatternSet {
    defaults.union(PatternSelector::expand(enable)).difference(PatternSelector::expand(disable))
}
