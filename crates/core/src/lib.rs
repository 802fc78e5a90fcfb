//! semdiff-core
//!
//! Core library for checking whether C functions changed behavior between two
//! revisions of a code base.
//!
//! A source tree turns requested symbols (functions, kernel sysctls, module
//! parameters) into compiled IR modules; snapshots persist those modules for
//! reuse; the comparator pairs old and new IR per symbol and classifies each
//! pair through an equivalence checker, tolerating a configurable set of
//! harmless-difference patterns.
//!
//! All substantive logic lives here so it is testable without a process
//! boundary; the `semdiff` CLI is a thin frontend.

pub mod model;
pub mod source;
pub mod patterns;
pub mod snapshot;
pub mod compare;
pub mod checkers;
pub mod store;
pub mod config;
pub mod pipeline;

mod pool;
mod process;

/// Returns the library version as encoded at compile time.
///
/// Recorded in snapshot manifests and reported by the CLI.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
