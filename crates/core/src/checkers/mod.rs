//! Built-in equivalence checkers.

pub mod cache;
pub mod simpll;
pub mod text;

use std::sync::Arc;

pub use cache::{modules_to_cache, ModuleCache, MIN_FREQUENCY};
pub use simpll::SimpllChecker;
pub use text::IrTextChecker;

use crate::compare::CheckerRegistry;
use crate::config::Settings;

/// Registry with every built-in checker, configured from `settings`.
///
/// `cache`, when given, is shared by the in-process checker.
pub fn default_checker_registry(
    settings: &Settings,
    cache: Option<Arc<ModuleCache>>,
) -> CheckerRegistry {
    let mut registry = CheckerRegistry::new();
    let text = match cache {
        Some(cache) => IrTextChecker::with_cache(cache),
        None => IrTextChecker::new(),
    };
    registry.register(text).register(SimpllChecker::new(settings.simpll.clone()));
    registry
}
