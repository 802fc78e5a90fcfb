pub mod build;
pub mod compare;
pub mod patterns;
pub mod runs;
pub mod settings;

pub use build::*;
pub use compare::*;
pub use patterns::*;
pub use runs::*;
pub use settings::*;
