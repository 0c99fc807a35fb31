//! Domain layer: the target value object and the live target registry.

pub mod registry;
pub mod target;

pub use registry::{LiveTargetRegistry, RegistrySnapshot, TargetLease};
pub use target::{Target, TargetParseError};
