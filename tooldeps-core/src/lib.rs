// tooldeps-core/src/lib.rs
//! Resolution engine: turns tool requirements into shell activation text or
//! container descriptions.

pub mod conda;
pub mod containers;
pub mod deps;
pub mod installable;
pub mod mulled;
pub mod resolution_cache;
pub mod services;

#[cfg(test)]
pub(crate) mod test_support;

pub use conda::{CondaContext, CondaTarget};
pub use containers::{ContainerRegistry, ContainerResolveOptions, ResolvedContainerDescription};
pub use deps::{Dependency, DependencyManager, ResolveOptions};
pub use installable::{ensure_installed, InstallOutcome, InstallableContext};
pub use resolution_cache::ResolutionCache;
pub use services::ResolverServices;
