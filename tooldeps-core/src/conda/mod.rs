// tooldeps-core/src/conda/mod.rs
pub mod context;
pub mod target;

pub use context::{installer_url, lenient_version, split_channels, CondaContext, CondaSettings};
pub use target::{hash_conda_packages, parse_install_environment, CondaTarget};
