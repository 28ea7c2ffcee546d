// tooldeps-common/src/lib.rs
pub mod cache;
pub mod config;
pub mod error;
pub mod model;
pub mod remote;

// Re-export key types
pub use cache::Cache;
pub use config::Config;
pub use error::{DepsError, Result};
pub use model::{
    ContainerDescription, ContainerType, RequirementSpecification, RequirementType, ToolInfo,
    ToolRequirement, ToolRequirements,
};
