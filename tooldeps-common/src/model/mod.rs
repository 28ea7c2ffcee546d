// tooldeps-common/src/model/mod.rs
pub mod container;
pub mod requirement;

pub use container::{ContainerDescription, ContainerType, ToolInfo, DEFAULT_CONTAINER_SHELL};
pub use requirement::{
    RequirementSpecification, RequirementType, ToolRequirement, ToolRequirements,
};
