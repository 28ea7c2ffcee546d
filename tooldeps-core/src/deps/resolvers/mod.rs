// tooldeps-core/src/deps/resolvers/mod.rs
pub mod conda;
pub mod galaxy_packages;
pub mod lmod;
pub mod modules;
pub mod tool_shed_packages;
