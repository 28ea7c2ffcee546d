// tooldeps-core/src/mulled/mod.rs
pub mod build;
pub mod cached;
pub mod util;
pub mod version;

pub use build::{involucro_args, mull_targets, mulled_image_name, InvolucroContext, MullOptions};
pub use cached::{
    docker_cached_container_description, find_best_matching_cached_image,
    identifier_to_cached_target, list_cached_mulled_images_from_path,
    list_docker_cached_mulled_images, singularity_cached_container_description,
    targets_to_mulled_name, CachedMulledImage,
};
pub use util::{
    build_target, conda_build_target_str, mulled_tags_for, parse_tag,
    requirements_to_mulled_targets, split_container_name, split_tag, v1_image_name,
    v2_image_name, version_sorted, HashFunc, Target,
};
pub use version::LooseVersion;
