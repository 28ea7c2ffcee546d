// tooldeps/src/cli/hash.rs
use clap::Args;
use tooldeps_common::config::Config;
use tooldeps_common::error::Result;
use tooldeps_common::model::RequirementType;
use tooldeps_core::deps::resolvers::conda::CondaDependencyResolver;
use tooldeps_core::mulled::{requirements_to_mulled_targets, HashFunc, Target};
use tooldeps_core::CondaTarget;

use crate::cli::parse_requirements;

#[derive(Args, Debug)]
pub struct HashArgs {
    /// Package requirements as name[=version]
    #[arg(required = true)]
    pub requirements: Vec<String>,

    /// Hash scheme: v1 or v2
    #[arg(long, default_value = "v2")]
    pub hash: String,

    /// Image build number appended to the tag
    #[arg(long)]
    pub image_build: Option<String>,

    /// Print the name of the shared conda environment instead
    #[arg(long)]
    pub conda_env: bool,
}

fn conda_targets(targets: &[Target]) -> Result<Vec<CondaTarget>> {
    targets
        .iter()
        .map(|t| CondaTarget::new(&t.package_name, t.version.as_deref(), t.build.as_deref(), None))
        .collect()
}

impl HashArgs {
    pub(crate) fn name(&self) -> Result<String> {
        let requirements = parse_requirements(&self.requirements, RequirementType::Package)?;
        let targets = requirements_to_mulled_targets(requirements.iter());
        if self.conda_env {
            let conda = conda_targets(&targets)?;
            return Ok(CondaDependencyResolver::merged_environment_name(&conda));
        }
        let hash_func: HashFunc = self.hash.parse()?;
        Ok(hash_func.image_name(&targets, self.image_build.as_deref(), None))
    }

    pub async fn run(&self, _config: &Config) -> Result<()> {
        println!("{}", self.name()?);
        Ok(())
    }
}
