// tooldeps-core/src/mulled/build.rs
//! Building mulled images with involucro.
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tooldeps_common::error::{DepsError, Result};
use tooldeps_common::remote::{Downloader, TagSource};
use tooldeps_io::fs::{create_dir_all, remove_directory_recursive, set_permissions};
use tooldeps_io::process::{CommandRunner, CommandSpec};
use tracing::{debug, info, warn};

use super::util::{conda_build_target_str, split_container_name, HashFunc, Target};
use crate::installable::{ensure_installed, InstallOutcome, InstallableContext};

pub const INVOLUCRO_VERSION: &str = "1.1.2";
const DEFAULT_BIND: &str = "build/dist:/usr/local/";

const SINGULARITY_DEFINITION: &str = "Bootstrap: docker
From: bgruening/busybox-bash:0.1

%setup
    echo \"Copying conda environment\"
    mkdir -p /tmp/conda
    cp -r /data/dist/* /tmp/conda/

%post
    mkdir -p /usr/local
    cp -R /tmp/conda/* /usr/local/
";

pub fn involucro_download_url() -> String {
    format!(
        "https://github.com/involucro/involucro/releases/download/v{INVOLUCRO_VERSION}/involucro"
    )
}

/// The involucro binary at a fixed path, installable on demand.
#[derive(Clone)]
pub struct InvolucroContext {
    path: PathBuf,
    runner: Arc<dyn CommandRunner>,
    downloader: Arc<dyn Downloader>,
}

impl std::fmt::Debug for InvolucroContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvolucroContext")
            .field("path", &self.path)
            .finish()
    }
}

impl InvolucroContext {
    pub fn new(
        path: PathBuf,
        runner: Arc<dyn CommandRunner>,
        downloader: Arc<dyn Downloader>,
    ) -> Self {
        Self {
            path,
            runner,
            downloader,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn install_involucro(&self) -> Result<()> {
        let url = involucro_download_url();
        info!("Downloading involucro from {}", url);
        self.downloader.download(&url, &self.path)?;
        set_permissions(&self.path, 0o755)
    }

    pub fn ensure(&self, auto_init: bool, lock_timeout: Duration) -> Result<InstallOutcome> {
        ensure_installed(self, || self.install_involucro(), auto_init, lock_timeout)
    }

    pub fn build_command(&self, args: &[String]) -> CommandSpec {
        CommandSpec::new(self.path.display().to_string())
            .arg("-v=3")
            .args(args.iter().cloned())
    }

    /// Runs involucro from `work_dir`. A `build` directory is created up
    /// front (docker would otherwise create it as root) and removed after.
    pub fn exec_command(&self, args: &[String], work_dir: &Path) -> Result<i32> {
        let spec = self.build_command(args).cwd(work_dir);
        let build_dir = work_dir.join("build");
        let created = !build_dir.exists();
        if created {
            create_dir_all(&build_dir)?;
        }
        info!("Executing involucro: {}", spec);
        let result = self.runner.run_long(&spec, "Building container image");
        if created {
            if let Err(e) = remove_directory_recursive(&build_dir) {
                warn!("Could not remove {}: {}", build_dir.display(), e);
            }
        }
        let output = result?;
        if !output.is_success() {
            warn!(
                "involucro exited with {}: {}",
                output.exit_code(),
                output.stderr.trim()
            );
        }
        Ok(output.exit_code())
    }
}

impl InstallableContext for InvolucroContext {
    fn is_installed(&self) -> bool {
        self.path.exists()
    }

    fn can_install(&self) -> bool {
        true
    }

    fn installable_description(&self) -> &str {
        "Involucro"
    }

    fn parent_path(&self) -> PathBuf {
        self.path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

#[derive(Debug, Clone)]
pub struct MullOptions {
    /// Positional involucro command: `build`, `build-and-test`, `all`, ...
    pub command: String,
    pub namespace: String,
    pub hash_func: HashFunc,
    pub channels: Vec<String>,
    pub image_build: Option<String>,
    pub name_override: Option<String>,
    pub dest_base_image: Option<String>,
    pub test: Option<String>,
    pub verbose: bool,
    pub singularity: bool,
    pub singularity_image_dir: Option<PathBuf>,
    /// When false, skip the build if the registry already has the image.
    pub rebuild: bool,
    pub dry_run: bool,
    pub work_dir: PathBuf,
    pub invfile: PathBuf,
}

impl MullOptions {
    pub fn new(invfile: PathBuf, work_dir: PathBuf) -> Self {
        Self {
            command: "build".to_string(),
            namespace: "biocontainers".to_string(),
            hash_func: HashFunc::V2,
            channels: vec!["conda-forge".to_string(), "bioconda".to_string()],
            image_build: None,
            name_override: None,
            dest_base_image: None,
            test: Some("true".to_string()),
            verbose: false,
            singularity: false,
            singularity_image_dir: None,
            rebuild: true,
            dry_run: false,
            work_dir,
            invfile,
        }
    }
}

/// Image name (`image[:tag]`) that `mull_targets` would build.
pub fn mulled_image_name(targets: &[Target], options: &MullOptions) -> String {
    options.hash_func.image_name(
        targets,
        effective_image_build(targets, options).as_deref(),
        options.name_override.as_deref(),
    )
}

fn effective_image_build(targets: &[Target], options: &MullOptions) -> Option<String> {
    match &options.image_build {
        Some(build) => Some(build.clone()),
        None if targets.len() > 1 => Some("0".to_string()),
        None => None,
    }
}

/// The involucro argument list for building `targets` (without `-v=3`).
pub fn involucro_args(targets: &[Target], options: &MullOptions) -> Vec<String> {
    let image = mulled_image_name(targets, options);
    let repo = format!("quay.io/{}/{}", options.namespace, image);

    let mut binds = vec![DEFAULT_BIND.to_string()];
    for channel in &options.channels {
        if let Some(path) = channel.strip_prefix("file://") {
            binds.push(format!("{path}:{path}"));
        }
    }
    let targets_str = targets
        .iter()
        .map(conda_build_target_str)
        .collect::<Vec<_>>()
        .join(",");

    let mut args = vec!["-f".to_string(), options.invfile.display().to_string()];
    let mut set = |kv: String| {
        args.push("-set".to_string());
        args.push(kv);
    };
    set(format!("CHANNELS={}", options.channels.join(",")));
    set(format!("TARGETS={targets_str}"));
    set(format!("REPO={repo}"));
    set(format!("BINDS={}", binds.join(",")));
    if let Some(base) = &options.dest_base_image {
        set(format!("DEST_BASE_IMAGE={base}"));
    }
    if options.verbose {
        set("VERBOSE=1".to_string());
    }
    if options.singularity {
        set("SINGULARITY=1".to_string());
        set(format!("SINGULARITY_IMAGE_NAME={image}"));
        if let Some(dir) = &options.singularity_image_dir {
            set(format!("SINGULARITY_IMAGE_DIR={}", dir.display()));
        }
    }
    if let Some(test) = &options.test {
        set(format!("TEST={test}"));
    }
    args.push(options.command.clone());
    args
}

/// Builds one image holding all `targets`. Returns involucro's exit code,
/// 0 for dry runs and skipped builds.
pub fn mull_targets(
    targets: &[Target],
    involucro: &InvolucroContext,
    options: &MullOptions,
    tag_source: &dyn TagSource,
    auto_init: bool,
    lock_timeout: Duration,
) -> Result<i32> {
    if targets.is_empty() {
        return Err(DepsError::ValidationError(
            "No targets given to build an image for".to_string(),
        ));
    }
    let image = mulled_image_name(targets, options);
    if !options.rebuild {
        let (repo_name, tag) = split_container_name(&image);
        let tags = tag_source.tags(&options.namespace, repo_name)?;
        if !tags.is_empty() && tag.map_or(true, |t| tags.iter().any(|have| have == t)) {
            info!("Build skipped, repository already exists.");
            return Ok(0);
        }
    }

    let args = involucro_args(targets, options);
    info!("{}", involucro.build_command(&args));
    if options.dry_run {
        return Ok(0);
    }

    let outcome = involucro.ensure(auto_init, lock_timeout)?;
    if !outcome.is_installed() {
        return Err(DepsError::InstallError(format!(
            "involucro is not available at {}",
            involucro.path().display()
        )));
    }
    if options.singularity {
        if let Some(dir) = &options.singularity_image_dir {
            create_dir_all(dir)?;
            std::fs::write(dir.join("Singularity.def"), SINGULARITY_DEFINITION)?;
        }
    }
    debug!("Building {} for {} targets", image, targets.len());
    involucro.exec_command(&args, &options.work_dir)
}

#[cfg(test)]
mod tests {
    use tooldeps_common::remote::Offline;
    use tooldeps_io::process::CommandOutput;

    use super::*;
    use crate::mulled::util::build_target;
    use crate::test_support::{FakeRunner, FakeTags};

    fn targets() -> Vec<Target> {
        vec![
            build_target("samtools", Some("1.3.1"), None, None),
            build_target("bwa", Some("0.7.13"), None, None),
        ]
    }

    fn value_of<'a>(args: &'a [String], key: &str) -> Option<&'a str> {
        args.iter()
            .filter_map(|a| a.strip_prefix(key).and_then(|rest| rest.strip_prefix('=')))
            .next()
    }

    #[test]
    fn multi_target_builds_force_image_build_zero() {
        let options = MullOptions::new("/opt/invfile.lua".into(), "/tmp".into());
        let args = involucro_args(&targets(), &options);
        assert_eq!(&args[..2], ["-f", "/opt/invfile.lua"]);
        assert_eq!(
            value_of(&args, "REPO"),
            Some("quay.io/biocontainers/mulled-v2-fe8faa35dbf6dc65a0f7f5d4ea12e31a79f73e40:4d0535c94ef45be8459f429561f0894c3fe0ebcf-0")
        );
        assert_eq!(value_of(&args, "TARGETS"), Some("samtools=1.3.1,bwa=0.7.13"));
        assert_eq!(value_of(&args, "CHANNELS"), Some("conda-forge,bioconda"));
        assert_eq!(value_of(&args, "TEST"), Some("true"));
        assert_eq!(args.last().map(String::as_str), Some("build"));
    }

    #[test]
    fn local_channels_are_bound_and_singularity_is_set() {
        let mut options = MullOptions::new("invfile.lua".into(), "/tmp".into());
        options.channels = vec!["file:///srv/channel".to_string(), "bioconda".to_string()];
        options.singularity = true;
        options.singularity_image_dir = Some("/cache/singularity".into());
        let single = [build_target("bwa", Some("0.7.13"), None, None)];
        let args = involucro_args(&single, &options);
        assert_eq!(
            value_of(&args, "BINDS"),
            Some("build/dist:/usr/local/,/srv/channel:/srv/channel")
        );
        assert_eq!(value_of(&args, "SINGULARITY_IMAGE_NAME"), Some("bwa:0.7.13"));
        assert_eq!(value_of(&args, "SINGULARITY_IMAGE_DIR"), Some("/cache/singularity"));
    }

    #[test]
    fn mull_runs_involucro_in_work_dir_and_cleans_build_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let bin = tmp.path().join("bin").join("involucro");
        std::fs::create_dir_all(bin.parent().unwrap()).unwrap();
        std::fs::write(&bin, "").unwrap();

        let runner = FakeRunner::new("4.6.14");
        let work_dir = tmp.path().to_path_buf();
        let build_dir = work_dir.join("build");
        runner.respond("involucro", move |_| {
            assert!(build_dir.is_dir());
            CommandOutput::success()
        });
        let involucro = InvolucroContext::new(bin, Arc::new(runner.clone()), Arc::new(Offline));
        let mut options = MullOptions::new("invfile.lua".into(), work_dir.clone());
        options.command = "build-and-test".to_string();

        let code = mull_targets(
            &targets(),
            &involucro,
            &options,
            &FakeTags::default(),
            false,
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(code, 0);
        let calls = runner.calls_for_program("involucro");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].args[0], "-v=3");
        assert_eq!(calls[0].cwd.as_deref(), Some(work_dir.as_path()));
        assert!(!work_dir.join("build").exists());
    }

    #[test]
    fn existing_image_skips_build_when_not_rebuilding() {
        let runner = FakeRunner::new("4.6.14");
        let involucro = InvolucroContext::new(
            "/nonexistent/involucro".into(),
            Arc::new(runner.clone()),
            Arc::new(Offline),
        );
        let tags = FakeTags::default().with(
            "biocontainers",
            "mulled-v2-fe8faa35dbf6dc65a0f7f5d4ea12e31a79f73e40",
            &["4d0535c94ef45be8459f429561f0894c3fe0ebcf-0"],
        );
        let mut options = MullOptions::new("invfile.lua".into(), "/tmp".into());
        options.rebuild = false;
        let code = mull_targets(&targets(), &involucro, &options, &tags, false, Duration::from_secs(1)).unwrap();
        assert_eq!(code, 0);
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn missing_involucro_without_auto_init_is_an_install_error() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = FakeRunner::new("4.6.14");
        let involucro = InvolucroContext::new(
            tmp.path().join("involucro"),
            Arc::new(runner),
            Arc::new(Offline),
        );
        let options = MullOptions::new("invfile.lua".into(), tmp.path().to_path_buf());
        let err = mull_targets(&targets(), &involucro, &options, &FakeTags::default(), false, Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(err, DepsError::InstallError(_)));
    }
}
