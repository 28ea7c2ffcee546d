// tooldeps-core/src/conda/context.rs
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use semver::Version;
use serde_json::Value;
use tooldeps_common::config::CondaConfig;
use tooldeps_common::error::{DepsError, Result};
use tooldeps_common::remote::Downloader;
use tooldeps_io::fs::{list_directory_entries, remove_directory_recursive};
use tooldeps_io::process::{check_output, CommandRunner, CommandSpec};
use tracing::{debug, error, info, warn};

use super::target::{hash_conda_packages, parse_install_environment, CondaTarget};
use crate::installable::InstallableContext;

const MINIFORGE_DOWNLOAD_BASE: &str =
    "https://github.com/conda-forge/miniforge/releases/latest/download";
const INSTALLER_NAME: &str = "miniforge-installer.sh";

/// Settings of one conda installation, usually from `CondaConfig` with
/// per-resolver overrides applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CondaSettings {
    pub prefix: PathBuf,
    pub exec: Option<PathBuf>,
    pub debug: bool,
    pub ensure_channels: Vec<String>,
    pub use_local: bool,
    pub copy_dependencies: bool,
    pub condarc_override: Option<PathBuf>,
}

impl CondaSettings {
    pub fn from_config(conda: &CondaConfig, prefix: PathBuf) -> Self {
        Self {
            prefix,
            exec: conda.exec.clone(),
            debug: conda.debug,
            ensure_channels: split_channels(&conda.ensure_channels),
            use_local: conda.use_local,
            copy_dependencies: conda.copy_dependencies,
            condarc_override: conda.condarc_override.clone(),
        }
    }
}

/// Comma separated channel list, blanks dropped.
pub fn split_channels(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parses "4.10.3", "22.11", "23.1.0.post1" and similar loosely into semver.
pub fn lenient_version(raw: &str) -> Option<Version> {
    let mut parts = raw
        .trim()
        .split(|c: char| !c.is_ascii_digit())
        .filter(|p| !p.is_empty())
        .map(|p| p.parse::<u64>());
    let major = parts.next()?.ok()?;
    let minor = parts.next().and_then(|p| p.ok()).unwrap_or(0);
    let patch = parts.next().and_then(|p| p.ok()).unwrap_or(0);
    Some(Version::new(major, minor, patch))
}

/// Wraps one conda installation: locating it, running its subcommands and
/// tracking the environments it holds.
pub struct CondaContext {
    settings: CondaSettings,
    conda_exec: PathBuf,
    runner: Arc<dyn CommandRunner>,
    downloader: Arc<dyn Downloader>,
    info: OnceCell<Value>,
}

impl fmt::Debug for CondaContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CondaContext")
            .field("prefix", &self.settings.prefix)
            .field("conda_exec", &self.conda_exec)
            .finish()
    }
}

impl CondaContext {
    pub fn new(
        settings: CondaSettings,
        runner: Arc<dyn CommandRunner>,
        downloader: Arc<dyn Downloader>,
    ) -> Self {
        let conda_exec = settings
            .exec
            .clone()
            .unwrap_or_else(|| settings.prefix.join("bin").join("conda"));
        Self {
            settings,
            conda_exec,
            runner,
            downloader,
            info: OnceCell::new(),
        }
    }

    pub fn settings(&self) -> &CondaSettings {
        &self.settings
    }

    pub fn conda_prefix(&self) -> &Path {
        &self.settings.prefix
    }

    pub fn conda_exec(&self) -> &Path {
        &self.conda_exec
    }

    pub fn copy_dependencies(&self) -> bool {
        self.settings.copy_dependencies
    }

    /// `activate` script sourced by generated shell text.
    pub fn activate(&self) -> PathBuf {
        self.settings.prefix.join("bin").join("activate")
    }

    pub fn is_conda_installed(&self) -> bool {
        self.conda_exec.exists()
    }

    /// `conda info --json`, parsed once per context.
    pub fn conda_info(&self) -> Result<&Value> {
        self.info.get_or_try_init(|| {
            let spec = CommandSpec::new(self.conda_exec.display().to_string())
                .args(["info", "--json"]);
            let raw = check_output(self.runner.as_ref(), &spec)?;
            let value: Value = serde_json::from_str(&raw)?;
            Ok(value)
        })
    }

    pub fn conda_version(&self) -> Result<Version> {
        let info = self.conda_info()?;
        let raw = info
            .get("conda_version")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                DepsError::ParseError("conda info", "missing conda_version".to_string())
            })?;
        lenient_version(raw).ok_or_else(|| {
            DepsError::ParseError("conda info", format!("unreadable conda_version '{raw}'"))
        })
    }

    pub fn conda_build_available(&self) -> bool {
        self.conda_info()
            .ok()
            .and_then(|info| info.get("conda_build_version"))
            .and_then(Value::as_str)
            .is_some_and(|v| v != "not installed")
    }

    pub fn envs_path(&self) -> PathBuf {
        self.settings.prefix.join("envs")
    }

    pub fn env_path(&self, env_name: &str) -> PathBuf {
        self.envs_path().join(env_name)
    }

    pub fn has_env(&self, env_name: &str) -> bool {
        self.env_path(env_name).is_dir()
    }

    /// Existing environment for `target`, canonical (lowercase) name first,
    /// then the legacy spelling.
    pub fn get_conda_target_installed_path(&self, target: &CondaTarget) -> Option<PathBuf> {
        let canonical = target.install_environment();
        if self.has_env(&canonical) {
            return Some(self.env_path(&canonical));
        }
        let legacy = target.capitalized_install_environment();
        if legacy != canonical && self.has_env(&legacy) {
            debug!("Using legacy environment name {} for {}", legacy, target);
            return Some(self.env_path(&legacy));
        }
        None
    }

    pub fn is_conda_target_installed(&self, target: &CondaTarget) -> bool {
        self.get_conda_target_installed_path(target).is_some()
    }

    /// Single-target environments present under `envs/`.
    pub fn installed_conda_targets(&self) -> Result<Vec<CondaTarget>> {
        let envs = self.envs_path();
        if !envs.is_dir() {
            return Ok(Vec::new());
        }
        let mut targets = Vec::new();
        for (name, _path, is_dir) in list_directory_entries(&envs)? {
            if !is_dir {
                continue;
            }
            if let Some((package, version)) = parse_install_environment(&name) {
                match CondaTarget::new(&package, version.as_deref(), None, None) {
                    Ok(target) => targets.push(target),
                    Err(e) => debug!("Skipping environment {}: {}", name, e),
                }
            }
        }
        targets.sort_by(|a, b| a.install_environment().cmp(&b.install_environment()));
        Ok(targets)
    }

    fn override_channels_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if !self.settings.ensure_channels.is_empty() {
            args.push("--override-channels".to_string());
            for channel in &self.settings.ensure_channels {
                args.push("--channel".to_string());
                args.push(channel.clone());
            }
        }
        args
    }

    /// `--solver libmamba` when conda is new enough and the plugin is in the
    /// base environment.
    fn solver_args(&self) -> Vec<String> {
        let new_enough = match self.conda_version() {
            Ok(version) => version >= Version::new(22, 11, 0),
            Err(e) => {
                debug!("Could not determine conda version: {}", e);
                false
            }
        };
        if !new_enough {
            return Vec::new();
        }
        let pattern = self
            .settings
            .prefix
            .join("conda-meta")
            .join("conda-libmamba-solver-*.json");
        let has_plugin = glob::glob(&pattern.to_string_lossy())
            .map(|mut paths| paths.any(|p| p.is_ok()))
            .unwrap_or(false);
        if has_plugin {
            vec!["--solver".to_string(), "libmamba".to_string()]
        } else {
            Vec::new()
        }
    }

    fn command(&self, operation: &str, args: &[String]) -> CommandSpec {
        let mut spec = CommandSpec::new(self.conda_exec.display().to_string());
        if self.settings.debug {
            spec = spec.arg("--debug");
        }
        spec = spec.arg(operation).args(args.iter().cloned());
        if let Some(condarc) = &self.settings.condarc_override {
            spec = spec.env("CONDARC", condarc.display().to_string());
        }
        spec
    }

    /// Runs `conda <operation> <args>`; non-zero exits come back as the
    /// exit code, only failing to start the process is an error.
    pub fn exec_command(
        &self,
        operation: &str,
        args: &[String],
        stdout_path: Option<&Path>,
    ) -> Result<i32> {
        let mut spec = self.command(operation, args);
        if let Some(path) = stdout_path {
            spec = spec.stdout_to(path);
        }
        info!("Executing conda command: {}", spec);
        let message = format!("Running conda {operation}");
        let output = self.runner.run_long(&spec, &message)?;
        if !output.is_success() {
            warn!(
                "conda {} exited with {}: {}",
                operation,
                output.exit_code(),
                output.stderr.trim()
            );
        }
        Ok(output.exit_code())
    }

    fn exec_with_strict_retry(
        &self,
        operation: &str,
        args: &[String],
        allow_local: bool,
        stdout_path: Option<&Path>,
    ) -> Result<i32> {
        let mut base = vec!["-y".to_string(), "--quiet".to_string()];
        if allow_local && self.settings.use_local {
            base.push("--use-local".to_string());
        }
        base.extend(self.override_channels_args());
        base.extend(self.solver_args());
        base.extend(args.iter().cloned());

        let mut strict = vec!["--strict-channel-priority".to_string()];
        strict.extend(base.iter().cloned());
        let code = self.exec_command(operation, &strict, stdout_path)?;
        if code == 0 {
            return Ok(0);
        }
        debug!(
            "conda {} with strict channel priority failed ({}), retrying without it",
            operation, code
        );
        self.exec_command(operation, &base, stdout_path)
    }

    pub fn exec_create(
        &self,
        args: &[String],
        allow_local: bool,
        stdout_path: Option<&Path>,
    ) -> Result<i32> {
        self.exec_with_strict_retry("create", args, allow_local, stdout_path)
    }

    pub fn exec_install(
        &self,
        args: &[String],
        allow_local: bool,
        stdout_path: Option<&Path>,
    ) -> Result<i32> {
        self.exec_with_strict_retry("install", args, allow_local, stdout_path)
    }

    /// `conda env remove -y --name <args>`.
    pub fn exec_remove(&self, args: &[String]) -> Result<i32> {
        let mut remove_args = vec![
            "remove".to_string(),
            "-y".to_string(),
            "--name".to_string(),
        ];
        remove_args.extend(args.iter().cloned());
        self.exec_command("env", &remove_args, None)
    }

    pub fn exec_clean(&self, args: &[String], quiet: bool) -> Result<i32> {
        let mut clean_args = vec!["--tarballs".to_string(), "-y".to_string()];
        clean_args.extend(args.iter().cloned());
        let devnull = Path::new("/dev/null");
        self.exec_command("clean", &clean_args, quiet.then_some(devnull))
    }

    /// `conda list --name <name> --export > path`.
    pub fn export_list(&self, name: &str, path: &Path) -> Result<i32> {
        let args = vec![
            "--name".to_string(),
            name.to_string(),
            "--export".to_string(),
        ];
        self.exec_command("list", &args, Some(path))
    }

    /// `conda search --json <spec>`; a failing search is an error since no
    /// exit code alone says anything useful.
    pub fn search(&self, target: &CondaTarget) -> Result<Value> {
        let mut args = vec!["--json".to_string()];
        args.extend(self.override_channels_args());
        args.push(target.package_specifier());
        let spec = self.command("search", &args);
        let raw = check_output(self.runner.as_ref(), &spec)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Creates the single-target environment for `target`, or installs into
    /// the base environment with `skip_environment`.
    pub fn install_conda_target(&self, target: &CondaTarget, skip_environment: bool) -> Result<i32> {
        if skip_environment {
            self.exec_install(&[target.package_specifier()], true, None)
        } else {
            let args = vec![
                "--name".to_string(),
                target.install_environment(),
                target.package_specifier(),
            ];
            self.exec_create(&args, true, None)
        }
    }

    /// Installs several targets into `env_name`, or into the base
    /// environment when no name is given.
    pub fn install_conda_targets(
        &self,
        targets: &[CondaTarget],
        env_name: Option<&str>,
        allow_local: bool,
    ) -> Result<i32> {
        let specifiers = targets.iter().map(CondaTarget::package_specifier);
        match env_name {
            Some(env) => {
                let mut args = vec!["--name".to_string(), env.to_string()];
                args.extend(specifiers);
                self.exec_create(&args, allow_local, None)
            }
            None => self.exec_install(&specifiers.collect::<Vec<_>>(), allow_local, None),
        }
    }

    /// Removes a partially created environment so later `has_env` checks do
    /// not mistake it for an installed one.
    pub fn cleanup_failed_install_of_environment(&self, env: &str) -> Result<()> {
        if self.has_env(env) {
            let code = self.exec_remove(&[env.to_string()])?;
            if code != 0 {
                warn!("conda env remove failed for {} ({})", env, code);
            }
        }
        let path = self.env_path(env);
        if path.exists() {
            debug!("Removing leftover environment directory {}", path.display());
            remove_directory_recursive(&path)?;
        }
        Ok(())
    }

    pub fn cleanup_failed_install(&self, target: &CondaTarget) -> Result<()> {
        self.cleanup_failed_install_of_environment(&target.install_environment())
    }

    /// Builds a fresh environment from the package lists of existing
    /// single-target environments, without resolving again. Returns the
    /// environment name (or `path`) and the exit code.
    pub fn build_isolated_environment(
        &self,
        targets: &[CondaTarget],
        path: Option<&Path>,
        copy: bool,
        quiet: bool,
    ) -> Result<(String, i32)> {
        let hash = hash_conda_packages(targets);
        let tempdir = tempfile::Builder::new()
            .prefix("jobdeps")
            .suffix(&hash)
            .tempdir()?;
        let tempdir_name = tempdir
            .path()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("jobdeps{hash}"));

        let result = self.create_from_exports(targets, tempdir.path(), &tempdir_name, path, copy, quiet);

        if let Err(e) = self.exec_clean(&[], quiet) {
            warn!("conda clean failed: {}", e);
        }
        if let Err(e) = tempdir.close() {
            warn!("Failed to remove temporary export directory: {}", e);
        }
        result
    }

    fn create_from_exports(
        &self,
        targets: &[CondaTarget],
        export_dir: &Path,
        tempdir_name: &str,
        path: Option<&Path>,
        copy: bool,
        quiet: bool,
    ) -> Result<(String, i32)> {
        let mut export_paths = Vec::with_capacity(targets.len());
        for target in targets {
            let name = target.install_environment();
            let export_path = export_dir.join(&name);
            let code = self.export_list(&name, &export_path)?;
            if code != 0 {
                error!("Failed to export package list of {}", name);
                return Ok((path_or_name(path, tempdir_name), code));
            }
            export_paths.push(export_path);
        }

        let mut args = vec![self.offline_flag()?.to_string()];
        match path {
            Some(p) => {
                args.push("--prefix".to_string());
                args.push(p.display().to_string());
            }
            None => {
                args.push("--name".to_string());
                args.push(tempdir_name.to_string());
            }
        }
        if copy {
            args.push("--copy".to_string());
        }
        for export in &export_paths {
            args.push("--file".to_string());
            args.push(export.display().to_string());
        }

        let devnull = Path::new("/dev/null");
        let stdout_path = quiet.then_some(devnull);
        let code = match path {
            Some(p) if p.exists() => self.exec_install(&args, true, stdout_path)?,
            _ => self.exec_create(&args, true, stdout_path)?,
        };
        Ok((path_or_name(path, tempdir_name), code))
    }

    /// The "don't hit the network" flag changed name twice.
    fn offline_flag(&self) -> Result<&'static str> {
        let version = self.conda_version()?;
        Ok(if version < Version::new(4, 4, 0) {
            "--unknown"
        } else if version < Version::new(4, 6, 0) {
            "--offline"
        } else {
            "--use-index-cache"
        })
    }

    /// Downloads Miniforge and installs it into the prefix in batch mode.
    pub fn install_conda(&self) -> Result<()> {
        let url = installer_url().ok_or_else(|| {
            DepsError::InstallError(format!(
                "No conda installer for {}-{}",
                std::env::consts::OS,
                std::env::consts::ARCH
            ))
        })?;
        let download_dir = tempfile::Builder::new().prefix("conda_install").tempdir()?;
        let script = download_dir.path().join(INSTALLER_NAME);
        info!("Downloading conda installer from {}", url);
        self.downloader.download(&url, &script)?;

        let spec = CommandSpec::new("bash").args([
            script.display().to_string(),
            "-b".to_string(),
            "-p".to_string(),
            self.settings.prefix.display().to_string(),
        ]);
        let output = self.runner.run_long(&spec, "Installing conda")?;
        if !output.is_success() {
            return Err(DepsError::InstallError(format!(
                "conda installer exited with {}: {}",
                output.exit_code(),
                output.stderr.trim()
            )));
        }
        Ok(())
    }
}

fn path_or_name(path: Option<&Path>, name: &str) -> String {
    path.map(|p| p.display().to_string())
        .unwrap_or_else(|| name.to_string())
}

fn installer_platform() -> Option<(&'static str, &'static str)> {
    let os = match std::env::consts::OS {
        "linux" => "Linux",
        "macos" => "MacOSX",
        _ => return None,
    };
    let arch = match (std::env::consts::OS, std::env::consts::ARCH) {
        (_, "x86_64") => "x86_64",
        ("linux", "aarch64") => "aarch64",
        ("macos", "aarch64") => "arm64",
        _ => return None,
    };
    Some((os, arch))
}

pub fn installer_url() -> Option<String> {
    installer_platform()
        .map(|(os, arch)| format!("{MINIFORGE_DOWNLOAD_BASE}/Miniforge3-{os}-{arch}.sh"))
}

impl InstallableContext for CondaContext {
    fn is_installed(&self) -> bool {
        self.is_conda_installed()
    }

    /// Only into a missing or empty prefix, and only where an installer exists.
    fn can_install(&self) -> bool {
        if installer_platform().is_none() {
            return false;
        }
        let prefix = &self.settings.prefix;
        if !prefix.exists() {
            return true;
        }
        match std::fs::read_dir(prefix) {
            Ok(mut entries) => entries.next().is_none(),
            Err(_) => false,
        }
    }

    fn installable_description(&self) -> &str {
        "Conda"
    }

    fn parent_path(&self) -> PathBuf {
        self.settings
            .prefix
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }
}
