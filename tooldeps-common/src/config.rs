// tooldeps-common/src/config.rs
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::UserDirs;
use serde::Deserialize;
use tracing::debug;

use super::error::{DepsError, Result};

// Fallback root when TOOLDEPS_ROOT is not set and no home directory can be found.
const DEFAULT_FALLBACK_ROOT: &str = "/tmp/tooldeps";
const ROOT_DIR_NAME: &str = ".tooldeps";
const CONFIG_FILE_NAME: &str = "tooldeps.yml";

pub const DEFAULT_ENSURE_CHANNELS: &str = "conda-forge,bioconda";
pub const DEFAULT_QUAY_API_URL: &str = "https://quay.io/api/v1";
const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(300);
const DEFAULT_REGISTRY_CACHE_TTL: Duration = Duration::from_secs(60 * 60);

/// Settings shared by every Conda-backed resolver unless overridden per resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CondaConfig {
    pub prefix: Option<PathBuf>,
    pub exec: Option<PathBuf>,
    pub debug: bool,
    pub ensure_channels: String,
    pub auto_install: bool,
    pub auto_init: bool,
    pub copy_dependencies: bool,
    pub use_local: bool,
    pub condarc_override: Option<PathBuf>,
    pub activate_max_tries: u32,
    pub activate_retry_sleep: Duration,
}

impl Default for CondaConfig {
    fn default() -> Self {
        Self {
            prefix: None,
            exec: None,
            debug: false,
            ensure_channels: DEFAULT_ENSURE_CHANNELS.to_string(),
            auto_install: false,
            auto_init: true,
            copy_dependencies: false,
            use_local: false,
            condarc_override: None,
            activate_max_tries: 3,
            activate_retry_sleep: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub root: PathBuf,
    pub tool_dependency_dir: PathBuf,
    pub dependency_resolvers_config_file: Option<PathBuf>,
    pub container_resolvers_config_file: Option<PathBuf>,
    pub installed_tool_dependencies_file: Option<PathBuf>,
    pub conda: CondaConfig,
    pub enable_mulled_containers: bool,
    pub mulled_channels: Vec<String>,
    pub involucro_path: PathBuf,
    /// Lua build script handed to involucro with `-f`.
    pub involucro_invfile: PathBuf,
    pub involucro_auto_init: bool,
    pub container_image_cache_path: PathBuf,
    pub quay_api_url: String,
    pub lock_timeout: Duration,
    pub registry_cache_ttl: Duration,
}

/// On-disk overlay, every key optional. Durations use humantime syntax ("5m", "30s").
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    tool_dependency_dir: Option<PathBuf>,
    dependency_resolvers_config_file: Option<PathBuf>,
    container_resolvers_config_file: Option<PathBuf>,
    installed_tool_dependencies_file: Option<PathBuf>,
    conda_prefix: Option<PathBuf>,
    conda_exec: Option<PathBuf>,
    conda_debug: Option<bool>,
    conda_ensure_channels: Option<String>,
    conda_auto_install: Option<bool>,
    conda_auto_init: Option<bool>,
    conda_copy_dependencies: Option<bool>,
    conda_use_local: Option<bool>,
    condarc_override: Option<PathBuf>,
    conda_activate_max_tries: Option<u32>,
    conda_activate_retry_sleep: Option<String>,
    enable_mulled_containers: Option<bool>,
    mulled_channels: Option<Vec<String>>,
    involucro_path: Option<PathBuf>,
    involucro_invfile: Option<PathBuf>,
    involucro_auto_init: Option<bool>,
    container_image_cache_path: Option<PathBuf>,
    quay_api_url: Option<String>,
    lock_timeout: Option<String>,
    registry_cache_ttl: Option<String>,
}

impl Config {
    pub fn load() -> Result<Self> {
        debug!("Loading tooldeps configuration");

        let root = env::var("TOOLDEPS_ROOT")
            .ok()
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                let fallback = UserDirs::new()
                    .map(|ud| ud.home_dir().join(ROOT_DIR_NAME))
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_FALLBACK_ROOT));
                debug!(
                    "TOOLDEPS_ROOT not set or empty, falling back to: {}",
                    fallback.display()
                );
                fallback
            });
        debug!("Effective root set to: {}", root.display());

        let mut config = Self::for_root(root);

        let config_file = env::var("TOOLDEPS_CONFIG")
            .ok()
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .or_else(|| {
                let candidate = config.root.join(CONFIG_FILE_NAME);
                candidate.is_file().then_some(candidate)
            });
        if let Some(path) = config_file {
            config.apply_file(&path)?;
        }

        config.apply_env()?;
        debug!("Configuration loaded successfully.");
        Ok(config)
    }

    /// Defaults rooted at `root`, no environment or file lookups.
    pub fn for_root(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            tool_dependency_dir: root.join("deps"),
            dependency_resolvers_config_file: None,
            container_resolvers_config_file: None,
            installed_tool_dependencies_file: None,
            conda: CondaConfig::default(),
            enable_mulled_containers: true,
            mulled_channels: vec!["conda-forge".to_string(), "bioconda".to_string()],
            involucro_path: root.join("involucro"),
            involucro_invfile: root.join("invfile.lua"),
            involucro_auto_init: true,
            container_image_cache_path: root.join("container_cache"),
            quay_api_url: DEFAULT_QUAY_API_URL.to_string(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            registry_cache_ttl: DEFAULT_REGISTRY_CACHE_TTL,
            root,
        }
    }

    fn apply_file(&mut self, path: &Path) -> Result<()> {
        debug!("Reading configuration file {}", path.display());
        let raw = std::fs::read_to_string(path).map_err(|e| {
            DepsError::Config(format!("Failed to read config file {}: {e}", path.display()))
        })?;
        let file: ConfigFile = serde_yaml::from_str(&raw)?;

        if let Some(v) = file.tool_dependency_dir {
            self.tool_dependency_dir = v;
        }
        if file.dependency_resolvers_config_file.is_some() {
            self.dependency_resolvers_config_file = file.dependency_resolvers_config_file;
        }
        if file.container_resolvers_config_file.is_some() {
            self.container_resolvers_config_file = file.container_resolvers_config_file;
        }
        if file.installed_tool_dependencies_file.is_some() {
            self.installed_tool_dependencies_file = file.installed_tool_dependencies_file;
        }
        if file.conda_prefix.is_some() {
            self.conda.prefix = file.conda_prefix;
        }
        if file.conda_exec.is_some() {
            self.conda.exec = file.conda_exec;
        }
        if let Some(v) = file.conda_debug {
            self.conda.debug = v;
        }
        if let Some(v) = file.conda_ensure_channels {
            self.conda.ensure_channels = v;
        }
        if let Some(v) = file.conda_auto_install {
            self.conda.auto_install = v;
        }
        if let Some(v) = file.conda_auto_init {
            self.conda.auto_init = v;
        }
        if let Some(v) = file.conda_copy_dependencies {
            self.conda.copy_dependencies = v;
        }
        if let Some(v) = file.conda_use_local {
            self.conda.use_local = v;
        }
        if file.condarc_override.is_some() {
            self.conda.condarc_override = file.condarc_override;
        }
        if let Some(v) = file.conda_activate_max_tries {
            self.conda.activate_max_tries = v;
        }
        if let Some(v) = file.conda_activate_retry_sleep {
            self.conda.activate_retry_sleep = parse_duration("conda_activate_retry_sleep", &v)?;
        }
        if let Some(v) = file.enable_mulled_containers {
            self.enable_mulled_containers = v;
        }
        if let Some(v) = file.mulled_channels {
            self.mulled_channels = v;
        }
        if let Some(v) = file.involucro_path {
            self.involucro_path = v;
        }
        if let Some(v) = file.involucro_invfile {
            self.involucro_invfile = v;
        }
        if let Some(v) = file.involucro_auto_init {
            self.involucro_auto_init = v;
        }
        if let Some(v) = file.container_image_cache_path {
            self.container_image_cache_path = v;
        }
        if let Some(v) = file.quay_api_url {
            self.quay_api_url = v;
        }
        if let Some(v) = file.lock_timeout {
            self.lock_timeout = parse_duration("lock_timeout", &v)?;
        }
        if let Some(v) = file.registry_cache_ttl {
            self.registry_cache_ttl = parse_duration("registry_cache_ttl", &v)?;
        }
        Ok(())
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(v) = env_path("TOOLDEPS_TOOL_DEPENDENCY_DIR") {
            self.tool_dependency_dir = v;
        }
        if let Some(v) = env_path("TOOLDEPS_DEPENDENCY_RESOLVERS_CONF") {
            self.dependency_resolvers_config_file = Some(v);
        }
        if let Some(v) = env_path("TOOLDEPS_CONTAINER_RESOLVERS_CONF") {
            self.container_resolvers_config_file = Some(v);
        }
        if let Some(v) = env_path("TOOLDEPS_INSTALLED_TOOL_DEPENDENCIES") {
            self.installed_tool_dependencies_file = Some(v);
        }
        if let Some(v) = env_path("TOOLDEPS_CONDA_PREFIX") {
            self.conda.prefix = Some(v);
        }
        if let Some(v) = env_path("TOOLDEPS_CONDA_EXEC") {
            self.conda.exec = Some(v);
        }
        if let Some(v) = env_string("TOOLDEPS_CONDA_ENSURE_CHANNELS") {
            self.conda.ensure_channels = v;
        }
        if let Some(v) = env_bool("TOOLDEPS_CONDA_AUTO_INSTALL") {
            self.conda.auto_install = v;
        }
        if let Some(v) = env_bool("TOOLDEPS_CONDA_AUTO_INIT") {
            self.conda.auto_init = v;
        }
        if let Some(v) = env_bool("TOOLDEPS_ENABLE_MULLED_CONTAINERS") {
            self.enable_mulled_containers = v;
        }
        if let Some(v) = env_path("TOOLDEPS_INVOLUCRO_PATH") {
            self.involucro_path = v;
        }
        if let Some(v) = env_path("TOOLDEPS_INVOLUCRO_INVFILE") {
            self.involucro_invfile = v;
        }
        if let Some(v) = env_string("TOOLDEPS_QUAY_API_URL") {
            self.quay_api_url = v;
        }
        if let Some(v) = env_string("TOOLDEPS_LOCK_TIMEOUT") {
            self.lock_timeout = parse_duration("TOOLDEPS_LOCK_TIMEOUT", &v)?;
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Base directory for filesystem package layouts and tool shed installs.
    pub fn tool_dependency_dir(&self) -> &Path {
        &self.tool_dependency_dir
    }

    /// Conda prefix used when neither the config nor a resolver names one.
    pub fn conda_prefix(&self) -> PathBuf {
        self.conda
            .prefix
            .clone()
            .unwrap_or_else(|| self.tool_dependency_dir.join("_conda"))
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.root.join("cache")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn singularity_cache_dir(&self) -> PathBuf {
        self.container_image_cache_path.join("singularity").join("mulled")
    }
}

fn env_string(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

fn env_path(key: &str) -> Option<PathBuf> {
    env_string(key).map(PathBuf::from)
}

fn env_bool(key: &str) -> Option<bool> {
    env_string(key).and_then(|v| parse_bool(&v))
}

/// Accepts the loose boolean spellings found in resolver configuration files.
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_duration(key: &str, value: &str) -> Result<Duration> {
    humantime::parse_duration(value)
        .map_err(|e| DepsError::Config(format!("Invalid duration for {key} ('{value}'): {e}")))
}

pub fn load_config() -> Result<Config> {
    Config::load()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_hang_off_root() {
        let config = Config::for_root("/srv/deps-root");
        assert_eq!(config.tool_dependency_dir, PathBuf::from("/srv/deps-root/deps"));
        assert_eq!(config.conda_prefix(), PathBuf::from("/srv/deps-root/deps/_conda"));
        assert_eq!(
            config.singularity_cache_dir(),
            PathBuf::from("/srv/deps-root/container_cache/singularity/mulled")
        );
        assert_eq!(config.conda.ensure_channels, DEFAULT_ENSURE_CHANNELS);
        assert!(!config.conda.auto_install);
    }

    #[test]
    fn file_overlay_replaces_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tooldeps.yml");
        std::fs::write(
            &path,
            "conda_auto_install: true\nconda_prefix: /opt/conda\nlock_timeout: 2m\nmulled_channels: [bioconda]\n",
        )
        .unwrap();

        let mut config = Config::for_root(dir.path());
        config.apply_file(&path).unwrap();
        assert!(config.conda.auto_install);
        assert_eq!(config.conda_prefix(), PathBuf::from("/opt/conda"));
        assert_eq!(config.lock_timeout, Duration::from_secs(120));
        assert_eq!(config.mulled_channels, vec!["bioconda".to_string()]);
    }

    #[test]
    fn bad_duration_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tooldeps.yml");
        std::fs::write(&path, "lock_timeout: soon\n").unwrap();
        let mut config = Config::for_root(dir.path());
        assert!(matches!(config.apply_file(&path), Err(DepsError::Config(_))));
    }

    #[test]
    fn loose_booleans() {
        assert_eq!(parse_bool("True"), Some(true));
        assert_eq!(parse_bool("no"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }
}
