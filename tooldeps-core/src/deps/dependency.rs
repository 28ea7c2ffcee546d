// tooldeps-core/src/deps/dependency.rs
//! Resolved dependencies and the shell text that activates them.
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::OnceCell;
use serde::Serialize;
use tooldeps_common::error::{DepsError, Result};
use tooldeps_common::model::ContainerDescription;
use tracing::debug;

use crate::conda::{CondaContext, CondaTarget};

/// Paths longer than this break relocation of older conda packages.
const CONDA_PATH_LIMIT: usize = 79;

fn quote(value: &str) -> String {
    shlex::try_quote(value)
        .map(|q| q.into_owned())
        .unwrap_or_else(|_| format!("'{value}'"))
}

fn display(path: &Path) -> String {
    path.display().to_string()
}

/// A package laid out on disk: `env.sh` to source, or a `bin/` to put on
/// `PATH`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageDependency {
    pub dependency_type: &'static str,
    pub name: String,
    pub version: Option<String>,
    pub exact: bool,
    pub path: PathBuf,
    pub script: Option<PathBuf>,
}

impl PackageDependency {
    pub fn shell_commands(&self) -> String {
        let base = quote(&display(&self.path));
        match &self.script {
            Some(script) => format!(
                "PACKAGE_BASE={base}; export PACKAGE_BASE; . {}",
                quote(&display(script))
            ),
            None => format!(
                "PACKAGE_BASE={base}; export PACKAGE_BASE; PATH=\"{base}/bin:$PATH\"; export PATH"
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivationRetry {
    pub max_tries: u32,
    pub sleep: Duration,
}

impl Default for ActivationRetry {
    fn default() -> Self {
        Self {
            max_tries: 3,
            sleep: Duration::from_secs(10),
        }
    }
}

/// A conda environment. With `build_targets` set, the environment at
/// `environment_path` does not exist yet and is built from the installed
/// single-target environments on the first `shell_commands` call.
pub struct CondaDependency {
    pub name: String,
    pub version: Option<String>,
    pub exact: bool,
    pub environment_path: PathBuf,
    pub preserve_python_environment: bool,
    pub merged: bool,
    retry: ActivationRetry,
    context: Arc<CondaContext>,
    build_targets: Option<Vec<CondaTarget>>,
    built: OnceCell<()>,
}

impl fmt::Debug for CondaDependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CondaDependency")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("exact", &self.exact)
            .field("environment_path", &self.environment_path)
            .field("merged", &self.merged)
            .finish()
    }
}

impl CondaDependency {
    pub fn new(
        context: Arc<CondaContext>,
        environment_path: PathBuf,
        name: &str,
        version: Option<&str>,
        exact: bool,
    ) -> Self {
        Self {
            name: name.to_string(),
            version: version.map(str::to_string),
            exact,
            environment_path,
            preserve_python_environment: false,
            merged: false,
            retry: ActivationRetry::default(),
            context,
            build_targets: None,
            built: OnceCell::new(),
        }
    }

    pub fn with_retry(mut self, retry: ActivationRetry) -> Self {
        self.retry = retry;
        self
    }

    pub fn preserving_python_environment(mut self, preserve: bool) -> Self {
        self.preserve_python_environment = preserve;
        self
    }

    /// Marks the environment as one merged environment shared by several
    /// requirements.
    pub fn merged(mut self) -> Self {
        self.merged = true;
        self
    }

    pub fn built_on_demand(mut self, targets: Vec<CondaTarget>) -> Self {
        self.build_targets = Some(targets);
        self
    }

    fn build_environment(&self, targets: &[CondaTarget]) -> Result<()> {
        debug!(
            "Building job environment {} for {}",
            self.environment_path.display(),
            self.name
        );
        let (_, code) = self.context.build_isolated_environment(
            targets,
            Some(&self.environment_path),
            self.context.copy_dependencies(),
            false,
        )?;
        if code == 0 {
            return Ok(());
        }
        let absolute = std::path::absolute(&self.environment_path)
            .unwrap_or_else(|_| self.environment_path.clone());
        if display(&absolute).len() > CONDA_PATH_LIMIT {
            return Err(DepsError::DependencyError(
                "Conda dependency failed to build job environment. This is most likely a \
                 limitation in conda. You can try to shorten the path to the job working directory."
                    .to_string(),
            ));
        }
        Err(DepsError::DependencyError(
            "Conda dependency seemingly installed but failed to build job environment.".to_string(),
        ))
    }

    pub fn shell_commands(&self) -> Result<String> {
        if let Some(targets) = &self.build_targets {
            self.built.get_or_try_init(|| self.build_environment(targets))?;
        }
        let env = display(&self.environment_path);
        if self.preserve_python_environment {
            return Ok(format!("export PATH=$PATH:'{env}/bin' "));
        }
        let activate = display(&self.context.activate());
        Ok(format!(
            r#"[ "$(basename "$CONDA_DEFAULT_ENV")" = "$(basename '{env}')" ] || {{
MAX_TRIES={max_tries}
COUNT=0
while [ $COUNT -lt $MAX_TRIES ]; do
    . '{activate}' '{env}' > conda_activate.log 2>&1
    if [ $? -eq 0 ];then
        break
    else
        COUNT=$((COUNT+1))
        if [ $COUNT -eq $MAX_TRIES ];then
            echo "Failed to activate conda environment! Error was:" >&2
            cat conda_activate.log >&2
            exit 1
        fi
        sleep {sleep}s
    fi
done
}} "#,
            max_tries = self.retry.max_tries,
            sleep = self.retry.sleep.as_secs(),
        ))
    }
}

/// A module from an environment-modules or Lmod installation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleDependency {
    pub dependency_type: &'static str,
    pub name: String,
    pub version: Option<String>,
    pub exact: bool,
    pub modulepath: String,
    /// `modulecmd` or the lmod executable.
    pub command: String,
}

impl ModuleDependency {
    pub fn module_to_load(&self) -> String {
        match &self.version {
            Some(version) => format!("{}/{}", self.name, version),
            None => self.name.clone(),
        }
    }

    pub fn shell_commands(&self) -> String {
        format!(
            "MODULEPATH={}; export MODULEPATH; eval `{} sh load {}`",
            quote(&self.modulepath),
            self.command,
            self.module_to_load()
        )
    }
}

/// Requirements satisfied by running inside a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerDependency {
    pub name: String,
    pub version: Option<String>,
    pub exact: bool,
    pub description: ContainerDescription,
    pub resolver_type: &'static str,
}

#[derive(Debug)]
pub enum Dependency {
    /// Could not be resolved. Not an error.
    Null {
        name: String,
        version: Option<String>,
    },
    Package(PackageDependency),
    Conda(CondaDependency),
    Module(ModuleDependency),
    Container(ContainerDependency),
}

impl Dependency {
    pub fn null(name: &str, version: Option<&str>) -> Self {
        Self::Null {
            name: name.to_string(),
            version: version.map(str::to_string),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null { .. })
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Null { name, .. } => name,
            Self::Package(d) => &d.name,
            Self::Conda(d) => &d.name,
            Self::Module(d) => &d.name,
            Self::Container(d) => &d.name,
        }
    }

    pub fn version(&self) -> Option<&str> {
        match self {
            Self::Null { version, .. } => version.as_deref(),
            Self::Package(d) => d.version.as_deref(),
            Self::Conda(d) => d.version.as_deref(),
            Self::Module(d) => d.version.as_deref(),
            Self::Container(d) => d.version.as_deref(),
        }
    }

    /// True when no version information was discarded to find this.
    pub fn exact(&self) -> bool {
        match self {
            Self::Null { .. } => true,
            Self::Package(d) => d.exact,
            Self::Conda(d) => d.exact,
            Self::Module(d) => d.exact,
            Self::Container(d) => d.exact,
        }
    }

    pub fn dependency_type(&self) -> &'static str {
        match self {
            Self::Null { .. } => "null",
            Self::Package(d) => d.dependency_type,
            Self::Conda(d) if d.merged => "merged_conda",
            Self::Conda(_) => "conda",
            Self::Module(d) => d.dependency_type,
            Self::Container(_) => "container",
        }
    }

    /// Shell text to run before the job command; `None` for unresolved and
    /// container dependencies.
    pub fn shell_commands(&self) -> Result<Option<String>> {
        match self {
            Self::Null { .. } | Self::Container(_) => Ok(None),
            Self::Package(d) => Ok(Some(d.shell_commands())),
            Self::Conda(d) => d.shell_commands().map(Some),
            Self::Module(d) => Ok(Some(d.shell_commands())),
        }
    }

    /// One-line description for logs and listings.
    pub fn resolver_msg(&self) -> String {
        match self {
            Self::Null { name, version } => match version {
                Some(v) => format!("Dependency {name} version {v} not found."),
                None => format!("Dependency {name} not found."),
            },
            other => {
                let exact = if other.exact() { "exactly" } else { "approximately" };
                match other.version() {
                    Some(v) => format!(
                        "Using {} dependency {} version {} ({})",
                        other.dependency_type(),
                        other.name(),
                        v,
                        exact
                    ),
                    None => format!(
                        "Using {} dependency {} ({})",
                        other.dependency_type(),
                        other.name(),
                        exact
                    ),
                }
            }
        }
    }
}
