// tooldeps-core/src/test_support.rs
//! Fakes for the process and registry seams.
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tempfile::TempDir;
use tooldeps_common::config::Config;
use tooldeps_common::error::Result;
use tooldeps_common::remote::{Offline, TagSource};
use tooldeps_io::process::{CommandOutput, CommandRunner, CommandSpec};

use crate::conda::{CondaContext, CondaSettings};
use crate::services::ResolverServices;

type Handler = Arc<dyn Fn(&CommandSpec) -> CommandOutput + Send + Sync>;

#[derive(Default)]
struct FakeState {
    calls: Vec<CommandSpec>,
    prefix: Option<PathBuf>,
    handlers: HashMap<String, Handler>,
}

/// Records every command. Commands named `conda` behave like a cooperative
/// conda (environments appear on `create`); other programs answer from
/// registered handlers or succeed silently.
#[derive(Clone)]
pub struct FakeRunner {
    version: String,
    fail_strict: bool,
    fail_create: bool,
    info: bool,
    state: Arc<Mutex<FakeState>>,
}

impl fmt::Debug for FakeRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FakeRunner").field("version", &self.version).finish()
    }
}

pub type FakeConda = FakeRunner;

fn program_name(spec: &CommandSpec) -> String {
    Path::new(&spec.program)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| spec.program.clone())
}

fn conda_operation(spec: &CommandSpec) -> Option<&str> {
    spec.args
        .iter()
        .map(String::as_str)
        .find(|a| *a != "--debug")
}

fn arg_after<'a>(spec: &'a CommandSpec, flag: &str) -> Option<&'a str> {
    spec.args
        .iter()
        .position(|a| a == flag)
        .and_then(|i| spec.args.get(i + 1))
        .map(String::as_str)
}

impl FakeRunner {
    pub fn new(conda_version: &str) -> Self {
        Self {
            version: conda_version.to_string(),
            fail_strict: false,
            fail_create: false,
            info: true,
            state: Arc::new(Mutex::new(FakeState::default())),
        }
    }

    pub fn failing_strict(mut self) -> Self {
        self.fail_strict = true;
        self
    }

    pub fn failing_create(mut self) -> Self {
        self.fail_create = true;
        self
    }

    pub fn without_info(mut self) -> Self {
        self.info = false;
        self
    }

    pub fn set_prefix(&self, prefix: &Path) {
        self.state.lock().unwrap().prefix = Some(prefix.to_path_buf());
    }

    pub fn respond<F>(&self, program: &str, handler: F)
    where
        F: Fn(&CommandSpec) -> CommandOutput + Send + Sync + 'static,
    {
        self.state
            .lock()
            .unwrap()
            .handlers
            .insert(program.to_string(), Arc::new(handler));
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Conda invocations whose operation is `operation`.
    pub fn calls_for(&self, operation: &str) -> Vec<CommandSpec> {
        self.calls()
            .into_iter()
            .filter(|c| program_name(c) == "conda" && conda_operation(c) == Some(operation))
            .collect()
    }

    pub fn calls_for_program(&self, program: &str) -> Vec<CommandSpec> {
        self.calls()
            .into_iter()
            .filter(|c| program_name(c) == program)
            .collect()
    }

    fn run_conda(&self, spec: &CommandSpec) -> CommandOutput {
        match conda_operation(spec) {
            Some("info") if self.info => CommandOutput::success().with_stdout(format!(
                r#"{{"conda_version": "{}", "conda_build_version": "not installed"}}"#,
                self.version
            )),
            Some("info") => CommandOutput::failure(127, "conda: command not found"),
            Some("create") => {
                if self.fail_create || (self.fail_strict && spec.has_arg("--strict-channel-priority")) {
                    return CommandOutput::failure(1, "UnsatisfiableError");
                }
                let created = if let Some(name) = arg_after(spec, "--name") {
                    self.state
                        .lock()
                        .unwrap()
                        .prefix
                        .as_ref()
                        .map(|p| p.join("envs").join(name))
                } else {
                    arg_after(spec, "--prefix").map(PathBuf::from)
                };
                if let Some(dir) = created {
                    std::fs::create_dir_all(dir.join("bin")).unwrap();
                }
                CommandOutput::success()
            }
            Some("list") => {
                if let Some(path) = &spec.stdout_path {
                    std::fs::write(path, "# This file may be used to create an environment\n")
                        .unwrap();
                }
                CommandOutput::success()
            }
            Some("search") => CommandOutput::success().with_stdout("{}"),
            _ => CommandOutput::success(),
        }
    }
}

impl CommandRunner for FakeRunner {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        let program = program_name(spec);
        let handler = {
            let mut state = self.state.lock().unwrap();
            state.calls.push(spec.clone());
            state.handlers.get(&program).cloned()
        };
        if let Some(handler) = handler {
            return Ok(handler(spec));
        }
        if program == "conda" {
            return Ok(self.run_conda(spec));
        }
        Ok(CommandOutput::success())
    }
}

/// Prefix with a `bin/conda` so the installation counts as present.
pub fn install_fake_conda(prefix: &Path) {
    std::fs::create_dir_all(prefix.join("bin")).unwrap();
    std::fs::create_dir_all(prefix.join("envs")).unwrap();
    std::fs::write(prefix.join("bin").join("conda"), "").unwrap();
}

pub fn conda_context(fake: &FakeRunner) -> (TempDir, CondaContext) {
    let tmp = tempfile::tempdir().unwrap();
    let prefix = tmp.path().join("deps").join("_conda");
    install_fake_conda(&prefix);
    fake.set_prefix(&prefix);
    let settings = CondaSettings {
        prefix,
        exec: None,
        debug: false,
        ensure_channels: vec!["conda-forge".to_string(), "bioconda".to_string()],
        use_local: false,
        copy_dependencies: false,
        condarc_override: None,
    };
    let ctx = CondaContext::new(settings, Arc::new(fake.clone()), Arc::new(Offline));
    (tmp, ctx)
}

/// Registry answering from a fixed table and counting lookups.
#[derive(Debug, Default)]
pub struct FakeTags {
    tags: HashMap<String, Vec<String>>,
    lookups: Mutex<usize>,
}

impl FakeTags {
    pub fn with(mut self, namespace: &str, image: &str, tags: &[&str]) -> Self {
        self.tags.insert(
            format!("{namespace}/{image}"),
            tags.iter().map(|t| t.to_string()).collect(),
        );
        self
    }

    pub fn lookups(&self) -> usize {
        *self.lookups.lock().unwrap()
    }
}

impl TagSource for FakeTags {
    fn tags(&self, namespace: &str, image: &str) -> Result<Vec<String>> {
        *self.lookups.lock().unwrap() += 1;
        Ok(self
            .tags
            .get(&format!("{namespace}/{image}"))
            .cloned()
            .unwrap_or_default())
    }
}

/// Services rooted in a temp dir, with the given fakes plugged in.
pub fn services(
    root: &Path,
    runner: &FakeRunner,
    tags: Arc<dyn TagSource>,
    configure: impl FnOnce(&mut Config),
) -> ResolverServices {
    let mut config = Config::for_root(root);
    configure(&mut config);
    runner.set_prefix(&config.conda_prefix());
    ResolverServices::new(config, Arc::new(runner.clone()), Arc::new(Offline), tags)
}
