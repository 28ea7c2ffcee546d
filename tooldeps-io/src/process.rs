// tooldeps-io/src/process.rs
use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use tooldeps_common::error::{DepsError, Result};
use tracing::{debug, error};

/// A fully described external command invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub envs: BTreeMap<String, String>,
    pub cwd: Option<PathBuf>,
    /// Redirect stdout into this file instead of capturing it.
    pub stdout_path: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.insert(key.into(), value.into());
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn stdout_to(mut self, path: impl Into<PathBuf>) -> Self {
        self.stdout_path = Some(path.into());
        self
    }

    /// The operation name, i.e. the first argument, if any.
    pub fn operation(&self) -> Option<&str> {
        self.args.first().map(String::as_str)
    }

    pub fn has_arg(&self, arg: &str) -> bool {
        self.args.iter().any(|a| a == arg)
    }

    /// Shell-quoted command line, for logs and dry runs.
    pub fn command_line(&self) -> String {
        let parts = std::iter::once(self.program.as_str()).chain(self.args.iter().map(String::as_str));
        shlex::try_join(parts).unwrap_or_else(|_| {
            let mut joined = self.program.clone();
            for arg in &self.args {
                joined.push(' ');
                joined.push_str(arg);
            }
            joined
        })
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.command_line())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` when the process was terminated by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success() -> Self {
        Self {
            code: Some(0),
            ..Self::default()
        }
    }

    pub fn failure(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn with_stdout(mut self, stdout: impl Into<String>) -> Self {
        self.stdout = stdout.into();
        self
    }

    pub fn with_stderr(mut self, stderr: impl Into<String>) -> Self {
        self.stderr = stderr.into();
        self
    }

    pub fn is_success(&self) -> bool {
        self.code == Some(0)
    }

    /// Exit code as the integer the callers compare against zero.
    pub fn exit_code(&self) -> i32 {
        self.code.unwrap_or(-1)
    }
}

/// Seam through which every external tool is invoked.
pub trait CommandRunner: Send + Sync + fmt::Debug {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput>;

    /// Commands expected to run for minutes (environment builds, image builds).
    fn run_long(&self, spec: &CommandSpec, _message: &str) -> Result<CommandOutput> {
        self.run(spec)
    }
}

/// Runs commands on the host.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemCommandRunner {
    /// Show a spinner on stderr while long commands run.
    pub heartbeat: bool,
}

impl SystemCommandRunner {
    pub fn new(heartbeat: bool) -> Self {
        Self { heartbeat }
    }
}

impl CommandRunner for SystemCommandRunner {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        run_command_sync(spec)
    }

    fn run_long(&self, spec: &CommandSpec, message: &str) -> Result<CommandOutput> {
        if !self.heartbeat {
            return run_command_sync(spec);
        }
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner} {msg} [{elapsed}]")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        spinner.set_message(message.to_string());
        spinner.enable_steady_tick(Duration::from_secs(1));
        let result = run_command_sync(spec);
        spinner.finish_and_clear();
        result
    }
}

pub fn run_command_sync(spec: &CommandSpec) -> Result<CommandOutput> {
    debug!(
        "Running command: {} (cwd: {:?}, envs: {:?})",
        spec,
        spec.cwd,
        spec.envs.keys().collect::<Vec<_>>() // Log only keys for envs
    );
    let mut cmd = std::process::Command::new(&spec.program);
    cmd.args(&spec.args);
    if let Some(dir) = &spec.cwd {
        cmd.current_dir(dir);
    }
    cmd.envs(&spec.envs);
    match &spec.stdout_path {
        Some(path) => {
            let file = File::create(path)?;
            cmd.stdout(Stdio::from(file));
        }
        None => {
            cmd.stdout(Stdio::piped());
        }
    }
    cmd.stderr(Stdio::piped());
    cmd.stdin(Stdio::null()); // Prevent hanging on stdin

    match cmd.output() {
        Ok(output) => {
            let result = CommandOutput {
                code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            };
            if !output.status.success() {
                debug!("Command failed with status: {}", output.status);
                if !result.stdout.trim().is_empty() {
                    debug!("Stdout:\n{}", result.stdout.trim());
                }
                if !result.stderr.trim().is_empty() {
                    debug!("Stderr:\n{}", result.stderr.trim());
                }
            } else {
                debug!("Command finished successfully.");
            }
            Ok(result)
        }
        Err(e) => {
            error!("Failed to execute command {}: {}", spec.program, e);
            Err(DepsError::CommandExec {
                command: spec.command_line(),
                code: None,
                stdout: String::new(),
                stderr: e.to_string(),
            })
        }
    }
}

/// Runs a value-returning query; anything but a zero exit is an error
/// carrying the captured output.
pub fn check_output(runner: &dyn CommandRunner, spec: &CommandSpec) -> Result<String> {
    let output = runner.run(spec)?;
    if output.is_success() {
        Ok(output.stdout)
    } else {
        Err(DepsError::CommandExec {
            command: spec.command_line(),
            code: output.code,
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_line_is_shell_quoted() {
        let spec = CommandSpec::new("conda")
            .arg("create")
            .args(["--name", "__samtools@1.3.1"])
            .arg("with space");
        assert_eq!(spec.operation(), Some("create"));
        assert!(spec.has_arg("--name"));
        let line = spec.command_line();
        assert!(line.starts_with("conda create --name __samtools@1.3.1 "));
        assert_ne!(line, "conda create --name __samtools@1.3.1 with space");
    }

    #[cfg(unix)]
    #[test]
    fn runs_real_commands_and_captures_output() {
        let out = run_command_sync(&CommandSpec::new("sh").args(["-c", "echo hi; exit 3"])).unwrap();
        assert_eq!(out.code, Some(3));
        assert_eq!(out.stdout.trim(), "hi");
        assert!(!out.is_success());
    }

    #[cfg(unix)]
    #[test]
    fn stdout_can_be_redirected_to_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        let out = run_command_sync(&CommandSpec::new("sh").args(["-c", "echo exported"]).stdout_to(&path))
            .unwrap();
        assert!(out.is_success());
        assert_eq!(std::fs::read_to_string(path).unwrap().trim(), "exported");
    }

    #[test]
    fn missing_program_is_an_exec_error() {
        let err = run_command_sync(&CommandSpec::new("/nonexistent/tooldeps-binary")).unwrap_err();
        assert!(matches!(err, DepsError::CommandExec { code: None, .. }));
    }

    #[cfg(unix)]
    #[test]
    fn check_output_surfaces_failures() {
        let runner = SystemCommandRunner::default();
        let ok = check_output(&runner, &CommandSpec::new("sh").args(["-c", "printf ok"])).unwrap();
        assert_eq!(ok, "ok");
        let err = check_output(&runner, &CommandSpec::new("sh").args(["-c", "echo bad >&2; exit 1"]))
            .unwrap_err();
        match err {
            DepsError::CommandExec { code, stderr, .. } => {
                assert_eq!(code, Some(1));
                assert_eq!(stderr.trim(), "bad");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
