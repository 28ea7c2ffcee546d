// tooldeps-core/src/deps/resolvers/modules.rs
//! Environment Modules (`modulecmd`). Modules are found either by asking
//! `modulecmd sh avail` or by looking for modulefiles under each entry of
//! `MODULEPATH`.
use std::path::{Path, PathBuf};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use tooldeps_common::error::{DepsError, Result};
use tooldeps_common::model::{RequirementType, ToolRequirement};
use tooldeps_io::process::{CommandRunner, CommandSpec};
use tracing::debug;

use crate::deps::dependency::{Dependency, ModuleDependency};
use crate::deps::mapping::RequirementMapper;
use crate::deps::params::ResolverParams;
use crate::deps::resolver::DependencyResolver;
use crate::deps::ResolveOptions;
use crate::services::ResolverServices;

const DEFAULT_MODULECMD: &str = "modulecmd";
const DEFAULT_MODULE_PATH: &str = "/usr/share/modules/modulefiles";
const DEFAULT_INDICATOR: &str = "(default)";

/// (name, version) pairs as listed by an `avail` command.
pub type ModuleListing = Vec<(String, Option<String>)>;

/// `MODULEPATH` from the resolver params, the environment, then
/// `$MODULESHOME/modulefiles`.
fn default_modulepath() -> String {
    if let Ok(path) = std::env::var("MODULEPATH") {
        if !path.is_empty() {
            return path;
        }
    }
    match std::env::var("MODULESHOME") {
        Ok(home) if !home.is_empty() => Path::new(&home).join("modulefiles").display().to_string(),
        _ => DEFAULT_MODULE_PATH.to_string(),
    }
}

/// Parses `modulecmd sh avail` output (written to stderr). Section rules
/// start with `-`; entries are whitespace separated `name[/version]`.
pub fn parse_module_avail(output: &str, default_indicator: &str) -> ModuleListing {
    let mut modules = Vec::new();
    for line in output.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('-') {
            continue;
        }
        for module in line.split_whitespace() {
            let module = module
                .strip_suffix(default_indicator)
                .map(str::trim)
                .unwrap_or(module);
            let mut parts = module.split('/');
            let name = parts.next().unwrap_or_default();
            let version = parts.next();
            let version = match (version, parts.next()) {
                (Some(v), None) => Some(v.to_string()),
                _ => None,
            };
            if !name.is_empty() {
                modules.push((name.to_string(), version));
            }
        }
    }
    modules
}

pub fn listing_has_module(modules: &[(String, Option<String>)], name: &str, version: Option<&str>) -> bool {
    modules
        .iter()
        .any(|(n, v)| n == name && version.map_or(true, |want| v.as_deref() == Some(want)))
}

#[derive(Debug)]
struct AvailModuleChecker {
    modulecmd: String,
    modulepath: String,
    default_indicator: String,
    prefetch: bool,
    runner: Arc<dyn CommandRunner>,
    prefetched: OnceCell<ModuleListing>,
}

impl AvailModuleChecker {
    fn list_modules(&self) -> Result<ModuleListing> {
        let spec = CommandSpec::new(&self.modulecmd)
            .args(["sh", "avail"])
            .env("MODULEPATH", &self.modulepath);
        let output = self.runner.run(&spec)?;
        Ok(parse_module_avail(&output.stderr, &self.default_indicator))
    }

    fn has_module(&self, name: &str, version: Option<&str>) -> Result<bool> {
        if self.prefetch {
            let modules = self.prefetched.get_or_try_init(|| self.list_modules())?;
            return Ok(listing_has_module(modules, name, version));
        }
        Ok(listing_has_module(&self.list_modules()?, name, version))
    }
}

#[derive(Debug)]
struct DirectoryModuleChecker {
    directories: Vec<PathBuf>,
}

impl DirectoryModuleChecker {
    /// A modulefile is `dir/name` (unversioned) or `dir/name/version`.
    fn has_module(&self, name: &str, version: Option<&str>) -> bool {
        self.directories.iter().any(|dir| {
            let module_dir = dir.join(name);
            match version {
                None => module_dir.exists(),
                Some(version) => module_dir.is_dir() && module_dir.join(version).exists(),
            }
        })
    }
}

#[derive(Debug)]
enum ModuleChecker {
    Avail(AvailModuleChecker),
    Directory(DirectoryModuleChecker),
}

impl ModuleChecker {
    fn has_module(&self, name: &str, version: Option<&str>) -> Result<bool> {
        match self {
            Self::Avail(checker) => checker.has_module(name, version),
            Self::Directory(checker) => Ok(checker.has_module(name, version)),
        }
    }
}

#[derive(Debug)]
pub struct ModuleDependencyResolver {
    modulecmd: String,
    modulepath: String,
    versionless: bool,
    checker: ModuleChecker,
    mapper: RequirementMapper,
}

impl ModuleDependencyResolver {
    pub fn new(services: &ResolverServices, params: &ResolverParams) -> Result<Self> {
        let modulecmd = params
            .get_str("modulecmd")
            .unwrap_or_else(|| DEFAULT_MODULECMD.to_string());
        let modulepath = params.get_str("modulepath").unwrap_or_else(default_modulepath);
        let find_by = params.get_str("find_by").unwrap_or_else(|| "avail".to_string());
        let checker = match find_by.as_str() {
            "avail" => ModuleChecker::Avail(AvailModuleChecker {
                modulecmd: modulecmd.clone(),
                modulepath: modulepath.clone(),
                default_indicator: params
                    .get_str("default_indicator")
                    .unwrap_or_else(|| DEFAULT_INDICATOR.to_string()),
                prefetch: params.get_bool("prefetch", true)?,
                runner: services.runner.clone(),
                prefetched: OnceCell::new(),
            }),
            "directory" => ModuleChecker::Directory(DirectoryModuleChecker {
                directories: modulepath
                    .split(':')
                    .filter(|d| !d.is_empty())
                    .map(PathBuf::from)
                    .collect(),
            }),
            other => {
                return Err(DepsError::Config(format!(
                    "Unknown modules find_by '{other}', expected 'avail' or 'directory'"
                )))
            }
        };
        Ok(Self {
            modulecmd,
            modulepath,
            versionless: params.get_bool("versionless", false)?,
            checker,
            mapper: RequirementMapper::from_params(params, services.config.root())?,
        })
    }

    fn dependency(&self, name: &str, version: Option<&str>, exact: bool) -> Dependency {
        Dependency::Module(ModuleDependency {
            dependency_type: "module",
            name: name.to_string(),
            version: version.map(str::to_string),
            exact,
            modulepath: self.modulepath.clone(),
            command: self.modulecmd.clone(),
        })
    }
}

impl DependencyResolver for ModuleDependencyResolver {
    fn resolver_type(&self) -> &'static str {
        "modules"
    }

    fn resolve(&self, requirement: &ToolRequirement, _options: &ResolveOptions) -> Result<Dependency> {
        let requirement = self.mapper.expand(requirement);
        let name = requirement.name.as_str();
        let version = requirement.version.as_deref();
        if requirement.requirement_type != RequirementType::Package {
            return Ok(Dependency::null(name, version));
        }
        if self.checker.has_module(name, version)? {
            return Ok(self.dependency(name, version, true));
        }
        if self.versionless && version.is_some() && self.checker.has_module(name, None)? {
            debug!("Falling back to default module for {}", name);
            return Ok(self.dependency(name, None, false));
        }
        Ok(Dependency::null(name, version))
    }

    fn describe(&self) -> Vec<(String, String)> {
        let find_by = match self.checker {
            ModuleChecker::Avail(_) => "avail",
            ModuleChecker::Directory(_) => "directory",
        };
        vec![
            ("modulecmd".to_string(), self.modulecmd.clone()),
            ("modulepath".to_string(), self.modulepath.clone()),
            ("find_by".to_string(), find_by.to_string()),
            ("versionless".to_string(), self.versionless.to_string()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use tooldeps_common::remote::Offline;
    use tooldeps_io::process::CommandOutput;

    use super::*;
    use crate::test_support::{services, FakeRunner};

    const AVAIL: &str = "\
------------------- /opt/modulefiles -------------------
bwa/0.7.13(default)  bwa/0.7.12
samtools/1.3.1   null
";

    fn avail_resolver(fake: &FakeRunner, params: ResolverParams) -> ModuleDependencyResolver {
        let tmp = tempfile::tempdir().unwrap();
        fake.respond("modulecmd", |_| CommandOutput::success().with_stderr(AVAIL));
        let services = services(tmp.path(), fake, Arc::new(Offline), |_| {});
        ModuleDependencyResolver::new(&services, &params.with("modulepath", "/opt/modulefiles")).unwrap()
    }

    #[test]
    fn parses_avail_output() {
        let modules = parse_module_avail(AVAIL, DEFAULT_INDICATOR);
        assert_eq!(
            modules,
            vec![
                ("bwa".to_string(), Some("0.7.13".to_string())),
                ("bwa".to_string(), Some("0.7.12".to_string())),
                ("samtools".to_string(), Some("1.3.1".to_string())),
                ("null".to_string(), None),
            ]
        );
    }

    #[test]
    fn avail_lookup_is_prefetched_once() {
        let fake = FakeRunner::new("4.6.14");
        let r = avail_resolver(&fake, ResolverParams::new());
        let options = ResolveOptions::default();
        let dep = r.resolve(&ToolRequirement::package("bwa", Some("0.7.13")), &options).unwrap();
        assert_eq!(dep.dependency_type(), "module");
        assert_eq!(
            dep.shell_commands().unwrap().unwrap(),
            "MODULEPATH=/opt/modulefiles; export MODULEPATH; eval `modulecmd sh load bwa/0.7.13`"
        );
        assert!(r.resolve(&ToolRequirement::package("bwa", Some("0.7.9")), &options).unwrap().is_null());

        let calls = fake.calls_for_program("modulecmd");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].envs.get("MODULEPATH").map(String::as_str), Some("/opt/modulefiles"));
    }

    #[test]
    fn versionless_falls_back_to_default_module() {
        let fake = FakeRunner::new("4.6.14");
        let r = avail_resolver(&fake, ResolverParams::new().with("versionless", true));
        let dep = r
            .resolve(&ToolRequirement::package("bwa", Some("0.7.9")), &ResolveOptions::default())
            .unwrap();
        assert!(!dep.exact());
        assert_eq!(dep.version(), None);
        assert!(dep.shell_commands().unwrap().unwrap().ends_with("load bwa`"));
    }

    #[test]
    fn directory_lookup_checks_modulefiles() {
        let tmp = tempfile::tempdir().unwrap();
        let first = tmp.path().join("a");
        let second = tmp.path().join("b");
        std::fs::create_dir_all(second.join("bwa")).unwrap();
        std::fs::write(second.join("bwa/0.7.13"), "#%Module").unwrap();
        std::fs::create_dir_all(&first).unwrap();
        std::fs::write(first.join("blast"), "#%Module").unwrap();

        let fake = FakeRunner::new("4.6.14");
        let services = services(tmp.path(), &fake, Arc::new(Offline), |_| {});
        let params = ResolverParams::new()
            .with("find_by", "directory")
            .with("modulepath", format!("{}:{}", first.display(), second.display()));
        let r = ModuleDependencyResolver::new(&services, &params).unwrap();
        let options = ResolveOptions::default();

        assert!(!r.resolve(&ToolRequirement::package("bwa", Some("0.7.13")), &options).unwrap().is_null());
        assert!(!r.resolve(&ToolRequirement::package("blast", None), &options).unwrap().is_null());
        assert!(r.resolve(&ToolRequirement::package("blast", Some("2.2")), &options).unwrap().is_null());
        assert!(fake.calls_for_program("modulecmd").is_empty());
    }

    #[test]
    fn unknown_find_by_is_a_config_error() {
        let tmp = tempfile::tempdir().unwrap();
        let services = services(tmp.path(), &FakeRunner::new("4.6.14"), Arc::new(Offline), |_| {});
        let err = ModuleDependencyResolver::new(&services, &ResolverParams::new().with("find_by", "guess"))
            .unwrap_err();
        assert!(matches!(err, DepsError::Config(_)));
    }
}
