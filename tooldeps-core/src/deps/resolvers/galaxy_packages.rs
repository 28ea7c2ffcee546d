// tooldeps-core/src/deps/resolvers/galaxy_packages.rs
//! Packages laid out as `base_path/<name>/<version>/` with either an `env.sh`
//! or a `bin/` directory, and a `default` symlink naming the default version.
use std::path::{Path, PathBuf};

use tooldeps_common::error::Result;
use tooldeps_common::model::{RequirementType, ToolRequirement};
use tooldeps_io::fs::{is_symlink, list_directory_entries};
use tracing::debug;

use crate::deps::dependency::{Dependency, PackageDependency};
use crate::deps::mapping::RequirementMapper;
use crate::deps::params::ResolverParams;
use crate::deps::resolver::DependencyResolver;
use crate::deps::ResolveOptions;
use crate::services::ResolverServices;

/// Base directory shared by the filesystem-layout resolvers.
#[derive(Debug, Clone)]
pub struct PackageBasePath {
    pub base_path: PathBuf,
    pub dependency_type: &'static str,
}

impl PackageBasePath {
    pub fn from_params(
        services: &ResolverServices,
        params: &ResolverParams,
        dependency_type: &'static str,
    ) -> Self {
        let base_path = params
            .get_path("base_path")
            .unwrap_or_else(|| services.config.tool_dependency_dir().to_path_buf());
        Self {
            base_path,
            dependency_type,
        }
    }

    /// Dependency rooted at `path`, or Null when it has neither `env.sh` nor
    /// `bin/`.
    pub fn package_dependency(
        &self,
        path: &Path,
        version: Option<&str>,
        name: &str,
        exact: bool,
    ) -> Dependency {
        let script = path.join("env.sh");
        let script = if script.exists() {
            Some(script)
        } else if path.join("bin").exists() {
            None
        } else {
            return Dependency::null(name, version);
        };
        Dependency::Package(PackageDependency {
            dependency_type: self.dependency_type,
            name: name.to_string(),
            version: version.map(str::to_string),
            exact,
            path: path.to_path_buf(),
            script,
        })
    }

    pub fn find_versioned(&self, name: &str, version: &str) -> Dependency {
        let path = self.base_path.join(name).join(version);
        self.package_dependency(&path, Some(version), name, true)
    }

    /// Follows `base_path/<name>/default`; the realized directory name is
    /// reported as the version.
    pub fn find_default(&self, name: &str, exact: bool) -> Dependency {
        let link = self.base_path.join(name).join("default");
        if !is_symlink(&link) {
            return Dependency::null(name, None);
        }
        match std::fs::canonicalize(&link) {
            Ok(real_path) => {
                let real_version = real_path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned());
                self.package_dependency(&real_path, real_version.as_deref(), name, exact)
            }
            Err(e) => {
                debug!("Dangling default link {}: {}", link.display(), e);
                Dependency::null(name, None)
            }
        }
    }
}

fn is_dependency_directory(path: &Path) -> bool {
    path.join("env.sh").exists() || path.join("bin").exists()
}

#[derive(Debug)]
pub struct GalaxyPackageDependencyResolver {
    layout: PackageBasePath,
    versionless: bool,
    mapper: RequirementMapper,
}

impl GalaxyPackageDependencyResolver {
    pub fn new(services: &ResolverServices, params: &ResolverParams) -> Result<Self> {
        Ok(Self {
            layout: PackageBasePath::from_params(services, params, "galaxy_package"),
            versionless: params.get_bool("versionless", false)?,
            mapper: RequirementMapper::from_params(params, services.config.root())?,
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.layout.base_path
    }
}

impl DependencyResolver for GalaxyPackageDependencyResolver {
    fn resolver_type(&self) -> &'static str {
        "galaxy_packages"
    }

    fn resolve(&self, requirement: &ToolRequirement, _options: &ResolveOptions) -> Result<Dependency> {
        let requirement = self.mapper.expand(requirement);
        if !requirement.requirement_type.is_resolvable() {
            return Ok(Dependency::null(&requirement.name, requirement.version.as_deref()));
        }
        match (&requirement.version, self.versionless) {
            (Some(version), false) => Ok(self.layout.find_versioned(&requirement.name, version)),
            (version, _) => {
                let exact = !self.versionless || version.is_none();
                Ok(self.layout.find_default(&requirement.name, exact))
            }
        }
    }

    fn list_dependencies(&self) -> Result<Vec<ToolRequirement>> {
        let base = &self.layout.base_path;
        if !base.is_dir() {
            return Ok(Vec::new());
        }
        let mut found = Vec::new();
        for (package, package_dir, is_dir) in list_directory_entries(base)? {
            if !is_dir || package.starts_with('_') {
                continue;
            }
            for (version, version_dir, _) in list_directory_entries(&package_dir)? {
                if !is_dependency_directory(&version_dir) {
                    continue;
                }
                let version = (version != "default").then_some(version);
                found.push(ToolRequirement::new(
                    package.as_str(),
                    version.as_deref(),
                    RequirementType::Package,
                ));
            }
        }
        Ok(found)
    }

    fn describe(&self) -> Vec<(String, String)> {
        vec![
            ("base_path".to_string(), self.layout.base_path.display().to_string()),
            ("versionless".to_string(), self.versionless.to_string()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tooldeps_common::remote::Offline;

    use super::*;
    use crate::test_support::{services, FakeRunner};

    fn resolver(root: &Path, params: ResolverParams) -> GalaxyPackageDependencyResolver {
        let services = services(root, &FakeRunner::new("4.6.14"), Arc::new(Offline), |_| {});
        GalaxyPackageDependencyResolver::new(&services, &params).unwrap()
    }

    fn layout(root: &Path) -> PathBuf {
        let base = root.join("deps");
        std::fs::create_dir_all(base.join("bwa/0.7.13/bin")).unwrap();
        std::fs::create_dir_all(base.join("samtools/1.3.1")).unwrap();
        std::fs::write(base.join("samtools/1.3.1/env.sh"), "export FOO=1\n").unwrap();
        std::fs::create_dir_all(base.join("samtools/0.1.19")).unwrap();
        #[cfg(unix)]
        std::os::unix::fs::symlink(base.join("samtools/1.3.1"), base.join("samtools/default")).unwrap();
        base
    }

    #[test]
    fn versioned_lookup_prefers_env_sh_then_bin() {
        let tmp = tempfile::tempdir().unwrap();
        let base = layout(tmp.path());
        let r = resolver(tmp.path(), ResolverParams::new());
        let options = ResolveOptions::default();

        let dep = r.resolve(&ToolRequirement::package("samtools", Some("1.3.1")), &options).unwrap();
        match &dep {
            Dependency::Package(p) => {
                assert_eq!(p.script.as_deref(), Some(base.join("samtools/1.3.1/env.sh").as_path()));
                assert!(p.exact);
            }
            other => panic!("unexpected {other:?}"),
        }
        let bwa = r.resolve(&ToolRequirement::package("bwa", Some("0.7.13")), &options).unwrap();
        assert!(bwa.shell_commands().unwrap().unwrap().contains("/bin:$PATH"));

        let empty = r.resolve(&ToolRequirement::package("samtools", Some("0.1.19")), &options).unwrap();
        assert!(empty.is_null());
    }

    #[cfg(unix)]
    #[test]
    fn unversioned_and_versionless_follow_default_link() {
        let tmp = tempfile::tempdir().unwrap();
        layout(tmp.path());
        let options = ResolveOptions::default();

        let r = resolver(tmp.path(), ResolverParams::new());
        let dep = r.resolve(&ToolRequirement::package("samtools", None), &options).unwrap();
        assert_eq!(dep.version(), Some("1.3.1"));
        assert!(dep.exact());

        let versioned = ToolRequirement::package("samtools", Some("1.9"));
        assert!(r.resolve(&versioned, &options).unwrap().is_null());

        let versionless = resolver(tmp.path(), ResolverParams::new().with("versionless", true));
        let dep = versionless.resolve(&versioned, &options).unwrap();
        assert_eq!(dep.version(), Some("1.3.1"));
        assert!(!dep.exact());
    }

    #[test]
    fn lists_installed_packages() {
        let tmp = tempfile::tempdir().unwrap();
        layout(tmp.path());
        let r = resolver(tmp.path(), ResolverParams::new());
        let mut listed: Vec<String> = r
            .list_dependencies()
            .unwrap()
            .iter()
            .map(|req| format!("{}={}", req.name, req.version.as_deref().unwrap_or("default")))
            .collect();
        listed.sort();
        assert!(listed.contains(&"bwa=0.7.13".to_string()));
        assert!(listed.contains(&"samtools=1.3.1".to_string()));
        assert!(!listed.contains(&"samtools=0.1.19".to_string()));
    }
}
