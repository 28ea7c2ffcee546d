// tooldeps-core/src/deps/installed.rs
//! Tool shed installed dependency records.
use std::path::Path;

use serde::{Deserialize, Serialize};
use tooldeps_common::error::Result;
use tooldeps_common::model::RequirementType;
use tooldeps_io::json_io::read_json_sync;
use tracing::debug;

pub const INSTALLED_STATUS: &str = "Installed";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledToolDependency {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(rename = "type", default)]
    pub dependency_type: RequirementType,
    pub status: String,
    pub owner: String,
    pub repository_name: String,
    pub installed_changeset_revision: String,
}

/// Loads the records written by the installer, a JSON array.
pub fn load_installed_tool_dependencies(path: &Path) -> Result<Vec<InstalledToolDependency>> {
    let records: Vec<InstalledToolDependency> = read_json_sync(path)?;
    debug!(
        "Loaded {} installed tool dependencies from {}",
        records.len(),
        path.display()
    );
    Ok(records)
}

/// Installed record for (name, type), matching `version` when given.
pub fn find_installed<'a>(
    installed: &'a [InstalledToolDependency],
    name: &str,
    dependency_type: RequirementType,
    version: Option<&str>,
) -> Option<&'a InstalledToolDependency> {
    installed.iter().find(|d| {
        d.name == name
            && d.dependency_type == dependency_type
            && d.status == INSTALLED_STATUS
            && version.map_or(true, |v| d.version.as_deref() == Some(v))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, version: Option<&str>, status: &str) -> InstalledToolDependency {
        InstalledToolDependency {
            name: name.into(),
            version: version.map(Into::into),
            dependency_type: RequirementType::Package,
            status: status.into(),
            owner: "devteam".into(),
            repository_name: "package_bwa_0_7_13".into(),
            installed_changeset_revision: "abc123".into(),
        }
    }

    #[test]
    fn only_installed_records_with_matching_version() {
        let installed = vec![
            record("bwa", Some("0.7.13"), "Error"),
            record("bwa", Some("0.7.12"), INSTALLED_STATUS),
            record("bwa", Some("0.7.13"), INSTALLED_STATUS),
        ];
        let found = find_installed(&installed, "bwa", RequirementType::Package, Some("0.7.13")).unwrap();
        assert_eq!(found.status, INSTALLED_STATUS);
        assert_eq!(found.version.as_deref(), Some("0.7.13"));
        let any = find_installed(&installed, "bwa", RequirementType::Package, None).unwrap();
        assert_eq!(any.version.as_deref(), Some("0.7.12"));
        assert!(find_installed(&installed, "bwa", RequirementType::SetEnvironment, None).is_none());
    }

    #[test]
    fn loads_json_records() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("installed.json");
        std::fs::write(
            &path,
            r#"[{"name": "JAVA_JAR_PATH", "type": "set_environment", "status": "Installed",
                "owner": "iuc", "repository_name": "picard", "installed_changeset_revision": "f00"}]"#,
        )
        .unwrap();
        let records = load_installed_tool_dependencies(&path).unwrap();
        assert_eq!(records[0].dependency_type, RequirementType::SetEnvironment);
        assert_eq!(records[0].version, None);
    }
}
