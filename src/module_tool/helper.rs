//! Compatibility checks of a module against a target WAR.

use super::details::{parse_properties, ModuleDetails, VersionNumber};
use super::war::WarSource;
use super::ModuleError;
use regex::Regex;
use std::collections::HashMap;

pub const VERSION_PROPERTIES: &str = "WEB-INF/classes/alfresco/version.properties";
pub const MODULE_NAMESPACE_DIR: &str = "WEB-INF/classes/alfresco/module";
pub const MODULE_CONFIG_IN_WAR: &str = "module.properties";

pub const MANIFEST_SPECIFICATION_TITLE: &str = "Specification-Title";
pub const MANIFEST_SPECIFICATION_VERSION: &str = "Specification-Version";
pub const MANIFEST_IMPLEMENTATION_TITLE: &str = "Implementation-Title";
pub const MANIFEST_SHARE: &str = "Alfresco Share";
pub const MANIFEST_COMMUNITY: &str = "Community";

const NUMBER_OR_DOT: &str = r"^[0-9.]*$";

fn is_numeric_version(version: &str) -> Result<bool, ModuleError> {
    let re = Regex::new(NUMBER_OR_DOT).map_err(|e| ModuleError::InvalidVersion(format!("{}: {}", version, e)))?;
    Ok(re.is_match(version))
}

/// Runs the pre-install checks of a module against a WAR.
#[derive(Clone, Debug, Default)]
pub struct WarHelper;

impl WarHelper {
    pub fn new() -> Self {
        WarHelper
    }

    fn version_properties(&self, war: &WarSource) -> Result<Option<HashMap<String, String>>, ModuleError> {
        Ok(war.read_string(VERSION_PROPERTIES)?.map(|t| parse_properties(&t)))
    }

    /// Reject the module when the WAR version lies outside its repository version range.
    pub fn check_compatible_version(&self, war: &WarSource, module: &ModuleDetails) -> Result<(), ModuleError> {
        if let Some(props) = self.version_properties(war)? {
            let part = |key: &str| props.get(key).map(|v| v.trim().to_string()).unwrap_or_default();
            let version: VersionNumber = format!(
                "{}.{}.{}",
                part("version.major"),
                part("version.minor"),
                part("version.revision")
            )
            .parse()?;
            return check_versions(&version, module);
        }

        let manifest = war.manifest()?;
        let version = manifest
            .get(MANIFEST_SPECIFICATION_VERSION)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty());
        let Some(version) = version else {
            tracing::warn!(
                war = %war.path().display(),
                "no version information in WAR, version validation is disabled"
            );
            return Ok(());
        };
        if is_numeric_version(version)? {
            return check_versions(&version.parse()?, module);
        }
        let edition = manifest.get(MANIFEST_IMPLEMENTATION_TITLE).map(String::as_str).unwrap_or("");
        if edition.ends_with(MANIFEST_COMMUNITY) {
            tracing::warn!(version, "community edition WAR with a non-numeric version; not validated");
            Ok(())
        } else {
            Err(ModuleError::InvalidVersion(version.to_string()))
        }
    }

    /// Accept the module only on one of its declared editions. No declared editions accepts all.
    pub fn check_compatible_edition(&self, war: &WarSource, module: &ModuleDetails) -> Result<(), ModuleError> {
        if module.editions.is_empty() {
            return Ok(());
        }
        let incompatible = || {
            ModuleError::Incompatible(format!(
                "the module ({}) can only be installed in one of the following editions: {}",
                module.title,
                module.editions.join(", ")
            ))
        };

        if let Some(props) = self.version_properties(war)? {
            if let Some(edition) = props.get("version.edition").map(|e| e.trim()) {
                return if module.editions.iter().any(|e| e.eq_ignore_ascii_case(edition)) {
                    Ok(())
                } else {
                    Err(incompatible())
                };
            }
        }

        let manifest = war.manifest()?;
        match manifest
            .get(MANIFEST_IMPLEMENTATION_TITLE)
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty())
        {
            Some(title) => {
                if module.editions.iter().any(|e| title.ends_with(&e.to_lowercase())) {
                    Ok(())
                } else {
                    Err(incompatible())
                }
            }
            None => {
                tracing::warn!(
                    war = %war.path().display(),
                    "no edition information in WAR, edition validation is disabled"
                );
                Ok(())
            }
        }
    }

    /// Every declared dependency must be installed in the WAR at a version in its range.
    pub fn check_module_dependencies(&self, war: &WarSource, module: &ModuleDetails) -> Result<(), ModuleError> {
        let mut missing = Vec::new();
        for dependency in &module.dependencies {
            let installed = self.module_details(war, &dependency.dependency_id)?;
            if !dependency.is_valid_dependency(installed.as_ref()) {
                missing.push(dependency.to_string());
            }
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ModuleError::MissingDependencies(missing.join(", ")))
        }
    }

    /// Installed details of the module, looked up by id and then by each of its aliases.
    pub fn module_details_or_alias(&self, war: &WarSource, module: &ModuleDetails) -> Result<Option<ModuleDetails>, ModuleError> {
        if let Some(installed) = self.module_details(war, &module.id)? {
            return Ok(Some(installed));
        }
        for alias in &module.aliases {
            if let Some(installed) = self.module_details(war, alias)? {
                tracing::info!(alias = %alias, module = %module.id, "installed module found under alias");
                return Ok(Some(installed));
            }
        }
        Ok(None)
    }

    pub fn is_share_war(&self, war: &WarSource) -> Result<bool, ModuleError> {
        Ok(war
            .manifest()?
            .get(MANIFEST_SPECIFICATION_TITLE)
            .is_some_and(|t| t == MANIFEST_SHARE))
    }

    pub fn module_details(&self, war: &WarSource, module_id: &str) -> Result<Option<ModuleDetails>, ModuleError> {
        let path = format!("{}/{}/{}", MODULE_NAMESPACE_DIR, module_id, MODULE_CONFIG_IN_WAR);
        match war.read_string(&path)? {
            Some(text) => Ok(Some(ModuleDetails::from_properties(&parse_properties(&text))?)),
            None => Ok(None),
        }
    }
}

/// Details of the module packaged in an AMP (its root `module.properties`).
pub fn amp_module_details(amp: &WarSource) -> Result<ModuleDetails, ModuleError> {
    let text = amp
        .read_string(MODULE_CONFIG_IN_WAR)?
        .ok_or_else(|| ModuleError::InvalidProperties(format!("{} has no {}", amp.path().display(), MODULE_CONFIG_IN_WAR)))?;
    ModuleDetails::from_properties(&parse_properties(&text))
}

fn check_versions(war_version: &VersionNumber, module: &ModuleDetails) -> Result<(), ModuleError> {
    if war_version < &module.repo_version_min {
        return Err(ModuleError::Incompatible(format!(
            "the module ({}) must be installed on a WAR version greater than {}",
            module.title, module.repo_version_min
        )));
    }
    if war_version > &module.repo_version_max {
        return Err(ModuleError::Incompatible(format!(
            "the module ({}) cannot be installed on a WAR version greater than {}",
            module.title, module.repo_version_max
        )));
    }
    Ok(())
}
