use crate::identity::instance_name;
use crate::types::{InstanceName, PluginKind};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use thiserror::Error;

pub const PROJECT_FILE: &str = "galley.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read project file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse project file: {0}")]
    ParseToml(#[from] toml::de::Error),
    #[error("project defines no suites")]
    NoSuites,
    #[error("project defines no platforms")]
    NoPlatforms,
    #[error("{0} name must not be empty")]
    EmptyName(&'static str),
    #[error("instance name '{0}' is produced by more than one suite/platform pair")]
    DuplicateInstance(String),
    #[error("unknown action '{0}' (expected destroy, create, converge, setup, or verify)")]
    UnknownAction(String),
    #[error("unknown destroy strategy '{0}' (expected passing, always, or never)")]
    UnknownDestroyMode(String),
}

/// A `[driver]`/`[provisioner]`/`[verifier]`/`[transport]` table.
///
/// `name` selects the plugin; every other key is handed to it as configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct PluginSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub settings: BTreeMap<String, serde_json::Value>,
}

macro_rules! plugin_sections {
    ($ty:ident) => {
        impl $ty {
            fn section(&self, kind: PluginKind) -> &PluginSection {
                match kind {
                    PluginKind::Driver => &self.driver,
                    PluginKind::Provisioner => &self.provisioner,
                    PluginKind::Verifier => &self.verifier,
                    PluginKind::Transport => &self.transport,
                }
            }
        }
    };
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct PlatformSection {
    pub name: String,
    #[serde(default)]
    pub driver: PluginSection,
    #[serde(default)]
    pub provisioner: PluginSection,
    #[serde(default)]
    pub verifier: PluginSection,
    #[serde(default)]
    pub transport: PluginSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SuiteSection {
    pub name: String,
    /// Only these platforms; empty means all of them.
    #[serde(default)]
    pub includes: Vec<String>,
    #[serde(default)]
    pub excludes: Vec<String>,
    #[serde(default)]
    pub driver: PluginSection,
    #[serde(default)]
    pub provisioner: PluginSection,
    #[serde(default)]
    pub verifier: PluginSection,
    #[serde(default)]
    pub transport: PluginSection,
}

/// Parsed `galley.toml`.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ProjectFile {
    #[serde(default)]
    pub driver: PluginSection,
    #[serde(default)]
    pub provisioner: PluginSection,
    #[serde(default)]
    pub verifier: PluginSection,
    #[serde(default)]
    pub transport: PluginSection,
    #[serde(default)]
    pub platforms: Vec<PlatformSection>,
    #[serde(default)]
    pub suites: Vec<SuiteSection>,
}

plugin_sections!(ProjectFile);
plugin_sections!(PlatformSection);
plugin_sections!(SuiteSection);

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Suite {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Platform {
    pub name: String,
}

/// A plugin selection after merging common, platform and suite sections.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PluginSpec {
    pub kind: PluginKind,
    pub name: String,
    pub config: BTreeMap<String, serde_json::Value>,
}

/// Everything needed to assemble one instance.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct InstanceConfig {
    pub name: InstanceName,
    pub suite: Suite,
    pub platform: Platform,
    pub driver: PluginSpec,
    pub provisioner: PluginSpec,
    pub verifier: PluginSpec,
    pub transport: PluginSpec,
}

impl ProjectFile {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.suites.is_empty() {
            return Err(ConfigError::NoSuites);
        }
        if self.platforms.is_empty() {
            return Err(ConfigError::NoPlatforms);
        }
        if self.suites.iter().any(|s| s.name.trim().is_empty()) {
            return Err(ConfigError::EmptyName("suite"));
        }
        if self.platforms.iter().any(|p| p.name.trim().is_empty()) {
            return Err(ConfigError::EmptyName("platform"));
        }
        Ok(())
    }

    /// Expand the suite × platform matrix, suites outermost.
    pub fn instances(&self) -> Result<Vec<InstanceConfig>, ConfigError> {
        self.validate()?;

        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        for suite in &self.suites {
            for platform in self.platforms.iter().filter(|p| suite.applies_to(&p.name)) {
                let name = instance_name(&suite.name, &platform.name);
                if !seen.insert(name.clone()) {
                    return Err(ConfigError::DuplicateInstance(name.to_string()));
                }
                let merged = |kind| {
                    merge_sections(
                        kind,
                        &[
                            self.section(kind),
                            platform.section(kind),
                            suite.section(kind),
                        ],
                    )
                };
                out.push(InstanceConfig {
                    name,
                    suite: Suite {
                        name: suite.name.clone(),
                    },
                    platform: Platform {
                        name: platform.name.clone(),
                    },
                    driver: merged(PluginKind::Driver),
                    provisioner: merged(PluginKind::Provisioner),
                    verifier: merged(PluginKind::Verifier),
                    transport: merged(PluginKind::Transport),
                });
            }
        }
        Ok(out)
    }
}

impl SuiteSection {
    pub fn applies_to(&self, platform: &str) -> bool {
        (self.includes.is_empty() || self.includes.iter().any(|p| p == platform))
            && !self.excludes.iter().any(|p| p == platform)
    }
}

/// Shallow, key-wise merge where later sections win.
fn merge_sections(kind: PluginKind, layers: &[&PluginSection]) -> PluginSpec {
    let mut name = kind.default_plugin().to_owned();
    let mut config = BTreeMap::new();
    for layer in layers {
        if let Some(n) = &layer.name {
            name.clone_from(n);
        }
        for (k, v) in &layer.settings {
            config.insert(k.clone(), v.clone());
        }
    }
    PluginSpec { kind, name, config }
}

pub fn parse_project_str(input: &str) -> Result<ProjectFile, ConfigError> {
    Ok(toml::from_str(input)?)
}

pub fn parse_project_file(path: impl AsRef<Path>) -> Result<ProjectFile, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_project_str(&content)
}
