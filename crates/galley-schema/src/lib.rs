//! Lifecycle vocabulary, instance identity, and project file parsing for Galley.
//!
//! This crate defines the schema layer: the ordered `Action` set that drives
//! every instance, the `DestroyMode` used by `test`, deterministic instance
//! naming (`instance_name`), and the `galley.toml` project file with its
//! suite × platform matrix expansion (`ProjectFile::instances`).

pub mod identity;
pub mod project;
pub mod types;

pub use identity::instance_name;
pub use project::{
    parse_project_file, parse_project_str, ConfigError, InstanceConfig, Platform,
    PlatformSection, PluginSection, PluginSpec, ProjectFile, Suite, SuiteSection, PROJECT_FILE,
};
pub use types::{Action, DestroyMode, InstanceName, PluginKind};
