//! Plugin contracts and reference plugins for Galley instances.
//!
//! An instance is assembled from four plugins: a `Driver` that owns the
//! machine, a `Provisioner` that converges it, a `Verifier` that tests it, and
//! a `Transport` that reaches it. Plugins are resolved by name through the
//! `PluginRegistry`, configured through a declarative `ConfigSchema`, and
//! have their dependencies verified once per process.
//!
//! The bundled plugins (`dummy`, `exec`, `shell`) run entirely on the local
//! host.

pub mod config;
pub mod dummy;
pub mod exec;
pub mod plugin;
pub mod prereq;
pub mod registry;
pub mod shell;

pub use config::{ConfigContext, ConfigSchema, PluginConfig, Validator};
pub use plugin::{
    Connection, Driver, LoginCommand, Peers, Plugin, Provisioner, Transport, Verifier,
};
pub use prereq::{check_shell_prereqs, format_missing, MissingPrereq};
pub use registry::PluginRegistry;

use galley_schema::PluginKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PluginError {
    /// The plugin already classified the failure as a failed lifecycle action.
    #[error("{0}")]
    ActionFailed(String),
    /// Caller or configuration mistake: missing config, missing host tooling.
    #[error("{0}")]
    User(String),
    /// Integration mistake in plugin wiring.
    #[error("{0}")]
    Client(String),
    #[error(
        "could not load the '{name}' {kind} plugin, available {kind} plugins: {}",
        .available.join(", ")
    )]
    NotFound {
        kind: PluginKind,
        name: String,
        available: Vec<String>,
    },
    #[error("command '{command}' failed: {status}")]
    CommandFailed { command: String, status: String },
    #[error("plugin I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Other(String),
}

impl PluginError {
    pub fn is_user(&self) -> bool {
        matches!(self, PluginError::User(_))
    }

    pub fn is_client(&self) -> bool {
        matches!(self, PluginError::Client(_) | PluginError::NotFound { .. })
    }
}
