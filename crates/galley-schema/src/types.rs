//! Lifecycle vocabulary shared by every Galley crate.
//!
//! `InstanceName` serializes as a plain string; `Action`, `DestroyMode` and
//! `PluginKind` serialize lower-case.

use crate::project::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;
use std::str::FromStr;

macro_rules! string_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new instance from a string.
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            /// Return the inner string as a slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.0 == other
            }
        }

        impl PartialEq<&str> for $name {
            fn eq(&self, other: &&str) -> bool {
                self.0 == *other
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

string_newtype!(
    /// Deterministic `<suite>-<platform>` identifier of one test instance.
    InstanceName
);

/// One step of the instance lifecycle.
///
/// The declaration order is the lifecycle precedence: `Destroy` doubles as the
/// "nothing provisioned" state and `Verify` is the furthest an instance can get.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Destroy,
    Create,
    Converge,
    Setup,
    Verify,
}

impl Action {
    pub const ALL: [Action; 5] = [
        Action::Destroy,
        Action::Create,
        Action::Converge,
        Action::Setup,
        Action::Verify,
    ];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Action::Destroy => "destroy",
            Action::Create => "create",
            Action::Converge => "converge",
            Action::Setup => "setup",
            Action::Verify => "verify",
        }
    }

    /// Present participle used in progress lines ("Converging default-ubuntu").
    pub fn progressive(self) -> &'static str {
        match self {
            Action::Destroy => "Destroying",
            Action::Create => "Creating",
            Action::Converge => "Converging",
            Action::Setup => "Setting up",
            Action::Verify => "Verifying",
        }
    }

    /// Capitalized verb used in failure messages ("Converge failed on ...").
    pub fn title(self) -> &'static str {
        match self {
            Action::Destroy => "Destroy",
            Action::Create => "Create",
            Action::Converge => "Converge",
            Action::Setup => "Setup",
            Action::Verify => "Verify",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Action::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| ConfigError::UnknownAction(s.to_owned()))
    }
}

/// When `test` tears an instance down after verifying it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DestroyMode {
    /// Destroy only when verify succeeded, keeping failed instances around for inspection.
    #[default]
    Passing,
    Always,
    Never,
}

impl fmt::Display for DestroyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DestroyMode::Passing => write!(f, "passing"),
            DestroyMode::Always => write!(f, "always"),
            DestroyMode::Never => write!(f, "never"),
        }
    }
}

impl FromStr for DestroyMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "passing" => Ok(DestroyMode::Passing),
            "always" => Ok(DestroyMode::Always),
            "never" => Ok(DestroyMode::Never),
            other => Err(ConfigError::UnknownDestroyMode(other.to_owned())),
        }
    }
}

/// The four plugin categories an instance is assembled from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginKind {
    Driver,
    Provisioner,
    Verifier,
    Transport,
}

impl PluginKind {
    pub const ALL: [PluginKind; 4] = [
        PluginKind::Driver,
        PluginKind::Provisioner,
        PluginKind::Verifier,
        PluginKind::Transport,
    ];

    /// Plugin used when a project does not name one.
    pub fn default_plugin(self) -> &'static str {
        match self {
            PluginKind::Transport => "exec",
            PluginKind::Driver | PluginKind::Provisioner | PluginKind::Verifier => "dummy",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            PluginKind::Driver => "Driver",
            PluginKind::Provisioner => "Provisioner",
            PluginKind::Verifier => "Verifier",
            PluginKind::Transport => "Transport",
        }
    }
}

impl fmt::Display for PluginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PluginKind::Driver => write!(f, "driver"),
            PluginKind::Provisioner => write!(f, "provisioner"),
            PluginKind::Verifier => write!(f, "verifier"),
            PluginKind::Transport => write!(f, "transport"),
        }
    }
}
