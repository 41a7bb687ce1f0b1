//! Lifecycle orchestration for Galley instances.
//!
//! This crate ties together the project file, per-instance state, and plugins
//! into the `Instance`, the unit that moves through create, converge, setup,
//! verify and destroy as directed by the action state machine (`fsm`). The
//! `runner` drives many instances on a bounded worker pool, and `reporting`
//! turns the resulting `CoreError` into user-facing output and an exit code.

pub mod concurrency;
pub mod fsm;
pub mod instance;
pub mod reporting;
pub mod runner;
pub mod workspace;

pub use concurrency::{driver_lock, install_signal_handler, shutdown_requested, StateLock};
pub use instance::{Diagnosis, Instance, InstanceBuilder};
pub use reporting::{exit_code, format_error, with_friendly_errors, EXIT_FATAL, EXIT_INSTANCE_FAILURE};
pub use runner::{run, run_until, RunAction};
pub use workspace::Workspace;

use galley_plugin::PluginError;
use galley_schema::{Action, InstanceName};
use galley_store::StoreError;
use std::error::Error as StdError;
use std::fmt;
use thiserror::Error;

pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// The underlying error(s) behind a failure.
///
/// A failure can branch into several parallel causes, e.g. a failed verify
/// followed by a failed cleanup, or several instances failing in one run.
#[derive(Debug)]
pub enum Cause {
    Single(BoxError),
    Composite(Vec<BoxError>),
}

impl Cause {
    pub fn single(err: impl Into<BoxError>) -> Self {
        Cause::Single(err.into())
    }

    pub fn composite<I, E>(errors: I) -> Self
    where
        I: IntoIterator<Item = E>,
        E: Into<BoxError>,
    {
        Cause::Composite(errors.into_iter().map(Into::into).collect())
    }

    /// Every branch of this cause, in order.
    pub fn errors(&self) -> Vec<&(dyn StdError + 'static)> {
        match self {
            Cause::Single(e) => vec![e.as_ref() as &(dyn StdError + 'static)],
            Cause::Composite(errors) => errors
                .iter()
                .map(|e| e.as_ref() as &(dyn StdError + 'static))
                .collect(),
        }
    }
}

impl fmt::Display for Cause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cause::Single(e) => write!(f, "{e}"),
            Cause::Composite(errors) => {
                write!(f, "{} errors", errors.len())?;
                for (i, e) in errors.iter().enumerate() {
                    let sep = if i == 0 { ": " } else { "; " };
                    write!(f, "{sep}{e}")?;
                }
                Ok(())
            }
        }
    }
}

// A single cause is transparent: its source is the wrapped error's source.
impl StdError for Cause {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Cause::Single(e) => e.source(),
            Cause::Composite(_) => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum CoreError {
    /// Caller or configuration mistake.
    #[error("{0}")]
    User(String),
    /// Plugin wiring mistake.
    #[error("{0}")]
    Client(String),
    /// A lifecycle action's plugin call failed.
    #[error("{message}")]
    ActionFailed {
        action: Action,
        message: String,
        #[source]
        original: Option<Cause>,
    },
    /// Orchestrating one or more instances failed.
    #[error("{message}")]
    InstanceFailure {
        instances: Vec<InstanceName>,
        message: String,
        #[source]
        original: Option<Cause>,
    },
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("configuration error: {0}")]
    Config(#[from] galley_schema::ConfigError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    User,
    Client,
    ActionFailed,
    InstanceFailure,
    StateFileLoad,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ErrorKind::User => "User Error",
            ErrorKind::Client => "Client Error",
            ErrorKind::ActionFailed => "Action Failed",
            ErrorKind::InstanceFailure => "Instance Failure",
            ErrorKind::StateFileLoad => "State File Load Error",
            ErrorKind::Internal => "Internal Error",
        })
    }
}

impl CoreError {
    pub fn original(&self) -> Option<&Cause> {
        match self {
            CoreError::ActionFailed { original, .. }
            | CoreError::InstanceFailure { original, .. } => original.as_ref(),
            _ => None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::User(_) | CoreError::Config(_) => ErrorKind::User,
            CoreError::Client(_) => ErrorKind::Client,
            CoreError::ActionFailed { .. } => ErrorKind::ActionFailed,
            CoreError::InstanceFailure { .. } => ErrorKind::InstanceFailure,
            CoreError::Store(StoreError::StateFileLoad { .. }) => ErrorKind::StateFileLoad,
            CoreError::Store(_) | CoreError::Io(_) | CoreError::Serialization(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Failures expected in normal operation: a machine did not converge, a
    /// test did not pass.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CoreError::ActionFailed { .. } | CoreError::InstanceFailure { .. }
        )
    }

    /// Wrap a failed plugin call made while performing `action`.
    ///
    /// Errors the plugin already classified as action failures keep their message.
    pub fn action_failed(action: Action, err: PluginError) -> Self {
        match err {
            PluginError::ActionFailed(message) => CoreError::ActionFailed {
                action,
                message,
                original: None,
            },
            other => CoreError::ActionFailed {
                action,
                message: format!("Failed to complete #{action} action: [{other}]"),
                original: Some(Cause::single(other)),
            },
        }
    }
}

impl From<PluginError> for CoreError {
    fn from(err: PluginError) -> Self {
        match err {
            PluginError::User(msg) => CoreError::User(msg),
            PluginError::Client(msg) => CoreError::Client(msg),
            other => CoreError::Client(other.to_string()),
        }
    }
}
