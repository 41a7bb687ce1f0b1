use crate::config::PluginConfig;
use crate::PluginError;
use galley_schema::Action;
use galley_store::InstanceState;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

/// Behavior shared by every plugin category.
pub trait Plugin: Send + Sync {
    /// Name the plugin is registered under (`"dummy"`, `"exec"`, ...).
    fn name(&self) -> &str;

    fn config(&self) -> &PluginConfig;

    /// Check that the host has what the plugin needs.
    ///
    /// Run once per plugin type per process, on its first load.
    fn verify_dependencies(&self) -> Result<(), PluginError> {
        Ok(())
    }
}

/// The other plugins of an instance, handed to driver hooks that delegate.
#[derive(Clone, Copy)]
pub struct Peers<'a> {
    pub provisioner: &'a dyn Provisioner,
    pub verifier: &'a dyn Verifier,
    pub transport: &'a dyn Transport,
}

/// Owns the lifecycle of the machine under test.
pub trait Driver: Plugin {
    /// Actions that must not overlap across instances using this driver type,
    /// e.g. calls into a rate-limited provider API.
    fn serial_actions(&self) -> &[Action] {
        &[]
    }

    fn create(&self, state: &mut InstanceState) -> Result<(), PluginError>;

    fn converge(&self, state: &mut InstanceState, peers: &Peers<'_>) -> Result<(), PluginError> {
        default_converge(state, peers)
    }

    fn setup(&self, state: &mut InstanceState, peers: &Peers<'_>) -> Result<(), PluginError> {
        default_setup(state, peers)
    }

    fn verify(&self, state: &mut InstanceState, peers: &Peers<'_>) -> Result<(), PluginError> {
        default_verify(state, peers)
    }

    fn destroy(&self, state: &mut InstanceState) -> Result<(), PluginError>;

    fn login_command(
        &self,
        state: &InstanceState,
        peers: &Peers<'_>,
    ) -> Result<LoginCommand, PluginError> {
        peers.transport.connection(state)?.login_command()
    }
}

pub fn default_converge(state: &mut InstanceState, peers: &Peers<'_>) -> Result<(), PluginError> {
    peers.provisioner.call(state, peers.transport)
}

pub fn default_setup(state: &mut InstanceState, peers: &Peers<'_>) -> Result<(), PluginError> {
    peers.verifier.setup(state, peers.transport)
}

pub fn default_verify(state: &mut InstanceState, peers: &Peers<'_>) -> Result<(), PluginError> {
    peers.verifier.call(state, peers.transport)
}

/// Brings the machine to its desired configuration.
pub trait Provisioner: Plugin {
    fn call(&self, state: &mut InstanceState, transport: &dyn Transport)
        -> Result<(), PluginError>;
}

/// Runs the test suite against a converged machine.
pub trait Verifier: Plugin {
    /// Prepare the machine for verification (install test tooling).
    fn setup(
        &self,
        _state: &mut InstanceState,
        _transport: &dyn Transport,
    ) -> Result<(), PluginError> {
        Ok(())
    }

    fn call(&self, state: &mut InstanceState, transport: &dyn Transport)
        -> Result<(), PluginError>;
}

/// Opens connections to the machine described by an instance's state.
pub trait Transport: Plugin {
    fn connection(&self, state: &InstanceState) -> Result<Box<dyn Connection>, PluginError>;
}

pub trait Connection: Send {
    fn execute(&self, command: &str) -> Result<(), PluginError>;

    fn upload(&self, paths: &[PathBuf], dest: &str) -> Result<(), PluginError>;

    fn login_command(&self) -> Result<LoginCommand, PluginError>;
}

/// A program that hands an interactive session on the machine to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoginCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl LoginCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }
}

impl fmt::Display for LoginCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}
