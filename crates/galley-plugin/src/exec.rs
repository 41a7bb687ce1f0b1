//! Local-host driver and transport.
//!
//! The "machine" of an `exec` instance is the host Galley runs on: commands go
//! through `sh -c`, uploads are plain file copies, and login opens `$SHELL`.

use crate::config::{ConfigContext, ConfigSchema, PluginConfig};
use crate::plugin::{Connection, Driver, LoginCommand, Plugin, Transport};
use crate::prereq::require_shell;
use crate::PluginError;
use galley_store::InstanceState;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

pub struct ExecDriver {
    config: PluginConfig,
}

impl ExecDriver {
    pub fn schema() -> ConfigSchema {
        ConfigSchema::new()
    }

    pub fn build(config: PluginConfig) -> Result<Box<dyn Driver>, PluginError> {
        Ok(Box::new(Self { config }))
    }
}

impl Plugin for ExecDriver {
    fn name(&self) -> &str {
        "exec"
    }

    fn config(&self) -> &PluginConfig {
        &self.config
    }
}

impl Driver for ExecDriver {
    fn create(&self, state: &mut InstanceState) -> Result<(), PluginError> {
        info!(
            "[{}] {} runs on the local host",
            self.config.label(),
            self.config.instance_name()
        );
        state.insert("hostname", "localhost");
        Ok(())
    }

    fn destroy(&self, state: &mut InstanceState) -> Result<(), PluginError> {
        state.remove("hostname");
        Ok(())
    }
}

pub struct ExecTransport {
    config: PluginConfig,
}

impl ExecTransport {
    pub fn schema() -> ConfigSchema {
        ConfigSchema::new().default_value("shell", "sh")
    }

    pub fn build(config: PluginConfig) -> Result<Box<dyn Transport>, PluginError> {
        Ok(Box::new(Self { config }))
    }
}

impl Plugin for ExecTransport {
    fn name(&self) -> &str {
        "exec"
    }

    fn config(&self) -> &PluginConfig {
        &self.config
    }

    fn verify_dependencies(&self) -> Result<(), PluginError> {
        require_shell()
    }
}

impl Transport for ExecTransport {
    fn connection(&self, state: &InstanceState) -> Result<Box<dyn Connection>, PluginError> {
        Ok(Box::new(ExecConnection {
            shell: self.config.str("shell").unwrap_or("sh").to_owned(),
            hostname: state.get_str("hostname").unwrap_or("localhost").to_owned(),
            context: self.config.context().clone(),
        }))
    }
}

/// A session on the local host.
pub struct ExecConnection {
    shell: String,
    hostname: String,
    context: ConfigContext,
}

impl ExecConnection {
    /// A `sh -c` command carrying the instance environment.
    pub fn command(&self, command: &str) -> Command {
        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c")
            .arg(command)
            .current_dir(&self.context.project_root)
            .env("GALLEY_INSTANCE", self.context.instance.as_str())
            .env("GALLEY_SUITE", &self.context.suite)
            .env("GALLEY_PLATFORM", &self.context.platform)
            .env("GALLEY_HOSTNAME", &self.hostname);
        cmd
    }
}

impl Connection for ExecConnection {
    fn execute(&self, command: &str) -> Result<(), PluginError> {
        debug!("[{}] exec: {command}", self.context.instance);
        let status = self.command(command).status()?;
        if status.success() {
            Ok(())
        } else {
            Err(PluginError::CommandFailed {
                command: command.to_owned(),
                status: status.to_string(),
            })
        }
    }

    fn upload(&self, paths: &[PathBuf], dest: &str) -> Result<(), PluginError> {
        let dest = Path::new(dest);
        fs::create_dir_all(dest)?;
        for path in paths {
            let Some(file_name) = path.file_name() else {
                return Err(PluginError::User(format!(
                    "cannot upload '{}': path has no file name",
                    path.display()
                )));
            };
            debug!(
                "[{}] upload {} -> {}",
                self.context.instance,
                path.display(),
                dest.display()
            );
            copy_recursive(path, &dest.join(file_name))?;
        }
        Ok(())
    }

    fn login_command(&self) -> Result<LoginCommand, PluginError> {
        let shell = std::env::var("SHELL")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "/bin/sh".to_owned());
        Ok(LoginCommand::new(shell))
    }
}

fn copy_recursive(src: &Path, dst: &Path) -> Result<(), std::io::Error> {
    if src.is_dir() {
        fs::create_dir_all(dst)?;
        for entry in fs::read_dir(src)? {
            let entry = entry?;
            copy_recursive(&entry.path(), &dst.join(entry.file_name()))?;
        }
    } else {
        fs::copy(src, dst)?;
    }
    Ok(())
}
