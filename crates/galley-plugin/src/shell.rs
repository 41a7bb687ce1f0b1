//! Shell-script provisioner and verifier.

use crate::config::{ConfigSchema, PluginConfig};
use crate::plugin::{Plugin, Provisioner, Transport, Verifier};
use crate::prereq::require_shell;
use crate::PluginError;
use galley_store::InstanceState;
use serde_json::Value;
use std::path::Path;
use std::process::Command;
use tracing::{info, warn};

/// Script picked up from the project root when neither `script` nor `command` is set.
pub const DEFAULT_SCRIPT: &str = "bootstrap.sh";

fn default_script(config: &PluginConfig) -> Option<Value> {
    if config.str("command").is_some() {
        return None;
    }
    config
        .context()
        .project_root
        .join(DEFAULT_SCRIPT)
        .is_file()
        .then(|| Value::from(DEFAULT_SCRIPT))
}

fn action_failed(config: &PluginConfig, what: &str, err: &PluginError) -> PluginError {
    PluginError::ActionFailed(format!(
        "[{}] {what} failed on instance {}: {err}",
        config.label(),
        config.instance_name()
    ))
}

/// `value` as one POSIX shell word.
pub(crate) fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Uploads a script to the machine and runs it, or runs a literal command.
pub struct ShellProvisioner {
    config: PluginConfig,
}

impl ShellProvisioner {
    pub fn schema() -> ConfigSchema {
        ConfigSchema::new()
            .computed("script", default_script)
            .expand_path("script")
            .default_value("root_path", "/tmp/galley")
    }

    pub fn build(config: PluginConfig) -> Result<Box<dyn Provisioner>, PluginError> {
        Ok(Box::new(Self { config }))
    }

    /// Directory on the machine that receives this instance's uploads.
    fn sandbox(&self) -> String {
        let root = self.config.str("root_path").unwrap_or("/tmp/galley");
        Path::new(root)
            .join(self.config.instance_name().as_str())
            .to_string_lossy()
            .into_owned()
    }
}

impl Plugin for ShellProvisioner {
    fn name(&self) -> &str {
        "shell"
    }

    fn config(&self) -> &PluginConfig {
        &self.config
    }

    fn verify_dependencies(&self) -> Result<(), PluginError> {
        require_shell()
    }
}

impl Provisioner for ShellProvisioner {
    fn call(&self, state: &mut InstanceState, transport: &dyn Transport) -> Result<(), PluginError> {
        let connection = transport.connection(state)?;

        if let Some(script) = self.config.path("script") {
            let Some(file_name) = script.file_name() else {
                return Err(PluginError::User(format!(
                    "{}#config[:script] is not a file: {}",
                    self.config.label(),
                    script.display()
                )));
            };
            if !script.is_file() {
                return Err(PluginError::User(format!(
                    "{}#config[:script] does not exist: {}",
                    self.config.label(),
                    script.display()
                )));
            }
            let sandbox = self.sandbox();
            info!(
                "[{}] Running {} on instance {}",
                self.config.label(),
                script.display(),
                self.config.instance_name()
            );
            connection.upload(std::slice::from_ref(&script), &sandbox)?;
            let remote = Path::new(&sandbox).join(file_name);
            connection
                .execute(&format!("sh {}", shell_quote(&remote.to_string_lossy())))
                .map_err(|e| action_failed(&self.config, "Converge", &e))?;
        } else if let Some(command) = self.config.str("command") {
            info!(
                "[{}] Running command on instance {}",
                self.config.label(),
                self.config.instance_name()
            );
            connection
                .execute(command)
                .map_err(|e| action_failed(&self.config, "Converge", &e))?;
        } else {
            warn!(
                "[{}] no script or command configured and no {DEFAULT_SCRIPT} found, skipping",
                self.config.label()
            );
        }
        Ok(())
    }
}

/// Runs a test command, locally by default or on the machine with `remote_exec`.
pub struct ShellVerifier {
    config: PluginConfig,
}

impl ShellVerifier {
    pub fn schema() -> ConfigSchema {
        ConfigSchema::new()
            .default_value("command", "true")
            .required("command")
            .default_value("remote_exec", false)
    }

    pub fn build(config: PluginConfig) -> Result<Box<dyn Verifier>, PluginError> {
        Ok(Box::new(Self { config }))
    }

    fn run_locally(&self, state: &InstanceState, command: &str) -> Result<(), PluginError> {
        let ctx = self.config.context();
        let status = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&ctx.project_root)
            .env("GALLEY_INSTANCE", ctx.instance.as_str())
            .env("GALLEY_SUITE", &ctx.suite)
            .env("GALLEY_PLATFORM", &ctx.platform)
            .env("GALLEY_HOSTNAME", state.get_str("hostname").unwrap_or(""))
            .status()?;
        if status.success() {
            Ok(())
        } else {
            Err(PluginError::CommandFailed {
                command: command.to_owned(),
                status: status.to_string(),
            })
        }
    }
}

impl Plugin for ShellVerifier {
    fn name(&self) -> &str {
        "shell"
    }

    fn config(&self) -> &PluginConfig {
        &self.config
    }

    fn verify_dependencies(&self) -> Result<(), PluginError> {
        require_shell()
    }
}

impl Verifier for ShellVerifier {
    fn call(&self, state: &mut InstanceState, transport: &dyn Transport) -> Result<(), PluginError> {
        let command = self.config.str("command").unwrap_or("true");
        info!(
            "[{}] Verifying instance {}",
            self.config.label(),
            self.config.instance_name()
        );
        let result = if self.config.bool("remote_exec") {
            transport.connection(state)?.execute(command)
        } else {
            self.run_locally(state, command)
        };
        result.map_err(|e| action_failed(&self.config, "Verify", &e))
    }
}
