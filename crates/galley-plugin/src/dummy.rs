//! In-process plugins that touch nothing but the state file.
//!
//! Useful for exercising the lifecycle without a real machine: each action
//! can be slowed down with `sleep` or forced to fail through config.

use crate::config::{ConfigSchema, PluginConfig};
use crate::plugin::{
    default_converge, default_setup, default_verify, Driver, Peers, Plugin, Provisioner,
    Transport, Verifier,
};
use crate::PluginError;
use galley_schema::Action;
use galley_store::InstanceState;
use serde_json::Value;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::info;

fn unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}

/// `sleep` must be a finite, non-negative number of seconds that fits a `Duration`.
fn sleep_seconds(value: &Value, _: &PluginConfig) -> Result<(), String> {
    match value.as_f64() {
        Some(secs) if Duration::try_from_secs_f64(secs).is_ok() => Ok(()),
        _ => Err(format!(
            "must be a non-negative number of seconds, got {value}"
        )),
    }
}

fn pause(config: &PluginConfig) {
    if let Some(duration) = config
        .f64("sleep")
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
    {
        thread::sleep(duration);
    }
}

fn forced_failure(config: &PluginConfig, key: &str, what: &str) -> Result<(), PluginError> {
    if config.bool(key) {
        return Err(PluginError::ActionFailed(format!(
            "{what} failed for instance {} (forced by {}#config[:{key}])",
            config.instance_name(),
            config.label()
        )));
    }
    Ok(())
}

/// Driver that records a fake machine id in the instance state.
pub struct DummyDriver {
    config: PluginConfig,
}

impl DummyDriver {
    pub fn schema() -> ConfigSchema {
        let mut schema = ConfigSchema::new()
            .default_value("sleep", 0)
            .validate("sleep", sleep_seconds);
        for action in Action::ALL {
            schema = schema.default_value(&format!("fail_{action}"), false);
        }
        schema
    }

    pub fn build(config: PluginConfig) -> Result<Box<dyn Driver>, PluginError> {
        Ok(Box::new(Self { config }))
    }

    fn report(&self, action: Action) -> Result<(), PluginError> {
        info!(
            "[{}] {} on instance {}",
            self.config.label(),
            action.title(),
            self.config.instance_name()
        );
        pause(&self.config);
        forced_failure(
            &self.config,
            &format!("fail_{action}"),
            &format!("{} action", action.title()),
        )
    }
}

impl Plugin for DummyDriver {
    fn name(&self) -> &str {
        "dummy"
    }

    fn config(&self) -> &PluginConfig {
        &self.config
    }
}

impl Driver for DummyDriver {
    fn create(&self, state: &mut InstanceState) -> Result<(), PluginError> {
        self.report(Action::Create)?;
        state.insert(
            "my_id",
            format!("{}-{}", self.config.instance_name(), unix_secs()),
        );
        Ok(())
    }

    fn converge(&self, state: &mut InstanceState, peers: &Peers<'_>) -> Result<(), PluginError> {
        self.report(Action::Converge)?;
        default_converge(state, peers)
    }

    fn setup(&self, state: &mut InstanceState, peers: &Peers<'_>) -> Result<(), PluginError> {
        self.report(Action::Setup)?;
        default_setup(state, peers)
    }

    fn verify(&self, state: &mut InstanceState, peers: &Peers<'_>) -> Result<(), PluginError> {
        self.report(Action::Verify)?;
        default_verify(state, peers)
    }

    fn destroy(&self, state: &mut InstanceState) -> Result<(), PluginError> {
        self.report(Action::Destroy)?;
        state.remove("my_id");
        Ok(())
    }
}

/// Provisioner that only records when it ran.
pub struct DummyProvisioner {
    config: PluginConfig,
}

impl DummyProvisioner {
    pub fn schema() -> ConfigSchema {
        ConfigSchema::new()
            .default_value("sleep", 0)
            .validate("sleep", sleep_seconds)
            .default_value("fail", false)
    }

    pub fn build(config: PluginConfig) -> Result<Box<dyn Provisioner>, PluginError> {
        Ok(Box::new(Self { config }))
    }
}

impl Plugin for DummyProvisioner {
    fn name(&self) -> &str {
        "dummy"
    }

    fn config(&self) -> &PluginConfig {
        &self.config
    }
}

impl Provisioner for DummyProvisioner {
    fn call(
        &self,
        state: &mut InstanceState,
        _transport: &dyn Transport,
    ) -> Result<(), PluginError> {
        info!(
            "[{}] Converging instance {}",
            self.config.label(),
            self.config.instance_name()
        );
        pause(&self.config);
        forced_failure(&self.config, "fail", "Converge")?;
        state.insert("converged_at", unix_secs());
        Ok(())
    }
}

/// Verifier that only records when it ran.
pub struct DummyVerifier {
    config: PluginConfig,
}

impl DummyVerifier {
    pub fn schema() -> ConfigSchema {
        ConfigSchema::new()
            .default_value("sleep", 0)
            .validate("sleep", sleep_seconds)
            .default_value("fail", false)
    }

    pub fn build(config: PluginConfig) -> Result<Box<dyn Verifier>, PluginError> {
        Ok(Box::new(Self { config }))
    }
}

impl Plugin for DummyVerifier {
    fn name(&self) -> &str {
        "dummy"
    }

    fn config(&self) -> &PluginConfig {
        &self.config
    }
}

impl Verifier for DummyVerifier {
    fn call(
        &self,
        state: &mut InstanceState,
        _transport: &dyn Transport,
    ) -> Result<(), PluginError> {
        info!(
            "[{}] Verifying instance {}",
            self.config.label(),
            self.config.instance_name()
        );
        pause(&self.config);
        forced_failure(&self.config, "fail", "Verify")?;
        state.insert("verified_at", unix_secs());
        Ok(())
    }
}
