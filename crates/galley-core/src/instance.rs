//! A suite running on a platform, driven through its lifecycle.

use crate::concurrency::{driver_lock, StateLock};
use crate::{fsm, Cause, CoreError};
use galley_plugin::{Driver, LoginCommand, Peers, PluginConfig, Provisioner, Transport, Verifier};
use galley_schema::{instance_name, Action, DestroyMode, InstanceName, Platform, Suite};
use galley_store::{InstanceState, ProjectLayout, StateFile};
use serde::Serialize;
use serde_json::Value;
use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tracing::{debug, info, info_span, warn};

pub struct Instance {
    name: InstanceName,
    suite: Suite,
    platform: Platform,
    driver: Box<dyn Driver>,
    provisioner: Box<dyn Provisioner>,
    verifier: Box<dyn Verifier>,
    transport: Box<dyn Transport>,
    state_file: StateFile,
    lock_path: PathBuf,
    /// Shared with every instance of the same driver type; present only when
    /// the driver declares actions that must not overlap.
    driver_lock: Option<Arc<Mutex<()>>>,
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("name", &self.name)
            .field("driver", &self.driver.name())
            .field("provisioner", &self.provisioner.name())
            .field("verifier", &self.verifier.name())
            .field("transport", &self.transport.name())
            .finish_non_exhaustive()
    }
}

/// Assembles an [`Instance`] from its parts.
#[derive(Default)]
pub struct InstanceBuilder {
    suite: Option<Suite>,
    platform: Option<Platform>,
    driver: Option<Box<dyn Driver>>,
    provisioner: Option<Box<dyn Provisioner>>,
    verifier: Option<Box<dyn Verifier>>,
    transport: Option<Box<dyn Transport>>,
    layout: Option<ProjectLayout>,
}

fn missing(what: &str) -> CoreError {
    CoreError::User(format!("cannot build an instance without a {what}"))
}

impl InstanceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn suite(mut self, suite: Suite) -> Self {
        self.suite = Some(suite);
        self
    }

    #[must_use]
    pub fn platform(mut self, platform: Platform) -> Self {
        self.platform = Some(platform);
        self
    }

    #[must_use]
    pub fn driver(mut self, driver: Box<dyn Driver>) -> Self {
        self.driver = Some(driver);
        self
    }

    #[must_use]
    pub fn provisioner(mut self, provisioner: Box<dyn Provisioner>) -> Self {
        self.provisioner = Some(provisioner);
        self
    }

    #[must_use]
    pub fn verifier(mut self, verifier: Box<dyn Verifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    #[must_use]
    pub fn transport(mut self, transport: Box<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    #[must_use]
    pub fn layout(mut self, layout: ProjectLayout) -> Self {
        self.layout = Some(layout);
        self
    }

    pub fn build(self) -> Result<Instance, CoreError> {
        let suite = self.suite.ok_or_else(|| missing("suite"))?;
        let platform = self.platform.ok_or_else(|| missing("platform"))?;
        let driver = self.driver.ok_or_else(|| missing("driver"))?;
        let provisioner = self.provisioner.ok_or_else(|| missing("provisioner"))?;
        let verifier = self.verifier.ok_or_else(|| missing("verifier"))?;
        let transport = self.transport.ok_or_else(|| missing("transport"))?;
        let layout = self.layout.ok_or_else(|| missing("project layout"))?;

        let name = instance_name(&suite.name, &platform.name);
        let state_file = StateFile::new(&layout, &name)?;
        let lock_path = layout.lock_path(&name);
        let driver_lock = if driver.serial_actions().is_empty() {
            None
        } else {
            debug!(
                "driver '{}' serializes {:?} across instances",
                driver.name(),
                driver.serial_actions()
            );
            Some(driver_lock(driver.name()))
        };

        Ok(Instance {
            name,
            suite,
            platform,
            driver,
            provisioner,
            verifier,
            transport,
            state_file,
            lock_path,
            driver_lock,
        })
    }
}

/// Everything known about an instance, for `galley diagnose`.
#[derive(Debug, Serialize)]
pub struct Diagnosis {
    pub name: InstanceName,
    pub suite: Suite,
    pub platform: Platform,
    pub state_file: PathBuf,
    pub state: Value,
    pub driver: PluginConfig,
    pub provisioner: PluginConfig,
    pub verifier: PluginConfig,
    pub transport: PluginConfig,
}

impl Instance {
    pub fn builder() -> InstanceBuilder {
        InstanceBuilder::new()
    }

    #[inline]
    pub fn name(&self) -> &InstanceName {
        &self.name
    }

    pub fn suite(&self) -> &Suite {
        &self.suite
    }

    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    pub fn driver(&self) -> &dyn Driver {
        self.driver.as_ref()
    }

    pub fn provisioner(&self) -> &dyn Provisioner {
        self.provisioner.as_ref()
    }

    pub fn verifier(&self) -> &dyn Verifier {
        self.verifier.as_ref()
    }

    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    pub fn state_file(&self) -> &StateFile {
        &self.state_file
    }

    /// The last attempted action, `None` when nothing has run yet.
    pub fn last_action(&self) -> Result<Option<Action>, CoreError> {
        Ok(self.state_file.read()?.last_action())
    }

    pub fn create(&self) -> Result<&Self, CoreError> {
        self.transition_to(Action::Create)
    }

    pub fn converge(&self) -> Result<&Self, CoreError> {
        self.transition_to(Action::Converge)
    }

    pub fn setup(&self) -> Result<&Self, CoreError> {
        self.transition_to(Action::Setup)
    }

    pub fn verify(&self) -> Result<&Self, CoreError> {
        self.transition_to(Action::Verify)
    }

    pub fn destroy(&self) -> Result<&Self, CoreError> {
        self.transition_to(Action::Destroy)
    }

    /// Destroy, verify from scratch, then destroy again according to `mode`.
    pub fn test(&self, mode: DestroyMode) -> Result<&Self, CoreError> {
        let _span = self.span().entered();
        let _lock = self.lock()?;
        let start = Instant::now();

        info!("Cleaning up any prior instances of {}", self.name);
        self.run_to(Action::Destroy).map_err(|e| self.failure(e))?;

        info!("Testing {}", self.name);
        let verified = self.run_to(Action::Verify);
        let destroyed = match (mode, &verified) {
            (DestroyMode::Always, _) | (DestroyMode::Passing, Ok(())) => {
                Some(self.run_to(Action::Destroy))
            }
            _ => None,
        };

        let result = match (verified, destroyed) {
            (Ok(()), None | Some(Ok(()))) => Ok(self),
            (Ok(()), Some(Err(e))) | (Err(e), None | Some(Ok(()))) => Err(self.failure(e)),
            (Err(verify), Some(Err(destroy))) => Err(CoreError::InstanceFailure {
                instances: vec![self.name.clone()],
                message: format!(
                    "{verify} on {name}; destroying {name} afterwards also failed: {destroy}",
                    name = self.name
                ),
                original: Some(Cause::composite([verify, destroy])),
            }),
        };

        info!(
            "Finished testing {} ({:.2}s)",
            self.name,
            start.elapsed().as_secs_f64()
        );
        result
    }

    /// Hand the terminal to an interactive session on the machine.
    ///
    /// Replaces the current process on unix; elsewhere waits for the session
    /// and exits with its status. Only returns on failure.
    pub fn login(&self) -> Result<Infallible, CoreError> {
        let command = self.login_command()?;
        info!("Logging into {} with {command}", self.name);
        exec_login(&command)
    }

    pub fn login_command(&self) -> Result<LoginCommand, CoreError> {
        let state = self.created_state()?;
        Ok(self.driver.login_command(&state, &self.peers())?)
    }

    /// Run `command` on the machine through the transport.
    pub fn remote_exec(&self, command: &str) -> Result<&Self, CoreError> {
        let _span = self.span().entered();
        let state = self.created_state()?;
        info!("Execute command on {}", self.name);
        self.transport
            .connection(&state)
            .and_then(|connection| connection.execute(command))
            .map_err(|e| CoreError::InstanceFailure {
                instances: vec![self.name.clone()],
                message: format!("Failed to execute command on {}: [{e}]", self.name),
                original: Some(Cause::single(e)),
            })?;
        Ok(self)
    }

    pub fn diagnose(&self) -> Diagnosis {
        let state = match self.state_file.read() {
            Ok(state) => serde_json::to_value(&state).unwrap_or(Value::Null),
            Err(e) => serde_json::json!({ "error": e.to_string() }),
        };
        Diagnosis {
            name: self.name.clone(),
            suite: self.suite.clone(),
            platform: self.platform.clone(),
            state_file: self.state_file.path().to_path_buf(),
            state,
            driver: self.driver.config().clone(),
            provisioner: self.provisioner.config().clone(),
            verifier: self.verifier.config().clone(),
            transport: self.transport.config().clone(),
        }
    }

    fn span(&self) -> tracing::Span {
        info_span!("instance", name = %self.name)
    }

    fn lock(&self) -> Result<StateLock, CoreError> {
        StateLock::try_acquire(&self.lock_path)?.ok_or_else(|| {
            CoreError::User(format!(
                "instance {} is in use by another galley process (lock held on {})",
                self.name,
                self.lock_path.display()
            ))
        })
    }

    fn peers(&self) -> Peers<'_> {
        Peers {
            provisioner: self.provisioner.as_ref(),
            verifier: self.verifier.as_ref(),
            transport: self.transport.as_ref(),
        }
    }

    fn created_state(&self) -> Result<InstanceState, CoreError> {
        let state = self.state_file.read()?;
        match state.last_action() {
            None | Some(Action::Destroy) => Err(CoreError::User(format!(
                "Instance {} has not yet been created",
                self.name
            ))),
            Some(_) => Ok(state),
        }
    }

    /// Report an orchestration failure against this instance. Errors that are
    /// not action or instance failures are returned unchanged.
    fn failure(&self, err: CoreError) -> CoreError {
        if !err.is_transient() {
            return err;
        }
        CoreError::InstanceFailure {
            instances: vec![self.name.clone()],
            message: format!("{err} on {}", self.name),
            original: Some(Cause::single(err)),
        }
    }

    fn transition_to(&self, desired: Action) -> Result<&Self, CoreError> {
        let _span = self.span().entered();
        let _lock = self.lock()?;
        self.run_to(desired)?;
        Ok(self)
    }

    fn run_to(&self, desired: Action) -> Result<(), CoreError> {
        let last = self.state_file.read()?.last_action();
        let actions = fsm::actions(last, Some(desired));
        debug!("{} -> {desired}: {actions:?}", last.map_or("nothing", Action::as_str));

        for action in actions {
            let start = Instant::now();
            info!("{} {}", action.progressive(), self.name);
            self.perform_action(action)?;
            info!(
                "Finished {} {} ({:.2}s)",
                action.progressive().to_lowercase(),
                self.name,
                start.elapsed().as_secs_f64()
            );
        }
        Ok(())
    }

    /// Run one plugin call and persist the state whatever its outcome.
    fn perform_action(&self, action: Action) -> Result<(), CoreError> {
        let mut state = self.state_file.read()?;

        let result = {
            let _serial = self.serial_guard(action);
            self.dispatch(action, &mut state)
        };

        state.set_last_action(action);
        let persisted = if action == Action::Destroy && result.is_ok() {
            self.state_file.destroy()
        } else {
            self.state_file.write(&state)
        };

        match result {
            Ok(()) => persisted.map_err(CoreError::from),
            Err(e) => {
                if let Err(store) = persisted {
                    warn!("could not save state of {} after failed {action}: {store}", self.name);
                }
                Err(CoreError::action_failed(action, e))
            }
        }
    }

    fn serial_guard(&self, action: Action) -> Option<MutexGuard<'_, ()>> {
        self.driver_lock
            .as_ref()
            .filter(|_| self.driver.serial_actions().contains(&action))
            .map(|lock| {
                debug!("waiting for {} lock of driver '{}'", action, self.driver.name());
                lock.lock().unwrap_or_else(PoisonError::into_inner)
            })
    }

    fn dispatch(
        &self,
        action: Action,
        state: &mut InstanceState,
    ) -> Result<(), galley_plugin::PluginError> {
        let peers = self.peers();
        match action {
            Action::Create => self.driver.create(state),
            Action::Converge => self.driver.converge(state, &peers),
            Action::Setup => self.driver.setup(state, &peers),
            Action::Verify => self.driver.verify(state, &peers),
            Action::Destroy => self.driver.destroy(state),
        }
    }
}

#[cfg(unix)]
fn exec_login(command: &LoginCommand) -> Result<Infallible, CoreError> {
    use std::os::unix::process::CommandExt;

    let err = std::process::Command::new(&command.program)
        .args(&command.args)
        .exec();
    Err(CoreError::Io(err))
}

#[cfg(not(unix))]
fn exec_login(command: &LoginCommand) -> Result<Infallible, CoreError> {
    let status = std::process::Command::new(&command.program)
        .args(&command.args)
        .status()?;
    std::process::exit(status.code().unwrap_or(1));
}
