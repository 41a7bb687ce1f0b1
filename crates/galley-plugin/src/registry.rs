//! Name-based plugin lookup.
//!
//! Each plugin category has its own table mapping a registered name to a
//! config schema and a factory. Loading resolves the raw config against the
//! schema, builds the plugin, and verifies its host dependencies the first
//! time that plugin type is loaded in the process.

use crate::config::{ConfigContext, ConfigSchema, PluginConfig};
use crate::plugin::{Driver, Plugin, Provisioner, Transport, Verifier};
use crate::{dummy, exec, shell, PluginError};
use galley_schema::PluginKind;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, OnceLock, PoisonError, RwLock};
use tracing::debug;

type Factory<P> = Box<dyn Fn(PluginConfig) -> Result<Box<P>, PluginError> + Send + Sync>;

struct Entry<P: ?Sized> {
    schema: ConfigSchema,
    factory: Factory<P>,
    /// Set once `verify_dependencies` has succeeded. Held across the check so
    /// concurrent first loads wait for its outcome.
    deps_verified: Mutex<bool>,
}

struct Table<P: ?Sized> {
    kind: PluginKind,
    entries: RwLock<BTreeMap<String, Arc<Entry<P>>>>,
}

impl<P: ?Sized + Plugin> Table<P> {
    fn new(kind: PluginKind) -> Self {
        Self {
            kind,
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    fn register<F>(&self, name: &str, schema: ConfigSchema, factory: F)
    where
        F: Fn(PluginConfig) -> Result<Box<P>, PluginError> + Send + Sync + 'static,
    {
        let entry = Arc::new(Entry {
            schema,
            factory: Box::new(factory),
            deps_verified: Mutex::new(false),
        });
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_owned(), entry);
        debug!("registered {} plugin '{name}'", self.kind);
    }

    fn names(&self) -> Vec<String> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    fn load(
        &self,
        name: &str,
        raw: &BTreeMap<String, Value>,
        context: &ConfigContext,
    ) -> Result<Box<P>, PluginError> {
        let entry = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned();
        let Some(entry) = entry else {
            return Err(PluginError::NotFound {
                kind: self.kind,
                name: name.to_owned(),
                available: self.names(),
            });
        };

        let config = entry.schema.resolve(self.kind, name, raw, context)?;
        let plugin = (entry.factory)(config)?;

        if plugin.name() != name {
            return Err(PluginError::Client(format!(
                "{} plugin registered as '{name}' reports its name as '{}'",
                self.kind,
                plugin.name()
            )));
        }

        let mut verified = entry
            .deps_verified
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !*verified {
            debug!("verifying dependencies of {} plugin '{name}'", self.kind);
            plugin.verify_dependencies()?;
            *verified = true;
        }
        drop(verified);

        Ok(plugin)
    }
}

/// Registered plugin types of every category.
pub struct PluginRegistry {
    drivers: Table<dyn Driver>,
    provisioners: Table<dyn Provisioner>,
    verifiers: Table<dyn Verifier>,
    transports: Table<dyn Transport>,
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PluginRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            drivers: Table::new(PluginKind::Driver),
            provisioners: Table::new(PluginKind::Provisioner),
            verifiers: Table::new(PluginKind::Verifier),
            transports: Table::new(PluginKind::Transport),
        }
    }

    /// A registry holding the bundled `dummy`, `exec` and `shell` plugins.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.register_driver("dummy", dummy::DummyDriver::schema(), dummy::DummyDriver::build);
        registry.register_driver("exec", exec::ExecDriver::schema(), exec::ExecDriver::build);
        registry.register_provisioner(
            "dummy",
            dummy::DummyProvisioner::schema(),
            dummy::DummyProvisioner::build,
        );
        registry.register_provisioner(
            "shell",
            shell::ShellProvisioner::schema(),
            shell::ShellProvisioner::build,
        );
        registry.register_verifier(
            "dummy",
            dummy::DummyVerifier::schema(),
            dummy::DummyVerifier::build,
        );
        registry.register_verifier(
            "shell",
            shell::ShellVerifier::schema(),
            shell::ShellVerifier::build,
        );
        registry.register_transport(
            "exec",
            exec::ExecTransport::schema(),
            exec::ExecTransport::build,
        );
        registry
    }

    /// Process-wide registry, seeded with the bundled plugins on first use.
    pub fn global() -> &'static PluginRegistry {
        static GLOBAL: OnceLock<PluginRegistry> = OnceLock::new();
        GLOBAL.get_or_init(Self::with_builtins)
    }

    pub fn register_driver<F>(&self, name: &str, schema: ConfigSchema, factory: F)
    where
        F: Fn(PluginConfig) -> Result<Box<dyn Driver>, PluginError> + Send + Sync + 'static,
    {
        self.drivers.register(name, schema, factory);
    }

    pub fn register_provisioner<F>(&self, name: &str, schema: ConfigSchema, factory: F)
    where
        F: Fn(PluginConfig) -> Result<Box<dyn Provisioner>, PluginError> + Send + Sync + 'static,
    {
        self.provisioners.register(name, schema, factory);
    }

    pub fn register_verifier<F>(&self, name: &str, schema: ConfigSchema, factory: F)
    where
        F: Fn(PluginConfig) -> Result<Box<dyn Verifier>, PluginError> + Send + Sync + 'static,
    {
        self.verifiers.register(name, schema, factory);
    }

    pub fn register_transport<F>(&self, name: &str, schema: ConfigSchema, factory: F)
    where
        F: Fn(PluginConfig) -> Result<Box<dyn Transport>, PluginError> + Send + Sync + 'static,
    {
        self.transports.register(name, schema, factory);
    }

    pub fn load_driver(
        &self,
        name: &str,
        raw: &BTreeMap<String, Value>,
        context: &ConfigContext,
    ) -> Result<Box<dyn Driver>, PluginError> {
        self.drivers.load(name, raw, context)
    }

    pub fn load_provisioner(
        &self,
        name: &str,
        raw: &BTreeMap<String, Value>,
        context: &ConfigContext,
    ) -> Result<Box<dyn Provisioner>, PluginError> {
        self.provisioners.load(name, raw, context)
    }

    pub fn load_verifier(
        &self,
        name: &str,
        raw: &BTreeMap<String, Value>,
        context: &ConfigContext,
    ) -> Result<Box<dyn Verifier>, PluginError> {
        self.verifiers.load(name, raw, context)
    }

    pub fn load_transport(
        &self,
        name: &str,
        raw: &BTreeMap<String, Value>,
        context: &ConfigContext,
    ) -> Result<Box<dyn Transport>, PluginError> {
        self.transports.load(name, raw, context)
    }

    /// Registered names of one category, sorted.
    pub fn available(&self, kind: PluginKind) -> Vec<String> {
        match kind {
            PluginKind::Driver => self.drivers.names(),
            PluginKind::Provisioner => self.provisioners.names(),
            PluginKind::Verifier => self.verifiers.names(),
            PluginKind::Transport => self.transports.names(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use galley_schema::InstanceName;
    use galley_store::InstanceState;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    fn ctx() -> ConfigContext {
        ConfigContext::new(InstanceName::new("default-local"), "default", "local", "/tmp")
    }

    static VERIFY_CALLS: AtomicUsize = AtomicUsize::new(0);

    struct CountingVerifier {
        name: &'static str,
        config: PluginConfig,
    }

    impl Plugin for CountingVerifier {
        fn name(&self) -> &str {
            self.name
        }

        fn config(&self) -> &PluginConfig {
            &self.config
        }

        fn verify_dependencies(&self) -> Result<(), PluginError> {
            VERIFY_CALLS.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    impl Verifier for CountingVerifier {
        fn call(
            &self,
            _state: &mut InstanceState,
            _transport: &dyn Transport,
        ) -> Result<(), PluginError> {
            Ok(())
        }
    }

    #[test]
    fn builtins_are_listed_by_kind() {
        let registry = PluginRegistry::with_builtins();
        assert_eq!(registry.available(PluginKind::Driver), vec!["dummy", "exec"]);
        assert_eq!(
            registry.available(PluginKind::Provisioner),
            vec!["dummy", "shell"]
        );
        assert_eq!(registry.available(PluginKind::Verifier), vec!["dummy", "shell"]);
        assert_eq!(registry.available(PluginKind::Transport), vec!["exec"]);
    }

    #[test]
    fn unknown_name_lists_available_plugins() {
        let registry = PluginRegistry::with_builtins();
        let err = registry
            .load_driver("vagrant", &BTreeMap::new(), &ctx())
            .err()
            .unwrap();
        assert!(err.is_client());
        let msg = err.to_string();
        assert!(msg.contains("'vagrant' driver"), "{msg}");
        assert!(msg.contains("dummy, exec"), "{msg}");
    }

    #[test]
    fn dependencies_are_verified_once_per_plugin_type() {
        let registry = PluginRegistry::new();
        registry.register_verifier("counting", ConfigSchema::new(), |config| {
            Ok(Box::new(CountingVerifier {
                name: "counting",
                config,
            }))
        });

        let before = VERIFY_CALLS.load(Ordering::SeqCst);
        for _ in 0..3 {
            registry
                .load_verifier("counting", &BTreeMap::new(), &ctx())
                .unwrap();
        }
        assert_eq!(VERIFY_CALLS.load(Ordering::SeqCst) - before, 1);
    }

    static SLOW_CHECKS: AtomicUsize = AtomicUsize::new(0);

    /// Verifier whose dependency check takes a while and then fails.
    struct MissingToolVerifier {
        config: PluginConfig,
    }

    impl Plugin for MissingToolVerifier {
        fn name(&self) -> &str {
            "missing-tool"
        }

        fn config(&self) -> &PluginConfig {
            &self.config
        }

        fn verify_dependencies(&self) -> Result<(), PluginError> {
            SLOW_CHECKS.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(200));
            Err(PluginError::User("missing tool: inspec".to_owned()))
        }
    }

    impl Verifier for MissingToolVerifier {
        fn call(
            &self,
            _state: &mut InstanceState,
            _transport: &dyn Transport,
        ) -> Result<(), PluginError> {
            Ok(())
        }
    }

    #[test]
    fn concurrent_loads_wait_for_a_failing_dependency_check() {
        let registry = PluginRegistry::new();
        registry.register_verifier("missing-tool", ConfigSchema::new(), |config| {
            Ok(Box::new(MissingToolVerifier { config }))
        });

        let (first, second) = thread::scope(|s| {
            let first = s.spawn(|| {
                registry
                    .load_verifier("missing-tool", &BTreeMap::new(), &ctx())
                    .is_ok()
            });
            thread::sleep(Duration::from_millis(50));
            let second = s.spawn(|| {
                registry
                    .load_verifier("missing-tool", &BTreeMap::new(), &ctx())
                    .is_ok()
            });
            (first.join().unwrap(), second.join().unwrap())
        });

        assert!(!first);
        assert!(!second);
        assert_eq!(SLOW_CHECKS.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn plugin_reporting_a_different_name_is_rejected() {
        let registry = PluginRegistry::new();
        registry.register_verifier("alias", ConfigSchema::new(), |config| {
            Ok(Box::new(CountingVerifier {
                name: "counting",
                config,
            }))
        });
        let err = registry
            .load_verifier("alias", &BTreeMap::new(), &ctx())
            .err()
            .unwrap();
        assert!(err.is_client());
        assert!(err.to_string().contains("'alias'"));
    }

    #[test]
    fn loaded_plugin_sees_resolved_config() {
        let registry = PluginRegistry::with_builtins();
        let driver = registry
            .load_driver("dummy", &BTreeMap::new(), &ctx())
            .unwrap();
        assert_eq!(driver.name(), "dummy");
        assert_eq!(driver.config().f64("sleep"), Some(0.0));
        assert_eq!(driver.config().instance_name().as_str(), "default-local");
    }
}
