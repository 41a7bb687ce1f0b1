//! Declarative plugin configuration.
//!
//! Each plugin type publishes a [`ConfigSchema`]: per key, an optional default
//! (a static value or a function of the rest of the config), whether the key
//! is required, whether it names a project-relative path, and an optional
//! validator for the resolved value. Schemas compose
//! with [`ConfigSchema::inherit`], where the inheriting schema wins.

use crate::PluginError;
use galley_schema::{InstanceName, PluginKind};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Instance data available to computed defaults and to the plugin itself.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ConfigContext {
    pub instance: InstanceName,
    pub suite: String,
    pub platform: String,
    pub project_root: PathBuf,
}

impl ConfigContext {
    pub fn new(
        instance: InstanceName,
        suite: impl Into<String>,
        platform: impl Into<String>,
        project_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            instance,
            suite: suite.into(),
            platform: platform.into(),
            project_root: project_root.into(),
        }
    }
}

/// Default computed from the partially resolved config. `None` leaves the key unset.
pub type ComputedDefault = fn(&PluginConfig) -> Option<Value>;

/// Check on a resolved value; the message completes "<Kind><name>#config[:key] ...".
pub type Validator = fn(&Value, &PluginConfig) -> Result<(), String>;

#[derive(Clone)]
enum DefaultValue {
    Static(Value),
    Computed(ComputedDefault),
}

#[derive(Clone, Default)]
struct FieldSpec {
    default: Option<DefaultValue>,
    required: bool,
    expand_path: bool,
    validator: Option<Validator>,
}

#[derive(Clone, Default)]
pub struct ConfigSchema {
    fields: BTreeMap<String, FieldSpec>,
}

impl fmt::Debug for ConfigSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigSchema")
            .field("keys", &self.fields.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ConfigSchema {
    pub fn new() -> Self {
        Self::default()
    }

    fn field(&mut self, key: &str) -> &mut FieldSpec {
        self.fields.entry(key.to_owned()).or_default()
    }

    #[must_use]
    pub fn default_value(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.field(key).default = Some(DefaultValue::Static(value.into()));
        self
    }

    #[must_use]
    pub fn computed(mut self, key: &str, f: ComputedDefault) -> Self {
        self.field(key).default = Some(DefaultValue::Computed(f));
        self
    }

    #[must_use]
    pub fn required(mut self, key: &str) -> Self {
        self.field(key).required = true;
        self
    }

    #[must_use]
    pub fn expand_path(mut self, key: &str) -> Self {
        self.field(key).expand_path = true;
        self
    }

    /// Run `f` on the value of `key` after defaults and required checks.
    /// Unset keys are not validated.
    #[must_use]
    pub fn validate(mut self, key: &str, f: Validator) -> Self {
        self.field(key).validator = Some(f);
        self
    }

    /// Pull in every field of `base` that this schema does not override.
    ///
    /// Defaults and validators declared here replace the base's; `required`
    /// and `expand_path` accumulate.
    #[must_use]
    pub fn inherit(mut self, base: &ConfigSchema) -> Self {
        for (key, base_field) in &base.fields {
            let field = self.field(key);
            if field.default.is_none() {
                field.default.clone_from(&base_field.default);
            }
            if field.validator.is_none() {
                field.validator = base_field.validator;
            }
            field.required |= base_field.required;
            field.expand_path |= base_field.expand_path;
        }
        self
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Apply defaults, path expansion, required checks and validators to `raw`.
    pub fn resolve(
        &self,
        kind: PluginKind,
        plugin: &str,
        raw: &BTreeMap<String, Value>,
        context: &ConfigContext,
    ) -> Result<PluginConfig, PluginError> {
        let mut config = PluginConfig::new(kind, plugin, raw.clone(), context.clone());

        for (key, field) in &self.fields {
            if config.values.contains_key(key) {
                continue;
            }
            if let Some(DefaultValue::Static(v)) = &field.default {
                config.values.insert(key.clone(), v.clone());
            }
        }
        // Computed defaults see every static default and every explicit value.
        for (key, field) in &self.fields {
            if config.values.contains_key(key) {
                continue;
            }
            if let Some(DefaultValue::Computed(f)) = &field.default {
                if let Some(v) = f(&config) {
                    config.values.insert(key.clone(), v);
                }
            }
        }

        for (key, _) in self.fields.iter().filter(|(_, f)| f.expand_path) {
            if let Some(Value::String(s)) = config.values.get(key) {
                let expanded = expand(&context.project_root, s);
                config.values.insert(key.clone(), Value::String(expanded));
            }
        }

        for (key, _) in self.fields.iter().filter(|(_, f)| f.required) {
            if config.values.get(key).is_none_or(is_blank) {
                return Err(PluginError::User(format!(
                    "{}#config[:{key}] cannot be blank (instance {})",
                    config.label(),
                    context.instance
                )));
            }
        }

        for (key, field) in &self.fields {
            let (Some(validator), Some(value)) = (field.validator, config.values.get(key)) else {
                continue;
            };
            if let Err(reason) = validator(value, &config) {
                return Err(PluginError::User(format!(
                    "{}#config[:{key}] {reason} (instance {})",
                    config.label(),
                    context.instance
                )));
            }
        }

        Ok(config)
    }
}

fn expand(root: &Path, value: &str) -> String {
    let path = Path::new(value);
    if path.is_absolute() {
        value.to_owned()
    } else {
        root.join(path).to_string_lossy().into_owned()
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

/// Resolved configuration handed to a plugin constructor.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PluginConfig {
    kind: PluginKind,
    plugin: String,
    values: BTreeMap<String, Value>,
    #[serde(skip)]
    context: ConfigContext,
}

impl PluginConfig {
    pub fn new(
        kind: PluginKind,
        plugin: impl Into<String>,
        values: BTreeMap<String, Value>,
        context: ConfigContext,
    ) -> Self {
        Self {
            kind,
            plugin: plugin.into(),
            values,
            context,
        }
    }

    pub fn kind(&self) -> PluginKind {
        self.kind
    }

    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    pub fn context(&self) -> &ConfigContext {
        &self.context
    }

    pub fn values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    /// `Driver<dummy>`, used to prefix messages about this config.
    pub fn label(&self) -> String {
        format!("{}<{}>", self.kind.title(), self.plugin)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    /// Missing or non-boolean values read as `false`.
    pub fn bool(&self, key: &str) -> bool {
        self.values
            .get(key)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn f64(&self, key: &str) -> Option<f64> {
        self.values.get(key).and_then(Value::as_f64)
    }

    pub fn path(&self, key: &str) -> Option<PathBuf> {
        self.str(key).map(PathBuf::from)
    }

    pub fn instance_name(&self) -> &InstanceName {
        &self.context.instance
    }
}
