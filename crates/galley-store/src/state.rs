use crate::layout::{validate_state_name, ProjectLayout};
use crate::{fsync_dir, StoreError};
use galley_schema::Action;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

/// Key recording the most recently attempted lifecycle action.
pub const LAST_ACTION: &str = "last_action";

/// The persisted key/value document of one instance.
///
/// Keys are strings at every nesting level; plugins rely on well-known keys
/// such as `last_action` and `hostname`. Values are plain JSON only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceState(BTreeMap<String, Value>);

impl InstanceState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// The last attempted action. Missing or unrecognized values read as `None`,
    /// i.e. "nothing has been done yet".
    pub fn last_action(&self) -> Option<Action> {
        self.get_str(LAST_ACTION).and_then(|s| s.parse().ok())
    }

    pub fn set_last_action(&mut self, action: Action) {
        self.insert(LAST_ACTION, action.as_str());
    }
}

/// On-disk state of a single instance at `.galley/<name>.json`.
#[derive(Debug, Clone)]
pub struct StateFile {
    path: PathBuf,
}

impl StateFile {
    pub fn new(layout: &ProjectLayout, name: &str) -> Result<Self, StoreError> {
        validate_state_name(name)?;
        Ok(Self {
            path: layout.state_path(name),
        })
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Read the state, returning an empty document when the file is absent or blank.
    pub fn read(&self) -> Result<InstanceState, StoreError> {
        if !self.path.exists() {
            return Ok(InstanceState::new());
        }
        let content = fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(InstanceState::new());
        }

        let value: Value = serde_json::from_str(&content).map_err(|e| self.load_error(e))?;
        match value {
            Value::Null => Ok(InstanceState::new()),
            Value::Object(map) => Ok(InstanceState(map.into_iter().collect())),
            other => Err(self.load_error(format!(
                "expected a JSON object at the top level, found {}",
                json_kind(&other)
            ))),
        }
    }

    /// Atomically replace the state file with `state`.
    pub fn write(&self, state: &InstanceState) -> Result<(), StoreError> {
        let dir = self
            .path
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        fs::create_dir_all(&dir)?;

        let mut content = serde_json::to_string_pretty(state)?;
        content.push('\n');

        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| StoreError::Io(e.error))?;
        fsync_dir(&dir)?;

        debug!("wrote state file {}", self.path.display());
        Ok(())
    }

    pub fn destroy(&self) -> Result<(), StoreError> {
        if self.path.exists() {
            fs::remove_file(&self.path)?;
            debug!("removed state file {}", self.path.display());
        }
        Ok(())
    }

    fn load_error(&self, reason: impl ToString) -> StoreError {
        StoreError::StateFileLoad {
            path: self.path.display().to_string(),
            reason: reason.to_string(),
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
