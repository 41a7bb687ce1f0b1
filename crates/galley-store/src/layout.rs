use crate::StoreError;
use std::fs;
use std::path::{Path, PathBuf};

/// Name of the per-project working directory.
pub const STATE_DIR: &str = ".galley";

/// Directory layout of a Galley project.
///
/// Instance state, state locks and logs live under `<root>/.galley`. All
/// directories are created lazily on [`initialize`](Self::initialize).
#[derive(Debug, Clone)]
pub struct ProjectLayout {
    root: PathBuf,
}

impl ProjectLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[inline]
    pub fn state_dir(&self) -> PathBuf {
        self.root.join(STATE_DIR)
    }

    #[inline]
    pub fn state_path(&self, name: &str) -> PathBuf {
        self.state_dir().join(format!("{name}.json"))
    }

    #[inline]
    pub fn lock_path(&self, name: &str) -> PathBuf {
        self.state_dir().join(format!("{name}.lock"))
    }

    #[inline]
    pub fn logs_dir(&self) -> PathBuf {
        self.state_dir().join("logs")
    }

    /// Combined log of every instance, written by the CLI's file log layer.
    #[inline]
    pub fn log_file(&self) -> PathBuf {
        self.logs_dir().join("galley.log")
    }

    pub fn initialize(&self) -> Result<(), StoreError> {
        fs::create_dir_all(self.state_dir())?;
        fs::create_dir_all(self.logs_dir())?;
        Ok(())
    }
}

/// Reject names that could escape the state directory.
pub fn validate_state_name(name: &str) -> Result<(), StoreError> {
    if name.is_empty() || name.len() > 200 {
        return Err(StoreError::InvalidName(
            "instance name must be 1-200 characters".to_owned(),
        ));
    }
    if !name
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
    {
        return Err(StoreError::InvalidName(format!(
            "instance name '{name}' must match [a-zA-Z0-9_-]"
        )));
    }
    Ok(())
}
