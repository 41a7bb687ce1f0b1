//! Project layout and per-instance state persistence for Galley.
//!
//! `ProjectLayout` owns every path under a project's `.galley/` directory;
//! `StateFile` reads and atomically writes the small JSON document each
//! instance keeps between runs, described by `InstanceState`.

pub mod layout;
pub mod state;

pub use layout::{validate_state_name, ProjectLayout, STATE_DIR};
pub use state::{InstanceState, StateFile, LAST_ACTION};

use std::path::Path;
use thiserror::Error;

/// Fsync a directory to ensure that a preceding `rename()` is durable.
///
/// POSIX does not guarantee that a rename survives a crash until the parent
/// directory itself has been synced.
pub(crate) fn fsync_dir(dir: &Path) -> Result<(), std::io::Error> {
    let f = std::fs::File::open(dir)?;
    f.sync_all()
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("state I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("error reading state file '{path}': {reason}")]
    StateFileLoad { path: String, reason: String },
    #[error("invalid instance name: {0}")]
    InvalidName(String),
}
