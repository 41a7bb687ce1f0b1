pub mod action;
pub mod completions;
pub mod diagnose;
pub mod exec;
pub mod init;
pub mod list;
pub mod login;

use galley_core::{CoreError, Workspace};
use galley_schema::Action;
use std::path::PathBuf;

/// Global options every command sees.
pub struct Context {
    pub project_dir: PathBuf,
    pub config: PathBuf,
    pub json: bool,
}

impl Context {
    pub fn workspace(&self) -> Result<Workspace, CoreError> {
        Workspace::load(&self.project_dir, &self.config)
    }

    pub fn config_path(&self) -> PathBuf {
        if self.config.is_absolute() {
            self.config.clone()
        } else {
            self.project_dir.join(&self.config)
        }
    }
}

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, CoreError> {
    serde_json::to_string_pretty(value).map_err(CoreError::from)
}

/// Display text for a last action, padded to `width` before styling so
/// escape codes do not break column alignment.
pub fn colorize_action(last: Option<Action>, width: usize) -> String {
    use console::Style;
    let text = match last {
        Some(Action::Create) => "Created",
        Some(Action::Converge) => "Converged",
        Some(Action::Setup) => "Set Up",
        Some(Action::Verify) => "Verified",
        Some(Action::Destroy) => "Destroyed",
        None => "<Not Created>",
    };
    let padded = format!("{text:<width$}");
    let style = match last {
        Some(Action::Verify) => Style::new().green(),
        Some(Action::Setup) => Style::new().cyan(),
        Some(Action::Converge) => Style::new().blue(),
        Some(Action::Create) => Style::new().yellow(),
        Some(Action::Destroy) | None => Style::new().dim(),
    };
    style.apply_to(padded).to_string()
}

/// Worker count for a `-c` flag: absent runs serially, bare runs everything at once.
pub fn concurrency(flag: Option<Option<usize>>, selected: usize) -> Option<usize> {
    match flag {
        None => None,
        Some(None) => Some(selected),
        Some(Some(n)) => Some(n),
    }
}
