use crate::PluginError;
use std::env;
use std::fmt;
use std::path::Path;

/// A missing host tool with actionable install instructions.
#[derive(Debug)]
pub struct MissingPrereq {
    pub name: &'static str,
    pub purpose: &'static str,
    pub install_hint: &'static str,
}

impl fmt::Display for MissingPrereq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "  - {}: {} (install: {})",
            self.name, self.purpose, self.install_hint
        )
    }
}

/// Whether `name` is an executable file somewhere on `PATH`.
pub(crate) fn command_exists(name: &str) -> bool {
    let Some(path) = env::var_os("PATH") else {
        return false;
    };
    env::split_paths(&path).any(|dir| is_executable(&dir.join(name)))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .is_ok_and(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Check what the local `exec` transport and `shell` plugins need.
/// Empty list means all prerequisites are met.
pub fn check_shell_prereqs() -> Vec<MissingPrereq> {
    let mut missing = Vec::new();

    if !command_exists("sh") {
        missing.push(MissingPrereq {
            name: "sh",
            purpose: "running provisioner and verifier commands",
            install_hint: "a POSIX shell, usually provided by the base system",
        });
    }

    missing
}

/// Format a list of missing prerequisites into a user-friendly error message.
pub fn format_missing(missing: &[MissingPrereq]) -> String {
    use std::fmt::Write as _;
    let mut msg = String::from("missing prerequisites:\n");
    for m in missing {
        let _ = writeln!(msg, "{m}");
    }
    msg.push_str("\nGalley needs these tools to run commands on the local host.");
    msg
}

/// `verify_dependencies` body shared by the shell-based plugins.
pub(crate) fn require_shell() -> Result<(), PluginError> {
    let missing = check_shell_prereqs();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(PluginError::User(format_missing(&missing)))
    }
}
