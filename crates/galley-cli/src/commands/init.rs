use super::{json_pretty, Context};
use galley_core::CoreError;
use galley_store::STATE_DIR;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::info;

const TEMPLATE: &str = r#"# Instances are every suite crossed with every platform it applies to.
# Plugin tables set defaults; platforms and suites may override any key.

[driver]
name = "dummy"

[provisioner]
name = "shell"

[verifier]
name = "shell"
command = "true"

[transport]
name = "exec"

[[platforms]]
name = "local"

[[suites]]
name = "default"
"#;

fn write_atomic(dest: &Path, content: &str) -> Result<(), CoreError> {
    let dir = dest
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    let mut tmp = NamedTempFile::new_in(&dir)?;
    tmp.write_all(content.as_bytes())?;
    tmp.as_file().sync_all()?;
    tmp.persist(dest).map_err(|e| CoreError::Io(e.error))?;
    Ok(())
}

fn ensure_can_write(dest: &Path, force: bool) -> Result<(), CoreError> {
    if !dest.exists() || force {
        return Ok(());
    }
    Err(CoreError::User(format!(
        "refusing to overwrite existing {} (pass --force)",
        dest.display()
    )))
}

/// Keep `.galley/` out of version control. Returns whether the file changed.
fn ignore_state_dir(project_dir: &Path) -> Result<bool, CoreError> {
    let path = project_dir.join(".gitignore");
    let entry = format!("{STATE_DIR}/");
    let existing = match fs::read_to_string(&path) {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e.into()),
    };
    if existing
        .lines()
        .any(|l| l.trim() == entry || l.trim() == STATE_DIR)
    {
        return Ok(false);
    }
    let mut content = existing;
    if !content.is_empty() && !content.ends_with('\n') {
        content.push('\n');
    }
    content.push_str(&entry);
    content.push('\n');
    write_atomic(&path, &content)?;
    Ok(true)
}

pub fn run(ctx: &Context, force: bool) -> Result<(), CoreError> {
    let dest = ctx.config_path();
    ensure_can_write(&dest, force)?;
    if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    write_atomic(&dest, TEMPLATE)?;
    let gitignore = ignore_state_dir(&ctx.project_dir)?;
    info!("wrote {}", dest.display());

    if ctx.json {
        println!(
            "{}",
            json_pretty(&serde_json::json!({
                "project_file": dest.display().to_string(),
                "gitignore_updated": gitignore,
            }))?
        );
    } else {
        println!("wrote {}", dest.display());
        if gitignore {
            println!("added {STATE_DIR}/ to .gitignore");
        }
    }
    Ok(())
}
