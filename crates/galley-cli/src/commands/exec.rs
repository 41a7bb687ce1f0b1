use super::Context;
use galley_core::CoreError;

/// Run `command` on every instance matching `pattern`, stopping at the first failure.
pub fn run(ctx: &Context, pattern: &str, command: &str) -> Result<(), CoreError> {
    let workspace = ctx.workspace()?;
    for instance in workspace.select(Some(pattern))? {
        instance.remote_exec(command)?;
    }
    Ok(())
}
