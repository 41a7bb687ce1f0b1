use super::Context;
use galley_core::CoreError;

/// Log into the single instance matching `pattern`.
pub fn run(ctx: &Context, pattern: &str) -> Result<(), CoreError> {
    let workspace = ctx.workspace()?;
    let selected = workspace.select(Some(pattern))?;
    let [instance] = selected.as_slice() else {
        let names: Vec<String> = selected.iter().map(|i| i.name().to_string()).collect();
        return Err(CoreError::User(format!(
            "argument '{pattern}' returned multiple results: {}",
            names.join(", ")
        )));
    };
    if ctx.json {
        let command = instance.login_command()?;
        println!(
            "{}",
            super::json_pretty(&serde_json::json!({
                "instance": instance.name().as_str(),
                "login": command,
            }))?
        );
        return Ok(());
    }
    match instance.login()? {}
}
