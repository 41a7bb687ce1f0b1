use super::{concurrency, json_pretty, Context};
use galley_core::{CoreError, Instance, RunAction};
use galley_schema::Action;
use serde::Serialize;

#[derive(Debug, Serialize)]
struct Outcome {
    instance: String,
    last_action: Option<Action>,
}

/// Apply `action` to the instances matching `pattern`.
pub fn run(
    ctx: &Context,
    action: RunAction,
    pattern: Option<&str>,
    concurrency_flag: Option<Option<usize>>,
) -> Result<(), CoreError> {
    let workspace = ctx.workspace()?;
    let selected = workspace.select(pattern)?;
    let workers = concurrency(concurrency_flag, selected.len());

    let result = galley_core::run(action, &selected, workers);

    if ctx.json {
        let outcomes: Vec<Outcome> = selected.iter().copied().map(outcome).collect();
        println!(
            "{}",
            json_pretty(&serde_json::json!({
                "action": action.to_string(),
                "succeeded": result.is_ok(),
                "instances": outcomes,
            }))?
        );
    }
    result
}

fn outcome(instance: &Instance) -> Outcome {
    Outcome {
        instance: instance.name().to_string(),
        last_action: instance.last_action().ok().flatten(),
    }
}
