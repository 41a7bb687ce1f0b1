use super::{colorize_action, json_pretty, Context};
use galley_core::{CoreError, Instance};
use galley_schema::Action;
use serde::Serialize;

#[derive(Debug, Serialize)]
struct ListRow {
    instance: String,
    driver: String,
    provisioner: String,
    verifier: String,
    transport: String,
    last_action: Option<Action>,
}

impl ListRow {
    fn of(instance: &Instance) -> Result<Self, CoreError> {
        Ok(Self {
            instance: instance.name().to_string(),
            driver: instance.driver().name().to_owned(),
            provisioner: instance.provisioner().name().to_owned(),
            verifier: instance.verifier().name().to_owned(),
            transport: instance.transport().name().to_owned(),
            last_action: instance.last_action()?,
        })
    }
}

pub fn run(ctx: &Context, pattern: Option<&str>) -> Result<(), CoreError> {
    let workspace = ctx.workspace()?;
    let rows = workspace
        .select(pattern)?
        .into_iter()
        .map(ListRow::of)
        .collect::<Result<Vec<_>, _>>()?;

    if ctx.json {
        println!("{}", json_pretty(&rows)?);
        return Ok(());
    }

    let width = rows
        .iter()
        .map(|r| r.instance.len())
        .max()
        .unwrap_or(0)
        .max("INSTANCE".len());
    println!(
        "{:<width$}  {:<12} {:<12} {:<12} {:<10} LAST ACTION",
        "INSTANCE", "DRIVER", "PROVISIONER", "VERIFIER", "TRANSPORT"
    );
    for row in &rows {
        println!(
            "{:<width$}  {:<12} {:<12} {:<12} {:<10} {}",
            row.instance,
            row.driver,
            row.provisioner,
            row.verifier,
            row.transport,
            colorize_action(row.last_action, 0)
        );
    }
    Ok(())
}
