use super::{json_pretty, Context};
use galley_core::{CoreError, Diagnosis, Instance};
use galley_plugin::{check_shell_prereqs, PluginRegistry};
use galley_schema::PluginKind;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Serialize)]
struct Report {
    galley_version: &'static str,
    project_file: String,
    missing_prerequisites: Vec<String>,
    plugins: BTreeMap<PluginKind, Vec<String>>,
    instances: Vec<Diagnosis>,
}

/// Print resolved plugin configuration and state for the matching instances.
///
/// The output is JSON with or without `--json`; it is meant for bug reports.
pub fn run(ctx: &Context, pattern: Option<&str>) -> Result<(), CoreError> {
    let workspace = ctx.workspace()?;
    let registry = PluginRegistry::global();
    let report = Report {
        galley_version: env!("CARGO_PKG_VERSION"),
        project_file: ctx.config_path().display().to_string(),
        missing_prerequisites: check_shell_prereqs()
            .iter()
            .map(ToString::to_string)
            .collect(),
        plugins: PluginKind::ALL
            .into_iter()
            .map(|kind| (kind, registry.available(kind)))
            .collect(),
        instances: workspace
            .select(pattern)?
            .into_iter()
            .map(Instance::diagnose)
            .collect(),
    };
    println!("{}", json_pretty(&report)?);
    Ok(())
}
