//! Turning a failed run into terminal output, log lines and an exit code.

use crate::{CoreError, ErrorKind};
use console::style;
use std::error::Error as StdError;
use std::process::ExitCode;
use tracing::{debug, error};

/// Exit status when instances failed in an expected way.
pub const EXIT_INSTANCE_FAILURE: u8 = 10;
/// Exit status for every other error.
pub const EXIT_FATAL: u8 = 20;

const LOG_HINT: &str = "Please see .galley/logs/galley.log for more details";
const DIAGNOSE_HINT: &str = "Also try running `galley diagnose` for configuration";

pub fn exit_code(err: &CoreError) -> u8 {
    if err.is_transient() {
        EXIT_INSTANCE_FAILURE
    } else {
        EXIT_FATAL
    }
}

/// Run `f`, reporting any error it returns, and map the outcome to an exit code.
pub fn with_friendly_errors<F>(f: F) -> ExitCode
where
    F: FnOnce() -> Result<(), CoreError>,
{
    match f() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            report(&err);
            ExitCode::from(exit_code(&err))
        }
    }
}

fn report(err: &CoreError) {
    let lines = format_error(err);
    for line in &lines {
        eprintln!("{}", style(format!(">>>>>> {line}")).red().for_stderr());
        error!(target: "galley::report", "{line}");
    }
    if err.is_transient() {
        for line in format_chain(err) {
            debug!(target: "galley::report", "{line}");
        }
    }
}

/// The lines shown for `err`.
///
/// Instance failures get a terse summary naming each failed branch; anything
/// else gets the whole cause chain and pointers to the log and `diagnose`.
pub fn format_error(err: &CoreError) -> Vec<String> {
    let mut lines = vec![
        "------Exception-------".to_owned(),
        format!("Class: {}", err.kind()),
    ];
    lines.extend(message_lines(&err.to_string()));

    if err.is_transient() {
        if let Some(cause) = err.original() {
            for branch in cause.errors() {
                lines.push(format!("    {branch}"));
            }
        }
        lines.push("----------------------".to_owned());
    } else {
        lines.extend(format_chain(err));
        lines.push("----------------------".to_owned());
        lines.push(LOG_HINT.to_owned());
        lines.push(DIAGNOSE_HINT.to_owned());
    }
    lines
}

fn message_lines(message: &str) -> Vec<String> {
    let mut lines = message.lines();
    let first = lines.next().unwrap_or_default();
    std::iter::once(format!("Message: {first}"))
        .chain(lines.map(str::to_owned))
        .collect()
}

/// Every nested cause of `err`, expanding composite causes branch by branch.
fn format_chain(err: &CoreError) -> Vec<String> {
    let mut lines = Vec::new();
    for nested in nested_of_core(err) {
        push_nested(nested, &mut lines);
    }
    lines
}

fn nested_of_core(err: &CoreError) -> Vec<&(dyn StdError + 'static)> {
    match err.original() {
        Some(cause) => cause.errors(),
        None => err.source().into_iter().collect(),
    }
}

fn push_nested(err: &(dyn StdError + 'static), lines: &mut Vec<String>) {
    lines.push("---Nested Exception---".to_owned());
    match err.downcast_ref::<CoreError>() {
        Some(core) => {
            lines.push(format!("Class: {}", core.kind()));
            lines.extend(message_lines(&core.to_string()));
            for nested in nested_of_core(core) {
                push_nested(nested, lines);
            }
        }
        None => {
            lines.push(format!("Class: {}", ErrorKind::Internal));
            lines.extend(message_lines(&err.to_string()));
            if let Some(source) = err.source() {
                push_nested(source, lines);
            }
        }
    }
}
