//! Terminal and project log output.
//!
//! Progress goes to stderr filtered by `GALLEY_LOG` or the level flags.
//! Projects also get `.galley/logs/galley.log` at debug level, which keeps the
//! detail that the terse terminal report leaves out.

use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

pub const LOG_ENV: &str = "GALLEY_LOG";

fn default_level(verbose: bool, trace: bool) -> &'static str {
    if trace {
        "trace"
    } else if verbose {
        "debug"
    } else {
        "info"
    }
}

/// Directives for the stderr layer. Report lines are already printed by the
/// error reporter, so their log copies stay out of the terminal.
fn stderr_directives(env: Option<&str>, verbose: bool, trace: bool) -> String {
    let base = env
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default_level(verbose, trace));
    format!("{base},galley::report=off")
}

fn open_log(path: &Path) -> Option<File> {
    OpenOptions::new().create(true).append(true).open(path).ok()
}

pub fn init(log_file: Option<&Path>, verbose: bool, trace: bool) {
    let env = std::env::var(LOG_ENV).ok();
    let directives = stderr_directives(env.as_deref(), verbose, trace);
    let stderr_filter = EnvFilter::try_new(&directives)
        .unwrap_or_else(|_| EnvFilter::new(stderr_directives(None, verbose, trace)));

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .with_filter(stderr_filter);

    let file_level = if trace {
        LevelFilter::TRACE
    } else {
        LevelFilter::DEBUG
    };
    let file_layer = log_file.and_then(open_log).map(|file| {
        fmt::layer()
            .with_writer(Mutex::new(file))
            .with_ansi(false)
            .with_filter(file_level)
    });

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .init();
}
