//! Bounded worker pool driving many instances through one action.

use crate::concurrency::shutdown_requested;
use crate::instance::Instance;
use crate::{Cause, CoreError};
use galley_schema::{Action, DestroyMode};
use std::fmt;
use std::sync::mpsc::{self, Receiver};
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::Instant;
use tracing::{debug, info, warn};

/// What the runner asks of every instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunAction {
    Create,
    Converge,
    Setup,
    Verify,
    Destroy,
    Test(DestroyMode),
}

impl RunAction {
    pub fn apply(self, instance: &Instance) -> Result<(), CoreError> {
        match self {
            RunAction::Create => instance.create(),
            RunAction::Converge => instance.converge(),
            RunAction::Setup => instance.setup(),
            RunAction::Verify => instance.verify(),
            RunAction::Destroy => instance.destroy(),
            RunAction::Test(mode) => instance.test(mode),
        }
        .map(|_| ())
    }
}

impl From<Action> for RunAction {
    fn from(action: Action) -> Self {
        match action {
            Action::Create => RunAction::Create,
            Action::Converge => RunAction::Converge,
            Action::Setup => RunAction::Setup,
            Action::Verify => RunAction::Verify,
            Action::Destroy => RunAction::Destroy,
        }
    }
}

impl fmt::Display for RunAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunAction::Create => f.write_str("create"),
            RunAction::Converge => f.write_str("converge"),
            RunAction::Setup => f.write_str("setup"),
            RunAction::Verify => f.write_str("verify"),
            RunAction::Destroy => f.write_str("destroy"),
            RunAction::Test(mode) => write!(f, "test (destroy {mode})"),
        }
    }
}

/// Number of workers for `requested` concurrency over `count` instances.
pub fn worker_count(requested: Option<usize>, count: usize) -> usize {
    requested.unwrap_or(1).min(count).max(1)
}

/// Apply `action` to every instance with at most `concurrency` running at once.
///
/// Every worker is joined before returning. A single failure is returned
/// unchanged; several are folded into one `InstanceFailure`. After Ctrl-C no
/// new instances start and the ones left over are reported as not run.
pub fn run(
    action: RunAction,
    instances: &[&Instance],
    concurrency: Option<usize>,
) -> Result<(), CoreError> {
    run_until(action, instances, concurrency, shutdown_requested)
}

/// [`run`] with `stop` polled before each instance is taken off the queue.
pub fn run_until<S>(
    action: RunAction,
    instances: &[&Instance],
    concurrency: Option<usize>,
    stop: S,
) -> Result<(), CoreError>
where
    S: Fn() -> bool + Sync,
{
    if instances.is_empty() {
        return Ok(());
    }
    let workers = worker_count(concurrency, instances.len());
    let start = Instant::now();
    debug!(
        "running {action} on {} instance(s) with {workers} worker(s)",
        instances.len()
    );

    let (tx, rx) = mpsc::channel();
    for instance in instances {
        let _ = tx.send(Some(*instance));
    }
    for _ in 0..workers {
        let _ = tx.send(None);
    }
    drop(tx);
    let queue = Mutex::new(rx);
    let queue = &queue;
    let stop = &stop;

    let mut failures: Vec<(&Instance, CoreError)> = thread::scope(|s| {
        let handles: Vec<_> = (0..workers)
            .map(|_| s.spawn(move || work(queue, action, stop)))
            .collect();
        handles
            .into_iter()
            .flat_map(|h| h.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic)))
            .collect()
    });

    let skipped: Vec<&Instance> = queue
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .try_iter()
        .flatten()
        .collect();

    info!(
        "{action} finished on {} instance(s) ({:.2}s), {} failed, {} not run",
        instances.len() - skipped.len(),
        start.elapsed().as_secs_f64(),
        failures.len(),
        skipped.len()
    );

    if !skipped.is_empty() {
        return Err(interrupted(&skipped, &failures));
    }

    match failures.len() {
        0 => Ok(()),
        1 => Err(failures.remove(0).1),
        n => {
            let names = failures.iter().map(|(i, _)| i.name().clone()).collect();
            let errors: Vec<CoreError> = failures.into_iter().map(|(_, e)| e).collect();
            Err(CoreError::InstanceFailure {
                instances: names,
                message: format!("{n} actions failed"),
                original: Some(Cause::composite(errors)),
            })
        }
    }
}

fn interrupted(skipped: &[&Instance], failures: &[(&Instance, CoreError)]) -> CoreError {
    let mut message = format!(
        "interrupted: {} instance(s) not run: {}",
        skipped.len(),
        joined_names(skipped.iter().copied())
    );
    if !failures.is_empty() {
        message = format!(
            "{message}; {} failed before the interruption: {}",
            failures.len(),
            joined_names(failures.iter().map(|(i, _)| *i))
        );
    }
    CoreError::User(message)
}

fn joined_names<'a>(instances: impl Iterator<Item = &'a Instance>) -> String {
    instances
        .map(|i| i.name().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn work<'a, S>(
    queue: &Mutex<Receiver<Option<&'a Instance>>>,
    action: RunAction,
    stop: &S,
) -> Vec<(&'a Instance, CoreError)>
where
    S: Fn() -> bool,
{
    let mut failures = Vec::new();
    loop {
        if stop() {
            warn!("shutdown requested, not starting any more instances");
            break;
        }
        let next = queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .recv();
        let Ok(Some(instance)) = next else {
            break;
        };
        if let Err(e) = action.apply(instance) {
            warn!("{action} failed on {}: {e}", instance.name());
            failures.push((instance, e));
        }
    }
    failures
}
