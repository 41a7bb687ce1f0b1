use crate::CoreError;
use fs2::FileExt;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, RwLock};

/// Advisory exclusive lock on one instance's state, held for a whole
/// lifecycle operation so two processes never race on the same state file.
pub struct StateLock {
    lock_file: File,
}

impl StateLock {
    fn open(lock_path: &Path) -> Result<File, CoreError> {
        if let Some(parent) = lock_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        Ok(OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(lock_path)?)
    }

    pub fn acquire(lock_path: &Path) -> Result<Self, CoreError> {
        let file = Self::open(lock_path)?;

        file.lock_exclusive()?;

        Ok(Self { lock_file: file })
    }

    /// `None` when another holder has the lock; any other locking failure is an error.
    pub fn try_acquire(lock_path: &Path) -> Result<Option<Self>, CoreError> {
        let file = Self::open(lock_path)?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self { lock_file: file })),
            Err(e) if is_contended(&e) => Ok(None),
            Err(e) => Err(CoreError::Io(e)),
        }
    }
}

fn is_contended(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
        || (err.raw_os_error().is_some()
            && err.raw_os_error() == fs2::lock_contended_error().raw_os_error())
}

impl Drop for StateLock {
    fn drop(&mut self) {
        let _ = self.lock_file.unlock();
    }
}

type DriverLocks = RwLock<HashMap<String, Arc<Mutex<()>>>>;

fn driver_locks() -> &'static DriverLocks {
    static LOCKS: OnceLock<DriverLocks> = OnceLock::new();
    LOCKS.get_or_init(|| RwLock::new(HashMap::new()))
}

/// The process-wide mutex shared by every instance of one driver type.
///
/// Created on first request; later requests for the same type get the same lock.
pub fn driver_lock(driver: &str) -> Arc<Mutex<()>> {
    if let Some(lock) = driver_locks()
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(driver)
    {
        return Arc::clone(lock);
    }

    let mut locks = driver_locks()
        .write()
        .unwrap_or_else(PoisonError::into_inner);
    Arc::clone(
        locks
            .entry(driver.to_owned())
            .or_insert_with(|| Arc::new(Mutex::new(()))),
    )
}

static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

pub fn install_signal_handler() {
    let _ = ctrlc::set_handler(move || {
        if SHUTDOWN_REQUESTED.load(Ordering::SeqCst) {
            std::process::exit(1);
        }
        SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
        eprintln!("\nshutdown requested, finishing in-flight instances...");
    });
}

pub fn shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::SeqCst)
}
