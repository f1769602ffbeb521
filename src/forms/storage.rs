// Persistence primitives: atomic JSON files and per-form write locks.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use fs2::FileExt;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use tempfile::NamedTempFile;

use crate::forms::*;

/// Writes a value as JSON. The file is either fully replaced or left untouched: the
/// data goes to a temporary file in the same directory, which is then renamed.
pub fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> FormsResult<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let ps = || parent.display().to_string();
    fs::create_dir_all(parent).context(IoSnafu { path: ps() })?;
    let bytes = serde_json::to_vec_pretty(value).context(WritingJsonSnafu {})?;

    let mut tmp = NamedTempFile::new_in(parent).context(IoSnafu { path: ps() })?;
    tmp.write_all(&bytes).context(IoSnafu { path: ps() })?;
    tmp.as_file().sync_all().context(IoSnafu { path: ps() })?;
    tmp.persist(path).map_err(|e| FormsError::ConcurrentWriteConflict {
        target: path.display().to_string(),
        reason: e.error.to_string(),
    })?;
    debug!("atomic_write_json: wrote {} bytes to {:?}", bytes.len(), path);
    Ok(())
}

/// Reads a JSON file, or `None` if it does not exist.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> FormsResult<Option<T>> {
    let contents = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(e).context(IoSnafu {
                path: path.display().to_string(),
            })
        }
    };
    let value: T = serde_json::from_str(&contents).context(ParsingJsonSnafu {
        path: path.display().to_string(),
    })?;
    Ok(Some(value))
}

const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(10);

/// One write lock per form. Writers that cannot get the lock in time give up with a
/// [`FormsError::ConcurrentWriteConflict`] rather than waiting forever.
///
/// A lock is a mutex for the threads of this process, plus an exclusive advisory lock
/// on `<dir>/<form id>.lock` for the other processes working on the same data
/// directory.
#[derive(Debug)]
pub struct FormLocks {
    dir: PathBuf,
    locks: Mutex<HashMap<SchemaId, Arc<Mutex<()>>>>,
    timeout: Duration,
}

impl FormLocks {
    pub fn new(dir: PathBuf, timeout: Duration) -> FormLocks {
        FormLocks {
            dir,
            locks: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    fn lock_for(&self, id: &SchemaId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock();
        locks.entry(id.clone()).or_default().clone()
    }

    fn timed_out(&self, id: &SchemaId) -> FormsError {
        warn!("with_lock: timed out waiting for the lock of form {}", id);
        FormsError::ConcurrentWriteConflict {
            target: id.to_string(),
            reason: format!("lock not acquired within {:?}", self.timeout),
        }
    }

    /// Opens the lock file of the form and locks it, retrying until `deadline`.
    /// The lock is released when the returned file is dropped.
    fn lock_file(&self, id: &SchemaId, deadline: Instant) -> FormsResult<fs::File> {
        let ds = || self.dir.display().to_string();
        fs::create_dir_all(&self.dir).context(IoSnafu { path: ds() })?;
        let path = self.dir.join(format!("{}.lock", id));
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .context(IoSnafu {
                path: path.display().to_string(),
            })?;
        loop {
            match FileExt::try_lock_exclusive(&file) {
                Ok(()) => return Ok(file),
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    if Instant::now() >= deadline {
                        return Err(self.timed_out(id));
                    }
                    thread::sleep(LOCK_RETRY_INTERVAL);
                }
                Err(e) => {
                    return Err(e).context(IoSnafu {
                        path: path.display().to_string(),
                    })
                }
            }
        }
    }

    /// Runs `f` while holding the lock of the form.
    pub fn with_lock<T>(
        &self,
        id: &SchemaId,
        f: impl FnOnce() -> FormsResult<T>,
    ) -> FormsResult<T> {
        let deadline = Instant::now() + self.timeout;
        let lock = self.lock_for(id);
        let _guard = match lock.try_lock_until(deadline) {
            Some(g) => g,
            None => return Err(self.timed_out(id)),
        };
        let file = self.lock_file(id, deadline)?;
        let res = f();
        if let Err(e) = FileExt::unlock(&file) {
            debug!("with_lock: unlocking form {}: {}", id, e);
        }
        res
    }
}
