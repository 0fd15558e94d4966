//! Advisory, cross-process exclusive lock over a filesystem path.
//!
//! SQLite's own locking does not coordinate the compound read-then-write
//! sequences this scheduler performs across `queue`/`processing`/`complete`/
//! `waiting` in one logical step, so every multi-statement critical section
//! is wrapped in one of these instead. Grounded on the same `fs2` +
//! sidecar-lock-file pattern the storage pack uses to guard a shared SQLite
//! file across processes.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use farmcore_lib::{FarmError, FarmResult};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Serializes writers on `path` across processes, with bounded wait and an
/// optional priority lane.
///
/// A `priority` acquirer preempts further normal acquirers: once a priority
/// waiter registers, new normal waiters hold back until it either acquires
/// the lock or gives up, modeling spec.md §4.1's two-level wait queue.
#[derive(Debug)]
pub struct ExclusiveLock {
    lock_path: PathBuf,
    priority_waiters: AtomicUsize,
    lag: Mutex<Duration>,
}

/// Held while the critical section runs; unlocks the sidecar file on drop
/// regardless of how the critical section exits (panic, early return, `?`).
pub struct LockGuard<'a> {
    file: File,
    lock: &'a ExclusiveLock,
}

impl std::fmt::Debug for LockGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("lock", &self.lock)
            .finish()
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = fs2::FileExt::unlock(&self.file) {
            tracing::warn!(path = %self.lock.lock_path.display(), %err, "failed to release exclusive lock");
        }
    }
}

impl ExclusiveLock {
    pub fn new(path_to_guard: impl AsRef<Path>) -> Self {
        let mut lock_path = path_to_guard.as_ref().as_os_str().to_owned();
        lock_path.push(".lock");
        Self {
            lock_path: PathBuf::from(lock_path),
            priority_waiters: AtomicUsize::new(0),
            lag: Mutex::new(Duration::ZERO),
        }
    }

    /// Blocks until the path is owned by the caller.
    ///
    /// `max_wait = None` blocks indefinitely. `max_wait = Some(Duration::ZERO)`
    /// tries exactly once, matching the scratch store's non-blocking
    /// `write.lock` discipline (spec.md §4.4).
    pub fn acquire(&self, max_wait: Option<Duration>, priority: bool) -> FarmResult<LockGuard<'_>> {
        let start = Instant::now();
        if priority {
            self.priority_waiters.fetch_add(1, Ordering::SeqCst);
        }
        let result = self.acquire_inner(start, max_wait, priority);
        if priority {
            self.priority_waiters.fetch_sub(1, Ordering::SeqCst);
        }
        result
    }

    fn acquire_inner(
        &self,
        start: Instant,
        max_wait: Option<Duration>,
        priority: bool,
    ) -> FarmResult<LockGuard<'_>> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&self.lock_path)?;

        loop {
            // New normal waiters must not overtake a pending priority waiter.
            let outranked = !priority && self.priority_waiters.load(Ordering::SeqCst) > 0;
            if !outranked {
                match fs2::FileExt::try_lock_exclusive(&file) {
                    Ok(()) => {
                        let lag = start.elapsed();
                        *self.lag.lock().unwrap() = lag;
                        farmcore_metrics::observe_lock_acquire_duration(
                            &self.lock_path.display().to_string(),
                            lag,
                        );
                        return Ok(LockGuard { file, lock: self });
                    }
                    Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {}
                    Err(err) => return Err(FarmError::Io(err)),
                }
            }

            if let Some(max_wait) = max_wait {
                if start.elapsed() >= max_wait {
                    return Err(FarmError::LockTimeout {
                        path: self.lock_path.display().to_string(),
                        waited: start.elapsed(),
                    });
                }
            }

            thread::sleep(POLL_INTERVAL);
        }
    }

    /// The wait observed the last time this lock was acquired. Used by the
    /// Heartbeat staleness predicate and by GC to widen staleness windows so
    /// that a slow acquirer does not falsely declare itself dead.
    pub fn lag(&self) -> Duration {
        *self.lag.lock().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn acquire_releases_on_guard_drop() {
        let dir = tempfile::tempdir().unwrap();
        let lock = ExclusiveLock::new(dir.path().join("work_db.sqlite"));
        {
            let _guard = lock.acquire(Some(Duration::from_secs(1)), false).unwrap();
        }
        // Second acquisition must not block now that the guard was dropped.
        let _guard2 = lock.acquire(Some(Duration::from_millis(200)), false).unwrap();
    }

    #[test]
    fn zero_max_wait_fails_fast_when_held() {
        let dir = tempfile::tempdir().unwrap();
        let lock = Arc::new(ExclusiveLock::new(dir.path().join("write.lock")));
        let held = lock.acquire(None, false).unwrap();
        let err = lock.acquire(Some(Duration::ZERO), false).unwrap_err();
        assert!(matches!(err, FarmError::LockTimeout { .. }));
        drop(held);
    }

    #[test]
    fn priority_waiter_is_served_before_later_normal_waiters() {
        use std::sync::mpsc;

        let dir = tempfile::tempdir().unwrap();
        let lock = Arc::new(ExclusiveLock::new(dir.path().join("work_db.sqlite")));
        let held = lock.acquire(None, false).unwrap();

        let (order_tx, order_rx) = mpsc::channel();

        // Register the priority waiter's intent before spawning the normal
        // waiter, then release the initial holder so both race for the lock.
        let lock_priority = lock.clone();
        let order_tx_priority = order_tx.clone();
        let priority_handle = thread::spawn(move || {
            let _guard = lock_priority.acquire(None, true).unwrap();
            order_tx_priority.send("priority").unwrap();
        });
        thread::sleep(Duration::from_millis(50));

        let lock_normal = lock.clone();
        let normal_handle = thread::spawn(move || {
            let _guard = lock_normal.acquire(None, false).unwrap();
            order_tx.send("normal").unwrap();
        });

        thread::sleep(Duration::from_millis(50));
        drop(held);

        assert_eq!(order_rx.recv().unwrap(), "priority");
        assert_eq!(order_rx.recv().unwrap(), "normal");
        priority_handle.join().unwrap();
        normal_handle.join().unwrap();
    }
}
