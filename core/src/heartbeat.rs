//! Liveness registry shared by masters and workers.
//!
//! Grounded on `task_manager/src/adv_sqlite.rs`'s `TaskDb::open_or_create`
//! (exclusive-locking PRAGMAs, create-on-first-use) generalized to the
//! single append-only `heartbeat` table spec.md §4.2 describes.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::Utc;
use farmcore_lib::{FarmResult, ThreadType};
use rusqlite::{Connection, OpenFlags};

use crate::lock::ExclusiveLock;

/// Upper bound on how long the pulser sleeps between stop-flag checks, so
/// that stopping a heartbeat with a long `heartrate` (minutes) does not
/// block `end()`/`Drop` for the full interval.
const PULSER_POLL_INTERVAL: Duration = Duration::from_millis(200);

fn open(path: &Path) -> rusqlite::Result<Connection> {
    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_WRITE)?;
    conn.pragma_update(None, "locking_mode", "EXCLUSIVE")?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    Ok(conn)
}

fn create(path: &Path) -> rusqlite::Result<Connection> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
    )?;
    conn.pragma_update(None, "locking_mode", "EXCLUSIVE")?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.execute_batch(
        r#"
        CREATE TABLE heartbeat(
          thread_id INTEGER PRIMARY KEY AUTOINCREMENT,
          thread_type TEXT NOT NULL,
          pulse INTEGER NOT NULL
        );
        "#,
    )?;
    Ok(conn)
}

/// Wraps `heartbeat_db.sqlite`: row insertion, pulse updates, and the
/// staleness snapshot GC needs.
pub struct HeartbeatDb {
    conn: Mutex<Connection>,
    lock: ExclusiveLock,
    path: PathBuf,
}

/// One row in the `heartbeat` table: a participant's thread_id and the last
/// timestamp it observed stored there (used for the GC staleness snapshot).
#[derive(Debug, Clone)]
pub struct HeartbeatRow {
    pub thread_id: i64,
    pub thread_type: ThreadType,
    pub pulse: i64,
}

impl HeartbeatDb {
    pub fn open_or_create(path: impl Into<PathBuf>) -> FarmResult<Self> {
        let path = path.into();
        let conn = if path.exists() { open(&path)? } else { create(&path)? };
        let lock = ExclusiveLock::new(&path);
        Ok(Self {
            conn: Mutex::new(conn),
            lock,
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The lag observed on the most recent lock acquisition against this
    /// database, used to widen the staleness window (spec.md §4.2).
    pub fn lag(&self) -> Duration {
        self.lock.lag()
    }

    fn insert_row(&self, thread_type: ThreadType) -> FarmResult<i64> {
        let _guard = self.lock.acquire(None, false)?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO heartbeat(thread_type, pulse) VALUES (?1, ?2)",
            rusqlite::params![thread_type.to_string(), Utc::now().timestamp()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn update_pulse(&self, thread_id: i64) -> FarmResult<()> {
        let _guard = self.lock.acquire(None, false)?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE heartbeat SET pulse = ?1 WHERE thread_id = ?2",
            rusqlite::params![Utc::now().timestamp(), thread_id],
        )?;
        Ok(())
    }

    fn delete_row(&self, thread_id: i64) -> FarmResult<()> {
        let _guard = self.lock.acquire(None, false)?;
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM heartbeat WHERE thread_id = ?1", [thread_id])?;
        Ok(())
    }

    /// All live rows as of this call, used by GC to compute `dead_masters`
    /// and by the worker loop to find the most recent master pulse.
    pub fn snapshot(&self) -> FarmResult<Vec<HeartbeatRow>> {
        let _guard = self.lock.acquire(None, false)?;
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT thread_id, thread_type, pulse FROM heartbeat")?;
        let rows = stmt
            .query_map([], |row| {
                let thread_type_raw: String = row.get(1)?;
                Ok((row.get::<_, i64>(0)?, thread_type_raw, row.get::<_, i64>(2)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows
            .into_iter()
            .filter_map(|(thread_id, thread_type_raw, pulse)| {
                thread_type_raw.parse().ok().map(|thread_type| HeartbeatRow {
                    thread_id,
                    thread_type,
                    pulse,
                })
            })
            .collect())
    }

    pub fn delete_stale(&self, dead_thread_wait: Duration) -> FarmResult<Vec<HeartbeatRow>> {
        let stale_before = Utc::now().timestamp() - dead_thread_wait.as_secs() as i64 - self.lag().as_secs() as i64;
        let _guard = self.lock.acquire(None, false)?;
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT thread_id, thread_type, pulse FROM heartbeat WHERE pulse < ?1")?;
        let stale = stmt
            .query_map([stale_before], |row| {
                let thread_type_raw: String = row.get(1)?;
                Ok((row.get::<_, i64>(0)?, thread_type_raw, row.get::<_, i64>(2)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        conn.execute("DELETE FROM heartbeat WHERE pulse < ?1", [stale_before])?;
        Ok(stale
            .into_iter()
            .filter_map(|(thread_id, thread_type_raw, pulse)| {
                thread_type_raw.parse().ok().map(|thread_type| HeartbeatRow {
                    thread_id,
                    thread_type,
                    pulse,
                })
            })
            .collect())
    }
}

/// A scoped heartbeat: inserts its row on construction, starts a pulser
/// thread at `heartrate`, and removes its row on `end()`/`Drop`.
pub struct Heartbeat {
    db: Arc<HeartbeatDb>,
    thread_id: i64,
    stop: Arc<AtomicBool>,
    pulser: Option<JoinHandle<()>>,
}

impl Heartbeat {
    pub fn start(db: Arc<HeartbeatDb>, thread_type: ThreadType, heartrate: Duration) -> FarmResult<Self> {
        let thread_id = db.insert_row(thread_type)?;
        let stop = Arc::new(AtomicBool::new(false));

        let pulser_db = db.clone();
        let pulser_stop = stop.clone();
        let pulser = thread::spawn(move || {
            let mut waited = Duration::ZERO;
            while !pulser_stop.load(Ordering::SeqCst) {
                if waited < heartrate {
                    thread::sleep(PULSER_POLL_INTERVAL.min(heartrate - waited));
                    waited += PULSER_POLL_INTERVAL;
                    continue;
                }
                waited = Duration::ZERO;
                if let Err(err) = pulser_db.update_pulse(thread_id) {
                    tracing::warn!(thread_id, %err, "failed to update pulse");
                }
            }
        });

        tracing::info!(thread_id, %thread_type, "heartbeat started");
        Ok(Self {
            db,
            thread_id,
            stop,
            pulser: Some(pulser),
        })
    }

    pub fn thread_id(&self) -> i64 {
        self.thread_id
    }

    pub fn end(mut self) -> FarmResult<()> {
        self.stop_pulser();
        self.db.delete_row(self.thread_id)
    }

    fn stop_pulser(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.pulser.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.stop_pulser();
        if let Err(err) = self.db.delete_row(self.thread_id) {
            tracing::warn!(thread_id = self.thread_id, %err, "failed to remove heartbeat row on drop");
        }
    }
}

/// True when `pulse < now - dead_thread_wait - lag`, per spec.md §4.2.
pub fn is_stale(pulse: i64, dead_thread_wait: Duration, lag: Duration) -> bool {
    let threshold = Utc::now().timestamp() - dead_thread_wait.as_secs() as i64 - lag.as_secs() as i64;
    pulse < threshold
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_assigns_row_and_end_removes_it() {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(HeartbeatDb::open_or_create(dir.path().join("heartbeat_db.sqlite")).unwrap());

        let hb = Heartbeat::start(db.clone(), ThreadType::Worker, Duration::from_secs(60)).unwrap();
        let thread_id = hb.thread_id();
        let rows = db.snapshot().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].thread_id, thread_id);

        hb.end().unwrap();
        assert!(db.snapshot().unwrap().is_empty());
    }

    #[test]
    fn dropping_without_end_still_removes_the_row() {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(HeartbeatDb::open_or_create(dir.path().join("heartbeat_db.sqlite")).unwrap());
        {
            let _hb = Heartbeat::start(db.clone(), ThreadType::Master, Duration::from_secs(60)).unwrap();
            assert_eq!(db.snapshot().unwrap().len(), 1);
        }
        assert!(db.snapshot().unwrap().is_empty());
    }

    #[test]
    fn stale_predicate_honors_lag() {
        let now = Utc::now().timestamp();
        let old_pulse = now - 200;
        assert!(is_stale(old_pulse, Duration::from_secs(120), Duration::ZERO));
        assert!(!is_stale(old_pulse, Duration::from_secs(120), Duration::from_secs(100)));
    }

    #[test]
    fn delete_stale_removes_only_expired_rows() {
        let dir = tempfile::tempdir().unwrap();
        let db = HeartbeatDb::open_or_create(dir.path().join("heartbeat_db.sqlite")).unwrap();
        let fresh_id = db.insert_row(ThreadType::Worker).unwrap();
        let stale_id = db.insert_row(ThreadType::Master).unwrap();
        {
            let conn = db.conn.lock().unwrap();
            conn.execute(
                "UPDATE heartbeat SET pulse = ?1 WHERE thread_id = ?2",
                rusqlite::params![Utc::now().timestamp() - 10_000, stale_id],
            )
            .unwrap();
        }

        let stale = db.delete_stale(Duration::from_secs(120)).unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].thread_id, stale_id);

        let remaining = db.snapshot().unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].thread_id, fresh_id);
    }
}
