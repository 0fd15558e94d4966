//! The four-table queue state machine (spec.md §3, §4.3): `queue`,
//! `processing`, `complete`, `waiting`.
//!
//! Grounded on `task_manager/src/adv_sqlite.rs`'s `TaskDb` (open-or-create,
//! exclusive-locking PRAGMAs) and on `taskdb/src/lib.rs`'s status-table
//! shape, generalized from a single proving-task table to the job/sub-job
//! fan-out/fan-in protocol this scheduler needs. Every write-bearing method
//! wraps its statements in one `ExclusiveLock` acquisition on the work DB
//! path, matching spec.md §4.3's "all state transitions are performed
//! inside an ExclusiveLock on the work DB."

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use farmcore_lib::{FarmResult, JobHash, JobParams};
use rusqlite::{Connection, OpenFlags};

use crate::lock::ExclusiveLock;

fn pragmas(conn: &Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "locking_mode", "EXCLUSIVE")?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    Ok(())
}

fn open(path: &Path) -> rusqlite::Result<Connection> {
    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_WRITE)?;
    pragmas(&conn)?;
    Ok(conn)
}

fn create(path: &Path) -> rusqlite::Result<Connection> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
    )?;
    pragmas(&conn)?;
    conn.execute_batch(
        r#"
        CREATE TABLE metadata(
          key TEXT UNIQUE NOT NULL PRIMARY KEY,
          value TEXT
        );
        INSERT INTO metadata(key, value) VALUES ('schema_version', '1');

        CREATE TABLE queue(
          hash TEXT UNIQUE NOT NULL PRIMARY KEY,
          id_hash TEXT NOT NULL,
          master_id INTEGER NOT NULL,
          params TEXT NOT NULL
        );

        CREATE TABLE processing(
          hash TEXT UNIQUE NOT NULL PRIMARY KEY,
          id_hash TEXT NOT NULL,
          worker_id INTEGER NOT NULL,
          master_id INTEGER NOT NULL
        );

        CREATE TABLE complete(
          hash TEXT UNIQUE NOT NULL PRIMARY KEY,
          id_hash TEXT NOT NULL,
          master_id INTEGER NOT NULL
        );

        CREATE TABLE waiting(
          id_hash TEXT NOT NULL,
          master_id INTEGER NOT NULL,
          PRIMARY KEY (id_hash, master_id)
        );
        "#,
    )?;
    Ok(conn)
}

/// What `publish_complete` actually did, so callers (the fan-in step in
/// particular) can decide whether to proceed with sibling cleanup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// This call inserted the `complete` row.
    Published,
    /// A `complete` row already existed (two workers raced the fan-in tie
    /// break of spec.md §4.6; the loser continues without republishing).
    AlreadyPublished,
    /// No master is waiting on this `id_hash` any more; nothing was
    /// published and the caller should discard its outputs.
    NoWaiters,
}

/// A job pulled off `queue`, now owned by the claiming worker.
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub hash: JobHash,
    pub params: JobParams,
}

/// Wraps `work_db.sqlite`.
pub struct QueueStore {
    conn: Mutex<Connection>,
    lock: ExclusiveLock,
    path: PathBuf,
}

impl QueueStore {
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

    pub fn lag(&self) -> std::time::Duration {
        self.lock.lag()
    }

    /// Insert `id_hash` into `queue` and register `master_id` in `waiting`.
    /// Idempotent: re-enqueuing the same `id_hash` is a no-op on the
    /// primary-key constraint.
    pub fn enqueue_primary(&self, id_hash: &str, params: &JobParams, master_id: i64) -> FarmResult<()> {
        let hash = JobHash::primary(id_hash.to_string());
        let _guard = self.lock.acquire(None, false)?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO waiting(id_hash, master_id) VALUES (?1, ?2)",
            rusqlite::params![id_hash, master_id],
        )?;
        conn.execute(
            "INSERT OR IGNORE INTO queue(hash, id_hash, master_id, params) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![hash.to_string(), id_hash, master_id, serde_json::to_string(params)?],
        )?;
        farmcore_metrics::inc_jobs_enqueued();
        tracing::debug!(id_hash, master_id, "enqueued primary job");
        Ok(())
    }

    /// Claim one row from `queue`, acquired with priority so that workers
    /// do not starve behind GC passes competing for the same lock.
    pub fn claim_one(&self, worker_id: i64) -> FarmResult<Option<ClaimedJob>> {
        let _guard = self.lock.acquire(None, true)?;
        let conn = self.conn.lock().unwrap();

        loop {
            let row: Option<(String, String, String)> = conn
                .query_row(
                    "SELECT hash, id_hash, params FROM queue ORDER BY rowid LIMIT 1",
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .ok();

            let Some((hash_str, id_hash, params_raw)) = row else {
                return Ok(None);
            };

            let hash: JobHash = hash_str.parse().map_err(|_| {
                farmcore_lib::FarmError::BrokenInvariant(format!("malformed queue hash {hash_str}"))
            })?;

            let already_processing: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM processing WHERE hash = ?1)",
                [&hash_str],
                |row| row.get(0),
            )?;
            if already_processing {
                // Edge policy (spec.md §4.3): a pre-existing `processing` row
                // for this hash means a partially failed GC left a stale
                // queue row behind. Drop this row from the running claim
                // attempt and let GC clean it up instead of retrying forever.
                conn.execute("DELETE FROM queue WHERE hash = ?1", [&hash_str])?;
                continue;
            }

            let master_id: i64 = conn.query_row(
                "SELECT master_id FROM queue WHERE hash = ?1",
                [&hash_str],
                |row| row.get(0),
            )?;

            conn.execute("DELETE FROM queue WHERE hash = ?1", [&hash_str])?;
            conn.execute(
                "INSERT INTO processing(hash, id_hash, worker_id, master_id) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![hash_str, id_hash, worker_id, master_id],
            )?;

            let params: JobParams = serde_json::from_str(&params_raw)?;
            farmcore_metrics::inc_jobs_claimed(if hash.is_primary() { "primary" } else { "subjob" });
            tracing::debug!(%hash, worker_id, "claimed job");
            return Ok(Some(ClaimedJob { hash, params }));
        }
    }

    /// Publish a `complete` row for `hash` if a master is still waiting on
    /// its `id_hash` and the matching `processing` row still exists. For
    /// primary hashes, also removes any lingering sub-job `complete` rows
    /// (spec.md §4.3).
    ///
    /// Ownership of the `processing` row is checked by `worker_id` for
    /// sub-jobs, but not for the primary fan-in publish: a primary's
    /// `processing` row is created by the worker that claimed/split the
    /// job, while the fan-in publish is issued by whichever worker finishes
    /// the *last* sibling sub-job, which is generally a different worker.
    /// Matches the original `process_final_results`, which gates the
    /// primary publish on `processing WHERE hash=id_hash` with no
    /// worker filter.
    pub fn publish_complete(&self, hash: &JobHash, worker_id: i64, master_id: i64) -> FarmResult<PublishOutcome> {
        let hash_str = hash.to_string();
        let _guard = self.lock.acquire(None, false)?;
        let conn = self.conn.lock().unwrap();

        let has_waiter: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM waiting WHERE id_hash = ?1)",
            [&hash.id_hash],
            |row| row.get(0),
        )?;
        if !has_waiter {
            conn.execute("DELETE FROM processing WHERE hash = ?1", [&hash_str])?;
            tracing::debug!(%hash, "no waiters left, discarding result");
            return Ok(PublishOutcome::NoWaiters);
        }

        let owns: bool = if hash.is_primary() {
            conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM processing WHERE hash = ?1)",
                [&hash_str],
                |row| row.get(0),
            )?
        } else {
            conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM processing WHERE hash = ?1 AND worker_id = ?2)",
                rusqlite::params![hash_str, worker_id],
                |row| row.get(0),
            )?
        };
        if !owns {
            return Ok(PublishOutcome::AlreadyPublished);
        }

        let inserted = conn.execute(
            "INSERT OR IGNORE INTO complete(hash, id_hash, master_id) VALUES (?1, ?2, ?3)",
            rusqlite::params![hash_str, hash.id_hash, master_id],
        )?;
        conn.execute("DELETE FROM processing WHERE hash = ?1", [&hash_str])?;

        if hash.is_primary() {
            conn.execute(
                "DELETE FROM complete WHERE hash LIKE ?1",
                [hash.sibling_glob()],
            )?;
        }

        if inserted == 0 {
            tracing::debug!(%hash, "complete row already present, skipping republish");
            Ok(PublishOutcome::AlreadyPublished)
        } else {
            tracing::debug!(%hash, "published complete");
            Ok(PublishOutcome::Published)
        }
    }

    /// Remove `id_hash` from all four tables. Caller is responsible for
    /// deleting the corresponding scratch files.
    pub fn cancel(&self, id_hash: &str) -> FarmResult<()> {
        let _guard = self.lock.acquire(None, false)?;
        let conn = self.conn.lock().unwrap();
        let subjob_glob = format!("%_{id_hash}");
        conn.execute(
            "DELETE FROM queue WHERE id_hash = ?1 OR hash LIKE ?2",
            rusqlite::params![id_hash, subjob_glob],
        )?;
        conn.execute(
            "DELETE FROM processing WHERE id_hash = ?1 OR hash LIKE ?2",
            rusqlite::params![id_hash, subjob_glob],
        )?;
        conn.execute(
            "DELETE FROM complete WHERE id_hash = ?1 OR hash LIKE ?2",
            rusqlite::params![id_hash, subjob_glob],
        )?;
        conn.execute("DELETE FROM waiting WHERE id_hash = ?1", [id_hash])?;
        Ok(())
    }

    /// Remove only the `processing` row for `hash`, used when a worker
    /// loses ownership mid-flight (spec.md §4.3).
    pub fn abandon(&self, hash: &JobHash, worker_id: i64) -> FarmResult<()> {
        let _guard = self.lock.acquire(None, false)?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM processing WHERE hash = ?1 AND worker_id = ?2",
            rusqlite::params![hash.to_string(), worker_id],
        )?;
        Ok(())
    }

    /// Remove every `processing` row owned by `worker_id`, used when a
    /// worker terminates (spec.md §7: "every exit goes through
    /// `terminate(reason)` which removes the worker's `processing` rows").
    pub fn abandon_all(&self, worker_id: i64) -> FarmResult<()> {
        let _guard = self.lock.acquire(None, false)?;
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM processing WHERE worker_id = ?1", [worker_id])?;
        Ok(())
    }

    /// Count of `complete` rows for sub-jobs of `id_hash`, used by the
    /// sub-job planner's fan-in step.
    pub fn count_sibling_completions(&self, id_hash: &str) -> FarmResult<i64> {
        let _guard = self.lock.acquire(None, false)?;
        let conn = self.conn.lock().unwrap();
        let count = conn.query_row(
            "SELECT COUNT(*) FROM complete WHERE hash LIKE ?1",
            [format!("%_{id_hash}")],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Atomically insert sub-job chunks `2..=num_subjobs` into `queue` and a
    /// `processing` row for chunk 1, owned by the splitting worker (spec.md
    /// §4.6). Chunk 1 is retained by the caller; it is not inserted into
    /// `queue`.
    pub fn split_into_subjobs(
        &self,
        id_hash: &str,
        params: &JobParams,
        master_id: i64,
        worker_id: i64,
        num_subjobs: u32,
    ) -> FarmResult<()> {
        let params_raw = serde_json::to_string(params)?;
        let _guard = self.lock.acquire(None, false)?;
        let conn = self.conn.lock().unwrap();

        for subjob_num in 2..=num_subjobs {
            let hash = JobHash::subjob(id_hash.to_string(), subjob_num, num_subjobs);
            conn.execute(
                "INSERT INTO queue(hash, id_hash, master_id, params) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![hash.to_string(), id_hash, master_id, params_raw],
            )?;
        }

        let retained = JobHash::subjob(id_hash.to_string(), 1, num_subjobs);
        conn.execute(
            "INSERT INTO processing(hash, id_hash, worker_id, master_id) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![retained.to_string(), id_hash, worker_id, master_id],
        )?;

        farmcore_metrics::inc_jobs_split();
        tracing::info!(id_hash, num_subjobs, "split primary job into sub-jobs");
        Ok(())
    }

    /// True if there is at least one row in `waiting` for `id_hash`. Used by
    /// the worker to decide whether a job-level cancellation happened
    /// concurrently with processing (spec.md §5 "Cancellation").
    pub fn has_waiters(&self, id_hash: &str) -> FarmResult<bool> {
        let _guard = self.lock.acquire(None, false)?;
        let conn = self.conn.lock().unwrap();
        Ok(conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM waiting WHERE id_hash = ?1)",
            [id_hash],
            |row| row.get(0),
        )?)
    }

    /// Master-facing: true and removes the `complete`/`waiting` rows if a
    /// result for `id_hash` is ready for `master_id`.
    pub fn collect_complete(&self, id_hash: &str, master_id: i64) -> FarmResult<bool> {
        let _guard = self.lock.acquire(None, false)?;
        let conn = self.conn.lock().unwrap();
        let ready: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM complete WHERE id_hash = ?1)",
            [id_hash],
            |row| row.get(0),
        )?;
        if !ready {
            return Ok(false);
        }
        conn.execute("DELETE FROM complete WHERE id_hash = ?1", [id_hash])?;
        conn.execute(
            "DELETE FROM waiting WHERE id_hash = ?1 AND master_id = ?2",
            rusqlite::params![id_hash, master_id],
        )?;
        Ok(true)
    }

    /// All distinct `master_id`s referenced anywhere in the four tables,
    /// used by GC to compute `dead_masters`.
    pub fn referenced_master_ids(&self) -> FarmResult<Vec<i64>> {
        let _guard = self.lock.acquire(None, false)?;
        let conn = self.conn.lock().unwrap();
        let mut ids = std::collections::BTreeSet::new();
        for table in ["queue", "processing", "complete", "waiting"] {
            let mut stmt = conn.prepare(&format!("SELECT DISTINCT master_id FROM {table}"))?;
            let rows = stmt.query_map([], |row| row.get::<_, i64>(0))?;
            for id in rows {
                ids.insert(id?);
            }
        }
        Ok(ids.into_iter().collect())
    }

    /// Delete every row across the four tables whose `master_id` is in
    /// `dead_masters`, returning the distinct `id_hash`es touched so the
    /// caller can clean up scratch files (spec.md §4.5 steps 3-4).
    pub fn delete_rows_for_dead_masters(&self, dead_masters: &[i64]) -> FarmResult<Vec<String>> {
        if dead_masters.is_empty() {
            return Ok(Vec::new());
        }
        let _guard = self.lock.acquire(None, false)?;
        let conn = self.conn.lock().unwrap();
        let placeholders = dead_masters.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let mut dead_hashes = std::collections::BTreeSet::new();

        for table in ["queue", "processing", "complete"] {
            let sql = format!("SELECT id_hash FROM {table} WHERE master_id IN ({placeholders})");
            let mut stmt = conn.prepare(&sql)?;
            let params = rusqlite::params_from_iter(dead_masters.iter());
            let rows = stmt.query_map(params, |row| row.get::<_, String>(0))?;
            for id_hash in rows {
                dead_hashes.insert(id_hash?);
            }
            let sql = format!("DELETE FROM {table} WHERE master_id IN ({placeholders})");
            conn.execute(&sql, rusqlite::params_from_iter(dead_masters.iter()))?;
        }

        let sql = format!("DELETE FROM waiting WHERE master_id IN ({placeholders})");
        conn.execute(&sql, rusqlite::params_from_iter(dead_masters.iter()))?;

        Ok(dead_hashes.into_iter().collect())
    }

    /// Delete `processing` rows owned by stale workers (spec.md §4.5 step
    /// 5), returning the `id_hash`es touched.
    pub fn delete_processing_for_stale_workers(&self, stale_workers: &[i64]) -> FarmResult<Vec<String>> {
        if stale_workers.is_empty() {
            return Ok(Vec::new());
        }
        let _guard = self.lock.acquire(None, false)?;
        let conn = self.conn.lock().unwrap();
        let placeholders = stale_workers.iter().map(|_| "?").collect::<Vec<_>>().join(",");

        let sql = format!("SELECT id_hash FROM processing WHERE worker_id IN ({placeholders})");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(stale_workers.iter()), |row| {
            row.get::<_, String>(0)
        })?;
        let ids: Vec<String> = rows.collect::<Result<_, _>>()?;

        let sql = format!("DELETE FROM processing WHERE worker_id IN ({placeholders})");
        conn.execute(&sql, rusqlite::params_from_iter(stale_workers.iter()))?;

        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_params() -> JobParams {
        JobParams {
            psipred_dir: "ss2".into(),
            master_id: 1,
            aligner_name: "mafft".into(),
            aligner_params: String::new(),
            trim_thresholds: vec![0.3, 0.5],
            gap_open: -5.0,
            gap_extend: -2.0,
        }
    }

    #[test]
    fn enqueue_then_claim_round_trips_params() {
        let dir = tempfile::tempdir().unwrap();
        let store = QueueStore::open_or_create(dir.path().join("work_db.sqlite")).unwrap();
        let params = sample_params();
        store.enqueue_primary("foo", &params, 1).unwrap();

        let claimed = store.claim_one(100).unwrap().expect("job available");
        assert_eq!(claimed.hash, JobHash::primary("foo"));
        assert_eq!(claimed.params, params);
        assert!(store.claim_one(100).unwrap().is_none());
    }

    #[test]
    fn enqueue_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = QueueStore::open_or_create(dir.path().join("work_db.sqlite")).unwrap();
        let params = sample_params();
        store.enqueue_primary("foo", &params, 1).unwrap();
        store.enqueue_primary("foo", &params, 1).unwrap();
        assert!(store.claim_one(1).unwrap().is_some());
        assert!(store.claim_one(1).unwrap().is_none());
    }

    #[test]
    fn publish_complete_requires_a_waiter() {
        let dir = tempfile::tempdir().unwrap();
        let store = QueueStore::open_or_create(dir.path().join("work_db.sqlite")).unwrap();
        let params = sample_params();
        store.enqueue_primary("foo", &params, 1).unwrap();
        let claimed = store.claim_one(100).unwrap().unwrap();

        store.collect_complete("foo", 1).unwrap();
        // no-op: nothing completed yet
        store.cancel("foo").unwrap();

        let outcome = store.publish_complete(&claimed.hash, 100, 1).unwrap();
        assert_eq!(outcome, PublishOutcome::NoWaiters);
    }

    #[test]
    fn publish_complete_is_idempotent_under_a_race() {
        let dir = tempfile::tempdir().unwrap();
        let store = QueueStore::open_or_create(dir.path().join("work_db.sqlite")).unwrap();
        let params = sample_params();
        store.enqueue_primary("foo", &params, 1).unwrap();
        let claimed = store.claim_one(100).unwrap().unwrap();

        let first = store.publish_complete(&claimed.hash, 100, 1).unwrap();
        assert_eq!(first, PublishOutcome::Published);

        // A second publish attempt by the same worker_id finds no owned
        // processing row left (it was deleted by the first publish) and
        // reports AlreadyPublished instead of inserting a duplicate row.
        let second = store.publish_complete(&claimed.hash, 100, 1).unwrap();
        assert_eq!(second, PublishOutcome::AlreadyPublished);
    }

    #[test]
    fn split_into_subjobs_retains_chunk_one_as_processing() {
        let dir = tempfile::tempdir().unwrap();
        let store = QueueStore::open_or_create(dir.path().join("work_db.sqlite")).unwrap();
        let params = sample_params();
        store.enqueue_primary("foo", &params, 1).unwrap();
        store.claim_one(100).unwrap().unwrap();

        store.split_into_subjobs("foo", &params, 1, 100, 3).unwrap();

        let second = store.claim_one(200).unwrap().expect("chunk 2 available");
        assert_eq!(second.hash, JobHash::subjob("foo", 2, 3));
        let third = store.claim_one(200).unwrap().expect("chunk 3 available");
        assert_eq!(third.hash, JobHash::subjob("foo", 3, 3));
        assert!(store.claim_one(200).unwrap().is_none());
    }

    #[test]
    fn fan_in_counts_sibling_completions() {
        let dir = tempfile::tempdir().unwrap();
        let store = QueueStore::open_or_create(dir.path().join("work_db.sqlite")).unwrap();
        let params = sample_params();
        store.enqueue_primary("foo", &params, 1).unwrap();
        store.claim_one(1).unwrap().unwrap();
        store.split_into_subjobs("foo", &params, 1, 1, 2).unwrap();

        let chunk1 = JobHash::subjob("foo", 1, 2);
        let chunk2 = store.claim_one(2).unwrap().unwrap();
        assert_eq!(chunk2.hash, JobHash::subjob("foo", 2, 2));

        assert_eq!(store.count_sibling_completions("foo").unwrap(), 0);
        store.publish_complete(&chunk1, 1, 1).unwrap();
        assert_eq!(store.count_sibling_completions("foo").unwrap(), 1);
        store.publish_complete(&chunk2.hash, 2, 1).unwrap();
        assert_eq!(store.count_sibling_completions("foo").unwrap(), 2);
    }

    #[test]
    fn primary_fan_in_publish_does_not_require_worker_ownership() {
        // The primary `processing` row is owned by the splitting worker
        // (100), but the fan-in publish is issued by whichever worker
        // finishes the last sibling sub-job (200 here). That must still
        // succeed: it is not a race over the same hash, just two different
        // workers touching two different rows for the same id_hash.
        let dir = tempfile::tempdir().unwrap();
        let store = QueueStore::open_or_create(dir.path().join("work_db.sqlite")).unwrap();
        let params = sample_params();
        store.enqueue_primary("foo", &params, 1).unwrap();
        store.claim_one(100).unwrap().unwrap();
        store.split_into_subjobs("foo", &params, 1, 100, 2).unwrap();
        store.claim_one(200).unwrap().unwrap();

        let primary = JobHash::primary("foo");
        let outcome = store.publish_complete(&primary, 200, 1).unwrap();
        assert_eq!(outcome, PublishOutcome::Published);
        assert_eq!(store.count_sibling_completions("foo").unwrap(), 0);

        // The primary's `processing` row (owned by worker 100, not the
        // publisher 200) must actually be gone: re-enqueuing the same
        // id_hash must be claimable, not silently dropped by `claim_one`'s
        // already_processing branch.
        store.enqueue_primary("foo", &params, 1).unwrap();
        assert!(store.claim_one(1).unwrap().is_some());
    }

    #[test]
    fn cancel_clears_every_table() {
        let dir = tempfile::tempdir().unwrap();
        let store = QueueStore::open_or_create(dir.path().join("work_db.sqlite")).unwrap();
        let params = sample_params();
        store.enqueue_primary("foo", &params, 1).unwrap();
        store.cancel("foo").unwrap();
        assert!(!store.has_waiters("foo").unwrap());
        assert!(store.claim_one(1).unwrap().is_none());
    }

    #[test]
    fn abandon_removes_only_the_processing_row() {
        let dir = tempfile::tempdir().unwrap();
        let store = QueueStore::open_or_create(dir.path().join("work_db.sqlite")).unwrap();
        let params = sample_params();
        store.enqueue_primary("foo", &params, 1).unwrap();
        let claimed = store.claim_one(1).unwrap().unwrap();
        store.abandon(&claimed.hash, 1).unwrap();

        assert!(store.has_waiters("foo").unwrap());
        assert!(store.claim_one(2).unwrap().is_none());
    }
}
