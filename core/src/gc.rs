//! Garbage collection pass (spec.md §4.5): reaps dead heartbeats, orphaned
//! queue rows, and their scratch files.
//!
//! Ordering matches the spec exactly because it is load-bearing: the
//! heartbeat snapshot is taken and stale rows removed first, so a master
//! that looked alive at snapshot time cannot be deleted from under a
//! concurrently-running pass (spec.md §9 "Cross-DB atomicity").

use std::time::Duration;

use farmcore_lib::{FarmResult, ThreadType};

use crate::heartbeat::HeartbeatDb;
use crate::queue::QueueStore;
use crate::scratch::ScratchStore;

/// Tallies what a pass actually reaped, for logging and metrics.
#[derive(Debug, Default, Clone, Copy)]
pub struct GcReport {
    pub stale_heartbeats: usize,
    pub dead_masters: usize,
    pub rows_reaped: usize,
    pub scratch_dirs_reaped: usize,
}

/// Runs one full pass of spec.md §4.5 against `heartbeat_db` and
/// `work_db`, deleting dead participants' rows and their scratch files.
pub fn run(
    heartbeat_db: &HeartbeatDb,
    work_db: &QueueStore,
    scratch: &ScratchStore,
    dead_thread_wait: Duration,
) -> FarmResult<GcReport> {
    // 1. Snapshot + remove stale heartbeat rows.
    let stale = heartbeat_db.delete_stale(dead_thread_wait)?;
    let stale_masters: Vec<i64> = stale
        .iter()
        .filter(|row| row.thread_type == ThreadType::Master)
        .map(|row| row.thread_id)
        .collect();
    let stale_workers: Vec<i64> = stale
        .iter()
        .filter(|row| row.thread_type == ThreadType::Worker)
        .map(|row| row.thread_id)
        .collect();

    let live_masters: std::collections::BTreeSet<i64> = heartbeat_db
        .snapshot()?
        .into_iter()
        .filter(|row| row.thread_type == ThreadType::Master)
        .map(|row| row.thread_id)
        .collect();

    // 2. dead_masters = stale masters ∪ master_ids referenced anywhere that
    //    are not in live_masters.
    let referenced = work_db.referenced_master_ids()?;
    let mut dead_masters: std::collections::BTreeSet<i64> = stale_masters.into_iter().collect();
    dead_masters.extend(referenced.into_iter().filter(|id| !live_masters.contains(id)));
    let dead_masters: Vec<i64> = dead_masters.into_iter().collect();

    // 3-4. Delete rows referencing dead masters; collect dead_hashes.
    let mut dead_hashes = work_db.delete_rows_for_dead_masters(&dead_masters)?;
    let rows_for_dead_masters = dead_hashes.len();

    // 5. Delete processing rows owned by stale workers; their id_hashes
    //    also need scratch cleanup.
    let stale_worker_hashes = work_db.delete_processing_for_stale_workers(&stale_workers)?;
    let rows_for_stale_workers = stale_worker_hashes.len();
    dead_hashes.extend(stale_worker_hashes);
    dead_hashes.sort();
    dead_hashes.dedup();

    // Filesystem cleanup last, ignoring missing-file errors.
    for id_hash in &dead_hashes {
        scratch.delete_job_artifacts(id_hash);
    }

    let report = GcReport {
        stale_heartbeats: stale.len(),
        dead_masters: dead_masters.len(),
        rows_reaped: rows_for_dead_masters + rows_for_stale_workers,
        scratch_dirs_reaped: dead_hashes.len(),
    };

    farmcore_metrics::inc_gc_sweeps();
    farmcore_metrics::inc_gc_rows_reaped("heartbeat", report.stale_heartbeats as u64);
    farmcore_metrics::inc_gc_rows_reaped("work_db", report.rows_reaped as u64);
    tracing::info!(
        stale_heartbeats = report.stale_heartbeats,
        dead_masters = report.dead_masters,
        rows_reaped = report.rows_reaped,
        "gc pass complete"
    );

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use farmcore_lib::JobParams;
    use std::sync::Arc;

    fn sample_params() -> JobParams {
        JobParams {
            psipred_dir: "ss2".into(),
            master_id: 1,
            aligner_name: "mafft".into(),
            aligner_params: String::new(),
            trim_thresholds: vec![0.3],
            gap_open: -5.0,
            gap_extend: -2.0,
        }
    }

    #[test]
    fn reaps_rows_and_scratch_of_a_dead_master() {
        let dir = tempfile::tempdir().unwrap();
        let heartbeat_db = Arc::new(HeartbeatDb::open_or_create(dir.path().join("heartbeat_db.sqlite")).unwrap());
        let work_db = QueueStore::open_or_create(dir.path().join("work_db.sqlite")).unwrap();
        let scratch = ScratchStore::open_or_create(dir.path()).unwrap();

        let master_hb = crate::heartbeat::Heartbeat::start(
            heartbeat_db.clone(),
            ThreadType::Master,
            Duration::from_secs(3600),
        )
        .unwrap();
        let master_id = master_hb.thread_id();

        let params = sample_params();
        work_db.enqueue_primary("foo", &params, master_id).unwrap();
        scratch.write_owned(&scratch.seqs_path("foo"), ">a\nAAAA\n>b\nAAAA\n").unwrap();

        // Force the master's heartbeat row to look ancient without waiting
        // out a real `dead_thread_wait` interval.
        {
            let conn_path = heartbeat_db.path().to_path_buf();
            let conn = rusqlite::Connection::open(conn_path).unwrap();
            conn.execute(
                "UPDATE heartbeat SET pulse = pulse - 100000 WHERE thread_id = ?1",
                [master_id],
            )
            .unwrap();
        }

        let report = run(&heartbeat_db, &work_db, &scratch, Duration::from_secs(120)).unwrap();
        assert_eq!(report.dead_masters, 1);
        assert!(!work_db.has_waiters("foo").unwrap());
        assert!(!scratch.seqs_path("foo").exists());

        drop(master_hb);
    }

    #[test]
    fn second_consecutive_pass_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let heartbeat_db = Arc::new(HeartbeatDb::open_or_create(dir.path().join("heartbeat_db.sqlite")).unwrap());
        let work_db = QueueStore::open_or_create(dir.path().join("work_db.sqlite")).unwrap();
        let scratch = ScratchStore::open_or_create(dir.path()).unwrap();

        let first = run(&heartbeat_db, &work_db, &scratch, Duration::from_secs(120)).unwrap();
        let second = run(&heartbeat_db, &work_db, &scratch, Duration::from_secs(120)).unwrap();
        assert_eq!(first.rows_reaped, 0);
        assert_eq!(second.rows_reaped, 0);
    }
}
