//! Client-facing submit/await contract for masters (spec.md §4.8).
//!
//! Grounded on `reqpool/src/traits.rs`'s `Pool` trait: where `Pool` exposes
//! `add`/`get`/`get_status`/`update_status` against a caller-constructed
//! `RequestKey`, `Master` exposes `submit`/`poll_result`/`await_result`
//! against a caller-constructed `id_hash` — the scheduler core treats
//! `id_hash` as opaque, so this crate never derives one from job content.
//! It is the pool's client-facing half; `farmcore::QueueStore` is the
//! worker-facing queue-store half.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use farmcore::{HeartbeatDb, Heartbeat, QueueStore, ScratchStore};
use farmcore_lib::{FarmError, FarmResult, JobParams, ThreadType};

/// A master's handle onto the shared work/heartbeat databases and scratch
/// directory. One `Master` corresponds to one heartbeat row; its
/// `thread_id` doubles as the `master_id` recorded in `queue`/`waiting`.
pub struct Master {
    work_db: QueueStore,
    scratch: ScratchStore,
    heartbeat: Option<Heartbeat>,
    master_id: i64,
}

impl Master {
    /// Opens (or creates) the shared databases and scratch root under
    /// `working_dir`, and starts this master's heartbeat.
    pub fn bootstrap(working_dir: impl AsRef<Path>, heart_rate: Duration) -> FarmResult<Self> {
        let working_dir = working_dir.as_ref();
        let work_db = QueueStore::open_or_create(working_dir.join("work_db.sqlite"))?;
        let heartbeat_db = Arc::new(HeartbeatDb::open_or_create(working_dir.join("heartbeat_db.sqlite"))?);
        let scratch = ScratchStore::open_or_create(working_dir)?;

        let heartbeat = Heartbeat::start(heartbeat_db, ThreadType::Master, heart_rate)?;
        let master_id = heartbeat.thread_id();

        tracing::info!(master_id, "master started");
        Ok(Self {
            work_db,
            scratch,
            heartbeat: Some(heartbeat),
            master_id,
        })
    }

    pub fn master_id(&self) -> i64 {
        self.master_id
    }

    /// Writes `<id_hash>.seqs`, registers as a waiter, then enqueues the
    /// primary job, in the order spec.md §4.8 requires (waiter registered
    /// before the job becomes claimable, so a worker can never finish the
    /// job before `await_result` starts looking for it).
    pub fn submit(&self, id_hash: &str, params: &JobParams, seqs_fasta: &str) -> FarmResult<()> {
        let seqs_path = self.scratch.seqs_path(id_hash);
        self.scratch.write_owned(&seqs_path, seqs_fasta)?;
        self.work_db.enqueue_primary(id_hash, params, self.master_id)?;
        tracing::info!(master_id = self.master_id, id_hash, "submitted job");
        Ok(())
    }

    /// Non-blocking: `Some(graph)` if a result is ready, `None` otherwise.
    /// On a hit, removes the `complete`/`waiting` rows and this master's
    /// `<id_hash>.{seqs,graph}`; a shared `.aln` is left for GC, since other
    /// masters' sub-jobs against the same cluster could still reference it.
    pub fn poll_result(&self, id_hash: &str) -> FarmResult<Option<String>> {
        if !self.work_db.collect_complete(id_hash, self.master_id)? {
            return Ok(None);
        }
        let graph_path = self.scratch.graph_path(id_hash);
        let graph = self.scratch.read(&graph_path)?;
        let seqs_path = self.scratch.seqs_path(id_hash);
        if let Err(err) = std::fs::remove_file(&seqs_path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %seqs_path.display(), %err, "failed to remove owned seqs file");
            }
        }
        if let Err(err) = std::fs::remove_file(&graph_path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %graph_path.display(), %err, "failed to remove owned graph file");
            }
        }
        tracing::info!(master_id = self.master_id, id_hash, "collected result");
        Ok(Some(graph))
    }

    /// Blocks, polling at `poll_interval`, until a result is ready or
    /// `timeout` elapses.
    pub fn await_result(&self, id_hash: &str, poll_interval: Duration, timeout: Duration) -> FarmResult<String> {
        let start = Instant::now();
        loop {
            if let Some(graph) = self.poll_result(id_hash)? {
                return Ok(graph);
            }
            if start.elapsed() >= timeout {
                return Err(FarmError::AwaitTimeout(id_hash.to_string()));
            }
            std::thread::sleep(poll_interval);
        }
    }

    /// Withdraws interest in `id_hash`: removes every row referencing it
    /// from the four queue tables and deletes the scratch artifacts this
    /// master owns. Safe to call whether or not the job has completed
    /// (spec.md §5 "Cancellation": job-level cancellation is expressed by
    /// removing all `waiting` rows for that `id_hash`).
    pub fn cancel(&self, id_hash: &str) -> FarmResult<()> {
        self.work_db.cancel(id_hash)?;
        self.scratch.delete_job_artifacts(id_hash);
        tracing::info!(master_id = self.master_id, id_hash, "cancelled job");
        Ok(())
    }

    /// Working-directory root this master reads/writes scratch under,
    /// exposed so a caller can locate per-sequence inputs it staged itself.
    pub fn scratch_root(&self) -> &Path {
        self.scratch.root()
    }

    pub fn work_db_path(&self) -> &Path {
        self.work_db.path()
    }

    /// Ends this master's heartbeat, removing its row immediately rather
    /// than waiting for GC to notice staleness.
    pub fn shutdown(mut self) -> FarmResult<()> {
        if let Some(heartbeat) = self.heartbeat.take() {
            heartbeat.end()?;
        }
        Ok(())
    }
}

/// Config used by CLI-style callers that want `clap`-free construction
/// parity with the worker's own settings; kept minimal since masters have
/// no analog to the worker's job-size/CPU-count flags (spec.md §4.8 treats
/// masters as external collaborators with no prescribed CLI surface).
#[derive(Debug, Clone)]
pub struct MasterConfig {
    pub working_dir: PathBuf,
    pub heart_rate: Duration,
}

impl Master {
    pub fn bootstrap_with(config: &MasterConfig) -> FarmResult<Self> {
        Self::bootstrap(&config.working_dir, config.heart_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_params() -> JobParams {
        JobParams {
            psipred_dir: "ss2".into(),
            master_id: 0,
            aligner_name: "mafft".into(),
            aligner_params: String::new(),
            trim_thresholds: vec![0.3, 0.5],
            gap_open: -5.0,
            gap_extend: -2.0,
        }
    }

    #[test]
    fn submit_writes_seqs_and_enqueues() {
        let dir = tempfile::tempdir().unwrap();
        let master = Master::bootstrap(dir.path(), Duration::from_secs(60)).unwrap();
        let params = sample_params();
        master.submit("foo", &params, ">a\nAAAA\n>b\nCCCC\n").unwrap();

        assert!(master.scratch_root().join("foo.seqs").exists());
        let claimed = master.work_db.claim_one(1).unwrap().expect("job queued");
        assert_eq!(claimed.params, params);
    }

    #[test]
    fn poll_result_is_none_before_publish() {
        let dir = tempfile::tempdir().unwrap();
        let master = Master::bootstrap(dir.path(), Duration::from_secs(60)).unwrap();
        let params = sample_params();
        master.submit("foo", &params, ">a\nAAAA\n>b\nCCCC\n").unwrap();

        assert!(master.poll_result("foo").unwrap().is_none());
    }

    #[test]
    fn poll_result_collects_and_cleans_up_owned_files() {
        let dir = tempfile::tempdir().unwrap();
        let master = Master::bootstrap(dir.path(), Duration::from_secs(60)).unwrap();
        let params = sample_params();
        master.submit("foo", &params, ">a\nAAAA\n>b\nCCCC\n").unwrap();

        let claimed = master.work_db.claim_one(100).unwrap().unwrap();
        std::fs::write(master.scratch_root().join("foo.graph"), "a,b,0.5,0.2\n").unwrap();
        master.work_db.publish_complete(&claimed.hash, 100, master.master_id()).unwrap();

        let graph = master.poll_result("foo").unwrap().expect("result ready");
        assert_eq!(graph, "a,b,0.5,0.2\n");
        assert!(!master.scratch_root().join("foo.graph").exists());
        assert!(!master.scratch_root().join("foo.seqs").exists());
    }

    #[test]
    fn await_result_times_out_when_nothing_publishes() {
        let dir = tempfile::tempdir().unwrap();
        let master = Master::bootstrap(dir.path(), Duration::from_secs(60)).unwrap();
        let params = sample_params();
        master.submit("foo", &params, ">a\nAAAA\n>b\nCCCC\n").unwrap();

        let err = master
            .await_result("foo", Duration::from_millis(10), Duration::from_millis(50))
            .unwrap_err();
        assert!(matches!(err, FarmError::AwaitTimeout(ref h) if h == "foo"));
    }

    #[test]
    fn cancel_clears_queue_and_scratch() {
        let dir = tempfile::tempdir().unwrap();
        let master = Master::bootstrap(dir.path(), Duration::from_secs(60)).unwrap();
        let params = sample_params();
        master.submit("foo", &params, ">a\nAAAA\n>b\nCCCC\n").unwrap();

        master.cancel("foo").unwrap();
        assert!(!master.scratch_root().join("foo.seqs").exists());
        assert!(master.work_db.claim_one(1).unwrap().is_none());
    }
}
