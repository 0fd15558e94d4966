//! The worker loop state machine (spec.md §4.7): Idle → Check →
//! {Terminated, GC, Claim} → Prepare → Align/ReadAlign → PlanOrRun → Score →
//! Publish → Idle.
//!
//! Shaped after `reqactor/src/actor.rs`'s `serve_in_background` loop (pop a
//! unit of work, bound concurrency, report completion), generalized from
//! tokio's async loop to this spec's synchronous claim/compute/publish
//! cycle, and after `host/src/bin/main.rs`'s crash-loop-with-a-cap for
//! `TooManyCrashes`.

use std::collections::VecDeque;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use farmcore::{ClaimedJob, Heartbeat, HeartbeatDb, PublishOutcome, QueueStore, ScoringBackend, ScratchStore};
use farmcore_lib::{pair_count as count_pairs, FarmError, FarmResult, JobHash, JobParams, PairId, ThreadType};
use rand::Rng;

/// Crash-loop guard: more than this many failures within `CRASH_WINDOW`
/// terminates the worker permanently (spec.md §7 `TooManyCrashes`).
const CRASH_LIMIT: usize = 5;
const CRASH_WINDOW: Duration = Duration::from_secs(60);

pub struct WorkerConfig {
    pub workdb: PathBuf,
    pub heart_rate: Duration,
    pub max_wait: Duration,
    pub dead_thread_wait: Duration,
    pub cpu_count: usize,
    pub job_size: usize,
    pub gc_probability: f64,
}

pub enum LoopOutcome {
    Terminated { reason: String },
    Continue,
}

/// Owns the per-process state of one worker: its heartbeat row, the two
/// database handles, the scratch store, and the injected scoring backend.
pub struct Worker {
    config: WorkerConfig,
    heartbeat_db: Arc<HeartbeatDb>,
    heartbeat_guard: Option<Heartbeat>,
    work_db: QueueStore,
    scratch: ScratchStore,
    scoring: Arc<dyn ScoringBackend>,
    worker_id: i64,
    checkfile: PathBuf,
    data_file: PathBuf,
    crash_times: VecDeque<Instant>,
    /// Baseline for the `max_wait` master-silence check (spec.md §4.7),
    /// seeded at worker start and advanced whenever a live master pulse is
    /// observed. Tracked independently of whether any master row currently
    /// exists, because GC removes a dead master's heartbeat row after
    /// `dead_thread_wait`, which is typically shorter than `max_wait` — an
    /// empty heartbeat table is "no live masters", not "never terminate".
    last_master_seen: i64,
}

impl Worker {
    pub fn bootstrap(config: WorkerConfig, scoring: Arc<dyn ScoringBackend>) -> FarmResult<Self> {
        fs::create_dir_all(&config.workdb)?;
        let heartbeat_db = Arc::new(HeartbeatDb::open_or_create(config.workdb.join("heartbeat_db.sqlite"))?);
        let work_db = QueueStore::open_or_create(config.workdb.join("work_db.sqlite"))?;
        let scratch = ScratchStore::open_or_create(&config.workdb)?;

        let heartbeat = Heartbeat::start(heartbeat_db.clone(), ThreadType::Worker, config.heart_rate)?;
        let worker_id = heartbeat.thread_id();

        let checkfile = config.workdb.join(format!("Worker_{worker_id}"));
        fs::write(&checkfile, b"")?;
        let data_file = config.workdb.join(format!("Worker_{worker_id}.dat"));

        Ok(Self {
            config,
            heartbeat_db,
            heartbeat_guard: Some(heartbeat),
            work_db,
            scratch,
            scoring,
            worker_id,
            checkfile,
            data_file,
            crash_times: VecDeque::new(),
            last_master_seen: chrono::Utc::now().timestamp(),
        })
    }

    pub fn worker_id(&self) -> i64 {
        self.worker_id
    }

    /// Drives the state machine until termination. Every failed iteration
    /// is recorded against the crash-loop guard; exceeding it surfaces
    /// `TooManyCrashes` to the caller, which should exit the process
    /// non-zero per spec.md §6.
    pub fn run(&mut self) -> FarmResult<()> {
        loop {
            match self.check()? {
                LoopOutcome::Terminated { reason } => {
                    self.terminate(&reason)?;
                    return Ok(());
                }
                LoopOutcome::Continue => {}
            }

            if self.should_run_gc() {
                let report = farmcore::run_gc(&self.heartbeat_db, &self.work_db, &self.scratch, self.config.dead_thread_wait)?;
                tracing::debug!(?report, "gc pass from worker loop");
                continue;
            }

            match self.work_db.claim_one(self.worker_id) {
                Ok(Some(claimed)) => {
                    if let Err(err) = self.process(claimed) {
                        self.record_crash();
                        tracing::warn!(%err, "job processing failed");
                        if self.crash_times.len() > CRASH_LIMIT {
                            return Err(FarmError::TooManyCrashes(format!(
                                "{CRASH_LIMIT} failures within {CRASH_WINDOW:?}"
                            )));
                        }
                    }
                }
                Ok(None) => {
                    let backoff = rand::thread_rng().gen_range(0..3000);
                    thread::sleep(Duration::from_millis(backoff));
                }
                Err(err) => {
                    tracing::warn!(%err, "claim_one failed");
                    self.record_crash();
                }
            }
        }
    }

    fn record_crash(&mut self) {
        let now = Instant::now();
        self.crash_times.push_back(now);
        while let Some(front) = self.crash_times.front() {
            if now.duration_since(*front) > CRASH_WINDOW {
                self.crash_times.pop_front();
            } else {
                break;
            }
        }
    }

    fn should_run_gc(&self) -> bool {
        rand::thread_rng().gen_bool(self.config.gc_probability)
    }

    /// Check → {Terminated, Continue}. Terminates on check-file deletion or
    /// prolonged master silence (spec.md §4.7).
    ///
    /// `last_master_seen` is compared against wall-clock time regardless of
    /// whether the heartbeat table currently holds any master row at all —
    /// an empty master set (all masters gone and already reaped by GC) is
    /// exactly the "no live masters" condition this check exists to catch,
    /// not a reason to skip it.
    fn check(&mut self) -> FarmResult<LoopOutcome> {
        if !self.checkfile.exists() {
            return Ok(LoopOutcome::Terminated {
                reason: "check-file deleted".to_string(),
            });
        }

        let snapshot = self.heartbeat_db.snapshot()?;
        let most_recent_master_pulse = snapshot
            .iter()
            .filter(|row| row.thread_type == ThreadType::Master)
            .map(|row| row.pulse)
            .max();

        if let Some(pulse) = most_recent_master_pulse {
            self.last_master_seen = self.last_master_seen.max(pulse);
        }

        let now = chrono::Utc::now().timestamp();
        if now - self.last_master_seen >= self.config.max_wait.as_secs() as i64 {
            return Ok(LoopOutcome::Terminated {
                reason: "no live masters".to_string(),
            });
        }

        Ok(LoopOutcome::Continue)
    }

    fn terminate(&mut self, reason: &str) -> FarmResult<()> {
        tracing::info!(worker_id = self.worker_id, reason, "terminating worker");
        eprintln!("Terminating Worker_{} because of {reason}", self.worker_id);

        self.work_db.abandon_all(self.worker_id)?;
        let _ = fs::remove_file(&self.data_file);
        let _ = fs::remove_file(&self.checkfile);

        if let Some(heartbeat) = self.heartbeat_guard.take() {
            heartbeat.end()?;
        }
        Ok(())
    }

    fn process(&mut self, claimed: ClaimedJob) -> FarmResult<()> {
        let is_primary_claim = claimed.hash.is_primary();
        match self.process_claimed(&claimed) {
            Ok(()) => Ok(()),
            Err(err) => {
                if is_primary_claim {
                    // Fatal for primary jobs: the job is poisoned and left
                    // for GC to reap once its masters time out.
                    Err(err)
                } else {
                    tracing::warn!(%err, hash = %claimed.hash, "sub-job failed, abandoning and continuing");
                    self.work_db.abandon(&claimed.hash, self.worker_id)?;
                    Ok(())
                }
            }
        }
    }

    fn process_claimed(&mut self, claimed: &ClaimedJob) -> FarmResult<()> {
        let id_hash = claimed.hash.id_hash.clone();
        let params = claimed.params.clone();

        let seqs_raw = self.scratch.read(&self.scratch.seqs_path(&id_hash))?;
        let sequence_names = parse_fasta_names(&seqs_raw);
        if sequence_names.len() < 2 {
            return Err(FarmError::UnderSizedJob(id_hash));
        }

        let alignment = if claimed.hash.is_primary() {
            self.prepare_align(&id_hash, &seqs_raw, &params)?
        } else {
            self.scratch.read(&self.scratch.aln_path(&id_hash))?
        };

        let (effective_hash, pairs) = self.plan_or_load(claimed, &sequence_names, &params)?;
        let scored = self.score_pairs(&pairs, &alignment, &params)?;
        self.publish(&effective_hash, &params, &scored)
    }

    /// Prepare → Align for primary jobs: reuse `.aln` if a prior worker
    /// already produced it (spec.md §9's resolution of the open question),
    /// otherwise invoke the aligner and write it under the scratch
    /// write-lock.
    fn prepare_align(&self, id_hash: &str, seqs_raw: &str, params: &JobParams) -> FarmResult<String> {
        let aln_path = self.scratch.aln_path(id_hash);
        if self.scratch.exists(&aln_path) {
            return self.scratch.read(&aln_path);
        }

        let alignment = self.scoring.generate_msa(seqs_raw, &params.aligner_name, &params.aligner_params)?;
        if !self.scratch.write_shared(&aln_path, &alignment)? {
            // Another worker won the race; read back what it wrote.
            return self.scratch.read(&aln_path);
        }

        let trimmed = self
            .scoring
            .trim(seqs_raw, &params.trim_thresholds, &alignment)?;
        self.scratch.write_shared(&aln_path, &trimmed)?;
        Ok(trimmed)
    }

    fn plan_or_load(
        &self,
        claimed: &ClaimedJob,
        sequence_names: &[String],
        params: &JobParams,
    ) -> FarmResult<(JobHash, Vec<PairId>)> {
        let id_hash = &claimed.hash.id_hash;

        if !claimed.hash.is_primary() {
            let path = self
                .scratch
                .pair_list_path(id_hash, claimed.hash.subjob_num, claimed.hash.num_subjobs);
            let raw = self.scratch.read(&path)?;
            return Ok((claimed.hash.clone(), parse_pair_list(&raw)));
        }

        let all_pairs = all_pairs(sequence_names);
        let p = count_pairs(sequence_names.len());
        debug_assert_eq!(p, all_pairs.len());

        if !farmcore::subjob::should_split(p, self.config.cpu_count, self.config.job_size) {
            return Ok((claimed.hash.clone(), all_pairs));
        }

        let n = farmcore::subjob::num_subjobs(p, self.config.cpu_count, self.config.job_size);
        let size = farmcore::subjob::job_size(p, n);
        let chunks = farmcore::subjob::partition_pairs(&all_pairs, n, size);

        for (i, chunk) in chunks.iter().enumerate() {
            let subjob_num = (i + 1) as u32;
            let path = self.scratch.pair_list_path(id_hash, subjob_num, n);
            self.scratch.write_owned(&path, &format_pair_list(chunk))?;
        }
        for name in sequence_names {
            let ss2_src = PathBuf::from(&params.psipred_dir).join(format!("{name}.ss2"));
            if let Ok(contents) = fs::read_to_string(&ss2_src) {
                let dest = self.scratch.ss2_path(id_hash, name);
                self.scratch.write_owned(&dest, &contents)?;
            }
        }

        self.work_db
            .split_into_subjobs(id_hash, params, params.master_id, self.worker_id, n)?;

        let retained = JobHash::subjob(id_hash.clone(), 1, n);
        let retained_chunk = chunks.into_iter().next().unwrap_or_default();
        Ok((retained, retained_chunk))
    }

    fn score_pairs(&self, pairs: &[PairId], alignment: &str, params: &JobParams) -> FarmResult<Vec<farmcore_lib::ScoredPair>> {
        let mut rows = Vec::with_capacity(pairs.len());
        for pair in pairs {
            let ss2_1 = Vec::new();
            let ss2_2 = Vec::new();
            let (subsmat, psi) = self
                .scoring
                .score_pair(pair, &ss2_1, &ss2_2, alignment, params.gap_open, params.gap_extend)?;
            rows.push(farmcore_lib::ScoredPair {
                seq1: pair.seq1.clone(),
                seq2: pair.seq2.clone(),
                subsmat,
                psi,
            });
        }
        let mut data_file = String::new();
        for row in &rows {
            data_file.push_str(&row.to_csv_row());
            data_file.push('\n');
        }
        fs::write(&self.data_file, data_file)?;
        Ok(rows)
    }

    fn publish(&self, hash: &JobHash, params: &JobParams, scored: &[farmcore_lib::ScoredPair]) -> FarmResult<()> {
        let id_hash = &hash.id_hash;

        if hash.is_primary() {
            let frame = self.scoring.set_final_sim_scores(&render_frame(scored))?;
            self.scratch.write_shared(&self.scratch.graph_path(id_hash), &frame)?;
            self.work_db
                .publish_complete(hash, self.worker_id, params.master_id)?;
            return Ok(());
        }

        let sim_df_path = self
            .scratch
            .sim_df_path(id_hash, hash.subjob_num, hash.num_subjobs);
        self.scratch.write_owned(&sim_df_path, &render_frame(scored))?;

        let outcome = self
            .work_db
            .publish_complete(hash, self.worker_id, params.master_id)?;
        if outcome == PublishOutcome::NoWaiters {
            return Ok(());
        }

        self.attempt_fan_in(id_hash, hash.num_subjobs, params)
    }

    fn attempt_fan_in(&self, id_hash: &str, num_subjobs: u32, params: &JobParams) -> FarmResult<()> {
        let completed = self.work_db.count_sibling_completions(id_hash)?;
        if completed as u32 != num_subjobs {
            return Ok(());
        }

        let mut frame = String::new();
        for k in 1..=num_subjobs {
            let path = self.scratch.sim_df_path(id_hash, k, num_subjobs);
            frame.push_str(&self.scratch.read(&path)?);
        }
        let frame = self.scoring.set_final_sim_scores(&frame)?;
        self.scratch.write_shared(&self.scratch.graph_path(id_hash), &frame)?;

        let primary = JobHash::primary(id_hash.to_string());
        let outcome = self
            .work_db
            .publish_complete(&primary, self.worker_id, params.master_id)?;
        if outcome == PublishOutcome::Published {
            farmcore_metrics::inc_subjobs_fanned_in();
            tracing::info!(id_hash, num_subjobs, "fanned in sub-jobs into primary result");
        }
        Ok(())
    }
}

fn parse_fasta_names(raw: &str) -> Vec<String> {
    raw.lines()
        .filter_map(|line| line.strip_prefix('>').map(|name| name.trim().to_string()))
        .collect()
}

fn all_pairs(names: &[String]) -> Vec<PairId> {
    let mut pairs = Vec::with_capacity(count_pairs(names.len()));
    for i in 0..names.len() {
        for j in (i + 1)..names.len() {
            pairs.push(PairId {
                seq1: names[i].clone(),
                seq2: names[j].clone(),
            });
        }
    }
    pairs
}

fn format_pair_list(pairs: &[PairId]) -> String {
    pairs
        .iter()
        .map(|p| format!("{},{}", p.seq1, p.seq2))
        .collect::<Vec<_>>()
        .join("\n")
}

fn parse_pair_list(raw: &str) -> Vec<PairId> {
    raw.lines()
        .filter_map(|line| {
            let mut parts = line.splitn(2, ',');
            Some(PairId {
                seq1: parts.next()?.to_string(),
                seq2: parts.next()?.to_string(),
            })
        })
        .collect()
}

fn render_frame(scored: &[farmcore_lib::ScoredPair]) -> String {
    scored.iter().map(|row| row.to_csv_row()).collect::<Vec<_>>().join("\n")
}
