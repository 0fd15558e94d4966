use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_histogram_vec, Counter, CounterVec,
    HistogramVec,
};
use std::time::Duration;

lazy_static! {
    // Queue store metrics
    pub static ref JOBS_ENQUEUED: Counter = register_counter!(
        "farm_jobs_enqueued_total",
        "the number of primary jobs inserted into the queue"
    )
    .unwrap();

    pub static ref JOBS_CLAIMED: CounterVec = register_counter_vec!(
        "farm_jobs_claimed_total",
        "the number of queue rows claimed by a worker",
        &["kind"]
    )
    .unwrap();

    pub static ref JOBS_SPLIT: Counter = register_counter!(
        "farm_jobs_split_total",
        "the number of primary jobs split into sub-jobs"
    )
    .unwrap();

    pub static ref SUBJOBS_FANNED_IN: Counter = register_counter!(
        "farm_subjobs_fanned_in_total",
        "the number of primary jobs whose sub-jobs all completed and were concatenated"
    )
    .unwrap();

    // Garbage collector metrics
    pub static ref GC_SWEEPS: Counter = register_counter!(
        "farm_gc_sweeps_total",
        "the number of garbage collection passes run"
    )
    .unwrap();

    pub static ref GC_ROWS_REAPED: CounterVec = register_counter_vec!(
        "farm_gc_rows_reaped_total",
        "the number of rows deleted by a garbage collection pass, by table",
        &["table"]
    )
    .unwrap();

    // Lock contention metrics
    pub static ref LOCK_ACQUIRE_DURATION_MILLIS: HistogramVec = register_histogram_vec!(
        "farm_lock_acquire_duration_millis",
        "the time spent waiting to acquire an exclusive lock",
        &["path"]
    )
    .unwrap();
}

pub fn inc_jobs_enqueued() {
    JOBS_ENQUEUED.inc();
}

pub fn inc_jobs_claimed(kind: &str) {
    JOBS_CLAIMED.with_label_values(&[kind]).inc();
}

pub fn inc_jobs_split() {
    JOBS_SPLIT.inc();
}

pub fn inc_subjobs_fanned_in() {
    SUBJOBS_FANNED_IN.inc();
}

pub fn inc_gc_sweeps() {
    GC_SWEEPS.inc();
}

pub fn inc_gc_rows_reaped(table: &str, count: u64) {
    GC_ROWS_REAPED.with_label_values(&[table]).inc_by(count as f64);
}

pub fn observe_lock_acquire_duration(path: &str, duration: Duration) {
    LOCK_ACQUIRE_DURATION_MILLIS
        .with_label_values(&[path])
        .observe(duration.as_millis() as f64);
}
