//! Queue state machine, heartbeat registry, scratch store, garbage
//! collector, and sub-job planner for the all-pairs comparison scheduler.
//!
//! These modules are deliberately free of CLI/process concerns; the worker
//! loop that drives them lives in `farmcore-worker`.

pub mod gc;
pub mod heartbeat;
pub mod lock;
pub mod queue;
pub mod scoring;
pub mod scratch;
pub mod subjob;

pub use gc::{run as run_gc, GcReport};
pub use heartbeat::{Heartbeat, HeartbeatDb, HeartbeatRow};
pub use lock::{ExclusiveLock, LockGuard};
pub use queue::{ClaimedJob, PublishOutcome, QueueStore};
pub use scoring::{MockScoringBackend, PsipredStage, ScoringBackend, Ss2Row};
pub use scratch::ScratchStore;
