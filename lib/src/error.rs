use std::time::Duration;

/// Errors surfaced by the scheduler core, the worker loop, and the master
/// client surface.
///
/// Recovery policy per variant is documented in SPEC_FULL.md's Error
/// Handling section; callers that need to distinguish "retry locally" from
/// "terminate the worker" should match on the variant rather than the
/// message.
#[derive(thiserror::Error, Debug)]
pub enum FarmError {
    /// An `ExclusiveLock::acquire` call did not succeed within its
    /// `max_wait` budget.
    #[error("timed out after {waited:?} acquiring lock on {path}")]
    LockTimeout { path: String, waited: Duration },

    /// A required scratch file (`.seqs`, `.ss2`, `.aln`) was not found.
    #[error("missing scratch file: {0}")]
    MissingScratch(String),

    /// A primary job's `.seqs` file described fewer than two sequences.
    #[error("job {0} has fewer than two sequences")]
    UnderSizedJob(String),

    /// The external aligner invocation failed.
    #[error("aligner failure: {0}")]
    AlignerFailure(String),

    /// The external trim-filter invocation failed.
    #[error("trim failure: {0}")]
    TrimFailure(String),

    /// A scratch artifact could not be parsed (e.g. a `.ss2` dataframe).
    #[error("parse failure: {0}")]
    ParseFailure(String),

    /// A downstream invariant was violated and there is no local recovery.
    #[error("broken invariant: {0}")]
    BrokenInvariant(String),

    /// The worker loop body has failed too many times in a short window.
    #[error("too many consecutive crashes: {0}")]
    TooManyCrashes(String),

    /// A master's `await_result` call exceeded its caller-supplied timeout.
    #[error("timed out awaiting result for {0}")]
    AwaitTimeout(String),

    #[error("sqlite error: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type FarmResult<T> = Result<T, FarmError>;
