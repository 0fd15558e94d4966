use serde::{Deserialize, Serialize};
use std::fmt;

/// Distinguishes master and worker rows in the `heartbeat` table (spec.md
/// §3, §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThreadType {
    Master,
    Worker,
}

impl fmt::Display for ThreadType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThreadType::Master => write!(f, "master"),
            ThreadType::Worker => write!(f, "worker"),
        }
    }
}

impl std::str::FromStr for ThreadType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "master" => Ok(ThreadType::Master),
            "worker" => Ok(ThreadType::Worker),
            other => Err(format!("unknown thread_type {other:?}")),
        }
    }
}

/// One unordered sequence pair awaiting a score, identified by sequence
/// record ids within a job's cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairId {
    pub seq1: String,
    pub seq2: String,
}

/// A single scored row as written to the worker-local `data_file` and,
/// after aggregation, to the final `.graph`/`.sim_df` frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredPair {
    pub seq1: String,
    pub seq2: String,
    pub subsmat: f64,
    pub psi: f64,
}

impl ScoredPair {
    pub fn to_csv_row(&self) -> String {
        format!("{},{},{},{}", self.seq1, self.seq2, self.subsmat, self.psi)
    }
}

/// Number of unordered pairs in a cluster of `n` sequences.
pub fn pair_count(n: usize) -> usize {
    n.saturating_sub(1) * n / 2
}
