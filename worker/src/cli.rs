use std::path::PathBuf;

use clap::Parser;
use serde::{Deserialize, Serialize};

fn default_workdb() -> PathBuf {
    PathBuf::from(".")
}

fn default_heart_rate() -> u64 {
    60
}

fn default_max_wait() -> u64 {
    600
}

fn default_dead_thread_wait() -> u64 {
    120
}

fn default_job_size() -> usize {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Worker CLI flags (spec.md §6). `--config <path>` optionally merges a
/// JSON file of the same shape over the parsed flags, mirroring the
/// teacher's `Cli::merge_from_file`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Parser)]
#[command(name = "farm-worker", about = "All-pairs comparison scheduler worker")]
#[serde(default)]
pub struct Cli {
    #[arg(long = "workdb", require_equals = true, default_value = ".")]
    #[serde(default = "default_workdb")]
    /// Directory holding work_db.sqlite, heartbeat_db.sqlite, and
    /// .worker_output/.
    pub workdb: PathBuf,

    #[arg(long = "heart_rate", require_equals = true, default_value = "60")]
    #[serde(default = "default_heart_rate")]
    /// Pulse interval in seconds.
    pub heart_rate: u64,

    #[arg(long = "max_wait", require_equals = true, default_value = "600")]
    #[serde(default = "default_max_wait")]
    /// Seconds of master silence before the worker terminates.
    pub max_wait: u64,

    #[arg(long = "dead_thread_wait", require_equals = true, default_value = "120")]
    #[serde(default = "default_dead_thread_wait")]
    /// Heartbeat staleness threshold used by garbage collection.
    pub dead_thread_wait: u64,

    #[arg(long = "max_cpus", require_equals = true)]
    /// CPU cap; defaults to `max(1, available_parallelism - 1)` when unset.
    pub max_cpus: Option<usize>,

    #[arg(long = "job_size", require_equals = true, default_value = "10")]
    #[serde(default = "default_job_size")]
    /// The K coefficient in the sub-job split threshold `P > C*K`.
    pub job_size: usize,

    #[arg(long = "config", require_equals = true)]
    #[serde(skip)]
    /// Optional JSON config file whose fields are merged under the parsed
    /// flags (flags win on conflict).
    pub config: Option<PathBuf>,

    #[arg(long = "log", require_equals = true, default_value = "info")]
    #[serde(default = "default_log_level")]
    /// Log level / output shaping.
    pub log: String,

    #[arg(long = "quiet", action = clap::ArgAction::SetTrue)]
    #[serde(default)]
    /// Suppress stdout logging; still writes a log file if `--log-path` is given.
    pub quiet: bool,

    #[arg(long = "log_path", require_equals = true)]
    #[serde(default)]
    pub log_path: Option<PathBuf>,
}

impl Cli {
    /// Read `--config` (if given) and merge it under the parsed flags, the
    /// same JSON-merge discipline the teacher's host CLI uses.
    pub fn merge_from_file(&mut self) -> anyhow::Result<()> {
        let Some(path) = self.config.clone() else {
            return Ok(());
        };
        let file = std::fs::File::open(&path)?;
        let reader = std::io::BufReader::new(file);
        let mut config: serde_json::Value = serde_json::from_reader(reader)?;
        let this = serde_json::to_value(&*self)?;
        merge(&mut config, &this);
        *self = serde_json::from_value(config)?;
        Ok(())
    }
}

fn merge(a: &mut serde_json::Value, b: &serde_json::Value) {
    match (a, b) {
        (serde_json::Value::Object(a), serde_json::Value::Object(b)) => {
            for (k, v) in b {
                merge(a.entry(k.clone()).or_insert(serde_json::Value::Null), v);
            }
        }
        (a, b) if !b.is_null() => *a = b.clone(),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cli = Cli::parse_from(["farm-worker"]);
        assert_eq!(cli.heart_rate, 60);
        assert_eq!(cli.max_wait, 600);
        assert_eq!(cli.dead_thread_wait, 120);
        assert_eq!(cli.job_size, 10);
        assert!(!cli.quiet);
    }
}
