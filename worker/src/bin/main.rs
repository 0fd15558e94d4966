use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use farmcore::MockScoringBackend;
use farmcore_worker::worker::WorkerConfig;
use farmcore_worker::{Cli, Worker};

fn main() {
    let mut cli = Cli::parse();
    if let Err(err) = cli.merge_from_file() {
        eprintln!("failed to read --config: {err}");
        std::process::exit(1);
    }

    let _guard = farmcore_worker::logging::subscribe(&cli.log, cli.quiet, cli.log_path.as_deref());

    let cpu_count = cli.max_cpus.unwrap_or_else(|| num_cpus::get().saturating_sub(1).max(1));
    let config = WorkerConfig {
        workdb: cli.workdb.clone(),
        heart_rate: Duration::from_secs(cli.heart_rate),
        max_wait: Duration::from_secs(cli.max_wait),
        dead_thread_wait: Duration::from_secs(cli.dead_thread_wait),
        cpu_count,
        job_size: cli.job_size,
        gc_probability: 0.05,
    };

    // The real alignment/trim/scoring kernels are external collaborators
    // (spec.md §1, §6) outside this crate's scope; wiring in a real
    // `ScoringBackend` implementation is a deployment concern.
    let scoring = Arc::new(MockScoringBackend);

    let mut worker = match Worker::bootstrap(config, scoring) {
        Ok(worker) => worker,
        Err(err) => {
            eprintln!("failed to start worker: {err}");
            std::process::exit(1);
        }
    };

    tracing::info!(worker_id = worker.worker_id(), "worker started");

    if let Err(err) = worker.run() {
        eprintln!("Terminating worker because of {err}");
        std::process::exit(1);
    }
}
