pub mod cli;
pub mod logging;
pub mod worker;

pub use cli::Cli;
pub use worker::{LoopOutcome, Worker, WorkerConfig};
