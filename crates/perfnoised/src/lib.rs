pub mod cli;
pub mod logging;
pub mod orchestrator;
pub mod ranking;
pub mod refresh;
pub mod report;
pub mod worker_pool;
