pub mod pool;
pub mod signal;

pub use pool::{PoolConfig, PoolReport, RestartPolicy, WorkerCommand, WorkerPool};
