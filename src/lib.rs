pub mod alert;
pub mod batch;
pub mod config;
pub mod error;
pub mod partition;
pub mod scheduler;
pub mod session;

#[cfg(test)]
mod testing;

pub use config::{Cli, ConnectionConfig, PartitionTarget, Settings, SqlSource};
pub use error::{ConfigError, ExecError};
pub use session::{Executor, MySqlConnector, Row};
