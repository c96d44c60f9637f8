//! Remote Command Executor.

pub mod executor;
pub mod guard;

pub use executor::{CommandOutput, DEFAULT_OUTPUT_CAP, RemoteExecutor};
pub use guard::validate_command;
