//! examcheck-machines: the master's view of its worker machines.
//!
//! [`HttpMachine`] drives a remote worker over its HTTP surface, polling the
//! session's records under the batch-wide poll limiter. The configuration
//! module loads `examcheck.toml` and turns it into run configuration and
//! machine tables.

pub mod config;
pub mod error;
pub mod http;
pub mod mock;

pub use config::{load_config, load_config_from, ExamcheckConfig, RunSection, TestSection};
pub use error::MachineError;
pub use http::HttpMachine;
pub use mock::MockMachine;
