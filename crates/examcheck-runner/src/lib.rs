//! examcheck-runner: Worker-side exam sessions.
//!
//! The [`robot`] takes one exam through an [`ExamUi`](examcheck_core::traits::ExamUi)
//! and derives the result the server has to export. Sessions run isolated
//! (child process or supervised task), stream their progress as
//! [`SessionRecord`](session::SessionRecord)s, and are exposed to the master
//! over the worker HTTP surface in [`server`]. [`simulated`] is an in-memory
//! exam server with injectable defects.

pub mod isolation;
pub mod local;
pub mod robot;
pub mod server;
pub mod session;
pub mod simulated;
pub mod worker;

pub use isolation::Launcher;
pub use local::LocalMachine;
pub use robot::ExamRobot;
pub use server::WorkerServer;
pub use session::{run_session, SessionRecord, SessionReporter, UiConnector};
pub use simulated::{Faults, SimulatedServer, StandaloneSimulation};
pub use worker::{StartStatus, WorkerMachine};
