//! examcheck-core: Scoring engine, results, coverage and run orchestration.
//!
//! This crate defines the question model and its scoring rules, the result
//! format shared by workers and master, the collaborator traits, and the
//! batch/run state machine that the rest of examcheck builds on.

pub mod batch;
pub mod command;
pub mod context;
pub mod coverage;
pub mod decimal;
pub mod error;
pub mod exam;
pub mod expected;
pub mod implicit;
pub mod orchestration;
pub mod protocol;
pub mod question;
pub mod result;
pub mod run;
pub mod settings;
pub mod traits;
