//! examcheck-store: persistence of finished runs.
//!
//! Keeps every run's status and file bundle, the timing samples of all
//! sessions, the union of coverage cases and occurrences seen so far and a
//! long-term success history. The master writes through
//! [`examcheck_core::traits::ResultStore`]; the CLI's `report` reads back
//! through the query methods of [`Store`].

pub mod db;

pub use db::{CoverageReport, LongtermRow, QuestionCoverage, RunDetail, Store};
