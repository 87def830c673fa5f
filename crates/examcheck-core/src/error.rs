//! Error domains.
//!
//! Every failure observed during a run is classified into one domain of an
//! ordered severity ladder. Workers never let an unclassified error cross the
//! process boundary: they return a [`crate::result::ExamResult`] carrying the
//! domain and message instead.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Severity ladder, ascending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorDomain {
    None = 0,
    /// A question kind or feature the engine does not support.
    NotImplemented = 1,
    /// Automation flakiness, not a defect of the system under test.
    Interaction = 2,
    Unexpected = 3,
    /// Answer mismatch after a simulated crash; possibly sporadic.
    AutoSave = 4,
    /// The server accepted data it should have rejected.
    InvalidSave = 5,
    /// Confirmed data loss or corruption. Always fatal.
    Integrity = 6,
}

impl ErrorDomain {
    pub const ALL: [ErrorDomain; 7] = [
        ErrorDomain::None,
        ErrorDomain::NotImplemented,
        ErrorDomain::Interaction,
        ErrorDomain::Unexpected,
        ErrorDomain::AutoSave,
        ErrorDomain::InvalidSave,
        ErrorDomain::Integrity,
    ];

    /// Wire and storage name of the domain.
    pub fn name(self) -> &'static str {
        match self {
            ErrorDomain::None => "none",
            ErrorDomain::NotImplemented => "not_implemented",
            ErrorDomain::Interaction => "interaction",
            ErrorDomain::Unexpected => "unexpected",
            ErrorDomain::AutoSave => "auto_save",
            ErrorDomain::InvalidSave => "invalid_save",
            ErrorDomain::Integrity => "integrity",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|d| d.name() == name)
    }

    pub fn from_level(level: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|d| *d as u8 == level)
    }

    pub fn level(self) -> u8 {
        self as u8
    }

    /// Reduce a set of observed domains to the worst one; `None` for an empty set.
    pub fn most_severe(domains: impl IntoIterator<Item = ErrorDomain>) -> ErrorDomain {
        domains.into_iter().max().unwrap_or(ErrorDomain::None)
    }
}

impl fmt::Display for ErrorDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A failure tagged with its severity domain.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{domain} error: {message}")]
pub struct DomainError {
    pub domain: ErrorDomain,
    pub message: String,
}

impl DomainError {
    pub fn new(domain: ErrorDomain, message: impl Into<String>) -> Self {
        Self {
            domain,
            message: message.into(),
        }
    }

    pub fn not_implemented(message: impl Into<String>) -> Self {
        Self::new(ErrorDomain::NotImplemented, message)
    }

    pub fn interaction(message: impl Into<String>) -> Self {
        Self::new(ErrorDomain::Interaction, message)
    }

    pub fn auto_save(message: impl Into<String>) -> Self {
        Self::new(ErrorDomain::AutoSave, message)
    }

    pub fn invalid_save(message: impl Into<String>) -> Self {
        Self::new(ErrorDomain::InvalidSave, message)
    }

    pub fn integrity(message: impl Into<String>) -> Self {
        Self::new(ErrorDomain::Integrity, message)
    }

    /// Returns `true` if this error must stop verification immediately.
    pub fn is_fatal(&self) -> bool {
        self.domain == ErrorDomain::Integrity
    }
}

/// Failure reported by a UI-automation collaborator (page did not load,
/// element missing, browser gone). Always classified as interaction.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("ui automation failed: {0}")]
pub struct UiError(pub String);

/// Classify an arbitrary error into a domain.
///
/// Domain errors keep their domain, UI collaborator failures are interaction
/// errors and everything else is unexpected.
pub fn classify(err: &anyhow::Error) -> ErrorDomain {
    if let Some(e) = err.downcast_ref::<DomainError>() {
        return e.domain;
    }
    if err.downcast_ref::<UiError>().is_some() {
        return ErrorDomain::Interaction;
    }
    for cause in err.chain() {
        if let Some(e) = cause.downcast_ref::<DomainError>() {
            return e.domain;
        }
        if cause.downcast_ref::<UiError>().is_some() {
            return ErrorDomain::Interaction;
        }
    }
    ErrorDomain::Unexpected
}
