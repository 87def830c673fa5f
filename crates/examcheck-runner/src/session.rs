//! One worker session and the record stream it produces.
//!
//! A session reports through [`SessionRecord`]s: any number of `ECHO` and
//! `SCREENSHOT` records followed by exactly one terminal `DONE` or `ERROR`.
//! On the wire every record is a two-element JSON array, one per line.

use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

use examcheck_core::command::TakeExamCommand;
use examcheck_core::error::classify;
use examcheck_core::result::{ExamResult, Origin};
use examcheck_core::traits::ExamUi;

use crate::robot::ExamRobot;

/// A progress or result record of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "(String, String)", try_from = "(String, String)")]
pub enum SessionRecord {
    /// A protocol line for the master's log.
    Echo(String),
    /// The session's current screen, base64 PNG.
    Screenshot(String),
    /// The recorded result as JSON.
    Done(String),
    /// The session died before it could produce a result.
    Error(String),
}

#[derive(Debug, Error)]
#[error("unknown session record '{0}'")]
pub struct UnknownRecord(pub String);

impl SessionRecord {
    pub fn tag(&self) -> &'static str {
        match self {
            SessionRecord::Echo(_) => "ECHO",
            SessionRecord::Screenshot(_) => "SCREENSHOT",
            SessionRecord::Done(_) => "DONE",
            SessionRecord::Error(_) => "ERROR",
        }
    }

    pub fn payload(&self) -> &str {
        match self {
            SessionRecord::Echo(p)
            | SessionRecord::Screenshot(p)
            | SessionRecord::Done(p)
            | SessionRecord::Error(p) => p,
        }
    }

    /// `DONE` and `ERROR` end a session.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionRecord::Done(_) | SessionRecord::Error(_))
    }

    pub fn to_line(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_line(line: &str) -> Result<Self> {
        Ok(serde_json::from_str(line)?)
    }
}

impl From<SessionRecord> for (String, String) {
    fn from(record: SessionRecord) -> Self {
        (record.tag().to_string(), record.payload().to_string())
    }
}

impl TryFrom<(String, String)> for SessionRecord {
    type Error = UnknownRecord;

    fn try_from((tag, payload): (String, String)) -> Result<Self, UnknownRecord> {
        match tag.as_str() {
            "ECHO" => Ok(SessionRecord::Echo(payload)),
            "SCREENSHOT" => Ok(SessionRecord::Screenshot(payload)),
            "DONE" => Ok(SessionRecord::Done(payload)),
            "ERROR" => Ok(SessionRecord::Error(payload)),
            _ => Err(UnknownRecord(tag)),
        }
    }
}

/// Where a running session sends its records.
#[derive(Debug, Clone)]
pub struct SessionReporter {
    tx: mpsc::UnboundedSender<SessionRecord>,
}

impl SessionReporter {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SessionRecord>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Send a record; a gone receiver is not an error for the session.
    pub fn send(&self, record: SessionRecord) {
        let _ = self.tx.send(record);
    }

    pub fn echo(&self, message: &str) {
        self.send(SessionRecord::Echo(message.to_string()));
    }

    pub fn screenshot(&self, png: &[u8]) {
        self.send(SessionRecord::Screenshot(STANDARD.encode(png)));
    }
}

/// Opens the UI a session drives.
#[async_trait]
pub trait UiConnector: Send + Sync {
    async fn connect(&self, command: &TakeExamCommand) -> Result<Box<dyn ExamUi>>;
}

/// Take one exam and return the recorded result.
///
/// Never fails: any error becomes an error-only result carrying the classified
/// domain, the protocol so far, a trace file and a screenshot if available.
pub async fn run_session(
    connector: &dyn UiConnector,
    command: &TakeExamCommand,
    reporter: &SessionReporter,
) -> ExamResult {
    reporter.echo(&format!(
        "running test on machine #{} ({}).",
        command.machine_index, command.machine
    ));

    let mut ui = match connector.connect(command).await {
        Ok(ui) => ui,
        Err(e) => return failed(command, reporter, &e, Vec::new(), None),
    };

    let mut robot = ExamRobot::new(ui.as_mut(), command, reporter);
    match robot.run().await {
        Ok(result) => {
            reporter.echo("test finished.");
            result
        }
        Err(e) => {
            let protocol = robot.protocol_lines();
            drop(robot);
            let png = ui.screenshot().await.ok().flatten();
            failed(command, reporter, &e, protocol, png)
        }
    }
}

fn failed(
    command: &TakeExamCommand,
    reporter: &SessionReporter,
    error: &anyhow::Error,
    protocol: Vec<String>,
    png: Option<Vec<u8>>,
) -> ExamResult {
    let domain = classify(error);
    tracing::error!(machine = %command.machine, %domain, "session failed: {error:#}");
    reporter.echo(&format!("test failed: {error:#}"));

    let mut files = BTreeMap::new();
    files.insert("trace.txt".to_string(), format!("{error:?}").into_bytes());
    if let Some(png) = png {
        files.insert("error.png".to_string(), png);
    }
    let message = format!(
        "test failed: {error:#}. for details, see {}_trace.txt.",
        command.username
    );
    let mut result = ExamResult::from_error(Origin::Recorded, domain, message, files);
    result.attach_protocol(protocol);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_wire_form() {
        let line = SessionRecord::Echo("entering pass 0.".into()).to_line().unwrap();
        assert_eq!(line, r#"["ECHO","entering pass 0."]"#);
        let back = SessionRecord::from_line(r#"["DONE","{}"]"#).unwrap();
        assert_eq!(back, SessionRecord::Done("{}".into()));
        assert!(back.is_terminal());
    }

    #[test]
    fn unknown_tags_are_rejected() {
        assert!(SessionRecord::from_line(r#"["REBOOT",""]"#).is_err());
        assert!(SessionRecord::from_line(r#"["ECHO"]"#).is_err());
    }

    #[test]
    fn unknown_tag_is_named_in_the_error() {
        let err = SessionRecord::try_from(("REBOOT".to_string(), String::new())).unwrap_err();
        assert_eq!(err.0, "REBOOT");
        assert_eq!(err.to_string(), "unknown session record 'REBOOT'");
        let record = SessionRecord::try_from(("ERROR".to_string(), "boom".to_string())).unwrap();
        assert_eq!(record, SessionRecord::Error("boom".into()));
    }

    #[tokio::test]
    async fn screenshots_are_base64() {
        let (reporter, mut rx) = SessionReporter::channel();
        reporter.screenshot(b"png");
        assert_eq!(rx.recv().await, Some(SessionRecord::Screenshot("cG5n".into())));
    }
}
