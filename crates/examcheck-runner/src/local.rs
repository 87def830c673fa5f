//! A machine that runs sessions on the master itself.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use examcheck_core::command::TakeExamCommand;
use examcheck_core::error::{DomainError, ErrorDomain};
use examcheck_core::orchestration::Orchestration;
use examcheck_core::result::{ExamResult, Origin};
use examcheck_core::traits::{Machine, ProgressReporter};

use crate::isolation::Launcher;
use crate::session::{SessionRecord, UiConnector};

#[derive(Debug, Clone)]
pub struct LocalMachine {
    name: String,
    launcher: Launcher,
}

impl LocalMachine {
    pub fn new(name: impl Into<String>, launcher: Launcher) -> Self {
        Self {
            name: name.into(),
            launcher,
        }
    }

    /// Sessions on supervised tasks of this process.
    pub fn supervised(name: impl Into<String>, connector: Arc<dyn UiConnector>) -> Self {
        Self::new(name, Launcher::Supervised { connector })
    }
}

#[async_trait]
impl Machine for LocalMachine {
    fn name(&self) -> &str {
        &self.name
    }

    async fn take_exam(
        &self,
        _batch_id: &str,
        command: &TakeExamCommand,
        orchestration: &Orchestration,
        progress: &dyn ProgressReporter,
    ) -> Result<ExamResult> {
        let mut rx = self
            .launcher
            .launch(command.clone(), orchestration.token().child_token());

        while let Some(record) = rx.recv().await {
            match record {
                SessionRecord::Echo(message) => progress.report(&self.name, &message),
                SessionRecord::Screenshot(data) => match STANDARD.decode(data.as_bytes()) {
                    Ok(png) => progress.on_screenshot(&self.name, &png),
                    Err(e) => tracing::warn!("{}: undecodable screenshot: {e}", self.name),
                },
                SessionRecord::Done(json) => return ExamResult::from_json(&json),
                SessionRecord::Error(message) => {
                    return Ok(ExamResult::from_error(
                        Origin::Recorded,
                        ErrorDomain::Unexpected,
                        format!("session on {} died: {message}", self.name),
                        BTreeMap::new(),
                    ))
                }
            }
        }
        Err(DomainError::interaction(format!("session on {} ended without result", self.name)).into())
    }
}
