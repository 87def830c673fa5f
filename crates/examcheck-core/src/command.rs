//! The command a master sends to a worker machine.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::context::{Context, ContextKind, Language};
use crate::error::DomainError;
use crate::exam::ExamConfiguration;
use crate::question::QuestionSet;
use crate::settings::{Settings, Workarounds};

pub const TAKE_EXAM: &str = "take_exam";

/// Everything a worker needs to take one exam as one participant.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TakeExamCommand {
    /// Always [`TAKE_EXAM`].
    pub command: String,
    /// Name of the worker machine.
    pub machine: String,
    /// 1-based machine index; decides regression vs fuzzing.
    pub machine_index: u32,
    pub username: String,
    pub password: String,
    pub test_id: String,
    pub test_url: String,
    pub server_url: String,
    /// Factor applied to every simulated wait (autosave, crashes).
    pub wait_time: f64,
    pub admin_lang: Language,
    pub questions: QuestionSet,
    pub exam_configuration: ExamConfiguration,
    pub settings: Settings,
    pub workarounds: Workarounds,
}

impl fmt::Debug for TakeExamCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TakeExamCommand")
            .field("command", &self.command)
            .field("machine", &self.machine)
            .field("machine_index", &self.machine_index)
            .field("username", &self.username)
            .field("password", &"***")
            .field("test_id", &self.test_id)
            .field("test_url", &self.test_url)
            .field("server_url", &self.server_url)
            .field("wait_time", &self.wait_time)
            .field("admin_lang", &self.admin_lang)
            .field("questions", &self.questions.len())
            .finish_non_exhaustive()
    }
}

impl TakeExamCommand {
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let command: TakeExamCommand = serde_json::from_str(json)?;
        command.validate()?;
        Ok(command)
    }

    pub fn to_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        if self.command != TAKE_EXAM {
            return Err(DomainError::interaction(format!(
                "unknown worker command '{}'",
                self.command
            )));
        }
        self.questions.validate()?;
        self.exam_configuration
            .check_version()
            .map_err(DomainError::not_implemented)?;
        self.settings.validate().map_err(DomainError::interaction)?;
        Ok(())
    }

    pub fn context_kind(&self) -> ContextKind {
        ContextKind::for_machine(self.machine_index, &self.settings)
    }

    /// A fresh session context for this command.
    pub fn context(&self) -> Context {
        Context::new(
            self.context_kind(),
            self.settings.clone(),
            self.workarounds.clone(),
            self.admin_lang,
        )
    }
}
