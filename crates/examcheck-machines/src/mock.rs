//! Mock machine for testing.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use examcheck_core::command::TakeExamCommand;
use examcheck_core::error::ErrorDomain;
use examcheck_core::orchestration::Orchestration;
use examcheck_core::result::{ExamResult, Origin};
use examcheck_core::traits::{Machine, ProgressReporter};

type Responder = dyn Fn(&TakeExamCommand) -> anyhow::Result<ExamResult> + Send + Sync;

/// A machine that answers take-exam commands without running a session.
///
/// Records every command it receives.
pub struct MockMachine {
    name: String,
    responder: Box<Responder>,
    call_count: AtomicU32,
    commands: Mutex<Vec<TakeExamCommand>>,
    batch_ids: Mutex<Vec<String>>,
}

impl MockMachine {
    pub fn new<F>(name: impl Into<String>, responder: F) -> Self
    where
        F: Fn(&TakeExamCommand) -> anyhow::Result<ExamResult> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            responder: Box::new(responder),
            call_count: AtomicU32::new(0),
            commands: Mutex::new(Vec::new()),
            batch_ids: Mutex::new(Vec::new()),
        }
    }

    /// A machine whose every session fails in `domain`.
    pub fn failing(name: impl Into<String>, domain: ErrorDomain, message: &str) -> Self {
        let message = message.to_string();
        Self::new(name, move |_| {
            Ok(ExamResult::from_error(
                Origin::Recorded,
                domain,
                message.clone(),
                BTreeMap::new(),
            ))
        })
    }

    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::Relaxed)
    }

    pub fn commands(&self) -> Vec<TakeExamCommand> {
        self.commands.lock().clone()
    }

    pub fn batch_ids(&self) -> Vec<String> {
        self.batch_ids.lock().clone()
    }
}

#[async_trait]
impl Machine for MockMachine {
    fn name(&self) -> &str {
        &self.name
    }

    async fn take_exam(
        &self,
        batch_id: &str,
        command: &TakeExamCommand,
        _orchestration: &Orchestration,
        progress: &dyn ProgressReporter,
    ) -> anyhow::Result<ExamResult> {
        self.call_count.fetch_add(1, Ordering::Relaxed);
        self.commands.lock().push(command.clone());
        self.batch_ids.lock().push(batch_id.to_string());
        progress.report(&self.name, "mock session.");
        (self.responder)(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use examcheck_core::traits::NoopReporter;

    #[tokio::test]
    async fn failing_machine() {
        let m = MockMachine::failing("m1", ErrorDomain::AutoSave, "lost");
        let cmd = TakeExamCommand::from_json(&sample_command()).unwrap();
        let result = m
            .take_exam("b1", &cmd, &Orchestration::new(), &NoopReporter)
            .await
            .unwrap();
        assert_eq!(result.most_severe_error_domain(), ErrorDomain::AutoSave);
        assert_eq!(m.call_count(), 1);
        assert_eq!(m.commands()[0].username, "tu_1");
        assert_eq!(m.batch_ids(), ["b1"]);
    }

    fn sample_command() -> String {
        serde_json::json!({
            "command": "take_exam",
            "machine": "m1",
            "machineIndex": 1,
            "username": "tu_1",
            "password": "pw",
            "testId": "1",
            "testUrl": "sim://exam/test/1",
            "serverUrl": "sim://exam",
            "waitTime": 0.0,
            "adminLang": "en",
            "questions": examcheck_core::question::QuestionSet::demo(),
            "examConfiguration": examcheck_core::exam::ExamConfiguration::default(),
            "settings": {},
            "workarounds": {}
        })
        .to_string()
    }
}
