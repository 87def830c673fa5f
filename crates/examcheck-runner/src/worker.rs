//! State of a worker machine serving the master over HTTP.
//!
//! A worker runs at most one session at a time. Every record the session
//! produces is buffered under the session's batch id, so the master can poll
//! with a growing index and never miss or repeat a record.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use examcheck_core::command::TakeExamCommand;

use crate::isolation::Launcher;
use crate::session::SessionRecord;

/// Answer to a start request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StartStatus {
    Started,
    /// This batch's session was started before; the request was ignored.
    AlreadyStarted,
    /// Another batch's session is active; the request was ignored.
    Running,
}

#[derive(Debug, Default)]
struct WorkerState {
    batch_id: Option<String>,
    records: Vec<SessionRecord>,
    active: bool,
    screenshot: Option<String>,
}

#[derive(Debug)]
pub struct WorkerMachine {
    launcher: Launcher,
    cancel: CancellationToken,
    state: Mutex<WorkerState>,
}

impl WorkerMachine {
    pub fn new(launcher: Launcher) -> Self {
        Self {
            launcher,
            cancel: CancellationToken::new(),
            state: Mutex::new(WorkerState::default()),
        }
    }

    /// Start a session for `batch_id` unless one is active. Repeated starts
    /// of the same batch are no-ops, so a master may retry them.
    pub fn start(self: &Arc<Self>, batch_id: &str, command: TakeExamCommand) -> StartStatus {
        {
            let mut state = self.state.lock();
            if state.batch_id.as_deref() == Some(batch_id) {
                return StartStatus::AlreadyStarted;
            }
            if state.active {
                return StartStatus::Running;
            }
            *state = WorkerState {
                batch_id: Some(batch_id.to_string()),
                records: Vec::new(),
                active: true,
                screenshot: None,
            };
        }
        tracing::info!(batch = batch_id, machine = %command.machine, "starting session");

        let mut rx = self.launcher.launch(command, self.cancel.child_token());
        let worker = Arc::clone(self);
        tokio::spawn(async move {
            let mut terminal = false;
            while let Some(record) = rx.recv().await {
                terminal |= record.is_terminal();
                worker.push(record);
                if terminal {
                    break;
                }
            }
            if !terminal {
                worker.push(SessionRecord::Error("session ended without result".to_string()));
            }
            worker.state.lock().active = false;
        });
        StartStatus::Started
    }

    fn push(&self, record: SessionRecord) {
        let mut state = self.state.lock();
        if let SessionRecord::Screenshot(png) = &record {
            state.screenshot = Some(png.clone());
        }
        state.records.push(record);
    }

    /// Records from `index` on. Empty for any other batch.
    pub fn monitor(&self, batch_id: &str, index: usize) -> Vec<SessionRecord> {
        let state = self.state.lock();
        if state.batch_id.as_deref() != Some(batch_id) {
            return Vec::new();
        }
        state.records.get(index..).map(<[_]>::to_vec).unwrap_or_default()
    }

    /// Latest screenshot of the batch's session, base64.
    pub fn screenshot(&self, batch_id: &str) -> Option<String> {
        let state = self.state.lock();
        if state.batch_id.as_deref() != Some(batch_id) {
            return None;
        }
        state.screenshot.clone()
    }

    pub fn is_active(&self) -> bool {
        self.state.lock().active
    }

    /// Tear down the active session, if any.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::simulated::SimulatedServer;
    use examcheck_core::command::TAKE_EXAM;
    use examcheck_core::context::Language;
    use examcheck_core::question::QuestionSet;

    fn command() -> TakeExamCommand {
        let mut settings = examcheck_core::settings::Settings::default();
        settings.crash_frequency = 0;
        TakeExamCommand {
            command: TAKE_EXAM.to_string(),
            machine: "machine1".into(),
            machine_index: 1,
            username: "tu_1".into(),
            password: "pw".into(),
            test_id: "7".into(),
            test_url: "sim://exam/test/7".into(),
            server_url: "sim://exam".into(),
            wait_time: 0.0,
            admin_lang: Language::En,
            questions: QuestionSet::demo(),
            exam_configuration: Default::default(),
            settings,
            workarounds: Default::default(),
        }
    }

    async fn wait_idle(worker: &WorkerMachine) {
        for _ in 0..500 {
            if !worker.is_active() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("session did not finish");
    }

    #[tokio::test]
    async fn buffers_records_per_batch() {
        let cmd = command();
        let worker = Arc::new(WorkerMachine::new(Launcher::Supervised {
            connector: Arc::new(SimulatedServer::standalone(&cmd)),
        }));
        assert_eq!(worker.start("b1", cmd.clone()), StartStatus::Started);
        assert_eq!(worker.start("b1", cmd.clone()), StartStatus::AlreadyStarted);
        assert_eq!(worker.start("b0", cmd.clone()), StartStatus::Running);
        wait_idle(&worker).await;
        // a late retry must not reset the finished session's records
        let finished = worker.monitor("b1", 0).len();
        assert_eq!(worker.start("b1", cmd.clone()), StartStatus::AlreadyStarted);
        assert_eq!(worker.monitor("b1", 0).len(), finished);
        assert!(!worker.is_active());

        let all = worker.monitor("b1", 0);
        assert!(matches!(all.last(), Some(SessionRecord::Done(_))));
        assert_eq!(worker.monitor("b1", 2), all[2..].to_vec());
        assert!(worker.monitor("b1", all.len() + 5).is_empty());
        assert!(worker.monitor("other", 0).is_empty());
        assert!(worker.screenshot("b1").is_some());

        assert_eq!(worker.start("b2", cmd), StartStatus::Started);
        wait_idle(&worker).await;
        assert!(worker.monitor("b1", 0).is_empty());
    }
}
