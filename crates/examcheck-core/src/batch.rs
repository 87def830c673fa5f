//! A batch: one run, or an endless series of runs, with live progress.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::orchestration::Orchestration;
use crate::run::{Run, RunConfig, RunOutcome, TestCache};
use crate::traits::{ExamAdmin, Machine, ProgressReporter, ResultStore};

/// A progress event of a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BatchEvent {
    Message { origin: String, message: String },
    Done { success: String },
}

#[derive(Default)]
struct BatchState {
    buffered: Vec<BatchEvent>,
    subscribers: BTreeMap<u64, mpsc::UnboundedSender<BatchEvent>>,
    next_subscriber: u64,
    success: Option<String>,
    screenshot: Option<Vec<u8>>,
}

/// Batch ids sort by creation time: `%Y%m%d%H%M%S-<uuid4>`.
pub fn new_batch_id() -> String {
    format!(
        "{}-{}",
        chrono::Local::now().format("%Y%m%d%H%M%S"),
        Uuid::new_v4()
    )
}

pub struct Batch {
    id: String,
    config: RunConfig,
    admin: Arc<dyn ExamAdmin>,
    machines: Vec<Arc<dyn Machine>>,
    store: Option<Arc<dyn ResultStore>>,
    cache: Arc<TestCache>,
    orchestration: Orchestration,
    looping: bool,
    state: Mutex<BatchState>,
}

impl Batch {
    pub fn new(
        config: RunConfig,
        admin: Arc<dyn ExamAdmin>,
        machines: Vec<Arc<dyn Machine>>,
        orchestration: Orchestration,
    ) -> Self {
        Self {
            id: new_batch_id(),
            config,
            admin,
            machines,
            store: None,
            cache: Arc::new(TestCache::new()),
            orchestration,
            looping: false,
            state: Mutex::new(BatchState::default()),
        }
    }

    pub fn with_store(mut self, store: Arc<dyn ResultStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Keep starting new runs until cancelled.
    pub fn looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// A receiver of the current run's events so far and all future ones.
    /// Late subscribers of a finished batch get the last run's replay and
    /// the `Done` event.
    pub fn subscribe(&self) -> (u64, mpsc::UnboundedReceiver<BatchEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock();
        for event in &state.buffered {
            let _ = tx.send(event.clone());
        }
        let id = state.next_subscriber;
        state.next_subscriber += 1;
        if state.success.is_none() {
            state.subscribers.insert(id, tx);
        }
        (id, rx)
    }

    pub fn unsubscribe(&self, id: u64) {
        self.state.lock().subscribers.remove(&id);
    }

    fn publish(&self, event: BatchEvent) {
        let mut state = self.state.lock();
        state.buffered.push(event.clone());
        state
            .subscribers
            .retain(|_, tx| tx.send(event.clone()).is_ok());
    }

    pub fn is_done(&self) -> bool {
        self.state.lock().success.is_some()
    }

    /// Final status code once done.
    pub fn success(&self) -> Option<String> {
        self.state.lock().success.clone()
    }

    pub fn screenshot(&self) -> Option<Vec<u8>> {
        self.state.lock().screenshot.clone()
    }

    /// Run once, or loop until cancelled. Returns the last status code.
    pub async fn run(&self) -> String {
        let mut success = "FAIL/unknown".to_string();
        let mut rounds = 0u32;
        loop {
            if rounds > 0 {
                // late subscribers replay the current run only
                self.state.lock().buffered.clear();
            }
            self.report(
                "master",
                &format!("starting run on test '{}'.", self.config.test_title),
            );
            // Each looped run is stored under its own id.
            let run_id = if rounds == 0 { self.id.clone() } else { new_batch_id() };
            rounds += 1;
            let run = Run::new(
                &self.config,
                &run_id,
                Arc::clone(&self.admin),
                self.machines.clone(),
                Arc::clone(&self.cache),
                self.orchestration.clone(),
                self,
            );
            let outcome = run.execute().await;
            self.persist(&outcome);
            success = outcome.record.success;

            if !self.looping || self.orchestration.is_cancelled() {
                break;
            }
        }
        if self.orchestration.is_cancelled() {
            self.report("master", "shutting down after cancellation.");
        }
        self.finish(&success);
        success
    }

    fn persist(&self, outcome: &RunOutcome) {
        let Some(store) = &self.store else { return };
        if let Err(e) = outcome.persist(store.as_ref()) {
            tracing::error!("could not save results to store: {e:#}");
            self.report("error", &format!("could not save results to store: {e:#}"));
        }
    }

    fn finish(&self, success: &str) {
        let event = BatchEvent::Done {
            success: success.to_string(),
        };
        self.publish(event);
        let mut state = self.state.lock();
        state.success = Some(success.to_string());
        state.subscribers.clear();
    }
}

impl ProgressReporter for Batch {
    fn report(&self, origin: &str, message: &str) {
        match origin {
            "error" => tracing::error!(batch = %self.id, origin, "{message}"),
            _ => tracing::info!(batch = %self.id, origin, "{message}"),
        }
        self.publish(BatchEvent::Message {
            origin: origin.to_string(),
            message: message.to_string(),
        });
    }

    fn on_screenshot(&self, _origin: &str, png: &[u8]) {
        self.state.lock().screenshot = Some(png.to_vec());
    }
}
