use std::sync::Arc;

use parking_lot::Mutex;

use examcheck_core::batch::{Batch, BatchEvent};
use examcheck_core::context::Language;
use examcheck_core::coverage::Coverage;
use examcheck_core::exam::ExamConfiguration;
use examcheck_core::orchestration::Orchestration;
use examcheck_core::question::QuestionSet;
use examcheck_core::run::RunConfig;
use examcheck_core::settings::Settings;
use examcheck_core::traits::{Machine, ResultStore, RunRecord};
use examcheck_runner::{Faults, LocalMachine, SimulatedServer};

fn setup(faults: Faults, settings: Settings) -> (SimulatedServer, Batch) {
    setup_with(faults, settings, false, Orchestration::new())
}

fn setup_with(
    faults: Faults,
    settings: Settings,
    recycle_users: bool,
    orchestration: Orchestration,
) -> (SimulatedServer, Batch) {
    let server = SimulatedServer::with_faults(Language::En, faults);
    let test_id = server.create_test("Demo", QuestionSet::demo(), ExamConfiguration::default());

    let machines: Vec<Arc<dyn Machine>> = (1..=2)
        .map(|i| {
            Arc::new(LocalMachine::supervised(
                format!("machine{i}"),
                Arc::new(server.clone()),
            )) as Arc<dyn Machine>
        })
        .collect();

    let config = RunConfig {
        test_id,
        test_title: "Demo".to_string(),
        server_url: "sim://exam".to_string(),
        wait_time: 0.0,
        master_seed: Some(42),
        settings,
        recycle_users,
        ..RunConfig::default()
    };
    let batch = Batch::new(config, Arc::new(server.clone()), machines, orchestration);
    (server, batch)
}

/// Keeps the run records it is given.
#[derive(Default)]
struct RecordingStore {
    runs: Mutex<Vec<RunRecord>>,
}

impl ResultStore for RecordingStore {
    fn put_run(&self, record: &RunRecord) -> anyhow::Result<()> {
        self.runs.lock().push(record.clone());
        Ok(())
    }

    fn put_performance(&self, _samples: &[f64]) -> anyhow::Result<()> {
        Ok(())
    }

    fn put_coverage(&self, _coverage: &Coverage) -> anyhow::Result<()> {
        Ok(())
    }
}

fn is_message(event: &BatchEvent, text: &str) -> bool {
    matches!(event, BatchEvent::Message { message, .. } if message.contains(text))
}

fn deterministic() -> Settings {
    Settings {
        num_deterministic_machines: 2,
        crash_frequency: 0,
        ..Settings::default()
    }
}

#[tokio::test]
async fn clean_run_passes_and_cleans_up() {
    let (server, batch) = setup(Faults::default(), deterministic());
    let (_, mut events) = batch.subscribe();

    let success = batch.run().await;
    assert_eq!(success, "OK");
    assert!(batch.is_done());
    assert_eq!(batch.success().as_deref(), Some("OK"));

    // only the source test is left; the working copy and the reimport are gone
    assert_eq!(server.test_ids().len(), 1);
    assert_eq!(server.user_count(), 0);

    let mut last = None;
    while let Some(event) = events.recv().await {
        last = Some(event);
    }
    assert_eq!(last, Some(BatchEvent::Done { success: "OK".into() }));
}

#[tokio::test]
async fn corrupt_export_fails_integrity() {
    let faults = Faults {
        corrupt_exported_scores: true,
        ..Faults::default()
    };
    let (server, batch) = setup(faults, deterministic());
    assert_eq!(batch.run().await, "FAIL/integrity");
    assert_eq!(server.test_ids().len(), 1);
}

#[tokio::test]
async fn lost_autosave_fails_run() {
    let faults = Faults {
        drop_autosave: true,
        ..Faults::default()
    };
    let settings = Settings {
        crash_frequency: 100,
        ..deterministic()
    };
    let (server, batch) = setup(faults, settings);
    assert_eq!(batch.run().await, "FAIL/auto_save");
    assert_eq!(server.user_count(), 0);
}

#[tokio::test]
async fn late_subscribers_get_replay() {
    let (_, batch) = setup(Faults::default(), deterministic());
    batch.run().await;

    let (_, mut events) = batch.subscribe();
    let mut count = 0;
    let mut done = false;
    while let Some(event) = events.recv().await {
        count += 1;
        done |= matches!(event, BatchEvent::Done { .. });
    }
    assert!(count > 1);
    assert!(done);
}

#[tokio::test]
async fn stale_import_fails_integrity() {
    let faults = Faults {
        stale_scores_on_import: true,
        ..Faults::default()
    };
    let (server, batch) = setup(faults, deterministic());
    assert_eq!(batch.run().await, "FAIL/integrity");
    assert_eq!(server.test_ids().len(), 1);
    assert_eq!(server.user_count(), 0);
}

#[tokio::test]
async fn looping_runs_reuse_recycled_users() {
    let orchestration = Orchestration::new();
    let (server, batch) = setup_with(Faults::default(), deterministic(), true, orchestration.clone());
    let store = Arc::new(RecordingStore::default());
    let batch = batch.looping(true).with_store(store.clone());

    // stop once the second run picked up the first run's users
    let (_, mut events) = batch.subscribe();
    let watcher = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if is_message(&event, "reusing 2 recycled users.") {
                orchestration.cancel();
                return true;
            }
        }
        false
    });

    batch.run().await;
    assert!(watcher.await.unwrap());
    assert!(batch.is_done());

    let runs = store.runs.lock().clone();
    assert!(runs.len() >= 2, "{runs:?}");
    assert_eq!(runs[0].batch, batch.id());
    assert_eq!(runs[0].success, "OK");
    let mut ids: Vec<&str> = runs.iter().map(|r| r.batch.as_str()).collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), runs.len());
    // recycled users are kept, never acquired twice
    assert_eq!(server.user_count(), 2);

    // a late subscriber replays the last run only
    let (_, mut replay) = batch.subscribe();
    let mut starts = 0;
    let mut last = None;
    while let Some(event) = replay.recv().await {
        if is_message(&event, "starting run on test") {
            starts += 1;
        }
        last = Some(event);
    }
    assert_eq!(starts, 1);
    assert!(matches!(last, Some(BatchEvent::Done { .. })));
}

#[tokio::test]
async fn unsubscribed_listeners_get_nothing() {
    let (_, batch) = setup(Faults::default(), deterministic());
    let (_, mut kept) = batch.subscribe();
    let (gone, mut dropped) = batch.subscribe();
    batch.unsubscribe(gone);

    assert_eq!(batch.run().await, "OK");
    assert_eq!(dropped.recv().await, None);

    let mut last = None;
    while let Some(event) = kept.recv().await {
        last = Some(event);
    }
    assert_eq!(last, Some(BatchEvent::Done { success: "OK".into() }));
}
