//! Collaborator capabilities.
//!
//! The engine never touches a browser, a spreadsheet or a database directly.
//! Workers drive an [`ExamUi`], the master administers the server through an
//! [`ExamAdmin`], dispatches sessions to [`Machine`]s and persists finished
//! runs into a [`ResultStore`].

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::command::TakeExamCommand;
use crate::coverage::Coverage;
use crate::decimal::Score;
use crate::error::UiError;
use crate::exam::ExamConfiguration;
use crate::orchestration::Orchestration;
use crate::question::{Dimensions, Question, QuestionDefinition};
use crate::result::{key, normalized_title, ExamResult, Key, Origin};

// ---------------------------------------------------------------------------
// Worker-side exam session
// ---------------------------------------------------------------------------

/// One participant's live exam session.
///
/// Navigation saves the current page. When the server rejects the saved
/// data it stays on the current question and shows an error alert.
#[async_trait]
pub trait ExamUi: Send {
    async fn login(&mut self, username: &str, password: &str) -> Result<(), UiError>;

    async fn open_test(&mut self, test_url: &str) -> Result<(), UiError>;

    /// Start or resume the exam; lands on the first question.
    async fn start_exam(&mut self) -> Result<(), UiError>;

    /// Title of the question currently shown.
    async fn current_title(&mut self) -> Result<String, UiError>;

    /// Position of the current question in this participant's sequence.
    async fn sequence_id(&mut self) -> Result<u32, UiError>;

    async fn goto_first(&mut self) -> Result<(), UiError>;

    /// Returns `false` without navigating when there is no next question.
    async fn goto_next(&mut self) -> Result<bool, UiError>;

    /// Returns `false` without navigating when there is no previous question.
    async fn goto_previous(&mut self) -> Result<bool, UiError>;

    /// Fill the current question's form with the given dimensions.
    async fn enter_answer(&mut self, dimensions: &Dimensions) -> Result<(), UiError>;

    /// Read back what the current question's form shows.
    async fn read_answer(&mut self) -> Result<Dimensions, UiError>;

    /// Whether the last save attempt was answered with an error alert.
    async fn save_rejected(&mut self) -> Result<bool, UiError>;

    /// Reload the page, dropping anything that was not autosaved.
    async fn refresh(&mut self) -> Result<(), UiError>;

    async fn finish(&mut self) -> Result<(), UiError>;

    async fn screenshot(&mut self) -> Result<Option<Vec<u8>>, UiError>;
}

// ---------------------------------------------------------------------------
// Master-side administration
// ---------------------------------------------------------------------------

/// Administration of the exam server.
#[async_trait]
pub trait ExamAdmin: Send + Sync {
    /// Check that the server is configured the way runs expect.
    async fn verify_admin_settings(&self) -> anyhow::Result<()>;

    /// Copy a test under a new title and return the copy's id.
    async fn copy_test(&self, test_id: &str, new_title: &str) -> anyhow::Result<String>;

    async fn delete_test(&self, test_id: &str) -> anyhow::Result<()>;

    async fn acquire_users(&self, count: usize) -> anyhow::Result<Vec<UserCredentials>>;

    async fn release_users(&self, users: &[UserCredentials]) -> anyhow::Result<()>;

    async fn exam_configuration(&self, test_id: &str) -> anyhow::Result<ExamConfiguration>;

    async fn questions(&self, test_id: &str) -> anyhow::Result<Vec<QuestionDefinition>>;

    /// Apply the exam configuration a run relies on (participants, passes).
    async fn configure_test(&self, test_id: &str, users: &[UserCredentials]) -> anyhow::Result<()>;

    async fn test_url(&self, test_id: &str) -> anyhow::Result<String>;

    /// Every export channel of a test, already parsed.
    async fn export_results(&self, test_id: &str) -> anyhow::Result<ExportedResults>;

    /// The test with its participant data as an archive.
    async fn export_archive(&self, test_id: &str) -> anyhow::Result<Vec<u8>>;

    /// Import an archive under a new title and return the new test's id.
    async fn import_archive(&self, archive: &[u8], new_title: &str) -> anyhow::Result<String>;

    /// Push readjusted scoring rules. Returns `false` if the server rejected them.
    async fn save_scoring(&self, test_id: &str, question: &Question) -> anyhow::Result<bool>;

    async fn save_manual_scores(&self, test_id: &str, scores: &[ManualScore]) -> anyhow::Result<()>;

    async fn screenshot(&self) -> anyhow::Result<Option<Vec<u8>>>;
}

/// Login of one test participant.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserCredentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for UserCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserCredentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// A score given by hand to one participant's answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManualScore {
    pub username: String,
    pub title: String,
    pub score: Score,
}

/// Scores a question got in the PDF export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PdfScore {
    pub reached: String,
    pub maximum: String,
}

/// Everything the server reports for one participant.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParticipantExport {
    /// Spreadsheet export, keyed like recorded results (`xls`, `question`).
    pub xls: BTreeMap<Key, String>,
    /// Statistics view, field name to value.
    pub statistics_tab: BTreeMap<String, String>,
    /// Results view, field name to value.
    pub results_tab: BTreeMap<String, String>,
    /// PDF export, question title to scores.
    pub pdf: BTreeMap<String, PdfScore>,
}

impl ParticipantExport {
    /// The exported result this participant's recorded result is checked
    /// against.
    pub fn to_result(&self) -> anyhow::Result<ExamResult> {
        let mut result = ExamResult::new(Origin::Exported);
        for (k, v) in &self.xls {
            result.add(k.clone(), v.clone())?;
        }
        for (tab, fields) in [
            ("statistics_tab", &self.statistics_tab),
            ("results_tab", &self.results_tab),
        ] {
            for (name, v) in fields {
                result.add(vec![tab.to_string(), name.clone()], v.clone())?;
            }
        }
        for (title, score) in &self.pdf {
            let t = normalized_title(title);
            result.add(
                key(["pdf", "question", t.as_str(), "score_reached"]),
                score.reached.clone(),
            )?;
            for k in ExamResult::maximum_score_keys(title) {
                result.add(k, score.maximum.clone())?;
            }
        }
        Ok(result)
    }
}

/// All participants of one export, by username.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExportedResults {
    pub participants: BTreeMap<String, ParticipantExport>,
}

// ---------------------------------------------------------------------------
// Worker machines
// ---------------------------------------------------------------------------

/// A worker that takes exams on the master's behalf.
#[async_trait]
pub trait Machine: Send + Sync {
    /// Human-readable machine name (e.g. "machine1").
    fn name(&self) -> &str;

    /// Run one session of batch `batch_id` and return the participant's
    /// recorded result.
    async fn take_exam(
        &self,
        batch_id: &str,
        command: &TakeExamCommand,
        orchestration: &Orchestration,
        progress: &dyn ProgressReporter,
    ) -> anyhow::Result<ExamResult>;
}

/// Progress sink for batches, runs and machines.
pub trait ProgressReporter: Send + Sync {
    /// A protocol line from `origin` ("master", a machine name, "error").
    fn report(&self, origin: &str, message: &str);

    /// The latest screen of a session or of the admin UI.
    fn on_screenshot(&self, _origin: &str, _png: &[u8]) {}
}

/// No-op progress reporter.
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {
    fn report(&self, _: &str, _: &str) {}
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

/// One finished run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub created: chrono::DateTime<chrono::Utc>,
    pub batch: String,
    /// `OK` or `FAIL/<domain>`.
    pub success: String,
    pub files: BTreeMap<String, Vec<u8>>,
    pub nusers: usize,
    pub elapsed_secs: u64,
}

/// Storage for finished runs.
pub trait ResultStore: Send + Sync {
    fn put_run(&self, record: &RunRecord) -> anyhow::Result<()>;

    /// Timing samples in seconds.
    fn put_performance(&self, samples: &[f64]) -> anyhow::Result<()>;

    fn put_coverage(&self, coverage: &Coverage) -> anyhow::Result<()>;
}
