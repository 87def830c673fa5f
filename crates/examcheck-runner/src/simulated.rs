//! An in-memory exam server.
//!
//! Implements both sides a run talks to: [`ExamAdmin`] for the master and
//! [`ExamUi`] sessions (through [`UiConnector`]) for the workers. Scores and
//! exports go through the same scoring rules as the expected results, so a
//! clean server always verifies. [`Faults`] injects the defects the robot and
//! the post-processing rounds are meant to catch.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context as _, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use examcheck_core::command::TakeExamCommand;
use examcheck_core::context::{Context, ContextKind, Language};
use examcheck_core::decimal::{format_score, Score};
use examcheck_core::error::UiError;
use examcheck_core::exam::ExamConfiguration;
use examcheck_core::expected::{self, QuestionScores};
use examcheck_core::question::{Dimensions, Question, QuestionDefinition, QuestionSet};
use examcheck_core::result::{key, ExamResult, Origin};
use examcheck_core::settings::{Settings, Workarounds};
use examcheck_core::traits::{
    ExamAdmin, ExamUi, ExportedResults, ManualScore, ParticipantExport, PdfScore, UserCredentials,
};

use crate::session::UiConnector;

const BASE_URL: &str = "sim://exam";

/// Defects the simulated server can be told to have.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Faults {
    /// Reloading a page loses everything not saved by navigation.
    pub drop_autosave: bool,
    /// Invalid answers are saved instead of rejected.
    pub accept_invalid_saves: bool,
    /// The spreadsheet export reports a quarter point too much.
    pub corrupt_exported_scores: bool,
    /// Imported tests keep their scores, but lose the answers scoring is
    /// recomputed from.
    pub stale_scores_on_import: bool,
}

#[derive(Debug, Clone, Default)]
struct Participant {
    answers: BTreeMap<String, Dimensions>,
    scores: QuestionScores,
    manual: QuestionScores,
    /// Answers scoring sees are gone; see [`Faults::stale_scores_on_import`].
    scoring_data_lost: bool,
}

#[derive(Debug, Clone)]
struct SimTest {
    title: String,
    questions: QuestionSet,
    configuration: ExamConfiguration,
    allowed: BTreeSet<String>,
    participants: BTreeMap<String, Participant>,
}

#[derive(Debug, Default)]
struct ServerState {
    next_test: u64,
    next_user: u64,
    tests: BTreeMap<String, SimTest>,
    users: BTreeMap<String, String>,
}

struct Inner {
    faults: Faults,
    ctx: Context,
    state: Mutex<ServerState>,
}

/// Cheap to clone; clones share the server.
#[derive(Clone)]
pub struct SimulatedServer {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SimulatedServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("SimulatedServer")
            .field("faults", &self.inner.faults)
            .field("tests", &state.tests.len())
            .field("users", &state.users.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Archive form
// ---------------------------------------------------------------------------

type DimensionList = Vec<(Vec<String>, String)>;

#[derive(Debug, Serialize, Deserialize)]
struct ArchivedParticipant {
    username: String,
    answers: BTreeMap<String, DimensionList>,
    scores: QuestionScores,
    manual: QuestionScores,
}

#[derive(Debug, Serialize, Deserialize)]
struct Archive {
    title: String,
    questions: QuestionSet,
    configuration: ExamConfiguration,
    allowed: BTreeSet<String>,
    participants: Vec<ArchivedParticipant>,
}

/// `[definition, term]` labels of the pairs a matching question scores.
fn configured_pairs(question: &Question) -> BTreeSet<Vec<String>> {
    let Question::Matching(m) = question else {
        return BTreeSet::new();
    };
    let label = |items: &[examcheck_core::question::MatchingItem], id: &str| {
        items.iter().find(|i| i.id == id).map(|i| i.label.clone())
    };
    m.pairs
        .iter()
        .filter_map(|p| Some(vec![label(&m.definitions, &p.definition)?, label(&m.terms, &p.term)?]))
        .collect()
}

impl SimulatedServer {
    pub fn new(language: Language) -> Self {
        Self::with_faults(language, Faults::default())
    }

    pub fn with_faults(language: Language, faults: Faults) -> Self {
        let ctx = Context::new(
            ContextKind::Regression { seed: 0 },
            Settings::default(),
            Workarounds::default(),
            language,
        );
        Self {
            inner: Arc::new(Inner {
                faults,
                ctx,
                state: Mutex::new(ServerState::default()),
            }),
        }
    }

    /// A server hosting exactly the test and participant of one command.
    pub fn standalone(command: &TakeExamCommand) -> Self {
        Self::standalone_with_faults(command, Faults::default())
    }

    pub fn standalone_with_faults(command: &TakeExamCommand, faults: Faults) -> Self {
        let server = Self::with_faults(command.admin_lang, faults);
        {
            let mut state = server.inner.state.lock();
            state
                .users
                .insert(command.username.clone(), command.password.clone());
            state.tests.insert(
                command.test_id.clone(),
                SimTest {
                    title: command.test_id.clone(),
                    questions: command.questions.clone(),
                    configuration: command.exam_configuration.clone(),
                    allowed: [command.username.clone()].into_iter().collect(),
                    participants: BTreeMap::new(),
                },
            );
        }
        server
    }

    /// Create a test and return its id.
    pub fn create_test(&self, title: &str, questions: QuestionSet, configuration: ExamConfiguration) -> String {
        let mut state = self.inner.state.lock();
        state.next_test += 1;
        let id = state.next_test.to_string();
        state.tests.insert(
            id.clone(),
            SimTest {
                title: title.to_string(),
                questions,
                configuration,
                allowed: BTreeSet::new(),
                participants: BTreeMap::new(),
            },
        );
        id
    }

    pub fn test_ids(&self) -> Vec<String> {
        self.inner.state.lock().tests.keys().cloned().collect()
    }

    pub fn user_count(&self) -> usize {
        self.inner.state.lock().users.len()
    }

    fn with_test<T>(&self, test_id: &str, f: impl FnOnce(&mut SimTest) -> Result<T>) -> Result<T> {
        let mut state = self.inner.state.lock();
        let test = state
            .tests
            .get_mut(test_id)
            .ok_or_else(|| anyhow!("test {test_id} does not exist"))?;
        f(test)
    }

    fn score_of(&self, question: &Question, participant: &Participant) -> Score {
        if participant.scoring_data_lost {
            return question.compute_score(&Dimensions::new(), &self.inner.ctx);
        }
        let answer = participant.answers.get(question.title()).cloned().unwrap_or_default();
        question.compute_score(&answer, &self.inner.ctx)
    }

    fn rescore(&self, question: &Question, participant: &mut Participant) {
        let score = self.score_of(question, participant);
        participant.scores.insert(question.title().to_string(), score);
    }

    fn export_participant(&self, test: &SimTest, participant: &Participant) -> Result<ParticipantExport> {
        let mut scores = QuestionScores::new();
        for question in &test.questions.questions {
            let score = if question.can_score_manually() {
                participant.manual.get(question.title()).copied()
            } else {
                participant.scores.get(question.title()).copied()
            };
            scores.insert(question.title().to_string(), score.unwrap_or(Score::ZERO));
        }

        let mut result = ExamResult::new(Origin::Exported);
        for (title, dims) in &participant.answers {
            expected::add_answer_keys(&mut result, title, dims)?;
        }
        expected::apply_scores(
            &mut result,
            &test.questions,
            &scores,
            &test.configuration,
            &Workarounds::default(),
        )?;

        let mut export = ParticipantExport::default();
        for (k, v) in result.properties() {
            match k.first().map(String::as_str) {
                Some("question") | Some("xls") => {
                    export.xls.insert(k.clone(), v.clone());
                }
                Some("statistics_tab") if k.len() == 2 => {
                    export.statistics_tab.insert(k[1].clone(), v.clone());
                }
                Some("results_tab") if k.len() == 2 => {
                    export.results_tab.insert(k[1].clone(), v.clone());
                }
                _ => {}
            }
        }
        for question in &test.questions.questions {
            let reached = test
                .configuration
                .clip_answer_score(scores.get(question.title()).copied().unwrap_or(Score::ZERO));
            export.pdf.insert(
                question.title().to_string(),
                PdfScore {
                    reached: format_score(reached),
                    maximum: format_score(question.maximum_score()),
                },
            );
        }

        if self.inner.faults.corrupt_exported_scores {
            let total = key(["xls", "score_reached"]);
            if let Some(score) = export.xls.get(&total).and_then(|v| Score::parse(v)) {
                export
                    .xls
                    .insert(total, format_score(score + Score::from_quarters(1)));
            }
        }
        Ok(export)
    }
}

#[async_trait]
impl ExamAdmin for SimulatedServer {
    async fn verify_admin_settings(&self) -> Result<()> {
        Ok(())
    }

    async fn copy_test(&self, test_id: &str, new_title: &str) -> Result<String> {
        let mut state = self.inner.state.lock();
        let source = state
            .tests
            .get(test_id)
            .ok_or_else(|| anyhow!("test {test_id} does not exist"))?;
        let copy = SimTest {
            title: new_title.to_string(),
            participants: BTreeMap::new(),
            allowed: BTreeSet::new(),
            ..source.clone()
        };
        state.next_test += 1;
        let id = state.next_test.to_string();
        state.tests.insert(id.clone(), copy);
        Ok(id)
    }

    async fn delete_test(&self, test_id: &str) -> Result<()> {
        match self.inner.state.lock().tests.remove(test_id) {
            Some(_) => Ok(()),
            None => bail!("test {test_id} does not exist"),
        }
    }

    async fn acquire_users(&self, count: usize) -> Result<Vec<UserCredentials>> {
        let mut state = self.inner.state.lock();
        let mut users = Vec::with_capacity(count);
        for _ in 0..count {
            state.next_user += 1;
            let user = UserCredentials {
                username: format!("tu_{}", state.next_user),
                password: format!("pw{}", uuid::Uuid::new_v4().simple()),
            };
            state.users.insert(user.username.clone(), user.password.clone());
            users.push(user);
        }
        Ok(users)
    }

    async fn release_users(&self, users: &[UserCredentials]) -> Result<()> {
        let mut state = self.inner.state.lock();
        for user in users {
            state.users.remove(&user.username);
        }
        Ok(())
    }

    async fn exam_configuration(&self, test_id: &str) -> Result<ExamConfiguration> {
        self.with_test(test_id, |t| Ok(t.configuration.clone()))
    }

    async fn questions(&self, test_id: &str) -> Result<Vec<QuestionDefinition>> {
        self.with_test(test_id, |t| {
            Ok(t.questions.questions.iter().map(Question::to_definition).collect())
        })
    }

    async fn configure_test(&self, test_id: &str, users: &[UserCredentials]) -> Result<()> {
        self.with_test(test_id, |t| {
            t.allowed = users.iter().map(|u| u.username.clone()).collect();
            Ok(())
        })
    }

    async fn test_url(&self, test_id: &str) -> Result<String> {
        self.with_test(test_id, |_| Ok(format!("{BASE_URL}/test/{test_id}")))
    }

    async fn export_results(&self, test_id: &str) -> Result<ExportedResults> {
        let test = self.with_test(test_id, |t| Ok(t.clone()))?;
        let mut exported = ExportedResults::default();
        for (username, participant) in &test.participants {
            let export = self
                .export_participant(&test, participant)
                .with_context(|| format!("failed to export results of {username}"))?;
            exported.participants.insert(username.clone(), export);
        }
        Ok(exported)
    }

    async fn export_archive(&self, test_id: &str) -> Result<Vec<u8>> {
        let test = self.with_test(test_id, |t| Ok(t.clone()))?;
        let archive = Archive {
            title: test.title,
            questions: test.questions,
            configuration: test.configuration,
            allowed: test.allowed,
            participants: test
                .participants
                .into_iter()
                .map(|(username, p)| ArchivedParticipant {
                    username,
                    answers: p
                        .answers
                        .into_iter()
                        .map(|(title, dims)| (title, dims.into_iter().collect()))
                        .collect(),
                    scores: p.scores,
                    manual: p.manual,
                })
                .collect(),
        };
        Ok(serde_json::to_vec(&archive)?)
    }

    async fn import_archive(&self, archive: &[u8], new_title: &str) -> Result<String> {
        let archive: Archive = serde_json::from_slice(archive).context("malformed test archive")?;
        let stale = self.inner.faults.stale_scores_on_import;

        let mut participants = BTreeMap::new();
        for p in archive.participants {
            let mut participant = Participant {
                answers: p
                    .answers
                    .into_iter()
                    .map(|(title, dims)| (title, dims.into_iter().collect()))
                    .collect(),
                scores: p.scores,
                manual: p.manual,
                scoring_data_lost: stale,
            };
            if !stale {
                for question in &archive.questions.questions {
                    self.rescore(question, &mut participant);
                }
            }
            participants.insert(p.username, participant);
        }

        let mut state = self.inner.state.lock();
        state.next_test += 1;
        let id = state.next_test.to_string();
        state.tests.insert(
            id.clone(),
            SimTest {
                title: new_title.to_string(),
                questions: archive.questions,
                configuration: archive.configuration,
                allowed: archive.allowed,
                participants,
            },
        );
        Ok(id)
    }

    async fn save_scoring(&self, test_id: &str, question: &Question) -> Result<bool> {
        if !question.maximum_score().is_positive() {
            return Ok(false);
        }
        let mut test = self.with_test(test_id, |t| Ok(t.clone()))?;
        let Some(current) = test.questions.get_mut(question.title()) else {
            bail!("test {test_id} has no question '{}'", question.title());
        };
        let removed: Vec<Vec<String>> = configured_pairs(current)
            .difference(&configured_pairs(question))
            .cloned()
            .collect();
        *current = question.clone();

        for participant in test.participants.values_mut() {
            if let Some(dims) = participant.answers.get_mut(question.title()) {
                for k in &removed {
                    dims.remove(k);
                }
            }
            self.rescore(question, participant);
        }
        self.with_test(test_id, |t| {
            *t = test;
            Ok(())
        })?;
        Ok(true)
    }

    async fn save_manual_scores(&self, test_id: &str, scores: &[ManualScore]) -> Result<()> {
        self.with_test(test_id, |t| {
            for score in scores {
                let participant = t
                    .participants
                    .get_mut(&score.username)
                    .ok_or_else(|| anyhow!("{} did not take test {test_id}", score.username))?;
                participant.manual.insert(score.title.clone(), score.score);
            }
            Ok(())
        })
    }

    async fn screenshot(&self) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }
}

#[async_trait]
impl UiConnector for SimulatedServer {
    async fn connect(&self, _command: &TakeExamCommand) -> Result<Box<dyn ExamUi>> {
        Ok(Box::new(SimulatedSession::new(self.clone())))
    }
}

/// Connects every session to its own [`SimulatedServer::standalone_with_faults`]
/// server, so a worker can run sessions without a shared admin.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandaloneSimulation {
    pub faults: Faults,
}

#[async_trait]
impl UiConnector for StandaloneSimulation {
    async fn connect(&self, command: &TakeExamCommand) -> Result<Box<dyn ExamUi>> {
        SimulatedServer::standalone_with_faults(command, self.faults)
            .connect(command)
            .await
    }
}

// ---------------------------------------------------------------------------
// Participant sessions
// ---------------------------------------------------------------------------

/// One browser on the simulated server.
pub struct SimulatedSession {
    server: SimulatedServer,
    username: Option<String>,
    test_id: Option<String>,
    titles: Vec<String>,
    position: usize,
    /// What the current page's form shows.
    form: Dimensions,
    alert: bool,
}

impl SimulatedSession {
    pub fn new(server: SimulatedServer) -> Self {
        Self {
            server,
            username: None,
            test_id: None,
            titles: Vec::new(),
            position: 0,
            form: Dimensions::new(),
            alert: false,
        }
    }

    fn ids(&self) -> Result<(String, String), UiError> {
        match (&self.test_id, &self.username) {
            (Some(test_id), Some(username)) => Ok((test_id.clone(), username.clone())),
            _ => Err(UiError("no exam started".to_string())),
        }
    }

    fn title(&self) -> Result<&str, UiError> {
        self.titles
            .get(self.position)
            .map(String::as_str)
            .ok_or_else(|| UiError("no question shown".to_string()))
    }

    fn saved_answer(&self) -> Result<Dimensions, UiError> {
        let (test_id, username) = self.ids()?;
        let title = self.title()?;
        let state = self.server.inner.state.lock();
        Ok(state
            .tests
            .get(&test_id)
            .and_then(|t| t.participants.get(&username))
            .and_then(|p| p.answers.get(title))
            .cloned()
            .unwrap_or_default())
    }

    /// Save the form. Returns `false` and raises the alert if the server
    /// rejects it.
    fn save(&mut self) -> Result<bool, UiError> {
        let (test_id, username) = self.ids()?;
        let title = self.title()?.to_string();
        let inner = &self.server.inner;
        let mut state = inner.state.lock();
        let test = state
            .tests
            .get_mut(&test_id)
            .ok_or_else(|| UiError(format!("test {test_id} is gone")))?;
        let question = test
            .questions
            .get(&title)
            .cloned()
            .ok_or_else(|| UiError(format!("question '{title}' is gone")))?;

        if !inner.faults.accept_invalid_saves && !question.is_valid_answer(&self.form, &inner.ctx) {
            self.alert = true;
            return Ok(false);
        }
        let participant = test.participants.entry(username).or_default();
        participant.answers.insert(title, self.form.clone());
        let score = self.server.score_of(&question, participant);
        participant.scores.insert(question.title().to_string(), score);
        self.alert = false;
        Ok(true)
    }

    fn show(&mut self, position: usize) -> Result<(), UiError> {
        self.position = position;
        self.form = self.saved_answer()?;
        self.alert = false;
        Ok(())
    }
}

#[async_trait]
impl ExamUi for SimulatedSession {
    async fn login(&mut self, username: &str, password: &str) -> Result<(), UiError> {
        let state = self.server.inner.state.lock();
        match state.users.get(username) {
            Some(p) if p == password => {
                drop(state);
                self.username = Some(username.to_string());
                Ok(())
            }
            _ => Err(UiError(format!("login as {username} failed"))),
        }
    }

    async fn open_test(&mut self, test_url: &str) -> Result<(), UiError> {
        let username = self
            .username
            .clone()
            .ok_or_else(|| UiError("not logged in".to_string()))?;
        let test_id = test_url
            .rsplit_once("/test/")
            .map(|(_, id)| id.to_string())
            .ok_or_else(|| UiError(format!("not a test url: {test_url}")))?;
        let state = self.server.inner.state.lock();
        let test = state
            .tests
            .get(&test_id)
            .ok_or_else(|| UiError(format!("test {test_id} not found")))?;
        if !test.allowed.contains(&username) {
            return Err(UiError(format!("{username} may not take test {test_id}")));
        }
        self.titles = test.questions.titles().map(String::from).collect();
        drop(state);
        self.test_id = Some(test_id);
        Ok(())
    }

    async fn start_exam(&mut self) -> Result<(), UiError> {
        if self.titles.is_empty() {
            return Err(UiError("test has no questions".to_string()));
        }
        self.show(0)
    }

    async fn current_title(&mut self) -> Result<String, UiError> {
        self.title().map(String::from)
    }

    async fn sequence_id(&mut self) -> Result<u32, UiError> {
        self.title()?;
        Ok(self.position as u32 + 1)
    }

    async fn goto_first(&mut self) -> Result<(), UiError> {
        if self.save()? {
            self.show(0)?;
        }
        Ok(())
    }

    async fn goto_next(&mut self) -> Result<bool, UiError> {
        if self.position + 1 >= self.titles.len() {
            return Ok(false);
        }
        if self.save()? {
            self.show(self.position + 1)?;
        }
        Ok(true)
    }

    async fn goto_previous(&mut self) -> Result<bool, UiError> {
        if self.position == 0 {
            return Ok(false);
        }
        if self.save()? {
            self.show(self.position - 1)?;
        }
        Ok(true)
    }

    async fn enter_answer(&mut self, dimensions: &Dimensions) -> Result<(), UiError> {
        self.title()?;
        self.form = dimensions.clone();
        Ok(())
    }

    async fn read_answer(&mut self) -> Result<Dimensions, UiError> {
        self.title()?;
        Ok(self.form.clone())
    }

    async fn save_rejected(&mut self) -> Result<bool, UiError> {
        Ok(self.alert)
    }

    async fn refresh(&mut self) -> Result<(), UiError> {
        self.alert = false;
        if self.server.inner.faults.drop_autosave {
            self.form = self.saved_answer()?;
        }
        Ok(())
    }

    async fn finish(&mut self) -> Result<(), UiError> {
        if !self.save()? {
            return Err(UiError("could not save last answer when finishing".to_string()));
        }
        Ok(())
    }

    async fn screenshot(&mut self) -> Result<Option<Vec<u8>>, UiError> {
        let mut png = b"\x89PNG\r\n\x1a\n".to_vec();
        png.extend_from_slice(self.title().unwrap_or("start").as_bytes());
        Ok(Some(png))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use examcheck_core::question::SingleChoice;

    fn server(faults: Faults) -> (SimulatedServer, String) {
        let server = SimulatedServer::with_faults(Language::En, faults);
        let questions = QuestionSet::new(vec![
            Question::SingleChoice(SingleChoice::sample("Q1")),
            Question::SingleChoice(SingleChoice::sample("Q2")),
        ]);
        let id = server.create_test("t", questions, ExamConfiguration::default());
        (server, id)
    }

    fn sc(label: &str) -> Dimensions {
        ["Paris", "Lyon", "Nice"]
            .iter()
            .map(|l| (vec![l.to_string()], if *l == label { "1" } else { "0" }.to_string()))
            .collect()
    }

    async fn session(server: &SimulatedServer, test_id: &str) -> (SimulatedSession, String) {
        let users = server.acquire_users(1).await.unwrap();
        server.configure_test(test_id, &users).await.unwrap();
        let mut s = SimulatedSession::new(server.clone());
        s.login(&users[0].username, &users[0].password).await.unwrap();
        s.open_test(&server.test_url(test_id).await.unwrap()).await.unwrap();
        s.start_exam().await.unwrap();
        (s, users[0].username.clone())
    }

    #[tokio::test]
    async fn answers_survive_navigation_and_export() {
        let (server, id) = server(Faults::default());
        let (mut s, user) = session(&server, &id).await;
        s.enter_answer(&sc("Paris")).await.unwrap();
        assert!(s.goto_next().await.unwrap());
        assert_eq!(s.sequence_id().await.unwrap(), 2);
        assert!(!s.goto_next().await.unwrap());
        s.goto_first().await.unwrap();
        assert_eq!(s.read_answer().await.unwrap(), sc("Paris"));

        let exported = server.export_results(&id).await.unwrap();
        let r = exported.participants[&user].to_result().unwrap();
        assert_eq!(r.get(&key(["xls", "score_reached"])), Some("2"));
        assert_eq!(r.get(&key(["question", "Q1", "answer", "Paris"])), Some("1"));
        assert_eq!(r.get(&key(["pdf", "question", "Q2", "score_reached"])), Some("0"));
    }

    #[tokio::test]
    async fn wrong_password_fails_login() {
        let (server, _) = server(Faults::default());
        let users = server.acquire_users(1).await.unwrap();
        let mut s = SimulatedSession::new(server.clone());
        assert!(s.login(&users[0].username, "nope").await.is_err());
    }

    #[tokio::test]
    async fn autosave_fault_drops_unsaved_form() {
        let (server, id) = server(Faults {
            drop_autosave: true,
            ..Faults::default()
        });
        let (mut s, _) = session(&server, &id).await;
        s.enter_answer(&sc("Lyon")).await.unwrap();
        s.refresh().await.unwrap();
        assert!(s.read_answer().await.unwrap().is_empty());

        let (clean, id2) = super::tests::server(Faults::default());
        let (mut s, _) = session(&clean, &id2).await;
        s.enter_answer(&sc("Lyon")).await.unwrap();
        s.refresh().await.unwrap();
        assert_eq!(s.read_answer().await.unwrap(), sc("Lyon"));
    }

    #[tokio::test]
    async fn archive_roundtrip_keeps_participants() {
        let (server, id) = server(Faults::default());
        let (mut s, user) = session(&server, &id).await;
        s.enter_answer(&sc("Paris")).await.unwrap();
        s.finish().await.unwrap();

        let archive = server.export_archive(&id).await.unwrap();
        let copy = server.import_archive(&archive, "copy").await.unwrap();
        assert_ne!(copy, id);
        let a = server.export_results(&id).await.unwrap();
        let b = server.export_results(&copy).await.unwrap();
        assert_eq!(a.participants[&user], b.participants[&user]);
    }

    #[tokio::test]
    async fn stale_import_shows_after_rescoring() {
        let (server, id) = server(Faults {
            stale_scores_on_import: true,
            ..Faults::default()
        });
        let (mut s, user) = session(&server, &id).await;
        s.enter_answer(&sc("Paris")).await.unwrap();
        s.finish().await.unwrap();

        let archive = server.export_archive(&id).await.unwrap();
        let copy = server.import_archive(&archive, "copy").await.unwrap();
        let total = |e: &ExportedResults| e.participants[&user].xls[&key(["xls", "score_reached"])].clone();
        assert_eq!(total(&server.export_results(&copy).await.unwrap()), "2");

        let q1 = Question::SingleChoice(SingleChoice::sample("Q1"));
        assert!(server.save_scoring(&copy, &q1).await.unwrap());
        assert_eq!(total(&server.export_results(&copy).await.unwrap()), "0");
        assert_eq!(total(&server.export_results(&id).await.unwrap()), "2");
    }

    #[tokio::test]
    async fn rejects_scoring_without_reachable_points() {
        let (server, id) = server(Faults::default());
        let mut q = SingleChoice::sample("Q1");
        for choice in &mut q.choices {
            choice.points = Score::ZERO;
        }
        assert!(!server
            .save_scoring(&id, &Question::SingleChoice(q))
            .await
            .unwrap());
    }
}
