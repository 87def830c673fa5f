//! One verification run.
//!
//! A run copies the test, lets every machine take the exam in parallel,
//! then cross-checks the recorded results against the server's exports over
//! several post-processing rounds (readjustment, reimport, manual scoring).

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context as _, Result};
use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::command::{TakeExamCommand, TAKE_EXAM};
use crate::context::{Context, ContextKind, Language};
use crate::coverage::Coverage;
use crate::decimal::{format_score, Score};
use crate::error::{classify, DomainError, ErrorDomain, UiError};
use crate::exam::ExamConfiguration;
use crate::expected;
use crate::orchestration::Orchestration;
use crate::question::QuestionSet;
use crate::result::{ExamResult, Origin};
use crate::settings::{Settings, Workarounds};
use crate::traits::{
    ExamAdmin, Machine, ManualScore, ProgressReporter, ResultStore, RunRecord, UserCredentials,
};

/// Configuration shared by all runs of a batch.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Id of the test on the exam server.
    pub test_id: String,
    /// Display title of the test.
    pub test_title: String,
    /// Base URL workers log in to.
    pub server_url: String,
    pub admin_lang: Language,
    pub settings: Settings,
    pub workarounds: Workarounds,
    /// Factor applied to every simulated wait on the workers.
    pub wait_time: f64,
    /// Keep participants for the next run instead of deleting them.
    pub recycle_users: bool,
    /// Seed for the master's random decisions; entropy if unset.
    pub master_seed: Option<u64>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            test_id: String::new(),
            test_title: String::new(),
            server_url: String::new(),
            admin_lang: Language::En,
            settings: Settings::default(),
            workarounds: Workarounds::default(),
            wait_time: 1.0,
            recycle_users: false,
            master_seed: None,
        }
    }
}

#[derive(Debug, Default)]
struct CachedTest {
    questions: Option<QuestionSet>,
    exam_configuration: Option<ExamConfiguration>,
    recycled_users: Option<Vec<UserCredentials>>,
}

/// Questions, exam configuration and recycled users per test id, kept
/// across the runs of a batch.
#[derive(Debug, Default)]
pub struct TestCache {
    tests: Mutex<HashMap<String, CachedTest>>,
}

impl TestCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn definitions(&self, test_id: &str) -> Option<(QuestionSet, ExamConfiguration)> {
        let tests = self.tests.lock();
        let cached = tests.get(test_id)?;
        Some((cached.questions.clone()?, cached.exam_configuration.clone()?))
    }

    pub fn store_definitions(
        &self,
        test_id: &str,
        questions: QuestionSet,
        exam_configuration: ExamConfiguration,
    ) {
        let mut tests = self.tests.lock();
        let cached = tests.entry(test_id.to_string()).or_default();
        cached.questions = Some(questions);
        cached.exam_configuration = Some(exam_configuration);
    }

    /// Recycled users, if exactly `count` of them were kept.
    pub fn take_users(&self, test_id: &str, count: usize) -> Option<Vec<UserCredentials>> {
        let mut tests = self.tests.lock();
        let cached = tests.get_mut(test_id)?;
        if cached.recycled_users.as_ref().map(Vec::len) != Some(count) {
            return None;
        }
        cached.recycled_users.take()
    }

    pub fn recycle_users(&self, test_id: &str, users: Vec<UserCredentials>) {
        self.tests
            .lock()
            .entry(test_id.to_string())
            .or_default()
            .recycled_users = Some(users);
    }
}

/// What a finished run hands to the store.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub record: RunRecord,
    pub performance: Vec<f64>,
    pub coverage: Coverage,
}

impl RunOutcome {
    pub fn is_ok(&self) -> bool {
        self.record.success == "OK"
    }

    pub fn persist(&self, store: &dyn ResultStore) -> Result<()> {
        store.put_run(&self.record)?;
        store.put_performance(&self.performance)?;
        store.put_coverage(&self.coverage)?;
        Ok(())
    }
}

/// Status code of a failed run: the domain of the first classified error in
/// the chain, `interaction` for UI failures, `unknown` otherwise.
pub fn failure_code(err: &anyhow::Error) -> String {
    for cause in err.chain() {
        if let Some(e) = cause.downcast_ref::<DomainError>() {
            return format!("FAIL/{}", e.domain);
        }
        if cause.downcast_ref::<UiError>().is_some() {
            return "FAIL/interaction".to_string();
        }
    }
    "FAIL/unknown".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Round {
    Check,
    Readjust,
    Manual,
}

const PROTOCOL_SECTIONS: [&str; 5] = [
    "header",
    "log",
    "preferences/workarounds",
    "preferences/settings",
    "mark_schema",
];

#[derive(Debug, Default)]
struct Protocols {
    sections: BTreeMap<&'static str, Vec<String>>,
    postprocessing: BTreeMap<String, Vec<String>>,
    machines: BTreeMap<String, Vec<String>>,
}

impl Protocols {
    fn section(&mut self, name: &'static str) -> &mut Vec<String> {
        self.sections.entry(name).or_default()
    }

    fn postprocessing(&mut self, index: usize, kind: &str, is_reimport: bool) -> &mut Vec<String> {
        let name = format!(
            "{:02}_{kind}{}.txt",
            index + 1,
            if is_reimport { "_after_reimport" } else { "" }
        );
        self.postprocessing.entry(name).or_default()
    }

    fn render(&self) -> String {
        let mut parts = Vec::new();
        for section in PROTOCOL_SECTIONS {
            let Some(lines) = self.sections.get(section).filter(|l| !l.is_empty()) else {
                continue;
            };
            if section != "header" {
                parts.push(format!("# {}", section.to_uppercase()));
                parts.push(String::new());
            }
            parts.extend(lines.iter().cloned());
            parts.push(String::new());
        }
        parts.join("\n")
    }
}

/// Recorded results and questions one verification pass works on.
struct Subject {
    test_id: String,
    questions: QuestionSet,
    recorded: Vec<ExamResult>,
    is_reimport: bool,
}

pub struct Run<'a> {
    config: &'a RunConfig,
    batch_id: String,
    admin: Arc<dyn ExamAdmin>,
    machines: Vec<Arc<dyn Machine>>,
    cache: Arc<TestCache>,
    orchestration: Orchestration,
    progress: &'a dyn ProgressReporter,
    ctx: Context,

    protocols: Protocols,
    files: BTreeMap<String, Vec<u8>>,
    performance: Vec<f64>,
    coverage: Coverage,
    users: Vec<UserCredentials>,
    questions: QuestionSet,
    exam_configuration: ExamConfiguration,
    working_test: Option<String>,
    test_url: String,
    test_version: u32,
}

impl<'a> Run<'a> {
    pub fn new(
        config: &'a RunConfig,
        batch_id: &str,
        admin: Arc<dyn ExamAdmin>,
        machines: Vec<Arc<dyn Machine>>,
        cache: Arc<TestCache>,
        orchestration: Orchestration,
        progress: &'a dyn ProgressReporter,
    ) -> Self {
        let kind = match config.master_seed {
            Some(seed) => ContextKind::Regression { seed },
            None => ContextKind::Fuzzing,
        };
        let ctx = Context::new(
            kind,
            config.settings.clone(),
            config.workarounds.clone(),
            config.admin_lang,
        );
        Self {
            config,
            batch_id: batch_id.to_string(),
            admin,
            machines,
            cache,
            orchestration,
            progress,
            ctx,
            protocols: Protocols::default(),
            files: BTreeMap::new(),
            performance: Vec::new(),
            coverage: Coverage::new(),
            users: Vec::new(),
            questions: QuestionSet::new(Vec::new()),
            exam_configuration: ExamConfiguration::default(),
            working_test: None,
            test_url: String::new(),
            test_version: 1,
        }
    }

    fn report(&mut self, origin: &str, message: &str) {
        self.protocols
            .section("log")
            .push(format!("[{origin}] {message}"));
        if origin == "master" {
            self.protocols
                .machines
                .entry("master".to_string())
                .or_default()
                .push(message.to_string());
        }
        self.progress.report(origin, message);
    }

    fn master(&mut self, message: &str) {
        self.report("master", message);
    }

    /// Run all steps, clean up and return what should be persisted.
    pub async fn execute(mut self) -> RunOutcome {
        let start = Instant::now();

        let success = match self.run_steps().await {
            Ok(()) => "OK".to_string(),
            Err(e) => {
                tracing::error!("run {} failed: {e:#}", self.batch_id);
                self.report("error", &format!("{e:#}"));
                self.protocols.section("header").push(format!("Error: {e:#}"));
                self.save_error_screenshot().await;
                failure_code(&e)
            }
        };
        self.protocols
            .section("header")
            .push(format!("Finished with status {success}."));

        if let Err(e) = self.cleanup().await {
            tracing::warn!("cleanup failed: {e:#}");
            self.report("error", &format!("cleanup failed: {e:#}"));
        }
        self.master(&format!("finished with status {success}."));

        let elapsed = start.elapsed();
        self.into_outcome(success, elapsed)
    }

    async fn run_steps(&mut self) -> Result<()> {
        self.prepare().await.context("failed to prepare run")?;
        let results = self.run_exams().await?;
        self.analyze(results).await
    }

    // -----------------------------------------------------------------------
    // prepare
    // -----------------------------------------------------------------------

    async fn prepare(&mut self) -> Result<()> {
        let config = self.config;
        self.master(&format!(
            "running with admin language '{}'",
            config.admin_lang.code()
        ));
        self.protocols
            .section("header")
            .push(format!("Using test \"{}\".", config.test_title));

        self.admin.verify_admin_settings().await?;

        let temp_title = format!("examcheck-{}", Uuid::new_v4());
        let working = self
            .admin
            .copy_test(&config.test_id, &temp_title)
            .await
            .with_context(|| format!("failed to copy test {}", config.test_id))?;
        self.master(&format!("copied test {} as {temp_title}.", config.test_id));
        self.working_test = Some(working.clone());

        let (questions, exam_configuration) = match self.cache.definitions(&config.test_id) {
            Some(cached) => cached,
            None => {
                let definitions = self.admin.questions(&working).await?;
                let questions = QuestionSet::from_definitions(&definitions)?;
                let exam_configuration = self.admin.exam_configuration(&working).await?;
                exam_configuration
                    .check_version()
                    .map_err(DomainError::not_implemented)?;
                exam_configuration
                    .marks
                    .validate()
                    .map_err(DomainError::interaction)?;
                self.cache.store_definitions(
                    &config.test_id,
                    questions.clone(),
                    exam_configuration.clone(),
                );
                (questions, exam_configuration)
            }
        };
        self.master(&format!("test has {} questions.", questions.len()));
        questions.initialize_coverage(&mut self.coverage, &self.ctx);
        self.questions = questions;
        self.exam_configuration = exam_configuration;

        let count = self.machines.len();
        self.users = match self.cache.take_users(&config.test_id, count) {
            Some(users) => {
                self.master(&format!("reusing {count} recycled users."));
                users
            }
            None => self.admin.acquire_users(count).await?,
        };
        self.admin.configure_test(&working, &self.users).await?;
        self.test_url = self.admin.test_url(&working).await?;

        self.master("running with workarounds:");
        for line in config.workarounds.status_lines() {
            self.master(&line);
            self.protocols.section("preferences/workarounds").push(line);
        }
        self.master("running with settings:");
        for line in config.settings.status_lines() {
            self.master(&line);
            self.protocols.section("preferences/settings").push(line);
        }
        let marks = self.exam_configuration.marks.status_lines();
        self.protocols.section("mark_schema").extend(marks);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // run_exams
    // -----------------------------------------------------------------------

    fn commands(&self) -> Vec<TakeExamCommand> {
        self.machines
            .iter()
            .zip(&self.users)
            .enumerate()
            .map(|(i, (machine, user))| TakeExamCommand {
                command: TAKE_EXAM.to_string(),
                machine: machine.name().to_string(),
                machine_index: i as u32 + 1,
                username: user.username.clone(),
                password: user.password.clone(),
                test_id: self.working_test.clone().unwrap_or_default(),
                test_url: self.test_url.clone(),
                server_url: self.config.server_url.clone(),
                wait_time: self.config.wait_time,
                admin_lang: self.config.admin_lang,
                questions: self.questions.clone(),
                exam_configuration: self.exam_configuration.clone(),
                settings: self.config.settings.clone(),
                workarounds: self.config.workarounds.clone(),
            })
            .collect()
    }

    /// Dispatch one session per machine; results come back ordered by
    /// machine index.
    async fn run_exams(&mut self) -> Result<Vec<ExamResult>> {
        let commands = self.commands();
        let semaphore = Arc::new(Semaphore::new(commands.len().max(1)));
        let progress = self.progress;

        let mut futures = FuturesUnordered::new();
        for (machine, command) in self.machines.iter().zip(commands) {
            let machine = Arc::clone(machine);
            let semaphore = Arc::clone(&semaphore);
            let orchestration = self.orchestration.clone();
            let batch_id = self.batch_id.clone();

            futures.push(async move {
                let index = command.machine_index;
                let name = command.machine.clone();
                let inner = async {
                    let _permit = semaphore
                        .clone()
                        .acquire_owned()
                        .await
                        .map_err(|_| anyhow::anyhow!("semaphore closed"))?;
                    progress.report("master", &format!("passing take_exam to {name}."));
                    machine.take_exam(&batch_id, &command, &orchestration, progress).await
                };
                let outcome = inner.await;
                (index, name, outcome)
            });
        }

        let mut results = Vec::new();
        while let Some((index, name, outcome)) = futures.next().await {
            let result = match outcome {
                Ok(result) => {
                    progress.report("master", &format!("received results from {name}."));
                    result
                }
                Err(e) => {
                    tracing::error!("machine {name} failed: {e:#}");
                    progress.report("error", &format!("machine {name} failed: {e:#}"));
                    ExamResult::from_error(Origin::Recorded, classify(&e), format!("{e:#}"), BTreeMap::new())
                }
            };
            results.push((index, result));
        }
        drop(futures);

        if self.orchestration.is_cancelled() {
            return Err(DomainError::interaction("cancelled").into());
        }

        self.master("all results arrived.");
        results.sort_by_key(|(index, _)| *index);
        Ok(results.into_iter().map(|(_, r)| r).collect())
    }

    // -----------------------------------------------------------------------
    // analyze
    // -----------------------------------------------------------------------

    async fn analyze(&mut self, mut results: Vec<ExamResult>) -> Result<()> {
        for result in &results {
            self.coverage.extend(result.coverage());
        }
        let estimate = format!("Coverage estimated at {:.0}%.", self.coverage.percentage());
        self.protocols.section("header").push(estimate);

        for (user, result) in self.users.iter().zip(results.iter_mut()) {
            let mut lines = vec![
                format!("# TEST RUN FOR {}", user.username.to_uppercase()),
                String::new(),
            ];
            lines.extend(result.protocol().iter().cloned());
            self.protocols.machines.insert(user.username.clone(), lines);
            for (name, content) in result.take_files() {
                self.files.insert(format!("{}_{name}", user.username), content);
            }
            self.performance.extend_from_slice(result.performance());
        }

        let worst = ErrorDomain::most_severe(results.iter().map(ExamResult::most_severe_error_domain));
        if worst > ErrorDomain::None {
            let message = results
                .iter()
                .find_map(|r| r.error_message(worst))
                .unwrap_or("failed with unknown details")
                .to_string();
            return Err(DomainError::new(worst, message).into());
        }

        let mut subject = Subject {
            test_id: self.working_test.clone().unwrap_or_default(),
            questions: self.questions.clone(),
            recorded: results,
            is_reimport: false,
        };
        if self.verify(&mut subject).await? {
            Ok(())
        } else {
            Err(DomainError::integrity("integrity assertions failed").into())
        }
    }

    /// check, reimport, (readjust, check) x N, manual, check.
    async fn verify(&mut self, subject: &mut Subject) -> Result<bool> {
        if !self.check(0, subject).await? {
            return Ok(false);
        }
        let archive = self.save_test(&subject.test_id, &["initial"]).await?;
        if !self.verify_reimport(&archive, subject).await? {
            return Ok(false);
        }
        let mut rounds = Vec::new();
        for _ in 0..self.config.settings.num_readjustments {
            rounds.extend([Round::Readjust, Round::Check]);
        }
        rounds.extend([Round::Manual, Round::Check]);
        self.run_rounds(2, &rounds, subject).await
    }

    /// The reimported copy gets exactly one readjustment, so derived data
    /// that was imported but never recomputed shows up.
    async fn verify_reimport(&mut self, archive: &[u8], original: &Subject) -> Result<bool> {
        let title = format!("examcheck-{}", Uuid::new_v4());
        self.master(&format!("reimporting test as {title}."));
        let test_id = self.admin.import_archive(archive, &title).await?;
        self.master(&format!("reimport of test as {title} done."));

        let mut subject = Subject {
            test_id: test_id.clone(),
            questions: original.questions.clone(),
            recorded: original.recorded.clone(),
            is_reimport: true,
        };
        let rounds = [
            Round::Check,
            Round::Readjust,
            Round::Check,
            Round::Manual,
            Round::Check,
        ];
        let verified = self.run_rounds(0, &rounds, &mut subject).await;

        match (self.admin.delete_test(&test_id).await, &verified) {
            (Err(e), Ok(_)) => return Err(e.context("could not delete reimported test")),
            (Err(e), Err(_)) => {
                tracing::warn!("could not delete reimported test: {e:#}");
                self.report("error", "could not delete reimported test");
            }
            (Ok(()), _) => {}
        }
        verified
    }

    async fn run_rounds(&mut self, first: usize, rounds: &[Round], subject: &mut Subject) -> Result<bool> {
        let suffix = if subject.is_reimport { "reimported" } else { "" };
        for (offset, round) in rounds.iter().enumerate() {
            let index = first + offset;
            match round {
                Round::Check => {
                    if !self.check(index, subject).await? {
                        return Ok(false);
                    }
                }
                Round::Readjust => {
                    self.readjust(index, subject).await?;
                    self.save_test(&subject.test_id, &[suffix, "readjustments"])
                        .await?;
                }
                Round::Manual => {
                    self.manual(index, subject).await?;
                    self.save_test(&subject.test_id, &[suffix, "manual scoring"])
                        .await?;
                }
            }
        }
        Ok(true)
    }

    async fn save_test(&mut self, test_id: &str, names: &[&str]) -> Result<Vec<u8>> {
        let archive = self
            .admin
            .export_archive(test_id)
            .await
            .context("failed to export test archive")?;
        let names: Vec<&str> = names.iter().copied().filter(|n| !n.is_empty()).collect();
        let name = format!("test/v{} [{}]/archive.zip", self.test_version, names.join(", "));
        self.files.insert(name, archive.clone());
        self.test_version += 1;
        Ok(archive)
    }

    // -----------------------------------------------------------------------
    // rounds
    // -----------------------------------------------------------------------

    async fn check(&mut self, index: usize, subject: &Subject) -> Result<bool> {
        let exports = self.admin.export_results(&subject.test_id).await?;
        let prefix = if subject.is_reimport { "reimport/" } else { "original/" };
        let workarounds = self.config.workarounds.clone();
        let users = self.users.clone();
        let mut all_ok = true;

        for (user, recorded) in users.iter().zip(&subject.recorded) {
            self.master(&format!("checking results for user {}.", user.username));
            let export = exports.participants.get(&user.username).ok_or_else(|| {
                DomainError::interaction(format!("no exported results for user {}", user.username))
            })?;
            let exported = export.to_result()?;
            if index == 0 {
                self.files.insert(
                    format!("{prefix}exported_r{index}_{}.json", user.username),
                    exported.to_json()?.into_bytes(),
                );
            }

            let title = format!("## {} ", user.username);
            let mut lines = vec![
                String::new(),
                format!("{title}{}", "#".repeat(80usize.saturating_sub(title.len()))),
                String::new(),
            ];
            let ok = recorded.check_against(
                &exported,
                &mut |line: &str| {
                    if !line.is_empty() {
                        lines.push(line.to_string());
                    }
                },
                &workarounds,
            );
            self.protocols
                .postprocessing(index, "verification", subject.is_reimport)
                .extend(lines);

            if !ok {
                let message = format!("verification failed for user {}.", user.username);
                self.master(&message);
                self.protocols.section("log").push(format!("[fail] {message}"));
                self.save_test(&subject.test_id, &["verification"]).await?;
                all_ok = false;
            }

            if !subject.is_reimport {
                for (title, dimensions) in exported.answers() {
                    if let Some(question) = subject.questions.get(&title) {
                        question.add_export_coverage(&mut self.coverage, &dimensions, &self.ctx);
                    }
                }
            }
        }
        Ok(all_ok)
    }

    async fn readjust(&mut self, index: usize, subject: &mut Subject) -> Result<()> {
        let mut lines = Vec::new();
        let mut titles: Vec<String> = subject.questions.titles().map(String::from).collect();
        self.ctx.shuffle(&mut titles);

        for title in &titles {
            let Some(question) = subject.questions.get_mut(title) else {
                continue;
            };
            let before = question.clone();
            let old_maximum = question.maximum_score();
            let readjustment = question.readjust_scores(&mut self.ctx, &mut |line: &str| {
                lines.push(format!("[{title}] {line}"))
            });
            if !readjustment.changed {
                continue;
            }

            let accepted = self
                .admin
                .save_scoring(&subject.test_id, question)
                .await
                .with_context(|| format!("failed to save readjusted scoring of '{title}'"))?;
            if !accepted {
                let maximum = question.maximum_score();
                *question = before;
                if maximum.is_positive() {
                    return Err(DomainError::interaction(format!(
                        "server rejected new scores of '{title}' even though they are valid ({maximum})"
                    ))
                    .into());
                }
                lines.push(format!("[{title}] server rejected invalid new scores."));
                continue;
            }

            for recorded in &mut subject.recorded {
                expected::remove_answer_keys(recorded, title, &readjustment.removed_keys);
            }
            lines.push(format!(
                "[{title}] maximum score went from {old_maximum} to {}.",
                question.maximum_score()
            ));
        }

        for (user, recorded) in self.users.iter().zip(&mut subject.recorded) {
            expected::recompute(recorded, &subject.questions, &self.exam_configuration, &self.ctx)?;
            lines.push(format!(
                "{}: expected total is now {}.",
                user.username,
                recorded
                    .get(&crate::result::key(["xls", "score_reached"]))
                    .unwrap_or("(missing)")
            ));
        }

        for line in &lines {
            self.progress.report("master", line);
        }
        self.protocols
            .postprocessing(index, "readjustment", subject.is_reimport)
            .extend(lines);
        Ok(())
    }

    async fn manual(&mut self, index: usize, subject: &mut Subject) -> Result<()> {
        let mut lines = Vec::new();
        let mut scores = Vec::new();

        for question in &subject.questions.questions {
            if !question.can_score_manually() {
                continue;
            }
            let title = question.title();
            let maximum = question.maximum_score();
            lines.push(format!("manual scores for question {title}"));
            lines.push(String::new());

            for (user, recorded) in self.users.iter().zip(&mut subject.recorded) {
                let quarters = self.ctx.randint(0, (1 + maximum.trunc()) * 4);
                let score = Score::from_quarters(quarters).min(maximum);
                for k in ExamResult::reached_score_keys(title) {
                    recorded.update(&k, format_score(score))?;
                }
                lines.push(format!("{}: {score}", user.username));
                scores.push(ManualScore {
                    username: user.username.clone(),
                    title: title.to_string(),
                    score,
                });
            }
            lines.push(String::new());
        }

        if !scores.is_empty() {
            self.admin
                .save_manual_scores(&subject.test_id, &scores)
                .await
                .context("failed to save manual scores")?;
        }
        for recorded in &mut subject.recorded {
            expected::recompute(recorded, &subject.questions, &self.exam_configuration, &self.ctx)?;
        }
        self.protocols
            .postprocessing(index, "manual_scoring", subject.is_reimport)
            .extend(lines);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // cleanup and store
    // -----------------------------------------------------------------------

    async fn save_error_screenshot(&mut self) {
        match self.admin.screenshot().await {
            Ok(Some(png)) => {
                let mut i = 1;
                while self.files.contains_key(&format!("error/master.{i}.png")) {
                    i += 1;
                }
                self.progress.on_screenshot("master", &png);
                self.files.insert(format!("error/master.{i}.png"), png);
            }
            Ok(None) => {}
            Err(e) => tracing::warn!("failed to take error screenshot: {e:#}"),
        }
    }

    async fn cleanup(&mut self) -> Result<()> {
        if let Some(test_id) = self.working_test.take() {
            if let Err(e) = self.admin.delete_test(&test_id).await {
                tracing::warn!("could not delete test {test_id}: {e:#}");
                self.report("error", &format!("could not delete test {test_id}"));
            }
        }
        if self.users.is_empty() {
            return Ok(());
        }
        if self.config.recycle_users {
            self.cache
                .recycle_users(&self.config.test_id, self.users.clone());
        } else {
            self.admin
                .release_users(&self.users)
                .await
                .context("failed to release users")?;
        }
        Ok(())
    }

    fn into_outcome(self, success: String, elapsed: Duration) -> RunOutcome {
        let mut files = self.files;
        files.insert("protocol.txt".to_string(), self.protocols.render().into_bytes());
        for (name, lines) in &self.protocols.postprocessing {
            files.insert(format!("postprocessing/{name}"), lines.join("\n").into_bytes());
        }
        for (part, lines) in &self.protocols.machines {
            files.insert(format!("machines/{part}.txt"), lines.join("\n").into_bytes());
        }

        RunOutcome {
            record: RunRecord {
                created: chrono::Utc::now(),
                batch: self.batch_id,
                success,
                files,
                nusers: self.users.len(),
                elapsed_secs: elapsed.as_secs(),
            },
            performance: self.performance,
            coverage: self.coverage,
        }
    }
}
