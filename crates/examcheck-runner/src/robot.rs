//! The exam robot.
//!
//! Runs the configured test passes against an [`ExamUi`]:
//!
//! - `A` answers every question with a random answer. Answers the server
//!   must reject are checked for an error alert on save, then replaced.
//!   Some visits end in a simulated browser crash.
//! - `V` walks all questions and verifies what the UI shows.
//! - `R` revisits questions, verifies them and sometimes gives a new answer.
//!
//! Answers are tracked by sequence id, so a participant-specific question
//! order does not matter.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use anyhow::Result;

use examcheck_core::command::TakeExamCommand;
use examcheck_core::context::Context;
use examcheck_core::coverage::Coverage;
use examcheck_core::decimal::Score;
use examcheck_core::error::{DomainError, ErrorDomain};
use examcheck_core::expected::{self, QuestionScores};
use examcheck_core::protocol::{escape, timestamp, AnswerProtocol};
use examcheck_core::question::Dimensions;
use examcheck_core::result::{ExamResult, Origin};
use examcheck_core::traits::ExamUi;

use crate::session::SessionReporter;

#[derive(Debug, Clone, Copy)]
enum Direction {
    Next,
    Previous,
}

/// The answer currently given for one question.
#[derive(Debug)]
struct GivenAnswer {
    title: String,
    dimensions: Dimensions,
    score: Score,
    protocol: AnswerProtocol,
}

impl GivenAnswer {
    fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            dimensions: Dimensions::new(),
            score: Score::ZERO,
            protocol: AnswerProtocol::new(title),
        }
    }
}

pub struct ExamRobot<'a> {
    ui: &'a mut dyn ExamUi,
    command: &'a TakeExamCommand,
    reporter: &'a SessionReporter,
    ctx: Context,
    answers: BTreeMap<u32, GivenAnswer>,
    protocol: Vec<String>,
    performance: Vec<f64>,
    coverage: Coverage,
    last_screenshot: Option<Instant>,
}

impl<'a> ExamRobot<'a> {
    pub fn new(
        ui: &'a mut dyn ExamUi,
        command: &'a TakeExamCommand,
        reporter: &'a SessionReporter,
    ) -> Self {
        Self {
            ui,
            command,
            reporter,
            ctx: command.context(),
            answers: BTreeMap::new(),
            protocol: Vec::new(),
            performance: Vec::new(),
            coverage: Coverage::new(),
            last_screenshot: None,
        }
    }

    fn report(&mut self, message: &str) {
        self.protocol
            .push(format!("{} [test] {}", timestamp(), escape(message)));
        self.reporter.echo(message);
    }

    fn note(&mut self, sequence_id: u32, text: &str) {
        if let Some(given) = self.answers.get_mut(&sequence_id) {
            given.protocol.add(text);
        }
    }

    /// Test-level and per-question protocol lines, ordered by time.
    pub fn protocol_lines(&self) -> Vec<String> {
        let mut lines = self.protocol.clone();
        for given in self.answers.values() {
            lines.extend(given.protocol.lines().iter().cloned());
        }
        lines.sort_by(|a, b| a.get(..8).cmp(&b.get(..8)));
        lines
    }

    /// Log in, run all passes, finish the test and return the expected
    /// result.
    pub async fn run(&mut self) -> Result<ExamResult> {
        let command = self.command;
        self.report(&format!("logging in as {}.", command.username));
        self.ui.login(&command.username, &command.password).await?;
        self.ui.open_test(&command.test_url).await?;
        self.ui.start_exam().await?;
        self.screenshot(true).await;

        for (i, pass) in command.settings.test_passes.chars().enumerate() {
            self.report(&format!("entering pass {i}."));
            match pass.to_ascii_uppercase() {
                'A' => self.answer_pass().await?,
                'V' => self.verify_pass().await?,
                'R' => self.revisit_pass().await?,
                other => {
                    return Err(
                        DomainError::interaction(format!("unknown test pass '{other}'")).into(),
                    )
                }
            }
        }

        self.report("finishing test.");
        self.ui.finish().await?;
        self.screenshot(true).await;
        self.expected_result()
    }

    // -----------------------------------------------------------------------
    // passes
    // -----------------------------------------------------------------------

    async fn answer_pass(&mut self) -> Result<()> {
        self.ui.goto_first().await?;

        let level = self.command.settings.self_test_fake_error_level;
        if level > 0 {
            let domain = ErrorDomain::from_level(level).unwrap_or(ErrorDomain::Unexpected);
            return Err(DomainError::new(domain, format!("fake {domain} error for self test")).into());
        }

        loop {
            self.give_answer().await?;
            if !self.navigate(Direction::Next, true).await? {
                break;
            }
        }
        Ok(())
    }

    async fn verify_pass(&mut self) -> Result<()> {
        self.ui.goto_first().await?;
        loop {
            self.verify_current(false).await?;
            if !self.navigate(Direction::Next, true).await? {
                break;
            }
        }
        Ok(())
    }

    async fn revisit_pass(&mut self) -> Result<()> {
        let command = self.command;
        for _ in 0..command.questions.len() {
            self.verify_current(false).await?;
            if self.ctx.percent(command.settings.modify_answer_frequency) {
                self.report("modifying answer.");
                self.give_answer().await?;
            }
            self.goto_next_or_previous(false, true).await?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // answers
    // -----------------------------------------------------------------------

    /// Enter random answers until one is valid, then maybe crash.
    async fn give_answer(&mut self) -> Result<()> {
        while !self.randomize_answer().await? {
            self.assert_error_on_save().await?;
        }
        self.maybe_crash().await
    }

    /// Enter and verify one random answer. Returns whether it is valid.
    async fn randomize_answer(&mut self) -> Result<bool> {
        let command = self.command;
        let sequence_id = self.ui.sequence_id().await?;
        let title = self.ui.current_title().await?;
        let question = command.questions.get(&title).ok_or_else(|| {
            DomainError::interaction(format!("no question content found for '{title}'"))
        })?;
        self.report(&format!("answering question \"{title}\" [{sequence_id}]."));

        let answer = question.random_answer(&mut self.ctx);
        let given = self
            .answers
            .entry(sequence_id)
            .or_insert_with(|| GivenAnswer::new(&title));
        for (key, value) in &answer.dimensions {
            given.protocol.choose(key, value);
        }
        if !answer.valid {
            given.protocol.add("answer is invalid and must not be saved.");
        }

        self.ui.enter_answer(&answer.dimensions).await?;
        given.dimensions = answer.dimensions;
        given.score = answer.score;

        self.verify_current(false).await?;
        Ok(answer.valid)
    }

    /// Compare what the UI shows for the current question with what was
    /// entered.
    async fn verify_current(&mut self, after_crash: bool) -> Result<()> {
        let command = self.command;
        let sequence_id = self.ui.sequence_id().await?;
        let shown = self.ui.read_answer().await?;
        let given = self.answers.get_mut(&sequence_id).ok_or_else(|| {
            DomainError::interaction(format!("no answer was given for question [{sequence_id}]"))
        })?;

        let question = command.questions.get(&given.title).ok_or_else(|| {
            DomainError::interaction(format!("no question content found for '{}'", given.title))
        })?;
        for (key, expected) in &given.dimensions {
            let actual = shown.get(key).map(String::as_str).unwrap_or("");
            given.protocol.verify(
                key,
                &question.comparable(expected, &self.ctx),
                &question.comparable(actual, &self.ctx),
                after_crash,
            )?;
        }
        question.add_verify_coverage(&mut self.coverage, &given.dimensions, &self.ctx);
        Ok(())
    }

    /// Saving the invalid answer on screen must fail and show an alert.
    async fn assert_error_on_save(&mut self) -> Result<()> {
        if self.command.workarounds.dont_test_invalid_save {
            return Ok(());
        }
        let sequence_id = self.ui.sequence_id().await?;
        self.note(sequence_id, "checking that saving the invalid answer fails.");

        for _ in 0..2 {
            if !self.goto_next_or_previous(true, false).await? {
                self.note(sequence_id, "no other question to navigate to, skipping check.");
                return Ok(());
            }
            if self.ui.sequence_id().await? != sequence_id {
                return Err(DomainError::invalid_save(
                    "save succeeded even though saved data was invalid.",
                )
                .into());
            }
            if !self.ui.save_rejected().await? {
                return Err(DomainError::invalid_save(
                    "save presented no error though saved data was invalid.",
                )
                .into());
            }
        }
        self.note(sequence_id, "saving the invalid answer failed as expected.");
        Ok(())
    }

    /// Wait for autosave, reload and verify that nothing was lost.
    async fn maybe_crash(&mut self) -> Result<()> {
        let command = self.command;
        if !self.ctx.percent(command.settings.crash_frequency) {
            return Ok(());
        }
        let sequence_id = self.ui.sequence_id().await?;
        let wait = f64::from(command.settings.autosave_duration + command.settings.autosave_tolerance)
            * command.wait_time;
        self.note(
            sequence_id,
            &format!("waiting {wait:.1} seconds for autosave before simulated crash."),
        );
        if wait > 0.0 {
            tokio::time::sleep(Duration::from_secs_f64(wait)).await;
        }

        self.note(sequence_id, "simulating crash.");
        self.report(&format!("simulating crash on question [{sequence_id}]."));
        self.ui.refresh().await?;
        self.verify_current(true).await
    }

    // -----------------------------------------------------------------------
    // navigation
    // -----------------------------------------------------------------------

    /// Move one question. Moves the server must refuse are not timed.
    async fn navigate(&mut self, direction: Direction, timed: bool) -> Result<bool> {
        let start = Instant::now();
        let moved = match direction {
            Direction::Next => self.ui.goto_next().await?,
            Direction::Previous => self.ui.goto_previous().await?,
        };
        if moved {
            if timed {
                self.performance.push(start.elapsed().as_secs_f64());
            }
            self.screenshot(false).await;
        }
        Ok(moved)
    }

    /// Next, or previous if there is no next. With `random`, the order is a
    /// coin toss.
    async fn goto_next_or_previous(&mut self, random: bool, timed: bool) -> Result<bool> {
        let mut order = [Direction::Next, Direction::Previous];
        if random && self.ctx.chance(0.5) {
            order.reverse();
        }
        for direction in order {
            if self.navigate(direction, timed).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn screenshot(&mut self, force: bool) {
        let every = Duration::from_secs(u64::from(self.command.settings.screenshot_refresh_time));
        if !force && self.last_screenshot.is_some_and(|t| t.elapsed() < every) {
            return;
        }
        self.last_screenshot = Some(Instant::now());
        match self.ui.screenshot().await {
            Ok(Some(png)) => self.reporter.screenshot(&png),
            Ok(None) => {}
            Err(e) => tracing::debug!("screenshot failed: {e}"),
        }
    }

    // -----------------------------------------------------------------------
    // result
    // -----------------------------------------------------------------------

    /// What the server must export for this participant, from the answers
    /// given and the scores generated with them.
    fn expected_result(&mut self) -> Result<ExamResult> {
        let command = self.command;
        let mut result = ExamResult::new(Origin::Recorded);
        let mut scores = QuestionScores::new();
        for given in self.answers.values() {
            let stored = match command.questions.get(&given.title) {
                Some(question) => question.stored_dimensions(&given.dimensions, &self.ctx),
                None => given.dimensions.clone(),
            };
            expected::add_answer_keys(&mut result, &given.title, &stored)?;
            scores.insert(given.title.clone(), given.score);
        }
        expected::apply_scores(
            &mut result,
            &command.questions,
            &scores,
            &command.exam_configuration,
            &command.workarounds,
        )?;

        self.report("computed expected result.");
        result.attach_protocol(self.protocol_lines());
        result.attach_performance(&self.performance);
        result.attach_coverage(&self.coverage);
        Ok(result)
    }
}
