//! The scoring engine: one variant per question kind.
//!
//! Every variant generates random answers, scores answers, readjusts its own
//! scoring rules within legal bounds and registers coverage cases. The
//! contract tying it together is that the score reported by
//! [`Question::random_answer`] equals [`Question::compute_score`] of the
//! dimensions it generated.

mod choice;
mod cloze;
mod matching;
mod text;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::context::Context;
use crate::coverage::Coverage;
use crate::decimal::Score;
use crate::error::DomainError;

pub use choice::{Kprim, KprimStatement, McChoice, MultipleChoice, ScChoice, SingleChoice};
pub use cloze::{Cloze, ClozeGap, Comparator};
pub use matching::{Matching, MatchingItem, MatchingPair, Multiplicity};
pub use text::{Code, LongText, Paint};

/// Answer dimensions: ordered key segments to value.
pub type Dimensions = BTreeMap<Vec<String>, String>;

pub const QUESTION_SET_VERSION: u32 = 1;

/// A freshly generated answer.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedAnswer {
    pub dimensions: Dimensions,
    pub score: Score,
    /// `false` when the server is expected to reject saving this answer.
    pub valid: bool,
}

/// Outcome of a readjustment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Readjustment {
    pub changed: bool,
    /// Answer dimension keys that no longer exist.
    pub removed_keys: Vec<Vec<String>>,
}

impl Readjustment {
    pub fn unchanged() -> Self {
        Self::default()
    }

    pub fn changed() -> Self {
        Self {
            changed: true,
            removed_keys: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoverageMode {
    Verify,
    Export,
}

impl CoverageMode {
    pub const BOTH: [CoverageMode; 2] = [CoverageMode::Verify, CoverageMode::Export];

    pub fn name(self) -> &'static str {
        match self {
            CoverageMode::Verify => "verify",
            CoverageMode::Export => "export",
        }
    }
}

/// Behavior shared by all question variants.
trait Variant {
    fn title(&self) -> &str;
    fn validate(&self) -> Result<(), String>;
    fn random_answer(&self, ctx: &mut Context) -> GeneratedAnswer;
    fn compute_score(&self, dimensions: &Dimensions, ctx: &Context) -> Score;
    fn maximum_score(&self) -> Score;
    fn is_valid_answer(&self, _dimensions: &Dimensions, _ctx: &Context) -> bool {
        true
    }
    fn readjust_scores(&mut self, ctx: &mut Context, report: &mut dyn FnMut(&str)) -> Readjustment;
    fn initialize_coverage(&self, coverage: &mut Coverage, ctx: &Context);
    fn add_coverage(
        &self,
        coverage: &mut Coverage,
        mode: CoverageMode,
        dimensions: &Dimensions,
        ctx: &Context,
    );
    fn can_score_manually(&self) -> bool {
        false
    }
    fn set_maximum_score(&mut self, _maximum: Score) {}
    /// The form a shown or entered value is compared in.
    fn comparable(&self, value: &str, _ctx: &Context) -> String {
        value.to_string()
    }
    /// The answer dimensions as the server stores and exports them.
    fn stored_dimensions(&self, dimensions: &Dimensions, _ctx: &Context) -> Dimensions {
        dimensions.clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionKind {
    SingleChoice,
    MultipleChoice,
    Kprim,
    Cloze,
    Matching,
    LongText,
    Paint,
    Code,
}

/// Server class names and the variant each one maps to.
const DISPATCH: &[(&str, QuestionKind)] = &[
    ("assSingleChoiceGUI", QuestionKind::SingleChoice),
    ("assMultipleChoiceGUI", QuestionKind::MultipleChoice),
    ("assKprimChoiceGUI", QuestionKind::Kprim),
    ("assClozeTestGUI", QuestionKind::Cloze),
    ("assMatchingQuestionGUI", QuestionKind::Matching),
    ("assTextQuestionGUI", QuestionKind::LongText),
    ("assPaintQuestionGUI", QuestionKind::Paint),
    ("assCodeQuestionGUI", QuestionKind::Code),
];

impl QuestionKind {
    /// Look up a server class name, case-insensitively.
    pub fn from_class_name(class_name: &str) -> Result<QuestionKind, DomainError> {
        DISPATCH
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(class_name.trim()))
            .map(|(_, kind)| *kind)
            .ok_or_else(|| {
                DomainError::not_implemented(format!("unsupported question type '{class_name}'"))
            })
    }

    pub fn class_name(self) -> &'static str {
        DISPATCH
            .iter()
            .find(|(_, kind)| *kind == self)
            .map(|(name, _)| *name)
            .unwrap_or("unknown")
    }
}

impl fmt::Display for QuestionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QuestionKind::SingleChoice => "single choice",
            QuestionKind::MultipleChoice => "multiple choice",
            QuestionKind::Kprim => "kprim",
            QuestionKind::Cloze => "cloze",
            QuestionKind::Matching => "matching",
            QuestionKind::LongText => "long text",
            QuestionKind::Paint => "paint",
            QuestionKind::Code => "code",
        };
        f.write_str(name)
    }
}

/// A question definition as parsed by the server administration layer: the
/// class name plus a JSON body with the variant's fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionDefinition {
    pub class_name: String,
    pub body: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Question {
    SingleChoice(SingleChoice),
    MultipleChoice(MultipleChoice),
    Kprim(Kprim),
    Cloze(Cloze),
    Matching(Matching),
    LongText(LongText),
    Paint(Paint),
    Code(Code),
}

impl Question {
    fn inner(&self) -> &dyn Variant {
        match self {
            Question::SingleChoice(q) => q,
            Question::MultipleChoice(q) => q,
            Question::Kprim(q) => q,
            Question::Cloze(q) => q,
            Question::Matching(q) => q,
            Question::LongText(q) => q,
            Question::Paint(q) => q,
            Question::Code(q) => q,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn Variant {
        match self {
            Question::SingleChoice(q) => q,
            Question::MultipleChoice(q) => q,
            Question::Kprim(q) => q,
            Question::Cloze(q) => q,
            Question::Matching(q) => q,
            Question::LongText(q) => q,
            Question::Paint(q) => q,
            Question::Code(q) => q,
        }
    }

    /// Build a question from a server definition, dispatching on its class
    /// name. Unknown class names are not-implemented errors, malformed
    /// bodies interaction errors.
    pub fn from_definition(definition: &QuestionDefinition) -> Result<Question, DomainError> {
        let kind = QuestionKind::from_class_name(&definition.class_name)?;
        let body = definition.body.clone();
        let parse_err = |e: serde_json::Error| {
            DomainError::interaction(format!(
                "malformed {} question definition: {e}",
                kind
            ))
        };
        let question = match kind {
            QuestionKind::SingleChoice => {
                Question::SingleChoice(serde_json::from_value(body).map_err(parse_err)?)
            }
            QuestionKind::MultipleChoice => {
                Question::MultipleChoice(serde_json::from_value(body).map_err(parse_err)?)
            }
            QuestionKind::Kprim => Question::Kprim(serde_json::from_value(body).map_err(parse_err)?),
            QuestionKind::Cloze => Question::Cloze(serde_json::from_value(body).map_err(parse_err)?),
            QuestionKind::Matching => {
                Question::Matching(serde_json::from_value(body).map_err(parse_err)?)
            }
            QuestionKind::LongText => {
                Question::LongText(serde_json::from_value(body).map_err(parse_err)?)
            }
            QuestionKind::Paint => Question::Paint(serde_json::from_value(body).map_err(parse_err)?),
            QuestionKind::Code => Question::Code(serde_json::from_value(body).map_err(parse_err)?),
        };
        question
            .inner()
            .validate()
            .map_err(|e| DomainError::interaction(format!("question '{}': {e}", question.title())))?;
        Ok(question)
    }

    /// The server-side definition of this question.
    pub fn to_definition(&self) -> QuestionDefinition {
        let mut body = serde_json::to_value(self).unwrap_or(serde_json::Value::Null);
        if let Some(map) = body.as_object_mut() {
            map.remove("kind");
        }
        QuestionDefinition {
            class_name: self.kind().class_name().to_string(),
            body,
        }
    }

    pub fn kind(&self) -> QuestionKind {
        match self {
            Question::SingleChoice(_) => QuestionKind::SingleChoice,
            Question::MultipleChoice(_) => QuestionKind::MultipleChoice,
            Question::Kprim(_) => QuestionKind::Kprim,
            Question::Cloze(_) => QuestionKind::Cloze,
            Question::Matching(_) => QuestionKind::Matching,
            Question::LongText(_) => QuestionKind::LongText,
            Question::Paint(_) => QuestionKind::Paint,
            Question::Code(_) => QuestionKind::Code,
        }
    }

    pub fn title(&self) -> &str {
        self.inner().title()
    }

    pub fn validate(&self) -> Result<(), String> {
        self.inner().validate()
    }

    pub fn random_answer(&self, ctx: &mut Context) -> GeneratedAnswer {
        self.inner().random_answer(ctx)
    }

    pub fn compute_score(&self, dimensions: &Dimensions, ctx: &Context) -> Score {
        self.inner().compute_score(dimensions, ctx)
    }

    pub fn maximum_score(&self) -> Score {
        self.inner().maximum_score()
    }

    /// Whether the server accepts saving these dimensions.
    pub fn is_valid_answer(&self, dimensions: &Dimensions, ctx: &Context) -> bool {
        self.inner().is_valid_answer(dimensions, ctx)
    }

    pub fn readjust_scores(
        &mut self,
        ctx: &mut Context,
        report: &mut dyn FnMut(&str),
    ) -> Readjustment {
        self.inner_mut().readjust_scores(ctx, report)
    }

    pub fn initialize_coverage(&self, coverage: &mut Coverage, ctx: &Context) {
        self.inner().initialize_coverage(coverage, ctx)
    }

    pub fn add_verify_coverage(&self, coverage: &mut Coverage, dimensions: &Dimensions, ctx: &Context) {
        self.inner()
            .add_coverage(coverage, CoverageMode::Verify, dimensions, ctx)
    }

    pub fn add_export_coverage(&self, coverage: &mut Coverage, dimensions: &Dimensions, ctx: &Context) {
        self.inner()
            .add_coverage(coverage, CoverageMode::Export, dimensions, ctx)
    }

    pub fn can_score_manually(&self) -> bool {
        self.inner().can_score_manually()
    }

    /// Canonical form of an answer value before entered and shown values are
    /// compared.
    pub fn comparable(&self, value: &str, ctx: &Context) -> String {
        self.inner().comparable(value, ctx)
    }

    /// Answer dimensions after the server's conversions on save and export.
    pub fn stored_dimensions(&self, dimensions: &Dimensions, ctx: &Context) -> Dimensions {
        self.inner().stored_dimensions(dimensions, ctx)
    }

    /// Change the maximum of a manually scored question. No-op for others.
    pub fn set_maximum_score(&mut self, maximum: Score) {
        self.inner_mut().set_maximum_score(maximum)
    }
}

/// Versioned transfer form of the questions of one test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionSet {
    pub version: u32,
    pub questions: Vec<Question>,
}

impl QuestionSet {
    pub fn new(questions: Vec<Question>) -> Self {
        Self {
            version: QUESTION_SET_VERSION,
            questions,
        }
    }

    /// One question of every kind.
    pub fn demo() -> Self {
        Self::new(vec![
            Question::SingleChoice(SingleChoice::sample("SC")),
            Question::MultipleChoice(MultipleChoice::sample("MC")),
            Question::Kprim(Kprim::sample("KP")),
            Question::Cloze(Cloze::sample("Cloze 1")),
            Question::Matching(Matching::sample("Match")),
            Question::LongText(LongText::sample("Essay")),
            Question::Paint(Paint::sample("Paint")),
            Question::Code(Code::sample("Code")),
        ])
    }

    /// Build a set from server definitions, rejecting unknown kinds and
    /// duplicate titles.
    pub fn from_definitions(definitions: &[QuestionDefinition]) -> Result<Self, DomainError> {
        let questions = definitions
            .iter()
            .map(Question::from_definition)
            .collect::<Result<Vec<_>, _>>()?;
        let set = Self::new(questions);
        set.validate()?;
        Ok(set)
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        if self.version != QUESTION_SET_VERSION {
            return Err(DomainError::not_implemented(format!(
                "unsupported question set version {} (expected {QUESTION_SET_VERSION})",
                self.version
            )));
        }
        let mut titles = BTreeSet::new();
        for question in &self.questions {
            if !titles.insert(question.title()) {
                return Err(DomainError::interaction(format!(
                    "duplicate question title '{}'",
                    question.title()
                )));
            }
            question.validate().map_err(|e| {
                DomainError::interaction(format!("question '{}': {e}", question.title()))
            })?;
        }
        Ok(())
    }

    pub fn get(&self, title: &str) -> Option<&Question> {
        self.questions.iter().find(|q| q.title() == title)
    }

    pub fn get_mut(&mut self, title: &str) -> Option<&mut Question> {
        self.questions.iter_mut().find(|q| q.title() == title)
    }

    pub fn titles(&self) -> impl Iterator<Item = &str> {
        self.questions.iter().map(Question::title)
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    /// Sum of all question maxima.
    pub fn maximum_score(&self) -> Score {
        self.questions.iter().map(Question::maximum_score).sum()
    }

    pub fn initialize_coverage(&self, coverage: &mut Coverage, ctx: &Context) {
        for question in &self.questions {
            question.initialize_coverage(coverage, ctx);
        }
    }
}

/// A one-segment dimension key.
pub(crate) fn dim(name: impl Into<String>) -> Vec<String> {
    vec![name.into()]
}

pub(crate) fn flag(on: bool) -> String {
    if on { "1" } else { "0" }.to_string()
}

pub(crate) fn is_flag_set(dimensions: &Dimensions, name: &str) -> bool {
    dimensions
        .get(&dim(name))
        .is_some_and(|v| v.trim() == "1")
}

/// `randint(low, high) / 4`.
pub(crate) fn quarter_delta(ctx: &mut Context, low: i64, high: i64) -> Score {
    Score::from_quarters(ctx.randint(low, high))
}

pub(crate) fn check_unique<'a>(
    labels: impl IntoIterator<Item = &'a str>,
    what: &str,
) -> Result<(), String> {
    let mut seen = BTreeSet::new();
    for label in labels {
        if !seen.insert(label.trim()) {
            return Err(format!("duplicate {what} '{label}'"));
        }
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::context::{ContextKind, Language};
    use crate::settings::{Settings, Workarounds};

    pub(crate) fn regression_ctx(seed: u64) -> Context {
        Context::new(
            ContextKind::Regression { seed },
            Settings::default(),
            Workarounds::default(),
            Language::En,
        )
    }

    pub(crate) fn fuzz_ctx(workarounds: Workarounds) -> Context {
        Context::new(
            ContextKind::Fuzzing,
            Settings::default(),
            workarounds,
            Language::En,
        )
    }

    /// Score/answer agreement over many draws.
    pub(crate) fn assert_agreement(question: &Question, draws: usize) {
        for seed in 0..draws as u64 {
            let mut ctx = regression_ctx(seed);
            let answer = question.random_answer(&mut ctx);
            assert_eq!(
                answer.score,
                question.compute_score(&answer.dimensions, &ctx),
                "seed {seed}: {:?}",
                answer.dimensions
            );
        }
        let mut ctx = fuzz_ctx(Workarounds::default());
        for _ in 0..draws {
            let answer = question.random_answer(&mut ctx);
            assert_eq!(answer.score, question.compute_score(&answer.dimensions, &ctx));
        }
    }

    pub(crate) fn sample_set() -> QuestionSet {
        QuestionSet::demo()
    }

    #[test]
    fn dispatch_table_is_case_insensitive() {
        assert_eq!(
            QuestionKind::from_class_name("assclozetestgui").unwrap(),
            QuestionKind::Cloze
        );
        let err = QuestionKind::from_class_name("assFileUploadGUI").unwrap_err();
        assert_eq!(err.domain, crate::error::ErrorDomain::NotImplemented);
        for (name, kind) in DISPATCH {
            assert_eq!(kind.class_name(), *name);
        }
    }

    #[test]
    fn definitions_round_trip_through_dispatch() {
        let set = sample_set();
        let defs: Vec<QuestionDefinition> = set.questions.iter().map(Question::to_definition).collect();
        let rebuilt = QuestionSet::from_definitions(&defs).unwrap();
        assert_eq!(rebuilt, set);
    }

    #[test]
    fn malformed_definition_is_interaction() {
        let def = QuestionDefinition {
            class_name: "assKprimChoiceGUI".into(),
            body: serde_json::json!({"title": "K"}),
        };
        let err = Question::from_definition(&def).unwrap_err();
        assert_eq!(err.domain, crate::error::ErrorDomain::Interaction);
    }

    #[test]
    fn duplicate_titles_rejected() {
        let set = QuestionSet::new(vec![
            Question::Paint(Paint::sample("Same")),
            Question::Code(Code::sample("Same")),
        ]);
        let err = set.validate().unwrap_err();
        assert_eq!(err.domain, crate::error::ErrorDomain::Interaction);
        assert!(err.message.contains("duplicate question title"));
    }

    #[test]
    fn unknown_version_rejected() {
        let mut set = sample_set();
        set.version = 9;
        assert!(set.validate().is_err());
        let json = serde_json::to_value(sample_set()).unwrap();
        assert_eq!(json["version"], 1);
        assert_eq!(json["questions"][0]["kind"], "single_choice");
    }

    #[test]
    fn every_variant_agrees_with_itself() {
        for question in sample_set().questions {
            assert_agreement(&question, 60);
        }
    }

    #[test]
    fn manual_kinds() {
        let set = sample_set();
        let manual: Vec<&str> = set
            .questions
            .iter()
            .filter(|q| q.can_score_manually())
            .map(Question::title)
            .collect();
        assert_eq!(manual, vec!["Essay", "Paint", "Code"]);
    }

    #[test]
    fn readjustment_keeps_positive_maximum() {
        let mut set = sample_set();
        let mut ctx = regression_ctx(5);
        for _ in 0..30 {
            for q in set.questions.iter_mut() {
                q.readjust_scores(&mut ctx, &mut |_: &str| {});
                if !matches!(q.kind(), QuestionKind::Paint) {
                    assert!(q.maximum_score().is_positive(), "{}", q.title());
                }
                assert!(q.validate().is_ok());
            }
        }
    }
}
