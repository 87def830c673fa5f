//! Expected score keys of a result.
//!
//! Workers build their expected result from the answers they gave, the
//! master recomputes the same keys after readjustments and manual scoring,
//! and the simulated server derives its exports from them. All three go
//! through [`apply_scores`], so a difference between two channels is always
//! a difference in data, never in arithmetic.

use std::collections::BTreeMap;

use crate::context::Context;
use crate::decimal::{format_percentage, format_score, score_percentage, Score};
use crate::exam::ExamConfiguration;
use crate::question::{Dimensions, QuestionSet};
use crate::result::{key, ExamResult, Key, KeyError};
use crate::settings::Workarounds;

/// Raw per-question scores by title.
pub type QuestionScores = BTreeMap<String, Score>;

fn set(result: &mut ExamResult, key: Key, value: String) -> Result<(), KeyError> {
    if result.get(&key).is_some() {
        result.update(&key, value)
    } else {
        result.add(key, value)
    }
}

/// Add `("question", title, "answer", dim...)` entries.
pub fn add_answer_keys(
    result: &mut ExamResult,
    title: &str,
    dimensions: &Dimensions,
) -> Result<(), KeyError> {
    for (dim, value) in dimensions {
        let k: Key = ["question", title, "answer"]
            .into_iter()
            .map(String::from)
            .chain(dim.iter().cloned())
            .collect();
        set(result, k, value.clone())?;
    }
    Ok(())
}

/// Remove answer dimensions that no longer exist.
pub fn remove_answer_keys(result: &mut ExamResult, title: &str, dimensions: &[Vec<String>]) {
    for dim in dimensions {
        let k: Key = ["question", title, "answer"]
            .into_iter()
            .map(String::from)
            .chain(dim.iter().cloned())
            .collect();
        result.remove(&k);
    }
}

/// Per-question keys plus the totals of every channel.
///
/// Question scores are clipped per `score_cutting`; the total is always
/// clipped at zero. Questions without a score count as zero.
pub fn apply_scores(
    result: &mut ExamResult,
    questions: &QuestionSet,
    scores: &QuestionScores,
    config: &ExamConfiguration,
    workarounds: &Workarounds,
) -> Result<(), KeyError> {
    let mut total = Score::ZERO;
    for question in &questions.questions {
        let raw = scores.get(question.title()).copied().unwrap_or(Score::ZERO);
        let reached = config.clip_answer_score(raw);
        total += reached;
        for k in ExamResult::reached_score_keys(question.title()) {
            set(result, k, format_score(reached))?;
        }
        for k in ExamResult::maximum_score_keys(question.title()) {
            set(result, k, format_score(question.maximum_score()))?;
        }
    }
    propagate_totals(result, total.clip_at_zero(), questions.maximum_score(), config, workarounds)
}

/// Write maximum, reached, percentage and mark to xls and both tabs.
pub fn propagate_totals(
    result: &mut ExamResult,
    reached: Score,
    maximum: Score,
    config: &ExamConfiguration,
    workarounds: &Workarounds,
) -> Result<(), KeyError> {
    let percentage = score_percentage(reached, maximum);
    let mark = config.marks.short_label(percentage);

    set(result, key(["xls", "score_maximum"]), format_score(maximum))?;
    set(result, key(["xls", "score_reached"]), format_score(reached))?;
    set(result, key(["xls", "short_mark"]), mark.clone())?;

    let mut tabs = vec!["statistics_tab"];
    if !workarounds.ignore_wrong_results_in_results_tab {
        tabs.push("results_tab");
    }
    for tab in tabs {
        set(result, key([tab, "score_maximum"]), format_score(maximum))?;
        set(result, key([tab, "score_reached"]), format_score(reached))?;
        set(result, key([tab, "percentage_reached"]), format_percentage(percentage))?;
        set(result, key([tab, "short_mark"]), mark.clone())?;
    }
    Ok(())
}

/// Scores as the questions compute them from the result's stored answers.
///
/// Manually scored questions keep the reached score already in the result.
pub fn current_scores(result: &ExamResult, questions: &QuestionSet, ctx: &Context) -> QuestionScores {
    let answers = result.answers();
    let empty = Dimensions::new();
    questions
        .questions
        .iter()
        .map(|q| {
            let score = if q.can_score_manually() {
                ExamResult::reached_score_keys(q.title())
                    .first()
                    .and_then(|k| result.get(k))
                    .and_then(Score::parse)
                    .unwrap_or(Score::ZERO)
            } else {
                q.compute_score(answers.get(q.title()).unwrap_or(&empty), ctx)
            };
            (q.title().to_string(), score)
        })
        .collect()
}

/// Recompute every score key from the result's stored answers.
pub fn recompute(
    result: &mut ExamResult,
    questions: &QuestionSet,
    config: &ExamConfiguration,
    ctx: &Context,
) -> Result<(), KeyError> {
    let scores = current_scores(result, questions, ctx);
    apply_scores(result, questions, &scores, config, &ctx.workarounds)
}

/// The full expected result of one participant.
pub fn build_expected(
    origin: crate::result::Origin,
    answers: &BTreeMap<String, Dimensions>,
    questions: &QuestionSet,
    config: &ExamConfiguration,
    ctx: &Context,
) -> Result<ExamResult, KeyError> {
    let mut result = ExamResult::new(origin);
    let mut scores = QuestionScores::new();
    for question in &questions.questions {
        if let Some(dims) = answers.get(question.title()) {
            add_answer_keys(&mut result, question.title(), dims)?;
            scores.insert(question.title().to_string(), question.compute_score(dims, ctx));
        }
    }
    apply_scores(&mut result, questions, &scores, config, &ctx.workarounds)?;
    Ok(result)
}
