//! Single choice, multiple choice and KPrim questions.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{
    check_unique, dim, flag, is_flag_set, quarter_delta, CoverageMode, Dimensions,
    GeneratedAnswer, Readjustment, Variant,
};
use crate::context::Context;
use crate::coverage::Coverage;
use crate::decimal::Score;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScChoice {
    pub label: String,
    pub points: Score,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SingleChoice {
    pub title: String,
    pub choices: Vec<ScChoice>,
}

impl SingleChoice {
    pub fn sample(title: &str) -> Self {
        Self {
            title: title.to_string(),
            choices: vec![
                ScChoice { label: "Paris".into(), points: Score::from_int(2) },
                ScChoice { label: "Lyon".into(), points: Score::ZERO },
                ScChoice { label: "Nice".into(), points: Score::from_quarters(1) },
            ],
        }
    }

    fn score_by_index(&self, index: usize) -> Score {
        self.choices.get(index).map(|c| c.points).unwrap_or(Score::ZERO)
    }
}

impl Variant for SingleChoice {
    fn title(&self) -> &str {
        &self.title
    }

    fn validate(&self) -> Result<(), String> {
        if self.choices.is_empty() {
            return Err("no choices".to_string());
        }
        check_unique(self.choices.iter().map(|c| c.label.as_str()), "choice")
    }

    fn random_answer(&self, ctx: &mut Context) -> GeneratedAnswer {
        let index = ctx.randint(0, self.choices.len() as i64 - 1) as usize;
        let dimensions = self
            .choices
            .iter()
            .enumerate()
            .map(|(i, c)| (dim(&c.label), flag(i == index)))
            .collect();
        GeneratedAnswer {
            dimensions,
            score: self.score_by_index(index),
            valid: true,
        }
    }

    fn compute_score(&self, dimensions: &Dimensions, _ctx: &Context) -> Score {
        self.choices
            .iter()
            .filter(|c| is_flag_set(dimensions, &c.label))
            .map(|c| c.points)
            .sum()
    }

    fn maximum_score(&self) -> Score {
        self.choices
            .iter()
            .map(|c| c.points)
            .max()
            .unwrap_or(Score::ZERO)
    }

    fn readjust_scores(&mut self, ctx: &mut Context, report: &mut dyn FnMut(&str)) -> Readjustment {
        let old: Vec<Score> = self.choices.iter().map(|c| c.points).collect();
        let new = loop {
            let new: Vec<Score> = old
                .iter()
                .map(|p| (*p + quarter_delta(ctx, -8, 8)).clip_at_zero())
                .collect();
            if new.iter().any(|p| p.is_positive()) {
                break new;
            }
        };
        for (choice, points) in self.choices.iter_mut().zip(new) {
            report(&format!("readjusted \"{}\" from {} to {}.", choice.label, choice.points, points));
            choice.points = points;
        }
        Readjustment::changed()
    }

    fn initialize_coverage(&self, coverage: &mut Coverage, _ctx: &Context) {
        for mode in CoverageMode::BOTH {
            for choice in &self.choices {
                coverage.add_case(&self.title, [mode.name(), choice.label.as_str()]);
            }
        }
    }

    fn add_coverage(
        &self,
        coverage: &mut Coverage,
        mode: CoverageMode,
        dimensions: &Dimensions,
        _ctx: &Context,
    ) {
        if let Some(choice) = self
            .choices
            .iter()
            .find(|c| is_flag_set(dimensions, &c.label))
        {
            coverage.case_occurred(&self.title, [mode.name(), choice.label.as_str()]);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McChoice {
    pub label: String,
    pub checked: Score,
    pub unchecked: Score,
}

impl McChoice {
    fn best(&self) -> Score {
        self.checked.max(self.unchecked)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultipleChoice {
    pub title: String,
    pub choices: Vec<McChoice>,
}

impl MultipleChoice {
    pub fn sample(title: &str) -> Self {
        let choice = |label: &str, checked: i64, unchecked: i64| McChoice {
            label: label.to_string(),
            checked: Score::from_quarters(checked),
            unchecked: Score::from_quarters(unchecked),
        };
        Self {
            title: title.to_string(),
            choices: vec![
                choice("2 is prime", 4, 0),
                choice("9 is prime", -2, 2),
                choice("11 is prime", 6, -1),
            ],
        }
    }

    fn score_by_flags(&self, checked: &[bool]) -> Score {
        self.choices
            .iter()
            .zip(checked)
            .map(|(c, on)| if *on { c.checked } else { c.unchecked })
            .sum()
    }
}

impl Variant for MultipleChoice {
    fn title(&self) -> &str {
        &self.title
    }

    fn validate(&self) -> Result<(), String> {
        if self.choices.is_empty() {
            return Err("no choices".to_string());
        }
        check_unique(self.choices.iter().map(|c| c.label.as_str()), "choice")
    }

    fn random_answer(&self, ctx: &mut Context) -> GeneratedAnswer {
        let mut checked: Vec<Option<bool>> = vec![None; self.choices.len()];
        if ctx.workarounds.disallow_empty_answers {
            let forced = ctx.randint(0, self.choices.len() as i64 - 1) as usize;
            checked[forced] = Some(true);
        }
        let checked: Vec<bool> = checked
            .into_iter()
            .map(|c| c.unwrap_or_else(|| ctx.chance(0.5)))
            .collect();
        let dimensions = self
            .choices
            .iter()
            .zip(&checked)
            .map(|(c, on)| (dim(&c.label), flag(*on)))
            .collect();
        GeneratedAnswer {
            dimensions,
            score: self.score_by_flags(&checked),
            valid: true,
        }
    }

    fn compute_score(&self, dimensions: &Dimensions, _ctx: &Context) -> Score {
        let checked: Vec<bool> = self
            .choices
            .iter()
            .map(|c| is_flag_set(dimensions, &c.label))
            .collect();
        self.score_by_flags(&checked)
    }

    fn maximum_score(&self) -> Score {
        self.choices.iter().map(McChoice::best).sum()
    }

    fn readjust_scores(&mut self, ctx: &mut Context, report: &mut dyn FnMut(&str)) -> Readjustment {
        let new = loop {
            let new: Vec<McChoice> = self
                .choices
                .iter()
                .map(|c| McChoice {
                    label: c.label.clone(),
                    checked: (c.checked + quarter_delta(ctx, -8, 8)).clip_at_zero(),
                    unchecked: (c.unchecked + quarter_delta(ctx, -8, 8)).clip_at_zero(),
                })
                .collect();
            let maximum: Score = new.iter().map(McChoice::best).sum();
            if maximum.is_positive() {
                break new;
            }
        };
        for (old, new) in self.choices.iter().zip(&new) {
            report(&format!(
                "readjusted \"{}\" from ({}, {}) to ({}, {}).",
                old.label, old.checked, old.unchecked, new.checked, new.unchecked
            ));
        }
        self.choices = new;
        Readjustment::changed()
    }

    fn initialize_coverage(&self, coverage: &mut Coverage, ctx: &Context) {
        let labels: Vec<&str> = self.choices.iter().map(|c| c.label.as_str()).collect();
        add_combination_cases(coverage, &self.title, &labels, ctx.workarounds.disallow_empty_answers);
    }

    fn add_coverage(
        &self,
        coverage: &mut Coverage,
        mode: CoverageMode,
        dimensions: &Dimensions,
        _ctx: &Context,
    ) {
        let labels: Vec<&str> = self.choices.iter().map(|c| c.label.as_str()).collect();
        combination_occurred(coverage, &self.title, mode, &labels, dimensions);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KprimStatement {
    pub label: String,
    pub correct: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Kprim {
    pub title: String,
    pub statements: Vec<KprimStatement>,
    pub points: Score,
    #[serde(default)]
    pub halfpoints: bool,
}

impl Kprim {
    pub const STATEMENTS: usize = 4;

    pub fn sample(title: &str) -> Self {
        let statement = |label: &str, correct: bool| KprimStatement {
            label: label.to_string(),
            correct,
        };
        Self {
            title: title.to_string(),
            statements: vec![
                statement("Rust has a borrow checker", true),
                statement("Rust has a garbage collector", false),
                statement("Traits can have default methods", true),
                statement("Enums cannot carry data", false),
            ],
            points: Score::from_int(2),
            halfpoints: true,
        }
    }

    fn score_by_correct(&self, correct: usize) -> Score {
        if self.halfpoints {
            match correct {
                4 => self.points,
                3 => self.points.scaled(1, 2),
                _ => Score::ZERO,
            }
        } else {
            self.points.scaled(correct as i64, Self::STATEMENTS as i64)
        }
    }
}

impl Variant for Kprim {
    fn title(&self) -> &str {
        &self.title
    }

    fn validate(&self) -> Result<(), String> {
        if self.statements.len() != Self::STATEMENTS {
            return Err(format!(
                "expected {} statements, got {}",
                Self::STATEMENTS,
                self.statements.len()
            ));
        }
        check_unique(self.statements.iter().map(|s| s.label.as_str()), "statement")
    }

    fn random_answer(&self, ctx: &mut Context) -> GeneratedAnswer {
        let judged: Vec<bool> = self.statements.iter().map(|_| ctx.chance(0.5)).collect();
        let correct = self
            .statements
            .iter()
            .zip(&judged)
            .filter(|(s, j)| s.correct == **j)
            .count();
        let dimensions = self
            .statements
            .iter()
            .zip(&judged)
            .map(|(s, j)| (dim(&s.label), flag(*j)))
            .collect();
        GeneratedAnswer {
            dimensions,
            score: self.score_by_correct(correct),
            valid: true,
        }
    }

    fn compute_score(&self, dimensions: &Dimensions, _ctx: &Context) -> Score {
        let correct = self
            .statements
            .iter()
            .filter(|s| is_flag_set(dimensions, &s.label) == s.correct)
            .count();
        self.score_by_correct(correct)
    }

    fn maximum_score(&self) -> Score {
        self.points
    }

    fn readjust_scores(&mut self, ctx: &mut Context, report: &mut dyn FnMut(&str)) -> Readjustment {
        if ctx.workarounds.dont_readjust_kprim {
            report("kprim readjustment is disabled.");
            return Readjustment::unchanged();
        }
        let flip = |ctx: &mut Context, f: bool| if ctx.randint(0, 3) == 0 { !f } else { f };

        for statement in self.statements.iter_mut() {
            let correct = flip(ctx, statement.correct);
            report(&format!(
                "readjusted \"{}\" from {} to {}.",
                statement.label, statement.correct, correct
            ));
            statement.correct = correct;
        }
        let halfpoints = flip(ctx, self.halfpoints);
        report(&format!("readjusted halfpoints from {} to {halfpoints}.", self.halfpoints));
        self.halfpoints = halfpoints;

        let points = Score::from_quarters(ctx.randint(1, 8));
        report(&format!("readjusted score from {} to {points}.", self.points));
        self.points = points;
        Readjustment::changed()
    }

    fn initialize_coverage(&self, coverage: &mut Coverage, _ctx: &Context) {
        let labels: Vec<&str> = self.statements.iter().map(|s| s.label.as_str()).collect();
        add_combination_cases(coverage, &self.title, &labels, true);
    }

    fn add_coverage(
        &self,
        coverage: &mut Coverage,
        mode: CoverageMode,
        dimensions: &Dimensions,
        _ctx: &Context,
    ) {
        let labels: Vec<&str> = self.statements.iter().map(|s| s.label.as_str()).collect();
        combination_occurred(coverage, &self.title, mode, &labels, dimensions);
    }
}

/// Canonical JSON of one checked/unchecked combination.
fn combination_json(labels: &[&str], checked: impl Fn(usize) -> bool) -> String {
    let map: BTreeMap<&str, u8> = labels
        .iter()
        .enumerate()
        .map(|(i, label)| (*label, u8::from(checked(i))))
        .collect();
    serde_json::to_string(&map).unwrap_or_default()
}

/// One case per combination, skipping the all-unchecked one unless
/// `include_empty`.
fn add_combination_cases(coverage: &mut Coverage, title: &str, labels: &[&str], include_empty: bool) {
    let n = labels.len().min(16);
    for bits in 0u32..(1 << n) {
        if bits == 0 && !include_empty {
            continue;
        }
        let json = combination_json(&labels[..n], |i| bits & (1 << i) != 0);
        for mode in CoverageMode::BOTH {
            coverage.add_case(title, [mode.name(), json.as_str()]);
        }
    }
}

fn combination_occurred(
    coverage: &mut Coverage,
    title: &str,
    mode: CoverageMode,
    labels: &[&str],
    dimensions: &Dimensions,
) {
    let json = combination_json(labels, |i| is_flag_set(dimensions, labels[i]));
    coverage.case_occurred(title, [mode.name(), json.as_str()]);
}

#[cfg(test)]
mod tests {
    use super::super::tests::{fuzz_ctx, regression_ctx};
    use super::*;
    use crate::settings::Workarounds;

    fn answer(pairs: &[(&str, &str)]) -> Dimensions {
        pairs.iter().map(|(k, v)| (dim(*k), v.to_string())).collect()
    }

    #[test]
    fn single_choice_scores_chosen_option() {
        let q = SingleChoice::sample("SC");
        let ctx = regression_ctx(1);
        let dims = answer(&[("Paris", "0"), ("Lyon", "0"), ("Nice", "1")]);
        assert_eq!(q.compute_score(&dims, &ctx), Score::from_quarters(1));
        assert_eq!(q.maximum_score(), Score::from_int(2));
    }

    #[test]
    fn single_choice_readjust_keeps_positive_option() {
        let mut q = SingleChoice::sample("SC");
        let mut ctx = regression_ctx(3);
        let mut lines = Vec::new();
        for _ in 0..50 {
            let r = q.readjust_scores(&mut ctx, &mut |l: &str| lines.push(l.to_string()));
            assert!(r.changed);
            assert!(q.choices.iter().all(|c| c.points >= Score::ZERO));
            assert!(q.maximum_score().is_positive());
            for c in &q.choices {
                assert_eq!(c.points.units() % Score::from_quarters(1).units(), 0);
            }
        }
        assert_eq!(lines.len(), 150);
    }

    #[test]
    fn multiple_choice_sums_checked_and_unchecked() {
        let q = MultipleChoice::sample("MC");
        let ctx = regression_ctx(1);
        let dims = answer(&[("2 is prime", "1"), ("9 is prime", "1"), ("11 is prime", "0")]);
        // 1 - 0.5 - 0.25
        assert_eq!(q.compute_score(&dims, &ctx), Score::from_quarters(1));
        assert_eq!(q.maximum_score(), Score::from_quarters(4 + 2 + 6));
    }

    #[test]
    fn multiple_choice_never_empty_when_disallowed() {
        let q = MultipleChoice::sample("MC");
        let mut ctx = fuzz_ctx(Workarounds {
            disallow_empty_answers: true,
            ..Workarounds::default()
        });
        for _ in 0..100 {
            let a = q.random_answer(&mut ctx);
            assert!(a.dimensions.values().any(|v| v == "1"));
        }
    }

    #[test]
    fn multiple_choice_coverage_cases() {
        let q = MultipleChoice::sample("MC");
        let ctx = regression_ctx(1);
        let mut c = Coverage::new();
        q.initialize_coverage(&mut c, &ctx);
        // 2^3 - 1 combinations per mode
        assert_eq!(c.cases().count(), 14);
        let dims = answer(&[("2 is prime", "1"), ("9 is prime", "0"), ("11 is prime", "0")]);
        q.add_coverage(&mut c, CoverageMode::Export, &dims, &ctx);
        assert!(c.percentage() > 0.0);
        let expected = r#"{"11 is prime":0,"2 is prime":1,"9 is prime":0}"#;
        assert!(c
            .occurrences()
            .any(|o| o[1] == "export" && o[2] == expected));
    }

    #[test]
    fn kprim_halfpoints() {
        let q = Kprim::sample("KP");
        let ctx = regression_ctx(1);
        let all_right = answer(&[
            ("Rust has a borrow checker", "1"),
            ("Rust has a garbage collector", "0"),
            ("Traits can have default methods", "1"),
            ("Enums cannot carry data", "0"),
        ]);
        assert_eq!(q.compute_score(&all_right, &ctx), Score::from_int(2));

        let mut three = all_right.clone();
        three.insert(dim("Enums cannot carry data"), "1".into());
        assert_eq!(q.compute_score(&three, &ctx), Score::from_int(1));

        let mut two = three.clone();
        two.insert(dim("Traits can have default methods"), "0".into());
        assert_eq!(q.compute_score(&two, &ctx), Score::ZERO);
    }

    #[test]
    fn kprim_without_halfpoints_counts_quarters() {
        let mut q = Kprim::sample("KP");
        q.halfpoints = false;
        assert_eq!(q.score_by_correct(4), Score::from_int(2));
        assert_eq!(q.score_by_correct(3), Score::from_quarters(6));
        assert_eq!(q.score_by_correct(1), Score::from_quarters(2));
        assert_eq!(q.score_by_correct(0), Score::ZERO);
    }

    #[test]
    fn kprim_readjust_respects_workaround() {
        let mut q = Kprim::sample("KP");
        let before = q.clone();
        let mut ctx = fuzz_ctx(Workarounds {
            dont_readjust_kprim: true,
            ..Workarounds::default()
        });
        assert!(!q.readjust_scores(&mut ctx, &mut |_: &str| {}).changed);
        assert_eq!(q, before);

        let mut ctx = regression_ctx(9);
        for _ in 0..20 {
            assert!(q.readjust_scores(&mut ctx, &mut |_: &str| {}).changed);
            assert!(q.points >= Score::from_quarters(1) && q.points <= Score::from_int(2));
        }
    }

    #[test]
    fn kprim_covers_all_sixteen() {
        let q = Kprim::sample("KP");
        let mut c = Coverage::new();
        q.initialize_coverage(&mut c, &regression_ctx(0));
        assert_eq!(c.cases().count(), 32);
    }
}
