//! Manually scored questions: long text, code and paint.

use serde::{Deserialize, Serialize};

use super::{dim, CoverageMode, Dimensions, GeneratedAnswer, Readjustment, Variant};
use crate::context::{Alphabet, Context};
use crate::coverage::Coverage;
use crate::decimal::Score;

const STROKE: &str = "Stroke";

fn text_answer(ctx: &mut Context) -> GeneratedAnswer {
    let text = ctx.produce_text(ctx.settings.max_long_text_length, Alphabet::LongText, true);
    GeneratedAnswer {
        dimensions: [(dim(ctx.language.answer_name()), text)].into_iter().collect(),
        score: Score::ZERO,
        valid: true,
    }
}

fn readjust_maximum(maximum: &mut Score, ctx: &mut Context, report: &mut dyn FnMut(&str)) -> Readjustment {
    let new = Score::from_tenths(ctx.randint(1, 100));
    report(&format!("readjusted maximum score from {maximum} to {new}."));
    *maximum = new;
    Readjustment::changed()
}

fn init_text_coverage(title: &str, coverage: &mut Coverage, ctx: &Context) {
    for mode in CoverageMode::BOTH {
        coverage.add_text_cases(
            title,
            &[mode.name()],
            ctx.settings.max_long_text_length,
            ctx.alphabet(Alphabet::LongText),
            !ctx.workarounds.disallow_empty_answers,
        );
    }
}

fn text_occurred(title: &str, coverage: &mut Coverage, mode: CoverageMode, dimensions: &Dimensions, ctx: &Context) {
    if let Some(text) = dimensions.get(&dim(ctx.language.answer_name())) {
        coverage.text_occurred(title, &[mode.name()], text);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LongText {
    pub title: String,
    pub maximum: Score,
}

impl LongText {
    pub fn sample(title: &str) -> Self {
        Self {
            title: title.to_string(),
            maximum: Score::from_int(5),
        }
    }
}

impl Variant for LongText {
    fn title(&self) -> &str {
        &self.title
    }

    fn validate(&self) -> Result<(), String> {
        Ok(())
    }

    fn random_answer(&self, ctx: &mut Context) -> GeneratedAnswer {
        text_answer(ctx)
    }

    fn compute_score(&self, _dimensions: &Dimensions, _ctx: &Context) -> Score {
        Score::ZERO
    }

    fn maximum_score(&self) -> Score {
        self.maximum
    }

    fn readjust_scores(&mut self, ctx: &mut Context, report: &mut dyn FnMut(&str)) -> Readjustment {
        readjust_maximum(&mut self.maximum, ctx, report)
    }

    fn initialize_coverage(&self, coverage: &mut Coverage, ctx: &Context) {
        init_text_coverage(&self.title, coverage, ctx)
    }

    fn add_coverage(&self, coverage: &mut Coverage, mode: CoverageMode, dimensions: &Dimensions, ctx: &Context) {
        text_occurred(&self.title, coverage, mode, dimensions, ctx)
    }

    fn can_score_manually(&self) -> bool {
        true
    }

    fn set_maximum_score(&mut self, maximum: Score) {
        self.maximum = maximum;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Code {
    pub title: String,
    pub maximum: Score,
}

impl Code {
    pub fn sample(title: &str) -> Self {
        Self {
            title: title.to_string(),
            maximum: Score::from_int(3),
        }
    }
}

impl Variant for Code {
    fn title(&self) -> &str {
        &self.title
    }

    fn validate(&self) -> Result<(), String> {
        Ok(())
    }

    fn random_answer(&self, ctx: &mut Context) -> GeneratedAnswer {
        text_answer(ctx)
    }

    fn compute_score(&self, _dimensions: &Dimensions, _ctx: &Context) -> Score {
        Score::ZERO
    }

    fn maximum_score(&self) -> Score {
        self.maximum
    }

    fn readjust_scores(&mut self, ctx: &mut Context, report: &mut dyn FnMut(&str)) -> Readjustment {
        readjust_maximum(&mut self.maximum, ctx, report)
    }

    fn initialize_coverage(&self, coverage: &mut Coverage, ctx: &Context) {
        init_text_coverage(&self.title, coverage, ctx)
    }

    fn add_coverage(&self, coverage: &mut Coverage, mode: CoverageMode, dimensions: &Dimensions, ctx: &Context) {
        text_occurred(&self.title, coverage, mode, dimensions, ctx)
    }

    fn can_score_manually(&self) -> bool {
        true
    }

    fn set_maximum_score(&mut self, maximum: Score) {
        self.maximum = maximum;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paint {
    pub title: String,
    pub maximum: Score,
}

impl Paint {
    pub fn sample(title: &str) -> Self {
        Self {
            title: title.to_string(),
            maximum: Score::from_int(4),
        }
    }
}

impl Variant for Paint {
    fn title(&self) -> &str {
        &self.title
    }

    fn validate(&self) -> Result<(), String> {
        Ok(())
    }

    fn random_answer(&self, ctx: &mut Context) -> GeneratedAnswer {
        let stroke = ctx.randint(1, 255);
        GeneratedAnswer {
            dimensions: [(dim(STROKE), stroke.to_string())].into_iter().collect(),
            score: Score::ZERO,
            valid: true,
        }
    }

    fn compute_score(&self, _dimensions: &Dimensions, _ctx: &Context) -> Score {
        Score::ZERO
    }

    fn maximum_score(&self) -> Score {
        self.maximum
    }

    fn readjust_scores(&mut self, _ctx: &mut Context, _report: &mut dyn FnMut(&str)) -> Readjustment {
        Readjustment::unchanged()
    }

    fn initialize_coverage(&self, _coverage: &mut Coverage, _ctx: &Context) {}

    fn add_coverage(&self, _: &mut Coverage, _: CoverageMode, _: &Dimensions, _: &Context) {}

    fn can_score_manually(&self) -> bool {
        true
    }

    fn set_maximum_score(&mut self, maximum: Score) {
        self.maximum = maximum;
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::regression_ctx;
    use super::*;

    #[test]
    fn long_text_answers_fit() {
        let q = LongText::sample("Essay");
        let mut ctx = regression_ctx(1);
        for _ in 0..50 {
            let a = q.random_answer(&mut ctx);
            let text = &a.dimensions[&dim("Answer")];
            assert!(text.chars().count() <= 20 + 3, "{text:?}");
            assert_eq!(a.score, Score::ZERO);
        }
    }

    #[test]
    fn readjusted_maximum_in_tenths() {
        let mut q = Code::sample("Code");
        let mut ctx = regression_ctx(8);
        for _ in 0..30 {
            q.readjust_scores(&mut ctx, &mut |_: &str| {});
            assert!(q.maximum >= Score::from_tenths(1) && q.maximum <= Score::from_int(10));
        }
    }

    #[test]
    fn paint_strokes_in_range() {
        let q = Paint::sample("P");
        let mut ctx = regression_ctx(1);
        for _ in 0..100 {
            let a = q.random_answer(&mut ctx);
            let n: i64 = a.dimensions[&dim("Stroke")].parse().unwrap();
            assert!((1..=255).contains(&n));
        }
        let mut q = q;
        assert!(!q.readjust_scores(&mut ctx, &mut |_: &str| {}).changed);
    }

    #[test]
    fn text_coverage_uses_answer_dimension() {
        let q = LongText::sample("Essay");
        let ctx = regression_ctx(1);
        let mut c = Coverage::new();
        q.initialize_coverage(&mut c, &ctx);
        let dims: Dimensions = [(dim("Answer"), "ab".to_string())].into_iter().collect();
        q.add_coverage(&mut c, CoverageMode::Export, &dims, &ctx);
        assert!(c.percentage() > 0.0);
    }
}
