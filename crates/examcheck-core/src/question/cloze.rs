//! Cloze questions with text, select and numeric gaps.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use super::{dim, CoverageMode, Dimensions, GeneratedAnswer, Readjustment, Variant};
use crate::context::{Alphabet, Context};
use crate::coverage::Coverage;
use crate::decimal::Score;
use crate::implicit::{format_g16, numeric_answer_value};

/// Fake numbers outside a numeric range reach up to this decimal scale.
const OUTSIDE_SCALE: i32 = 14;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparator {
    #[serde(rename = "ci")]
    #[default]
    IgnoreCase,
    #[serde(rename = "cs")]
    CaseSensitive,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClozeGap {
    Text {
        options: BTreeMap<String, Score>,
        #[serde(default)]
        size: Option<usize>,
    },
    Select {
        options: BTreeMap<String, Score>,
    },
    Numeric {
        value: String,
        lower: String,
        upper: String,
        points: Score,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum GapType {
    Text,
    Select,
    Numeric,
}

fn casefold(s: &str) -> String {
    s.to_lowercase()
}

fn swapcase(c: char) -> String {
    if c.is_lowercase() {
        c.to_uppercase().collect()
    } else if c.is_uppercase() {
        c.to_lowercase().collect()
    } else {
        c.to_string()
    }
}

impl ClozeGap {
    fn gap_type(&self) -> GapType {
        match self {
            ClozeGap::Text { .. } => GapType::Text,
            ClozeGap::Select { .. } => GapType::Select,
            ClozeGap::Numeric { .. } => GapType::Numeric,
        }
    }

    fn bounds(lower: &str, upper: &str) -> (f64, f64) {
        (
            lower.trim().parse().unwrap_or(0.0),
            upper.trim().parse().unwrap_or(0.0),
        )
    }

    fn validate(&self) -> Result<(), String> {
        match self {
            ClozeGap::Text { options, .. } | ClozeGap::Select { options } => {
                if options.is_empty() {
                    return Err("gap without options".to_string());
                }
                super::check_unique(options.keys().map(String::as_str), "gap option")
            }
            ClozeGap::Numeric {
                value,
                lower,
                upper,
                ..
            } => {
                for x in [value, lower, upper] {
                    if x.trim().parse::<f64>().is_err() {
                        return Err(format!("invalid numeric gap bound '{x}'"));
                    }
                }
                let (lo, hi) = Self::bounds(lower, upper);
                if lo > hi {
                    return Err(format!("numeric gap range {lower}..{upper} is empty"));
                }
                Ok(())
            }
        }
    }

    pub fn maximum_score(&self) -> Score {
        match self {
            ClozeGap::Text { options, .. } | ClozeGap::Select { options } => {
                options.values().copied().max().unwrap_or(Score::ZERO)
            }
            ClozeGap::Numeric { points, .. } => *points,
        }
    }

    pub fn score(&self, text: &str, comparator: Comparator) -> Score {
        match self {
            ClozeGap::Text { options, .. } => match comparator {
                Comparator::CaseSensitive => options.get(text).copied().unwrap_or(Score::ZERO),
                Comparator::IgnoreCase => {
                    let folded = casefold(text);
                    options
                        .iter()
                        .find(|(option, _)| casefold(option) == folded)
                        .map(|(_, points)| *points)
                        .unwrap_or(Score::ZERO)
                }
            },
            ClozeGap::Select { options } => options.get(text).copied().unwrap_or(Score::ZERO),
            ClozeGap::Numeric {
                lower,
                upper,
                points,
                ..
            } => {
                let (lo, hi) = Self::bounds(lower, upper);
                match numeric_answer_value(text) {
                    Some(n) if lo <= n && n <= hi => *points,
                    _ => Score::ZERO,
                }
            }
        }
    }

    pub fn is_valid_answer(&self, value: &str) -> bool {
        match self {
            ClozeGap::Text { size: None, .. } => true,
            ClozeGap::Text { size: Some(size), .. } => value.chars().count() <= *size,
            ClozeGap::Select { options } => options.contains_key(value),
            ClozeGap::Numeric { .. } => {
                let value = value.trim();
                value.is_empty() || value.parse::<f64>().is_ok()
            }
        }
    }

    fn entry_size(size: Option<usize>, ctx: &Context) -> usize {
        size.unwrap_or(ctx.settings.max_cloze_text_length)
    }

    fn random_value(&self, ctx: &mut Context) -> String {
        match self {
            ClozeGap::Text { options, size } => {
                if ctx.chance(ctx.settings.cloze_text_enter_scored_p) && !ctx.prefer_text() {
                    let keys: Vec<&String> = options.keys().collect();
                    let text = ctx.choose(&keys).map(|s| s.to_string()).unwrap_or_default();
                    modify_solution(&text, ctx)
                } else if ctx.chance(ctx.settings.cloze_text_enter_random_number_p) {
                    let digits = ctx.randint(0, 2) as usize;
                    let x = ctx.random() * 1000.0;
                    format!("{x:.digits$}")
                } else {
                    let n = Self::entry_size(*size, ctx);
                    ctx.produce_text(n, Alphabet::Cloze, true)
                }
            }
            ClozeGap::Select { options } => {
                let keys: Vec<&String> = options.keys().collect();
                ctx.choose(&keys).map(|s| s.to_string()).unwrap_or_default()
            }
            ClozeGap::Numeric { lower, upper, .. } => {
                if !ctx.workarounds.disallow_invalid_answers
                    && ctx.chance(ctx.settings.invalid_answer_p)
                {
                    return ctx.produce_text(20, Alphabet::Cloze, false);
                }
                let (lo, hi) = Self::bounds(lower, upper);
                let n = match ctx.randint(0, 3) {
                    0 => lo,
                    1 => hi,
                    2 => lo + ctx.random() * (hi - lo),
                    _ => {
                        let d = if hi > lo { hi - lo } else { 1.0 };
                        let min = 10f64.powi(-OUTSIDE_SCALE);
                        let max = 10f64.powi(OUTSIDE_SCALE) * d;
                        let off = min + ctx.random() * (max - min);
                        if ctx.chance(0.5) {
                            lo - off
                        } else {
                            hi + off
                        }
                    }
                };
                format_g16(n)
            }
        }
    }

    fn initialize_coverage(&self, title: &str, index: usize, coverage: &mut Coverage, ctx: &Context) {
        let index = index.to_string();
        for mode in CoverageMode::BOTH {
            let prefix = [index.as_str(), mode.name()];
            match self {
                ClozeGap::Text { options, size } => {
                    coverage.add_text_cases(
                        title,
                        &prefix,
                        Self::entry_size(*size, ctx),
                        ctx.alphabet(Alphabet::Cloze),
                        !ctx.workarounds.disallow_empty_answers,
                    );
                    for option in options.keys() {
                        coverage.add_case(title, prefix.into_iter().chain(["solution", option.as_str()]));
                    }
                }
                ClozeGap::Select { options } => {
                    for option in options.keys() {
                        coverage.add_case(title, prefix.into_iter().chain([option.as_str()]));
                    }
                }
                ClozeGap::Numeric {
                    value,
                    lower,
                    upper,
                    ..
                } => {
                    for x in [value, lower, upper] {
                        coverage.add_case(title, prefix.into_iter().chain([x.as_str()]));
                    }
                }
            }
        }
    }

    fn add_coverage(&self, title: &str, index: usize, mode: CoverageMode, coverage: &mut Coverage, value: &str) {
        let index = index.to_string();
        let prefix = [index.as_str(), mode.name()];
        match self {
            ClozeGap::Text { options, .. } => {
                coverage.text_occurred(title, &prefix, value);
                if options.contains_key(value) {
                    coverage.case_occurred(title, prefix.into_iter().chain(["solution", value]));
                }
            }
            ClozeGap::Select { .. } => {
                coverage.case_occurred(title, prefix.into_iter().chain([value]));
            }
            ClozeGap::Numeric {
                value: v,
                lower,
                upper,
                ..
            } => {
                if [v, lower, upper].iter().any(|x| x.as_str() == value) {
                    coverage.case_occurred(title, prefix.into_iter().chain([value]));
                }
            }
        }
    }

    fn readjust(&self, ctx: &mut Context) -> ClozeGap {
        let mut boost = 0u32;
        loop {
            let high = 8 + 2i64.saturating_pow(boost);
            let shift = |ctx: &mut Context, s: Score| {
                (s + Score::from_quarters(ctx.randint(-8, high))).clip_at_zero()
            };
            let gap = match self {
                ClozeGap::Numeric {
                    value,
                    lower,
                    upper,
                    points,
                } => ClozeGap::Numeric {
                    value: value.clone(),
                    lower: lower.clone(),
                    upper: upper.clone(),
                    points: shift(ctx, *points),
                },
                ClozeGap::Text { options, size } => ClozeGap::Text {
                    options: options.iter().map(|(k, v)| (k.clone(), shift(ctx, *v))).collect(),
                    size: *size,
                },
                ClozeGap::Select { options } => ClozeGap::Select {
                    options: options.iter().map(|(k, v)| (k.clone(), shift(ctx, *v))).collect(),
                },
            };
            if gap.maximum_score().is_positive() {
                return gap;
            }
            boost = (boost + 1).min(30);
        }
    }

    fn describe(&self) -> Vec<String> {
        match self {
            ClozeGap::Numeric {
                value,
                lower,
                upper,
                points,
            } => vec![format!("  numeric {value} in [{lower}, {upper}]: {points}")],
            ClozeGap::Text { options, .. } | ClozeGap::Select { options } => options
                .iter()
                .map(|(k, v)| format!("  {k:?}: {v}"))
                .collect(),
        }
    }
}

/// Keep a scored option, or randomly replace or re-case some characters.
fn modify_solution(text: &str, ctx: &mut Context) -> String {
    let r = ctx.random();
    if r < 0.5 {
        return text.to_string();
    }
    let randchar = r < 0.75;
    let tokens = ctx.alphabet(Alphabet::Cloze).to_vec();
    let mut out = String::new();
    for c in text.chars() {
        if ctx.random() < 0.2 {
            if randchar {
                out.push_str(ctx.choose(&tokens).map(String::as_str).unwrap_or(""));
            } else {
                out.push_str(&swapcase(c));
            }
        } else {
            out.push(c);
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cloze {
    pub title: String,
    #[serde(default)]
    pub identical_scoring: bool,
    #[serde(default)]
    pub comparator: Comparator,
    pub gaps: Vec<ClozeGap>,
}

impl Cloze {
    pub fn sample(title: &str) -> Self {
        let options = |items: &[(&str, i64)]| -> BTreeMap<String, Score> {
            items
                .iter()
                .map(|(k, v)| (k.to_string(), Score::from_quarters(*v)))
                .collect()
        };
        Self {
            title: title.to_string(),
            identical_scoring: false,
            comparator: Comparator::IgnoreCase,
            gaps: vec![
                ClozeGap::Text {
                    options: options(&[("Berlin", 4), ("berlin ", 2)]),
                    size: Some(10),
                },
                ClozeGap::Select {
                    options: options(&[("Spree", 4), ("Rhine", 0), ("Elbe", 1)]),
                },
                ClozeGap::Numeric {
                    value: "5".into(),
                    lower: "3".into(),
                    upper: "7".into(),
                    points: Score::from_int(2),
                },
                ClozeGap::Text {
                    options: options(&[("Berlin", 3)]),
                    size: None,
                },
            ],
        }
    }

    /// Score gap values given by gap index.
    fn score_by_indices<'a>(&self, answers: impl IntoIterator<Item = (usize, &'a str)>, ctx: &Context) -> Score {
        let mut answers: Vec<(usize, &str)> = answers
            .into_iter()
            .filter(|(i, _)| *i < self.gaps.len())
            .collect();
        if self.identical_scoring {
            return answers
                .iter()
                .map(|(i, text)| self.gaps[*i].score(text, self.comparator))
                .sum();
        }
        answers.sort_by_key(|(i, _)| *i);
        let mut given = BTreeSet::new();
        let mut score = Score::ZERO;
        for (i, text) in answers {
            let comparable = if !ctx.workarounds.identical_scoring_ignores_comparator
                && self.comparator == Comparator::IgnoreCase
            {
                casefold(text)
            } else {
                text.to_string()
            };
            if !given.insert(comparable) {
                continue;
            }
            score += self.gaps[i].score(text, self.comparator);
        }
        score
    }

    fn gap_index(&self, ctx: &Context) -> HashMap<String, usize> {
        (0..self.gaps.len())
            .map(|i| (ctx.language.gap_name(i + 1), i))
            .collect()
    }

    fn indexed<'a>(&self, dimensions: &'a Dimensions, ctx: &Context) -> Vec<(usize, &'a str)> {
        let index = self.gap_index(ctx);
        dimensions
            .iter()
            .filter_map(|(key, value)| {
                let name = key.first()?;
                index.get(name).map(|i| (*i, value.as_str()))
            })
            .collect()
    }
}

impl Variant for Cloze {
    fn title(&self) -> &str {
        &self.title
    }

    fn validate(&self) -> Result<(), String> {
        if self.gaps.is_empty() {
            return Err("cloze without gaps".to_string());
        }
        for (i, gap) in self.gaps.iter().enumerate() {
            gap.validate().map_err(|e| format!("gap {}: {e}", i + 1))?;
        }
        Ok(())
    }

    fn random_answer(&self, ctx: &mut Context) -> GeneratedAnswer {
        let previous_p = ctx.settings.cloze_previous_answer_p;
        loop {
            let mut order: Vec<usize> = (0..self.gaps.len()).collect();
            ctx.shuffle(&mut order);

            let mut previous: BTreeMap<GapType, BTreeSet<String>> = BTreeMap::new();
            let mut values = vec![String::new(); self.gaps.len()];
            let mut valid = true;
            let mut all_empty = true;
            for i in order {
                let gap = &self.gaps[i];
                let seen: Vec<String> = previous
                    .get(&gap.gap_type())
                    .map(|s| s.iter().cloned().collect())
                    .unwrap_or_default();
                let mut choice = None;
                if !seen.is_empty() && ctx.chance(previous_p) {
                    choice = ctx
                        .choose(&seen)
                        .filter(|c| gap.is_valid_answer(c))
                        .cloned();
                }
                let choice = match choice {
                    Some(c) => c,
                    None => gap.random_value(ctx),
                };
                previous.entry(gap.gap_type()).or_default().insert(choice.clone());
                valid &= gap.is_valid_answer(&choice);
                all_empty &= choice.trim().is_empty();
                values[i] = choice;
            }
            if all_empty && ctx.workarounds.disallow_empty_answers {
                continue;
            }

            let score = self.score_by_indices(values.iter().map(String::as_str).enumerate(), ctx);
            let dimensions = values
                .into_iter()
                .enumerate()
                .map(|(i, v)| (dim(ctx.language.gap_name(i + 1)), v))
                .collect();
            return GeneratedAnswer {
                dimensions,
                score,
                valid,
            };
        }
    }

    fn compute_score(&self, dimensions: &Dimensions, ctx: &Context) -> Score {
        self.score_by_indices(self.indexed(dimensions, ctx), ctx)
    }

    fn maximum_score(&self) -> Score {
        self.gaps.iter().map(ClozeGap::maximum_score).sum()
    }

    fn is_valid_answer(&self, dimensions: &Dimensions, ctx: &Context) -> bool {
        self.indexed(dimensions, ctx)
            .into_iter()
            .all(|(i, value)| self.gaps[i].is_valid_answer(value))
    }

    fn readjust_scores(&mut self, ctx: &mut Context, report: &mut dyn FnMut(&str)) -> Readjustment {
        let identical_scoring = if ctx.randint(0, 3) == 0 {
            !self.identical_scoring
        } else {
            self.identical_scoring
        };
        report(&format!(
            "readjusted identical_scoring from {} to {identical_scoring}.",
            self.identical_scoring
        ));
        self.identical_scoring = identical_scoring;

        let gaps: Vec<ClozeGap> = self.gaps.iter().map(|g| g.readjust(ctx)).collect();
        for (i, (old, new)) in self.gaps.iter().zip(&gaps).enumerate() {
            report(&format!("readjusted gap {}:", i + 1));
            for (before, after) in old.describe().iter().zip(new.describe()) {
                report(&format!("{before} -> {}", after.trim_start()));
            }
        }
        self.gaps = gaps;
        Readjustment::changed()
    }

    fn initialize_coverage(&self, coverage: &mut Coverage, ctx: &Context) {
        for (i, gap) in self.gaps.iter().enumerate() {
            gap.initialize_coverage(&self.title, i, coverage, ctx);
        }
    }

    fn add_coverage(
        &self,
        coverage: &mut Coverage,
        mode: CoverageMode,
        dimensions: &Dimensions,
        ctx: &Context,
    ) {
        for (i, value) in self.indexed(dimensions, ctx) {
            self.gaps[i].add_coverage(&self.title, i, mode, coverage, value);
        }
    }

    fn comparable(&self, value: &str, ctx: &Context) -> String {
        let w = &ctx.workarounds;
        w.implicit_text_to_number(w.strip_whitespace(value))
    }

    /// Text gaps are converted when saved and again in the spreadsheet
    /// export, so `.0` is stored as `0.0` and exported as `0`.
    fn stored_dimensions(&self, dimensions: &Dimensions, ctx: &Context) -> Dimensions {
        let index = self.gap_index(ctx);
        let w = &ctx.workarounds;
        dimensions
            .iter()
            .map(|(key, value)| {
                let text_gap = key
                    .first()
                    .and_then(|name| index.get(name))
                    .is_some_and(|i| matches!(self.gaps[*i], ClozeGap::Text { .. }));
                let value = if text_gap {
                    w.implicit_text_to_number_xls(&w.implicit_text_to_number(value))
                } else {
                    value.clone()
                };
                (key.clone(), value)
            })
            .collect()
    }
}
