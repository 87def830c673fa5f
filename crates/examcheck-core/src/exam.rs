//! Exam configuration and mark schemas.

use std::collections::BTreeSet;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::decimal::{Percentage, Score};

pub const EXAM_CONFIGURATION_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CountSystem {
    #[default]
    Partial,
    Complete,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum McScoring {
    #[default]
    DoNotSaveEmpty,
    SaveEmpty,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreCutting {
    /// Negative question scores are clipped at zero.
    #[default]
    Question,
    /// Only the test total is clipped.
    Test,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PassScoring {
    #[default]
    Last,
    Best,
}

/// One grade of a mark schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mark {
    /// Minimum reached percentage, e.g. `"50.00"`.
    pub threshold: String,
    pub short: String,
    pub official: String,
}

impl Mark {
    pub fn new(threshold: &str, short: &str, official: &str) -> Self {
        Self {
            threshold: threshold.to_string(),
            short: short.to_string(),
            official: official.to_string(),
        }
    }

    fn level(&self) -> Option<Percentage> {
        Percentage::parse(&self.threshold)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Marks(pub Vec<Mark>);

impl Marks {
    /// The mark with the greatest threshold not above `p`.
    pub fn lookup(&self, p: Percentage) -> Option<&Mark> {
        self.0
            .iter()
            .filter_map(|m| m.level().map(|level| (level, m)))
            .filter(|(level, _)| *level <= p)
            .max_by(|a, b| a.0.cmp(&b.0))
            .map(|(_, m)| m)
    }

    /// Short label of the matching mark, trimmed; empty if none matches.
    pub fn short_label(&self, p: Percentage) -> String {
        self.lookup(p)
            .map(|m| m.short.trim().to_string())
            .unwrap_or_default()
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.0.is_empty() {
            return Err("mark schema is empty".to_string());
        }
        let mut seen = BTreeSet::new();
        for mark in &self.0 {
            let level = mark
                .level()
                .ok_or_else(|| format!("invalid mark threshold '{}'", mark.threshold))?;
            if !seen.insert(mark.threshold.clone()) {
                return Err(format!("duplicate mark threshold '{}'", mark.threshold));
            }
            if level < Percentage::ZERO {
                return Err(format!("negative mark threshold '{}'", mark.threshold));
            }
        }
        if self.lookup(Percentage::ZERO).is_none() {
            return Err("lowest mark threshold must be 0".to_string());
        }
        Ok(())
    }

    /// Table lines for protocols, by ascending threshold.
    pub fn status_lines(&self) -> Vec<String> {
        let mut marks: Vec<&Mark> = self.0.iter().collect();
        marks.sort_by(|a, b| a.level().cmp(&b.level()));
        marks
            .into_iter()
            .map(|m| format!("{:>7}  {:<6} {}", m.threshold, m.short, m.official))
            .collect()
    }

    /// A schema of 2 to 20 grades. The lowest grade `6.0` starts at `0.00`,
    /// better grades get strictly ascending thresholds.
    pub fn random<R: Rng>(rng: &mut R) -> Marks {
        let n = rng.gen_range(2..=20usize);
        let mut grades = distinct_sorted(rng, n - 1, |r| {
            format!("{:.1}", r.gen_range(1.0..5.9f64))
        });
        let mut levels = distinct_sorted(rng, n - 1, |r| {
            format!("{:.2}", r.gen_range(0.01..100.0f64))
        });
        grades.push("6.0".to_string());
        levels.insert(0, "0.00".to_string());

        let marks = grades
            .iter()
            .rev()
            .zip(levels)
            .map(|(grade, level)| Mark {
                threshold: level,
                short: grade.clone(),
                official: format!("Note {grade}"),
            })
            .collect();
        Marks(marks)
    }
}

fn distinct_sorted<R: Rng>(
    rng: &mut R,
    n: usize,
    mut draw: impl FnMut(&mut R) -> String,
) -> Vec<String> {
    loop {
        let numbers: BTreeSet<String> = (0..n).map(|_| draw(&mut *rng)).collect();
        if numbers.len() == n {
            let mut out: Vec<String> = numbers.into_iter().collect();
            out.sort_by(|a, b| {
                let a: f64 = a.parse().unwrap_or(0.0);
                let b: f64 = b.parse().unwrap_or(0.0);
                a.total_cmp(&b)
            });
            return out;
        }
    }
}

/// Scoring-relevant settings of a test, read once per test and cached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExamConfiguration {
    pub version: u32,
    #[serde(default)]
    pub count_system: CountSystem,
    #[serde(default)]
    pub mc_scoring: McScoring,
    #[serde(default)]
    pub score_cutting: ScoreCutting,
    #[serde(default)]
    pub pass_scoring: PassScoring,
    #[serde(default)]
    pub marks: Marks,
}

impl Default for ExamConfiguration {
    fn default() -> Self {
        Self {
            version: EXAM_CONFIGURATION_VERSION,
            count_system: CountSystem::default(),
            mc_scoring: McScoring::default(),
            score_cutting: ScoreCutting::default(),
            pass_scoring: PassScoring::default(),
            marks: Marks(vec![
                Mark::new("0.00", "failed", "failed"),
                Mark::new("50.00", "passed", "passed"),
            ]),
        }
    }
}

impl ExamConfiguration {
    pub fn check_version(&self) -> Result<(), String> {
        if self.version != EXAM_CONFIGURATION_VERSION {
            return Err(format!(
                "unsupported exam configuration version {} (expected {EXAM_CONFIGURATION_VERSION})",
                self.version
            ));
        }
        Ok(())
    }

    /// Clip a single question score at zero when cutting per question.
    pub fn clip_answer_score(&self, score: Score) -> Score {
        match self.score_cutting {
            ScoreCutting::Question => score.clip_at_zero(),
            ScoreCutting::Test => score,
        }
    }

    pub fn status_lines(&self) -> Vec<String> {
        vec![
            format!("count_system = {:?}", self.count_system),
            format!("mc_scoring = {:?}", self.mc_scoring),
            format!("score_cutting = {:?}", self.score_cutting),
            format!("pass_scoring = {:?}", self.pass_scoring),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decimal::score_percentage;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn schema() -> Marks {
        Marks(vec![
            Mark::new("90", "A", "very good"),
            Mark::new("0", "F", "failed"),
            Mark::new("75", "B", "good"),
            Mark::new("50", "D", "sufficient"),
        ])
    }

    #[test]
    fn lookup_picks_highest_threshold_below() {
        let m = schema();
        let p = |s: &str| Percentage::parse(s).unwrap();
        assert_eq!(m.lookup(p("49.9")).unwrap().short, "F");
        assert_eq!(m.lookup(p("50")).unwrap().short, "D");
        assert_eq!(m.lookup(p("89.99")).unwrap().short, "B");
        assert_eq!(m.lookup(p("90")).unwrap().short, "A");
        assert_eq!(m.lookup(p("100")).unwrap().short, "A");
        assert!(m.validate().is_ok());
    }

    #[test]
    fn lookup_with_exact_fraction() {
        // 2/3 is 66.66..%, below a 66.67 threshold
        let m = Marks(vec![Mark::new("0", "F", ""), Mark::new("66.67", "C", "")]);
        let p = score_percentage(Score::from_int(2), Score::from_int(3));
        assert_eq!(m.short_label(p), "F");
    }

    #[test]
    fn validation_requires_zero() {
        let m = Marks(vec![Mark::new("10", "x", "")]);
        assert!(m.validate().is_err());
        assert!(Marks::default().validate().is_err());
    }

    #[test]
    fn random_schema_shape() {
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..20 {
            let m = Marks::random(&mut rng);
            assert!((2..=20).contains(&m.0.len()));
            assert_eq!(m.0[0].threshold, "0.00");
            assert_eq!(m.0[0].short, "6.0");
            assert!(m.validate().is_ok());
            let levels: Vec<f64> = m.0.iter().map(|x| x.threshold.parse().unwrap()).collect();
            assert!(levels.windows(2).all(|w| w[0] < w[1]));
        }
    }

    #[test]
    fn clipping_follows_cutting_mode() {
        let mut cfg = ExamConfiguration::default();
        assert_eq!(cfg.clip_answer_score(Score::from_int(-2)), Score::ZERO);
        cfg.score_cutting = ScoreCutting::Test;
        assert_eq!(cfg.clip_answer_score(Score::from_int(-2)), Score::from_int(-2));
    }

    #[test]
    fn wire_form_is_versioned() {
        let cfg = ExamConfiguration::default();
        let json = serde_json::to_value(&cfg).unwrap();
        assert_eq!(json["version"], 1);
        assert_eq!(json["score_cutting"], "question");
        let mut bad = json.clone();
        bad["version"] = 2.into();
        let parsed: ExamConfiguration = serde_json::from_value(bad).unwrap();
        assert!(parsed.check_version().is_err());
    }
}
