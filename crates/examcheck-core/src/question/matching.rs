//! Matching questions: definitions paired with terms.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use super::{check_unique, quarter_delta, CoverageMode, Dimensions, GeneratedAnswer, Readjustment, Variant};
use crate::context::Context;
use crate::coverage::Coverage;
use crate::decimal::Score;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Multiplicity {
    #[default]
    #[serde(rename = "1:1")]
    OneToOne,
    #[serde(rename = "n:n")]
    ManyToMany,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchingItem {
    pub id: String,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchingPair {
    pub definition: String,
    pub term: String,
    pub points: Score,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Matching {
    pub title: String,
    #[serde(default)]
    pub multiplicity: Multiplicity,
    pub definitions: Vec<MatchingItem>,
    pub terms: Vec<MatchingItem>,
    pub pairs: Vec<MatchingPair>,
}

fn pairs_maximum(pairs: &[MatchingPair]) -> Score {
    pairs.iter().map(|p| p.points).sum()
}

impl Matching {
    pub fn sample(title: &str) -> Self {
        let item = |id: &str, label: &str| MatchingItem {
            id: id.to_string(),
            label: label.to_string(),
        };
        let pair = |d: &str, t: &str, quarters: i64| MatchingPair {
            definition: d.to_string(),
            term: t.to_string(),
            points: Score::from_quarters(quarters),
        };
        Self {
            title: title.to_string(),
            multiplicity: Multiplicity::ManyToMany,
            definitions: vec![
                item("d1", "Mammal"),
                item("d2", "Bird"),
                item("d3", "Fish"),
            ],
            terms: vec![
                item("t1", "Whale"),
                item("t2", "Penguin"),
                item("t3", "Trout"),
                item("t4", "Bat"),
            ],
            pairs: vec![
                pair("d1", "t1", 4),
                pair("d1", "t4", 4),
                pair("d2", "t2", 4),
                pair("d3", "t3", 2),
            ],
        }
    }

    fn label<'a>(items: &'a [MatchingItem], id: &str) -> Option<&'a str> {
        items.iter().find(|i| i.id == id).map(|i| i.label.as_str())
    }

    fn pair_key(&self, pair: &MatchingPair) -> Option<Vec<String>> {
        Some(vec![
            Self::label(&self.definitions, &pair.definition)?.to_string(),
            Self::label(&self.terms, &pair.term)?.to_string(),
        ])
    }

    /// Score chosen `(definition id, term id)` pairs.
    fn score_by_ids<'a>(&self, chosen: impl IntoIterator<Item = (&'a str, &'a str)>) -> Score {
        let chosen: BTreeSet<(&str, &str)> = chosen.into_iter().collect();
        self.pairs
            .iter()
            .filter(|p| chosen.contains(&(p.definition.as_str(), p.term.as_str())))
            .map(|p| p.points)
            .sum()
    }

    fn chosen_ids<'a>(&'a self, dimensions: &Dimensions) -> Vec<(&'a str, &'a str)> {
        let definitions: HashMap<&str, &str> = self
            .definitions
            .iter()
            .map(|i| (i.label.as_str(), i.id.as_str()))
            .collect();
        let terms: HashMap<&str, &str> = self
            .terms
            .iter()
            .map(|i| (i.label.as_str(), i.id.as_str()))
            .collect();
        dimensions
            .iter()
            .filter(|(_, v)| v.trim() == "1")
            .filter_map(|(key, _)| match key.as_slice() {
                [d, t] => Some((*definitions.get(d.as_str())?, *terms.get(t.as_str())?)),
                _ => None,
            })
            .collect()
    }
}

impl Variant for Matching {
    fn title(&self) -> &str {
        &self.title
    }

    fn validate(&self) -> Result<(), String> {
        check_unique(self.definitions.iter().map(|i| i.id.as_str()), "definition id")?;
        check_unique(self.definitions.iter().map(|i| i.label.as_str()), "definition")?;
        check_unique(self.terms.iter().map(|i| i.id.as_str()), "term id")?;
        check_unique(self.terms.iter().map(|i| i.label.as_str()), "term")?;
        if self.definitions.is_empty() || self.terms.is_empty() {
            return Err("matching needs definitions and terms".to_string());
        }
        if self.pairs.is_empty() {
            return Err("matching without pairs".to_string());
        }
        let mut seen = BTreeSet::new();
        for pair in &self.pairs {
            if self.pair_key(pair).is_none() {
                return Err(format!("pair {}/{} references unknown ids", pair.definition, pair.term));
            }
            if !seen.insert((&pair.definition, &pair.term)) {
                return Err(format!("duplicate pair {}/{}", pair.definition, pair.term));
            }
        }
        Ok(())
    }

    fn random_answer(&self, ctx: &mut Context) -> GeneratedAnswer {
        let min_n = i64::from(ctx.workarounds.disallow_empty_answers);
        let n = ctx.randint(min_n, self.definitions.len() as i64) as usize;
        let definitions = ctx.sample(&self.definitions, n);

        let mut chosen: Vec<(&MatchingItem, MatchingItem)> = Vec::new();
        match self.multiplicity {
            Multiplicity::OneToOne => {
                let terms = ctx.sample(&self.terms, n);
                for (d, t) in definitions.iter().zip(terms) {
                    chosen.push((d, t));
                }
            }
            Multiplicity::ManyToMany => {
                let forced = (ctx.workarounds.disallow_empty_answers && n > 0)
                    .then(|| ctx.randint(0, n as i64 - 1) as usize);
                for (k, d) in definitions.iter().enumerate() {
                    let min_m = i64::from(forced == Some(k));
                    let m = ctx.randint(min_m, self.terms.len() as i64) as usize;
                    for t in ctx.sample(&self.terms, m) {
                        chosen.push((d, t));
                    }
                }
            }
        }

        let score = self.score_by_ids(chosen.iter().map(|(d, t)| (d.id.as_str(), t.id.as_str())));
        let dimensions = chosen
            .iter()
            .map(|(d, t)| (vec![d.label.clone(), t.label.clone()], "1".to_string()))
            .collect();
        GeneratedAnswer {
            dimensions,
            score,
            valid: true,
        }
    }

    fn compute_score(&self, dimensions: &Dimensions, _ctx: &Context) -> Score {
        self.score_by_ids(self.chosen_ids(dimensions))
    }

    fn maximum_score(&self) -> Score {
        pairs_maximum(&self.pairs)
    }

    fn readjust_scores(&mut self, ctx: &mut Context, report: &mut dyn FnMut(&str)) -> Readjustment {
        if ctx.workarounds.dont_readjust_matching {
            report("matching readjustment is disabled.");
            return Readjustment::unchanged();
        }
        let (pairs, removed) = loop {
            let mut pairs: Vec<MatchingPair> = self
                .pairs
                .iter()
                .map(|p| MatchingPair {
                    points: (p.points + quarter_delta(ctx, -8, 8)).clip_at_zero(),
                    ..p.clone()
                })
                .collect();
            let mut removed = None;
            if !ctx.workarounds.no_remove_on_readjust_matching
                && pairs.len() > 1
                && ctx.randint(0, 3) == 0
            {
                let index = ctx.randint(0, pairs.len() as i64 - 1) as usize;
                let mut remaining = pairs.clone();
                let pair = remaining.remove(index);
                if pairs_maximum(&remaining).is_positive() {
                    pairs = remaining;
                    removed = Some(pair);
                }
            }
            if pairs_maximum(&pairs).is_positive() {
                break (pairs, removed);
            }
        };

        for pair in &pairs {
            let old = self
                .pairs
                .iter()
                .find(|p| p.definition == pair.definition && p.term == pair.term)
                .map(|p| p.points)
                .unwrap_or(Score::ZERO);
            report(&format!(
                "readjusted {}/{} from {old} to {}.",
                pair.definition, pair.term, pair.points
            ));
        }
        let mut readjustment = Readjustment::changed();
        if let Some(pair) = removed {
            report(&format!("removed pair {}/{}.", pair.definition, pair.term));
            if let Some(key) = self.pair_key(&pair) {
                readjustment.removed_keys.push(key);
            }
        }
        self.pairs = pairs;
        readjustment
    }

    fn initialize_coverage(&self, coverage: &mut Coverage, _ctx: &Context) {
        for mode in CoverageMode::BOTH {
            for pair in &self.pairs {
                if let Some(key) = self.pair_key(pair) {
                    coverage.add_case(&self.title, [mode.name().to_string()].into_iter().chain(key));
                }
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
        for (key, value) in dimensions {
            if value.trim() == "1" && key.len() == 2 {
                coverage.case_occurred(&self.title, [mode.name().to_string()].into_iter().chain(key.iter().cloned()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{fuzz_ctx, regression_ctx};
    use super::*;
    use crate::settings::Workarounds;

    fn pair(d: &str, t: &str) -> (Vec<String>, String) {
        (vec![d.to_string(), t.to_string()], "1".to_string())
    }

    #[test]
    fn scores_configured_pairs_only() {
        let q = Matching::sample("M");
        let ctx = regression_ctx(0);
        let dims: Dimensions = [pair("Mammal", "Whale"), pair("Mammal", "Trout"), pair("Fish", "Trout")]
            .into_iter()
            .collect();
        assert_eq!(q.compute_score(&dims, &ctx), Score::from_quarters(6));
        assert_eq!(q.maximum_score(), Score::from_quarters(14));
    }

    #[test]
    fn one_to_one_uses_distinct_terms() {
        let mut q = Matching::sample("M");
        q.multiplicity = Multiplicity::OneToOne;
        let mut ctx = fuzz_ctx(Workarounds::default());
        for _ in 0..100 {
            let a = q.random_answer(&mut ctx);
            let terms: BTreeSet<&String> = a.dimensions.keys().map(|k| &k[1]).collect();
            assert_eq!(terms.len(), a.dimensions.len());
            let defs: BTreeSet<&String> = a.dimensions.keys().map(|k| &k[0]).collect();
            assert_eq!(defs.len(), a.dimensions.len());
        }
    }

    #[test]
    fn never_empty_when_disallowed() {
        let q = Matching::sample("M");
        let mut ctx = fuzz_ctx(Workarounds {
            disallow_empty_answers: true,
            ..Workarounds::default()
        });
        for _ in 0..100 {
            assert!(!q.random_answer(&mut ctx).dimensions.is_empty());
        }
    }

    #[test]
    fn readjust_may_remove_pairs() {
        let mut q = Matching::sample("M");
        let mut ctx = regression_ctx(2);
        let mut removed = Vec::new();
        for _ in 0..40 {
            let r = q.readjust_scores(&mut ctx, &mut |_: &str| {});
            assert!(r.changed);
            assert!(q.maximum_score().is_positive());
            assert!(r.removed_keys.len() <= 1);
            removed.extend(r.removed_keys);
        }
        assert!(!removed.is_empty());
        assert!(removed.iter().all(|k| k.len() == 2));
        assert!(!q.pairs.is_empty());
    }

    #[test]
    fn readjust_workarounds() {
        let mut q = Matching::sample("M");
        let mut ctx = fuzz_ctx(Workarounds {
            no_remove_on_readjust_matching: true,
            ..Workarounds::default()
        });
        for _ in 0..30 {
            assert!(q.readjust_scores(&mut ctx, &mut |_: &str| {}).removed_keys.is_empty());
        }
        assert_eq!(q.pairs.len(), 4);

        let mut ctx = fuzz_ctx(Workarounds {
            dont_readjust_matching: true,
            ..Workarounds::default()
        });
        let before = q.clone();
        assert!(!q.readjust_scores(&mut ctx, &mut |_: &str| {}).changed);
        assert_eq!(q, before);
    }

    #[test]
    fn rejects_dangling_pairs() {
        let mut q = Matching::sample("M");
        q.pairs.push(MatchingPair {
            definition: "d9".into(),
            term: "t1".into(),
            points: Score::from_int(1),
        });
        assert!(Variant::validate(&q).is_err());
    }
}
