//! Coverage of the scoring rule space.
//!
//! A *case* is a reachable `(question title, discriminator...)` tuple, an
//! *occurrence* one that a run actually exercised. Both are plain string
//! tuples so that workers can ship them to the master and the store can keep
//! them across runs.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Characters counted at most this many times per text.
const MAX_CHAR_OCCURRENCES: usize = 2;

pub type CoverageTuple = Vec<String>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coverage {
    cases: BTreeSet<CoverageTuple>,
    #[serde(rename = "occurred")]
    occurrences: BTreeSet<CoverageTuple>,
}

impl Coverage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_case<I, S>(&mut self, title: &str, discriminator: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cases.insert(tuple(title, discriminator));
    }

    pub fn case_occurred<I, S>(&mut self, title: &str, discriminator: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.occurrences.insert(tuple(title, discriminator));
    }

    /// Register the bounded case space of a text field: characters seen once
    /// or twice, every 2-gram and every length up to `max_size`.
    pub fn add_text_cases(
        &mut self,
        title: &str,
        prefix: &[&str],
        max_size: usize,
        alphabet: &[String],
        allow_empty: bool,
    ) {
        let chars: Vec<&str> = alphabet
            .iter()
            .map(String::as_str)
            .filter(|t| t.chars().count() == 1)
            .collect();
        for case in text_cases(max_size, &chars, allow_empty) {
            self.add_case(title, prefix.iter().map(|s| s.to_string()).chain(case));
        }
    }

    pub fn text_occurred(&mut self, title: &str, prefix: &[&str], text: &str) {
        for case in text_cases_occurred(text) {
            self.case_occurred(title, prefix.iter().map(|s| s.to_string()).chain(case));
        }
    }

    /// Union both sets.
    pub fn extend(&mut self, other: &Coverage) {
        self.cases.extend(other.cases.iter().cloned());
        self.occurrences.extend(other.occurrences.iter().cloned());
    }

    /// `|occurrences ∩ cases| * 100 / |cases|`, 0 without cases.
    pub fn percentage(&self) -> f64 {
        if self.cases.is_empty() {
            return 0.0;
        }
        let hit = self
            .occurrences
            .iter()
            .filter(|o| self.cases.contains(*o))
            .count();
        (hit as f64 * 100.0) / self.cases.len() as f64
    }

    pub fn cases(&self) -> impl Iterator<Item = &CoverageTuple> {
        self.cases.iter()
    }

    pub fn occurrences(&self) -> impl Iterator<Item = &CoverageTuple> {
        self.occurrences.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty() && self.occurrences.is_empty()
    }

    /// Per question: `(cases, covered cases)`.
    pub fn per_question(&self) -> BTreeMap<String, (usize, usize)> {
        let mut out: BTreeMap<String, (usize, usize)> = BTreeMap::new();
        for case in &self.cases {
            let Some(title) = case.first() else { continue };
            let entry = out.entry(title.clone()).or_default();
            entry.0 += 1;
            if self.occurrences.contains(case) {
                entry.1 += 1;
            }
        }
        out
    }
}

fn tuple<I, S>(title: &str, discriminator: I) -> CoverageTuple
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    std::iter::once(title.to_string())
        .chain(discriminator.into_iter().map(Into::into))
        .collect()
}

fn text_cases(max_size: usize, chars: &[&str], allow_empty: bool) -> Vec<Vec<String>> {
    let mut out = Vec::new();
    for c in chars {
        for i in 1..=MAX_CHAR_OCCURRENCES {
            out.push(vec![format!("char{i}"), c.to_string()]);
        }
    }
    for a in chars {
        for b in chars {
            out.push(vec!["2gram".to_string(), format!("{a}{b}")]);
        }
    }
    let start = if allow_empty { 0 } else { 1 };
    for len in start..=max_size {
        out.push(vec!["len".to_string(), len.to_string()]);
    }
    out
}

fn text_cases_occurred(text: &str) -> Vec<Vec<String>> {
    let chars: Vec<char> = text.chars().collect();
    let mut out = vec![vec!["len".to_string(), chars.len().to_string()]];
    for pair in chars.windows(2) {
        out.push(vec!["2gram".to_string(), format!("{}{}", pair[0], pair[1])]);
    }
    let mut counts: BTreeMap<char, usize> = BTreeMap::new();
    for c in &chars {
        *counts.entry(*c).or_default() += 1;
    }
    for (c, count) in counts {
        for i in 1..=count.min(MAX_CHAR_OCCURRENCES) {
            out.push(vec![format!("char{i}"), c.to_string()]);
        }
    }
    out
}
