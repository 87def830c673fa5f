//! Exam results: what a worker recorded and what a channel exported.
//!
//! A result maps ordered key segments such as
//! `["xls", "question", "Q1", "score_reached"]` to string values. Comparing a
//! recorded result with an exported one is the heart of verification.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::coverage::Coverage;
use crate::decimal::{format_score, Score};
use crate::error::ErrorDomain;
use crate::question::Dimensions;
use crate::settings::Workarounds;

/// Ordered key segments.
pub type Key = Vec<String>;

/// Tag for values compared as canonical JSON.
pub const KIND_JSON: &str = "json";

/// Channels that report totals, in propagation order.
pub const TOTAL_CHANNELS: [&str; 3] = ["xls", "statistics_tab", "results_tab"];

/// Build a key from anything string-like.
pub fn key<I, S>(segments: I) -> Key
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    segments.into_iter().map(Into::into).collect()
}

/// Title as used by the spreadsheet and PDF channels: all whitespace removed.
pub fn normalized_title(title: &str) -> String {
    title.chars().filter(|c| !c.is_whitespace()).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Recorded,
    Exported,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Recorded => f.write_str("recorded"),
            Origin::Exported => f.write_str("exported"),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("key {0:?} already present")]
    Duplicate(Key),
    #[error("key {0:?} not present")]
    Missing(Key),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "WireResult", try_from = "WireResult")]
pub struct ExamResult {
    origin: Origin,
    properties: BTreeMap<Key, String>,
    types: BTreeMap<Key, String>,
    protocol: Vec<String>,
    files: BTreeMap<String, Vec<u8>>,
    performance: Vec<f64>,
    errors: BTreeMap<String, String>,
    coverage: Coverage,
}

impl ExamResult {
    pub fn new(origin: Origin) -> Self {
        Self {
            origin,
            properties: BTreeMap::new(),
            types: BTreeMap::new(),
            protocol: Vec::new(),
            files: BTreeMap::new(),
            performance: Vec::new(),
            errors: BTreeMap::new(),
            coverage: Coverage::new(),
        }
    }

    /// A result that only carries an error, no scores.
    pub fn from_error(
        origin: Origin,
        domain: ErrorDomain,
        message: impl Into<String>,
        files: BTreeMap<String, Vec<u8>>,
    ) -> Self {
        let mut result = Self::new(origin);
        result.add_error(domain, message);
        result.files = files;
        result
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    pub fn add(&mut self, key: Key, value: impl Into<String>) -> Result<(), KeyError> {
        self.add_with_kind(key, value, None)
    }

    pub fn add_with_kind(
        &mut self,
        key: Key,
        value: impl Into<String>,
        kind: Option<&str>,
    ) -> Result<(), KeyError> {
        if self.properties.contains_key(&key) {
            return Err(KeyError::Duplicate(key));
        }
        if let Some(kind) = kind {
            self.types.insert(key.clone(), kind.to_string());
        }
        self.properties.insert(key, value.into());
        Ok(())
    }

    pub fn add_as_formatted_score(&mut self, key: Key, score: Score) -> Result<(), KeyError> {
        self.add(key, format_score(score))
    }

    pub fn update(&mut self, key: &[String], value: impl Into<String>) -> Result<(), KeyError> {
        match self.properties.get_mut(key) {
            Some(slot) => {
                *slot = value.into();
                Ok(())
            }
            None => Err(KeyError::Missing(key.to_vec())),
        }
    }

    /// Remove a key and its tag. Absent keys are ignored.
    pub fn remove(&mut self, key: &[String]) {
        self.properties.remove(key);
        self.types.remove(key);
    }

    pub fn get(&self, key: &[String]) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    pub fn kind(&self, key: &[String]) -> Option<&str> {
        self.types.get(key).map(String::as_str)
    }

    pub fn properties(&self) -> impl Iterator<Item = (&Key, &String)> {
        self.properties.iter()
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    /// All entries below `prefix`, keyed by the remaining segments.
    pub fn gather(&self, prefix: &[&str]) -> BTreeMap<Key, String> {
        self.properties
            .iter()
            .filter(|(k, _)| {
                k.len() > prefix.len() && k.iter().zip(prefix).all(|(a, b)| a == b)
            })
            .map(|(k, v)| (k[prefix.len()..].to_vec(), v.clone()))
            .collect()
    }

    /// Question title to answer dimensions, from
    /// `("question", title, "answer", dims...)` entries.
    pub fn answers(&self) -> BTreeMap<String, Dimensions> {
        let mut out: BTreeMap<String, Dimensions> = BTreeMap::new();
        for (k, v) in &self.properties {
            if k.len() > 3 && k[0] == "question" && k[2] == "answer" {
                out.entry(k[1].clone())
                    .or_default()
                    .insert(k[3..].to_vec(), v.clone());
            }
        }
        out
    }

    /// Per-question reached scores of one channel (`xls` or `pdf`).
    pub fn scores(&self, channel: &str) -> BTreeMap<String, String> {
        self.properties
            .iter()
            .filter(|(k, _)| {
                k.len() == 4 && k[0] == channel && k[1] == "question" && k[3] == "score_reached"
            })
            .map(|(k, v)| (k[2].clone(), v.clone()))
            .collect()
    }

    pub fn reached_score_keys(title: &str) -> Vec<Key> {
        let t = normalized_title(title);
        vec![
            key(["xls", "question", t.as_str(), "score_reached"]),
            key(["pdf", "question", t.as_str(), "score_reached"]),
        ]
    }

    pub fn maximum_score_keys(title: &str) -> Vec<Key> {
        let t = normalized_title(title);
        vec![key(["pdf", "question", t.as_str(), "score_maximum"])]
    }

    pub fn add_error(&mut self, domain: ErrorDomain, message: impl Into<String>) {
        self.errors
            .entry(domain.name().to_string())
            .or_insert_with(|| message.into());
    }

    pub fn errors(&self) -> &BTreeMap<String, String> {
        &self.errors
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Worst recorded domain; unknown names count as unexpected.
    pub fn most_severe_error_domain(&self) -> ErrorDomain {
        ErrorDomain::most_severe(
            self.errors
                .keys()
                .map(|name| ErrorDomain::from_name(name).unwrap_or(ErrorDomain::Unexpected)),
        )
    }

    pub fn error_message(&self, domain: ErrorDomain) -> Option<&str> {
        self.errors.get(domain.name()).map(String::as_str)
    }

    pub fn attach_protocol<I, S>(&mut self, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.protocol.extend(lines.into_iter().map(Into::into));
    }

    pub fn protocol(&self) -> &[String] {
        &self.protocol
    }

    pub fn attach_file(&mut self, name: impl Into<String>, content: impl Into<Vec<u8>>) {
        self.files.insert(name.into(), content.into());
    }

    pub fn files(&self) -> &BTreeMap<String, Vec<u8>> {
        &self.files
    }

    pub fn take_files(&mut self) -> BTreeMap<String, Vec<u8>> {
        std::mem::take(&mut self.files)
    }

    pub fn attach_performance(&mut self, samples: &[f64]) {
        self.performance.extend_from_slice(samples);
    }

    pub fn performance(&self) -> &[f64] {
        &self.performance
    }

    pub fn attach_coverage(&mut self, coverage: &Coverage) {
        self.coverage.extend(coverage);
    }

    pub fn coverage(&self) -> &Coverage {
        &self.coverage
    }

    /// Compare this result against another, key by key.
    pub fn compare(&self, other: &ExamResult, workarounds: &Workarounds) -> Comparison {
        let keys: BTreeSet<&Key> = self.properties.keys().chain(other.properties.keys()).collect();
        let mut rows = Vec::with_capacity(keys.len());

        for k in keys {
            let mine = self.properties.get(k).map(|v| workarounds.normalize(v));
            let theirs = other.properties.get(k).map(|v| workarounds.normalize(v));
            let tags: BTreeSet<&str> = [self.kind(k), other.kind(k)].into_iter().flatten().collect();

            let (status, mine, theirs) = if tags.len() > 1 {
                (RowStatus::Fail, mine, theirs)
            } else {
                let structural = tags.contains(KIND_JSON);
                let mine = mine.map(|v| if structural { canonical_json(&v) } else { v });
                let theirs = theirs.map(|v| if structural { canonical_json(&v) } else { v });
                let equal = match (&mine, &theirs) {
                    (Some(a), Some(b)) => {
                        if is_percentage_key(k) && workarounds.inaccurate_percentage_rounding {
                            is_close(a, b, 0.01)
                        } else {
                            a == b
                        }
                    }
                    _ => false,
                };
                let status = if k.first().is_some_and(|c| c == "results_tab")
                    && workarounds.ignore_wrong_results_in_results_tab
                {
                    RowStatus::Ignored
                } else if equal {
                    RowStatus::Ok
                } else {
                    RowStatus::Fail
                };
                (status, mine, theirs)
            };

            rows.push(ComparisonRow {
                status,
                key: k.join(" / "),
                mine: render_value(mine.as_deref()),
                theirs: render_value(theirs.as_deref()),
            });
        }

        let mut errors = Vec::new();
        for result in [self, other] {
            for (domain, message) in &result.errors {
                errors.push(format!("error {domain}: {message} in {}", result.origin));
            }
        }

        let success = errors.is_empty() && rows.iter().all(|r| r.status != RowStatus::Fail);
        Comparison {
            mine: self.origin,
            theirs: other.origin,
            rows,
            errors,
            success,
        }
    }

    /// Compare and emit the comparison table through `report`.
    pub fn check_against(
        &self,
        other: &ExamResult,
        report: &mut dyn FnMut(&str),
        workarounds: &Workarounds,
    ) -> bool {
        let comparison = self.compare(other, workarounds);
        for line in comparison.to_markdown().lines() {
            report(line);
        }
        comparison.success
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).context("failed to serialize result")
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("failed to parse result JSON")
    }

    pub fn save_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("failed to serialize result")?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, json)
            .with_context(|| format!("failed to write result to {}", path.display()))?;
        Ok(())
    }

    pub fn load_json(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read result from {}", path.display()))?;
        Self::from_json(&content)
    }
}

fn is_percentage_key(k: &[String]) -> bool {
    k.len() == 2
        && (k[0] == "statistics_tab" || k[0] == "results_tab")
        && k[1] == "percentage_reached"
}

fn is_close(a: &str, b: &str, eps: f64) -> bool {
    match (a.trim().parse::<f64>(), b.trim().parse::<f64>()) {
        (Ok(x), Ok(y)) => (x - y).abs() <= eps + 1e-9,
        _ => a == b,
    }
}

fn canonical_json(value: &str) -> String {
    match serde_json::from_str::<serde_json::Value>(value) {
        Ok(v) => v.to_string(),
        Err(_) => format!("-illegal-json-{value}"),
    }
}

fn render_value(value: Option<&str>) -> String {
    match value {
        Some(v) => v.replace('\n', "\\n"),
        None => "(missing)".to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RowStatus {
    Ok,
    Fail,
    Ignored,
}

impl fmt::Display for RowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowStatus::Ok => f.write_str("OK"),
            RowStatus::Fail => f.write_str("FAIL"),
            RowStatus::Ignored => f.write_str("IGNORED"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonRow {
    pub status: RowStatus,
    pub key: String,
    pub mine: String,
    pub theirs: String,
}

/// Outcome of [`ExamResult::compare`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comparison {
    pub mine: Origin,
    pub theirs: Origin,
    pub rows: Vec<ComparisonRow>,
    pub errors: Vec<String>,
    pub success: bool,
}

impl Comparison {
    pub fn failures(&self) -> impl Iterator<Item = &ComparisonRow> {
        self.rows.iter().filter(|r| r.status == RowStatus::Fail)
    }

    pub fn to_markdown(&self) -> String {
        let mut md = String::new();
        md.push_str(&format!(
            "| OK? | KEY | {} | {} |\n",
            self.mine.to_string().to_uppercase(),
            self.theirs.to_string().to_uppercase()
        ));
        md.push_str("|-----|-----|------|------|\n");
        for row in &self.rows {
            md.push_str(&format!(
                "| {} | {} | {} | {} |\n",
                row.status, row.key, row.mine, row.theirs
            ));
        }
        for error in &self.errors {
            md.push_str(error);
            md.push('\n');
        }
        md
    }
}

/// Serialized form; every entry is a `[[segments...], value]` pair.
#[derive(Serialize, Deserialize)]
struct WireResult {
    origin: Origin,
    #[serde(default)]
    properties: Vec<(Key, String)>,
    #[serde(default)]
    types: Vec<(Key, String)>,
    #[serde(default)]
    protocol: Vec<String>,
    #[serde(default)]
    files: BTreeMap<String, String>,
    #[serde(default)]
    performance: Vec<f64>,
    #[serde(default)]
    errors: BTreeMap<String, String>,
    #[serde(default)]
    coverage: Coverage,
}

fn collect_entries(entries: Vec<(Key, String)>) -> Result<BTreeMap<Key, String>, String> {
    let mut map = BTreeMap::new();
    for (k, value) in entries {
        if k.is_empty() {
            return Err(format!("result entry '{value}' has no key"));
        }
        if map.insert(k.clone(), value).is_some() {
            return Err(format!("duplicate result key {k:?}"));
        }
    }
    Ok(map)
}

impl From<ExamResult> for WireResult {
    fn from(r: ExamResult) -> Self {
        WireResult {
            origin: r.origin,
            properties: r.properties.into_iter().collect(),
            types: r.types.into_iter().collect(),
            protocol: r.protocol,
            files: r
                .files
                .into_iter()
                .map(|(name, bytes)| (name, BASE64.encode(bytes)))
                .collect(),
            performance: r.performance,
            errors: r.errors,
            coverage: r.coverage,
        }
    }
}

impl TryFrom<WireResult> for ExamResult {
    type Error = String;

    fn try_from(w: WireResult) -> Result<Self, Self::Error> {
        let mut files = BTreeMap::new();
        for (name, encoded) in w.files {
            let bytes = BASE64
                .decode(encoded.as_bytes())
                .map_err(|e| format!("file '{name}' is not valid base64: {e}"))?;
            files.insert(name, bytes);
        }
        Ok(ExamResult {
            origin: w.origin,
            properties: collect_entries(w.properties)?,
            types: collect_entries(w.types)?,
            protocol: w.protocol,
            files,
            performance: w.performance,
            errors: w.errors,
            coverage: w.coverage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorded() -> ExamResult {
        let mut r = ExamResult::new(Origin::Recorded);
        r.add(key(["question", "Q 1", "answer", "Gap 1"]), "abc").unwrap();
        r.add(key(["xls", "question", "Q1", "score_reached"]), "2").unwrap();
        r.add(key(["statistics_tab", "percentage_reached"]), "66.67").unwrap();
        r
    }

    #[test]
    fn add_and_update_contract() {
        let mut r = recorded();
        let k = key(["xls", "question", "Q1", "score_reached"]);
        assert_eq!(
            r.add(k.clone(), "3").unwrap_err(),
            KeyError::Duplicate(k.clone())
        );
        r.update(&k, "3").unwrap();
        assert_eq!(r.get(&k), Some("3"));
        let missing = key(["nope"]);
        assert!(matches!(r.update(&missing, "1"), Err(KeyError::Missing(_))));
        r.remove(&k);
        r.remove(&k);
        assert_eq!(r.get(&k), None);
    }

    #[test]
    fn answers_and_gather() {
        let mut r = recorded();
        r.add(key(["question", "M", "answer", "def a", "term b"]), "1").unwrap();
        let answers = r.answers();
        assert_eq!(answers["Q 1"][&key(["Gap 1"])], "abc");
        assert_eq!(answers["M"][&key(["def a", "term b"])], "1");
        let xls = r.gather(&["xls"]);
        assert_eq!(xls[&key(["question", "Q1", "score_reached"])], "2");
        assert_eq!(r.scores("xls")["Q1"], "2");
    }

    #[test]
    fn round_trip_preserves_segments() {
        let mut r = recorded();
        r.add_with_kind(key(["question", "MC", "answer", "coverage"]), "{\"b\":1,\"a\":0}", Some(KIND_JSON))
            .unwrap();
        r.attach_file("shot.png", vec![0u8, 159, 146, 150, 255]);
        r.attach_protocol(["line one", "line two"]);
        r.attach_performance(&[0.25, 1.5]);
        let mut cov = Coverage::new();
        cov.add_case("Q 1", ["verify", "len", "3"]);
        cov.case_occurred("Q 1", ["verify", "len", "3"]);
        r.attach_coverage(&cov);
        r.add_error(ErrorDomain::AutoSave, "lost answer");

        let json = r.to_json().unwrap();
        let back = ExamResult::from_json(&json).unwrap();
        assert_eq!(back, r);

        let v: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(v["origin"], "recorded");
        assert!(v["properties"]
            .as_array()
            .unwrap()
            .contains(&serde_json::json!([["question", "Q 1", "answer", "Gap 1"], "abc"])));
        assert!(v["types"]
            .as_array()
            .unwrap()
            .contains(&serde_json::json!([["question", "MC", "answer", "coverage"], KIND_JSON])));
        assert_eq!(v["files"]["shot.png"], "AJ+Slv8=");
        assert_eq!(v["errors"]["auto_save"], "lost answer");
    }

    #[test]
    fn flat_or_keyless_entries_are_rejected() {
        let flat = r#"{"origin":"recorded","properties":[["xls","score_reached","2"]]}"#;
        assert!(ExamResult::from_json(flat).is_err());
        let keyless = r#"{"origin":"recorded","properties":[[[],"2"]]}"#;
        assert!(ExamResult::from_json(keyless).is_err());
        let twice = r#"{"origin":"recorded","properties":[[["a"],"1"],[["a"],"2"]]}"#;
        assert!(ExamResult::from_json(twice).is_err());
    }

    #[test]
    fn one_difference_one_fail_row() {
        let a = recorded();
        let mut b = recorded();
        b.update(&key(["xls", "question", "Q1", "score_reached"]), "2.5")
            .unwrap();
        let cmp = a.compare(&b, &Workarounds::default());
        assert!(!cmp.success);
        assert_eq!(cmp.failures().count(), 1);
        assert_eq!(cmp.failures().next().unwrap().key, "xls / question / Q1 / score_reached");
    }

    #[test]
    fn errors_force_failure() {
        let a = recorded();
        let mut b = recorded();
        assert!(a.compare(&b, &Workarounds::default()).success);
        b.add_error(ErrorDomain::Interaction, "flaky");
        let mut lines = Vec::new();
        let ok = a.check_against(&b, &mut |l| lines.push(l.to_string()), &Workarounds::default());
        assert!(!ok);
        assert!(lines.iter().any(|l| l == "error interaction: flaky in recorded"));
    }

    #[test]
    fn workaround_comparators() {
        let a = recorded();
        let mut b = recorded();
        b.update(&key(["statistics_tab", "percentage_reached"]), "66.66")
            .unwrap();
        assert!(!a.compare(&b, &Workarounds::default()).success);
        let w = Workarounds {
            inaccurate_percentage_rounding: true,
            ..Workarounds::default()
        };
        assert!(a.compare(&b, &w).success);

        let mut c = recorded();
        c.add(key(["results_tab", "short_mark"]), "A").unwrap();
        let w = Workarounds {
            ignore_wrong_results_in_results_tab: true,
            ..Workarounds::default()
        };
        let cmp = a.compare(&c, &w);
        assert!(cmp.success);
        assert!(cmp.rows.iter().any(|r| r.status == RowStatus::Ignored));
    }

    #[test]
    fn json_tag_compares_structurally() {
        let mut a = ExamResult::new(Origin::Recorded);
        let mut b = ExamResult::new(Origin::Exported);
        let k = key(["question", "P", "answer", "Stroke"]);
        a.add_with_kind(k.clone(), "{\"a\": 1, \"b\": [1,2]}", Some(KIND_JSON)).unwrap();
        b.add(k.clone(), "{\"b\":[1,2],\"a\":1}").unwrap();
        assert!(a.compare(&b, &Workarounds::default()).success);

        b.update(&k, "not json").unwrap();
        let cmp = a.compare(&b, &Workarounds::default());
        assert!(!cmp.success);
        assert_eq!(cmp.rows[0].theirs, "-illegal-json-not json");
    }

    #[test]
    fn normalization_applies_to_both_sides() {
        let mut a = ExamResult::new(Origin::Recorded);
        let mut b = ExamResult::new(Origin::Exported);
        let k = key(["question", "C", "answer", "Gap 1"]);
        a.add(k.clone(), " .50").unwrap();
        b.add(k, "0.5 ").unwrap();
        let w = Workarounds {
            sloppy_whitespace: true,
            implicit_text_number_conversions: true,
            ..Workarounds::default()
        };
        assert!(a.compare(&b, &w).success);
        assert!(!a.compare(&b, &Workarounds::default()).success);
    }

    #[test]
    fn save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("result.json");
        let r = recorded();
        r.save_json(&path).unwrap();
        assert_eq!(ExamResult::load_json(&path).unwrap(), r);
    }

    #[test]
    fn score_keys_use_normalized_titles() {
        assert_eq!(
            ExamResult::reached_score_keys("My  Q\t1")[0],
            key(["xls", "question", "MyQ1", "score_reached"])
        );
        assert_eq!(
            ExamResult::maximum_score_keys("a b")[0],
            key(["pdf", "question", "ab", "score_maximum"])
        );
    }

    #[test]
    fn most_severe_domain() {
        let mut r = ExamResult::new(Origin::Recorded);
        assert_eq!(r.most_severe_error_domain(), ErrorDomain::None);
        r.add_error(ErrorDomain::Interaction, "a");
        r.add_error(ErrorDomain::Integrity, "b");
        assert_eq!(r.most_severe_error_domain(), ErrorDomain::Integrity);
        assert_eq!(r.error_message(ErrorDomain::Integrity), Some("b"));
    }
}
