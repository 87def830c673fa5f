//! Run settings and workaround flags.
//!
//! Both travel to workers as flat JSON objects inside the take-exam command
//! and are loaded from the `[settings]` / `[workarounds]` sections of the
//! configuration file.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::implicit::implicit_text_to_number_xls;

/// Tunables of a run. Probabilities are in `0.0..=1.0`, frequencies in percent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Machines with an index up to this number run deterministic regression
    /// sessions, the rest fuzz.
    pub num_deterministic_machines: u32,
    /// Percentage of question visits that simulate a browser crash.
    pub crash_frequency: u32,
    /// Seconds between two autosaves.
    pub autosave_duration: u32,
    /// Extra seconds to wait before a crash is considered safe.
    pub autosave_tolerance: u32,
    /// Readjustment rounds after the first check.
    pub num_readjustments: u32,
    /// Percentage of revisited questions that get a new answer.
    pub modify_answer_frequency: u32,
    /// Raise a fake error of this domain level at the start of the answer pass.
    pub self_test_fake_error_level: u8,
    pub cloze_previous_answer_p: f64,
    pub cloze_text_enter_scored_p: f64,
    pub cloze_text_enter_random_number_p: f64,
    pub invalid_answer_p: f64,
    /// `A` = answer, `V` = verify, `R` = revisit and maybe modify.
    pub test_passes: String,
    pub max_long_text_length: usize,
    pub max_cloze_text_length: usize,
    pub numbers_in_text_fields_p: f64,
    pub screenshot_refresh_time: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            num_deterministic_machines: 1,
            crash_frequency: 1,
            autosave_duration: 5,
            autosave_tolerance: 10,
            num_readjustments: 1,
            modify_answer_frequency: 50,
            self_test_fake_error_level: 0,
            cloze_previous_answer_p: 0.2,
            cloze_text_enter_scored_p: 0.75,
            cloze_text_enter_random_number_p: 0.1,
            invalid_answer_p: 0.25,
            test_passes: "AVR".to_string(),
            max_long_text_length: 20,
            max_cloze_text_length: 7,
            numbers_in_text_fields_p: 0.05,
            screenshot_refresh_time: 10,
        }
    }
}

impl Settings {
    pub fn catalog() -> Vec<CatalogEntry> {
        let values = flatten(self_value(&Settings::default()));
        SETTINGS_DOCS
            .iter()
            .map(|(key, description)| CatalogEntry {
                key,
                description,
                default: values.get(*key).cloned().unwrap_or_default(),
            })
            .collect()
    }

    /// `key = value` lines for protocols.
    pub fn status_lines(&self) -> Vec<String> {
        status_lines(self_value(self))
    }

    /// Validate the pass letters and probability ranges.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(c) = self.test_passes.chars().find(|c| !"AVR".contains(*c)) {
            return Err(format!("unknown test pass '{c}' (expected A, V or R)"));
        }
        for (name, p) in [
            ("cloze_previous_answer_p", self.cloze_previous_answer_p),
            ("cloze_text_enter_scored_p", self.cloze_text_enter_scored_p),
            (
                "cloze_text_enter_random_number_p",
                self.cloze_text_enter_random_number_p,
            ),
            ("invalid_answer_p", self.invalid_answer_p),
            ("numbers_in_text_fields_p", self.numbers_in_text_fields_p),
        ] {
            if !(0.0..=1.0).contains(&p) {
                return Err(format!("{name} must be within 0..1, got {p}"));
            }
        }
        if self.crash_frequency > 100 || self.modify_answer_frequency > 100 {
            return Err("frequencies are percentages and must not exceed 100".to_string());
        }
        if self.max_cloze_text_length == 0 {
            return Err("max_cloze_text_length must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Compatibility switches for known quirks of the exam server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Workarounds {
    pub sloppy_whitespace: bool,
    pub implicit_text_number_conversions: bool,
    pub disallow_clamps_in_cloze: bool,
    pub disallow_dollar_in_cloze: bool,
    pub disallow_empty_answers: bool,
    pub identical_scoring_ignores_comparator: bool,
    pub disallow_invalid_answers: bool,
    pub dont_readjust_kprim: bool,
    pub dont_readjust_matching: bool,
    pub no_remove_on_readjust_matching: bool,
    pub inaccurate_percentage_rounding: bool,
    pub ignore_wrong_results_in_results_tab: bool,
    pub dont_test_invalid_save: bool,
}

impl Workarounds {
    pub fn catalog() -> Vec<CatalogEntry> {
        WORKAROUND_DOCS
            .iter()
            .map(|(key, description)| CatalogEntry {
                key,
                description,
                default: "false".to_string(),
            })
            .collect()
    }

    pub fn status_lines(&self) -> Vec<String> {
        status_lines(self_value(self))
    }

    /// Trim surrounding whitespace when `sloppy_whitespace` is set.
    pub fn strip_whitespace<'a>(&self, value: &'a str) -> &'a str {
        if self.sloppy_whitespace {
            value.trim()
        } else {
            value
        }
    }

    pub fn implicit_text_to_number_xls(&self, value: &str) -> String {
        if self.implicit_text_number_conversions {
            implicit_text_to_number_xls(value)
        } else {
            value.to_string()
        }
    }

    pub fn implicit_text_to_number(&self, value: &str) -> String {
        if self.implicit_text_number_conversions {
            crate::implicit::implicit_text_to_number(value)
        } else {
            value.to_string()
        }
    }

    /// Canonical form of a value before two channels are compared.
    pub fn normalize(&self, value: &str) -> String {
        self.implicit_text_to_number_xls(self.strip_whitespace(value))
    }
}

/// One documented option, for `examcheck init` and protocol headers.
#[derive(Debug, Clone, Serialize)]
pub struct CatalogEntry {
    pub key: &'static str,
    pub description: &'static str,
    pub default: String,
}

fn self_value<T: Serialize>(value: &T) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or(serde_json::Value::Null)
}

fn flatten(value: serde_json::Value) -> BTreeMap<String, String> {
    match value {
        serde_json::Value::Object(map) => map
            .into_iter()
            .map(|(k, v)| {
                let text = match v {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                (k, text)
            })
            .collect(),
        _ => BTreeMap::new(),
    }
}

fn status_lines(value: serde_json::Value) -> Vec<String> {
    flatten(value)
        .into_iter()
        .map(|(k, v)| format!("{k} = {v}"))
        .collect()
}

const SETTINGS_DOCS: &[(&str, &str)] = &[
    (
        "num_deterministic_machines",
        "Number of regression machines; these always do the same things.",
    ),
    (
        "crash_frequency",
        "Simulate a browser crash on this percentage of question visits.",
    ),
    ("autosave_duration", "Autosave happens every n seconds."),
    (
        "autosave_tolerance",
        "Extra seconds to wait after editing a question until a crash is considered safe.",
    ),
    (
        "num_readjustments",
        "Number of readjustment rounds after each exam.",
    ),
    (
        "modify_answer_frequency",
        "Change already given answers this often on revisiting them (percent).",
    ),
    (
        "self_test_fake_error_level",
        "Raise fake errors of this level to check error reporting.",
    ),
    (
        "cloze_previous_answer_p",
        "Probability of reusing previous answers in cloze questions.",
    ),
    (
        "cloze_text_enter_scored_p",
        "Probability of entering a scored answer in open text cloze gaps.",
    ),
    (
        "cloze_text_enter_random_number_p",
        "Probability of entering a random number instead of text into a text gap.",
    ),
    (
        "invalid_answer_p",
        "Probability of giving an invalid answer, e.g. text in a numeric gap.",
    ),
    (
        "test_passes",
        "Passes to run: A = answer, V = verify, R = random verify/answer.",
    ),
    (
        "max_long_text_length",
        "Maximum number of characters entered into long text questions.",
    ),
    (
        "max_cloze_text_length",
        "Maximum number of characters entered into cloze text gaps.",
    ),
    (
        "numbers_in_text_fields_p",
        "Probability of entering numeric values in text fields.",
    ),
    (
        "screenshot_refresh_time",
        "Seconds after which worker screenshots are refreshed.",
    ),
];

const WORKAROUND_DOCS: &[(&str, &str)] = &[
    ("sloppy_whitespace", "W01 Ignore whitespace inaccuracies in answers."),
    (
        "implicit_text_number_conversions",
        "W02 Allow cloze texts to be reformatted as numbers in the spreadsheet export.",
    ),
    ("disallow_clamps_in_cloze", "W03 Do not use <, > in cloze questions."),
    ("disallow_dollar_in_cloze", "W04 Do not use $ in cloze questions."),
    (
        "disallow_empty_answers",
        "W05 Never give empty answers; their exported scores are blank.",
    ),
    (
        "identical_scoring_ignores_comparator",
        "W06 The identical scoring option of cloze questions ignores the comparator.",
    ),
    ("disallow_invalid_answers", "W07 Do not enter text in numeric cloze gaps."),
    ("dont_readjust_kprim", "W08 Do not readjust KPrim questions."),
    ("dont_readjust_matching", "W09 Do not readjust matching questions."),
    (
        "no_remove_on_readjust_matching",
        "W10 Do not remove scoring pairs when readjusting matching questions.",
    ),
    (
        "inaccurate_percentage_rounding",
        "Compare reached percentages with a tolerance of 0.01.",
    ),
    (
        "ignore_wrong_results_in_results_tab",
        "Do not verify the results tab.",
    ),
    (
        "dont_test_invalid_save",
        "Do not check that invalid answers are rejected on save.",
    ),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_from_partial_json() {
        let s: Settings = serde_json::from_str(r#"{"crash_frequency": 0, "test_passes": "AV"}"#)
            .unwrap();
        assert_eq!(s.crash_frequency, 0);
        assert_eq!(s.test_passes, "AV");
        assert_eq!(s.max_cloze_text_length, 7);
        assert!(s.validate().is_ok());
    }

    #[test]
    fn settings_validation() {
        let s = Settings {
            test_passes: "AX".into(),
            ..Settings::default()
        };
        assert!(s.validate().unwrap_err().contains("'X'"));

        let s = Settings {
            invalid_answer_p: 1.5,
            ..Settings::default()
        };
        assert!(s.validate().is_err());
    }

    #[test]
    fn catalogs_cover_every_field() {
        let settings = Settings::catalog();
        assert_eq!(settings.len(), Settings::default().status_lines().len());
        let crash = settings.iter().find(|e| e.key == "crash_frequency").unwrap();
        assert_eq!(crash.default, "1");

        let workarounds = Workarounds::catalog();
        assert_eq!(workarounds.len(), Workarounds::default().status_lines().len());
    }

    #[test]
    fn retired_workarounds_still_load() {
        let w: Workarounds = serde_json::from_str(
            r#"{"sloppy_whitespace": true, "force_tinymce": true, "enable_autosave": true}"#,
        )
        .unwrap();
        assert!(w.sloppy_whitespace);
        assert_eq!(w.status_lines().len(), Workarounds::catalog().len());
        assert!(!w.status_lines().iter().any(|l| l.starts_with("force_tinymce")));
    }

    #[test]
    fn normalize_respects_flags() {
        let off = Workarounds::default();
        assert_eq!(off.normalize(" .50 "), " .50 ");

        let on = Workarounds {
            sloppy_whitespace: true,
            implicit_text_number_conversions: true,
            ..Workarounds::default()
        };
        assert_eq!(on.normalize(" .50 "), "0.5");
        assert_eq!(on.normalize(" abc "), "abc");
    }
}
