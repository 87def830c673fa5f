//! Randomness and text production for one exam session.
//!
//! A session is either a *regression* session with a fixed per-machine seed,
//! so it always does the same things, or a *fuzzing* session drawing from
//! entropy. The kind is picked once per machine index.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::implicit::float_repr;
use crate::settings::{Settings, Workarounds};

/// Multiplier for per-machine regression seeds.
const SEED_FACTOR: u64 = 73_939_133;

/// Admin UI language of the exam server; decides some dimension names.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    En,
    De,
}

impl Language {
    pub fn parse(code: &str) -> Option<Language> {
        match code.to_ascii_lowercase().as_str() {
            "en" => Some(Language::En),
            "de" => Some(Language::De),
            _ => None,
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Language::En => "en",
            Language::De => "de",
        }
    }

    /// Dimension name of the 1-based cloze gap `n`.
    pub fn gap_name(self, n: usize) -> String {
        match self {
            Language::En => format!("Gap {n}"),
            Language::De => format!("Lücke {n}"),
        }
    }

    pub fn answer_name(self) -> &'static str {
        match self {
            Language::En => "Answer",
            Language::De => "Antwort",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextKind {
    Regression { seed: u64 },
    Fuzzing,
}

impl ContextKind {
    /// Regression for the first `num_deterministic_machines` machines
    /// (1-based), fuzzing for the rest.
    pub fn for_machine(machine_index: u32, settings: &Settings) -> ContextKind {
        if machine_index <= settings.num_deterministic_machines {
            ContextKind::Regression {
                seed: u64::from(machine_index) * SEED_FACTOR,
            }
        } else {
            ContextKind::Fuzzing
        }
    }
}

/// Which token alphabet a text field draws from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alphabet {
    Cloze,
    LongText,
}

pub struct Context {
    kind: ContextKind,
    rng: StdRng,
    pub settings: Settings,
    pub workarounds: Workarounds,
    pub language: Language,
    cloze_alphabet: Vec<String>,
    long_text_alphabet: Vec<String>,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("kind", &self.kind)
            .field("language", &self.language)
            .finish_non_exhaustive()
    }
}

impl Context {
    pub fn new(
        kind: ContextKind,
        settings: Settings,
        workarounds: Workarounds,
        language: Language,
    ) -> Self {
        let rng = match kind {
            ContextKind::Regression { seed } => StdRng::seed_from_u64(seed),
            ContextKind::Fuzzing => StdRng::from_entropy(),
        };
        let cloze_alphabet = random_chars(
            false,
            !workarounds.disallow_dollar_in_cloze,
            !workarounds.disallow_clamps_in_cloze,
        );
        let long_text_alphabet = random_chars(true, true, true);
        Self {
            kind,
            rng,
            settings,
            workarounds,
            language,
            cloze_alphabet,
            long_text_alphabet,
        }
    }

    pub fn regression(seed: u64, settings: Settings, workarounds: Workarounds) -> Self {
        Self::new(
            ContextKind::Regression { seed },
            settings,
            workarounds,
            Language::En,
        )
    }

    pub fn kind(&self) -> ContextKind {
        self.kind
    }

    /// Regression sessions prefer random text over correct cloze solutions.
    pub fn prefer_text(&self) -> bool {
        matches!(self.kind, ContextKind::Regression { .. })
    }

    pub fn alphabet(&self, alphabet: Alphabet) -> &[String] {
        match alphabet {
            Alphabet::Cloze => &self.cloze_alphabet,
            Alphabet::LongText => &self.long_text_alphabet,
        }
    }

    pub fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    /// Uniform integer in `low..=high`.
    pub fn randint(&mut self, low: i64, high: i64) -> i64 {
        if high <= low {
            return low;
        }
        self.rng.gen_range(low..=high)
    }

    /// Uniform float in `0.0..1.0`.
    pub fn random(&mut self) -> f64 {
        self.rng.gen::<f64>()
    }

    /// `true` with probability `p`.
    pub fn chance(&mut self, p: f64) -> bool {
        self.random() < p
    }

    /// `true` with a probability of `percent` percent.
    pub fn percent(&mut self, percent: u32) -> bool {
        self.random() * 100.0 < f64::from(percent)
    }

    pub fn choose<'a, T>(&mut self, items: &'a [T]) -> Option<&'a T> {
        items.choose(&mut self.rng)
    }

    pub fn shuffle<T>(&mut self, items: &mut [T]) {
        items.shuffle(&mut self.rng);
    }

    /// `amount` distinct items in random order.
    pub fn sample<T: Clone>(&mut self, items: &[T], amount: usize) -> Vec<T> {
        items
            .choose_multiple(&mut self.rng, amount.min(items.len()))
            .cloned()
            .collect()
    }

    /// A random numeric string of at most `n` characters.
    pub fn random_number(&mut self, n: usize) -> String {
        match n {
            0 => String::new(),
            1 => self.randint(0, 9).to_string(),
            _ if self.chance(0.5) => {
                if self.chance(0.5) {
                    let bound = 10i64.saturating_pow((n - 1) as u32) - 1;
                    format!(".{}", self.randint(0, bound))
                } else {
                    let x = self.random() * 1000.0;
                    float_repr(x).chars().take(n).collect()
                }
            }
            _ => {
                let sign = *["", "-", "+"].choose(&mut self.rng).unwrap_or(&"");
                let bound = 10i64.saturating_pow((n - sign.len()) as u32) - 1;
                format!("{sign}{}", self.randint(0, bound))
            }
        }
    }

    /// Random text of at most `size` characters.
    ///
    /// Retries until the trimmed text is non-empty when empty answers are
    /// disallowed.
    pub fn produce_text(&mut self, size: usize, alphabet: Alphabet, allow_numbers: bool) -> String {
        let tokens = self.alphabet(alphabet).to_vec();
        if size == 0 {
            return String::new();
        }
        loop {
            let text = match self.kind {
                ContextKind::Regression { .. } => {
                    self.regression_text(size, &tokens, allow_numbers)
                }
                ContextKind::Fuzzing => {
                    let min = if self.workarounds.disallow_empty_answers {
                        1
                    } else {
                        0
                    };
                    let n = self.randint(min, size as i64) as usize;
                    self.random_text(n, &tokens, allow_numbers)
                }
            };
            if !self.workarounds.disallow_empty_answers || !text.trim().is_empty() {
                return text;
            }
        }
    }

    /// Alternate single random tokens with the special characters of the
    /// alphabet, which stresses escaping.
    fn regression_text(&mut self, size: usize, tokens: &[String], allow_numbers: bool) -> String {
        let mut special: Vec<&str> = ["<", ">", "\n"]
            .into_iter()
            .filter(|c| tokens.iter().any(|t| t == c))
            .collect();
        if special.is_empty() {
            return self.random_text(size, tokens, allow_numbers);
        }
        let mut s = String::new();
        let mut len = 0;
        while len < size {
            if len % special.len() == 0 {
                let piece = self.random_text(1, tokens, allow_numbers);
                len += piece.chars().count().max(1);
                s.push_str(&piece);
            } else {
                s.push_str(special[0]);
                special.rotate_left(1);
                len += 1;
            }
        }
        s
    }

    /// Concatenate tokens until exactly `n` characters are filled. A token
    /// that would overflow the budget is redrawn.
    fn random_text(&mut self, n: usize, tokens: &[String], allow_numbers: bool) -> String {
        if allow_numbers && self.chance(self.settings.numbers_in_text_fields_p) {
            return self.random_number(n);
        }
        let mut out = String::new();
        let mut filled = 0;
        while filled < n {
            let Some(token) = tokens.choose(&mut self.rng) else {
                break;
            };
            if filled == 0 && !allow_numbers && (token.starts_with(|c: char| c.is_ascii_digit()) || token == ".") {
                continue;
            }
            let len = token.chars().count();
            if filled + len <= n {
                out.push_str(token);
                filled += len;
            }
        }
        out
    }
}

/// Token alphabet for text answers.
pub fn random_chars(allow_newlines: bool, allow_dollar: bool, allow_clamps: bool) -> Vec<String> {
    let mut chars = String::from(" ");
    chars.push_str("ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789");
    chars.push_str("éáèêäöüÄÖÜß?!.-_:;#§%&=^|{}[]()@+-*/~'\"\t\\");
    if allow_newlines {
        chars.push('\n');
    }
    if allow_clamps {
        chars.push_str("<>");
    }
    if allow_dollar {
        chars.push('$');
    }
    let mut tokens: Vec<String> = chars.chars().map(String::from).collect();
    tokens.extend(["&lt;", "&gt;", "&amp;", "\\1"].map(String::from));
    if allow_dollar {
        tokens.push("$1".to_string());
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(kind: ContextKind, workarounds: Workarounds) -> Context {
        Context::new(kind, Settings::default(), workarounds, Language::En)
    }

    #[test]
    fn kind_per_machine() {
        let settings = Settings {
            num_deterministic_machines: 2,
            ..Settings::default()
        };
        assert_eq!(
            ContextKind::for_machine(2, &settings),
            ContextKind::Regression { seed: 2 * 73_939_133 }
        );
        assert_eq!(ContextKind::for_machine(3, &settings), ContextKind::Fuzzing);
    }

    #[test]
    fn regression_is_reproducible() {
        let mut a = ctx(ContextKind::Regression { seed: 7 }, Workarounds::default());
        let mut b = ctx(ContextKind::Regression { seed: 7 }, Workarounds::default());
        for _ in 0..20 {
            assert_eq!(
                a.produce_text(12, Alphabet::LongText, true),
                b.produce_text(12, Alphabet::LongText, true)
            );
        }
        assert!(a.prefer_text());
    }

    #[test]
    fn text_respects_size_and_tokens() {
        let mut c = ctx(ContextKind::Fuzzing, Workarounds::default());
        assert!(!c.prefer_text());
        for _ in 0..200 {
            let t = c.produce_text(5, Alphabet::Cloze, false);
            assert!(t.chars().count() <= 5, "{t:?}");
            assert!(!t.contains('\n'));
            assert!(!t.starts_with(|ch: char| ch.is_ascii_digit()));
        }
    }

    #[test]
    fn regression_interleaves_specials() {
        let mut c = ctx(ContextKind::Regression { seed: 1 }, Workarounds::default());
        let t = c.produce_text(9, Alphabet::LongText, false);
        assert!(t.contains('<') && t.contains('>') && t.contains('\n'), "{t:?}");
    }

    #[test]
    fn disallow_empty_answers_never_yields_blank() {
        let w = Workarounds {
            disallow_empty_answers: true,
            ..Workarounds::default()
        };
        let mut c = ctx(ContextKind::Fuzzing, w);
        for _ in 0..200 {
            assert!(!c.produce_text(3, Alphabet::Cloze, true).trim().is_empty());
        }
    }

    #[test]
    fn cloze_alphabet_honours_workarounds() {
        let w = Workarounds {
            disallow_clamps_in_cloze: true,
            disallow_dollar_in_cloze: true,
            ..Workarounds::default()
        };
        let c = ctx(ContextKind::Fuzzing, w);
        let cloze = c.alphabet(Alphabet::Cloze);
        assert!(!cloze.iter().any(|t| t == "<" || t == ">" || t == "$" || t == "$1"));
        assert!(cloze.iter().any(|t| t == "&lt;"));
        let long = c.alphabet(Alphabet::LongText);
        assert!(long.iter().any(|t| t == "\n"));
    }

    #[test]
    fn random_numbers_fit() {
        let mut c = ctx(ContextKind::Regression { seed: 3 }, Workarounds::default());
        assert_eq!(c.random_number(0), "");
        for n in 1..6 {
            for _ in 0..50 {
                let s = c.random_number(n);
                assert!(s.chars().count() <= n, "{s} longer than {n}");
            }
        }
    }

    #[test]
    fn gap_names_follow_language() {
        assert_eq!(Language::En.gap_name(2), "Gap 2");
        assert_eq!(Language::De.gap_name(1), "Lücke 1");
        assert_eq!(Language::De.answer_name(), "Antwort");
    }
}
