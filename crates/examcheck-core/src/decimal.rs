//! Fixed-point scores, exact percentages and the two rounding operations
//! used when formatting them.
//!
//! Scores carry four fractional digits, enough for quarter-point steps,
//! tenth-point maxima and the decimals the exam server accepts in its forms.
//! Percentages are kept as exact rationals so that mark lookups and rounding
//! never suffer from binary floating point error.

use std::cmp::Ordering;
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Neg, Sub};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Units per whole point.
const SCALE: i64 = 10_000;
const FRACTION_DIGITS: usize = 4;

/// A score in fixed-point representation (1/10000 points).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Score(i64);

impl Score {
    pub const ZERO: Score = Score(0);

    pub fn from_units(units: i64) -> Self {
        Score(units)
    }

    pub fn units(self) -> i64 {
        self.0
    }

    pub fn from_int(points: i64) -> Self {
        Score(points * SCALE)
    }

    /// `quarters / 4` points.
    pub fn from_quarters(quarters: i64) -> Self {
        Score(quarters * (SCALE / 4))
    }

    /// `tenths / 10` points.
    pub fn from_tenths(tenths: i64) -> Self {
        Score(tenths * (SCALE / 10))
    }

    /// `self * numerator / denominator`, truncated to the fixed-point grid.
    pub fn scaled(self, numerator: i64, denominator: i64) -> Self {
        if denominator == 0 {
            return Score::ZERO;
        }
        Score(((self.0 as i128 * numerator as i128) / denominator as i128) as i64)
    }

    pub fn clip_at_zero(self) -> Self {
        self.max(Score::ZERO)
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    /// Whole points, truncated toward zero.
    pub fn trunc(self) -> i64 {
        self.0 / SCALE
    }

    pub fn to_f64(self) -> f64 {
        self.0 as f64 / SCALE as f64
    }

    /// Parse a plain decimal like `"-1.25"`, `"3"` or `".5"`.
    ///
    /// Digits beyond the fourth fractional digit must be zero.
    pub fn parse(text: &str) -> Option<Score> {
        let text = text.trim();
        let (negative, body) = match text.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, text.strip_prefix('+').unwrap_or(text)),
        };
        let (int_part, frac_part) = match body.split_once('.') {
            Some((i, f)) => (i, f),
            None => (body, ""),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return None;
        }
        if !int_part.bytes().all(|b| b.is_ascii_digit())
            || !frac_part.bytes().all(|b| b.is_ascii_digit())
        {
            return None;
        }
        if frac_part.len() > FRACTION_DIGITS
            && frac_part[FRACTION_DIGITS..].bytes().any(|b| b != b'0')
        {
            return None;
        }

        let whole: i64 = if int_part.is_empty() {
            0
        } else {
            int_part.parse().ok()?
        };
        let mut frac: i64 = 0;
        for (i, b) in frac_part.bytes().take(FRACTION_DIGITS).enumerate() {
            frac += i64::from(b - b'0') * 10i64.pow((FRACTION_DIGITS - 1 - i) as u32);
        }
        let units = whole.checked_mul(SCALE)?.checked_add(frac)?;
        Some(Score(if negative { -units } else { units }))
    }
}

impl fmt::Display for Score {
    /// Normalized decimal: no trailing fractional zeros, no trailing dot.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let whole = abs / SCALE as u64;
        let frac = abs % SCALE as u64;
        if frac == 0 {
            return write!(f, "{sign}{whole}");
        }
        let digits = format!("{frac:0width$}", width = FRACTION_DIGITS);
        write!(f, "{sign}{whole}.{}", digits.trim_end_matches('0'))
    }
}

impl FromStr for Score {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Score::parse(s).ok_or_else(|| format!("invalid score: '{s}'"))
    }
}

impl Serialize for Score {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Score {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Int(i64),
            Float(f64),
        }
        match Raw::deserialize(deserializer)? {
            Raw::Text(s) => Score::parse(&s)
                .ok_or_else(|| serde::de::Error::custom(format!("invalid score '{s}'"))),
            Raw::Int(n) => Ok(Score::from_int(n)),
            Raw::Float(x) => Ok(Score((x * SCALE as f64).round() as i64)),
        }
    }
}

impl Add for Score {
    type Output = Score;
    fn add(self, rhs: Score) -> Score {
        Score(self.0 + rhs.0)
    }
}

impl AddAssign for Score {
    fn add_assign(&mut self, rhs: Score) {
        self.0 += rhs.0;
    }
}

impl Sub for Score {
    type Output = Score;
    fn sub(self, rhs: Score) -> Score {
        Score(self.0 - rhs.0)
    }
}

impl Neg for Score {
    type Output = Score;
    fn neg(self) -> Score {
        Score(-self.0)
    }
}

impl Sum for Score {
    fn sum<I: Iterator<Item = Score>>(iter: I) -> Score {
        iter.fold(Score::ZERO, Add::add)
    }
}

impl<'a> Sum<&'a Score> for Score {
    fn sum<I: Iterator<Item = &'a Score>>(iter: I) -> Score {
        iter.copied().sum()
    }
}

/// An exact percentage `numerator / denominator`.
#[derive(Debug, Clone, Copy)]
pub struct Percentage {
    numerator: i128,
    denominator: i128,
}

impl Percentage {
    pub const ZERO: Percentage = Percentage {
        numerator: 0,
        denominator: 1,
    };

    /// `100 * score / maximum`; zero when the maximum is zero.
    pub fn of(score: Score, maximum: Score) -> Percentage {
        if maximum.0 == 0 {
            return Percentage::ZERO;
        }
        let (mut numerator, mut denominator) = (100 * score.0 as i128, maximum.0 as i128);
        if denominator < 0 {
            numerator = -numerator;
            denominator = -denominator;
        }
        Percentage {
            numerator,
            denominator,
        }
    }

    /// Parse a threshold such as `"50"` or `"87.50"`.
    pub fn parse(text: &str) -> Option<Percentage> {
        let score = Score::parse(text)?;
        Some(Percentage {
            numerator: score.0 as i128,
            denominator: SCALE as i128,
        })
    }

    pub fn to_f64(self) -> f64 {
        self.numerator as f64 / self.denominator as f64
    }

    /// Hundredths of a percent, rounded with the given rule.
    fn hundredths(self, rounding: Rounding) -> i128 {
        let n = self.numerator * 100;
        let d = self.denominator;
        let floor = n.div_euclid(d);
        let rem = n.rem_euclid(d);
        match rounding {
            Rounding::Ceiling => {
                if rem == 0 {
                    floor
                } else {
                    floor + 1
                }
            }
            Rounding::HalfUp => {
                // half away from zero, as decimal ROUND_HALF_UP does
                if n >= 0 {
                    if rem * 2 >= d {
                        floor + 1
                    } else {
                        floor
                    }
                } else {
                    let ceil = if rem == 0 { floor } else { floor + 1 };
                    let rem_up = if rem == 0 { 0 } else { d - rem };
                    if rem_up * 2 >= d && rem != 0 {
                        ceil - 1
                    } else {
                        ceil
                    }
                }
            }
        }
    }
}

impl PartialEq for Percentage {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Percentage {}

impl PartialOrd for Percentage {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Percentage {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.numerator * other.denominator).cmp(&(other.numerator * self.denominator))
    }
}

#[derive(Debug, Clone, Copy)]
enum Rounding {
    Ceiling,
    HalfUp,
}

fn two_digit_string(hundredths: i128) -> String {
    let sign = if hundredths < 0 { "-" } else { "" };
    let abs = hundredths.unsigned_abs();
    format!("{sign}{}.{:02}", abs / 100, abs % 100)
}

/// Round toward positive infinity at two decimals, always printing both
/// decimals (`2.5` becomes `"2.50"`, `1.121` becomes `"1.13"`).
pub fn round_up_to_2_digits(score: Score) -> String {
    let p = Percentage {
        numerator: score.0 as i128,
        denominator: SCALE as i128,
    };
    two_digit_string(p.hundredths(Rounding::Ceiling))
}

/// Format a percentage rounding half-up at two decimals (`"66.67"`).
pub fn format_percentage(p: Percentage) -> String {
    two_digit_string(p.hundredths(Rounding::HalfUp))
}

/// Round a score up at two decimals, then drop trailing zeros and a
/// trailing dot (`2.50` becomes `"2.5"`, `3.00` becomes `"3"`).
pub fn format_score(score: Score) -> String {
    let s = round_up_to_2_digits(score);
    let s = s.trim_end_matches('0');
    s.trim_end_matches('.').to_string()
}

/// `100 * score / maximum`.
pub fn score_percentage(score: Score, maximum: Score) -> Percentage {
    Percentage::of(score, maximum)
}

/// Drop trailing fractional zeros of a plain decimal string.
pub fn remove_trailing_zeros(s: &str) -> String {
    if !s.contains('.') {
        return s.to_string();
    }
    let trimmed = s.trim_end_matches('0');
    trimmed.trim_end_matches('.').to_string()
}
