//! Implicit text-to-number coercions of the exam server.
//!
//! The server and its spreadsheet export both reformat text that looks like a
//! number, each in its own way. Expected values are pushed through the same
//! coercion on both sides before they are compared.

/// `[+-]?(d+ | d+. | .d+ | d+.d+)`
pub fn looks_like_a_number(value: &str) -> bool {
    let body = value
        .strip_prefix('+')
        .or_else(|| value.strip_prefix('-'))
        .unwrap_or(value);
    let (int_part, frac_part) = match body.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (body, None),
    };
    let digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    match frac_part {
        None => !int_part.is_empty() && digits(int_part),
        Some(frac) => {
            (!int_part.is_empty() || !frac.is_empty()) && digits(int_part) && digits(frac)
        }
    }
}

fn strip_fraction_zeros(mut value: String) -> String {
    while value.ends_with('0') && value.matches('.').count() == 1 && !value.ends_with(".0") {
        value.pop();
    }
    value
}

/// Coercion the server applies when it stores a cloze text answer.
///
/// `+9` becomes `9`, `0.6370` becomes `0.637`, `13.` becomes `13`, `.17`
/// becomes `0.17` and `5.0` becomes `5`.
pub fn implicit_text_to_number(value: &str) -> String {
    let mut value = value.to_string();
    if value.len() >= 2 && value.starts_with('+') && looks_like_a_number(&value[1..]) {
        value.remove(0);
    }
    if !looks_like_a_number(&value) {
        return value;
    }

    let value = strip_fraction_zeros(value);
    if let Some(int) = value.strip_suffix('.') {
        // "-." never reaches here, it is not a number
        if looks_like_a_number(int) && !int.contains('.') {
            return int.to_string();
        }
    }
    if value.len() >= 2 && value.starts_with('.') {
        return format!("0{value}");
    }
    if let Some(int) = value.strip_suffix(".0") {
        return int.to_string();
    }
    value
}

/// Coercion the spreadsheet export applies to any cell value.
///
/// Values that parse as floats go through a float round-trip first
/// (`3E6` becomes `3000000.0`). Then trailing zeros are dropped, leading-dot
/// values gain a trailing zero (`.948` becomes `.9480`) and zero variants
/// collapse to `0`.
pub fn implicit_text_to_number_xls(value: &str) -> String {
    let mut value = match parse_float_like_server(value) {
        Some(x) => float_repr(x),
        None => value.to_string(),
    };

    if looks_like_a_number(&value) {
        value = strip_fraction_zeros(value);
        if value.len() >= 2 && value.starts_with('.') && !value.ends_with('0') {
            value.push('0');
        }
        if value == "0.0" || value == "-0.0" || value == "-0" {
            value = "0".to_string();
        }
    }
    value
}

/// Float parsing as done by the export pipeline: surrounding whitespace is
/// tolerated, non-finite spellings are not.
fn parse_float_like_server(value: &str) -> Option<f64> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    let x: f64 = trimmed.parse().ok()?;
    x.is_finite().then_some(x)
}

/// Shortest round-trip representation of `x`, positional for exponents in
/// `-4..16` (always with a fractional part) and scientific otherwise, e.g.
/// `3000000.0`, `0.0001`, `1e-05`, `1e+16`.
pub fn float_repr(x: f64) -> String {
    let sci = format!("{x:e}");
    let (mantissa, exp) = match sci.split_once('e') {
        Some((m, e)) => (m, e.parse::<i32>().unwrap_or(0)),
        None => (sci.as_str(), 0),
    };
    let negative = mantissa.starts_with('-');
    let digits: String = mantissa.chars().filter(|c| c.is_ascii_digit()).collect();
    let sign = if negative { "-" } else { "" };

    if (-4..16).contains(&exp) {
        let point = exp + 1;
        let s = if point <= 0 {
            format!("0.{}{}", "0".repeat((-point) as usize), digits)
        } else if point as usize >= digits.len() {
            format!(
                "{}{}.0",
                digits,
                "0".repeat(point as usize - digits.len())
            )
        } else {
            let (a, b) = digits.split_at(point as usize);
            format!("{a}.{b}")
        };
        format!("{sign}{s}")
    } else {
        let (head, tail) = digits.split_at(1);
        let m = if tail.is_empty() {
            head.to_string()
        } else {
            format!("{head}.{tail}")
        };
        let esign = if exp < 0 { '-' } else { '+' };
        format!("{sign}{m}e{esign}{:02}", exp.abs())
    }
}

/// Format with 16 significant digits in the style of `%.16g`.
pub fn format_g16(x: f64) -> String {
    if x == 0.0 {
        return if x.is_sign_negative() { "-0" } else { "0" }.to_string();
    }
    let sci = format!("{x:.15e}");
    let (mantissa, exp) = match sci.split_once('e') {
        Some((m, e)) => (m.to_string(), e.parse::<i32>().unwrap_or(0)),
        None => (sci.clone(), 0),
    };
    if (-4..16).contains(&exp) {
        let decimals = (15 - exp).max(0) as usize;
        let s = format!("{x:.decimals$}");
        if s.contains('.') {
            let s = s.trim_end_matches('0');
            s.trim_end_matches('.').to_string()
        } else {
            s
        }
    } else {
        let m = if mantissa.contains('.') {
            let m = mantissa.trim_end_matches('0');
            m.trim_end_matches('.').to_string()
        } else {
            mantissa
        };
        let esign = if exp < 0 { '-' } else { '+' };
        format!("{m}e{esign}{:02}", exp.abs())
    }
}

/// Parse a numeric answer and truncate it through `%.16g`, the precision the
/// server compares numeric gaps with.
pub fn numeric_answer_value(text: &str) -> Option<f64> {
    let x: f64 = text.trim().parse().ok()?;
    if !x.is_finite() {
        return None;
    }
    format_g16(x).parse().ok()
}
