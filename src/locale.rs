//! Locale normalization for the portal's Gujarati text.
//!
//! Everything here is total: malformed input yields empty values, never
//! an error, so a single bad field cannot abort a record.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Square meters to square yards.
pub const SQ_YARDS_PER_SQ_METER: f64 = 1.19599;

/// Native digit glyphs and their ASCII equivalents.
pub const DIGIT_GLYPHS: &[(char, char)] = &[
    // Gujarati
    ('૦', '0'),
    ('૧', '1'),
    ('૨', '2'),
    ('૩', '3'),
    ('૪', '4'),
    ('૫', '5'),
    ('૬', '6'),
    ('૭', '7'),
    ('૮', '8'),
    ('૯', '9'),
    // Devanagari (occasionally mixed into entry lists)
    ('०', '0'),
    ('१', '1'),
    ('२', '2'),
    ('३', '3'),
    ('४', '4'),
    ('५', '5'),
    ('६', '6'),
    ('७', '7'),
    ('८', '8'),
    ('९', '9'),
];

/// The portal's font renders "5" with the letter pa in numeric columns.
const NUMERIC_LOOKALIKES: &[(char, char)] = &[('પ', '5')];

fn digit_for(c: char) -> Option<char> {
    DIGIT_GLYPHS
        .iter()
        .find(|(glyph, _)| *glyph == c)
        .map(|(_, ascii)| *ascii)
}

/// Map every native digit glyph to ASCII, leaving other characters alone.
pub fn to_ascii_digits(text: &str) -> String {
    text.chars().map(|c| digit_for(c).unwrap_or(c)).collect()
}

/// Like [`to_ascii_digits`], but also folds glyphs that only stand for
/// digits inside numeric columns. Never apply this to names.
pub fn normalize_numeric(text: &str) -> String {
    text.chars()
        .map(|c| {
            digit_for(c)
                .or_else(|| {
                    NUMERIC_LOOKALIKES
                        .iter()
                        .find(|(glyph, _)| *glyph == c)
                        .map(|(_, ascii)| *ascii)
                })
                .unwrap_or(c)
        })
        .collect()
}

/// Parsed hectare-are-square-meter area.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AreaTriple {
    pub hectare: Option<u64>,
    pub are: Option<u64>,
    pub sqm: Option<u64>,
    pub total_sqm: Option<u64>,
    pub sq_yard: Option<f64>,
}

impl AreaTriple {
    pub fn is_empty(&self) -> bool {
        self.total_sqm.is_none()
    }
}

static AREA_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(\d+)\s*-\s*(\d+)\s*-\s*(\d+)").unwrap());

static CURRENCY_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:રુ|રૂ|Rs)\.?\s*([0-9][0-9,]*)").unwrap());

static DECIMAL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+(?:\.\d+)?)").unwrap());

static LABEL_CODE_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*-\s*\d+\s*$").unwrap());

/// Parse an `H-A-M` area string such as `૦-૫૬-૬૬`.
pub fn parse_area_triple(text: &str) -> AreaTriple {
    let normalized = normalize_numeric(text);
    let Some(caps) = AREA_PATTERN.captures(&normalized) else {
        return AreaTriple::default();
    };

    let parse = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u64>().ok());
    let (Some(hectare), Some(are), Some(sqm)) = (parse(1), parse(2), parse(3)) else {
        return AreaTriple::default();
    };

    let total = hectare
        .saturating_mul(10_000)
        .saturating_add(are.saturating_mul(100))
        .saturating_add(sqm);
    let sq_yard = (total as f64 * SQ_YARDS_PER_SQ_METER * 100.0).round() / 100.0;

    AreaTriple {
        hectare: Some(hectare),
        are: Some(are),
        sqm: Some(sqm),
        total_sqm: Some(total),
        sq_yard: Some(sq_yard),
    }
}

/// Extract the rupee amount that follows a currency marker.
pub fn parse_currency(text: &str) -> Option<u64> {
    let normalized = normalize_numeric(text);
    let caps = CURRENCY_PATTERN.captures(&normalized)?;
    let digits: String = caps[1].chars().filter(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

/// Extract a decimal amount (e.g. an assessment of `૧૨.૩૪`).
pub fn parse_decimal(text: &str) -> Option<f64> {
    let normalized = normalize_numeric(text);
    DECIMAL_PATTERN
        .captures(&normalized)
        .and_then(|caps| caps[1].parse().ok())
}

/// Strip the `- <code>` suffix the portal appends to some labels.
pub fn clean_label(text: &str) -> String {
    LABEL_CODE_SUFFIX.replace(text.trim(), "").trim().to_string()
}

/// True if the text is made only of digits, commas, pipes, dashes and whitespace.
pub fn is_numeric_noise(text: &str) -> bool {
    let normalized = normalize_numeric(text);
    !normalized.trim().is_empty()
        && normalized
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, ',' | '|' | '-') || c.is_whitespace())
}
