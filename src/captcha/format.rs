//! Syntactic checks on recognized captcha text.

use serde::{Deserialize, Serialize};

/// Subscript and superscript digits recognizers like to emit.
const DIGIT_CONFUSABLES: &[(char, char)] = &[
    ('₀', '0'),
    ('₁', '1'),
    ('₂', '2'),
    ('₃', '3'),
    ('₄', '4'),
    ('₅', '5'),
    ('₆', '6'),
    ('₇', '7'),
    ('₈', '8'),
    ('₉', '9'),
    ('⁰', '0'),
    ('¹', '1'),
    ('²', '2'),
    ('³', '3'),
    ('⁴', '4'),
    ('⁵', '5'),
    ('⁶', '6'),
    ('⁷', '7'),
    ('⁸', '8'),
    ('⁹', '9'),
];

/// Letters that only stand for digits when the captcha is known to be numeric.
const LETTER_CONFUSABLES: &[(char, char)] = &[
    ('θ', '0'),
    ('O', '0'),
    ('o', '0'),
    ('D', '0'),
    ('I', '1'),
    ('l', '1'),
    ('|', '1'),
    ('Z', '2'),
    ('S', '5'),
    ('B', '8'),
];

/// Shape of the text the portal expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptchaFormat {
    /// Exact length, or `None` for "any non-empty".
    pub expected_length: Option<usize>,
    /// Digits only.
    pub numeric_only: bool,
}

impl Default for CaptchaFormat {
    fn default() -> Self {
        Self {
            expected_length: Some(6),
            numeric_only: true,
        }
    }
}

impl CaptchaFormat {
    /// Fold confusable glyphs and drop everything that is not ASCII alphanumeric.
    pub fn clean(&self, raw: &str) -> String {
        raw.chars()
            .filter_map(|c| {
                if let Some((_, d)) = DIGIT_CONFUSABLES.iter().find(|(g, _)| *g == c) {
                    return Some(*d);
                }
                if self.numeric_only {
                    if let Some((_, d)) = LETTER_CONFUSABLES.iter().find(|(g, _)| *g == c) {
                        return Some(*d);
                    }
                    return c.is_ascii_digit().then_some(c);
                }
                c.is_ascii_alphanumeric().then_some(c)
            })
            .collect()
    }

    pub fn is_valid(&self, cleaned: &str) -> bool {
        if cleaned.is_empty() {
            return false;
        }
        if self.numeric_only && !cleaned.chars().all(|c| c.is_ascii_digit()) {
            return false;
        }
        match self.expected_length {
            Some(len) => cleaned.chars().count() == len,
            None => cleaned.chars().all(|c| c.is_ascii_alphanumeric()),
        }
    }

    /// Cleaned text if it passes the shape check.
    pub fn accept(&self, raw: &str) -> Option<String> {
        let cleaned = self.clean(raw);
        self.is_valid(&cleaned).then_some(cleaned)
    }
}
