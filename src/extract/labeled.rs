//! Label/value pairs recovered from the full page text.
//!
//! Used only to fill fields the driver could not read from labeled
//! elements directly.

use std::sync::LazyLock;

use regex::Regex;

use crate::models::LabeledFields;

struct FieldPattern {
    regex: Regex,
    assign: fn(&mut LabeledFields, String),
}

fn pattern(re: &str, assign: fn(&mut LabeledFields, String)) -> FieldPattern {
    FieldPattern {
        regex: Regex::new(re).unwrap(),
        assign,
    }
}

static FIELD_PATTERNS: LazyLock<Vec<FieldPattern>> = LazyLock::new(|| {
    vec![
        pattern(
            r"તા\.?\s*([0-9૦-૯/]+\s*[0-9૦-૯:]+)\s*ની સ્થિતિએ",
            |f, v| f.data_status_time = Some(v),
        ),
        pattern(r"(?i)UPIN[^:：\n]*[:：)]\s*([A-Z]{2}[0-9]+)", |f, v| {
            f.upin = Some(v)
        }),
        pattern(r"જુનો સરવે નંબર[^:：\n]*[:：]\s*([^\n]+)", |f, v| {
            f.old_survey_number = Some(v)
        }),
        pattern(r"સત્તાપ્રકાર[^:：\n]*[:：]\s*([^\n]+)", |f, v| {
            f.tenure = Some(v)
        }),
        pattern(r"જમીનનો ઉપયોગ[^:：\n]*[:：]\s*([^\n]+)", |f, v| {
            f.land_use = Some(v)
        }),
        pattern(r"ખેતરનું નામ[^:：\n]*[:：]\s*([^\n]+)", |f, v| {
            f.farm_name = Some(v)
        }),
        pattern(r"રીમાર્ક્સ[^:：\n]*[:：]\s*([^\n]+)", |f, v| {
            f.remarks = Some(v)
        }),
        pattern(
            r"કુલ ક્ષેત્રફળ[^:：]*[:：]\s*([0-9૦-૯પ]+-[0-9૦-૯પ]+-[0-9૦-૯પ]+)",
            |f, v| f.total_area = Some(v),
        ),
        pattern(r"કુલ આકાર[^:：]*[:：]\s*([0-9૦-૯પ.]+)", |f, v| {
            f.assessment_tax = Some(v)
        }),
    ]
});

/// Values the portal prints as placeholders for "nothing".
fn is_placeholder(value: &str) -> bool {
    value.is_empty() || value.chars().all(|c| c == '-')
}

/// Recover labeled fields from the page text.
pub fn fields_from_page_text(text: &str) -> LabeledFields {
    let mut fields = LabeledFields::default();
    for pattern in FIELD_PATTERNS.iter() {
        if let Some(caps) = pattern.regex.captures(text) {
            let value = caps[1].trim().to_string();
            if !is_placeholder(&value) {
                (pattern.assign)(&mut fields, value);
            }
        }
    }
    fields
}
