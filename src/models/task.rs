//! Location tasks and their stable identifiers.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Requested survey number or fragment of one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SurveyFilter(String);

impl SurveyFilter {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First integer embedded in the filter, used for nearest-number matching.
    pub fn target_number(&self) -> Option<u64> {
        embedded_number(&self.0)
    }
}

/// First run of ASCII digits (after glyph normalization) parsed as a number.
pub fn embedded_number(text: &str) -> Option<u64> {
    let normalized = crate::locale::normalize_numeric(text);
    let digits: String = normalized
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

/// Stable identifier for a [`LocationTask`]; also used as a file stem.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Rebuild an id read back from storage.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One district/taluka/village unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationTask {
    pub district: String,
    pub taluka: String,
    pub village: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub survey: Option<SurveyFilter>,
    /// Display label of the village from the catalogue, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub village_label: Option<String>,
}

impl LocationTask {
    pub fn new(
        district: impl Into<String>,
        taluka: impl Into<String>,
        village: impl Into<String>,
    ) -> Self {
        Self {
            district: district.into(),
            taluka: taluka.into(),
            village: village.into(),
            survey: None,
            village_label: None,
        }
    }

    pub fn with_survey(mut self, survey: Option<SurveyFilter>) -> Self {
        self.survey = survey;
        self
    }

    pub fn with_village_label(mut self, label: impl Into<String>) -> Self {
        self.village_label = Some(label.into());
        self
    }

    /// Deterministic id: `district_taluka_village`, plus a short digest of
    /// the survey filter when one is set. Labels never affect the id.
    pub fn id(&self) -> TaskId {
        let mut id = format!(
            "{}_{}_{}",
            sanitize(&self.district),
            sanitize(&self.taluka),
            sanitize(&self.village)
        );
        if let Some(survey) = &self.survey {
            let digest = Sha256::digest(survey.as_str().as_bytes());
            id.push_str("_s");
            id.push_str(&hex::encode(&digest[..5]));
        }
        TaskId(id)
    }
}

fn sanitize(code: &str) -> String {
    code.trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_is_deterministic() {
        let a = LocationTask::new("02", "07", "041");
        let b = LocationTask::new("02", "07", "041").with_village_label("ભાડોલ");
        assert_eq!(a.id(), b.id());
        assert_eq!(a.id().as_str(), "02_07_041");
    }

    #[test]
    fn survey_filter_changes_id() {
        let plain = LocationTask::new("02", "07", "041");
        let filtered = plain.clone().with_survey(Some(SurveyFilter::new("123")));
        let other = plain.clone().with_survey(Some(SurveyFilter::new("124")));
        assert_ne!(plain.id(), filtered.id());
        assert_ne!(filtered.id(), other.id());
        assert!(filtered.id().as_str().starts_with("02_07_041_s"));
    }

    #[test]
    fn id_is_file_safe() {
        let task = LocationTask::new("0 2", "07/x", "..");
        assert!(!task.id().as_str().contains('/'));
        assert!(!task.id().as_str().contains(' '));
    }

    #[test]
    fn embedded_numbers() {
        assert_eq!(embedded_number("૧૨૩/અ"), Some(123));
        assert_eq!(embedded_number("Survey 45 p"), Some(45));
        assert_eq!(embedded_number("none"), None);
        assert_eq!(SurveyFilter::new(" 77 ").target_number(), Some(77));
    }
}
