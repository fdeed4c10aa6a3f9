//! Raw page capture handed from the session driver to the extractor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::record::NamedCode;
use super::task::TaskId;

/// Which results table a text block came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableKind {
    /// Holders of the khata (ownership folio).
    Ownership,
    /// Liens, charges and other rights (બોજા અને બીજા હક્ક).
    Encumbrance,
    Other,
}

impl TableKind {
    /// Tag a table by its header text, falling back to its position on the page.
    pub fn infer(text: &str, position: usize) -> Self {
        if text.contains("બોજા") || text.contains("બીજા હક્ક") {
            TableKind::Encumbrance
        } else if text.contains("ખાતેદાર") || text.contains("ખાતા નંબર") {
            TableKind::Ownership
        } else {
            match position {
                0 => TableKind::Ownership,
                1 => TableKind::Encumbrance,
                _ => TableKind::Other,
            }
        }
    }
}

/// Text of one results table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableBlock {
    pub kind: TableKind,
    pub text: String,
}

/// Values read from labeled elements on the results page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LabeledFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_status_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub survey_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_survey_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_survey_notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub khata_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_area: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assessment_tax: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenure: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub land_use: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub farm_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remarks: Option<String>,
}

impl LabeledFields {
    /// Field by its serialized name, for config-driven capture.
    pub fn slot_mut(&mut self, name: &str) -> Option<&mut Option<String>> {
        Some(match name {
            "data_status_time" => &mut self.data_status_time,
            "upin" => &mut self.upin,
            "survey_number" => &mut self.survey_number,
            "old_survey_number" => &mut self.old_survey_number,
            "old_survey_notes" => &mut self.old_survey_notes,
            "khata_number" => &mut self.khata_number,
            "total_area" => &mut self.total_area,
            "assessment_tax" => &mut self.assessment_tax,
            "tenure" => &mut self.tenure,
            "land_use" => &mut self.land_use,
            "farm_name" => &mut self.farm_name,
            "remarks" => &mut self.remarks,
            _ => return None,
        })
    }

    /// Fill fields that are still absent from `other`; present values win.
    pub fn fill_missing(&mut self, other: LabeledFields) {
        fn fill(slot: &mut Option<String>, value: Option<String>) {
            if slot.as_deref().map_or(true, |s| s.trim().is_empty()) {
                if let Some(v) = value.filter(|v| !v.trim().is_empty()) {
                    *slot = Some(v);
                }
            }
        }

        fill(&mut self.data_status_time, other.data_status_time);
        fill(&mut self.upin, other.upin);
        fill(&mut self.survey_number, other.survey_number);
        fill(&mut self.old_survey_number, other.old_survey_number);
        fill(&mut self.old_survey_notes, other.old_survey_notes);
        fill(&mut self.khata_number, other.khata_number);
        fill(&mut self.total_area, other.total_area);
        fill(&mut self.assessment_tax, other.assessment_tax);
        fill(&mut self.tenure, other.tenure);
        fill(&mut self.land_use, other.land_use);
        fill(&mut self.farm_name, other.farm_name);
        fill(&mut self.remarks, other.remarks);
    }
}

/// The hierarchy that was actually selected on the form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SelectedLocation {
    pub district: NamedCode,
    pub taluka: NamedCode,
    pub village: NamedCode,
    pub survey: NamedCode,
}

/// Everything captured from a page the driver classified as a result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawHarvest {
    pub task_id: TaskId,
    pub location: SelectedLocation,
    #[serde(default)]
    pub tables: Vec<TableBlock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_text: Option<String>,
    #[serde(default)]
    pub fields: LabeledFields,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    pub captured_at: DateTime<Utc>,
}

impl RawHarvest {
    pub fn new(task_id: TaskId, location: SelectedLocation) -> Self {
        Self {
            task_id,
            location,
            tables: Vec::new(),
            page_text: None,
            fields: LabeledFields::default(),
            source_url: None,
            captured_at: Utc::now(),
        }
    }

    /// First table of the given kind.
    pub fn table(&self, kind: TableKind) -> Option<&str> {
        self.tables
            .iter()
            .find(|t| t.kind == kind)
            .map(|t| t.text.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infers_table_kind_from_header() {
        assert_eq!(
            TableKind::infer("બોજા અને બીજા હક્ક\n---", 0),
            TableKind::Encumbrance
        );
        assert_eq!(TableKind::infer("ખાતા નંબર ...", 1), TableKind::Ownership);
        assert_eq!(TableKind::infer("plain", 1), TableKind::Encumbrance);
        assert_eq!(TableKind::infer("plain", 4), TableKind::Other);
    }

    #[test]
    fn fill_missing_keeps_present_values() {
        let mut dom = LabeledFields {
            upin: Some("GJ123".into()),
            tenure: Some("  ".into()),
            ..Default::default()
        };
        dom.fill_missing(LabeledFields {
            upin: Some("GJ999".into()),
            tenure: Some("જુની શરત".into()),
            remarks: Some("".into()),
            ..Default::default()
        });
        assert_eq!(dom.upin.as_deref(), Some("GJ123"));
        assert_eq!(dom.tenure.as_deref(), Some("જુની શરત"));
        assert_eq!(dom.remarks, None);
    }

    #[test]
    fn config_names_address_fields() {
        let mut fields = LabeledFields::default();
        *fields.slot_mut("khata_number").unwrap() = Some("32".into());
        assert_eq!(fields.khata_number.as_deref(), Some("32"));
        assert!(fields.slot_mut("owner").is_none());
    }
}
