//! Record extraction: raw harvest in, structured record out.
//!
//! Extraction is a total function. Missing tables, malformed lines and
//! unknown phrases degrade to empty fields; nothing here returns an error.

mod classify;
mod encumbrance;
mod labeled;
mod ownership;

pub use classify::{classify_encumbrance, classify_land_use, classify_tenure, land_type};
pub use encumbrance::{parse_encumbrance_table, EncumbranceTable};
pub use labeled::fields_from_page_text;
pub use ownership::{parse_owner, parse_ownership_table, OwnershipTable};

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::locale::{normalize_numeric, parse_area_triple};
use crate::models::{
    LandDetails, PropertyIdentity, RawHarvest, RecordLocation, RecordMeta, StructuredRecord,
    TableKind,
};

pub const DEFAULT_PORTAL_NAME: &str = "AnyROR Rural Land Record";
pub const RECORD_TYPE: &str = "VF-7";

static NUMERIC_LIST: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[0-9,\s]+$").unwrap());

/// Divider between a table's header block and its rows.
pub(crate) fn is_divider(line: &str) -> bool {
    line.contains("---")
}

/// Numbers of a comma separated list line such as `૭,૧૮૬,પ૮૩,`.
pub(crate) fn numeric_list(line: &str) -> Option<Vec<String>> {
    let normalized = normalize_numeric(line);
    if !NUMERIC_LIST.is_match(&normalized) {
        return None;
    }
    let numbers: Vec<String> = normalized
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    (!numbers.is_empty()).then_some(numbers)
}

/// Converts a [`RawHarvest`] into a [`StructuredRecord`].
#[derive(Debug, Clone)]
pub struct RecordExtractor {
    portal_name: String,
}

impl Default for RecordExtractor {
    fn default() -> Self {
        Self::new(DEFAULT_PORTAL_NAME)
    }
}

impl RecordExtractor {
    pub fn new(portal_name: impl Into<String>) -> Self {
        Self {
            portal_name: portal_name.into(),
        }
    }

    pub fn extract(&self, harvest: &RawHarvest) -> StructuredRecord {
        // Labeled elements first, page-text patterns fill the gaps.
        let mut fields = harvest.fields.clone();
        if let Some(text) = harvest.page_text.as_deref() {
            fields.fill_missing(fields_from_page_text(text));
        }

        let ownership = harvest
            .table(TableKind::Ownership)
            .map(parse_ownership_table)
            .unwrap_or_default();
        let encumbrances = harvest
            .table(TableKind::Encumbrance)
            .map(parse_encumbrance_table)
            .unwrap_or_default();

        // Table reconstruction is only a fallback for labeled values.
        let area_raw = non_empty(fields.total_area.clone()).or(ownership.area_raw.clone());
        let area = area_raw
            .as_deref()
            .map(parse_area_triple)
            .unwrap_or_default();
        let assessment_tax = non_empty(fields.assessment_tax.clone())
            .map(|a| normalize_numeric(a.trim()))
            .or(ownership.assessment.clone());

        let tenure = non_empty(fields.tenure.clone()).map(|t| classify_tenure(&t));
        let land_use = non_empty(fields.land_use.clone()).map(|u| classify_land_use(&u));

        let table_text: String = harvest
            .tables
            .iter()
            .map(|t| t.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        let khata_number = non_empty(fields.khata_number.clone())
            .map(|k| normalize_numeric(k.trim()))
            .or(ownership.khata_number.clone());

        let survey_number = if harvest.location.survey.name.trim().is_empty() {
            fields.survey_number.clone().unwrap_or_default()
        } else {
            harvest.location.survey.name.trim().to_string()
        };

        let entry_numbers = dedup_in_order(
            ownership
                .entry_numbers
                .iter()
                .chain(&encumbrances.entry_numbers)
                .chain(ownership.owners.iter().filter_map(|o| o.entry_number.as_ref()))
                .chain(encumbrances.encumbrances.iter().map(|e| &e.entry_number)),
        );

        let mut location = RecordLocation {
            district: harvest.location.district.clone(),
            taluka: harvest.location.taluka.clone(),
            village: harvest.location.village.clone(),
        };
        location.village.name = crate::locale::clean_label(&location.village.name);

        let record = StructuredRecord {
            meta: RecordMeta {
                portal: self.portal_name.clone(),
                record_type: RECORD_TYPE.to_string(),
                task_id: harvest.task_id.clone(),
                source_url: harvest.source_url.clone(),
                captured_at: harvest.captured_at,
                data_status_time: non_empty(fields.data_status_time.clone()),
                owner_count: ownership.owners.len(),
                encumbrance_count: encumbrances.encumbrances.len(),
            },
            location,
            property_identity: PropertyIdentity {
                survey_number,
                upin: non_empty(fields.upin.clone()),
                old_survey_number: non_empty(fields.old_survey_number.clone()),
                old_survey_notes: non_empty(fields.old_survey_notes.clone()),
                khata_number,
                land_type: land_type(tenure.as_ref(), land_use.as_ref(), &table_text),
            },
            land_details: LandDetails {
                area_raw,
                area,
                assessment_tax,
                tenure,
                land_use,
                farm_name: non_empty(fields.farm_name.clone()),
                remarks: non_empty(fields.remarks.clone()),
            },
            owners: ownership.owners,
            encumbrances: encumbrances.encumbrances,
            entry_numbers,
        };

        debug!(
            task = %record.meta.task_id,
            owners = record.meta.owner_count,
            encumbrances = record.meta.encumbrance_count,
            "Extracted record"
        );

        record
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn dedup_in_order<'a>(items: impl Iterator<Item = &'a String>) -> Vec<String> {
    let mut seen = HashSet::new();
    items
        .filter(|item| seen.insert(item.as_str()))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        LabeledFields, LandType, NamedCode, OwnershipType, SelectedLocation, TableBlock, TaskId,
    };

    fn harvest() -> RawHarvest {
        let mut harvest = RawHarvest::new(
            TaskId::from_raw("02_07_041"),
            SelectedLocation {
                district: NamedCode::new("02", "અમદાવાદ"),
                taluka: NamedCode::new("07", "દસક્રોઈ"),
                village: NamedCode::new("041", "ભાડોલ - 41"),
                survey: NamedCode::new("123", "૧૨૩"),
            },
        );
        harvest.tables = vec![
            TableBlock {
                kind: TableKind::Ownership,
                text: include_str!("../../tests/fixtures/ownership_table.txt").to_string(),
            },
            TableBlock {
                kind: TableKind::Encumbrance,
                text: include_str!("../../tests/fixtures/encumbrance_table.txt").to_string(),
            },
        ];
        harvest.page_text = Some(include_str!("../../tests/fixtures/result_page.txt").to_string());
        harvest
    }

    #[test]
    fn extracts_full_record() {
        let record = RecordExtractor::default().extract(&harvest());

        assert_eq!(record.meta.task_id.as_str(), "02_07_041");
        assert_eq!(record.meta.record_type, "VF-7");
        assert_eq!(record.meta.owner_count, 6);
        assert_eq!(record.meta.encumbrance_count, 4);
        assert_eq!(
            record.meta.data_status_time.as_deref(),
            Some("૧૨/૦૩/૨૦૨૪ ૧૦:૩૦")
        );

        assert_eq!(record.location.village.name, "ભાડોલ");
        assert_eq!(record.property_identity.survey_number, "૧૨૩");
        assert_eq!(record.property_identity.khata_number.as_deref(), Some("32"));
        assert_eq!(record.property_identity.upin.as_deref(), Some("GJ0207041123"));
        assert_eq!(record.property_identity.land_type, LandType::Agriculture);

        assert_eq!(record.land_details.area.total_sqm, Some(5666));
        assert_eq!(record.land_details.assessment_tax.as_deref(), Some("7.00"));
        let tenure = record.land_details.tenure.as_ref().unwrap();
        assert_eq!(tenure.classified, "Old Tenure");
        assert_eq!(tenure.raw, "જુની શરત");
        assert_eq!(
            record.land_details.land_use.as_ref().unwrap().classified,
            "Agricultural"
        );

        assert_eq!(record.owners[2].ownership_type, OwnershipType::Guardian);
    }

    #[test]
    fn entry_numbers_are_deduplicated_in_order() {
        let record = RecordExtractor::default().extract(&harvest());
        assert_eq!(
            record.entry_numbers,
            vec!["7", "186", "583", "632", "651", "895", "1048", "1120", "1130", "1140"]
        );
    }

    #[test]
    fn labeled_fields_win_over_tables() {
        let mut harvest = harvest();
        harvest.fields = LabeledFields {
            total_area: Some("૧-૦૦-૦૦".into()),
            assessment_tax: Some("૯૯.૫૦".into()),
            ..Default::default()
        };
        let record = RecordExtractor::default().extract(&harvest);
        assert_eq!(record.land_details.area.total_sqm, Some(10_000));
        assert_eq!(record.land_details.assessment_tax.as_deref(), Some("99.50"));
    }

    #[test]
    fn table_fallback_when_labels_missing() {
        let mut harvest = harvest();
        harvest.page_text = None;
        let record = RecordExtractor::default().extract(&harvest);
        assert_eq!(record.land_details.area_raw.as_deref(), Some("૦-પ૬-૬૬"));
        assert_eq!(record.land_details.area.total_sqm, Some(5666));
        assert_eq!(record.land_details.assessment_tax.as_deref(), Some("7.00"));
        assert_eq!(record.land_details.tenure, None);
    }

    #[test]
    fn empty_harvest_gives_defaulted_record() {
        let harvest = RawHarvest::new(TaskId::from_raw("x"), SelectedLocation::default());
        let record = RecordExtractor::default().extract(&harvest);
        assert!(record.owners.is_empty());
        assert!(record.entry_numbers.is_empty());
        assert!(record.land_details.area.is_empty());
        assert_eq!(record.property_identity.land_type, LandType::Unknown);
        assert!(!record.has_content());
    }

    #[test]
    fn serializes_with_camel_case_names() {
        let record = RecordExtractor::default().extract(&harvest());
        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("propertyIdentity").is_some());
        assert!(json["landDetails"].get("totalSqm").is_some());
        assert_eq!(json["encumbrances"][0]["type"], "bank_lien");
        assert_eq!(json["owners"][2]["ownershipType"], "guardian");
        assert!(json.get("entryNumbers").is_some());
    }

    #[test]
    fn numeric_list_lines() {
        assert_eq!(
            numeric_list("૧૦,૨પ,"),
            Some(vec!["10".to_string(), "25".to_string()])
        );
        assert_eq!(numeric_list("ખાતા ૧"), None);
        assert_eq!(numeric_list(", ,"), None);
    }
}
