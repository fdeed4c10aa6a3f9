//! Location catalogue: every district, taluka and village the portal offers.
//!
//! Stored as JSON:
//! `{"districts":[{"value","label","talukas":[{"value","label","villages":[{"value","label"}]}]}]}`

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::task::{LocationTask, SurveyFilter};
use crate::locale::clean_label;

#[derive(Debug, Error)]
pub enum CatalogueError {
    #[error("failed to read catalogue: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid catalogue document: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("district {0} not found in catalogue")]
    UnknownDistrict(String),

    #[error("taluka {taluka} not found in district {district}")]
    UnknownTaluka { district: String, taluka: String },
}

/// A leaf entry (village) or the shared code/label pair of any level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogueNode {
    pub value: String,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TalukaNode {
    pub value: String,
    pub label: String,
    #[serde(default)]
    pub villages: Vec<CatalogueNode>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistrictNode {
    pub value: String,
    pub label: String,
    #[serde(default)]
    pub talukas: Vec<TalukaNode>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalogue {
    #[serde(default)]
    pub districts: Vec<DistrictNode>,
}

impl Catalogue {
    pub fn load(path: &Path) -> Result<Self, CatalogueError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, CatalogueError> {
        Ok(serde_json::from_str(content)?)
    }

    pub fn district(&self, code: &str) -> Option<&DistrictNode> {
        self.districts.iter().find(|d| d.value == code)
    }

    pub fn village_count(&self) -> usize {
        self.districts
            .iter()
            .flat_map(|d| &d.talukas)
            .map(|t| t.villages.len())
            .sum()
    }

    /// Expand a district (optionally narrowed to talukas and villages) into
    /// one task per village, in catalogue order.
    pub fn expand(
        &self,
        district: &str,
        talukas: &[String],
        villages: &[String],
        survey: Option<&SurveyFilter>,
    ) -> Result<Vec<LocationTask>, CatalogueError> {
        let node = self
            .district(district)
            .ok_or_else(|| CatalogueError::UnknownDistrict(district.to_string()))?;

        for wanted in talukas {
            if !node.talukas.iter().any(|t| &t.value == wanted) {
                return Err(CatalogueError::UnknownTaluka {
                    district: district.to_string(),
                    taluka: wanted.clone(),
                });
            }
        }

        let taluka_filter: HashSet<&str> = talukas.iter().map(String::as_str).collect();
        let village_filter: HashSet<&str> = villages.iter().map(String::as_str).collect();

        let mut tasks = Vec::new();
        for taluka in &node.talukas {
            if !taluka_filter.is_empty() && !taluka_filter.contains(taluka.value.as_str()) {
                continue;
            }
            for village in &taluka.villages {
                if !village_filter.is_empty() && !village_filter.contains(village.value.as_str()) {
                    continue;
                }
                tasks.push(
                    LocationTask::new(&node.value, &taluka.value, &village.value)
                        .with_survey(survey.cloned())
                        .with_village_label(clean_label(&village.label)),
                );
            }
        }

        Ok(tasks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "districts": [
            {"value": "02", "label": "અમદાવાદ", "talukas": [
                {"value": "01", "label": "દસક્રોઈ", "villages": [
                    {"value": "001", "label": "અસલાલી - 1"},
                    {"value": "002", "label": "બારેજા"}
                ]},
                {"value": "02", "label": "સાણંદ", "villages": [
                    {"value": "010", "label": "ચાંગોદર"}
                ]}
            ]}
        ]
    }"#;

    #[test]
    fn expands_whole_district() {
        let catalogue = Catalogue::from_json(SAMPLE).unwrap();
        let tasks = catalogue.expand("02", &[], &[], None).unwrap();
        assert_eq!(tasks.len(), 3);
        assert_eq!(tasks[0].id().as_str(), "02_01_001");
        assert_eq!(tasks[0].village_label.as_deref(), Some("અસલાલી"));
        assert_eq!(catalogue.village_count(), 3);
    }

    #[test]
    fn narrows_by_taluka_and_village() {
        let catalogue = Catalogue::from_json(SAMPLE).unwrap();
        let tasks = catalogue
            .expand("02", &["01".to_string()], &["002".to_string()], None)
            .unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].village, "002");
    }

    #[test]
    fn unknown_codes_are_errors() {
        let catalogue = Catalogue::from_json(SAMPLE).unwrap();
        assert!(matches!(
            catalogue.expand("99", &[], &[], None),
            Err(CatalogueError::UnknownDistrict(_))
        ));
        assert!(matches!(
            catalogue.expand("02", &["77".to_string()], &[], None),
            Err(CatalogueError::UnknownTaluka { .. })
        ));
    }

    #[test]
    fn survey_filter_propagates() {
        let catalogue = Catalogue::from_json(SAMPLE).unwrap();
        let filter = SurveyFilter::new("45");
        let tasks = catalogue.expand("02", &[], &[], Some(&filter)).unwrap();
        assert!(tasks.iter().all(|t| t.survey.as_ref() == Some(&filter)));
    }
}
