//! The structured land record written for each completed task.
//!
//! Field names serialize in camelCase; downstream exporters read this
//! document verbatim.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::task::TaskId;
use crate::locale::AreaTriple;

/// Portal code plus its display label.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedCode {
    pub code: String,
    pub name: String,
}

impl NamedCode {
    pub fn new(code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordMeta {
    pub portal: String,
    pub record_type: String,
    pub task_id: TaskId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    pub captured_at: DateTime<Utc>,
    /// "As of" timestamp printed by the portal, verbatim.
    #[serde(default)]
    pub data_status_time: Option<String>,
    pub owner_count: usize,
    pub encumbrance_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordLocation {
    pub district: NamedCode,
    pub taluka: NamedCode,
    pub village: NamedCode,
}

/// Coarse land classification derived from tenure and land use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LandType {
    #[serde(rename = "NA")]
    NonAgricultural,
    Agriculture,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyIdentity {
    pub survey_number: String,
    #[serde(default)]
    pub upin: Option<String>,
    #[serde(default)]
    pub old_survey_number: Option<String>,
    #[serde(default)]
    pub old_survey_notes: Option<String>,
    #[serde(default)]
    pub khata_number: Option<String>,
    #[serde(default)]
    pub land_type: LandType,
}

/// A raw local-language value and its English classification.
///
/// When no known phrase matches, `classified` carries the raw value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedTerm {
    pub raw: String,
    pub classified: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LandDetails {
    #[serde(default)]
    pub area_raw: Option<String>,
    #[serde(flatten)]
    pub area: AreaTriple,
    /// Assessment amount with ASCII digits, e.g. `"12.34"`.
    #[serde(default)]
    pub assessment_tax: Option<String>,
    #[serde(default)]
    pub tenure: Option<ClassifiedTerm>,
    #[serde(default)]
    pub land_use: Option<ClassifiedTerm>,
    #[serde(default)]
    pub farm_name: Option<String>,
    #[serde(default)]
    pub remarks: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OwnershipType {
    /// Plain khatedar.
    Holder,
    /// Minor represented by a guardian (સગીર વતી).
    Guardian,
    Widow,
    Wife,
}

impl OwnershipType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OwnershipType::Holder => "holder",
            OwnershipType::Guardian => "guardian",
            OwnershipType::Widow => "widow",
            OwnershipType::Wife => "wife",
        }
    }

    /// The portal's own wording for the relationship.
    pub fn local_label(&self) -> &'static str {
        match self {
            OwnershipType::Holder => "ખાતેદાર",
            OwnershipType::Guardian => "સગીર વતી",
            OwnershipType::Widow => "વિધવા",
            OwnershipType::Wife => "પત્ની",
        }
    }
}

impl fmt::Display for OwnershipType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Owner {
    pub name: String,
    #[serde(default)]
    pub relation_label: Option<String>,
    #[serde(default)]
    pub relation_target: Option<String>,
    pub ownership_type: OwnershipType,
    #[serde(default)]
    pub entry_number: Option<String>,
    #[serde(default)]
    pub share: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncumbranceKind {
    BankLien,
    Irrigation,
    GovernmentOrder,
    Acquisition,
    Other,
}

impl EncumbranceKind {
    pub fn local_label(&self) -> &'static str {
        match self {
            EncumbranceKind::BankLien => "બેંક બોજો",
            EncumbranceKind::Irrigation => "સિંચાઈ",
            EncumbranceKind::GovernmentOrder => "સરકારી હુકમ",
            EncumbranceKind::Acquisition => "સંપાદન",
            EncumbranceKind::Other => "અન્ય",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Encumbrance {
    pub entry_number: String,
    #[serde(rename = "type")]
    pub kind: EncumbranceKind,
    pub description: String,
    #[serde(default)]
    pub amount: Option<u64>,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuredRecord {
    pub meta: RecordMeta,
    pub location: RecordLocation,
    pub property_identity: PropertyIdentity,
    pub land_details: LandDetails,
    pub owners: Vec<Owner>,
    pub encumbrances: Vec<Encumbrance>,
    pub entry_numbers: Vec<String>,
}

impl StructuredRecord {
    /// Whether the page yielded anything beyond identifiers.
    pub fn has_content(&self) -> bool {
        !self.owners.is_empty()
            || !self.encumbrances.is_empty()
            || !self.land_details.area.is_empty()
            || self.property_identity.khata_number.is_some()
    }
}
