//! Ownership (khata) table parsing.
//!
//! Layout of the table text:
//!
//! ```text
//! ખાતા નંબર | કુલ ક્ષેત્રફળ | કુલ આકાર | ખાતેદારનું નામ
//! ૭,૧૮૬,પ૮૩,
//! ---------------------------------
//! ૩૨ | ૦-પ૬-૬૬ | ૭.૦૦ભગતભાઈ છનાભાઈ પટેલ(૧૮૬)
//! રમેશભાઈ ભગતભાઈ પટેલ(પ૮૩)
//! મહેશભાઈ ભગતભાઈ પટેલ
//! ```

use std::sync::LazyLock;

use regex::Regex;

use super::{is_divider, numeric_list};
use crate::locale::{is_numeric_noise, normalize_numeric};
use crate::models::{Owner, OwnershipType};

static OWNER_WITH_ENTRY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([^()\n]+)\(([૦-૯પ0-9]+)\)").unwrap());

static LEADING_ASSESSMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[૦-૯પ0-9]+\.[૦-૯પ0-9]+").unwrap());

static GUARDIAN_SPLIT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"સ\.?વા\.?\s*").unwrap());

const GUARDIAN_MARKERS: &[&str] = &["સ.વા.", "સ.વા"];
const WIDOW_MARKER: &str = "ની વિધવા";
const WIFE_MARKER: &str = "ના પત્ની";
const HUSBAND_JOINER: &str = " તે ";

/// Everything recovered from the ownership table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OwnershipTable {
    pub entry_numbers: Vec<String>,
    pub khata_number: Option<String>,
    pub area_raw: Option<String>,
    pub assessment: Option<String>,
    pub owners: Vec<Owner>,
}

pub fn parse_ownership_table(text: &str) -> OwnershipTable {
    let mut table = OwnershipTable::default();
    let mut after_divider = false;
    let mut first_data_line = true;

    for line in text.lines().map(str::trim) {
        if is_divider(line) {
            after_divider = true;
            continue;
        }
        if line.is_empty() {
            continue;
        }

        if !after_divider {
            if !line.contains("ખાતા નંબર") {
                if let Some(numbers) = numeric_list(line) {
                    table.entry_numbers.extend(numbers);
                }
            }
            continue;
        }

        if is_numeric_noise(line) {
            continue;
        }

        if first_data_line && line.contains('|') {
            parse_khata_line(line, &mut table);
        }

        let matches: Vec<_> = OWNER_WITH_ENTRY.captures_iter(line).collect();
        if !matches.is_empty() {
            for caps in matches {
                let mut name = caps[1].trim().to_string();
                if first_data_line && name.contains('|') {
                    name = strip_khata_prefix(&name).unwrap_or_default();
                    first_data_line = false;
                }
                let entry = normalize_numeric(&caps[2]);
                if let Some(owner) = parse_owner(&name, Some(entry)) {
                    table.owners.push(owner);
                }
            }
        } else if first_data_line && line.contains('|') {
            if let Some(name) = strip_khata_prefix(line) {
                if name.chars().count() > 2 {
                    table.owners.extend(parse_owner(&name, None));
                }
            }
            first_data_line = false;
        } else if line.chars().count() > 2 {
            table.owners.extend(parse_owner(line, None));
        }
    }

    table
}

/// `khata | area | assessment<name>` on the first data line.
fn parse_khata_line(line: &str, table: &mut OwnershipTable) {
    let parts: Vec<&str> = line.split('|').map(str::trim).collect();
    if parts.len() < 3 {
        return;
    }
    let khata = normalize_numeric(parts[0]);
    if !khata.is_empty() {
        table.khata_number = Some(khata);
    }
    if !parts[1].is_empty() {
        table.area_raw = Some(parts[1].to_string());
    }
    if let Some(m) = LEADING_ASSESSMENT.find(parts[2]) {
        table.assessment = Some(normalize_numeric(m.as_str()));
    }
}

/// Name that follows the assessment amount in the last pipe segment.
fn strip_khata_prefix(segment: &str) -> Option<String> {
    let parts: Vec<&str> = segment.split('|').collect();
    if parts.len() < 3 {
        return None;
    }
    let last = parts[parts.len() - 1].trim();
    let name = LEADING_ASSESSMENT.replace(last, "").trim().to_string();
    Some(name)
}

/// Classify one owner string. Order matters: the guardian marker is tested
/// before the widow and wife markers.
pub fn parse_owner(raw: &str, entry_number: Option<String>) -> Option<Owner> {
    let raw = raw.trim().trim_matches(|c: char| c == ',' || c == '|').trim();
    if raw.chars().count() < 2 {
        return None;
    }

    let mut owner = Owner {
        name: raw.to_string(),
        relation_label: None,
        relation_target: None,
        ownership_type: OwnershipType::Holder,
        entry_number: entry_number.filter(|e| !e.is_empty()),
        share: None,
    };

    if GUARDIAN_MARKERS.iter().any(|m| raw.contains(m)) {
        owner.ownership_type = OwnershipType::Guardian;
        let parts: Vec<&str> = GUARDIAN_SPLIT.splitn(raw, 2).collect();
        if let [minor, guardian] = parts.as_slice() {
            owner.name = minor.trim().to_string();
            owner.relation_label = Some("guardian".to_string());
            owner.relation_target = Some(guardian.trim().to_string()).filter(|g| !g.is_empty());
        }
    } else if let Some((pre, _)) = raw.split_once(WIDOW_MARKER) {
        owner.ownership_type = OwnershipType::Widow;
        apply_spouse(&mut owner, pre, "deceased_husband");
    } else if let Some((pre, _)) = raw.split_once(WIFE_MARKER) {
        owner.ownership_type = OwnershipType::Wife;
        apply_spouse(&mut owner, pre, "husband");
    }

    if owner.name.is_empty() {
        return None;
    }
    Some(owner)
}

/// `<name> તે <husband>` precedes the widow/wife marker.
fn apply_spouse(owner: &mut Owner, pre: &str, label: &str) {
    let pre = pre.trim();
    match pre.split_once(HUSBAND_JOINER) {
        Some((name, husband)) => {
            owner.name = name.trim().to_string();
            let husband = husband.trim();
            if !husband.is_empty() {
                owner.relation_label = Some(label.to_string());
                owner.relation_target = Some(husband.to_string());
            }
        }
        None => owner.name = pre.to_string(),
    }
}
