//! Encumbrance ("બોજા અને બીજા હક્ક") table parsing.

use std::sync::LazyLock;

use regex::Regex;

use super::classify::classify_encumbrance;
use super::{is_divider, numeric_list};
use crate::locale::{normalize_numeric, parse_currency};
use crate::models::Encumbrance;

static ENTRY_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(.+?)<([૦-૯પ0-9]+)>").unwrap());

const TABLE_HEADER: &str = "બોજા અને બીજા હક્ક";

pub const ACTIVE_STATUS: &str = "Active";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EncumbranceTable {
    pub entry_numbers: Vec<String>,
    pub encumbrances: Vec<Encumbrance>,
}

pub fn parse_encumbrance_table(text: &str) -> EncumbranceTable {
    let mut table = EncumbranceTable::default();
    let mut after_divider = false;

    for line in text.lines().map(str::trim) {
        if line.is_empty() || line.contains(TABLE_HEADER) {
            continue;
        }
        if is_divider(line) {
            after_divider = true;
            continue;
        }

        if !after_divider {
            if let Some(numbers) = numeric_list(line) {
                table.entry_numbers.extend(numbers);
            }
            continue;
        }

        for caps in ENTRY_MARKER.captures_iter(line) {
            let description = caps[1].trim().to_string();
            if description.is_empty() {
                continue;
            }
            table.encumbrances.push(Encumbrance {
                entry_number: normalize_numeric(&caps[2]),
                kind: classify_encumbrance(&description),
                amount: parse_currency(&description),
                description,
                status: ACTIVE_STATUS.to_string(),
            });
        }
    }

    table
}
