//! Keyword classification of tenure, land use and encumbrance descriptions.
//!
//! Every table is ordered; the first matching entry wins.

use crate::models::{ClassifiedTerm, EncumbranceKind, LandType};

const TENURE_TERMS: &[(&[&str], &str)] = &[
    (&["જુની શરત", "જુ.શ"], "Old Tenure"),
    (&["નવી શરત", "ન.શ"], "New Tenure"),
    (&["ખાલસા"], "Khalsa"),
];

// Non-agricultural must precede agricultural: "બિનખેતી" contains "ખેતી".
const LAND_USE_TERMS: &[(&[&str], &str)] = &[
    (&["બિનખેતી", "બીનખેતી", "N.A.", "Non-Agricultural"], NON_AGRICULTURAL),
    (&["ખેતીલાયક", "ખેતી"], AGRICULTURAL),
    (&["ગૌચર"], "Grazing Land"),
    (&["પો.ખ", "પોત ખરાબ"], "Barren/Wasteland"),
];

const AGRICULTURAL: &str = "Agricultural";
const NON_AGRICULTURAL: &str = "Non-Agricultural";

const ENCUMBRANCE_TERMS: &[(&[&str], EncumbranceKind)] = &[
    (&["બેંક", "તારણ", "બોજો", "બો"], EncumbranceKind::BankLien),
    (&["નહેર", "કમાન્ડ"], EncumbranceKind::Irrigation),
    (&["હુકમ", "મામલતદાર"], EncumbranceKind::GovernmentOrder),
    (&["એકસપ્રેસ"], EncumbranceKind::Acquisition),
];

fn classify(raw: &str, terms: &[(&[&str], &str)]) -> ClassifiedTerm {
    let raw = raw.trim();
    let classified = terms
        .iter()
        .find(|(needles, _)| needles.iter().any(|n| raw.contains(n)))
        .map(|(_, label)| label.to_string())
        .unwrap_or_else(|| raw.to_string());
    ClassifiedTerm {
        raw: raw.to_string(),
        classified,
    }
}

pub fn classify_tenure(raw: &str) -> ClassifiedTerm {
    classify(raw, TENURE_TERMS)
}

pub fn classify_land_use(raw: &str) -> ClassifiedTerm {
    let mut term = classify(raw, LAND_USE_TERMS);
    // A bare "NA" token is the portal's English abbreviation.
    if term.classified == term.raw
        && raw
            .split(|c: char| !c.is_ascii_alphabetic())
            .any(|token| token == "NA")
    {
        term.classified = NON_AGRICULTURAL.to_string();
    }
    term
}

pub fn classify_encumbrance(description: &str) -> EncumbranceKind {
    if let Some((_, kind)) = ENCUMBRANCE_TERMS
        .iter()
        .find(|(needles, _)| needles.iter().any(|n| description.contains(n)))
    {
        return *kind;
    }
    if description.contains("જમીન") && description.contains("નીમ") {
        return EncumbranceKind::Acquisition;
    }
    EncumbranceKind::Other
}

/// Coarse land type. A non-agricultural marker in either the tenure or the
/// land use wins; otherwise the land use decides, then the table text.
pub fn land_type(
    tenure: Option<&ClassifiedTerm>,
    land_use: Option<&ClassifiedTerm>,
    table_text: &str,
) -> LandType {
    let tenure_is_na =
        tenure.is_some_and(|t| classify_land_use(&t.raw).classified == NON_AGRICULTURAL);
    if tenure_is_na {
        return LandType::NonAgricultural;
    }
    match land_use.map(|t| t.classified.as_str()) {
        Some(NON_AGRICULTURAL) => return LandType::NonAgricultural,
        Some(AGRICULTURAL) => return LandType::Agriculture,
        _ => {}
    }
    if table_text.contains("બિનખેતી") || table_text.contains("બીનખેતી") {
        LandType::NonAgricultural
    } else if table_text.contains("ખેતી") {
        LandType::Agriculture
    } else {
        LandType::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tenure_vocabulary() {
        assert_eq!(classify_tenure("જુની શરત").classified, "Old Tenure");
        assert_eq!(classify_tenure("ન.શ. (પ્રતિબંધિત)").classified, "New Tenure");
        assert_eq!(classify_tenure("ખાલસા").classified, "Khalsa");
    }

    #[test]
    fn unmatched_terms_pass_through_raw() {
        let term = classify_tenure("  ઈનામી  ");
        assert_eq!(term.raw, "ઈનામી");
        assert_eq!(term.classified, "ઈનામી");
    }

    #[test]
    fn land_use_vocabulary() {
        assert_eq!(classify_land_use("ખેતીલાયક").classified, "Agricultural");
        assert_eq!(classify_land_use("બિનખેતી").classified, "Non-Agricultural");
        assert_eq!(classify_land_use("NA (રહેણાંક)").classified, "Non-Agricultural");
        assert_eq!(classify_land_use("ગૌચર").classified, "Grazing Land");
        assert_eq!(classify_land_use("પો.ખ.").classified, "Barren/Wasteland");
        assert_eq!(classify_land_use("NATIONAL").classified, "NATIONAL");
    }

    #[test]
    fn non_agricultural_tenure_overrides_land_use() {
        let tenure = classify_tenure("નવી શરત (બિનખેતી)");
        let use_ = classify_land_use("ખેતી");
        assert_eq!(
            land_type(Some(&tenure), Some(&use_), ""),
            LandType::NonAgricultural
        );

        let plain = classify_tenure("જુની શરત");
        assert_eq!(land_type(Some(&plain), Some(&use_), ""), LandType::Agriculture);
        assert_eq!(land_type(Some(&plain), None, "ખેતીની જમીન"), LandType::Agriculture);
    }

    #[test]
    fn encumbrance_priority() {
        assert_eq!(
            classify_encumbrance("બેંક ઓફ બરોડાનો બોજો"),
            EncumbranceKind::BankLien
        );
        assert_eq!(
            classify_encumbrance("નર્મદા નહેર કમાન્ડ વિસ્તાર"),
            EncumbranceKind::Irrigation
        );
        assert_eq!(
            classify_encumbrance("મામલતદારશ્રીના હુકમથી"),
            EncumbranceKind::GovernmentOrder
        );
        assert_eq!(
            classify_encumbrance("એકસપ્રેસ હાઈવે માટે"),
            EncumbranceKind::Acquisition
        );
        assert_eq!(
            classify_encumbrance("જમીન સરકારમાં નીમ"),
            EncumbranceKind::Acquisition
        );
        assert_eq!(classify_encumbrance("વારસાઈ નોંધ"), EncumbranceKind::Other);
        // Bank keywords outrank irrigation ones.
        assert_eq!(
            classify_encumbrance("નહેર માટે બેંક લોન"),
            EncumbranceKind::BankLien
        );
    }

    #[test]
    fn land_type_prefers_classified_use() {
        let na = classify_land_use("બિનખેતી");
        assert_eq!(land_type(None, Some(&na), "ખેતી"), LandType::NonAgricultural);
        assert_eq!(land_type(None, None, "ખેતીની જમીન"), LandType::Agriculture);
        assert_eq!(land_type(None, None, ""), LandType::Unknown);
    }
}
