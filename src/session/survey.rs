//! Dropdown option filtering and survey number selection.

use crate::browser::SelectOption;
use crate::config::PortalConfig;
use crate::locale::to_ascii_digits;
use crate::models::{embedded_number, SurveyFilter};

/// "Choose one" entries the portal puts at the top of every dropdown.
pub fn is_placeholder(option: &SelectOption, portal: &PortalConfig) -> bool {
    let value = option.value.trim();
    let label = option.label.to_lowercase();
    portal.placeholder_values.iter().any(|v| v.trim() == value)
        || portal
            .placeholder_labels
            .iter()
            .any(|l| !l.is_empty() && label.contains(&l.to_lowercase()))
}

pub fn real_options(options: Vec<SelectOption>, portal: &PortalConfig) -> Vec<SelectOption> {
    options
        .into_iter()
        .filter(|o| !is_placeholder(o, portal))
        .collect()
}

/// Option whose value (or, failing that, label) is exactly `code`.
pub fn find_code<'a>(options: &'a [SelectOption], code: &str) -> Option<&'a SelectOption> {
    let code = code.trim();
    options
        .iter()
        .find(|o| o.value.trim() == code)
        .or_else(|| {
            let ascii = to_ascii_digits(code);
            options
                .iter()
                .find(|o| to_ascii_digits(o.label.trim()) == ascii)
        })
}

/// Pick the survey option for a task.
///
/// With no filter any option will do. With one: exact text or value, then
/// substring, then the option whose embedded number is nearest the
/// filter's number.
pub fn choose_survey<'a>(
    options: &'a [SelectOption],
    filter: Option<&SurveyFilter>,
) -> Option<&'a SelectOption> {
    let Some(filter) = filter else {
        return options.first();
    };
    let wanted = to_ascii_digits(filter.as_str()).to_lowercase();
    if wanted.is_empty() {
        return options.first();
    }
    let norm = |s: &str| to_ascii_digits(s.trim()).to_lowercase();

    if let Some(exact) = options
        .iter()
        .find(|o| norm(&o.label) == wanted || norm(&o.value) == wanted)
    {
        return Some(exact);
    }

    if let Some(partial) = options
        .iter()
        .find(|o| norm(&o.label).contains(&wanted) || norm(&o.value).contains(&wanted))
    {
        return Some(partial);
    }

    let target = filter.target_number()?;
    options
        .iter()
        .filter_map(|o| {
            let n = embedded_number(&o.label).or_else(|| embedded_number(&o.value))?;
            Some((n.abs_diff(target), o))
        })
        .min_by_key(|(distance, _)| *distance)
        .map(|(_, o)| o)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(pairs: &[(&str, &str)]) -> Vec<SelectOption> {
        pairs.iter().map(|(v, l)| SelectOption::new(*v, *l)).collect()
    }

    #[test]
    fn filters_placeholders() {
        let portal = PortalConfig::default();
        let all = opts(&[
            ("0", "--પસંદ કરો--"),
            ("-1", "Select Survey"),
            ("12", "Please Select"),
            ("101", "૧૦૧"),
        ]);
        let real = real_options(all, &portal);
        assert_eq!(real, opts(&[("101", "૧૦૧")]));
    }

    #[test]
    fn finds_codes_by_value_or_label() {
        let options = opts(&[("07", "દસક્રોઈ"), ("8", "૮")]);
        assert_eq!(find_code(&options, "07").unwrap().label, "દસક્રોઈ");
        assert_eq!(find_code(&options, "8").unwrap().value, "8");
        assert!(find_code(&options, "09").is_none());
    }

    #[test]
    fn no_filter_takes_first() {
        let options = opts(&[("101", "૧૦૧"), ("102", "૧૦૨")]);
        assert_eq!(choose_survey(&options, None).unwrap().value, "101");
        assert!(choose_survey(&[], None).is_none());
    }

    #[test]
    fn exact_beats_substring() {
        let options = opts(&[("1120", "૧૧૨૦"), ("12", "૧૨")]);
        let filter = SurveyFilter::new("12");
        assert_eq!(choose_survey(&options, Some(&filter)).unwrap().value, "12");
    }

    #[test]
    fn substring_then_nearest_number() {
        let options = opts(&[("101", "૧૦૧"), ("102/1", "૧૦૨/૧"), ("215", "૨૧૫")]);
        let partial = SurveyFilter::new("૧૦૨");
        assert_eq!(choose_survey(&options, Some(&partial)).unwrap().value, "102/1");

        let nearest = SurveyFilter::new("200");
        assert_eq!(choose_survey(&options, Some(&nearest)).unwrap().value, "215");
    }

    #[test]
    fn unmatched_text_filter_selects_nothing() {
        let options = opts(&[("101", "૧૦૧")]);
        let filter = SurveyFilter::new("abc");
        assert!(choose_survey(&options, Some(&filter)).is_none());
    }
}
