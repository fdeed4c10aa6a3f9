//! Page classification after a captcha submission.
//!
//! Markers are phrases from recorded portal pages. They are tied to the
//! portal's current copy and need re-checking when it changes.

use crate::config::PortalConfig;

/// What a submitted form turned into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageOutcome {
    Success,
    NoData,
    WrongCaptcha,
    /// Neither a result nor a known message; retried like a wrong captcha.
    Ambiguous,
}

impl PageOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            PageOutcome::Success => "success",
            PageOutcome::NoData => "no_data",
            PageOutcome::WrongCaptcha => "wrong_captcha",
            PageOutcome::Ambiguous => "ambiguous",
        }
    }
}

/// Marker phrases, lowercased once.
#[derive(Debug, Clone)]
pub struct Markers {
    success: Vec<String>,
    no_data: Vec<String>,
    wrong_captcha: Vec<String>,
}

fn lowered(phrases: &[String]) -> Vec<String> {
    phrases
        .iter()
        .map(|p| p.trim().to_lowercase())
        .filter(|p| !p.is_empty())
        .collect()
}

fn contains_any(haystack: &str, needles: &[String]) -> bool {
    needles.iter().any(|n| haystack.contains(n.as_str()))
}

impl Markers {
    pub fn from_portal(portal: &PortalConfig) -> Self {
        Self {
            success: lowered(&portal.success_markers),
            no_data: lowered(&portal.no_data_markers),
            wrong_captcha: lowered(&portal.wrong_captcha_markers),
        }
    }

    /// Classify from the error label (if any) and the page body.
    ///
    /// A captcha complaint in the error label wins, then result headers,
    /// then empty-result messages in either place.
    pub fn classify(&self, error_text: Option<&str>, page_text: &str) -> PageOutcome {
        let error = error_text.map(str::to_lowercase).unwrap_or_default();
        let page = page_text.to_lowercase();

        if contains_any(&error, &self.wrong_captcha) {
            PageOutcome::WrongCaptcha
        } else if contains_any(&page, &self.success) {
            PageOutcome::Success
        } else if contains_any(&error, &self.no_data) || contains_any(&page, &self.no_data) {
            PageOutcome::NoData
        } else {
            PageOutcome::Ambiguous
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn markers() -> Markers {
        Markers::from_portal(&PortalConfig::default())
    }

    #[test]
    fn results_page_is_success() {
        let page = include_str!("../../tests/fixtures/result_page.txt");
        assert_eq!(markers().classify(None, page), PageOutcome::Success);
    }

    #[test]
    fn wrong_captcha_comes_from_error_label() {
        let m = markers();
        assert_eq!(
            m.classify(Some("Captcha is Wrong"), "form"),
            PageOutcome::WrongCaptcha
        );
        // The word alone in page copy is not a captcha complaint.
        assert_eq!(m.classify(None, "something went wrong"), PageOutcome::Ambiguous);
    }

    #[test]
    fn empty_result_messages() {
        let m = markers();
        assert_eq!(m.classify(Some("No Record Found"), "form"), PageOutcome::NoData);
        assert_eq!(
            m.classify(None, "આ સર્વે નંબર માટે રેકર્ડ મળેલ નથી"),
            PageOutcome::NoData
        );
    }

    #[test]
    fn blank_page_is_ambiguous() {
        assert_eq!(markers().classify(Some(""), ""), PageOutcome::Ambiguous);
    }
}
