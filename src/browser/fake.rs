//! Scripted stand-in for the land-record portal.
//!
//! Models just enough of the form to drive a session: cascading dropdowns
//! that only populate once their parent is chosen, a captcha image, and a
//! submission whose outcome a test script decides. Every capability call
//! is appended to a shared [`PortalLog`] so tests can count hierarchy
//! selections separately from captcha rounds.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;

use super::{BrowserDriver, DriverError, SelectOption, SessionFactory};
use crate::config::PortalConfig;

/// Smallest valid PNG header; recognizers in tests never decode it.
pub const CAPTCHA_PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 1, 2, 3];

const PLACEHOLDER_LABEL: &str = "--પસંદ કરો--";

/// A capability call as seen by the portal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortalCall {
    Goto(String),
    Select { selector: String, value: String },
    Fill { selector: String, text: String },
    Press { selector: String, key: String },
    Click(String),
    ClickText(String),
    Screenshot(String),
    Close,
}

/// Calls from every session a factory opened, tagged with the worker id.
#[derive(Debug, Clone, Default)]
pub struct PortalLog {
    calls: Arc<Mutex<Vec<(usize, PortalCall)>>>,
}

impl PortalLog {
    fn push(&self, worker: usize, call: PortalCall) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((worker, call));
        }
    }

    pub fn calls(&self) -> Vec<(usize, PortalCall)> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Number of selections made on one dropdown.
    pub fn selections(&self, selector: &str) -> usize {
        self.count(|call| matches!(call, PortalCall::Select { selector: s, .. } if s == selector))
    }

    /// Values chosen on one dropdown, in order.
    pub fn selected_values(&self, selector: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|(_, call)| match call {
                PortalCall::Select { selector: s, value } if s == selector => Some(value),
                _ => None,
            })
            .collect()
    }

    pub fn captcha_fills(&self, input: &str) -> usize {
        self.count(|call| matches!(call, PortalCall::Fill { selector, .. } if selector == input))
    }

    pub fn submissions(&self, input: &str) -> usize {
        self.count(|call| matches!(call, PortalCall::Press { selector, .. } if selector == input))
    }

    pub fn navigations(&self) -> usize {
        self.count(|call| matches!(call, PortalCall::Goto(_)))
    }

    pub fn screenshots(&self) -> usize {
        self.count(|call| matches!(call, PortalCall::Screenshot(_)))
    }

    pub fn count(&self, pred: impl Fn(&PortalCall) -> bool) -> usize {
        self.calls().iter().filter(|(_, call)| pred(call)).count()
    }
}

/// Content of a results page.
#[derive(Debug, Clone, Default)]
pub struct RecordPage {
    pub tables: Vec<String>,
    pub page_text: String,
    /// Labeled element id -> text.
    pub labeled: HashMap<String, String>,
}

impl RecordPage {
    /// A complete VF-7 page built from the recorded fixtures.
    pub fn sample() -> Self {
        let mut labeled = HashMap::new();
        labeled.insert("lblKhataNo".to_string(), "૩૨".to_string());
        labeled.insert("lblArea".to_string(), "૦-પ૬-૬૬".to_string());
        Self {
            tables: vec![
                include_str!("../../tests/fixtures/ownership_table.txt").to_string(),
                include_str!("../../tests/fixtures/encumbrance_table.txt").to_string(),
            ],
            page_text: include_str!("../../tests/fixtures/result_page.txt").to_string(),
            labeled,
        }
    }
}

/// What the portal shows after a captcha submission.
#[derive(Debug, Clone)]
pub enum SubmitOutcome {
    Record(RecordPage),
    NoData,
    WrongCaptcha,
    /// The form comes back unchanged with no message at all.
    Blank,
}

/// The state a submission was made in.
#[derive(Debug, Clone)]
pub struct Submission {
    pub worker: usize,
    pub district: String,
    pub village: String,
    pub survey: String,
    pub captcha: String,
    /// Zero-based count of earlier submissions for this selection.
    pub attempt: u32,
}

type OutcomeFn = dyn Fn(&Submission) -> SubmitOutcome + Send + Sync;

/// Portal layout and behaviour shared by every session of a factory.
pub struct PortalScript {
    pub portal: PortalConfig,
    pub districts: Vec<SelectOption>,
    pub talukas: Vec<SelectOption>,
    pub villages: Vec<SelectOption>,
    pub surveys: Vec<SelectOption>,
    /// Survey lists that differ from `surveys`, by village code.
    pub village_surveys: HashMap<String, Vec<SelectOption>>,
    /// Serve the captcha inline as a data URI rather than a URL.
    pub embedded_captcha: bool,
    /// Whether the results page carries a working "back to form" link.
    pub back_link: bool,
    /// Result-table reads that fail with a protocol error before one succeeds.
    pub flaky_table_reads: u32,
    outcome: Arc<OutcomeFn>,
}

impl PortalScript {
    pub fn new() -> Self {
        let opts = |pairs: &[(&str, &str)]| -> Vec<SelectOption> {
            pairs.iter().map(|(v, l)| SelectOption::new(*v, *l)).collect()
        };
        Self {
            portal: PortalConfig::default(),
            districts: opts(&[("02", "અમદાવાદ"), ("05", "ભાવનગર")]),
            talukas: opts(&[("07", "દસક્રોઈ"), ("08", "ધોળકા")]),
            villages: opts(&[
                ("001", "ભાડોલ - 1"),
                ("002", "ગતરાડ - 2"),
                ("003", "ઝાણું - 3"),
                ("004", "કણભા - 4"),
            ]),
            surveys: opts(&[("101", "૧૦૧"), ("102/1", "૧૦૨/૧"), ("215", "૨૧૫")]),
            village_surveys: HashMap::new(),
            embedded_captcha: true,
            back_link: true,
            flaky_table_reads: 0,
            outcome: Arc::new(|_| SubmitOutcome::Record(RecordPage::sample())),
        }
    }

    pub fn with_outcome(
        mut self,
        outcome: impl Fn(&Submission) -> SubmitOutcome + Send + Sync + 'static,
    ) -> Self {
        self.outcome = Arc::new(outcome);
        self
    }

    pub fn always(self, outcome: SubmitOutcome) -> Self {
        self.with_outcome(move |_| outcome.clone())
    }

    pub fn with_village_surveys(mut self, village: &str, surveys: Vec<SelectOption>) -> Self {
        self.village_surveys.insert(village.to_string(), surveys);
        self
    }

    pub fn without_back_link(mut self) -> Self {
        self.back_link = false;
        self
    }

    pub fn with_flaky_table_reads(mut self, failures: u32) -> Self {
        self.flaky_table_reads = failures;
        self
    }

    pub fn with_screenshot_captcha(mut self) -> Self {
        self.embedded_captcha = false;
        self
    }
}

impl Default for PortalScript {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
enum Screen {
    Blank,
    Form { message: Option<String> },
    Results(RecordPage),
}

/// One scripted browser session.
pub struct ScriptedPortal {
    script: Arc<PortalScript>,
    log: PortalLog,
    worker: usize,
    screen: Screen,
    selected: HashMap<String, String>,
    captcha: String,
    attempts: u32,
    failed_table_reads: u32,
}

impl ScriptedPortal {
    pub fn new(script: Arc<PortalScript>, log: PortalLog, worker: usize) -> Self {
        Self {
            script,
            log,
            worker,
            screen: Screen::Blank,
            selected: HashMap::new(),
            captcha: String::new(),
            attempts: 0,
            failed_table_reads: 0,
        }
    }

    fn record(&self, call: PortalCall) {
        self.log.push(self.worker, call);
    }

    fn sel(&self) -> &crate::config::PortalSelectors {
        &self.script.portal.selectors
    }

    fn on_form(&self) -> bool {
        matches!(self.screen, Screen::Form { .. })
    }

    fn chosen(&self, selector: &str) -> Option<&String> {
        self.selected.get(selector)
    }

    fn with_placeholder(options: &[SelectOption]) -> Vec<SelectOption> {
        let mut all = vec![SelectOption::new("0", PLACEHOLDER_LABEL)];
        all.extend(options.iter().cloned());
        all
    }

    fn list_for(&self, selector: &str) -> Vec<SelectOption> {
        if !self.on_form() {
            return Vec::new();
        }
        let s = self.sel();
        let placeholder_only = vec![SelectOption::new("0", PLACEHOLDER_LABEL)];
        if selector == s.record_type {
            Self::with_placeholder(&[SelectOption::new(
                self.script.portal.record_type_value.clone(),
                "VF-7 સર્વે નંબરની વિગતો",
            )])
        } else if selector == s.district {
            Self::with_placeholder(&self.script.districts)
        } else if selector == s.taluka {
            match self.chosen(&s.district) {
                Some(_) => Self::with_placeholder(&self.script.talukas),
                None => placeholder_only,
            }
        } else if selector == s.village {
            match self.chosen(&s.taluka) {
                Some(_) => Self::with_placeholder(&self.script.villages),
                None => placeholder_only,
            }
        } else if selector == s.survey {
            match self.chosen(&s.village) {
                Some(village) => Self::with_placeholder(
                    self.script
                        .village_surveys
                        .get(village)
                        .unwrap_or(&self.script.surveys),
                ),
                None => placeholder_only,
            }
        } else {
            Vec::new()
        }
    }

    /// Choosing a parent clears every dropdown below it.
    fn clear_below(&mut self, selector: &str) {
        let s = self.sel().clone();
        let order = [s.record_type, s.district, s.taluka, s.village, s.survey];
        if let Some(pos) = order.iter().position(|o| o == selector) {
            for below in &order[pos + 1..] {
                self.selected.remove(below);
            }
        }
    }

    fn submit(&mut self) {
        let s = self.sel().clone();
        let submission = Submission {
            worker: self.worker,
            district: self.chosen(&s.district).cloned().unwrap_or_default(),
            village: self.chosen(&s.village).cloned().unwrap_or_default(),
            survey: self.chosen(&s.survey).cloned().unwrap_or_default(),
            captcha: self.captcha.clone(),
            attempt: self.attempts,
        };
        self.attempts += 1;

        self.screen = match (self.script.outcome)(&submission) {
            SubmitOutcome::Record(page) => Screen::Results(page),
            SubmitOutcome::NoData => Screen::Form {
                message: Some("No Record Found".to_string()),
            },
            SubmitOutcome::WrongCaptcha => Screen::Form {
                message: Some("Captcha is wrong, please try again".to_string()),
            },
            SubmitOutcome::Blank => Screen::Form { message: None },
        };
        self.captcha.clear();
    }

    fn go_back(&mut self) {
        // The portal keeps district and taluka across a postback to the form.
        let s = self.sel().clone();
        self.selected.remove(&s.village);
        self.selected.remove(&s.survey);
        self.attempts = 0;
        self.screen = Screen::Form { message: None };
    }

    fn labeled_text(&self, selector: &str) -> Option<String> {
        let Screen::Results(page) = &self.screen else {
            return None;
        };
        page.labeled
            .iter()
            .find(|(id, _)| selector.contains(&format!("'{}'", id)))
            .map(|(_, text)| text.clone())
    }
}

#[async_trait]
impl BrowserDriver for ScriptedPortal {
    async fn goto(&mut self, url: &str) -> Result<(), DriverError> {
        self.record(PortalCall::Goto(url.to_string()));
        self.screen = Screen::Form { message: None };
        self.selected.clear();
        self.captcha.clear();
        self.attempts = 0;
        Ok(())
    }

    async fn current_url(&mut self) -> Result<Option<String>, DriverError> {
        Ok(Some(self.script.portal.url.clone()))
    }

    async fn select_option(&mut self, selector: &str, value: &str) -> Result<(), DriverError> {
        self.record(PortalCall::Select {
            selector: selector.to_string(),
            value: value.to_string(),
        });
        if !self.list_for(selector).iter().any(|o| o.value == value) {
            return Err(DriverError::ElementNotFound(format!(
                "{} option {}",
                selector, value
            )));
        }
        self.selected.insert(selector.to_string(), value.to_string());
        self.clear_below(selector);
        if selector == self.sel().village || selector == self.sel().survey {
            self.attempts = 0;
        }
        self.screen = Screen::Form { message: None };
        Ok(())
    }

    async fn options(&mut self, selector: &str) -> Result<Vec<SelectOption>, DriverError> {
        Ok(self.list_for(selector))
    }

    async fn fill(&mut self, selector: &str, text: &str) -> Result<(), DriverError> {
        self.record(PortalCall::Fill {
            selector: selector.to_string(),
            text: text.to_string(),
        });
        if !self.on_form() {
            return Err(DriverError::ElementNotFound(selector.to_string()));
        }
        if selector == self.sel().captcha_input {
            self.captcha = text.to_string();
        }
        Ok(())
    }

    async fn press(&mut self, selector: &str, key: &str) -> Result<(), DriverError> {
        self.record(PortalCall::Press {
            selector: selector.to_string(),
            key: key.to_string(),
        });
        if !self.on_form() {
            return Err(DriverError::ElementNotFound(selector.to_string()));
        }
        if selector == self.sel().captcha_input && key == "Enter" {
            self.submit();
        }
        Ok(())
    }

    async fn click(&mut self, selector: &str) -> Result<(), DriverError> {
        self.record(PortalCall::Click(selector.to_string()));
        let s = self.sel().clone();
        match &self.screen {
            Screen::Form { .. } if selector == s.refresh => {
                self.screen = Screen::Form { message: None };
                Ok(())
            }
            Screen::Results(_) if selector == s.back_link && self.script.back_link => {
                self.go_back();
                Ok(())
            }
            _ => Err(DriverError::ElementNotFound(selector.to_string())),
        }
    }

    async fn click_text(&mut self, text: &str) -> Result<bool, DriverError> {
        self.record(PortalCall::ClickText(text.to_string()));
        let portal = &self.script.portal;
        match &self.screen {
            Screen::Form { .. } if text == portal.refresh_text => {
                self.screen = Screen::Form { message: None };
                Ok(true)
            }
            Screen::Results(_) if text == portal.back_text && self.script.back_link => {
                self.go_back();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn exists(&mut self, selector: &str) -> Result<bool, DriverError> {
        let s = self.sel();
        Ok(match &self.screen {
            Screen::Blank => false,
            Screen::Form { message } => {
                s.captcha_image.first().map(String::as_str) == Some(selector)
                    || selector == s.captcha_input
                    || selector == s.refresh
                    || (selector == s.error_message && message.is_some())
            }
            Screen::Results(_) => {
                selector == s.content || (selector == s.back_link && self.script.back_link)
            }
        })
    }

    async fn text(&mut self, selector: &str) -> Result<Option<String>, DriverError> {
        if let Screen::Form { message } = &self.screen {
            if selector == self.sel().error_message {
                return Ok(message.clone());
            }
            return Ok(None);
        }
        Ok(self.labeled_text(selector))
    }

    async fn texts(&mut self, selector: &str) -> Result<Vec<String>, DriverError> {
        let reading_tables = matches!(self.screen, Screen::Results(_)) && selector.ends_with("table");
        if reading_tables && self.failed_table_reads < self.script.flaky_table_reads {
            self.failed_table_reads += 1;
            return Err(DriverError::Protocol("evaluate timed out".to_string()));
        }
        match &self.screen {
            Screen::Results(page) if selector.ends_with("table") => Ok(page.tables.clone()),
            _ => Ok(Vec::new()),
        }
    }

    async fn attribute(
        &mut self,
        selector: &str,
        name: &str,
    ) -> Result<Option<String>, DriverError> {
        let is_captcha = self.sel().captcha_image.iter().any(|c| c == selector);
        if !self.on_form() || !is_captcha || name != "src" {
            return Ok(None);
        }
        Ok(Some(if self.script.embedded_captcha {
            format!(
                "data:image/png;base64,{}",
                base64::engine::general_purpose::STANDARD.encode(CAPTCHA_PNG)
            )
        } else {
            "CaptchaImage.aspx?rnd=1".to_string()
        }))
    }

    async fn element_screenshot(&mut self, selector: &str) -> Result<Vec<u8>, DriverError> {
        self.record(PortalCall::Screenshot(selector.to_string()));
        if self.on_form() {
            Ok(CAPTCHA_PNG.to_vec())
        } else {
            Err(DriverError::ElementNotFound(selector.to_string()))
        }
    }

    async fn wait_for_idle(&mut self, _limit: Duration) -> Result<(), DriverError> {
        Ok(())
    }

    async fn page_text(&mut self) -> Result<String, DriverError> {
        Ok(match &self.screen {
            Screen::Blank => String::new(),
            Screen::Form { message } => format!(
                "ગામ નમૂના નંબર ૭/૧૨\n{}",
                message.as_deref().unwrap_or_default()
            ),
            Screen::Results(page) => page.page_text.clone(),
        })
    }

    async fn close(&mut self) {
        self.record(PortalCall::Close);
        self.screen = Screen::Blank;
    }
}

/// Opens [`ScriptedPortal`] sessions that share one script and one log.
pub struct ScriptedPortalFactory {
    script: Arc<PortalScript>,
    log: PortalLog,
    opened: AtomicUsize,
    fail_launch: bool,
}

impl ScriptedPortalFactory {
    pub fn new(script: PortalScript) -> Self {
        Self {
            script: Arc::new(script),
            log: PortalLog::default(),
            opened: AtomicUsize::new(0),
            fail_launch: false,
        }
    }

    /// A factory whose browser can never start.
    pub fn broken() -> Self {
        Self {
            fail_launch: true,
            ..Self::new(PortalScript::new())
        }
    }

    pub fn log(&self) -> PortalLog {
        self.log.clone()
    }

    pub fn portal(&self) -> &PortalConfig {
        &self.script.portal
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// A session outside the factory, for driving one task directly.
    pub fn session(&self, worker: usize) -> ScriptedPortal {
        ScriptedPortal::new(Arc::clone(&self.script), self.log.clone(), worker)
    }
}

#[async_trait]
impl SessionFactory for ScriptedPortalFactory {
    async fn open(&self, worker_id: usize) -> Result<Box<dyn BrowserDriver>, DriverError> {
        if self.fail_launch {
            return Err(DriverError::Launch("scripted launch failure".to_string()));
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(self.session(worker_id)))
    }
}
