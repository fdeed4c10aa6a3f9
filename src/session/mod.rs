//! Session driver: takes one browser session through one location task.
//!
//! Hierarchy selection happens once per task. Only the captcha
//! solve/submit/classify round is retried, because re-selecting the
//! cascade costs several postbacks per level.

pub mod classify;
pub mod portal;
pub mod state;
pub mod survey;

pub use classify::{Markers, PageOutcome};
pub use portal::Portal;
pub use state::{SessionState, StateTracker};

use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{debug, warn};

use crate::browser::{BrowserDriver, DriverError, SelectOption};
use crate::captcha::{CaptchaAttempt, CaptchaResolver};
use crate::config::{Config, SchedulerConfig};
use crate::extract::RecordExtractor;
use crate::models::{
    LocationTask, NamedCode, RawHarvest, SelectedLocation, StructuredRecord, SurveyFilter, TaskId,
};
use crate::retry::{retry_with, Attempt, Backoff, RetryError, RetryPolicy};
use survey::{choose_survey, find_code};

/// Retry budgets and session reuse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    pub max_captcha_attempts: u32,
    pub step_retries: u32,
    pub reuse_session: bool,
}

impl SessionSettings {
    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self {
            max_captcha_attempts: config.max_captcha_attempts.max(1),
            step_retries: config.step_retries.max(1),
            reuse_session: config.reuse_session,
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from_config(&SchedulerConfig::default())
    }
}

/// Why a task legitimately produced no record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoDataReason {
    /// The portal answered with an empty-result message.
    NoRecord,
    /// The village has no survey numbers to choose from.
    NoSurveys,
    /// No survey option matched the requested filter.
    SurveyNotFound,
}

impl NoDataReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            NoDataReason::NoRecord => "no_data",
            NoDataReason::NoSurveys => "no_surveys",
            NoDataReason::SurveyNotFound => "survey_not_found",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    CaptchaExhausted,
    Navigation,
    Selection,
    Capture,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::CaptchaExhausted => "captcha_exhausted",
            FailureReason::Navigation => "navigation",
            FailureReason::Selection => "selection",
            FailureReason::Capture => "capture",
        }
    }
}

/// A record and the page it came from.
#[derive(Debug, Clone)]
pub struct Harvested {
    pub record: StructuredRecord,
    pub harvest: RawHarvest,
}

/// How a task ended.
#[derive(Debug, Clone)]
pub enum TaskOutcome {
    Succeeded(Box<Harvested>),
    NoData(NoDataReason),
    Failed { reason: FailureReason, detail: String },
}

impl TaskOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            TaskOutcome::Succeeded(_) => "succeeded",
            TaskOutcome::NoData(reason) => reason.as_str(),
            TaskOutcome::Failed { reason, .. } => reason.as_str(),
        }
    }

    fn failed(reason: FailureReason, detail: impl fmt::Display) -> Self {
        TaskOutcome::Failed {
            reason,
            detail: detail.to_string(),
        }
    }
}

/// Why one captcha round did not produce a result page.
#[derive(Debug)]
enum RoundFailure {
    CaptchaMissing,
    Unsolved,
    Rejected(PageOutcome),
    Driver(DriverError),
}

impl fmt::Display for RoundFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoundFailure::CaptchaMissing => f.write_str("captcha image not found"),
            RoundFailure::Unsolved => f.write_str("captcha not recognized"),
            RoundFailure::Rejected(outcome) => write!(f, "portal answered {}", outcome.as_str()),
            RoundFailure::Driver(e) => write!(f, "{}", e),
        }
    }
}

enum SurveyPick {
    Chosen(SelectOption),
    Missing(NoDataReason),
}

/// What is already on the form, so a reused session can skip work.
#[derive(Debug, Default)]
struct FormMemory {
    loaded: bool,
    on_results: bool,
    district: Option<NamedCode>,
    taluka: Option<NamedCode>,
}

fn named(option: &SelectOption) -> NamedCode {
    NamedCode::new(option.value.clone(), option.label.clone())
}

/// Errors that end a step without further retries.
fn is_terminal(e: &DriverError) -> bool {
    e.is_fatal() || matches!(e, DriverError::Closed)
}

/// Drives one isolated browser session, one task at a time.
pub struct SessionDriver {
    worker_id: usize,
    browser: Box<dyn BrowserDriver>,
    portal: Portal,
    resolver: Arc<CaptchaResolver>,
    extractor: Arc<RecordExtractor>,
    settings: SessionSettings,
    tracker: StateTracker,
    form: FormMemory,
    active: Option<(TaskId, SelectedLocation)>,
}

impl SessionDriver {
    pub fn new(
        worker_id: usize,
        browser: Box<dyn BrowserDriver>,
        portal: Portal,
        resolver: Arc<CaptchaResolver>,
        extractor: Arc<RecordExtractor>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            worker_id,
            browser,
            portal,
            resolver,
            extractor,
            settings,
            tracker: StateTracker::new(worker_id),
            form: FormMemory::default(),
            active: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.tracker.state()
    }

    /// Run one task to a terminal state. Only a fatal browser error is
    /// returned as `Err`; every other failure is a [`TaskOutcome`].
    pub async fn run(&mut self, task: &LocationTask) -> Result<TaskOutcome, DriverError> {
        let id = task.id();
        self.tracker.begin(id.clone());

        let outcome = match self.drive(task, id).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.tracker.move_to(SessionState::Failed);
                self.form = FormMemory::default();
                return Err(e);
            }
        };

        match &outcome {
            TaskOutcome::Succeeded(_) | TaskOutcome::NoData(_) => {
                self.tracker.move_to(SessionState::Done)
            }
            TaskOutcome::Failed { .. } => {
                self.tracker.move_to(SessionState::Failed);
                // Start the next task from a clean page.
                self.form = FormMemory::default();
            }
        }
        self.active = None;
        Ok(outcome)
    }

    pub async fn close(&mut self) {
        self.browser.close().await;
    }

    async fn drive(&mut self, task: &LocationTask, id: TaskId) -> Result<TaskOutcome, DriverError> {
        self.tracker.move_to(SessionState::Navigating);
        if let Err(e) = self.prepare_form().await {
            if e.is_fatal() {
                return Err(e);
            }
            return Ok(TaskOutcome::failed(FailureReason::Navigation, e));
        }

        self.tracker.move_to(SessionState::SelectingHierarchy);
        let location = match self.select_hierarchy(task).await {
            Ok(Ok(location)) => location,
            Ok(Err(reason)) => {
                debug!(worker = self.worker_id, task = %id, "No data: {}", reason.as_str());
                return Ok(TaskOutcome::NoData(reason));
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => return Ok(TaskOutcome::failed(FailureReason::Selection, e)),
        };
        self.active = Some((id, location));

        let policy = RetryPolicy::immediate(self.settings.max_captcha_attempts);
        let result = retry_with(&policy, self, |driver, attempt| {
            Box::pin(driver.captcha_round(attempt))
        })
        .await;

        match result {
            Ok(()) => {}
            Err(RetryError::Exhausted {
                last: RoundFailure::Rejected(PageOutcome::NoData),
                ..
            }) => return Ok(TaskOutcome::NoData(NoDataReason::NoRecord)),
            Err(RetryError::Exhausted { attempts, last }) => {
                return Ok(TaskOutcome::failed(
                    FailureReason::CaptchaExhausted,
                    format!("{} attempt(s), last: {}", attempts, last),
                ))
            }
            Err(RetryError::Aborted {
                error: RoundFailure::Driver(e),
                ..
            }) if e.is_fatal() => return Err(e),
            Err(RetryError::Aborted { error, .. }) => {
                return Ok(TaskOutcome::failed(FailureReason::Capture, error))
            }
        }

        // The portal accepted the captcha; a failed read is retried on the
        // results page, never by solving another captcha.
        self.tracker.move_to(SessionState::Extracting);
        let Some((id, location)) = self.active.clone() else {
            return Err(DriverError::Closed);
        };
        let harvest = match self
            .with_step_retries("harvest", move |driver| {
                let id = id.clone();
                let location = location.clone();
                Box::pin(async move {
                    driver
                        .portal
                        .harvest(driver.browser.as_mut(), id, location)
                        .await
                })
            })
            .await
        {
            Ok(harvest) => harvest,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => return Ok(TaskOutcome::failed(FailureReason::Capture, e)),
        };

        let record = self.extractor.extract(&harvest);
        if !record.has_content() {
            warn!(task = %harvest.task_id, "Result page produced an empty record");
        }
        Ok(TaskOutcome::Succeeded(Box::new(Harvested { record, harvest })))
    }

    /// Retry a browser step a few times. Fatal errors and a dead session
    /// end it immediately.
    async fn with_step_retries<T: 'static, F>(&mut self, step: &'static str, mut op: F) -> Result<T, DriverError>
    where
        F: for<'s> FnMut(&'s mut SessionDriver) -> BoxFuture<'s, Result<T, DriverError>>,
    {
        let policy = RetryPolicy::new(
            self.settings.step_retries,
            Backoff::Fixed(self.portal.timeouts().settle()),
        );
        let worker = self.worker_id;
        retry_with(&policy, self, |driver, attempt| {
            let fut = op(driver);
            Box::pin(async move {
                match fut.await {
                    Ok(value) => Attempt::Done(value),
                    Err(e) if is_terminal(&e) => Attempt::Abort(e),
                    Err(e) => {
                        warn!(worker, "{} failed (attempt {}): {}", step, attempt + 1, e);
                        Attempt::Retry(e)
                    }
                }
            })
        })
        .await
        .map_err(RetryError::into_inner)
    }

    /// Get the form on screen: back link from a results page when the
    /// session can be reused, otherwise a full load.
    async fn prepare_form(&mut self) -> Result<(), DriverError> {
        if self.settings.reuse_session && self.form.loaded {
            if !self.form.on_results {
                return Ok(());
            }
            match self.portal.back_to_form(self.browser.as_mut()).await {
                Ok(true) => {
                    self.form.on_results = false;
                    debug!(worker = self.worker_id, "Back on form via portal link");
                    return Ok(());
                }
                Ok(false) => debug!(worker = self.worker_id, "No back link; reloading form"),
                Err(e) if is_terminal(&e) => return Err(e),
                Err(e) => debug!(worker = self.worker_id, "Back to form failed ({}); reloading", e),
            }
        }

        self.form = FormMemory::default();
        self.with_step_retries("open form", |driver| {
            Box::pin(async move { driver.portal.open(driver.browser.as_mut()).await })
        })
        .await?;
        self.form.loaded = true;
        Ok(())
    }

    /// Select `code` in a dropdown once its options have arrived.
    async fn select_code(&mut self, selector: &str, code: &str) -> Result<SelectOption, DriverError> {
        let options = self
            .portal
            .wait_for_options(self.browser.as_mut(), selector)
            .await?;
        if options.is_empty() {
            return Err(DriverError::ElementNotFound(format!(
                "{} has no options",
                selector
            )));
        }
        let option = find_code(&options, code)
            .cloned()
            .ok_or_else(|| DriverError::ElementNotFound(format!("{} option {}", selector, code)))?;
        self.portal
            .choose(self.browser.as_mut(), selector, &option.value)
            .await?;
        Ok(option)
    }

    async fn select_step(
        &mut self,
        step: &'static str,
        selector: &str,
        code: &str,
    ) -> Result<SelectOption, DriverError> {
        let selector = selector.to_string();
        let code = code.to_string();
        self.with_step_retries(step, move |driver| {
            let selector = selector.clone();
            let code = code.clone();
            Box::pin(async move { driver.select_code(&selector, &code).await })
        })
        .await
    }

    async fn pick_survey(&mut self, filter: Option<&SurveyFilter>) -> Result<SurveyPick, DriverError> {
        let selector = self.portal.config().selectors.survey.clone();
        let options = self
            .portal
            .wait_for_options(self.browser.as_mut(), &selector)
            .await?;
        if options.is_empty() {
            return Ok(SurveyPick::Missing(NoDataReason::NoSurveys));
        }
        let Some(option) = choose_survey(&options, filter).cloned() else {
            return Ok(SurveyPick::Missing(NoDataReason::SurveyNotFound));
        };
        self.portal
            .choose(self.browser.as_mut(), &selector, &option.value)
            .await?;
        Ok(SurveyPick::Chosen(option))
    }

    /// Walk the cascade: record type, district, taluka, village, survey.
    /// District and taluka are skipped when the form still holds them.
    async fn select_hierarchy(
        &mut self,
        task: &LocationTask,
    ) -> Result<Result<SelectedLocation, NoDataReason>, DriverError> {
        let selectors = self.portal.config().selectors.clone();

        let kept = match (&self.form.district, &self.form.taluka) {
            (Some(d), Some(t)) if d.code == task.district && t.code == task.taluka => {
                Some((d.clone(), t.clone()))
            }
            _ => None,
        };

        let (district, taluka) = match kept {
            Some(pair) => {
                debug!(worker = self.worker_id, "Reusing district/taluka selection");
                pair
            }
            None => {
                if self.form.district.is_none() {
                    let record_type = self.portal.config().record_type_value.clone();
                    self.select_step("select record type", &selectors.record_type, &record_type)
                        .await?;
                }
                self.form.taluka = None;
                let district = named(
                    &self
                        .select_step("select district", &selectors.district, &task.district)
                        .await?,
                );
                self.form.district = Some(district.clone());
                let taluka = named(
                    &self
                        .select_step("select taluka", &selectors.taluka, &task.taluka)
                        .await?,
                );
                self.form.taluka = Some(taluka.clone());
                (district, taluka)
            }
        };

        let village = named(
            &self
                .select_step("select village", &selectors.village, &task.village)
                .await?,
        );

        let filter = task.survey.clone();
        let pick = self
            .with_step_retries("select survey", move |driver| {
                let filter = filter.clone();
                Box::pin(async move { driver.pick_survey(filter.as_ref()).await })
            })
            .await?;

        Ok(match pick {
            SurveyPick::Chosen(survey) => Ok(SelectedLocation {
                district,
                taluka,
                village,
                survey: named(&survey),
            }),
            SurveyPick::Missing(reason) => Err(reason),
        })
    }

    fn round_error(&mut self, e: DriverError) -> Attempt<(), RoundFailure> {
        if is_terminal(&e) {
            return Attempt::Abort(RoundFailure::Driver(e));
        }
        self.tracker.move_to(SessionState::Recovering);
        Attempt::Retry(RoundFailure::Driver(e))
    }

    /// One captcha round on the already selected form.
    async fn captcha_round(&mut self, attempt: u32) -> Attempt<(), RoundFailure> {
        if attempt > 0 {
            // New image in place; the hierarchy stays selected.
            if let Err(e) = self.portal.refresh_captcha(self.browser.as_mut()).await {
                return self.round_error(e);
            }
        }
        self.tracker.move_to(SessionState::AwaitingCaptchaSolve);

        let image = match self.portal.captcha_image(self.browser.as_mut()).await {
            Ok(Some(image)) => image,
            Ok(None) => {
                self.tracker.move_to(SessionState::Recovering);
                return Attempt::Retry(RoundFailure::CaptchaMissing);
            }
            Err(e) => return self.round_error(e),
        };

        let mut record = CaptchaAttempt {
            image_bytes: image.len(),
            provider_used: None,
            recognized_text: None,
            accepted_by_site: false,
            attempt_index: attempt,
        };

        let Some(solution) = self.resolver.resolve(&image).await else {
            record.log();
            self.tracker.move_to(SessionState::Recovering);
            return Attempt::Retry(RoundFailure::Unsolved);
        };
        record.provider_used = Some(solution.provider.clone());
        record.recognized_text = Some(solution.text.clone());

        self.tracker.move_to(SessionState::Submitting);
        if let Err(e) = self
            .portal
            .submit_captcha(self.browser.as_mut(), &solution.text)
            .await
        {
            record.log();
            return self.round_error(e);
        }

        self.tracker.move_to(SessionState::ClassifyingResult);
        let outcome = match self.portal.read_outcome(self.browser.as_mut()).await {
            Ok(outcome) => outcome,
            Err(e) => {
                record.log();
                return self.round_error(e);
            }
        };
        record.accepted_by_site = outcome != PageOutcome::WrongCaptcha;
        record.log();

        if outcome != PageOutcome::Success {
            debug!(
                worker = self.worker_id,
                "Captcha round {} ended {}",
                attempt + 1,
                outcome.as_str()
            );
            self.tracker.move_to(SessionState::Recovering);
            return Attempt::Retry(RoundFailure::Rejected(outcome));
        }

        self.form.on_results = true;
        Attempt::Done(())
    }
}

/// Builds session drivers that share one resolver and extractor.
#[derive(Clone)]
pub struct SessionBuilder {
    portal: Portal,
    resolver: Arc<CaptchaResolver>,
    extractor: Arc<RecordExtractor>,
    settings: SessionSettings,
}

impl SessionBuilder {
    pub fn new(
        portal: Portal,
        resolver: Arc<CaptchaResolver>,
        extractor: Arc<RecordExtractor>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            portal,
            resolver,
            extractor,
            settings,
        }
    }

    pub fn from_config(config: &Config, resolver: Arc<CaptchaResolver>) -> Self {
        Self::new(
            Portal::new(Arc::new(config.portal.clone()), config.timeouts.clone()),
            resolver,
            Arc::new(RecordExtractor::new(config.portal.name.clone())),
            SessionSettings::from_config(&config.scheduler),
        )
    }

    pub fn build(&self, worker_id: usize, browser: Box<dyn BrowserDriver>) -> SessionDriver {
        SessionDriver::new(
            worker_id,
            browser,
            self.portal.clone(),
            Arc::clone(&self.resolver),
            Arc::clone(&self.extractor),
            self.settings.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::fake::{PortalScript, RecordPage, ScriptedPortalFactory, SubmitOutcome};
    use crate::captcha::{CaptchaFormat, ProviderError, RecognitionProvider};
    use crate::config::TimeoutConfig;
    use async_trait::async_trait;

    struct Fixed(&'static str);

    #[async_trait]
    impl RecognitionProvider for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        fn is_available(&self) -> bool {
            true
        }

        async fn recognize(&self, _image: &[u8]) -> Result<String, ProviderError> {
            Ok(self.0.to_string())
        }
    }

    fn builder(factory: &ScriptedPortalFactory, answer: &'static str) -> SessionBuilder {
        let resolver = CaptchaResolver::new(
            vec![Arc::new(Fixed(answer))],
            CaptchaFormat::default(),
            RetryPolicy::immediate(1),
        );
        SessionBuilder::new(
            Portal::new(Arc::new(factory.portal().clone()), TimeoutConfig::immediate()),
            Arc::new(resolver),
            Arc::new(RecordExtractor::default()),
            SessionSettings::default(),
        )
    }

    fn driver(factory: &ScriptedPortalFactory, answer: &'static str) -> SessionDriver {
        builder(factory, answer).build(0, Box::new(factory.session(0)))
    }

    #[tokio::test]
    async fn successful_task_extracts_record() {
        let factory = ScriptedPortalFactory::new(PortalScript::new());
        let mut session = driver(&factory, "482193");

        let task = LocationTask::new("02", "07", "001");
        let outcome = session.run(&task).await.unwrap();
        let TaskOutcome::Succeeded(done) = outcome else {
            panic!("expected success, got {:?}", outcome);
        };
        assert_eq!(done.harvest.location.village.name, "ભાડોલ - 1");
        assert_eq!(done.harvest.location.survey.code, "101");
        assert_eq!(done.record.property_identity.khata_number.as_deref(), Some("32"));
        assert_eq!(session.state(), SessionState::Done);
    }

    #[tokio::test]
    async fn failed_result_read_is_retried_without_resubmitting() {
        let factory = ScriptedPortalFactory::new(PortalScript::new().with_flaky_table_reads(1));
        let s = factory.portal().selectors.clone();
        let mut session = driver(&factory, "482193");

        let outcome = session.run(&LocationTask::new("02", "07", "001")).await.unwrap();
        let TaskOutcome::Succeeded(done) = outcome else {
            panic!("expected success, got {:?}", outcome);
        };
        assert_eq!(done.record.property_identity.khata_number.as_deref(), Some("32"));
        assert!(!done.harvest.tables.is_empty());

        let log = factory.log();
        assert_eq!(log.submissions(&s.captcha_input), 1);
        assert_eq!(log.captcha_fills(&s.captcha_input), 1);
        assert_eq!(session.state(), SessionState::Done);
    }

    #[tokio::test]
    async fn captcha_retries_never_reselect_hierarchy() {
        let factory = ScriptedPortalFactory::new(PortalScript::new().with_outcome(|sub| {
            if sub.attempt < 2 {
                SubmitOutcome::WrongCaptcha
            } else {
                SubmitOutcome::Record(RecordPage::sample())
            }
        }));
        let s = factory.portal().selectors.clone();
        let mut session = driver(&factory, "111111");

        let outcome = session.run(&LocationTask::new("02", "07", "002")).await.unwrap();
        assert_eq!(outcome.label(), "succeeded");

        let log = factory.log();
        for selector in [&s.district, &s.taluka, &s.village, &s.survey] {
            assert_eq!(log.selections(selector), 1, "{}", selector);
        }
        assert_eq!(log.submissions(&s.captcha_input), 3);
        assert_eq!(log.captcha_fills(&s.captcha_input), 3);
        assert_eq!(log.navigations(), 1);
    }

    #[tokio::test]
    async fn exhausted_captcha_fails_task() {
        let factory =
            ScriptedPortalFactory::new(PortalScript::new().always(SubmitOutcome::WrongCaptcha));
        let s = factory.portal().selectors.clone();
        let mut session = driver(&factory, "111111");

        let outcome = session.run(&LocationTask::new("02", "07", "001")).await.unwrap();
        match outcome {
            TaskOutcome::Failed { reason, detail } => {
                assert_eq!(reason, FailureReason::CaptchaExhausted);
                assert!(detail.contains("wrong_captcha"), "{}", detail);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(factory.log().submissions(&s.captcha_input), 3);
        assert_eq!(session.state(), SessionState::Failed);
    }

    #[tokio::test]
    async fn repeated_no_data_is_terminal() {
        let factory = ScriptedPortalFactory::new(PortalScript::new().always(SubmitOutcome::NoData));
        let s = factory.portal().selectors.clone();
        let mut session = driver(&factory, "111111");

        let outcome = session.run(&LocationTask::new("02", "07", "003")).await.unwrap();
        assert!(matches!(outcome, TaskOutcome::NoData(NoDataReason::NoRecord)));
        assert_eq!(session.state(), SessionState::Done);
        assert_eq!(factory.log().submissions(&s.captcha_input), 3);
    }

    #[tokio::test]
    async fn village_without_surveys_is_no_data() {
        let factory = ScriptedPortalFactory::new(
            PortalScript::new().with_village_surveys("004", Vec::new()),
        );
        let s = factory.portal().selectors.clone();
        let mut session = driver(&factory, "111111");

        let outcome = session.run(&LocationTask::new("02", "07", "004")).await.unwrap();
        assert!(matches!(outcome, TaskOutcome::NoData(NoDataReason::NoSurveys)));
        assert_eq!(factory.log().submissions(&s.captcha_input), 0);
    }

    #[tokio::test]
    async fn survey_filter_without_match_is_no_data() {
        let factory = ScriptedPortalFactory::new(
            PortalScript::new()
                .with_village_surveys("001", vec![SelectOption::new("7", "૭")]),
        );
        let mut session = driver(&factory, "111111");
        let task = LocationTask::new("02", "07", "001")
            .with_survey(Some(SurveyFilter::new("khasra")));
        let outcome = session.run(&task).await.unwrap();
        assert!(matches!(outcome, TaskOutcome::NoData(NoDataReason::SurveyNotFound)));
    }

    #[tokio::test]
    async fn unknown_village_fails_selection() {
        let factory = ScriptedPortalFactory::new(PortalScript::new());
        let mut session = driver(&factory, "111111");
        let outcome = session.run(&LocationTask::new("02", "07", "999")).await.unwrap();
        assert!(matches!(
            outcome,
            TaskOutcome::Failed {
                reason: FailureReason::Selection,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn reused_session_goes_back_and_keeps_district() {
        let factory = ScriptedPortalFactory::new(PortalScript::new());
        let s = factory.portal().selectors.clone();
        let mut session = driver(&factory, "111111");

        session.run(&LocationTask::new("02", "07", "001")).await.unwrap();
        session.run(&LocationTask::new("02", "07", "002")).await.unwrap();

        let log = factory.log();
        assert_eq!(log.navigations(), 1);
        assert_eq!(log.selections(&s.district), 1);
        assert_eq!(log.selections(&s.taluka), 1);
        assert_eq!(log.selected_values(&s.village), vec!["001", "002"]);
    }

    #[tokio::test]
    async fn missing_back_link_reloads_form() {
        let factory = ScriptedPortalFactory::new(PortalScript::new().without_back_link());
        let s = factory.portal().selectors.clone();
        let mut session = driver(&factory, "111111");

        session.run(&LocationTask::new("02", "07", "001")).await.unwrap();
        let outcome = session.run(&LocationTask::new("02", "07", "002")).await.unwrap();
        assert_eq!(outcome.label(), "succeeded");

        let log = factory.log();
        assert_eq!(log.navigations(), 2);
        assert_eq!(log.selections(&s.district), 2);
    }

    #[tokio::test]
    async fn unreadable_captcha_exhausts_rounds() {
        let factory = ScriptedPortalFactory::new(PortalScript::new());
        let s = factory.portal().selectors.clone();
        let mut session = driver(&factory, "abc");

        let outcome = session.run(&LocationTask::new("02", "07", "001")).await.unwrap();
        assert_eq!(outcome.label(), "captcha_exhausted");
        assert_eq!(factory.log().submissions(&s.captcha_input), 0);
    }
}
