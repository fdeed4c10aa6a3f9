//! Configuration: TOML file plus environment overrides.
//!
//! Lookup order for the file: `--config <path>`, `./rorscrape.toml`,
//! `<config_dir>/rorscrape/config.toml`. A missing file yields defaults.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Config file looked up in the working directory.
pub const LOCAL_CONFIG_FILENAME: &str = "rorscrape.toml";

/// Highest numbered `GEMINI_API_KEY_<n>` variable read into the key pool.
const MAX_NUMBERED_KEYS: usize = 10;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config value: {0}")]
    Invalid(String),
}

/// Worker pool settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Concurrent workers, each with its own browser session.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Captcha solve-and-submit rounds per task.
    #[serde(default = "default_max_captcha_attempts")]
    pub max_captcha_attempts: u32,
    /// In-place retries for a single navigation or selection step.
    #[serde(default = "default_step_retries")]
    pub step_retries: u32,
    /// Use the portal's "back" link between tasks instead of reloading.
    #[serde(default = "default_true")]
    pub reuse_session: bool,
}

pub fn default_workers() -> usize {
    5
}

pub fn default_max_captcha_attempts() -> u32 {
    3
}

pub fn default_step_retries() -> u32 {
    3
}

fn default_true() -> bool {
    true
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            max_captcha_attempts: default_max_captcha_attempts(),
            step_retries: default_step_retries(),
            reuse_session: true,
        }
    }
}

/// Headless browser settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrowserConfig {
    #[serde(default = "default_true")]
    pub headless: bool,
    /// Chrome/Chromium binary; searched for when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chrome_path: Option<PathBuf>,
    /// Connect to a running browser's DevTools endpoint instead of launching.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_url: Option<String>,
    #[serde(default = "default_launch_timeout_secs")]
    pub launch_timeout_secs: u64,
    #[serde(default = "default_window")]
    pub window: (u32, u32),
    /// Extra command-line switches passed to Chrome.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
}

pub fn default_launch_timeout_secs() -> u64 {
    30
}

fn default_window() -> (u32, u32) {
    (1280, 900)
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            chrome_path: None,
            remote_url: None,
            launch_timeout_secs: default_launch_timeout_secs(),
            window: default_window(),
            args: Vec::new(),
        }
    }
}

/// Per-step time limits. A step that times out counts as a failed step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_navigation_secs")]
    pub navigation_secs: u64,
    /// Fixed pause after each dropdown selection.
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    /// Interval between checks for a repopulated dropdown.
    #[serde(default = "default_options_poll_ms")]
    pub options_poll_ms: u64,
    /// Give up waiting for dropdown options after this long.
    #[serde(default = "default_options_timeout_secs")]
    pub options_timeout_secs: u64,
    #[serde(default = "default_submit_secs")]
    pub submit_secs: u64,
    /// How long to look for a result or error marker after submitting.
    #[serde(default = "default_classify_secs")]
    pub classify_secs: u64,
}

pub fn default_navigation_secs() -> u64 {
    60
}

pub fn default_settle_ms() -> u64 {
    1500
}

pub fn default_options_poll_ms() -> u64 {
    250
}

pub fn default_options_timeout_secs() -> u64 {
    30
}

pub fn default_submit_secs() -> u64 {
    10
}

pub fn default_classify_secs() -> u64 {
    10
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            navigation_secs: default_navigation_secs(),
            settle_ms: default_settle_ms(),
            options_poll_ms: default_options_poll_ms(),
            options_timeout_secs: default_options_timeout_secs(),
            submit_secs: default_submit_secs(),
            classify_secs: default_classify_secs(),
        }
    }
}

impl TimeoutConfig {
    pub fn navigation(&self) -> Duration {
        Duration::from_secs(self.navigation_secs)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn options_poll(&self) -> Duration {
        Duration::from_millis(self.options_poll_ms.max(10))
    }

    pub fn options_timeout(&self) -> Duration {
        Duration::from_secs(self.options_timeout_secs)
    }

    pub fn submit(&self) -> Duration {
        Duration::from_secs(self.submit_secs)
    }

    pub fn classify(&self) -> Duration {
        Duration::from_secs(self.classify_secs)
    }

    /// No waiting at all; for scripted portals in tests.
    pub fn immediate() -> Self {
        Self {
            navigation_secs: 5,
            settle_ms: 0,
            options_poll_ms: 10,
            options_timeout_secs: 1,
            submit_secs: 5,
            classify_secs: 1,
        }
    }
}

/// Managed Vertex AI channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VertexConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(default = "default_vertex_location")]
    pub location: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
}

fn default_vertex_location() -> String {
    "us-central1".to_string()
}

impl Default for VertexConfig {
    fn default() -> Self {
        Self {
            project: None,
            location: default_vertex_location(),
            access_token: None,
        }
    }
}

/// API-key channel and its key pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeminiConfig {
    #[serde(default = "default_gemini_model")]
    pub model: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub api_keys: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
}

fn default_gemini_model() -> String {
    crate::captcha::gemini::DEFAULT_MODEL.to_string()
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            model: default_gemini_model(),
            api_keys: Vec::new(),
            prompt: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TesseractConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_tesseract_binary")]
    pub binary: String,
}

fn default_tesseract_binary() -> String {
    "tesseract".to_string()
}

impl Default for TesseractConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            binary: default_tesseract_binary(),
        }
    }
}

/// Captcha resolver settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptchaConfig {
    /// Exact length of a valid answer; `0` accepts any non-empty answer.
    #[serde(default = "default_expected_length")]
    pub expected_length: Option<usize>,
    #[serde(default = "default_true")]
    pub numeric_only: bool,
    /// Walks of the full provider chain per resolve.
    #[serde(default = "default_resolve_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub vertex: VertexConfig,
    #[serde(default)]
    pub gemini: GeminiConfig,
    #[serde(default)]
    pub tesseract: TesseractConfig,
}

fn default_expected_length() -> Option<usize> {
    Some(6)
}

pub fn default_resolve_attempts() -> u32 {
    3
}

pub fn default_backoff_ms() -> u64 {
    500
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for CaptchaConfig {
    fn default() -> Self {
        Self {
            expected_length: default_expected_length(),
            numeric_only: true,
            max_attempts: default_resolve_attempts(),
            backoff_ms: default_backoff_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            vertex: VertexConfig::default(),
            gemini: GeminiConfig::default(),
            tesseract: TesseractConfig::default(),
        }
    }
}

/// CSS selectors for the land-record form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortalSelectors {
    #[serde(default = "default_record_type_selector")]
    pub record_type: String,
    #[serde(default = "default_district_selector")]
    pub district: String,
    #[serde(default = "default_taluka_selector")]
    pub taluka: String,
    #[serde(default = "default_village_selector")]
    pub village: String,
    #[serde(default = "default_survey_selector")]
    pub survey: String,
    #[serde(default = "default_captcha_input_selector")]
    pub captcha_input: String,
    /// Tried in order; the first present element is the captcha image.
    #[serde(default = "default_captcha_image_selectors")]
    pub captcha_image: Vec<String>,
    #[serde(default = "default_refresh_selector")]
    pub refresh: String,
    #[serde(default = "default_back_link_selector")]
    pub back_link: String,
    #[serde(default = "default_error_message_selector")]
    pub error_message: String,
    #[serde(default = "default_content_selector")]
    pub content: String,
}

fn default_record_type_selector() -> String {
    "#ContentPlaceHolder1_drpLandRecord".to_string()
}

fn default_district_selector() -> String {
    "#ContentPlaceHolder1_ddlDistrict".to_string()
}

fn default_taluka_selector() -> String {
    "#ContentPlaceHolder1_ddlTaluka".to_string()
}

fn default_village_selector() -> String {
    "#ContentPlaceHolder1_ddlVillage".to_string()
}

fn default_survey_selector() -> String {
    "#ContentPlaceHolder1_ddlSurveyNo".to_string()
}

fn default_captcha_input_selector() -> String {
    "#ContentPlaceHolder1_txt_captcha_1".to_string()
}

fn default_captcha_image_selectors() -> Vec<String> {
    vec![
        "#ContentPlaceHolder1_i_captcha_1".to_string(),
        "#ContentPlaceHolder1_imgCaptcha".to_string(),
        "img[id*='captcha']".to_string(),
    ]
}

fn default_refresh_selector() -> String {
    "#ContentPlaceHolder1_lb_refresh_1".to_string()
}

fn default_back_link_selector() -> String {
    "a[id*='lnkBack'], a[id*='btnBack']".to_string()
}

fn default_error_message_selector() -> String {
    "[id*='lblError'], [id*='lblMsg']".to_string()
}

fn default_content_selector() -> String {
    "#ContentPlaceHolder1".to_string()
}

impl Default for PortalSelectors {
    fn default() -> Self {
        Self {
            record_type: default_record_type_selector(),
            district: default_district_selector(),
            taluka: default_taluka_selector(),
            village: default_village_selector(),
            survey: default_survey_selector(),
            captcha_input: default_captcha_input_selector(),
            captcha_image: default_captcha_image_selectors(),
            refresh: default_refresh_selector(),
            back_link: default_back_link_selector(),
            error_message: default_error_message_selector(),
            content: default_content_selector(),
        }
    }
}

/// Everything specific to the target portal's markup and copy.
///
/// Marker phrases are matched against rendered page text and have to be
/// re-checked whenever the portal changes its wording.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortalConfig {
    #[serde(default = "default_portal_url")]
    pub url: String,
    #[serde(default = "default_portal_name")]
    pub name: String,
    /// Option value of the VF-7 record type.
    #[serde(default = "default_record_type_value")]
    pub record_type_value: String,
    #[serde(default)]
    pub selectors: PortalSelectors,
    #[serde(default = "default_refresh_text")]
    pub refresh_text: String,
    #[serde(default = "default_back_text")]
    pub back_text: String,
    #[serde(default = "default_success_markers")]
    pub success_markers: Vec<String>,
    #[serde(default = "default_no_data_markers")]
    pub no_data_markers: Vec<String>,
    #[serde(default = "default_wrong_captcha_markers")]
    pub wrong_captcha_markers: Vec<String>,
    #[serde(default = "default_placeholder_values")]
    pub placeholder_values: Vec<String>,
    #[serde(default = "default_placeholder_labels")]
    pub placeholder_labels: Vec<String>,
    /// Element id fragments per labeled result field, tried in order.
    #[serde(default = "default_labeled_ids")]
    pub labeled_ids: BTreeMap<String, Vec<String>>,
    /// Tables with less text than this are layout, not data.
    #[serde(default = "default_min_table_chars")]
    pub min_table_chars: usize,
}

fn default_portal_url() -> String {
    "https://anyror.gujarat.gov.in/LandRecordRural.aspx".to_string()
}

fn default_portal_name() -> String {
    crate::extract::DEFAULT_PORTAL_NAME.to_string()
}

fn default_record_type_value() -> String {
    "1".to_string()
}

fn default_refresh_text() -> String {
    "Refresh Code".to_string()
}

fn default_back_text() -> String {
    "Back".to_string()
}

fn default_success_markers() -> Vec<String> {
    vec!["ખાતા નંબર".to_string(), "Khata".to_string()]
}

fn default_no_data_markers() -> Vec<String> {
    vec![
        "No Record Found".to_string(),
        "રેકર્ડ મળેલ નથી".to_string(),
        "માહિતી ઉપલબ્ધ નથી".to_string(),
    ]
}

fn default_wrong_captcha_markers() -> Vec<String> {
    vec![
        "wrong".to_string(),
        "invalid captcha".to_string(),
        "ખોટો".to_string(),
    ]
}

fn default_placeholder_values() -> Vec<String> {
    vec!["0".to_string(), "-1".to_string(), String::new()]
}

fn default_placeholder_labels() -> Vec<String> {
    vec!["પસંદ".to_string(), "select".to_string()]
}

pub fn default_min_table_chars() -> usize {
    200
}

fn default_labeled_ids() -> BTreeMap<String, Vec<String>> {
    let entries: &[(&str, &[&str])] = &[
        ("data_status_time", &["lblDataTime", "lblDateTime", "lblStatusTime"]),
        ("survey_number", &["lblSurveyNo", "lblBlockNo", "lblSurveyBlockNo"]),
        ("upin", &["lblUPIN", "lblUpin", "lblPropertyId"]),
        ("old_survey_number", &["lblOldSurveyNo", "lblOldSurvey"]),
        ("old_survey_notes", &["lblOldSurveyNotes", "lblOldNotes"]),
        ("khata_number", &["lblKhataNo", "lblKhata"]),
        ("total_area", &["lblArea", "lblTotalArea"]),
        ("assessment_tax", &["lblAssessment", "lblAakar", "lblTax"]),
        ("tenure", &["lblTenure", "lblSattaPrakar"]),
        ("land_use", &["lblLandUse", "lblUse"]),
        ("farm_name", &["lblFarmName", "lblKhetarName"]),
        ("remarks", &["lblRemarks", "lblOtherDetails"]),
    ];
    entries
        .iter()
        .map(|(field, ids)| {
            (
                field.to_string(),
                ids.iter().map(|id| id.to_string()).collect(),
            )
        })
        .collect()
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            url: default_portal_url(),
            name: default_portal_name(),
            record_type_value: default_record_type_value(),
            selectors: PortalSelectors::default(),
            refresh_text: default_refresh_text(),
            back_text: default_back_text(),
            success_markers: default_success_markers(),
            no_data_markers: default_no_data_markers(),
            wrong_captcha_markers: default_wrong_captcha_markers(),
            placeholder_values: default_placeholder_values(),
            placeholder_labels: default_placeholder_labels(),
            labeled_ids: default_labeled_ids(),
            min_table_chars: default_min_table_chars(),
        }
    }
}

/// Resume ledger location.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Defaults to `<data_dir>/ledger`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
    /// Optional SQLite database every completed record is mirrored into.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sqlite_mirror: Option<PathBuf>,
}

/// Audit copies of raw harvests.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArchiveConfig {
    #[serde(default)]
    pub keep_raw: bool,
    /// Defaults to `<data_dir>/raw`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

/// Configuration file structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub captcha: CaptchaConfig,
    #[serde(default)]
    pub portal: PortalConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub archive: ArchiveConfig,
    /// Path to the config file this was loaded from (not serialized).
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

/// `<data_dir>/rorscrape`, falling back to the home directory, then `.`.
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("rorscrape")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            scheduler: SchedulerConfig::default(),
            browser: BrowserConfig::default(),
            timeouts: TimeoutConfig::default(),
            captcha: CaptchaConfig::default(),
            portal: PortalConfig::default(),
            ledger: LedgerConfig::default(),
            archive: ArchiveConfig::default(),
            source_path: None,
        }
    }
}

impl Config {
    /// Load from `explicit`, or the first config file found, then apply
    /// environment overrides.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => find_config_file(),
        };

        let mut config = match path {
            Some(path) => Self::from_path(&path)?,
            None => {
                debug!("No config file found, using defaults");
                Self::default()
            }
        };

        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Parse a config file. Relative paths inside it resolve against its directory.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml(&content)?;
        if let Some(base) = path.parent() {
            config.resolve_relative_paths(base);
        }
        config.source_path = Some(path.to_path_buf());
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    fn resolve_relative_paths(&mut self, base: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() && !p.as_os_str().is_empty() {
                *p = base.join(&*p);
            }
        };
        resolve(&mut self.data_dir);
        if let Some(dir) = self.ledger.dir.as_mut() {
            resolve(dir);
        }
        if let Some(db) = self.ledger.sqlite_mirror.as_mut() {
            resolve(db);
        }
        if let Some(dir) = self.archive.dir.as_mut() {
            resolve(dir);
        }
    }

    /// Overlay environment variables on top of file values.
    pub fn apply_env(&mut self) {
        if let Some(dir) = env_non_empty("RORSCRAPE_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(workers) = env_non_empty("RORSCRAPE_WORKERS").and_then(|w| w.parse().ok()) {
            self.scheduler.workers = workers;
        }
        if let Some(url) = env_non_empty("BROWSER_URL") {
            self.browser.remote_url = Some(url);
        }
        if let Some(path) = env_non_empty("CHROME_PATH") {
            self.browser.chrome_path = Some(PathBuf::from(path));
        }

        // Key pool: GEMINI_API_KEY, then GEMINI_API_KEY_2 .. GEMINI_API_KEY_10.
        let mut env_keys: Vec<String> = env_non_empty("GEMINI_API_KEY").into_iter().collect();
        for i in 2..=MAX_NUMBERED_KEYS {
            if let Some(key) = env_non_empty(&format!("GEMINI_API_KEY_{}", i)) {
                env_keys.push(key);
            }
        }
        for key in env_keys {
            if !self.captcha.gemini.api_keys.contains(&key) {
                self.captcha.gemini.api_keys.push(key);
            }
        }

        if let Some(token) = env_non_empty("VERTEX_ACCESS_TOKEN") {
            self.captcha.vertex.access_token = Some(token);
        }
        if let Some(project) = env_non_empty("VERTEX_PROJECT") {
            self.captcha.vertex.project = Some(project);
        }
        if let Some(location) = env_non_empty("VERTEX_LOCATION") {
            self.captcha.vertex.location = location;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scheduler.workers == 0 {
            return Err(ConfigError::Invalid("scheduler.workers must be at least 1".into()));
        }
        if self.scheduler.max_captcha_attempts == 0 {
            return Err(ConfigError::Invalid(
                "scheduler.max_captcha_attempts must be at least 1".into(),
            ));
        }
        if self.portal.selectors.captcha_image.is_empty() {
            return Err(ConfigError::Invalid(
                "portal.selectors.captcha_image needs at least one selector".into(),
            ));
        }
        Ok(())
    }

    pub fn ledger_dir(&self) -> PathBuf {
        self.ledger
            .dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("ledger"))
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.archive
            .dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("raw"))
    }
}

fn env_non_empty(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// First existing config file among the default locations.
pub fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from(LOCAL_CONFIG_FILENAME);
    if local.is_file() {
        return Some(local);
    }
    dirs::config_dir()
        .map(|dir| dir.join("rorscrape").join("config.toml"))
        .filter(|p| p.is_file())
}
