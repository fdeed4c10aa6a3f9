//! Narrow browser capability interface used by the session driver.
//!
//! The driver never touches a page directly; everything goes through
//! [`BrowserDriver`], so a real Chrome session and the scripted fake used
//! in tests are interchangeable.

#[cfg(feature = "browser")]
mod chromium;
#[cfg(any(test, feature = "test-support"))]
pub mod fake;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[cfg(feature = "browser")]
pub use chromium::ChromiumLauncher;

/// One `<option>` of a dropdown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectOption {
    pub value: String,
    pub label: String,
}

impl SelectOption {
    pub fn new(value: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            label: label.into(),
        }
    }
}

/// Failures of a browser capability call.
///
/// Only [`DriverError::Launch`] is fatal to a run; everything else is a
/// step failure the session driver retries or records against the task.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("failed to start browser: {0}")]
    Launch(String),

    #[error("timed out after {secs}s: {step}")]
    Timeout { step: String, secs: u64 },

    #[error("element not found: {0}")]
    ElementNotFound(String),

    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("browser protocol error: {0}")]
    Protocol(String),

    #[error("browser session closed")]
    Closed,
}

impl DriverError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, DriverError::Launch(_))
    }

    pub fn timeout(step: impl Into<String>, limit: Duration) -> Self {
        DriverError::Timeout {
            step: step.into(),
            secs: limit.as_secs(),
        }
    }
}

/// The capability set the session driver needs from a live page.
///
/// Selectors are CSS selectors. Read operations return `None`/empty for
/// absent elements instead of failing.
#[async_trait]
pub trait BrowserDriver: Send {
    async fn goto(&mut self, url: &str) -> Result<(), DriverError>;

    async fn current_url(&mut self) -> Result<Option<String>, DriverError>;

    /// Choose the option with `value` and fire the change event.
    async fn select_option(&mut self, selector: &str, value: &str) -> Result<(), DriverError>;

    /// Options of a `<select>`, in page order. Empty when absent.
    async fn options(&mut self, selector: &str) -> Result<Vec<SelectOption>, DriverError>;

    async fn fill(&mut self, selector: &str, text: &str) -> Result<(), DriverError>;

    async fn press(&mut self, selector: &str, key: &str) -> Result<(), DriverError>;

    async fn click(&mut self, selector: &str) -> Result<(), DriverError>;

    /// Click the first link or button whose visible text contains `text`.
    /// `Ok(false)` when nothing matched.
    async fn click_text(&mut self, text: &str) -> Result<bool, DriverError>;

    async fn exists(&mut self, selector: &str) -> Result<bool, DriverError>;

    /// Visible text of the first matching element.
    async fn text(&mut self, selector: &str) -> Result<Option<String>, DriverError>;

    /// Visible text of every matching element.
    async fn texts(&mut self, selector: &str) -> Result<Vec<String>, DriverError>;

    async fn attribute(
        &mut self,
        selector: &str,
        name: &str,
    ) -> Result<Option<String>, DriverError>;

    /// PNG bytes of the element's rendered box.
    async fn element_screenshot(&mut self, selector: &str) -> Result<Vec<u8>, DriverError>;

    /// Wait until the document has finished loading, bounded by `limit`.
    async fn wait_for_idle(&mut self, limit: Duration) -> Result<(), DriverError>;

    /// Full visible text of the page body.
    async fn page_text(&mut self) -> Result<String, DriverError>;

    async fn close(&mut self);
}

/// Opens one isolated browser session per worker.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn open(&self, worker_id: usize) -> Result<Box<dyn BrowserDriver>, DriverError>;
}

/// Launcher used when the crate is built without Chrome support.
#[cfg(not(feature = "browser"))]
pub struct ChromiumLauncher;

#[cfg(not(feature = "browser"))]
impl ChromiumLauncher {
    pub fn new(_config: crate::config::BrowserConfig, _timeouts: crate::config::TimeoutConfig) -> Self {
        Self
    }
}

#[cfg(not(feature = "browser"))]
#[async_trait]
impl SessionFactory for ChromiumLauncher {
    async fn open(&self, _worker_id: usize) -> Result<Box<dyn BrowserDriver>, DriverError> {
        Err(DriverError::Launch(
            "Browser support not compiled. Rebuild with: cargo build --features browser"
                .to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_launch_failures_are_fatal() {
        assert!(DriverError::Launch("no chrome".into()).is_fatal());
        assert!(!DriverError::timeout("submit", Duration::from_secs(10)).is_fatal());
        assert!(!DriverError::ElementNotFound("#x".into()).is_fatal());
        assert!(!DriverError::Closed.is_fatal());
    }

    #[test]
    fn timeout_reports_step_and_limit() {
        let err = DriverError::timeout("navigate", Duration::from_secs(60));
        assert_eq!(err.to_string(), "timed out after 60s: navigate");
    }
}
