//! Portal-specific page operations built on the browser capability set.

use std::sync::Arc;

use base64::Engine;
use tracing::{debug, warn};

use super::classify::{Markers, PageOutcome};
use super::survey::real_options;
use crate::browser::{BrowserDriver, DriverError, SelectOption};
use crate::config::{PortalConfig, TimeoutConfig};
use crate::models::{RawHarvest, SelectedLocation, TableBlock, TableKind, TaskId};

/// Bytes of a `data:image/...;base64,` URI, if `src` is one.
pub fn decode_data_uri(src: &str) -> Option<Vec<u8>> {
    let rest = src.trim().strip_prefix("data:image/")?;
    let (_, payload) = rest.split_once(";base64,")?;
    base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .ok()
        .filter(|bytes| !bytes.is_empty())
}

/// The land-record form as a set of operations on one page.
#[derive(Debug, Clone)]
pub struct Portal {
    config: Arc<PortalConfig>,
    timeouts: TimeoutConfig,
    markers: Markers,
}

impl Portal {
    pub fn new(config: Arc<PortalConfig>, timeouts: TimeoutConfig) -> Self {
        let markers = Markers::from_portal(&config);
        Self {
            config,
            timeouts,
            markers,
        }
    }

    pub fn config(&self) -> &PortalConfig {
        &self.config
    }

    pub fn timeouts(&self) -> &TimeoutConfig {
        &self.timeouts
    }

    pub async fn open(&self, driver: &mut dyn BrowserDriver) -> Result<(), DriverError> {
        driver.goto(&self.config.url).await?;
        driver.wait_for_idle(self.timeouts.navigation()).await
    }

    /// Real options of a dropdown, polling until the cascade has filled it
    /// or the options timeout passes. Empty means it never populated.
    pub async fn wait_for_options(
        &self,
        driver: &mut dyn BrowserDriver,
        selector: &str,
    ) -> Result<Vec<SelectOption>, DriverError> {
        let deadline = tokio::time::Instant::now() + self.timeouts.options_timeout();
        loop {
            // A postback can swap the document out from under a read.
            match driver.options(selector).await {
                Ok(options) => {
                    let real = real_options(options, &self.config);
                    if !real.is_empty() {
                        return Ok(real);
                    }
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => debug!("Options of {} not readable yet: {}", selector, e),
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(Vec::new());
            }
            tokio::time::sleep(self.timeouts.options_poll()).await;
        }
    }

    /// Select `value` and let the dependent dropdown start repopulating.
    pub async fn choose(
        &self,
        driver: &mut dyn BrowserDriver,
        selector: &str,
        value: &str,
    ) -> Result<(), DriverError> {
        driver.select_option(selector, value).await?;
        let settle = self.timeouts.settle();
        if !settle.is_zero() {
            tokio::time::sleep(settle).await;
        }
        driver.wait_for_idle(self.timeouts.navigation()).await
    }

    /// Captcha image bytes: the inline data URI when there is one,
    /// otherwise a screenshot of the element.
    pub async fn captcha_image(
        &self,
        driver: &mut dyn BrowserDriver,
    ) -> Result<Option<Vec<u8>>, DriverError> {
        for selector in &self.config.selectors.captcha_image {
            if !driver.exists(selector).await? {
                continue;
            }
            if let Some(src) = driver.attribute(selector, "src").await? {
                if let Some(bytes) = decode_data_uri(&src) {
                    return Ok(Some(bytes));
                }
            }
            let shot = driver.element_screenshot(selector).await?;
            if !shot.is_empty() {
                return Ok(Some(shot));
            }
        }
        Ok(None)
    }

    /// Ask the portal for a new captcha without leaving the form.
    pub async fn refresh_captcha(&self, driver: &mut dyn BrowserDriver) -> Result<(), DriverError> {
        let selector = &self.config.selectors.refresh;
        let clicked = match driver.click(selector).await {
            Ok(()) => true,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                debug!("Refresh control {} failed ({}), trying by text", selector, e);
                driver.click_text(&self.config.refresh_text).await?
            }
        };
        if !clicked {
            warn!("No captcha refresh control found");
        }
        driver.wait_for_idle(self.timeouts.submit()).await
    }

    /// Fill the answer and submit with Enter.
    pub async fn submit_captcha(
        &self,
        driver: &mut dyn BrowserDriver,
        answer: &str,
    ) -> Result<(), DriverError> {
        let input = &self.config.selectors.captcha_input;
        driver.fill(input, answer).await?;
        driver.press(input, "Enter").await?;
        driver.wait_for_idle(self.timeouts.submit()).await
    }

    /// Classify the page, polling while it is still ambiguous.
    pub async fn read_outcome(
        &self,
        driver: &mut dyn BrowserDriver,
    ) -> Result<PageOutcome, DriverError> {
        let deadline = tokio::time::Instant::now() + self.timeouts.classify();
        loop {
            let error_text = if driver.exists(&self.config.selectors.error_message).await? {
                driver.text(&self.config.selectors.error_message).await?
            } else {
                None
            };
            let page_text = driver.page_text().await?;
            let outcome = self.markers.classify(error_text.as_deref(), &page_text);
            if outcome != PageOutcome::Ambiguous || tokio::time::Instant::now() >= deadline {
                return Ok(outcome);
            }
            tokio::time::sleep(self.timeouts.options_poll()).await;
        }
    }

    /// Follow the results page's link back to the form. `Ok(false)` when
    /// there is no such link.
    pub async fn back_to_form(&self, driver: &mut dyn BrowserDriver) -> Result<bool, DriverError> {
        let selector = &self.config.selectors.back_link;
        let went_back = if driver.exists(selector).await? {
            driver.click(selector).await?;
            true
        } else {
            driver.click_text(&self.config.back_text).await?
        };
        if went_back {
            driver.wait_for_idle(self.timeouts.navigation()).await?;
        }
        Ok(went_back)
    }

    /// Capture tables, labeled fields and page text from a results page.
    pub async fn harvest(
        &self,
        driver: &mut dyn BrowserDriver,
        task_id: TaskId,
        location: SelectedLocation,
    ) -> Result<RawHarvest, DriverError> {
        let mut harvest = RawHarvest::new(task_id, location);

        let tables = driver
            .texts(&format!("{} table", self.config.selectors.content))
            .await?;
        let mut kept = 0;
        for text in tables {
            if text.chars().count() < self.config.min_table_chars {
                continue;
            }
            harvest.tables.push(TableBlock {
                kind: TableKind::infer(&text, kept),
                text,
            });
            kept += 1;
        }

        for (field, ids) in &self.config.labeled_ids {
            for id in ids {
                let value = driver.text(&format!("[id$='{}']", id)).await?;
                let Some(value) = value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
                else {
                    continue;
                };
                match harvest.fields.slot_mut(field) {
                    Some(slot) => *slot = Some(value),
                    None => warn!("Unknown labeled field in config: {}", field),
                }
                break;
            }
        }

        let page_text = driver.page_text().await?;
        harvest.page_text = Some(page_text).filter(|t| !t.trim().is_empty());
        harvest.source_url = driver.current_url().await?;

        debug!(
            "Harvested {} table(s) from {}",
            harvest.tables.len(),
            harvest.task_id
        );
        Ok(harvest)
    }
}
