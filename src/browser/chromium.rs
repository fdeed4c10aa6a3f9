//! Chrome DevTools implementation of [`BrowserDriver`] via chromiumoxide.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::page::{
    CaptureScreenshotFormat, EventJavascriptDialogOpening, HandleJavaScriptDialogParams,
};
use chromiumoxide::cdp::browser_protocol::target::{
    CreateBrowserContextParams, CreateTargetParams,
};
use chromiumoxide::error::CdpError;
use chromiumoxide::{Browser, BrowserConfig as CdpBrowserConfig, Page};
use futures::StreamExt;
use serde::de::DeserializeOwned;
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{BrowserDriver, DriverError, SelectOption, SessionFactory};
use crate::config::{BrowserConfig, TimeoutConfig};

/// Common Chrome executable paths to check.
const CHROME_PATHS: &[&str] = &[
    // Linux
    "/usr/bin/google-chrome",
    "/usr/bin/google-chrome-stable",
    "/usr/bin/chromium",
    "/usr/bin/chromium-browser",
    "/snap/bin/chromium",
    // macOS
    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
    "/Applications/Chromium.app/Contents/MacOS/Chromium",
    // Common install locations
    "/opt/google/chrome/google-chrome",
];

const CHROME_COMMANDS: &[&str] = &[
    "google-chrome",
    "google-chrome-stable",
    "chromium",
    "chromium-browser",
];

const POLL_INTERVAL: Duration = Duration::from_millis(100);

fn cdp(e: CdpError) -> DriverError {
    DriverError::Protocol(e.to_string())
}

/// JSON-quote a string for embedding in a script.
fn js(s: &str) -> String {
    serde_json::Value::from(s).to_string()
}

fn find_chrome(configured: Option<&PathBuf>) -> Result<PathBuf, DriverError> {
    if let Some(path) = configured {
        if path.exists() {
            return Ok(path.clone());
        }
        warn!("Configured Chrome path {} does not exist", path.display());
    }

    for path in CHROME_PATHS {
        let p = std::path::Path::new(path);
        if p.exists() {
            debug!("Found Chrome at: {}", path);
            return Ok(p.to_path_buf());
        }
    }

    for cmd in CHROME_COMMANDS {
        if let Ok(path) = which::which(cmd) {
            debug!("Found Chrome in PATH: {}", path.display());
            return Ok(path);
        }
    }

    Err(DriverError::Launch(
        "Chrome/Chromium not found. Please install it:\n\
         - Arch/Manjaro: sudo pacman -S chromium\n\
         - Ubuntu/Debian: sudo apt install chromium-browser\n\
         - Fedora: sudo dnf install chromium\n\
         - Or set CHROME_PATH / BROWSER_URL"
            .to_string(),
    ))
}

fn spawn_handler(mut handler: chromiumoxide::Handler) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(h) = handler.next().await {
            if h.is_err() {
                break;
            }
        }
    })
}

fn accept_dialog() -> HandleJavaScriptDialogParams {
    HandleJavaScriptDialogParams::new(true)
}

/// Answer every JavaScript alert or confirm on `page` with OK. An open
/// dialog blocks script evaluation until it is dismissed.
async fn accept_dialogs(page: &Page) -> Result<JoinHandle<()>, DriverError> {
    let mut dialogs = page
        .event_listener::<EventJavascriptDialogOpening>()
        .await
        .map_err(cdp)?;
    let page = page.clone();
    Ok(tokio::spawn(async move {
        while let Some(dialog) = dialogs.next().await {
            debug!("Accepting dialog: {}", dialog.message);
            if let Err(e) = page.execute(accept_dialog()).await {
                warn!("Dialog could not be accepted: {}", e);
            }
        }
    }))
}

/// Launches (or connects to) Chrome and hands out isolated sessions.
///
/// A local launch gets its own Chrome process and profile directory per
/// worker. A remote endpoint gets a fresh browser context per worker, so
/// cookies and storage are never shared between sessions.
pub struct ChromiumLauncher {
    config: BrowserConfig,
    timeouts: TimeoutConfig,
}

impl ChromiumLauncher {
    pub fn new(config: BrowserConfig, timeouts: TimeoutConfig) -> Self {
        Self { config, timeouts }
    }

    async fn launch_local(&self, worker_id: usize) -> Result<ChromiumSession, DriverError> {
        let chrome_path = find_chrome(self.config.chrome_path.as_ref())?;
        let profile = tempfile::Builder::new()
            .prefix(&format!("rorscrape-w{}-", worker_id))
            .tempdir()
            .map_err(|e| DriverError::Launch(format!("failed to create profile dir: {}", e)))?;

        let (width, height) = self.config.window;
        let mut builder = CdpBrowserConfig::builder()
            .chrome_executable(chrome_path)
            .user_data_dir(profile.path())
            .window_size(width, height);

        // with_head means NOT headless
        if !self.config.headless {
            builder = builder.with_head();
        }

        builder = builder
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-infobars")
            .arg("--disable-dev-shm-usage")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--disable-background-networking")
            .arg("--disable-sync")
            .arg("--disable-translate")
            .arg("--no-sandbox")
            .arg("--disable-gpu");

        for arg in &self.config.args {
            builder = builder.arg(arg);
        }

        let config = builder
            .build()
            .map_err(|e| DriverError::Launch(format!("failed to build browser config: {}", e)))?;

        let limit = Duration::from_secs(self.config.launch_timeout_secs);
        let (browser, handler) = tokio::time::timeout(limit, Browser::launch(config))
            .await
            .map_err(|_| DriverError::Launch(format!("launch timed out after {}s", limit.as_secs())))?
            .map_err(|e| DriverError::Launch(e.to_string()))?;
        let handler = spawn_handler(handler);

        let page = browser.new_page("about:blank").await.map_err(cdp)?;
        let dialogs = accept_dialogs(&page).await?;
        info!("Worker {}: launched Chrome (headless={})", worker_id, self.config.headless);

        Ok(ChromiumSession {
            browser,
            page,
            handler,
            dialogs,
            timeouts: self.timeouts.clone(),
            _profile: Some(profile),
        })
    }

    async fn connect_remote(
        &self,
        worker_id: usize,
        url: &str,
    ) -> Result<ChromiumSession, DriverError> {
        // Get WebSocket URL from the /json/version endpoint
        let http_url = url
            .replace("ws://", "http://")
            .replace("wss://", "https://");
        let version_url = format!("{}/json/version", http_url.trim_end_matches('/'));

        let resp: serde_json::Value = reqwest::Client::new()
            .get(&version_url)
            .send()
            .await
            .map_err(|e| DriverError::Launch(format!("failed to reach remote browser: {}", e)))?
            .json()
            .await
            .map_err(|e| DriverError::Launch(format!("bad browser version info: {}", e)))?;

        let ws_url = resp
            .get("webSocketDebuggerUrl")
            .and_then(|v| v.as_str())
            .ok_or_else(|| DriverError::Launch("no webSocketDebuggerUrl in response".to_string()))?;

        let handler_config = chromiumoxide::handler::HandlerConfig {
            request_timeout: self.timeouts.navigation(),
            ..Default::default()
        };

        let (mut browser, handler) = Browser::connect_with_config(ws_url, handler_config)
            .await
            .map_err(|e| DriverError::Launch(e.to_string()))?;
        let handler = spawn_handler(handler);

        let context = browser
            .create_browser_context(CreateBrowserContextParams::default())
            .await
            .map_err(cdp)?;
        let target = CreateTargetParams::builder()
            .url("about:blank")
            .browser_context_id(context)
            .build()
            .map_err(DriverError::Protocol)?;
        let page = browser.new_page(target).await.map_err(cdp)?;
        let dialogs = accept_dialogs(&page).await?;
        info!("Worker {}: connected to remote browser at {}", worker_id, url);

        Ok(ChromiumSession {
            browser,
            page,
            handler,
            dialogs,
            timeouts: self.timeouts.clone(),
            _profile: None,
        })
    }
}

#[async_trait]
impl SessionFactory for ChromiumLauncher {
    async fn open(&self, worker_id: usize) -> Result<Box<dyn BrowserDriver>, DriverError> {
        let session = match self.config.remote_url.as_deref() {
            Some(url) => self.connect_remote(worker_id, url).await?,
            None => self.launch_local(worker_id).await?,
        };
        Ok(Box::new(session))
    }
}

/// One page in one isolated browser session.
pub struct ChromiumSession {
    browser: Browser,
    page: Page,
    handler: JoinHandle<()>,
    dialogs: JoinHandle<()>,
    timeouts: TimeoutConfig,
    // Dropped with the session so the profile directory is removed.
    _profile: Option<TempDir>,
}

impl ChromiumSession {
    async fn eval<T: DeserializeOwned>(&self, script: String) -> Result<T, DriverError> {
        let limit = self.timeouts.navigation();
        let result = tokio::time::timeout(limit, self.page.evaluate(script))
            .await
            .map_err(|_| DriverError::timeout("evaluate", limit))?
            .map_err(cdp)?;
        result
            .into_value()
            .map_err(|e| DriverError::Protocol(format!("unexpected script result: {}", e)))
    }

    async fn element(&self, selector: &str) -> Result<chromiumoxide::Element, DriverError> {
        self.page
            .find_element(selector)
            .await
            .map_err(|_| DriverError::ElementNotFound(selector.to_string()))
    }
}

#[async_trait]
impl BrowserDriver for ChromiumSession {
    async fn goto(&mut self, url: &str) -> Result<(), DriverError> {
        let limit = self.timeouts.navigation();
        tokio::time::timeout(limit, self.page.goto(url))
            .await
            .map_err(|_| DriverError::timeout(format!("navigate to {}", url), limit))?
            .map_err(|e| DriverError::Navigation(e.to_string()))?;
        Ok(())
    }

    async fn current_url(&mut self) -> Result<Option<String>, DriverError> {
        self.page.url().await.map_err(cdp)
    }

    async fn select_option(&mut self, selector: &str, value: &str) -> Result<(), DriverError> {
        let script = format!(
            r#"(() => {{
                const el = document.querySelector({sel});
                if (!el) return false;
                el.value = {val};
                el.dispatchEvent(new Event('change', {{ bubbles: true }}));
                return true;
            }})()"#,
            sel = js(selector),
            val = js(value)
        );
        if self.eval::<bool>(script).await? {
            Ok(())
        } else {
            Err(DriverError::ElementNotFound(selector.to_string()))
        }
    }

    async fn options(&mut self, selector: &str) -> Result<Vec<SelectOption>, DriverError> {
        let script = format!(
            r#"(() => {{
                const el = document.querySelector({sel});
                if (!el) return [];
                return Array.from(el.options).map(o => ({{ value: o.value, label: o.text.trim() }}));
            }})()"#,
            sel = js(selector)
        );
        self.eval(script).await
    }

    async fn fill(&mut self, selector: &str, text: &str) -> Result<(), DriverError> {
        let clear = format!(
            r#"(() => {{
                const el = document.querySelector({sel});
                if (!el) return false;
                el.value = '';
                return true;
            }})()"#,
            sel = js(selector)
        );
        if !self.eval::<bool>(clear).await? {
            return Err(DriverError::ElementNotFound(selector.to_string()));
        }
        let element = self.element(selector).await?;
        element.click().await.map_err(cdp)?;
        element.type_str(text).await.map_err(cdp)?;
        Ok(())
    }

    async fn press(&mut self, selector: &str, key: &str) -> Result<(), DriverError> {
        let element = self.element(selector).await?;
        element.press_key(key).await.map_err(cdp)?;
        Ok(())
    }

    async fn click(&mut self, selector: &str) -> Result<(), DriverError> {
        let element = self.element(selector).await?;
        element.click().await.map_err(cdp)?;
        Ok(())
    }

    async fn click_text(&mut self, text: &str) -> Result<bool, DriverError> {
        let script = format!(
            r#"(() => {{
                const needle = {text};
                const candidates = document.querySelectorAll('a, button, input[type=submit], input[type=button]');
                for (const el of candidates) {{
                    const label = (el.innerText || el.value || '').trim();
                    if (label.includes(needle)) {{ el.click(); return true; }}
                }}
                return false;
            }})()"#,
            text = js(text)
        );
        self.eval(script).await
    }

    async fn exists(&mut self, selector: &str) -> Result<bool, DriverError> {
        self.eval(format!("document.querySelector({}) !== null", js(selector)))
            .await
    }

    async fn text(&mut self, selector: &str) -> Result<Option<String>, DriverError> {
        let script = format!(
            r#"(() => {{
                const el = document.querySelector({sel});
                return el ? el.innerText : null;
            }})()"#,
            sel = js(selector)
        );
        self.eval(script).await
    }

    async fn texts(&mut self, selector: &str) -> Result<Vec<String>, DriverError> {
        let script = format!(
            "Array.from(document.querySelectorAll({})).map(el => el.innerText || '')",
            js(selector)
        );
        self.eval(script).await
    }

    async fn attribute(
        &mut self,
        selector: &str,
        name: &str,
    ) -> Result<Option<String>, DriverError> {
        let script = format!(
            r#"(() => {{
                const el = document.querySelector({sel});
                return el ? el.getAttribute({name}) : null;
            }})()"#,
            sel = js(selector),
            name = js(name)
        );
        self.eval(script).await
    }

    async fn element_screenshot(&mut self, selector: &str) -> Result<Vec<u8>, DriverError> {
        let element = self.element(selector).await?;
        element
            .screenshot(CaptureScreenshotFormat::Png)
            .await
            .map_err(cdp)
    }

    async fn wait_for_idle(&mut self, limit: Duration) -> Result<(), DriverError> {
        let deadline = tokio::time::Instant::now() + limit;
        loop {
            // Evaluation fails while a postback is replacing the document.
            let state = self
                .page
                .evaluate("document.readyState".to_string())
                .await
                .ok()
                .and_then(|r| r.into_value::<String>().ok());
            if state.as_deref() == Some("complete") {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(DriverError::timeout("wait for page load", limit));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn page_text(&mut self) -> Result<String, DriverError> {
        self.eval("document.body ? document.body.innerText : ''".to_string())
            .await
    }

    async fn close(&mut self) {
        if let Err(e) = self.browser.close().await {
            debug!("Browser close failed: {}", e);
        }
        self.dialogs.abort();
        self.handler.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quotes_selectors_for_scripts() {
        assert_eq!(js("a[id*='x']"), r#""a[id*='x']""#);
        assert_eq!(js("say \"hi\""), r#""say \"hi\"""#);
    }

    #[test]
    fn dialogs_are_answered_with_ok() {
        let params = accept_dialog();
        assert!(params.accept);
        assert_eq!(params.prompt_text, None);
    }

    #[test]
    fn missing_configured_path_falls_back_to_search() {
        let bogus = PathBuf::from("/nonexistent/rorscrape-chrome");
        // Either a system Chrome is found or the launch error names the fix.
        match find_chrome(Some(&bogus)) {
            Ok(path) => assert_ne!(path, bogus),
            Err(e) => assert!(e.is_fatal()),
        }
    }
}
