//! Captcha resolution through an ordered chain of recognition providers.
//!
//! The chain is walked front to back on every attempt:
//! 1. Vertex AI (when a project and access token are configured)
//! 2. the Gemini API with a rotating key pool
//! 3. Tesseract on the command line
//!
//! The first answer that passes the [`CaptchaFormat`] check wins. Key
//! rotation inside the pool never costs an attempt; only a full walk of
//! the chain without a valid answer does.

pub mod format;
pub mod gemini;
pub mod keys;
pub mod provider;
pub mod tesseract;

pub use format::CaptchaFormat;
pub use keys::{KeyRing, KeyedChannel, RotatingKeys};
pub use provider::{ProviderError, RecognitionProvider};

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::CaptchaConfig;
use crate::retry::{retry, Attempt, RetryPolicy};
use gemini::{GeminiClient, GeminiKeyChannel, VertexProvider};
use tesseract::TesseractProvider;

/// A recognized answer and where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Solution {
    pub text: String,
    pub provider: String,
    /// Zero-based resolve attempt that produced it.
    pub attempt: u32,
}

/// One captcha submission, recorded for logs only.
#[derive(Debug, Clone)]
pub struct CaptchaAttempt {
    pub image_bytes: usize,
    pub provider_used: Option<String>,
    pub recognized_text: Option<String>,
    pub accepted_by_site: bool,
    pub attempt_index: u32,
}

impl CaptchaAttempt {
    pub fn log(&self) {
        debug!(
            attempt = self.attempt_index,
            provider = self.provider_used.as_deref().unwrap_or("-"),
            text = self.recognized_text.as_deref().unwrap_or(""),
            accepted = self.accepted_by_site,
            image_bytes = self.image_bytes,
            "captcha attempt"
        );
    }
}

/// Walks the provider chain until one answer passes the format check.
pub struct CaptchaResolver {
    providers: Vec<Arc<dyn RecognitionProvider>>,
    format: CaptchaFormat,
    policy: RetryPolicy,
}

impl CaptchaResolver {
    pub fn new(
        providers: Vec<Arc<dyn RecognitionProvider>>,
        format: CaptchaFormat,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            providers,
            format,
            policy,
        }
    }

    /// Build the standard chain from config, skipping providers that lack
    /// credentials or binaries.
    pub fn from_config(config: &CaptchaConfig) -> Result<Self, ProviderError> {
        let format = CaptchaFormat {
            expected_length: config.expected_length.filter(|len| *len > 0),
            numeric_only: config.numeric_only,
        };
        let policy = RetryPolicy::fixed(
            config.max_attempts,
            Duration::from_millis(config.backoff_ms),
        );

        let mut client = GeminiClient::new(
            config.gemini.model.clone(),
            Duration::from_secs(config.request_timeout_secs),
        )?;
        if let Some(prompt) = &config.gemini.prompt {
            client = client.with_prompt(prompt.clone());
        }

        let candidates: Vec<Arc<dyn RecognitionProvider>> = vec![
            Arc::new(VertexProvider::new(
                client.clone(),
                config.vertex.project.clone(),
                config.vertex.location.clone(),
                config.vertex.access_token.clone(),
            )),
            Arc::new(RotatingKeys::new(
                GeminiKeyChannel::new(client),
                KeyRing::new(config.gemini.api_keys.clone()),
            )),
            Arc::new(TesseractProvider::new(
                config.tesseract.binary.clone(),
                config.numeric_only,
            )),
        ];

        let mut providers = Vec::new();
        for provider in candidates {
            if provider.name() == "tesseract" && !config.tesseract.enabled {
                continue;
            }
            if provider.is_available() {
                debug!("Captcha chain: added {}", provider.name());
                providers.push(provider);
            } else {
                debug!("Captcha chain: {} not available", provider.name());
            }
        }

        if providers.is_empty() {
            warn!("No captcha providers available; every captcha round will fail");
        } else {
            info!(
                "Captcha chain: {}",
                providers
                    .iter()
                    .map(|p| p.name().to_string())
                    .collect::<Vec<_>>()
                    .join(" -> ")
            );
        }

        Ok(Self::new(providers, format, policy))
    }

    pub fn format(&self) -> CaptchaFormat {
        self.format
    }

    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    pub fn has_providers(&self) -> bool {
        !self.providers.is_empty()
    }

    /// One walk of the chain. `Done` on the first valid answer.
    async fn walk_chain(&self, image: &[u8], attempt: u32) -> Attempt<Solution, ()> {
        for provider in &self.providers {
            match provider.recognize(image).await {
                Ok(raw) => match self.format.accept(&raw) {
                    Some(text) => {
                        debug!("{} solved captcha: {:?}", provider.name(), text);
                        return Attempt::Done(Solution {
                            text,
                            provider: provider.name().to_string(),
                            attempt,
                        });
                    }
                    None => debug!("{} answer {:?} failed format check", provider.name(), raw),
                },
                Err(e @ ProviderError::RateLimited { .. }) => {
                    warn!("{} rate limited ({}), trying next provider", provider.name(), e);
                }
                Err(e) => {
                    warn!("{} failed: {}", provider.name(), e);
                }
            }
        }
        Attempt::Retry(())
    }

    /// Recognize `image`, or `None` when every attempt across every
    /// provider failed. A failed resolve is a normal outcome, not an error.
    pub async fn resolve(&self, image: &[u8]) -> Option<Solution> {
        if self.providers.is_empty() || image.is_empty() {
            return None;
        }

        match retry(&self.policy, |attempt| self.walk_chain(image, attempt)).await {
            Ok(solution) => Some(solution),
            Err(e) => {
                warn!(
                    "Captcha unresolved after {} attempt(s) across {} provider(s)",
                    e.attempts(),
                    self.providers.len()
                );
                None
            }
        }
    }
}
