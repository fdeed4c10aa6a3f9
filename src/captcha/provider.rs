//! Recognition provider contract.

use async_trait::async_trait;
use thiserror::Error;

/// Errors from recognition providers.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Provider not available: {0}")]
    Unavailable(String),

    #[error("Rate limited by {provider}, retry after {retry_after_secs:?}s")]
    RateLimited {
        provider: String,
        retry_after_secs: Option<u64>,
    },

    #[error("Unauthorized by {provider}: {message}")]
    Unauthorized { provider: String, message: String },

    #[error("Recognition failed: {0}")]
    Failed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProviderError {
    /// Errors that mean "this key is spent", not "this image is unreadable".
    pub fn is_key_exhausted(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited { .. } | ProviderError::Unauthorized { .. }
        )
    }
}

/// An external service that turns a captcha image into text.
#[async_trait]
pub trait RecognitionProvider: Send + Sync {
    /// Short name used in logs and attempt records.
    fn name(&self) -> &str;

    /// Check if this provider has what it needs (credentials, binaries).
    fn is_available(&self) -> bool;

    /// Recognize the text in `image` (PNG or JPEG bytes).
    async fn recognize(&self, image: &[u8]) -> Result<String, ProviderError>;
}
