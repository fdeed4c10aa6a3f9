//! Tesseract command-line channel, the last resort in the chain.

use std::io::Write;

use async_trait::async_trait;
use tempfile::NamedTempFile;
use tokio::process::Command;

use super::provider::{ProviderError, RecognitionProvider};

/// Tesseract OCR run as a subprocess on a temporary image file.
pub struct TesseractProvider {
    binary: String,
    numeric_only: bool,
}

impl TesseractProvider {
    pub fn new(binary: impl Into<String>, numeric_only: bool) -> Self {
        Self {
            binary: binary.into(),
            numeric_only,
        }
    }

    fn args(&self) -> Vec<String> {
        // Single text line; captchas are one short word.
        let mut args = vec!["stdout".to_string(), "--psm".to_string(), "7".to_string()];
        if self.numeric_only {
            args.push("-c".to_string());
            args.push("tessedit_char_whitelist=0123456789".to_string());
        }
        args
    }
}

impl Default for TesseractProvider {
    fn default() -> Self {
        Self::new("tesseract", true)
    }
}

#[async_trait]
impl RecognitionProvider for TesseractProvider {
    fn name(&self) -> &str {
        "tesseract"
    }

    fn is_available(&self) -> bool {
        which::which(&self.binary).is_ok()
    }

    async fn recognize(&self, image: &[u8]) -> Result<String, ProviderError> {
        let mut file = NamedTempFile::new()?;
        file.write_all(image)?;
        file.flush()?;

        let output = Command::new(&self.binary)
            .arg(file.path())
            .args(self.args())
            .output()
            .await;

        match output {
            Ok(output) if output.status.success() => {
                Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
            }
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                Err(ProviderError::Failed(format!("tesseract failed: {}", stderr.trim())))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(ProviderError::Unavailable(
                "tesseract not found (install tesseract-ocr)".to_string(),
            )),
            Err(e) => Err(ProviderError::Io(e)),
        }
    }
}
