//! Gemini vision channels.
//!
//! Two ways into the same model family:
//! - Vertex AI with a bearer token (the managed channel, tried first)
//! - the public Generative Language API with a rotating pool of API keys
//!
//! Both speak the same `generateContent` request/response shape.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::keys::KeyedChannel;
use super::provider::{ProviderError, RecognitionProvider};

pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

const DEFAULT_PROMPT: &str = "This is a CAPTCHA image. Read the characters shown and return ONLY \
     them as plain ASCII digits and letters, with no spaces, subscripts or commentary.";

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(rename = "generationConfig")]
    generation_config: GeminiGenerationConfig,
}

#[derive(Debug, Serialize)]
struct GeminiContent {
    role: String,
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum GeminiPart {
    Text { text: String },
    InlineData { inline_data: GeminiInlineData },
}

#[derive(Debug, Serialize)]
struct GeminiInlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
struct GeminiGenerationConfig {
    temperature: f32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
    error: Option<GeminiError>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiResponseContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponseContent {
    #[serde(default)]
    parts: Vec<GeminiResponsePart>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiError {
    message: String,
    status: Option<String>,
}

/// Sniff PNG vs JPEG from the magic bytes; the portal serves PNG.
fn mime_type(image: &[u8]) -> &'static str {
    if image.starts_with(&[0xFF, 0xD8, 0xFF]) {
        "image/jpeg"
    } else {
        "image/png"
    }
}

fn build_request(prompt: &str, image: &[u8]) -> GeminiRequest {
    GeminiRequest {
        contents: vec![GeminiContent {
            role: "user".to_string(),
            parts: vec![
                GeminiPart::Text {
                    text: prompt.to_string(),
                },
                GeminiPart::InlineData {
                    inline_data: GeminiInlineData {
                        mime_type: mime_type(image).to_string(),
                        data: base64::engine::general_purpose::STANDARD.encode(image),
                    },
                },
            ],
        }],
        generation_config: GeminiGenerationConfig {
            temperature: 0.0,
            max_output_tokens: 32,
        },
    }
}

/// Map an HTTP failure to a provider error. Quota exhaustion sometimes
/// arrives as a 400/403 with `RESOURCE_EXHAUSTED` in the body.
fn classify_failure(
    provider: &str,
    status: u16,
    retry_after: Option<&str>,
    body: &str,
) -> ProviderError {
    let retry_after_secs = retry_after.and_then(|s| s.trim().parse::<u64>().ok());
    if status == 429 || body.contains("RESOURCE_EXHAUSTED") {
        return ProviderError::RateLimited {
            provider: provider.to_string(),
            retry_after_secs,
        };
    }
    if status == 401 || status == 403 || body.contains("API_KEY_INVALID") {
        return ProviderError::Unauthorized {
            provider: provider.to_string(),
            message: format!("HTTP {}", status),
        };
    }
    ProviderError::Failed(format!("{} API error ({}): {}", provider, status, body))
}

fn response_text(provider: &str, response: GeminiResponse) -> Result<String, ProviderError> {
    if let Some(error) = response.error {
        if error.status.as_deref() == Some("RESOURCE_EXHAUSTED") {
            return Err(ProviderError::RateLimited {
                provider: provider.to_string(),
                retry_after_secs: None,
            });
        }
        return Err(ProviderError::Failed(format!(
            "{} API error: {}",
            provider, error.message
        )));
    }

    let text: String = response
        .candidates
        .and_then(|c| c.into_iter().next())
        .and_then(|c| c.content)
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    Ok(text.trim().to_string())
}

/// How a request authenticates.
enum Auth<'a> {
    ApiKey(&'a str),
    Bearer(&'a str),
}

/// Shared HTTP plumbing for both channels.
#[derive(Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    model: String,
    prompt: String,
}

impl GeminiClient {
    pub fn new(model: impl Into<String>, timeout: Duration) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Failed(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            http,
            model: model.into(),
            prompt: DEFAULT_PROMPT.to_string(),
        })
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn generate(
        &self,
        provider: &str,
        url: &str,
        auth: Auth<'_>,
        image: &[u8],
    ) -> Result<String, ProviderError> {
        let request = build_request(&self.prompt, image);

        let builder = self.http.post(url).json(&request);
        let builder = match auth {
            Auth::ApiKey(key) => builder.header("x-goog-api-key", key),
            Auth::Bearer(token) => builder.bearer_auth(token),
        };

        let response = builder
            .send()
            .await
            .map_err(|e| ProviderError::Failed(format!("{} request failed: {}", provider, e)))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let body = response.text().await.unwrap_or_default();
            return Err(classify_failure(
                provider,
                status.as_u16(),
                retry_after.as_deref(),
                &body,
            ));
        }

        let parsed: GeminiResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Failed(format!("Failed to parse response: {}", e)))?;

        let text = response_text(provider, parsed)?;
        debug!("{} ({}) answered {:?}", provider, self.model, text);
        Ok(text)
    }
}

/// Vertex AI endpoint authenticated with an OAuth access token.
pub struct VertexProvider {
    client: GeminiClient,
    project: Option<String>,
    location: String,
    access_token: Option<String>,
}

impl VertexProvider {
    pub fn new(
        client: GeminiClient,
        project: Option<String>,
        location: impl Into<String>,
        access_token: Option<String>,
    ) -> Self {
        Self {
            client,
            project: project.filter(|p| !p.trim().is_empty()),
            location: location.into(),
            access_token: access_token.filter(|t| !t.trim().is_empty()),
        }
    }

    fn endpoint(&self, project: &str) -> String {
        format!(
            "https://{loc}-aiplatform.googleapis.com/v1/projects/{project}/locations/{loc}/publishers/google/models/{model}:generateContent",
            loc = self.location,
            project = project,
            model = self.client.model()
        )
    }
}

#[async_trait]
impl RecognitionProvider for VertexProvider {
    fn name(&self) -> &str {
        "vertex"
    }

    fn is_available(&self) -> bool {
        self.project.is_some() && self.access_token.is_some()
    }

    async fn recognize(&self, image: &[u8]) -> Result<String, ProviderError> {
        let (Some(project), Some(token)) = (&self.project, &self.access_token) else {
            return Err(ProviderError::Unavailable(
                "VERTEX_PROJECT and VERTEX_ACCESS_TOKEN must both be set".to_string(),
            ));
        };
        let url = self.endpoint(project);
        self.client
            .generate(self.name(), &url, Auth::Bearer(token), image)
            .await
    }
}

/// Generative Language API, one key per call (wrap in [`super::keys::RotatingKeys`]).
pub struct GeminiKeyChannel {
    client: GeminiClient,
    base_url: String,
}

impl GeminiKeyChannel {
    pub fn new(client: GeminiClient) -> Self {
        Self {
            client,
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
        }
    }
}

#[async_trait]
impl KeyedChannel for GeminiKeyChannel {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn recognize_with_key(&self, key: &str, image: &[u8]) -> Result<String, ProviderError> {
        let url = format!(
            "{}/models/{}:generateContent",
            self.base_url,
            self.client.model()
        );
        self.client
            .generate(self.name(), &url, Auth::ApiKey(key), image)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_errors_are_rate_limits() {
        let err = classify_failure("gemini", 429, Some("17"), "");
        assert!(matches!(
            err,
            ProviderError::RateLimited {
                retry_after_secs: Some(17),
                ..
            }
        ));
        let err = classify_failure("gemini", 400, None, r#"{"status":"RESOURCE_EXHAUSTED"}"#);
        assert!(err.is_key_exhausted());
    }

    #[test]
    fn auth_errors_rotate_keys() {
        assert!(classify_failure("gemini", 403, None, "denied").is_key_exhausted());
        assert!(classify_failure("gemini", 400, None, "API_KEY_INVALID").is_key_exhausted());
    }

    #[test]
    fn server_errors_do_not_rotate() {
        let err = classify_failure("gemini", 500, None, "boom");
        assert!(!err.is_key_exhausted());
        assert!(matches!(err, ProviderError::Failed(_)));
    }

    #[test]
    fn joins_candidate_parts() {
        let response: GeminiResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"parts":[{"text":" 4821"},{"text":"93\n"}]}}]}"#,
        )
        .unwrap();
        assert_eq!(response_text("gemini", response).unwrap(), "482193");
    }

    #[test]
    fn missing_candidates_is_empty_text() {
        let response: GeminiResponse = serde_json::from_str(r#"{"candidates":[{}]}"#).unwrap();
        assert_eq!(response_text("gemini", response).unwrap(), "");
    }

    #[test]
    fn error_payload_is_classified() {
        let response: GeminiResponse = serde_json::from_str(
            r#"{"error":{"message":"quota","status":"RESOURCE_EXHAUSTED"}}"#,
        )
        .unwrap();
        assert!(response_text("gemini", response)
            .unwrap_err()
            .is_key_exhausted());
    }

    #[test]
    fn request_carries_inline_image() {
        let request = build_request("read it", &[0x89, b'P', b'N', b'G']);
        let json = serde_json::to_value(&request).unwrap();
        let parts = &json["contents"][0]["parts"];
        assert_eq!(parts[0]["text"], "read it");
        assert_eq!(parts[1]["inline_data"]["mime_type"], "image/png");
        assert_eq!(json["generationConfig"]["maxOutputTokens"], 32);
    }

    #[test]
    fn vertex_needs_project_and_token() {
        let client = GeminiClient::new(DEFAULT_MODEL, Duration::from_secs(5)).unwrap();
        let vertex = VertexProvider::new(client.clone(), Some("p".into()), "us-central1", None);
        assert!(!vertex.is_available());
        let vertex = VertexProvider::new(client, Some("p".into()), "us-central1", Some("t".into()));
        assert!(vertex.is_available());
        assert!(vertex.endpoint("p").starts_with("https://us-central1-aiplatform"));
    }
}
