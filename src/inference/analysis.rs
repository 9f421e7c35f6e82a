//! Client for the remote vision endpoint that suggests file names.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures::future::join_all;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::{AnalysisResult, FrameAsset};
use crate::config::Settings;
use crate::error::AnalysisError;
use crate::rename::filename::{ILLEGAL_NAME_CHARS, safe_base_name};

/// Model identifier sent with every request
pub const MODEL_ID: &str = "gemini-2.5-flash";

/// Timeout for the connection probe
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Backoff never waits longer than this many units
const MAX_BACKOFF_UNITS: u32 = 10;

/// Longest suggestion (in characters) accepted from the endpoint
const MAX_SUGGESTION_CHARS: usize = 100;

/// 1x1 PNG used by the connection probe
const PROBE_IMAGE: &str = "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNkYPhfDwAChAI/hQyHqQAAAABJRU5ErkJggg==";
const PROBE_PROMPT: &str = "This is a connection test, reply 'ok'.";

/// Configuration for [`AnalysisClient`].
#[derive(Debug, Clone)]
pub struct AnalysisClientConfig {
    /// Endpoint URL
    pub api_url: String,
    /// Prompt sent with every image
    pub prompt: String,
    pub model: String,
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Per-request timeout
    pub timeout: Duration,
    /// Backoff waits `min(2^attempt, 10)` of these between attempts
    pub backoff_unit: Duration,
    /// Suggestions are truncated to this many characters
    pub max_filename_length: usize,
    /// Extensions stripped from suggestions that already carry one
    pub video_extensions: Vec<String>,
}

impl Default for AnalysisClientConfig {
    fn default() -> Self {
        Self::from(&Settings::default())
    }
}

impl From<&Settings> for AnalysisClientConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            api_url: settings.api_url.clone(),
            prompt: settings.analysis_prompt.clone(),
            model: MODEL_ID.to_string(),
            max_retries: settings.max_retries,
            timeout: Duration::from_secs(30),
            backoff_unit: Duration::from_secs(1),
            max_filename_length: settings.max_filename_length as usize,
            video_extensions: settings.video_extensions.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
struct AnalysisRequest<'a> {
    prompt: &'a str,
    image_data: &'a str,
    model: &'a str,
}

#[derive(Debug, Deserialize)]
struct AnalysisResponse {
    response: String,
}

/// Cheap to clone; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct AnalysisClient {
    http: Client,
    config: Arc<AnalysisClientConfig>,
}

impl AnalysisClient {
    pub fn new(config: AnalysisClientConfig) -> Result<Self, AnalysisError> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(AnalysisError::Network)?;

        Ok(Self {
            http,
            config: Arc::new(config),
        })
    }

    pub fn config(&self) -> &AnalysisClientConfig {
        &self.config
    }

    /// Check that the endpoint answers at all. Success is HTTP 200.
    pub async fn probe(&self) -> bool {
        let payload = AnalysisRequest {
            prompt: PROBE_PROMPT,
            image_data: PROBE_IMAGE,
            model: &self.config.model,
        };

        match self
            .http
            .post(&self.config.api_url)
            .timeout(PROBE_TIMEOUT)
            .json(&payload)
            .send()
            .await
        {
            Ok(response) if response.status().as_u16() == 200 => true,
            Ok(response) => {
                warn!("Endpoint probe returned {}", response.status());
                false
            }
            Err(e) => {
                warn!("Endpoint probe failed: {}", AnalysisError::from(e));
                false
            }
        }
    }

    /// Ask for a file name for one screenshot.
    ///
    /// Never fails: unreadable images, exhausted retries and rejected
    /// responses all come back as `None`.
    pub async fn analyze(&self, image_path: &Path) -> Option<String> {
        let bytes = match tokio::fs::read(image_path).await {
            Ok(bytes) => bytes,
            Err(source) => {
                error!(
                    "{}",
                    AnalysisError::Image {
                        path: image_path.to_path_buf(),
                        source,
                    }
                );
                return None;
            }
        };

        let raw = self.request_suggestion(&BASE64.encode(bytes)).await?;

        let Some(valid) = validate_suggestion(&raw) else {
            warn!("Rejected suggestion for {:?}: {:?}", image_path, raw);
            return None;
        };

        let name = safe_base_name(
            &valid,
            &self.config.video_extensions,
            self.config.max_filename_length,
        );
        debug!("Suggestion for {:?}: {}", image_path, name);
        Some(name)
    }

    /// Send a base64 image with retries; returns the trimmed `response` field.
    pub async fn request_suggestion(&self, image_data: &str) -> Option<String> {
        let payload = AnalysisRequest {
            prompt: &self.config.prompt,
            image_data,
            model: &self.config.model,
        };
        let attempts = self.config.max_retries + 1;

        for attempt in 0..attempts {
            match self.send_once(&payload).await {
                Ok(text) => return Some(text),
                Err(e) if e.is_retryable() => {
                    warn!(
                        "Analysis request failed (attempt {}/{}): {}",
                        attempt + 1,
                        attempts,
                        e
                    );
                }
                Err(e) => {
                    error!("Analysis request failed: {}", e);
                    return None;
                }
            }

            if attempt + 1 < attempts {
                tokio::time::sleep(backoff_delay(self.config.backoff_unit, attempt)).await;
            }
        }

        error!(
            "Analysis request failed after {} attempts, giving up",
            attempts
        );
        None
    }

    async fn send_once(&self, payload: &AnalysisRequest<'_>) -> Result<String, AnalysisError> {
        let response = self
            .http
            .post(&self.config.api_url)
            .json(payload)
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() != 200 {
            let body = response.text().await.unwrap_or_default();
            return Err(AnalysisError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.text().await?;
        let parsed: AnalysisResponse = serde_json::from_str(&body)
            .map_err(|e| AnalysisError::MalformedBody(e.to_string()))?;

        Ok(parsed.response.trim().to_string())
    }

    /// Analyze every frame of one video concurrently.
    ///
    /// Results keep the order of `frames`. A task that fails (or panics)
    /// yields `None` for its frame and leaves the others alone.
    pub async fn analyze_frames(&self, frames: &[FrameAsset]) -> Vec<AnalysisResult> {
        let tasks = frames.iter().map(|frame| {
            let client = self.clone();
            let path = frame.path.clone();
            tokio::spawn(async move { client.analyze(&path).await })
        });
        let outcomes = join_all(tasks).await;

        let results: Vec<AnalysisResult> = frames
            .iter()
            .zip(outcomes)
            .map(|(frame, outcome)| {
                let suggestion = outcome.unwrap_or_else(|e| {
                    error!("Analysis task for frame {} failed: {}", frame.index + 1, e);
                    None
                });
                AnalysisResult {
                    suggestion,
                    frame_index: frame.index,
                    quality: frame.quality,
                }
            })
            .collect();

        info!(
            "Analyzed {} frames, {} suggestions",
            results.len(),
            results.iter().filter(|r| r.suggestion.is_some()).count()
        );
        results
    }
}

/// `min(2^attempt, 10)` units
pub fn backoff_delay(unit: Duration, attempt: u32) -> Duration {
    let units = 2u32.saturating_pow(attempt).min(MAX_BACKOFF_UNITS);
    unit * units
}

/// Accept a raw endpoint answer as a file name, or reject it.
///
/// Surrounding whitespace and quotes are stripped first. Rejected: empty,
/// longer than 100 characters, starting or ending with anything other than
/// an ASCII letter/digit or CJK ideograph, or containing `<>:"/\|?*`.
pub fn validate_suggestion(raw: &str) -> Option<String> {
    let cleaned = raw
        .trim()
        .trim_matches(|c: char| c == '"' || c == '\'')
        .trim();

    if cleaned.is_empty() || cleaned.chars().count() > MAX_SUGGESTION_CHARS {
        return None;
    }

    let first = cleaned.chars().next()?;
    let last = cleaned.chars().next_back()?;
    if !is_boundary_char(first) || !is_boundary_char(last) {
        return None;
    }

    if cleaned.contains(ILLEGAL_NAME_CHARS) {
        return None;
    }

    Some(cleaned.to_string())
}

fn is_boundary_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || ('\u{4e00}'..='\u{9fa5}').contains(&c)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::PathBuf;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(server: &MockServer) -> AnalysisClientConfig {
        AnalysisClientConfig {
            api_url: format!("{}/infer", server.uri()),
            backoff_unit: Duration::from_millis(1),
            timeout: Duration::from_secs(5),
            ..AnalysisClientConfig::default()
        }
    }

    fn write_image(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn test_backoff_is_capped() {
        let unit = Duration::from_secs(1);
        assert_eq!(backoff_delay(unit, 0), Duration::from_secs(1));
        assert_eq!(backoff_delay(unit, 1), Duration::from_secs(2));
        assert_eq!(backoff_delay(unit, 3), Duration::from_secs(8));
        assert_eq!(backoff_delay(unit, 4), Duration::from_secs(10));
        assert_eq!(backoff_delay(unit, 40), Duration::from_secs(10));
    }

    #[test]
    fn test_validate_rejections() {
        assert_eq!(validate_suggestion(""), None);
        assert_eq!(validate_suggestion("   "), None);
        assert_eq!(validate_suggestion(&"a".repeat(101)), None);
        assert_eq!(validate_suggestion("why?"), None);
        assert_eq!(validate_suggestion("a?b"), None);
        assert_eq!(validate_suggestion("a/b"), None);
        assert_eq!(validate_suggestion("-leading"), None);
        assert_eq!(validate_suggestion("trailing."), None);
    }

    #[test]
    fn test_validate_accepts() {
        assert_eq!(validate_suggestion(&"a".repeat(100)), Some("a".repeat(100)));
        assert_eq!(
            validate_suggestion("  \"海边日落\" "),
            Some("海边日落".to_string())
        );
        assert_eq!(
            validate_suggestion("beach sunset 2"),
            Some("beach sunset 2".to_string())
        );
        assert_eq!(
            validate_suggestion("cat_video.mp4"),
            Some("cat_video.mp4".to_string())
        );
    }

    #[tokio::test]
    async fn test_analyze_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/infer"))
            .and(body_partial_json(json!({ "model": MODEL_ID })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "response": " 海边日落 " })))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let image = write_image(dir.path(), "x_frame_1.jpg", b"jpeg bytes");

        let client = AnalysisClient::new(test_config(&server)).unwrap();
        assert_eq!(client.analyze(&image).await, Some("海边日落".to_string()));
    }

    #[tokio::test]
    async fn test_payload_carries_base64_image() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "image_data": BASE64.encode(b"abc") })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "response": "ok" })))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let image = write_image(dir.path(), "f.jpg", b"abc");

        let client = AnalysisClient::new(test_config(&server)).unwrap();
        assert_eq!(client.analyze(&image).await, Some("ok".to_string()));
    }

    #[tokio::test]
    async fn test_retries_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "response": "dog park" })))
            .mount(&server)
            .await;

        let client = AnalysisClient::new(test_config(&server)).unwrap();
        assert_eq!(
            client.request_suggestion("AAAA").await,
            Some("dog park".to_string())
        );
        assert_eq!(server.received_requests().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries_plus_one() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .expect(4)
            .mount(&server)
            .await;

        let client = AnalysisClient::new(test_config(&server)).unwrap();
        assert_eq!(client.config().max_retries, 3);
        assert_eq!(client.request_suggestion("AAAA").await, None);
    }

    #[tokio::test]
    async fn test_malformed_body_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "response": "street food" })))
            .mount(&server)
            .await;

        let client = AnalysisClient::new(test_config(&server)).unwrap();
        assert_eq!(
            client.request_suggestion("AAAA").await,
            Some("street food".to_string())
        );
    }

    #[tokio::test]
    async fn test_rejected_response_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "response": "what is this?" })))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let image = write_image(dir.path(), "f.jpg", b"abc");

        let client = AnalysisClient::new(test_config(&server)).unwrap();
        assert_eq!(client.analyze(&image).await, None);
    }

    #[tokio::test]
    async fn test_missing_image_yields_none_without_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "response": "x" })))
            .expect(0)
            .mount(&server)
            .await;

        let client = AnalysisClient::new(test_config(&server)).unwrap();
        assert_eq!(client.analyze(Path::new("/nonexistent/frame.jpg")).await, None);
    }

    #[tokio::test]
    async fn test_probe() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "response": "ok" })))
            .mount(&server)
            .await;
        let client = AnalysisClient::new(test_config(&server)).unwrap();
        assert!(client.probe().await);

        let failing = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&failing)
            .await;
        let client = AnalysisClient::new(test_config(&failing)).unwrap();
        assert!(!client.probe().await);
    }

    #[tokio::test]
    async fn test_probe_unreachable() {
        let config = AnalysisClientConfig {
            api_url: "http://127.0.0.1:9/infer".to_string(),
            ..AnalysisClientConfig::default()
        };
        let client = AnalysisClient::new(config).unwrap();
        assert!(!client.probe().await);
    }

    #[tokio::test]
    async fn test_analyze_frames_keeps_order_and_isolates_failures() {
        let server = MockServer::start().await;
        for (bytes, name) in [(&b"one"[..], "first scene"), (&b"three"[..], "third scene")] {
            Mock::given(method("POST"))
                .and(body_partial_json(json!({ "image_data": BASE64.encode(bytes) })))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "response": name })))
                .mount(&server)
                .await;
        }

        let dir = tempfile::tempdir().unwrap();
        let frames = vec![
            FrameAsset {
                video: PathBuf::from("v.mp4"),
                index: 0,
                path: write_image(dir.path(), "v_frame_1.jpg", b"one"),
                quality: 10.0,
            },
            FrameAsset {
                video: PathBuf::from("v.mp4"),
                index: 1,
                path: dir.path().join("missing.jpg"),
                quality: 90.0,
            },
            FrameAsset {
                video: PathBuf::from("v.mp4"),
                index: 2,
                path: write_image(dir.path(), "v_frame_3.jpg", b"three"),
                quality: 50.0,
            },
        ];

        let client = AnalysisClient::new(test_config(&server)).unwrap();
        let results = client.analyze_frames(&frames).await;

        let suggestions: Vec<_> = results.iter().map(|r| r.suggestion.clone()).collect();
        assert_eq!(
            suggestions,
            vec![
                Some("first scene".to_string()),
                None,
                Some("third scene".to_string())
            ]
        );
        assert_eq!(results[1].frame_index, 1);
        assert_eq!(results[1].quality, 90.0);
    }
}
