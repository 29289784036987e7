//! Remote transcription, OCR, and captioning clients.
//!
//! Service access goes through small traits so the ingest pipeline can be
//! exercised with mock implementations. The concrete clients use a
//! blocking HTTP client; base URLs are constructor parameters.

use std::path::Path;
use std::time::{Duration, Instant};

use base64::Engine as _;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::error::ServiceError;

const TRANSCRIPTION_SERVICE: &str = "transcription";
const CAPTION_SERVICE: &str = "captioning";

/// Opaque identifier of a submitted remote transcription job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle(String);

impl JobHandle {
    pub fn new(id: String) -> Self {
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Cloud tier: whole-document math-aware transcription.
pub trait DocumentTranscriber {
    fn submit(&self, pdf_path: &Path) -> Result<JobHandle, ServiceError>;

    /// Poll until the job completes or `deadline` passes. A remote error
    /// status or deadline expiry is a `ServiceError`; a completed job with
    /// no extractable text returns an empty string with a warning.
    fn await_result(&self, job: &JobHandle, deadline: Instant) -> Result<String, ServiceError>;
}

/// Single-image text OCR.
pub trait ImageOcr {
    fn ocr_image(&self, png_bytes: &[u8]) -> Result<String, ServiceError>;
}

/// Single-image diagram captioning with a contextual prompt.
pub trait ImageCaptioner {
    fn caption_image(&self, png_bytes: &[u8], context: &str) -> Result<String, ServiceError>;
}

/// Math-aware transcription client (Mathpix wire protocol): multipart
/// document submission with polled completion, plus single-image OCR.
pub struct MathpixClient {
    client: reqwest::blocking::Client,
    base_url: String,
    app_id: String,
    app_key: String,
    poll_interval: Duration,
}

impl MathpixClient {
    pub fn new(
        base_url: &str,
        app_id: String,
        app_key: String,
        poll_interval: Duration,
    ) -> Result<Self, ServiceError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|error| transport(TRANSCRIPTION_SERVICE, &error))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            app_id,
            app_key,
            poll_interval,
        })
    }

    pub fn from_env(base_url: &str, poll_interval: Duration) -> Result<Self, ServiceError> {
        let app_id = std::env::var("MATHPIX_APP_ID")
            .map_err(|_| ServiceError::MissingCredentials("MATHPIX_APP_ID"))?;
        let app_key = std::env::var("MATHPIX_APP_KEY")
            .map_err(|_| ServiceError::MissingCredentials("MATHPIX_APP_KEY"))?;
        Self::new(base_url, app_id, app_key, poll_interval)
    }
}

impl DocumentTranscriber for MathpixClient {
    fn submit(&self, pdf_path: &Path) -> Result<JobHandle, ServiceError> {
        let options = json!({
            "formats": ["text", "latex_styled", "text+latex", "json"],
            "output_format": "json",
            "math_inline_delims": ["$", "$"],
            "math_display_delims": ["$$", "$$"],
        });

        let file_part =
            reqwest::blocking::multipart::Part::file(pdf_path).map_err(|error| {
                ServiceError::Transport {
                    service: TRANSCRIPTION_SERVICE,
                    message: format!("failed to read {}: {error}", pdf_path.display()),
                }
            })?;
        let form = reqwest::blocking::multipart::Form::new()
            .part("file", file_part)
            .text("options_json", options.to_string());

        let response = self
            .client
            .post(format!("{}/v3/pdf", self.base_url))
            .header("app_id", &self.app_id)
            .header("app_key", &self.app_key)
            .multipart(form)
            .send()
            .map_err(|error| transport(TRANSCRIPTION_SERVICE, &error))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ServiceError::Remote {
                service: TRANSCRIPTION_SERVICE,
                message: format!("submit returned {status}"),
            });
        }

        let submitted: SubmitResponse = response
            .json()
            .map_err(|error| transport(TRANSCRIPTION_SERVICE, &error))?;

        match submitted.pdf_id {
            Some(id) if !id.is_empty() => {
                debug!(job_id = %id, pdf = %pdf_path.display(), "submitted document");
                Ok(JobHandle::new(id))
            }
            _ => Err(ServiceError::Remote {
                service: TRANSCRIPTION_SERVICE,
                message: "submit response carried no job id".to_string(),
            }),
        }
    }

    fn await_result(&self, job: &JobHandle, deadline: Instant) -> Result<String, ServiceError> {
        loop {
            let response = self
                .client
                .get(format!("{}/v3/pdf/{}", self.base_url, job.as_str()))
                .header("app_id", &self.app_id)
                .header("app_key", &self.app_key)
                .send()
                .map_err(|error| transport(TRANSCRIPTION_SERVICE, &error))?;

            let parsed: PollResponse = response
                .json()
                .map_err(|error| transport(TRANSCRIPTION_SERVICE, &error))?;

            match poll_state(&parsed) {
                PollState::Completed(text) => {
                    if text.trim().is_empty() {
                        warn!(
                            job_id = %job.as_str(),
                            "job completed but payload contained no extractable text"
                        );
                    }
                    return Ok(text);
                }
                PollState::Failed(message) => {
                    return Err(ServiceError::Remote {
                        service: TRANSCRIPTION_SERVICE,
                        message,
                    });
                }
                PollState::Pending => {}
            }

            if Instant::now() >= deadline {
                return Err(ServiceError::Timeout {
                    service: TRANSCRIPTION_SERVICE,
                    job_id: job.as_str().to_string(),
                });
            }
            std::thread::sleep(self.poll_interval);
        }
    }
}

impl ImageOcr for MathpixClient {
    fn ocr_image(&self, png_bytes: &[u8]) -> Result<String, ServiceError> {
        let payload = json!({
            "src": image_data_url(png_bytes),
            "formats": ["text"],
        });

        let response = self
            .client
            .post(format!("{}/v3/text", self.base_url))
            .header("app_id", &self.app_id)
            .header("app_key", &self.app_key)
            .json(&payload)
            .send()
            .map_err(|error| transport(TRANSCRIPTION_SERVICE, &error))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ServiceError::Remote {
                service: TRANSCRIPTION_SERVICE,
                message: format!("image OCR returned {status}"),
            });
        }

        let parsed: OcrResponse = response
            .json()
            .map_err(|error| transport(TRANSCRIPTION_SERVICE, &error))?;

        Ok(parsed.text)
    }
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    #[serde(default)]
    pdf_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct OcrResponse {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Default, Deserialize)]
struct PollResponse {
    #[serde(default)]
    status: Option<String>,

    #[serde(default)]
    error: Option<String>,

    #[serde(default, rename = "json")]
    payload: Option<PagePayload>,
}

#[derive(Debug, Default, Deserialize)]
struct PagePayload {
    #[serde(default)]
    pages: Vec<PageText>,
}

#[derive(Debug, Default, Deserialize)]
struct PageText {
    #[serde(default)]
    text: String,
}

#[derive(Debug, PartialEq, Eq)]
enum PollState {
    Pending,
    Completed(String),
    Failed(String),
}

/// Interpret one poll response. Completed payloads concatenate per-page
/// text in page order, separated by a blank line.
fn poll_state(response: &PollResponse) -> PollState {
    match response.status.as_deref() {
        Some("completed") => {
            let text = response
                .payload
                .as_ref()
                .map(|payload| {
                    payload
                        .pages
                        .iter()
                        .map(|page| page.text.as_str())
                        .collect::<Vec<&str>>()
                        .join("\n\n")
                })
                .unwrap_or_default();
            PollState::Completed(text)
        }
        Some("error") => PollState::Failed(
            response
                .error
                .clone()
                .unwrap_or_else(|| "unknown error".to_string()),
        ),
        _ => PollState::Pending,
    }
}

/// Vision captioning client speaking the OpenAI chat-completions protocol.
/// Constructed only when a credential is present; the stage is skipped
/// otherwise.
pub struct VisionCaptionClient {
    client: reqwest::blocking::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl VisionCaptionClient {
    pub fn new(base_url: &str, api_key: String, model: String) -> Result<Self, ServiceError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|error| transport(CAPTION_SERVICE, &error))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
        })
    }

    pub fn from_env(base_url: &str, model: &str) -> Option<Self> {
        let api_key = std::env::var("OPENAI_API_KEY").ok()?;
        match Self::new(base_url, api_key, model.to_string()) {
            Ok(client) => Some(client),
            Err(error) => {
                warn!(error = %error, "captioning client unavailable");
                None
            }
        }
    }
}

impl ImageCaptioner for VisionCaptionClient {
    fn caption_image(&self, png_bytes: &[u8], context: &str) -> Result<String, ServiceError> {
        let payload = json!({
            "model": self.model,
            "messages": [
                {
                    "role": "system",
                    "content": "You're an expert tutor who explains diagrams clearly."
                },
                {
                    "role": "user",
                    "content": [
                        { "type": "text", "text": context },
                        {
                            "type": "image_url",
                            "image_url": { "url": image_data_url(png_bytes) }
                        }
                    ]
                }
            ],
            "max_tokens": 500,
        });

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .map_err(|error| transport(CAPTION_SERVICE, &error))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ServiceError::Remote {
                service: CAPTION_SERVICE,
                message: format!("caption request returned {status}"),
            });
        }

        let parsed: CaptionResponse = response
            .json()
            .map_err(|error| transport(CAPTION_SERVICE, &error))?;

        Ok(parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .unwrap_or_default())
    }
}

#[derive(Debug, Deserialize)]
struct CaptionResponse {
    #[serde(default)]
    choices: Vec<CaptionChoice>,
}

#[derive(Debug, Deserialize)]
struct CaptionChoice {
    message: CaptionMessage,
}

#[derive(Debug, Deserialize)]
struct CaptionMessage {
    #[serde(default)]
    content: String,
}

fn image_data_url(png_bytes: &[u8]) -> String {
    format!(
        "data:image/png;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(png_bytes)
    )
}

fn transport(service: &'static str, error: &dyn std::fmt::Display) -> ServiceError {
    ServiceError::Transport {
        service,
        message: error.to_string(),
    }
}
