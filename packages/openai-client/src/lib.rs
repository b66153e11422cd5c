//! Pure OpenAI REST API client
//!
//! A minimal client for the pieces of the OpenAI API that document
//! extraction needs: structured-output chat completions (with reasoning
//! effort and file inputs) and the Files API.
//!
//! # Example
//!
//! ```rust,ignore
//! use openai_client::{ContentPart, OpenAIClient, ReasoningEffort, StructuredRequest};
//!
//! let client = OpenAIClient::from_env()?;
//!
//! let file = client.upload_file("iep.pdf", "application/pdf", bytes).await?;
//! let request = StructuredRequest::new(
//!     "o4-mini",
//!     "Extract the form.",
//!     vec![ContentPart::file(&file.id)],
//!     schema,
//! )
//! .reasoning_effort(ReasoningEffort::Medium);
//! let response = client.structured_output(request).await?;
//! client.delete_file(&file.id).await?;
//! ```

pub mod error;
pub mod types;

pub use error::{OpenAIError, Result};
pub use types::*;

use std::time::{Duration, Instant};

use reqwest::header::HeaderMap;
use reqwest::{multipart, Client, Response};
use tracing::{debug, warn};

/// Pure OpenAI API client.
#[derive(Clone)]
pub struct OpenAIClient {
    http_client: Client,
    api_key: String,
    base_url: String,
}

impl OpenAIClient {
    /// Create a new OpenAI client with the given API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            http_client: Client::new(),
            api_key: api_key.into(),
            base_url: "https://api.openai.com/v1".to_string(),
        }
    }

    /// Create from environment variable `OPENAI_API_KEY`.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| OpenAIError::Config("OPENAI_API_KEY not set".into()))?;
        Ok(Self::new(api_key))
    }

    /// Set a custom base URL (for Azure, proxies, etc.).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Use a preconfigured HTTP client (timeouts, proxies).
    pub fn with_http_client(mut self, client: Client) -> Self {
        self.http_client = client;
        self
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Structured output with JSON schema.
    ///
    /// Uses OpenAI's `json_schema` response format. Refusals are returned
    /// as [`OpenAIError::Refusal`].
    pub async fn structured_output(&self, request: StructuredRequest) -> Result<StructuredResponse> {
        let start = Instant::now();

        let response = self
            .http_client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "OpenAI request failed");
                OpenAIError::from_reqwest(e)
            })?;

        let response = check_status(response).await?;

        let chat_response: types::ChatResponseRaw = response
            .json()
            .await
            .map_err(|e| OpenAIError::Parse(e.to_string()))?;

        let message = chat_response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .ok_or_else(|| OpenAIError::Parse("No choices in OpenAI response".into()))?;

        if let Some(refusal) = message.refusal {
            return Err(OpenAIError::Refusal(refusal));
        }
        let content = message
            .content
            .ok_or_else(|| OpenAIError::Parse("Empty message content".into()))?;

        debug!(
            model = %request.model,
            duration_ms = start.elapsed().as_millis(),
            prompt_tokens = chat_response.usage.as_ref().map(|u| u.prompt_tokens),
            "OpenAI structured output"
        );

        Ok(StructuredResponse {
            content,
            usage: chat_response.usage,
        })
    }

    /// Upload a file for use as chat input.
    pub async fn upload_file(&self, filename: &str, media_type: &str, bytes: Vec<u8>) -> Result<FileObject> {
        let part = multipart::Part::bytes(bytes)
            .file_name(filename.to_string())
            .mime_str(media_type)
            .map_err(|e| OpenAIError::Config(format!("Invalid media type {}: {}", media_type, e)))?;
        let form = multipart::Form::new()
            .text("purpose", USER_DATA_PURPOSE)
            .part("file", part);

        let response = self
            .http_client
            .post(format!("{}/files", self.base_url))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(OpenAIError::from_reqwest)?;

        let file: FileObject = check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| OpenAIError::Parse(e.to_string()))?;

        debug!(file_id = %file.id, filename, bytes = file.bytes, "Uploaded file");
        Ok(file)
    }

    /// Delete an uploaded file.
    pub async fn delete_file(&self, file_id: &str) -> Result<()> {
        let response = self
            .http_client
            .delete(format!("{}/files/{}", self.base_url, file_id))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(OpenAIError::from_reqwest)?;

        check_status(response).await?;
        debug!(file_id, "Deleted file");
        Ok(())
    }
}

/// Turn a non-2xx response into a classified error.
async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = parse_retry_after(response.headers());
    let error_text = response.text().await.unwrap_or_default();
    warn!(status = %status, error = %error_text, "OpenAI API error");
    Err(OpenAIError::from_status(status.as_u16(), retry_after, error_text))
}

/// Read `retry-after-ms` or `retry-after` (seconds).
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<f64>().ok())
            .filter(|v| v.is_finite() && *v >= 0.0)
    };

    header("retry-after-ms")
        .map(|ms| Duration::from_secs_f64(ms / 1000.0))
        .or_else(|| header("retry-after").map(Duration::from_secs_f64))
}
