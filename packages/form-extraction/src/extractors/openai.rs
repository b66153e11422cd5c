//! OpenAI implementation of the Extractor trait.
//!
//! Sends a structured-output chat completion whose JSON schema is rendered
//! from the target `SchemaSpec`. Text content is inlined; binary content
//! is uploaded through the Files API for the duration of the call.
//!
//! # Example
//!
//! ```rust,ignore
//! use form_extraction::extractors::OpenAIExtractor;
//! use form_extraction::security::ProviderCredentials;
//!
//! let creds = ProviderCredentials::new(std::env::var("OPENAI_API_KEY")?);
//! let extractor = OpenAIExtractor::new(&creds, "o4-mini").with_max_content_bytes(20 << 20);
//! ```

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use openai_client::{
    strip_code_blocks, ContentPart, OpenAIClient, OpenAIError, ReasoningEffort, StructuredRequest,
    StructuredResponse,
};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::ExtractionError;
use crate::extractors::files::{with_uploaded_file, FileHost};
use crate::schema::SchemaSpec;
use crate::security::ProviderCredentials;
use crate::traits::extractor::{ensure_within_limit, Extractor};
use crate::types::request::{DocumentContent, EffortLevel, ExtractionRequest};
use crate::types::result::{ExtractionResult, Usage};

const DEFAULT_INSTRUCTIONS: &str = "You extract structured data from documents. \
Fill every field of the response schema from the document. \
Use null for anything the document does not state. Do not invent values.";

/// USD prices per million tokens.
///
/// Output tokens include reasoning tokens, which providers bill at the
/// output rate.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ModelPricing {
    pub input_per_million: f64,
    pub cached_input_per_million: f64,
    pub output_per_million: f64,
}

impl ModelPricing {
    pub fn new(input_per_million: f64, cached_input_per_million: f64, output_per_million: f64) -> Self {
        Self {
            input_per_million,
            cached_input_per_million,
            output_per_million,
        }
    }

    /// Published list prices for common models.
    pub fn for_model(model: &str) -> Option<Self> {
        let pricing = match model {
            m if m.starts_with("gpt-4o-mini") => Self::new(0.15, 0.075, 0.60),
            m if m.starts_with("gpt-4o") => Self::new(2.50, 1.25, 10.00),
            m if m.starts_with("gpt-4.1-mini") => Self::new(0.40, 0.10, 1.60),
            m if m.starts_with("gpt-4.1") => Self::new(2.00, 0.50, 8.00),
            m if m.starts_with("o4-mini") => Self::new(1.10, 0.275, 4.40),
            m if m.starts_with("o3-mini") => Self::new(1.10, 0.55, 4.40),
            m if m.starts_with("o3") => Self::new(2.00, 0.50, 8.00),
            _ => return None,
        };
        Some(pricing)
    }

    /// Cost of one call.
    pub fn cost(&self, usage: &Usage) -> f64 {
        let cached = usage.cached_tokens.min(usage.input_tokens);
        let uncached = usage.input_tokens - cached;
        (uncached as f64 * self.input_per_million
            + cached as f64 * self.cached_input_per_million
            + usage.output_tokens as f64 * self.output_per_million)
            / 1_000_000.0
    }
}

/// Whether the model accepts `reasoning_effort`.
pub fn supports_reasoning(model: &str) -> bool {
    ["o1", "o3", "o4", "gpt-5"].iter().any(|p| model.starts_with(p))
}

fn reasoning_effort(effort: EffortLevel) -> ReasoningEffort {
    match effort {
        EffortLevel::Low => ReasoningEffort::Low,
        EffortLevel::Medium => ReasoningEffort::Medium,
        EffortLevel::High => ReasoningEffort::High,
    }
}

/// Map client failures onto extractor error kinds.
pub fn classify(err: OpenAIError) -> ExtractionError {
    match err {
        OpenAIError::Config(msg) | OpenAIError::Unauthorized(msg) => ExtractionError::Fatal(msg),
        OpenAIError::Network(msg) | OpenAIError::Timeout(msg) => ExtractionError::Transient(msg),
        OpenAIError::RateLimited { message, retry_after } => ExtractionError::RateLimited { message, retry_after },
        OpenAIError::Api { status, message } => match status {
            404 => ExtractionError::Fatal(format!("{}: {}", status, message)),
            408 | 409 | 500..=599 => ExtractionError::Transient(format!("{}: {}", status, message)),
            _ => ExtractionError::SchemaMismatch(format!("{}: {}", status, message)),
        },
        OpenAIError::Refusal(msg) => ExtractionError::SchemaMismatch(format!("model refused: {}", msg)),
        OpenAIError::Parse(msg) => ExtractionError::SchemaMismatch(msg),
    }
}

/// Decode a model reply into a tree.
///
/// A reply that is not JSON decodes to `Value::Null`. The call was billed
/// either way, so the reply is handed back with its usage and the
/// orchestrator's shape check rejects it as a schema mismatch.
pub fn decode_reply(content: &str) -> Value {
    match serde_json::from_str(strip_code_blocks(content)) {
        Ok(tree) => tree,
        Err(e) => {
            warn!(error = %e, "Model reply is not JSON");
            Value::Null
        }
    }
}

#[async_trait]
impl FileHost for OpenAIClient {
    async fn upload(&self, filename: &str, media_type: &str, bytes: Vec<u8>) -> Result<String, ExtractionError> {
        self.upload_file(filename, media_type, bytes)
            .await
            .map(|file| file.id)
            .map_err(classify)
    }

    async fn delete(&self, file_id: &str) -> Result<(), ExtractionError> {
        self.delete_file(file_id).await.map_err(classify)
    }
}

/// Extractor backed by an OpenAI-compatible chat completions endpoint.
#[derive(Clone)]
pub struct OpenAIExtractor {
    id: String,
    client: Arc<OpenAIClient>,
    model: String,
    pricing: ModelPricing,
    instructions: String,
    max_content_bytes: Option<usize>,
}

impl OpenAIExtractor {
    /// Create an extractor for `model`. The id defaults to `openai:<model>`.
    pub fn new(credentials: &ProviderCredentials, model: impl Into<String>) -> Self {
        let model = model.into();
        let mut client = OpenAIClient::new(credentials.api_key.expose());
        if let Some(url) = &credentials.base_url {
            client = client.with_base_url(url.clone());
        }
        Self {
            id: format!("openai:{}", model),
            client: Arc::new(client),
            pricing: ModelPricing::for_model(&model).unwrap_or_default(),
            model,
            instructions: DEFAULT_INSTRUCTIONS.to_string(),
            max_content_bytes: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_pricing(mut self, pricing: ModelPricing) -> Self {
        self.pricing = pricing;
        self
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    pub fn with_max_content_bytes(mut self, limit: usize) -> Self {
        self.max_content_bytes = Some(limit);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn build_request(&self, parts: Vec<ContentPart>, schema: &SchemaSpec, effort: EffortLevel) -> StructuredRequest {
        let system = match &schema.description {
            Some(description) => format!("{}\n\nDocument type: {}", self.instructions, description),
            None => self.instructions.clone(),
        };
        let request = StructuredRequest::new(&self.model, system, parts, schema.to_json_schema())
            .schema_name(schema_name(&schema.id));
        if supports_reasoning(&self.model) {
            request.reasoning_effort(reasoning_effort(effort))
        } else {
            request
        }
    }

    async fn complete(&self, request: StructuredRequest) -> Result<StructuredResponse, ExtractionError> {
        self.client.structured_output(request).await.map_err(classify)
    }
}

/// JSON schema names allow `[a-zA-Z0-9_-]` only.
fn schema_name(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[async_trait]
impl Extractor for OpenAIExtractor {
    fn id(&self) -> &str {
        &self.id
    }

    fn max_content_bytes(&self) -> Option<usize> {
        self.max_content_bytes
    }

    async fn extract(
        &self,
        request: &ExtractionRequest,
        schema: &SchemaSpec,
    ) -> Result<ExtractionResult, ExtractionError> {
        ensure_within_limit(self, request)?;
        let started = Instant::now();

        let response = match request.content() {
            DocumentContent::Text(text) => {
                let parts = vec![ContentPart::text(text.clone())];
                self.complete(self.build_request(parts, schema, request.effort())).await?
            }
            DocumentContent::Binary {
                filename,
                media_type,
                bytes,
            } => {
                with_uploaded_file(self.client.clone(), filename, media_type, bytes.clone(), |file_id| async move {
                    let parts = vec![
                        ContentPart::file(file_id),
                        ContentPart::text("Extract the attached document."),
                    ];
                    self.complete(self.build_request(parts, schema, request.effort())).await
                })
                .await?
            }
        };

        let tree = decode_reply(&response.content);

        let raw = response.usage.unwrap_or_default();
        let mut usage = Usage::new(u64::from(raw.prompt_tokens), u64::from(raw.completion_tokens))
            .with_reasoning_tokens(u64::from(raw.reasoning_tokens()))
            .with_cached_tokens(u64::from(raw.cached_tokens()));
        usage.cost_usd = self.pricing.cost(&usage);

        debug!(
            extractor = %self.id,
            document_id = %request.document_id(),
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            cost_usd = usage.cost_usd,
            "OpenAI extraction finished"
        );

        Ok(ExtractionResult::new(&self.id, tree, usage, started.elapsed()))
    }
}
