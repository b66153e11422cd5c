//! Testing utilities including mock implementations.
//!
//! These are useful for testing applications that use the extraction library
//! without calling real providers.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use crate::error::ExtractionError;
use crate::schema::SchemaSpec;
use crate::traits::extractor::Extractor;
use crate::types::request::ExtractionRequest;
use crate::types::result::{ExtractionResult, Usage};

/// Scripted reply for one call.
pub type MockReply = Result<Value, ExtractionError>;

/// A mock extractor for testing.
///
/// Replies come from, in order: the queue scripted for the document,
/// the default error, the default tree, and finally a skeleton with
/// every declared top-level field set to null.
#[derive(Default)]
pub struct MockExtractor {
    id: String,

    /// Queued replies by document id
    scripts: Arc<RwLock<HashMap<String, VecDeque<MockReply>>>>,

    /// Reply when nothing is queued
    default_tree: Option<Value>,

    /// Error returned when nothing is queued
    default_error: Option<ExtractionError>,

    /// Simulated provider latency
    delay: Duration,

    max_content_bytes: Option<usize>,

    usage: Usage,

    /// Document ids in call order
    calls: Arc<RwLock<Vec<String>>>,

    in_flight: Arc<AtomicUsize>,
    peak_in_flight: Arc<AtomicUsize>,
}

impl MockExtractor {
    /// Create a new mock extractor with the given id.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            usage: Usage::new(100, 20).with_cost(0.001),
            ..Default::default()
        }
    }

    /// Reply with this tree unless a document-specific reply is queued.
    pub fn with_tree(mut self, tree: Value) -> Self {
        self.default_tree = Some(tree);
        self
    }

    /// Fail every unscripted call with this error.
    pub fn with_error(mut self, error: ExtractionError) -> Self {
        self.default_error = Some(error);
        self
    }

    /// Queue a reply for one call on `document_id`.
    pub fn with_reply(self, document_id: impl Into<String>, reply: MockReply) -> Self {
        self.scripts
            .write()
            .unwrap()
            .entry(document_id.into())
            .or_default()
            .push_back(reply);
        self
    }

    /// Sleep this long inside every call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_max_content_bytes(mut self, limit: usize) -> Self {
        self.max_content_bytes = Some(limit);
        self
    }

    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = usage;
        self
    }

    /// Every call made, as document ids in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.read().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.read().unwrap().len()
    }

    /// Calls made for one document.
    pub fn calls_for(&self, document_id: &str) -> usize {
        self.calls
            .read()
            .unwrap()
            .iter()
            .filter(|id| id.as_str() == document_id)
            .count()
    }

    /// Most calls observed running at once.
    pub fn peak_concurrency(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn next_reply(&self, document_id: &str, schema: &SchemaSpec) -> MockReply {
        let scripted = self
            .scripts
            .write()
            .unwrap()
            .get_mut(document_id)
            .and_then(VecDeque::pop_front);
        if let Some(reply) = scripted {
            return reply;
        }
        if let Some(error) = &self.default_error {
            return Err(error.clone());
        }
        if let Some(tree) = &self.default_tree {
            return Ok(tree.clone());
        }
        let skeleton: Map<String, Value> = schema
            .fields
            .keys()
            .map(|name| (name.clone(), Value::Null))
            .collect();
        Ok(Value::Object(skeleton))
    }
}

struct CallGuard(Arc<AtomicUsize>);

impl Drop for CallGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Extractor for MockExtractor {
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
        let started = Instant::now();
        self.calls
            .write()
            .unwrap()
            .push(request.document_id().to_string());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = CallGuard(self.in_flight.clone());

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let tree = self.next_reply(request.document_id(), schema)?;
        Ok(ExtractionResult::new(&self.id, tree, self.usage, started.elapsed()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldSpec, FieldType};
    use crate::types::request::{DocumentContent, EffortLevel};
    use serde_json::json;

    fn schema() -> SchemaSpec {
        SchemaSpec::new("note")
            .with_field("title", FieldSpec::new(FieldType::String).required())
            .with_field("body", FieldSpec::new(FieldType::String))
    }

    fn request(id: &str) -> ExtractionRequest {
        ExtractionRequest::new(id, DocumentContent::text("hello"), "note", EffortLevel::Low).unwrap()
    }

    #[tokio::test]
    async fn test_scripted_replies_then_default() {
        let mock = MockExtractor::new("mock")
            .with_tree(json!({"title": "default"}))
            .with_reply("a", Err(ExtractionError::Transient("reset".into())));

        assert!(mock.extract(&request("a"), &schema()).await.is_err());
        let second = mock.extract(&request("a"), &schema()).await.unwrap();
        assert_eq!(second.tree(), &json!({"title": "default"}));
        assert_eq!(mock.calls_for("a"), 2);
    }

    #[tokio::test]
    async fn test_skeleton_when_unconfigured() {
        let mock = MockExtractor::new("mock");
        let result = mock.extract(&request("a"), &schema()).await.unwrap();
        assert_eq!(result.tree(), &json!({"title": null, "body": null}));
        assert_eq!(result.extractor_id(), "mock");
    }
}
