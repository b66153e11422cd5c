//! Extractor output and usage accounting.

use std::ops::AddAssign;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Token usage and cost for one or more provider calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    #[serde(default)]
    pub reasoning_tokens: u64,
    #[serde(default)]
    pub cached_tokens: u64,
    pub cost_usd: f64,
}

impl Usage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            ..Default::default()
        }
    }

    pub fn with_reasoning_tokens(mut self, tokens: u64) -> Self {
        self.reasoning_tokens = tokens;
        self
    }

    pub fn with_cached_tokens(mut self, tokens: u64) -> Self {
        self.cached_tokens = tokens;
        self
    }

    pub fn with_cost(mut self, cost_usd: f64) -> Self {
        self.cost_usd = cost_usd;
        self
    }

    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

impl AddAssign for Usage {
    fn add_assign(&mut self, rhs: Self) {
        self.input_tokens += rhs.input_tokens;
        self.output_tokens += rhs.output_tokens;
        self.reasoning_tokens += rhs.reasoning_tokens;
        self.cached_tokens += rhs.cached_tokens;
        self.cost_usd += rhs.cost_usd;
    }
}

/// A structured result produced by one extractor.
///
/// Read-only after construction; the consensus step takes it by value.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionResult {
    extractor_id: String,
    tree: Value,
    usage: Usage,
    duration: Duration,
}

impl ExtractionResult {
    pub fn new(extractor_id: impl Into<String>, tree: Value, usage: Usage, duration: Duration) -> Self {
        Self {
            extractor_id: extractor_id.into(),
            tree,
            usage,
            duration,
        }
    }

    pub fn extractor_id(&self) -> &str {
        &self.extractor_id
    }

    /// The semantic document tree.
    pub fn tree(&self) -> &Value {
        &self.tree
    }

    pub fn usage(&self) -> Usage {
        self.usage
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Take ownership of the tree.
    pub fn into_tree(self) -> Value {
        self.tree
    }
}
