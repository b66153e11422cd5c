//! Configuration types for batch runs.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::request::EffortLevel;

/// How the extractor chain is used for each document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStrategy {
    /// First extractor in the chain to succeed is the only candidate.
    #[default]
    Fallback,

    /// Every extractor in the chain is attempted; all successes are reconciled.
    Consensus,
}

impl std::str::FromStr for ExtractionStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fallback" => Ok(Self::Fallback),
            "consensus" => Ok(Self::Consensus),
            other => Err(format!("unknown strategy '{}' (expected fallback|consensus)", other)),
        }
    }
}

/// Retry policy for retryable extractor failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Attempts per extractor, including the first call. Default: 3.
    pub max_attempts: u32,

    /// Backoff before the second attempt; doubles each retry. Default: 1s.
    #[serde(with = "duration_ms")]
    pub base_backoff: Duration,

    /// Upper bound on a single backoff. Default: 30s.
    #[serde(with = "duration_ms")]
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Policy with no waiting between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// Backoff after the given failed attempt (1-based).
    ///
    /// A provider retry-after hint raises the wait but the cap still applies.
    pub fn backoff(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let scaled = self.base_backoff.saturating_mul(1u32 << exponent);
        let wait = match hint {
            Some(hint) => scaled.max(hint),
            None => scaled,
        };
        wait.min(self.max_backoff)
    }
}

/// Configuration for a batch run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Documents processed concurrently. Default: 3.
    pub concurrency: usize,

    /// Pause before launching each batch after the first. Default: 2s.
    #[serde(with = "duration_ms")]
    pub inter_batch_delay: Duration,

    /// Deadline for a single extractor call. Default: 300s.
    #[serde(with = "duration_ms")]
    pub extract_timeout: Duration,

    /// Retry policy applied per extractor.
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Use of the extractor chain.
    #[serde(default)]
    pub strategy: ExtractionStrategy,

    /// Effort level passed to every request.
    #[serde(default)]
    pub effort: EffortLevel,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency: 3,
            inter_batch_delay: Duration::from_secs(2),
            extract_timeout: Duration::from_secs(300),
            retry: RetryPolicy::default(),
            strategy: ExtractionStrategy::default(),
            effort: EffortLevel::default(),
        }
    }
}

impl BatchConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set concurrency (clamped to at least 1).
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_inter_batch_delay(mut self, delay: Duration) -> Self {
        self.inter_batch_delay = delay;
        self
    }

    pub fn with_extract_timeout(mut self, timeout: Duration) -> Self {
        self.extract_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_strategy(mut self, strategy: ExtractionStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_effort(mut self, effort: EffortLevel) -> Self {
        self.effort = effort;
        self
    }
}

/// Serialize durations as integer milliseconds.
pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
