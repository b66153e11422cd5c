//! Batch orchestrator: drives documents through extract → reconcile →
//! validate → persist.
//!
//! Documents already in the ledger are skipped. The rest are processed in
//! batches of `concurrency` documents with a pause between batches. Each
//! settled document is persisted and appended to the ledger by the single
//! task that drains the batch, never by the workers.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{BatchError, ErrorKind, ExtractionError};
use crate::pipeline::consensus::ConsensusEngine;
use crate::pipeline::scoring::ConfidenceScorer;
use crate::pipeline::summary::summarize;
use crate::schema::{validate, SchemaRegistry, SchemaSpec};
use crate::stores::ProgressLedger;
use crate::traits::extractor::{ensure_within_limit, Extractor};
use crate::traits::store::ResultStore;
use crate::types::config::{BatchConfig, ExtractionStrategy};
use crate::types::job::{BatchJob, JobState};
use crate::types::record::{
    BatchReport, ConsensusDiagnostics, DocumentRecord, DocumentStatus, RecordedError,
};
use crate::types::request::{Document, ExtractionRequest};
use crate::types::result::ExtractionResult;

/// How one document left the worker.
enum DocumentOutcome {
    /// Terminal state reached; persist and append to the ledger.
    Settled(Box<DocumentRecord>),

    /// A fatal error; the batch must stop and this document is not recorded.
    Aborted {
        document_id: String,
        error: ExtractionError,
    },

    /// Work was cancelled before the document settled.
    Cancelled,
}

/// Why one extractor produced no candidate.
enum ChainError {
    Exhausted(ExtractionError),
    Fatal(ExtractionError),
    Cancelled,
}

/// Documents currently between start and settlement.
#[derive(Default)]
struct InFlight {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl InFlight {
    fn enter(&self) -> InFlightGuard<'_> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        InFlightGuard(self)
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

struct InFlightGuard<'a>(&'a InFlight);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Runs batches of documents against an extractor chain.
pub struct BatchOrchestrator {
    extractors: Vec<Arc<dyn Extractor>>,
    schemas: Arc<SchemaRegistry>,
    engines: HashMap<String, ConsensusEngine>,
    priority: Vec<String>,
    store: Arc<dyn ResultStore>,
    config: BatchConfig,
}

impl BatchOrchestrator {
    /// Create an orchestrator. Chain order is both the fallback order and
    /// the consensus tie-break priority.
    pub fn new(
        extractors: Vec<Arc<dyn Extractor>>,
        schemas: Arc<SchemaRegistry>,
        store: Arc<dyn ResultStore>,
    ) -> Self {
        let priority = extractors.iter().map(|e| e.id().to_string()).collect();
        let mut orchestrator = Self {
            extractors,
            schemas,
            engines: HashMap::new(),
            priority,
            store,
            config: BatchConfig::default(),
        };
        orchestrator.build_engines();
        orchestrator
    }

    pub fn with_config(mut self, config: BatchConfig) -> Self {
        self.config = config;
        self
    }

    /// Override the consensus tie-break order.
    pub fn with_priority(mut self, ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.priority = ids.into_iter().map(Into::into).collect();
        self.build_engines();
        self
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    pub fn extractor_ids(&self) -> Vec<&str> {
        self.extractors.iter().map(|e| e.id()).collect()
    }

    fn build_engines(&mut self) {
        self.engines = self
            .schemas
            .iter()
            .map(|schema| (schema.id.clone(), self.engine_for(schema)))
            .collect();
    }

    fn engine_for(&self, schema: &SchemaSpec) -> ConsensusEngine {
        ConsensusEngine::new(ConfidenceScorer::for_schema(schema)).with_priority(self.priority.clone())
    }

    /// Process every document not yet in `ledger`.
    ///
    /// Returns `BatchError::Fatal` as soon as an extractor reports a fatal
    /// condition; documents that settled before that point stay recorded.
    pub async fn run(
        &self,
        documents: Vec<Document>,
        ledger: &mut ProgressLedger,
        cancel: CancellationToken,
    ) -> Result<BatchReport, BatchError> {
        let run_id = Uuid::now_v7();
        let started_at = Utc::now();
        let total = documents.len();

        let mut seen = HashSet::new();
        let mut pending = Vec::with_capacity(total);
        let mut skipped = 0;
        for document in documents {
            if ledger.contains(&document.id) {
                skipped += 1;
            } else if !seen.insert(document.id.clone()) {
                warn!(document_id = %document.id, "Duplicate document id in batch, ignoring repeat");
            } else {
                pending.push(document);
            }
        }

        info!(
            run_id = %run_id,
            total,
            pending = pending.len(),
            skipped,
            concurrency = self.config.concurrency,
            strategy = ?self.config.strategy,
            "Starting batch run"
        );

        let concurrency = self.config.concurrency.max(1);
        let gauge = InFlight::default();
        let work = cancel.child_token();
        let mut processed = 0;

        for (index, chunk) in pending.chunks(concurrency).enumerate() {
            if index > 0 && !self.config.inter_batch_delay.is_zero() {
                debug!(delay = ?self.config.inter_batch_delay, "Waiting before next batch");
                tokio::select! {
                    _ = tokio::time::sleep(self.config.inter_batch_delay) => {}
                    _ = work.cancelled() => {}
                }
            }
            if work.is_cancelled() {
                break;
            }

            let mut outcomes = stream::iter(chunk)
                .map(|document| self.process_document(run_id, document, &gauge, &work))
                .buffer_unordered(concurrency);

            let mut fatal = None;
            while let Some(outcome) = outcomes.next().await {
                match outcome {
                    DocumentOutcome::Settled(record) => {
                        self.store.save_record(&record).await?;
                        ledger.append(&record.document_id).await?;
                        processed += 1;
                    }
                    DocumentOutcome::Aborted { document_id, error } => {
                        error!(document_id = %document_id, error = %error, "Fatal extractor error, aborting batch");
                        work.cancel();
                        fatal.get_or_insert((document_id, error));
                    }
                    DocumentOutcome::Cancelled => {}
                }
            }

            if let Some((document_id, source)) = fatal {
                return Err(BatchError::Fatal { document_id, source });
            }
        }

        if cancel.is_cancelled() {
            warn!(run_id = %run_id, processed, "Batch run cancelled");
            return Err(BatchError::Cancelled);
        }

        let records = self.store.load_all().await?;
        let summary = summarize(run_id, started_at, &records);
        self.store.save_summary(&summary).await?;

        info!(
            run_id = %run_id,
            processed,
            skipped,
            completed = summary.completed,
            failed = summary.failed,
            cost_usd = summary.usage.cost_usd,
            "Batch run finished"
        );

        Ok(BatchReport {
            run_id,
            processed,
            skipped,
            peak_concurrency: gauge.peak(),
            summary,
        })
    }

    async fn process_document(
        &self,
        run_id: Uuid,
        document: &Document,
        gauge: &InFlight,
        cancel: &CancellationToken,
    ) -> DocumentOutcome {
        let _in_flight = gauge.enter();
        let started = Instant::now();
        let mut job = BatchJob::new(&document.id);

        let mut record = DocumentRecord {
            document_id: document.id.clone(),
            schema_id: document.schema_id.clone(),
            status: DocumentStatus::Failed,
            run_id,
            processed_at: Utc::now(),
            content_hash: Some(document.content.content_hash()),
            attempts: 0,
            usage: Default::default(),
            duration_ms: 0,
            consensus: None,
            validation: None,
            data: None,
            error: None,
            last_error_kind: None,
        };

        let request = match ExtractionRequest::for_document(document, self.config.effort) {
            Ok(request) => request,
            Err(e) => {
                warn!(document_id = %document.id, error = %e, "Rejecting document");
                advance(&mut job, JobState::Failed);
                record.error = Some(RecordedError::new(ErrorKind::InvalidRequest, e.to_string()));
                return settle(record, &job, started);
            }
        };

        let schema = match self.schemas.resolve(&document.schema_id) {
            Ok(schema) => schema,
            Err(e) => {
                return DocumentOutcome::Aborted {
                    document_id: document.id.clone(),
                    error: ExtractionError::Fatal(e.to_string()),
                }
            }
        };

        advance(&mut job, JobState::Extracting);

        let mut candidates = Vec::new();
        let mut last_error = None;
        for extractor in &self.extractors {
            match self
                .extract_with_retry(extractor.as_ref(), &request, &schema, &mut job, cancel)
                .await
            {
                Ok(result) => {
                    candidates.push(result);
                    if self.config.strategy == ExtractionStrategy::Fallback {
                        break;
                    }
                }
                Err(ChainError::Exhausted(e)) => {
                    warn!(
                        document_id = %document.id,
                        extractor = extractor.id(),
                        error = %e,
                        "Extractor gave up, moving down the chain"
                    );
                    last_error = Some(e);
                }
                Err(ChainError::Fatal(e)) => {
                    return DocumentOutcome::Aborted {
                        document_id: document.id.clone(),
                        error: e,
                    }
                }
                Err(ChainError::Cancelled) => return DocumentOutcome::Cancelled,
            }
        }

        let engine = self
            .engines
            .get(&schema.id)
            .cloned()
            .unwrap_or_else(|| self.engine_for(&schema));

        let consensus = match engine.reconcile(candidates) {
            Ok(consensus) => consensus,
            Err(e) => {
                let message = match &last_error {
                    Some(last) => format!("{}; last error: {}", e, last),
                    None => e.to_string(),
                };
                warn!(document_id = %document.id, error = %message, "Document failed");
                advance(&mut job, JobState::Failed);
                record.error = Some(RecordedError::new(ErrorKind::NoExtractionAvailable, message));
                return settle(record, &job, started);
            }
        };

        advance(&mut job, JobState::Validating);
        let report = validate(&consensus.tree, &schema);
        advance(&mut job, JobState::Completed);

        info!(
            document_id = %document.id,
            source = %consensus.source,
            confidence = consensus.confidence(),
            completeness = report.completeness,
            valid = report.valid,
            issues = report.issues.len(),
            "Document completed"
        );

        record.status = DocumentStatus::Completed;
        record.consensus = Some(ConsensusDiagnostics::from(&consensus));
        record.validation = Some(report);
        record.data = Some(consensus.tree);
        settle(record, &job, started)
    }

    /// Call one extractor, retrying retryable failures per the retry policy.
    async fn extract_with_retry(
        &self,
        extractor: &dyn Extractor,
        request: &ExtractionRequest,
        schema: &SchemaSpec,
        job: &mut BatchJob,
        cancel: &CancellationToken,
    ) -> Result<ExtractionResult, ChainError> {
        let policy = &self.config.retry;
        let max_attempts = policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            job.attempts += 1;
            if attempt > 1 {
                advance(job, JobState::Extracting);
            }

            let call = async {
                ensure_within_limit(extractor, request)?;
                extractor.extract(request, schema).await
            };

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ChainError::Cancelled),
                timed = tokio::time::timeout(self.config.extract_timeout, call) => match timed {
                    Ok(outcome) => outcome,
                    Err(_) => Err(ExtractionError::Transient(format!(
                        "{} exceeded {:?}",
                        extractor.id(),
                        self.config.extract_timeout
                    ))),
                },
            };

            // A reply that fails the shape check was still billed.
            let outcome = outcome.and_then(|result| {
                job.usage += result.usage();
                check_shape(&result, schema).map(|()| result)
            });

            let err = match outcome {
                Ok(result) => {
                    debug!(
                        document_id = %request.document_id(),
                        extractor = extractor.id(),
                        attempt,
                        duration_ms = result.duration().as_millis() as u64,
                        "Extractor succeeded"
                    );
                    return Ok(result);
                }
                Err(err) => err,
            };

            job.last_error = Some(err.kind());

            if matches!(err, ExtractionError::Fatal(_)) {
                return Err(ChainError::Fatal(err));
            }
            if !err.is_retryable() || attempt >= max_attempts {
                return Err(ChainError::Exhausted(err));
            }

            let wait = policy.backoff(attempt, err.retry_after());
            warn!(
                document_id = %request.document_id(),
                extractor = extractor.id(),
                attempt,
                wait_ms = wait.as_millis() as u64,
                error = %err,
                "Retrying extractor"
            );
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = cancel.cancelled() => return Err(ChainError::Cancelled),
            }
        }
    }
}

/// Enforce the extractor's shape guarantee.
fn check_shape(result: &ExtractionResult, schema: &SchemaSpec) -> Result<(), ExtractionError> {
    if !result.tree().is_object() {
        return Err(ExtractionError::SchemaMismatch(format!(
            "{} returned a non-object tree",
            result.extractor_id()
        )));
    }
    let missing = schema.missing_top_level_keys(result.tree());
    if !missing.is_empty() {
        return Err(ExtractionError::SchemaMismatch(format!(
            "{} omitted required keys: {}",
            result.extractor_id(),
            missing.join(", ")
        )));
    }
    Ok(())
}

/// Apply a state change that the orchestrator's own flow guarantees is legal.
fn advance(job: &mut BatchJob, next: JobState) {
    if let Err(e) = job.transition(next) {
        error!(error = %e, "Job state machine violated");
    }
}

fn settle(mut record: DocumentRecord, job: &BatchJob, started: Instant) -> DocumentOutcome {
    record.attempts = job.attempts;
    record.usage = job.usage;
    record.last_error_kind = job.last_error;
    record.duration_ms = started.elapsed().as_millis() as u64;
    record.processed_at = Utc::now();
    DocumentOutcome::Settled(Box::new(record))
}
