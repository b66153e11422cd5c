//! Batch summary aggregation.
//!
//! The summary is computed from the persisted records, not from the
//! in-memory state of one run, so it also covers documents settled by
//! earlier runs against the same output directory.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::types::record::{BatchSummary, DocumentRecord, FailureEntry};
use crate::types::result::Usage;

/// Aggregate every record into a summary for `run_id`.
pub fn summarize(run_id: Uuid, started_at: DateTime<Utc>, records: &[DocumentRecord]) -> BatchSummary {
    let mut summary = BatchSummary {
        run_id,
        started_at,
        finished_at: Utc::now(),
        total_documents: records.len(),
        completed: 0,
        failed: 0,
        valid: 0,
        invalid: 0,
        by_source: Default::default(),
        by_schema: Default::default(),
        failures_by_kind: Default::default(),
        failures: Vec::new(),
        average_confidence: None,
        average_completeness: None,
        total_attempts: 0,
        total_duration_ms: 0,
        average_duration_ms: None,
        average_cost_usd: None,
        usage: Usage::default(),
    };

    let mut confidences = Vec::new();
    let mut completeness = Vec::new();

    for record in records {
        summary.total_attempts += u64::from(record.attempts);
        summary.total_duration_ms += record.duration_ms;
        summary.usage += record.usage;

        let tally = summary.by_schema.entry(record.schema_id.clone()).or_default();
        tally.documents += 1;

        if record.is_completed() {
            summary.completed += 1;
            tally.completed += 1;

            if let Some(source) = record.source() {
                *summary.by_source.entry(source.to_string()).or_default() += 1;
            }
            if let Some(confidence) = record.confidence() {
                confidences.push(f64::from(confidence));
            }
            if let Some(report) = &record.validation {
                completeness.push(f64::from(report.completeness));
                if report.valid {
                    summary.valid += 1;
                    tally.valid += 1;
                } else {
                    summary.invalid += 1;
                }
            }
        } else {
            summary.failed += 1;
            tally.failed += 1;

            if let Some(error) = &record.error {
                *summary
                    .failures_by_kind
                    .entry(error.kind.as_str().to_string())
                    .or_default() += 1;
                summary.failures.push(FailureEntry {
                    document_id: record.document_id.clone(),
                    kind: error.kind,
                    message: error.message.clone(),
                });
            }
        }
    }

    summary.failures.sort_by(|a, b| a.document_id.cmp(&b.document_id));
    summary.average_confidence = mean(&confidences);
    summary.average_completeness = mean(&completeness);
    if !records.is_empty() {
        let count = records.len() as f64;
        summary.average_duration_ms = Some(summary.total_duration_ms as f64 / count);
        summary.average_cost_usd = Some(summary.usage.cost_usd / count);
    }
    summary
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::pipeline::consensus::SelectionReason;
    use crate::types::record::{ConsensusDiagnostics, DocumentStatus, RecordedError};

    fn completed(id: &str, source: &str, confidence: u8) -> DocumentRecord {
        DocumentRecord {
            document_id: id.into(),
            schema_id: "iep".into(),
            status: DocumentStatus::Completed,
            run_id: Uuid::now_v7(),
            processed_at: Utc::now(),
            content_hash: None,
            attempts: 2,
            usage: Usage::new(100, 10).with_cost(0.25),
            duration_ms: 5,
            consensus: Some(ConsensusDiagnostics {
                source: source.into(),
                reason: SelectionReason::SoleCandidate,
                confidence,
                candidates: vec![],
                conflicted_fields: vec![],
            }),
            validation: None,
            data: None,
            error: None,
            last_error_kind: None,
        }
    }

    fn failed(id: &str, kind: ErrorKind) -> DocumentRecord {
        DocumentRecord {
            status: DocumentStatus::Failed,
            consensus: None,
            attempts: 1,
            usage: Usage::default(),
            duration_ms: 20,
            error: Some(RecordedError::new(kind, "boom")),
            ..completed(id, "", 0)
        }
    }

    #[test]
    fn test_counts_and_averages() {
        let records = vec![
            completed("a", "primary", 80),
            completed("b", "secondary", 60),
            completed("c", "primary", 70),
            failed("d", ErrorKind::NoExtractionAvailable),
            failed("e", ErrorKind::InvalidRequest),
        ];
        let summary = summarize(Uuid::now_v7(), Utc::now(), &records);

        assert_eq!(summary.total_documents, 5);
        assert_eq!(summary.completed, 3);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.by_source.get("primary"), Some(&2));
        assert_eq!(summary.by_source.get("secondary"), Some(&1));
        assert_eq!(summary.failures_by_kind.get("invalid_request"), Some(&1));
        assert_eq!(summary.failures.len(), 2);
        assert_eq!(summary.average_confidence, Some(70.0));
        assert_eq!(summary.average_completeness, None);
        assert_eq!(summary.total_attempts, 8);
        assert!((summary.usage.cost_usd - 0.75).abs() < 1e-9);
        assert_eq!(summary.by_schema["iep"].documents, 5);

        // 3 completed at 5ms + 2 failed at 20ms
        assert_eq!(summary.total_duration_ms, 55);
        assert_eq!(summary.average_duration_ms, Some(11.0));
        assert!((summary.average_cost_usd.unwrap() - 0.15).abs() < 1e-9);
    }

    #[test]
    fn test_empty_records() {
        let summary = summarize(Uuid::now_v7(), Utc::now(), &[]);
        assert_eq!(summary.total_documents, 0);
        assert!(summary.average_confidence.is_none());
        assert!(summary.average_cost_usd.is_none());
        assert!(summary.average_duration_ms.is_none());
        assert_eq!(summary.total_duration_ms, 0);
    }
}
