//! End-to-end extraction of an IEP form through two extractors.
//!
//! The primary returns a fuller record than the secondary; under the
//! schema's rubric they score 72 and 58.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use form_extraction::{
    testing::MockExtractor, BatchConfig, BatchOrchestrator, ConfidenceScorer, Document,
    DocumentContent, DocumentRecord, ExtractionStrategy, FileResultStore, ProgressLedger,
    RetryPolicy, SchemaRegistry, SchemaSpec, SelectionReason, Severity,
};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

fn iep_schema() -> SchemaSpec {
    SchemaSpec::from_file(fixture("iep_schema.json")).unwrap()
}

fn primary_tree() -> Value {
    json!({
        "student": {
            "name": "Jordan Lee",
            "dob": "2014-03-09",
            "grade": "4",
            "school": "Lincoln Elementary"
        },
        "goals": [
            {"goal_number": 1, "description": "Read grade-level text fluently"},
            {"goal_number": 2, "description": "Summarize a short passage"}
        ],
        "services": [
            {
                "service": "Reading intervention",
                "goal_number": 1,
                "minutes": 30,
                "provider": "Special education teacher"
            }
        ],
        "present_levels": "Jordan reads second grade text at 60 words per minute with 90% accuracy.",
        "parent_concerns": "Homework takes too long."
    })
}

fn secondary_tree() -> Value {
    json!({
        "student": {"name": "Jordan Lee", "grade": "4"},
        "goals": [
            {"goal_number": 1, "description": "Read fluently"}
        ],
        "accommodations": [],
        "services": [
            {"service": "Reading intervention", "goal_number": 1}
        ],
        "present_levels": "Jordan reads second grade text at 60 words per minute with 90% accuracy."
    })
}

fn consensus_config() -> BatchConfig {
    BatchConfig::new()
        .with_inter_batch_delay(Duration::ZERO)
        .with_retry(RetryPolicy::immediate(2))
        .with_strategy(ExtractionStrategy::Consensus)
}

#[test]
fn test_rubric_scores_both_candidates() {
    let scorer = ConfidenceScorer::for_schema(&iep_schema());

    let primary = scorer.score_tree(&primary_tree());
    assert_eq!(primary.value, 72);
    let narrative = primary.sections.iter().find(|s| s.name == "narrative").unwrap();
    assert_eq!(narrative.penalty, 3.0);

    let secondary = scorer.score_tree(&secondary_tree());
    assert_eq!(secondary.value, 58);
    let accommodations = secondary
        .sections
        .iter()
        .find(|s| s.name == "accommodations")
        .unwrap();
    assert_eq!(accommodations.net(), -5.0);
}

#[tokio::test]
async fn test_consensus_picks_primary_and_validates() {
    let dir = tempfile::tempdir().unwrap();
    let schemas = Arc::new(SchemaRegistry::new().with_schema(iep_schema()));
    let primary = Arc::new(MockExtractor::new("primary").with_tree(primary_tree()));
    let secondary = Arc::new(MockExtractor::new("secondary").with_tree(secondary_tree()));
    let store = Arc::new(FileResultStore::new(dir.path()));

    let orchestrator = BatchOrchestrator::new(
        vec![primary.clone(), secondary.clone()],
        schemas,
        store.clone(),
    )
    .with_config(consensus_config());

    let mut ledger = ProgressLedger::open(dir.path()).await.unwrap();
    let document = Document::new(
        "jordan-lee-2025",
        "iep",
        DocumentContent::text("Student: Jordan Lee\nGrade: 4\n..."),
    );
    let report = orchestrator
        .run(vec![document], &mut ledger, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.processed, 1);
    assert_eq!(report.summary.completed, 1);
    assert_eq!(report.summary.valid, 1);
    assert_eq!(report.summary.by_source.get("primary"), Some(&1));
    assert_eq!(primary.call_count(), 1);
    assert_eq!(secondary.call_count(), 1);

    // Record persisted to disk
    let text = std::fs::read_to_string(store.record_path("jordan-lee-2025")).unwrap();
    let record: DocumentRecord = serde_json::from_str(&text).unwrap();
    assert!(record.is_completed());
    assert_eq!(record.data.as_ref(), Some(&primary_tree()));

    let consensus = record.consensus.as_ref().unwrap();
    assert_eq!(consensus.source, "primary");
    assert_eq!(consensus.reason, SelectionReason::HighestConfidence);
    assert_eq!(consensus.confidence, 72);
    assert_eq!(consensus.candidates.len(), 2);
    assert_eq!(consensus.candidates[1].extractor_id, "secondary");
    assert_eq!(consensus.candidates[1].confidence, 58);
    for path in ["accommodations", "parent_concerns", "goals[1].goal_number", "student.dob"] {
        assert!(
            consensus.conflicted_fields.iter().any(|f| f == path),
            "expected {} to be conflicted",
            path
        );
    }
    assert!(!consensus.conflicted_fields.iter().any(|f| f == "present_levels"));
    assert!(!consensus.conflicted_fields.iter().any(|f| f == "student.name"));

    let validation = record.validation.as_ref().unwrap();
    assert!(validation.valid);
    assert_eq!(validation.tracked_fields, 20);
    assert_eq!(validation.completed_fields, 17);
    assert_eq!(validation.completeness, 85);
    assert_eq!(validation.issues.len(), 1);
    assert_eq!(validation.issues[0].path, "parent_concerns");
    assert_eq!(validation.issues[0].severity, Severity::Warning);
    assert!(validation.missing_critical.is_empty());
    assert!(validation.missing_optional.iter().any(|p| p == "accommodations"));

    // Usage summed across both candidates
    assert_eq!(record.usage.input_tokens, 200);
    assert_eq!(record.attempts, 2);

    // Ledger and summary written
    assert!(ledger.contains("jordan-lee-2025"));
    let reopened = ProgressLedger::open(dir.path()).await.unwrap();
    assert!(reopened.contains("jordan-lee-2025"));

    let summary_path = store
        .summaries_dir()
        .join(format!("summary-{}.json", report.run_id));
    assert!(summary_path.exists());
}

#[tokio::test]
async fn test_fallback_strategy_uses_primary_only() {
    let schemas = Arc::new(SchemaRegistry::new().with_schema(iep_schema()));
    let primary = Arc::new(MockExtractor::new("primary").with_tree(primary_tree()));
    let secondary = Arc::new(MockExtractor::new("secondary").with_tree(secondary_tree()));
    let store = Arc::new(form_extraction::MemoryResultStore::new());

    let orchestrator = BatchOrchestrator::new(
        vec![primary.clone(), secondary.clone()],
        schemas,
        store.clone(),
    )
    .with_config(consensus_config().with_strategy(ExtractionStrategy::Fallback));

    let mut ledger = ProgressLedger::in_memory();
    let document = Document::new("jordan", "iep", DocumentContent::text("Student: Jordan Lee"));
    orchestrator
        .run(vec![document], &mut ledger, CancellationToken::new())
        .await
        .unwrap();

    let record = store.record("jordan").unwrap();
    let consensus = record.consensus.unwrap();
    assert_eq!(consensus.source, "primary");
    assert_eq!(consensus.reason, SelectionReason::SoleCandidate);
    assert!(consensus.conflicted_fields.is_empty());
    assert_eq!(secondary.call_count(), 0);
}
