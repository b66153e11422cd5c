//! Consensus selection among candidate extraction results.
//!
//! Selection is whole-record: the highest-scoring candidate's tree is
//! taken as-is. Ties are broken by a configured priority order, then by
//! extractor id, then by the candidate's canonical tree text, so the
//! outcome never depends on the order candidates arrived in.

use std::cmp::{Ordering, Reverse};
use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::ConsensusError;
use crate::pipeline::scoring::{ConfidenceScore, ConfidenceScorer};
use crate::tree::flatten_leaves;
use crate::types::result::ExtractionResult;

/// Why the winning candidate was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionReason {
    SoleCandidate,
    HighestConfidence,
    PriorityTieBreak,
}

/// Score of one candidate, as reported alongside the winner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateScore {
    pub extractor_id: String,
    pub confidence: u8,
}

/// Outcome of reconciling one document's candidates.
#[derive(Debug, Clone)]
pub struct ConsensusResult {
    pub tree: Value,
    pub source: String,
    pub reason: SelectionReason,
    pub score: ConfidenceScore,
    /// Every candidate in ranking order, winner first.
    pub candidates: Vec<CandidateScore>,
    /// Leaf paths on which candidates disagree, sorted.
    pub conflicted_fields: Vec<String>,
}

impl ConsensusResult {
    pub fn confidence(&self) -> u8 {
        self.score.value
    }
}

struct Ranked {
    result: ExtractionResult,
    score: ConfidenceScore,
    rank: usize,
    canonical: String,
}

/// Scores candidates and picks one.
#[derive(Debug, Clone)]
pub struct ConsensusEngine {
    scorer: ConfidenceScorer,
    priority: Vec<String>,
}

impl ConsensusEngine {
    pub fn new(scorer: ConfidenceScorer) -> Self {
        Self {
            scorer,
            priority: Vec::new(),
        }
    }

    /// Preferred extractors for breaking ties, most preferred first.
    pub fn with_priority(mut self, ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.priority = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn scorer(&self) -> &ConfidenceScorer {
        &self.scorer
    }

    fn rank_of(&self, extractor_id: &str) -> usize {
        self.priority
            .iter()
            .position(|id| id == extractor_id)
            .unwrap_or(self.priority.len())
    }

    /// Select the final result among `results`.
    pub fn reconcile(&self, results: Vec<ExtractionResult>) -> Result<ConsensusResult, ConsensusError> {
        if results.is_empty() {
            return Err(ConsensusError::NoExtractionAvailable);
        }

        let conflicted_fields = conflicted_fields(&results);

        let mut ranked: Vec<Ranked> = results
            .into_iter()
            .map(|result| Ranked {
                score: self.scorer.score(&result),
                rank: self.rank_of(result.extractor_id()),
                canonical: canonical_text(result.tree()),
                result,
            })
            .collect();

        ranked.sort_by(compare_ranked);

        let reason = match ranked.get(1) {
            None => SelectionReason::SoleCandidate,
            Some(runner_up) if ranked[0].score.value > runner_up.score.value => {
                SelectionReason::HighestConfidence
            }
            Some(_) => SelectionReason::PriorityTieBreak,
        };

        let candidates: Vec<CandidateScore> = ranked
            .iter()
            .map(|r| CandidateScore {
                extractor_id: r.result.extractor_id().to_string(),
                confidence: r.score.value,
            })
            .collect();

        let winner = ranked.swap_remove(0);
        let source = winner.result.extractor_id().to_string();

        debug!(
            source = %source,
            confidence = winner.score.value,
            reason = ?reason,
            candidates = candidates.len(),
            conflicts = conflicted_fields.len(),
            "Consensus selected"
        );

        Ok(ConsensusResult {
            tree: winner.result.into_tree(),
            source,
            reason,
            score: winner.score,
            candidates,
            conflicted_fields,
        })
    }
}

fn compare_ranked(a: &Ranked, b: &Ranked) -> Ordering {
    (Reverse(a.score.value), a.rank, a.result.extractor_id(), &a.canonical).cmp(&(
        Reverse(b.score.value),
        b.rank,
        b.result.extractor_id(),
        &b.canonical,
    ))
}

/// Leaf paths present in some candidate but absent or different in another.
fn conflicted_fields(results: &[ExtractionResult]) -> Vec<String> {
    if results.len() < 2 {
        return Vec::new();
    }

    let leaves: Vec<_> = results.iter().map(|r| flatten_leaves(r.tree())).collect();
    let all_paths: BTreeSet<&String> = leaves.iter().flat_map(|l| l.keys()).collect();

    all_paths
        .into_iter()
        .filter(|path| {
            let first = leaves[0].get(*path);
            leaves[1..].iter().any(|l| l.get(*path) != first)
        })
        .cloned()
        .collect()
}

/// Serialization with object keys sorted at every level.
fn canonical_text(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let body: Vec<String> = keys
                .into_iter()
                .map(|k| format!("{}:{}", Value::String(k.clone()), canonical_text(&map[k])))
                .collect();
            format!("{{{}}}", body.join(","))
        }
        Value::Array(items) => {
            let body: Vec<String> = items.iter().map(canonical_text).collect();
            format!("[{}]", body.join(","))
        }
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::scoring::{Rubric, RubricSection};
    use crate::types::result::Usage;
    use proptest::prelude::*;
    use serde_json::json;
    use std::time::Duration;

    fn engine() -> ConsensusEngine {
        let rubric = Rubric::new(vec![
            RubricSection::field("name", 40.0, "name"),
            RubricSection::list("items", 40.0, "items", ["label"]).with_bonus(10.0),
            RubricSection::field("note", 20.0, "note"),
        ]);
        ConsensusEngine::new(ConfidenceScorer::new(rubric))
    }

    fn result(id: &str, tree: Value) -> ExtractionResult {
        ExtractionResult::new(id, tree, Usage::new(10, 5).with_cost(0.5), Duration::from_millis(1))
    }

    #[test]
    fn test_no_candidates() {
        let err = engine().reconcile(vec![]).unwrap_err();
        assert_eq!(err, ConsensusError::NoExtractionAvailable);
    }

    #[test]
    fn test_sole_candidate_wins_with_score() {
        let outcome = engine()
            .reconcile(vec![result("primary", json!({"name": "Ada"}))])
            .unwrap();
        assert_eq!(outcome.source, "primary");
        assert_eq!(outcome.reason, SelectionReason::SoleCandidate);
        assert_eq!(outcome.confidence(), 40);
        assert!(outcome.conflicted_fields.is_empty());
    }

    #[test]
    fn test_higher_score_wins() {
        let outcome = engine()
            .reconcile(vec![
                result("primary", json!({"name": "Ada"})),
                result("secondary", json!({"name": "Ada", "note": "ok"})),
            ])
            .unwrap();
        assert_eq!(outcome.source, "secondary");
        assert_eq!(outcome.reason, SelectionReason::HighestConfidence);
        assert_eq!(outcome.candidates[0].confidence, 60);
        assert_eq!(outcome.candidates[1].confidence, 40);
        assert_eq!(outcome.conflicted_fields, vec!["note".to_string()]);
    }

    #[test]
    fn test_tie_breaks_on_priority() {
        let candidates = vec![
            result("alpha", json!({"name": "Ada"})),
            result("beta", json!({"name": "Grace"})),
        ];
        let outcome = engine()
            .with_priority(["beta", "alpha"])
            .reconcile(candidates.clone())
            .unwrap();
        assert_eq!(outcome.source, "beta");
        assert_eq!(outcome.reason, SelectionReason::PriorityTieBreak);
        assert_eq!(outcome.conflicted_fields, vec!["name".to_string()]);

        // Unlisted extractors fall back to id order.
        let outcome = engine().reconcile(candidates).unwrap();
        assert_eq!(outcome.source, "alpha");
    }

    #[test]
    fn test_listed_extractor_beats_unlisted_on_tie() {
        let outcome = engine()
            .with_priority(["zeta"])
            .reconcile(vec![
                result("alpha", json!({"name": "Ada"})),
                result("zeta", json!({"name": "Ada"})),
            ])
            .unwrap();
        assert_eq!(outcome.source, "zeta");
    }

    #[test]
    fn test_conflicts_include_missing_paths() {
        let outcome = engine()
            .reconcile(vec![
                result("a", json!({"name": "Ada", "items": [{"label": "x"}]})),
                result("b", json!({"name": "Ada", "items": []})),
            ])
            .unwrap();
        assert_eq!(
            outcome.conflicted_fields,
            vec!["items".to_string(), "items[0].label".to_string()]
        );
    }

    #[test]
    fn test_canonical_text_ignores_key_order() {
        let mut forward = serde_json::Map::new();
        forward.insert("a".into(), json!(1));
        forward.insert("b".into(), json!({"y": 2, "x": 1}));
        let mut backward = serde_json::Map::new();
        backward.insert("b".into(), json!({"x": 1, "y": 2}));
        backward.insert("a".into(), json!(1));
        assert_eq!(
            canonical_text(&Value::Object(forward)),
            canonical_text(&Value::Object(backward))
        );
    }

    fn candidate_strategy() -> impl Strategy<Value = ExtractionResult> {
        (
            prop::sample::select(vec!["alpha", "beta", "gamma"]),
            prop::option::of("[a-z]{1,6}"),
            prop::collection::vec(prop::option::of("[a-z]{0,4}"), 0..4),
            prop::option::of("[a-z ]{0,8}"),
        )
            .prop_map(|(id, name, labels, note)| {
                let items: Vec<Value> = labels
                    .into_iter()
                    .map(|label| match label {
                        Some(l) => json!({"label": l}),
                        None => json!({}),
                    })
                    .collect();
                result(id, json!({"name": name, "items": items, "note": note}))
            })
    }

    proptest! {
        #[test]
        fn prop_reconcile_is_order_independent(
            (original, shuffled) in prop::collection::vec(candidate_strategy(), 1..6)
                .prop_flat_map(|v| (Just(v.clone()), Just(v).prop_shuffle()))
        ) {
            let engine = engine().with_priority(["gamma"]);
            let a = engine.reconcile(original).unwrap();
            let b = engine.reconcile(shuffled).unwrap();

            prop_assert_eq!(&a.source, &b.source);
            prop_assert_eq!(a.reason, b.reason);
            prop_assert_eq!(&a.tree, &b.tree);
            prop_assert_eq!(&a.candidates, &b.candidates);
            prop_assert_eq!(&a.conflicted_fields, &b.conflicted_fields);
        }

        #[test]
        fn prop_winner_has_top_score(
            candidates in prop::collection::vec(candidate_strategy(), 1..6)
        ) {
            let outcome = engine().reconcile(candidates).unwrap();
            let best = outcome.candidates.iter().map(|c| c.confidence).max().unwrap();
            prop_assert_eq!(outcome.confidence(), best);
            prop_assert_eq!(outcome.candidates[0].extractor_id.as_str(), outcome.source.as_str());
        }
    }
}
