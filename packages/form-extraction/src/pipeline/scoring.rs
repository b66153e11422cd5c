//! Rubric-based confidence scoring for a single extraction result.
//!
//! Each rubric section contributes a fixed weight when present. List
//! sections hold back part of their weight as a completeness bonus earned
//! by items whose own required sub-fields are filled in. Suspicious shapes
//! (empty or short lists, truncated narrative) are penalized. The final
//! value is clamped to `[0, SCORE_CEILING]`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::schema::{FieldType, SchemaSpec};
use crate::tree::{is_populated, lookup};
use crate::types::result::ExtractionResult;

/// No automated rubric claims full certainty.
pub const SCORE_CEILING: f64 = 95.0;

/// Largest completeness bonus any list section may hold back.
pub const MAX_LIST_BONUS: f64 = 10.0;

const WEIGHT_TOLERANCE: f64 = 1e-6;

fn default_min_items() -> usize {
    1
}

fn default_min_length() -> usize {
    40
}

/// How a section earns its weight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SectionKind {
    /// A single value. When `fields` is set and the value is an object,
    /// the weight is earned in proportion to populated sub-fields.
    Field {
        path: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        fields: Vec<String>,
    },

    /// An array of items.
    List {
        path: String,
        #[serde(default)]
        item_fields: Vec<String>,
        #[serde(default = "default_min_items")]
        min_items: usize,
        /// Portion of the weight reserved for the completeness bonus.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        bonus: Option<f64>,
    },

    /// Free-text fields sharing the weight equally.
    Narrative {
        paths: Vec<String>,
        #[serde(default = "default_min_length")]
        min_length: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RubricSection {
    pub name: String,
    pub weight: f64,
    #[serde(flatten)]
    pub kind: SectionKind,
}

impl RubricSection {
    pub fn field(name: impl Into<String>, weight: f64, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            weight,
            kind: SectionKind::Field {
                path: path.into(),
                fields: Vec::new(),
            },
        }
    }

    pub fn list(
        name: impl Into<String>,
        weight: f64,
        path: impl Into<String>,
        item_fields: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            name: name.into(),
            weight,
            kind: SectionKind::List {
                path: path.into(),
                item_fields: item_fields.into_iter().map(Into::into).collect(),
                min_items: default_min_items(),
                bonus: None,
            },
        }
    }

    pub fn narrative(
        name: impl Into<String>,
        weight: f64,
        paths: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            name: name.into(),
            weight,
            kind: SectionKind::Narrative {
                paths: paths.into_iter().map(Into::into).collect(),
                min_length: default_min_length(),
            },
        }
    }

    /// Set the minimum item count of a list section.
    pub fn with_min_items(mut self, min: usize) -> Self {
        if let SectionKind::List { min_items, .. } = &mut self.kind {
            *min_items = min;
        }
        self
    }

    /// Set the completeness bonus of a list section.
    pub fn with_bonus(mut self, amount: f64) -> Self {
        if let SectionKind::List { bonus, .. } = &mut self.kind {
            *bonus = Some(amount);
        }
        self
    }

    /// Set the truncation threshold of a narrative section.
    pub fn with_min_length(mut self, min: usize) -> Self {
        if let SectionKind::Narrative { min_length, .. } = &mut self.kind {
            *min_length = min;
        }
        self
    }

    fn list_bonus(&self, declared: Option<f64>) -> f64 {
        declared.unwrap_or(self.weight * 0.4).min(MAX_LIST_BONUS).min(self.weight)
    }
}

/// Penalty amounts for suspicious shapes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Penalties {
    pub empty_list: f64,
    pub short_list: f64,
    pub truncated_narrative: f64,
}

impl Default for Penalties {
    fn default() -> Self {
        Self {
            empty_list: 5.0,
            short_list: 2.0,
            truncated_narrative: 3.0,
        }
    }
}

/// Weighted sections plus penalties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rubric {
    pub sections: Vec<RubricSection>,
    #[serde(default)]
    pub penalties: Penalties,
}

impl Rubric {
    pub fn new(sections: Vec<RubricSection>) -> Self {
        Self {
            sections,
            penalties: Penalties::default(),
        }
    }

    pub fn with_penalties(mut self, penalties: Penalties) -> Self {
        self.penalties = penalties;
        self
    }

    /// Equal-weight rubric over the schema's top-level fields.
    pub fn derive_from(schema: &SchemaSpec) -> Self {
        let count = schema.fields.len().max(1) as f64;
        let weight = 100.0 / count;

        let sections = schema
            .fields
            .iter()
            .map(|(name, spec)| match spec.field_type {
                FieldType::Array => {
                    let item_fields: Vec<String> = spec
                        .items
                        .as_ref()
                        .map(|items| {
                            items
                                .fields
                                .iter()
                                .filter(|(_, f)| f.required)
                                .map(|(n, _)| n.clone())
                                .collect()
                        })
                        .unwrap_or_default();
                    RubricSection::list(name.clone(), weight, name.clone(), item_fields)
                }
                FieldType::String if spec.min_length.is_some() => {
                    RubricSection::narrative(name.clone(), weight, [name.clone()])
                        .with_min_length(spec.min_length.unwrap_or_else(default_min_length))
                }
                _ => RubricSection::field(name.clone(), weight, name.clone()),
            })
            .collect();

        Self::new(sections)
    }

    /// Weights are positive and sum to 100; list bonuses stay within bounds.
    pub fn check(&self) -> Result<(), String> {
        if self.sections.is_empty() {
            return Err("scoring rubric has no sections".into());
        }

        let mut total = 0.0;
        for section in &self.sections {
            if section.weight <= 0.0 {
                return Err(format!("rubric section '{}' has non-positive weight", section.name));
            }
            total += section.weight;

            match &section.kind {
                SectionKind::List { bonus: Some(bonus), .. } => {
                    if *bonus < 0.0 || *bonus > MAX_LIST_BONUS.min(section.weight) {
                        return Err(format!(
                            "rubric section '{}' bonus {} exceeds min({}, weight)",
                            section.name, bonus, MAX_LIST_BONUS
                        ));
                    }
                }
                SectionKind::Narrative { paths, .. } if paths.is_empty() => {
                    return Err(format!("rubric section '{}' lists no narrative paths", section.name));
                }
                _ => {}
            }
        }

        if (total - 100.0).abs() > WEIGHT_TOLERANCE {
            return Err(format!("rubric weights sum to {}, expected 100", total));
        }
        Ok(())
    }
}

/// Contribution of one rubric section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionScore {
    pub name: String,
    pub weight: f64,
    pub earned: f64,
    pub bonus: f64,
    pub penalty: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
}

impl SectionScore {
    fn new(name: &str, weight: f64) -> Self {
        Self {
            name: name.to_string(),
            weight,
            earned: 0.0,
            bonus: 0.0,
            penalty: 0.0,
            notes: Vec::new(),
        }
    }

    pub fn net(&self) -> f64 {
        self.earned + self.bonus - self.penalty
    }
}

/// Rubric score for one result, with the breakdown that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceScore {
    /// Clamped and rounded to `[0, SCORE_CEILING]`.
    pub value: u8,
    /// Sum of section nets before clamping.
    pub raw: f64,
    pub sections: Vec<SectionScore>,
}

/// Deterministic scorer over a fixed rubric.
#[derive(Debug, Clone)]
pub struct ConfidenceScorer {
    rubric: Rubric,
}

impl ConfidenceScorer {
    pub fn new(rubric: Rubric) -> Self {
        Self { rubric }
    }

    /// Scorer using the schema's declared or derived rubric.
    pub fn for_schema(schema: &SchemaSpec) -> Self {
        Self::new(schema.rubric())
    }

    pub fn rubric(&self) -> &Rubric {
        &self.rubric
    }

    pub fn score(&self, result: &ExtractionResult) -> ConfidenceScore {
        self.score_tree(result.tree())
    }

    pub fn score_tree(&self, tree: &Value) -> ConfidenceScore {
        let sections: Vec<SectionScore> = self
            .rubric
            .sections
            .iter()
            .map(|section| self.score_section(section, tree))
            .collect();

        let raw: f64 = sections.iter().map(SectionScore::net).sum();
        let value = raw.clamp(0.0, SCORE_CEILING).round() as u8;

        ConfidenceScore { value, raw, sections }
    }

    fn score_section(&self, section: &RubricSection, tree: &Value) -> SectionScore {
        let mut score = SectionScore::new(&section.name, section.weight);
        let penalties = &self.rubric.penalties;

        match &section.kind {
            SectionKind::Field { path, fields } => match lookup(tree, path) {
                Some(value) if is_populated(value) => match value.as_object() {
                    Some(map) if !fields.is_empty() => {
                        let filled = fields
                            .iter()
                            .filter(|f| map.get(f.as_str()).map(is_populated).unwrap_or(false))
                            .count();
                        score.earned = section.weight * filled as f64 / fields.len() as f64;
                        if filled < fields.len() {
                            score.notes.push(format!("{}/{} sub-fields populated", filled, fields.len()));
                        }
                    }
                    _ => score.earned = section.weight,
                },
                _ => score.notes.push(format!("{} missing", path)),
            },

            SectionKind::List {
                path,
                item_fields,
                min_items,
                bonus,
            } => match lookup(tree, path) {
                Some(Value::Array(items)) if items.is_empty() => {
                    score.penalty = penalties.empty_list;
                    score.notes.push(format!("{} is empty", path));
                }
                Some(Value::Array(items)) => {
                    let bonus_cap = section.list_bonus(*bonus);
                    score.earned = section.weight - bonus_cap;

                    let complete = items
                        .iter()
                        .filter(|item| item_is_complete(item, item_fields))
                        .count();
                    score.bonus = bonus_cap * complete as f64 / items.len() as f64;
                    if complete < items.len() {
                        score
                            .notes
                            .push(format!("{}/{} items complete", complete, items.len()));
                    }

                    if items.len() < *min_items {
                        score.penalty = penalties.short_list;
                        score
                            .notes
                            .push(format!("{} has {} of {} expected items", path, items.len(), min_items));
                    }
                }
                Some(other) if !other.is_null() => {
                    score.notes.push(format!("{} is not a list", path));
                }
                _ => score.notes.push(format!("{} missing", path)),
            },

            SectionKind::Narrative { paths, min_length } => {
                let share = section.weight / paths.len().max(1) as f64;
                for path in paths {
                    match lookup(tree, path) {
                        Some(value) if is_populated(value) => {
                            score.earned += share;
                            if let Some(text) = value.as_str() {
                                let length = text.trim().chars().count();
                                if length < *min_length {
                                    score.penalty += penalties.truncated_narrative;
                                    score
                                        .notes
                                        .push(format!("{} looks truncated ({} chars)", path, length));
                                }
                            }
                        }
                        _ => score.notes.push(format!("{} missing", path)),
                    }
                }
            }
        }

        score
    }
}

fn item_is_complete(item: &Value, item_fields: &[String]) -> bool {
    if item_fields.is_empty() {
        return is_populated(item);
    }
    match item.as_object() {
        Some(map) => item_fields
            .iter()
            .all(|f| map.get(f.as_str()).map(is_populated).unwrap_or(false)),
        None => false,
    }
}
