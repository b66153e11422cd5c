//! Schema-driven validation of extracted trees.
//!
//! Checks required fields, types, enums, undeclared fields and
//! cross-references between collections, and computes a completeness
//! score over every declared field path it inspects. Pure and idempotent.

use std::collections::{BTreeMap, BTreeSet};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{value_type_name, CrossReference, FieldSpec, SchemaSpec};
use crate::tree::{is_populated, join_index, join_key, lookup, reference_key};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    MissingRequired,
    TypeMismatch,
    UnexpectedField,
    EnumViolation,
    CrossReference,
    Structural,
}

/// One finding against one field path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub path: String,
    pub message: String,
    pub severity: Severity,
    pub kind: IssueKind,
}

/// Outcome of validating one tree against one schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub schema_id: String,
    pub valid: bool,
    /// round(100 × completed / tracked)
    pub completeness: u8,
    pub tracked_fields: usize,
    pub completed_fields: usize,
    pub issues: Vec<ValidationIssue>,
    /// Every tracked path and whether it was completed.
    pub field_completeness: BTreeMap<String, bool>,
    pub missing_critical: Vec<String>,
    pub missing_optional: Vec<String>,
}

impl ValidationReport {
    pub fn errors(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(|i| i.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(|i| i.severity == Severity::Warning)
    }

    pub fn issues_of(&self, kind: IssueKind) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(move |i| i.kind == kind)
    }
}

/// Validate `tree` against `schema`.
pub fn validate(tree: &Value, schema: &SchemaSpec) -> ValidationReport {
    let mut walk = Walk::default();

    match tree.as_object() {
        Some(root) => {
            walk.check_object("", root, &schema.fields, schema.additional_properties, schema);
            for rule in &schema.cross_references {
                walk.check_cross_reference(tree, rule);
            }
        }
        None => walk.issue(
            "",
            format!("document root must be an object, found {}", value_type_name(tree)),
            Severity::Error,
            IssueKind::Structural,
        ),
    }

    walk.into_report(&schema.id)
}

#[derive(Default)]
struct Walk {
    issues: Vec<ValidationIssue>,
    tracked: BTreeMap<String, bool>,
    missing_critical: Vec<String>,
    missing_optional: Vec<String>,
}

impl Walk {
    fn issue(&mut self, path: &str, message: String, severity: Severity, kind: IssueKind) {
        self.issues.push(ValidationIssue {
            path: path.to_string(),
            message,
            severity,
            kind,
        });
    }

    fn check_object(
        &mut self,
        path: &str,
        map: &Map<String, Value>,
        fields: &IndexMap<String, FieldSpec>,
        additional_allowed: bool,
        schema: &SchemaSpec,
    ) {
        for (name, spec) in fields {
            let child = join_key(path, name);
            self.check_field(&child, map.get(name), spec, schema);
        }

        if !additional_allowed {
            for key in map.keys().filter(|k| !fields.contains_key(k.as_str())) {
                self.issue(
                    &join_key(path, key),
                    format!("field '{}' is not declared by the schema", key),
                    Severity::Error,
                    IssueKind::UnexpectedField,
                );
            }
        }
    }

    fn check_field(&mut self, path: &str, value: Option<&Value>, spec: &FieldSpec, schema: &SchemaSpec) {
        let value = match value {
            Some(v) if !v.is_null() => v,
            _ => {
                self.tracked.insert(path.to_string(), false);
                if spec.critical {
                    self.missing_critical.push(path.to_string());
                } else {
                    self.missing_optional.push(path.to_string());
                }
                if spec.required {
                    let severity = if spec.critical {
                        Severity::Error
                    } else {
                        Severity::Warning
                    };
                    self.issue(
                        path,
                        format!("required field '{}' is missing", path),
                        severity,
                        IssueKind::MissingRequired,
                    );
                }
                return;
            }
        };

        let populated = is_populated(value);
        self.tracked.insert(path.to_string(), populated);

        if !spec.field_type.matches(value) {
            self.issue(
                path,
                format!("expected {}, found {}", spec.field_type, value_type_name(value)),
                Severity::Error,
                IssueKind::TypeMismatch,
            );
            return;
        }

        if spec.required && !populated {
            self.issue(
                path,
                format!("required field '{}' is present but empty", path),
                Severity::Info,
                IssueKind::Structural,
            );
        }

        self.check_scalar_constraints(path, value, spec);

        match value {
            Value::Object(map) => {
                let additional = spec.additional_properties.unwrap_or(schema.additional_properties);
                self.check_object(path, map, &spec.fields, additional, schema);
            }
            Value::Array(items) => {
                if let Some(item_spec) = spec.items.as_deref() {
                    for (i, item) in items.iter().enumerate() {
                        self.check_item(&join_index(path, i), item, item_spec, schema);
                    }
                }
            }
            _ => {}
        }
    }

    /// Array items are not tracked themselves; declared fields of object items are.
    fn check_item(&mut self, path: &str, item: &Value, spec: &FieldSpec, schema: &SchemaSpec) {
        if item.is_null() {
            self.issue(path, "array item is null".into(), Severity::Warning, IssueKind::Structural);
            return;
        }
        if !spec.field_type.matches(item) {
            self.issue(
                path,
                format!("expected {}, found {}", spec.field_type, value_type_name(item)),
                Severity::Error,
                IssueKind::TypeMismatch,
            );
            return;
        }

        self.check_scalar_constraints(path, item, spec);

        match item {
            Value::Object(map) => {
                let additional = spec.additional_properties.unwrap_or(schema.additional_properties);
                self.check_object(path, map, &spec.fields, additional, schema);
            }
            Value::Array(nested) => {
                if let Some(nested_spec) = spec.items.as_deref() {
                    for (i, value) in nested.iter().enumerate() {
                        self.check_item(&join_index(path, i), value, nested_spec, schema);
                    }
                }
            }
            _ => {}
        }
    }

    fn check_scalar_constraints(&mut self, path: &str, value: &Value, spec: &FieldSpec) {
        if let Some(allowed) = &spec.allowed {
            if !allowed.contains(value) {
                let options: Vec<String> = allowed.iter().map(|v| v.to_string()).collect();
                self.issue(
                    path,
                    format!("value {} is not one of [{}]", value, options.join(", ")),
                    Severity::Error,
                    IssueKind::EnumViolation,
                );
            }
        }

        if let (Some(min), Value::String(text)) = (spec.min_length, value) {
            let length = text.trim().chars().count();
            if length > 0 && length < min {
                self.issue(
                    path,
                    format!(
                        "text is {} characters, shorter than the expected minimum of {}; likely truncated",
                        length, min
                    ),
                    Severity::Warning,
                    IssueKind::Structural,
                );
            }
        }
    }

    fn check_cross_reference(&mut self, tree: &Value, rule: &CrossReference) {
        let Some(sources) = lookup(tree, &rule.source).and_then(Value::as_array) else {
            return;
        };

        // (path, key) for every non-null reference
        let mut references: Vec<(String, String)> = Vec::new();
        for (i, item) in sources.iter().enumerate() {
            let item_path = join_index(&rule.source, i);
            let field_path = join_key(&item_path, &rule.field);
            match item.get(&rule.field) {
                Some(Value::Array(values)) => {
                    for (j, value) in values.iter().enumerate() {
                        if let Some(key) = reference_key(value) {
                            references.push((join_index(&field_path, j), key));
                        }
                    }
                }
                Some(value) => {
                    if let Some(key) = reference_key(value) {
                        references.push((field_path, key));
                    }
                }
                None => {}
            }
        }

        if references.is_empty() {
            return;
        }

        let targets: BTreeSet<String> = lookup(tree, &rule.target)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| item.get(&rule.key))
                    .filter_map(reference_key)
                    .collect()
            })
            .unwrap_or_default();

        let target_is_empty = lookup(tree, &rule.target)
            .and_then(Value::as_array)
            .map(|items| items.is_empty())
            .unwrap_or(true);

        if target_is_empty {
            let keys: Vec<&str> = references.iter().map(|(_, key)| key.as_str()).collect();
            self.issue(
                &rule.target,
                format!(
                    "{}[*].{} references {} ({}) but {} is empty",
                    rule.source,
                    rule.field,
                    rule.key,
                    keys.join(", "),
                    rule.target
                ),
                Severity::Error,
                IssueKind::CrossReference,
            );
            return;
        }

        for (path, key) in references {
            if !targets.contains(&key) {
                self.issue(
                    &path,
                    format!(
                        "{} {} does not match any {}[*].{}",
                        rule.field, key, rule.target, rule.key
                    ),
                    Severity::Error,
                    IssueKind::CrossReference,
                );
            }
        }
    }

    fn into_report(self, schema_id: &str) -> ValidationReport {
        let tracked_fields = self.tracked.len();
        let completed_fields = self.tracked.values().filter(|done| **done).count();
        let completeness = if tracked_fields == 0 {
            0
        } else {
            ((completed_fields as f64 * 100.0) / tracked_fields as f64).round() as u8
        };
        let valid = self.missing_critical.is_empty()
            && !self.issues.iter().any(|i| i.severity == Severity::Error);

        ValidationReport {
            schema_id: schema_id.to_string(),
            valid,
            completeness,
            tracked_fields,
            completed_fields,
            issues: self.issues,
            field_completeness: self.tracked,
            missing_critical: self.missing_critical,
            missing_optional: self.missing_optional,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldType;
    use serde_json::json;

    fn iep_schema() -> SchemaSpec {
        SchemaSpec::new("iep")
            .forbid_additional()
            .with_field(
                "student",
                FieldSpec::new(FieldType::Object)
                    .critical()
                    .with_field("name", FieldSpec::new(FieldType::String).critical())
                    .with_field("grade", FieldSpec::new(FieldType::String)),
            )
            .with_field(
                "status",
                FieldSpec::new(FieldType::String).with_enum([json!("draft"), json!("final")]),
            )
            .with_field(
                "goals",
                FieldSpec::new(FieldType::Array).critical().with_items(
                    FieldSpec::new(FieldType::Object)
                        .with_field("goal_number", FieldSpec::new(FieldType::Integer).required())
                        .with_field("description", FieldSpec::new(FieldType::String).required()),
                ),
            )
            .with_field(
                "services",
                FieldSpec::new(FieldType::Array).with_items(
                    FieldSpec::new(FieldType::Object)
                        .with_field("service", FieldSpec::new(FieldType::String).required())
                        .with_field("goal_number", FieldSpec::new(FieldType::Integer)),
                ),
            )
            .with_cross_reference(CrossReference::new(
                "services",
                "goal_number",
                "goals",
                "goal_number",
            ))
    }

    fn complete_tree() -> Value {
        json!({
            "student": {"name": "Ada Lovelace", "grade": "5"},
            "status": "final",
            "goals": [
                {"goal_number": 1, "description": "Reading fluency"},
                {"goal_number": 2, "description": "Math facts"}
            ],
            "services": [
                {"service": "Speech therapy", "goal_number": 1}
            ]
        })
    }

    #[test]
    fn test_complete_tree_is_valid() {
        let report = validate(&complete_tree(), &iep_schema());
        assert!(report.valid, "unexpected issues: {:?}", report.issues);
        assert!(report.issues.is_empty());
        assert_eq!(report.completeness, 100);
        assert!(report.missing_critical.is_empty());
    }

    #[test]
    fn test_missing_critical_field_invalidates() {
        let mut tree = complete_tree();
        tree["student"].as_object_mut().unwrap().remove("name");

        let report = validate(&tree, &iep_schema());
        assert!(!report.valid);
        assert_eq!(report.missing_critical, vec!["student.name".to_string()]);
        let issue = report.issues_of(IssueKind::MissingRequired).next().unwrap();
        assert_eq!(issue.path, "student.name");
        assert_eq!(issue.severity, Severity::Error);
    }

    #[test]
    fn test_missing_required_non_critical_is_warning() {
        let mut tree = complete_tree();
        tree["services"][0].as_object_mut().unwrap().remove("service");

        let report = validate(&tree, &iep_schema());
        assert!(report.valid);
        let issue = report.issues_of(IssueKind::MissingRequired).next().unwrap();
        assert_eq!(issue.path, "services[0].service");
        assert_eq!(issue.severity, Severity::Warning);
        assert!(report.missing_optional.contains(&"services[0].service".to_string()));
    }

    #[test]
    fn test_type_mismatch_and_enum_violation() {
        let mut tree = complete_tree();
        tree["goals"][1]["goal_number"] = json!("two");
        tree["status"] = json!("archived");

        let report = validate(&tree, &iep_schema());
        assert!(!report.valid);
        let mismatch = report.issues_of(IssueKind::TypeMismatch).next().unwrap();
        assert_eq!(mismatch.path, "goals[1].goal_number");
        let violation = report.issues_of(IssueKind::EnumViolation).next().unwrap();
        assert_eq!(violation.path, "status");
    }

    #[test]
    fn test_unexpected_field_when_forbidden() {
        let mut tree = complete_tree();
        tree["signature"] = json!("J. Doe");
        tree["student"]["nickname"] = json!("Addie");

        let report = validate(&tree, &iep_schema());
        let paths: Vec<&str> = report
            .issues_of(IssueKind::UnexpectedField)
            .map(|i| i.path.as_str())
            .collect();
        assert_eq!(paths, vec!["student.nickname", "signature"]);
    }

    #[test]
    fn test_unresolved_cross_reference_names_goal() {
        let mut tree = complete_tree();
        tree["services"] = json!([{"service": "OT", "goal_number": 3}]);

        let report = validate(&tree, &iep_schema());
        let refs: Vec<&ValidationIssue> = report.issues_of(IssueKind::CrossReference).collect();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].path, "services[0].goal_number");
        assert!(refs[0].message.contains("goal_number 3"));
        assert_eq!(refs[0].severity, Severity::Error);
        assert!(!report.valid);
    }

    #[test]
    fn test_empty_target_collection_is_distinct_issue() {
        let mut tree = complete_tree();
        tree["goals"] = json!([]);

        let report = validate(&tree, &iep_schema());
        let refs: Vec<&ValidationIssue> = report.issues_of(IssueKind::CrossReference).collect();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].path, "goals");
        assert!(refs[0].message.contains("goals is empty"));
        assert_eq!(refs[0].severity, Severity::Error);
    }

    #[test]
    fn test_array_valued_references() {
        let mut tree = complete_tree();
        tree["services"] = json!([{"service": "OT", "goal_number": null}]);
        let report = validate(&tree, &iep_schema());
        assert_eq!(report.issues_of(IssueKind::CrossReference).count(), 0);

        let schema = SchemaSpec::new("plan")
            .with_field(
                "goals",
                FieldSpec::new(FieldType::Array).with_items(
                    FieldSpec::new(FieldType::Object).with_field("id", FieldSpec::new(FieldType::String)),
                ),
            )
            .with_field(
                "services",
                FieldSpec::new(FieldType::Array).with_items(
                    FieldSpec::new(FieldType::Object).with_field(
                        "goal_ids",
                        FieldSpec::new(FieldType::Array).with_items(FieldSpec::new(FieldType::String)),
                    ),
                ),
            )
            .with_cross_reference(CrossReference::new("services", "goal_ids", "goals", "id"));
        let tree = json!({
            "goals": [{"id": "G1"}],
            "services": [{"goal_ids": ["G1", "G9"]}]
        });
        let report = validate(&tree, &schema);
        let refs: Vec<&ValidationIssue> = report.issues_of(IssueKind::CrossReference).collect();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].path, "services[0].goal_ids[1]");
    }

    #[test]
    fn test_short_text_is_truncation_warning() {
        let schema = SchemaSpec::new("note").with_field(
            "summary",
            FieldSpec::new(FieldType::String).with_min_length(40),
        );
        let report = validate(&json!({"summary": "See attached."}), &schema);
        assert!(report.valid);
        let warnings: Vec<&ValidationIssue> = report.warnings().collect();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].kind, IssueKind::Structural);
        assert_eq!(report.completeness, 100);
    }

    #[test]
    fn test_completeness_counts_tracked_paths() {
        let tree = json!({
            "student": {"name": "Ada"},
            "goals": [{"goal_number": 1, "description": ""}]
        });
        let report = validate(&tree, &iep_schema());
        // student, student.name, student.grade, status, goals,
        // goals[0].goal_number, goals[0].description, services
        assert_eq!(report.tracked_fields, 8);
        // student, student.name, goals, goals[0].goal_number
        assert_eq!(report.completed_fields, 4);
        assert_eq!(report.completeness, 50);
        assert_eq!(report.field_completeness.get("student.grade"), Some(&false));
    }

    #[test]
    fn test_non_object_root() {
        let report = validate(&json!(["not", "a", "record"]), &iep_schema());
        assert!(!report.valid);
        assert_eq!(report.completeness, 0);
        assert_eq!(report.issues[0].kind, IssueKind::Structural);
    }

    #[test]
    fn test_validate_is_idempotent() {
        let mut tree = complete_tree();
        tree["services"] = json!([{"service": "OT", "goal_number": 7}]);
        tree["extra"] = json!(true);

        let first = validate(&tree, &iep_schema());
        let second = validate(&tree, &iep_schema());
        assert_eq!(
            serde_json::to_vec(&first).unwrap(),
            serde_json::to_vec(&second).unwrap()
        );
    }
}
