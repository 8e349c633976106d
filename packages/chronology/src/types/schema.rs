//! Per-visit-type field schemas.
//!
//! One registry feeds both prompt construction (which fields to ask the model
//! for) and sparse detection (which fields must carry content). Keeping both
//! in one place means a data-driven visit type can't leave the sparse check
//! behind.

use std::collections::HashSet;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ChronologyError, Result};
use crate::types::entry::{Entry, VisitType};

/// Strings at or below this length never count as content.
const MIN_MEANINGFUL_CHARS: usize = 10;

const PLACEHOLDERS: &[&str] = &[
    "not specified",
    "not documented",
    "not available",
    "not recorded",
    "unknown",
    "none",
    "n/a",
    "na",
    "null",
    "-",
];

/// One field the model is asked to fill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub description: String,
    /// Whether the field carries clinical content (used for sparse detection)
    #[serde(default = "default_true")]
    pub content: bool,
}

fn default_true() -> bool {
    true
}

impl FieldSpec {
    pub fn content(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            content: true,
        }
    }

    pub fn metadata(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            content: false,
        }
    }
}

/// Schema for a single visit type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisitSchema {
    pub visit_type: VisitType,
    #[serde(default)]
    pub description: String,
    pub fields: Vec<FieldSpec>,
    /// Lowercase keywords suggesting the text contains this visit type
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl VisitSchema {
    pub fn new(visit_type: VisitType, description: impl Into<String>) -> Self {
        Self {
            visit_type,
            description: description.into(),
            fields: Vec::new(),
            keywords: Vec::new(),
        }
    }

    pub fn with_field(mut self, field: FieldSpec) -> Self {
        self.fields.push(field);
        self
    }

    pub fn with_keywords(mut self, keywords: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.keywords = keywords
            .into_iter()
            .map(|k| k.into().to_lowercase())
            .collect();
        self
    }

    /// Names of the content-bearing fields.
    pub fn content_fields(&self) -> impl Iterator<Item = &str> {
        self.fields
            .iter()
            .filter(|f| f.content)
            .map(|f| f.name.as_str())
    }
}

/// Registry of visit-type schemas.
///
/// Shared by `Arc` between extractors and recovery handlers; there is no
/// global instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaRegistry {
    schemas: IndexMap<VisitType, VisitSchema>,
    /// Content fields checked when a visit type has no schema
    generic_content_fields: Vec<String>,
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl SchemaRegistry {
    /// Empty registry with the given generic content fields.
    pub fn empty(generic_content_fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            schemas: IndexMap::new(),
            generic_content_fields: generic_content_fields.into_iter().map(Into::into).collect(),
        }
    }

    /// Add or replace the schema for a visit type.
    pub fn with_schema(mut self, schema: VisitSchema) -> Self {
        self.schemas.insert(schema.visit_type, schema);
        self
    }

    /// Load a registry from JSON.
    ///
    /// ```json
    /// {"schemas": {"emergency": {"visit_type": "emergency", "fields": [...]}},
    ///  "generic_content_fields": ["summary"]}
    /// ```
    pub fn from_json(json: &str) -> Result<Self> {
        let registry: Self = serde_json::from_str(json)?;
        registry.validate()?;
        Ok(registry)
    }

    fn validate(&self) -> Result<()> {
        if self.generic_content_fields.is_empty() {
            return Err(ChronologyError::Schema(
                "generic_content_fields must not be empty".into(),
            ));
        }
        for (visit_type, schema) in &self.schemas {
            if *visit_type != schema.visit_type {
                return Err(ChronologyError::Schema(format!(
                    "schema keyed as {} declares visit_type {}",
                    visit_type, schema.visit_type
                )));
            }
            if schema.content_fields().next().is_none() {
                return Err(ChronologyError::Schema(format!(
                    "schema for {} has no content fields",
                    visit_type
                )));
            }
        }
        Ok(())
    }

    pub fn get(&self, visit_type: VisitType) -> Option<&VisitSchema> {
        self.schemas.get(&visit_type)
    }

    pub fn schemas(&self) -> impl Iterator<Item = &VisitSchema> {
        self.schemas.values()
    }

    /// Content fields for a visit type, falling back to the generic list.
    pub fn content_fields(&self, visit_type: VisitType) -> Vec<&str> {
        match self.schemas.get(&visit_type) {
            Some(schema) => schema.content_fields().collect(),
            None => self.generic_content_fields.iter().map(String::as_str).collect(),
        }
    }

    /// Pick the schemas relevant to a piece of text by keyword hits.
    ///
    /// Office visits are always included so the model has a default shape.
    /// When nothing matches, every schema is returned.
    pub fn select_for_text(&self, text: &str) -> Vec<&VisitSchema> {
        let lower = text.to_lowercase();
        let selected: Vec<&VisitSchema> = self
            .schemas
            .values()
            .filter(|s| {
                s.visit_type == VisitType::OfficeVisit
                    || s.keywords.iter().any(|k| lower.contains(k.as_str()))
            })
            .collect();

        let specific = selected
            .iter()
            .any(|s| s.visit_type != VisitType::OfficeVisit);
        if specific {
            selected
        } else {
            self.schemas.values().collect()
        }
    }

    /// True when none of the entry's content fields holds meaningful content.
    pub fn is_sparse(&self, entry: &Entry) -> bool {
        let fields = self.content_fields(entry.visit_type);
        !fields.iter().any(|field| {
            entry
                .occurrence_treatment
                .get(*field)
                .is_some_and(is_meaningful)
        })
    }

    /// Built-in visit-type schemas.
    pub fn builtin() -> Self {
        let generic = [
            "chief_complaint",
            "history",
            "findings",
            "assessment",
            "diagnoses",
            "treatment",
            "plan",
            "notes",
        ];

        Self::empty(generic)
            .with_schema(
                VisitSchema::new(VisitType::OfficeVisit, "Routine outpatient visit")
                    .with_field(FieldSpec::content("chief_complaint", "Reason for the visit"))
                    .with_field(FieldSpec::content("history", "Subjective history and symptoms"))
                    .with_field(FieldSpec::content("exam_findings", "Objective exam findings"))
                    .with_field(FieldSpec::content("diagnoses", "Diagnoses or impressions"))
                    .with_field(FieldSpec::content("plan", "Treatment plan and follow-up"))
                    .with_field(FieldSpec::metadata("medications", "Medications listed")),
            )
            .with_schema(
                VisitSchema::new(VisitType::Emergency, "Emergency department encounter")
                    .with_field(FieldSpec::content("chief_complaint", "Presenting complaint"))
                    .with_field(FieldSpec::content("exam_findings", "Triage and exam findings"))
                    .with_field(FieldSpec::content("diagnoses", "ED diagnoses"))
                    .with_field(FieldSpec::content("treatment", "Treatment given in the ED"))
                    .with_field(FieldSpec::metadata("disposition", "Discharge or admission"))
                    .with_keywords(["emergency", "triage", " ed ", "er visit", "ambulance"]),
            )
            .with_schema(
                VisitSchema::new(VisitType::HospitalAdmission, "Inpatient stay")
                    .with_field(FieldSpec::content("admission_reason", "Reason for admission"))
                    .with_field(FieldSpec::content("hospital_course", "Course during the stay"))
                    .with_field(FieldSpec::content("diagnoses", "Admission and discharge diagnoses"))
                    .with_field(FieldSpec::content("procedures", "Procedures performed"))
                    .with_field(FieldSpec::metadata("discharge_date", "Date of discharge"))
                    .with_keywords(["admitted", "admission", "discharge summary", "inpatient"]),
            )
            .with_schema(
                VisitSchema::new(VisitType::Surgery, "Operative procedure")
                    .with_field(FieldSpec::content("procedures", "Operation(s) performed"))
                    .with_field(FieldSpec::content("preoperative_diagnosis", "Pre-op diagnosis"))
                    .with_field(FieldSpec::content("postoperative_diagnosis", "Post-op diagnosis"))
                    .with_field(FieldSpec::content("findings", "Operative findings"))
                    .with_field(FieldSpec::metadata("anesthesia", "Anesthesia type"))
                    .with_keywords(["operative", "surgery", "surgeon", "anesthesia", "incision"]),
            )
            .with_schema(
                VisitSchema::new(VisitType::Imaging, "Radiology study")
                    .with_field(FieldSpec::content("study", "Imaging study performed"))
                    .with_field(FieldSpec::content("findings", "Radiologist findings"))
                    .with_field(FieldSpec::content("impression", "Radiologist impression"))
                    .with_keywords(["mri", "x-ray", "xray", "ct scan", "radiology", "impression:"]),
            )
            .with_schema(
                VisitSchema::new(VisitType::LabResult, "Laboratory results")
                    .with_field(FieldSpec::content("tests", "Tests ordered"))
                    .with_field(FieldSpec::content("results", "Results with abnormal flags"))
                    .with_field(FieldSpec::metadata("reference_ranges", "Reference ranges"))
                    .with_keywords(["lab result", "laboratory", "specimen", "reference range"]),
            )
            .with_schema(
                VisitSchema::new(VisitType::Therapy, "Physical/occupational therapy session")
                    .with_field(FieldSpec::content("treatment", "Therapy performed"))
                    .with_field(FieldSpec::content("progress", "Progress toward goals"))
                    .with_field(FieldSpec::content("functional_status", "Functional limitations"))
                    .with_keywords(["physical therapy", "occupational therapy", "range of motion"]),
            )
            .with_schema(
                VisitSchema::new(VisitType::MentalHealth, "Psychiatric or counseling visit")
                    .with_field(FieldSpec::content("presenting_problem", "Presenting problem"))
                    .with_field(FieldSpec::content("mental_status", "Mental status exam"))
                    .with_field(FieldSpec::content("diagnoses", "Psychiatric diagnoses"))
                    .with_field(FieldSpec::content("plan", "Therapy and medication plan"))
                    .with_keywords(["psychiatr", "mental status", "counsel", "depression", "anxiety"]),
            )
            .with_schema(
                VisitSchema::new(VisitType::ConsultativeExam, "Consultative examination")
                    .with_field(FieldSpec::content("history", "History given at the exam"))
                    .with_field(FieldSpec::content("exam_findings", "Examination findings"))
                    .with_field(FieldSpec::content("diagnoses", "Examiner diagnoses"))
                    .with_field(FieldSpec::content("functional_assessment", "Functional opinion"))
                    .with_keywords(["consultative", "disability determination", "examiner"]),
            )
            .with_schema(
                VisitSchema::new(VisitType::Procedure, "Outpatient procedure")
                    .with_field(FieldSpec::content("procedures", "Procedure performed"))
                    .with_field(FieldSpec::content("indication", "Indication"))
                    .with_field(FieldSpec::content("findings", "Findings"))
                    .with_keywords(["injection", "procedure note", "biopsy", "endoscopy"]),
            )
            .with_schema(
                VisitSchema::new(VisitType::Telehealth, "Remote visit")
                    .with_field(FieldSpec::content("chief_complaint", "Reason for the visit"))
                    .with_field(FieldSpec::content("assessment", "Assessment"))
                    .with_field(FieldSpec::content("plan", "Plan"))
                    .with_keywords(["telehealth", "telemedicine", "video visit", "telephone visit"]),
            )
    }
}

/// Whether a content value carries real information.
///
/// Strings must exceed ten characters and not be a placeholder. Arrays and
/// objects need at least one meaningful element. Numbers and booleans count.
pub fn is_meaningful(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(_) | Value::Number(_) => true,
        Value::String(s) => {
            let trimmed = s.trim();
            trimmed.chars().count() > MIN_MEANINGFUL_CHARS
                && !PLACEHOLDERS.contains(&trimmed.to_lowercase().as_str())
        }
        Value::Array(items) => items.iter().any(is_meaningful),
        Value::Object(map) => map.values().any(is_meaningful),
    }
}

/// Visit types present in a registry, for prompt enumeration.
pub fn visit_type_names(registry: &SchemaRegistry) -> Vec<&'static str> {
    let present: HashSet<VisitType> = registry.schemas().map(|s| s.visit_type).collect();
    VisitType::ALL
        .iter()
        .filter(|v| present.contains(v))
        .map(|v| v.as_str())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_field_is_sparse() {
        let registry = SchemaRegistry::builtin();
        let entry = Entry::new("2024-01-15", "1F")
            .with_visit_type(VisitType::Emergency)
            .with_field("chief_complaint", "");
        assert!(registry.is_sparse(&entry));
    }

    #[test]
    fn test_long_value_not_sparse() {
        let registry = SchemaRegistry::builtin();
        let entry = Entry::new("2024-01-15", "1F")
            .with_visit_type(VisitType::Emergency)
            .with_field("chief_complaint", "Severe chest pain radiating to left arm");
        assert!(!registry.is_sparse(&entry));
    }

    #[test]
    fn test_placeholders_and_short_values_are_sparse() {
        let registry = SchemaRegistry::builtin();
        let entry = Entry::new("2024-01-15", "1F")
            .with_field("chief_complaint", "Not specified")
            .with_field("plan", "f/u 2 wks")
            .with_field("diagnoses", json!([]));
        assert!(registry.is_sparse(&entry));
    }

    #[test]
    fn test_metadata_fields_do_not_count() {
        let registry = SchemaRegistry::builtin();
        let entry = Entry::new("2024-01-15", "1F")
            .with_field("medications", "Lisinopril 10mg daily, metformin 500mg");
        assert!(registry.is_sparse(&entry));
    }

    #[test]
    fn test_unknown_visit_type_uses_generic_fields() {
        let registry = SchemaRegistry::empty(["summary"]);
        let entry = Entry::new("2024-01-15", "1F")
            .with_visit_type(VisitType::Therapy)
            .with_field("summary", "Patient reports improved mobility after sessions");
        assert!(!registry.is_sparse(&entry));
        assert_eq!(registry.content_fields(VisitType::Therapy), vec!["summary"]);
    }

    #[test]
    fn test_select_for_text_uses_keywords() {
        let registry = SchemaRegistry::builtin();
        let selected: Vec<_> = registry
            .select_for_text("MRI of the lumbar spine. IMPRESSION: disc bulge")
            .iter()
            .map(|s| s.visit_type)
            .collect();
        assert!(selected.contains(&VisitType::Imaging));
        assert!(selected.contains(&VisitType::OfficeVisit));
        assert!(!selected.contains(&VisitType::Surgery));

        let all = registry.select_for_text("nothing relevant here");
        assert_eq!(all.len(), VisitType::ALL.len());
    }

    #[test]
    fn test_from_json_roundtrip_and_validation() {
        let json = serde_json::to_string(&SchemaRegistry::builtin()).unwrap();
        let loaded = SchemaRegistry::from_json(&json).unwrap();
        assert_eq!(loaded, SchemaRegistry::builtin());

        let bad = r#"{"schemas": {}, "generic_content_fields": []}"#;
        assert!(matches!(
            SchemaRegistry::from_json(bad),
            Err(ChronologyError::Schema(_))
        ));
    }

    #[test]
    fn test_visit_type_names_follow_canonical_order() {
        let names = visit_type_names(&SchemaRegistry::builtin());
        assert_eq!(names.first(), Some(&"office_visit"));
        assert_eq!(names.len(), VisitType::ALL.len());
    }
}
