//! Chronology entries and visit types.

use chrono::NaiveDate;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::types::citation::Citation;

/// Placeholder used when the record names no provider or facility.
pub const NOT_SPECIFIED: &str = "Not Specified";

/// Date layouts accepted from the model, most common first.
pub const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%m-%d-%Y", "%B %d, %Y", "%b %d, %Y"];

/// Parse a chronology date in any of [`DATE_FORMATS`].
pub fn parse_date(date: &str) -> Option<NaiveDate> {
    let date = date.trim();
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(date, fmt).ok())
}

/// Closed set of visit types.
///
/// Anything the LLM returns outside this set becomes [`VisitType::OfficeVisit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisitType {
    #[default]
    OfficeVisit,
    Emergency,
    HospitalAdmission,
    Surgery,
    Imaging,
    LabResult,
    Therapy,
    MentalHealth,
    ConsultativeExam,
    Procedure,
    Telehealth,
}

impl VisitType {
    pub const ALL: [VisitType; 11] = [
        VisitType::OfficeVisit,
        VisitType::Emergency,
        VisitType::HospitalAdmission,
        VisitType::Surgery,
        VisitType::Imaging,
        VisitType::LabResult,
        VisitType::Therapy,
        VisitType::MentalHealth,
        VisitType::ConsultativeExam,
        VisitType::Procedure,
        VisitType::Telehealth,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OfficeVisit => "office_visit",
            Self::Emergency => "emergency",
            Self::HospitalAdmission => "hospital_admission",
            Self::Surgery => "surgery",
            Self::Imaging => "imaging",
            Self::LabResult => "lab_result",
            Self::Therapy => "therapy",
            Self::MentalHealth => "mental_health",
            Self::ConsultativeExam => "consultative_exam",
            Self::Procedure => "procedure",
            Self::Telehealth => "telehealth",
        }
    }

    /// Lenient parse: unknown or missing values default to office visit.
    pub fn parse_lenient(value: Option<&str>) -> Self {
        value
            .and_then(|v| v.parse().ok())
            .unwrap_or_default()
    }
}

impl fmt::Display for VisitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VisitType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace([' ', '-'], "_");
        VisitType::ALL
            .iter()
            .find(|v| v.as_str() == normalized)
            .copied()
            .ok_or_else(|| format!("unknown visit type: {}", s))
    }
}

/// How a sparse entry's content was filled in after extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrichmentSource {
    /// Re-extracted from the exhibit's page images
    Vision,
    /// Re-extracted from the current chunk merged with the next one
    ChunkMerge,
}

/// One chronology entry (a dated medical/legal event).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub date: String,

    pub provider: String,

    pub facility: String,

    #[serde(default)]
    pub visit_type: VisitType,

    /// Visit-type specific content fields, in the order the model produced them
    #[serde(default)]
    pub occurrence_treatment: IndexMap<String, Value>,

    pub exhibit_reference: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_range: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citation: Option<Citation>,

    /// Score-derived confidence from search matching
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citation_confidence: Option<f32>,

    /// Index of the continuation chunk this entry came from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_chunk: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enriched_via: Option<EnrichmentSource>,

    /// Raw-text preview for entries that need manual review
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_hint: Option<String>,
}

impl Entry {
    /// Create an entry with defaults for everything except the date.
    pub fn new(date: impl Into<String>, exhibit_reference: impl Into<String>) -> Self {
        Self {
            date: date.into(),
            provider: NOT_SPECIFIED.to_string(),
            facility: NOT_SPECIFIED.to_string(),
            visit_type: VisitType::default(),
            occurrence_treatment: IndexMap::new(),
            exhibit_reference: exhibit_reference.into(),
            page_range: None,
            citation: None,
            citation_confidence: None,
            source_chunk: None,
            enriched_via: None,
            review_hint: None,
        }
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = provider.into();
        self
    }

    pub fn with_facility(mut self, facility: impl Into<String>) -> Self {
        self.facility = facility.into();
        self
    }

    pub fn with_visit_type(mut self, visit_type: VisitType) -> Self {
        self.visit_type = visit_type;
        self
    }

    /// Add a content field.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.occurrence_treatment.insert(key.into(), value.into());
        self
    }

    pub fn with_citation(mut self, citation: Citation) -> Self {
        self.citation = Some(citation);
        self
    }

    pub fn with_page_range(mut self, page_range: impl Into<String>) -> Self {
        self.page_range = Some(page_range.into());
        self
    }

    /// Calendar date, when the date string is in a known layout.
    pub fn parsed_date(&self) -> Option<NaiveDate> {
        parse_date(&self.date)
    }

    /// True when the vision recovery pass filled this entry's content.
    pub fn enriched_via_vision(&self) -> bool {
        self.enriched_via == Some(EnrichmentSource::Vision)
    }

    /// Key used to collapse duplicates across chunks and passes:
    /// `date|visit_type|first 20 chars of lowercased provider`.
    pub fn dedup_key(&self) -> String {
        let provider: String = self.provider.to_lowercase().chars().take(20).collect();
        format!("{}|{}|{}", self.date.trim(), self.visit_type.as_str(), provider)
    }

    /// Validate and normalize a raw record from the model.
    ///
    /// Returns `None` when the record has no usable `date`, the only hard
    /// requirement. Invalid visit types become office visits, missing
    /// provider/facility become "Not Specified", and a missing content map
    /// becomes empty.
    pub fn from_record(record: &Map<String, Value>, exhibit_id: &str) -> Option<Self> {
        let date = record
            .get("date")
            .and_then(scalar_to_string)
            .filter(|d| !d.trim().is_empty())?;

        let visit_type =
            VisitType::parse_lenient(record.get("visit_type").and_then(Value::as_str));

        let provider = text_or_default(record.get("provider"));
        let facility = text_or_default(record.get("facility"));

        let occurrence_treatment = match record.get("occurrence_treatment") {
            Some(Value::Object(map)) => map
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            _ => IndexMap::new(),
        };

        let exhibit_reference = record
            .get("exhibit_reference")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(exhibit_id)
            .to_string();

        let page_range = record
            .get("page_range")
            .and_then(scalar_to_string)
            .filter(|s| !s.trim().is_empty());

        Some(Self {
            date: date.trim().to_string(),
            provider,
            facility,
            visit_type,
            occurrence_treatment,
            exhibit_reference,
            page_range,
            citation: None,
            citation_confidence: None,
            source_chunk: None,
            enriched_via: None,
            review_hint: None,
        })
    }
}

/// Validate a batch of raw records, dropping those without a date.
pub fn validate_records(records: &[Map<String, Value>], exhibit_id: &str) -> Vec<Entry> {
    let entries: Vec<Entry> = records
        .iter()
        .filter_map(|r| Entry::from_record(r, exhibit_id))
        .collect();

    let dropped = records.len() - entries.len();
    if dropped > 0 {
        tracing::debug!(
            exhibit_id,
            dropped,
            kept = entries.len(),
            "Dropped records without a date"
        );
    }

    entries
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn text_or_default(value: Option<&Value>) -> String {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(NOT_SPECIFIED)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_visit_type_parse() {
        assert_eq!("Emergency".parse::<VisitType>().unwrap(), VisitType::Emergency);
        assert_eq!(
            "hospital admission".parse::<VisitType>().unwrap(),
            VisitType::HospitalAdmission
        );
        assert_eq!(
            "lab-result".parse::<VisitType>().unwrap(),
            VisitType::LabResult
        );
        assert!("chiropractic".parse::<VisitType>().is_err());
        assert_eq!(
            VisitType::parse_lenient(Some("chiropractic")),
            VisitType::OfficeVisit
        );
        assert_eq!(VisitType::parse_lenient(None), VisitType::OfficeVisit);
    }

    #[test]
    fn test_from_record_defaults() {
        let entry = Entry::from_record(
            &record(json!({"date": "2024-01-15", "visit_type": "bogus"})),
            "1F",
        )
        .unwrap();

        assert_eq!(entry.date, "2024-01-15");
        assert_eq!(entry.visit_type, VisitType::OfficeVisit);
        assert_eq!(entry.provider, NOT_SPECIFIED);
        assert_eq!(entry.facility, NOT_SPECIFIED);
        assert!(entry.occurrence_treatment.is_empty());
        assert_eq!(entry.exhibit_reference, "1F");
    }

    #[test]
    fn test_from_record_requires_date() {
        assert!(Entry::from_record(&record(json!({"provider": "Dr. Smith"})), "1F").is_none());
        assert!(Entry::from_record(&record(json!({"date": "   "})), "1F").is_none());
        assert!(Entry::from_record(&record(json!({"date": null})), "1F").is_none());
    }

    #[test]
    fn test_from_record_keeps_content_order() {
        let entry = Entry::from_record(
            &record(json!({
                "date": "2024-03-01",
                "provider": "Dr. Jones",
                "visit_type": "emergency",
                "occurrence_treatment": {"chief_complaint": "chest pain", "assessment": "r/o MI"},
                "page_range": 12
            })),
            "3F",
        )
        .unwrap();

        let keys: Vec<_> = entry.occurrence_treatment.keys().cloned().collect();
        assert_eq!(keys, vec!["chief_complaint", "assessment"]);
        assert_eq!(entry.page_range.as_deref(), Some("12"));
        assert_eq!(entry.visit_type, VisitType::Emergency);
    }

    #[test]
    fn test_parse_date_layouts() {
        let expected = NaiveDate::from_ymd_opt(2024, 3, 7);
        assert_eq!(parse_date("2024-03-07"), expected);
        assert_eq!(parse_date("03/07/2024"), expected);
        assert_eq!(parse_date("March 7, 2024"), expected);
        assert_eq!(parse_date("Mar 7, 2024"), expected);
        assert_eq!(parse_date("early 2024"), None);
    }

    #[test]
    fn test_dedup_key_truncates_provider() {
        let entry = Entry::new("2024-01-15", "1F")
            .with_provider("Dr. Alexandra Montgomery-Whitfield, MD");
        assert_eq!(entry.dedup_key(), "2024-01-15|office_visit|dr. alexandra montg");
    }

    #[test]
    fn test_validate_records_drops_dateless() {
        let records = vec![
            record(json!({"date": "2024-01-15"})),
            record(json!({"provider": "nobody"})),
        ];
        assert_eq!(validate_records(&records, "1F").len(), 1);
    }
}
