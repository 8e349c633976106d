//! Aggregation records for extraction runs.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::entry::Entry;
use crate::types::exhibit::CaseInfo;

/// Outcome of extracting one exhibit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExhibitExtractionResult {
    pub exhibit_id: String,
    pub entries: Vec<Entry>,
    pub text_entries: usize,
    pub vision_entries: usize,
    /// Sparse entries filled (or added) by recovery
    pub recovered_entries: usize,
    pub processing_time_ms: u64,
    pub error: Option<String>,
}

impl ExhibitExtractionResult {
    pub fn success(exhibit_id: impl Into<String>, entries: Vec<Entry>) -> Self {
        Self {
            exhibit_id: exhibit_id.into(),
            entries,
            text_entries: 0,
            vision_entries: 0,
            recovered_entries: 0,
            processing_time_ms: 0,
            error: None,
        }
    }

    /// Failed result; never carries entries.
    pub fn failure(exhibit_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            exhibit_id: exhibit_id.into(),
            entries: Vec::new(),
            text_entries: 0,
            vision_entries: 0,
            recovered_entries: 0,
            processing_time_ms: 0,
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Aggregate over all exhibits of one fan-out.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParallelExtractionResult {
    pub results: Vec<ExhibitExtractionResult>,
    /// All entries, flattened in exhibit order
    pub entries: Vec<Entry>,
    pub successful_exhibits: usize,
    pub failed_exhibits: usize,
    pub processing_time_ms: u64,
}

impl ParallelExtractionResult {
    /// Aggregate per-exhibit results in the order given.
    pub fn from_results(results: Vec<ExhibitExtractionResult>, processing_time_ms: u64) -> Self {
        let successful_exhibits = results.iter().filter(|r| r.is_success()).count();
        let failed_exhibits = results.len() - successful_exhibits;
        let entries = results
            .iter()
            .flat_map(|r| r.entries.iter().cloned())
            .collect();

        Self {
            results,
            entries,
            successful_exhibits,
            failed_exhibits,
            processing_time_ms,
        }
    }

    pub fn failures(&self) -> impl Iterator<Item = &ExhibitExtractionResult> {
        self.results.iter().filter(|r| !r.is_success())
    }
}

/// What the caller gets back from a chronology run.
///
/// `error` distinguishes a failed run from one that simply found nothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChronologyResult {
    pub run_id: Uuid,
    pub events: Vec<Entry>,
    pub processing_time_ms: u64,
    pub exhibit_count: usize,
    pub successful_exhibits: usize,
    pub failed_exhibits: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub case_info: Option<CaseInfo>,
}

impl ChronologyResult {
    /// Error result with zero events.
    pub fn failed(
        run_id: Uuid,
        exhibit_count: usize,
        error: impl Into<String>,
        case_info: Option<CaseInfo>,
    ) -> Self {
        Self {
            run_id,
            events: Vec::new(),
            processing_time_ms: 0,
            exhibit_count,
            successful_exhibits: 0,
            failed_exhibits: exhibit_count,
            error: Some(error.into()),
            case_info,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate_counts() {
        let results = vec![
            ExhibitExtractionResult::success("1F", vec![Entry::new("2024-01-01", "1F")]),
            ExhibitExtractionResult::failure("2F", "boom"),
            ExhibitExtractionResult::success(
                "3F",
                vec![
                    Entry::new("2024-02-01", "3F"),
                    Entry::new("2024-03-01", "3F"),
                ],
            ),
        ];

        let aggregate = ParallelExtractionResult::from_results(results, 12);
        assert_eq!(aggregate.successful_exhibits, 2);
        assert_eq!(aggregate.failed_exhibits, 1);
        assert_eq!(aggregate.entries.len(), 3);
        assert_eq!(aggregate.failures().next().unwrap().exhibit_id, "2F");
    }
}
