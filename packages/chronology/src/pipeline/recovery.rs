//! Vision recovery for sparse entries.
//!
//! A sparse entry usually means the visit's content sat in a scanned page
//! the text layer couldn't read. Re-running vision over the exhibit's
//! images and matching on `(date, visit_type)` fills those entries in.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::traits::extractor::Extractor;
use crate::types::entry::{EnrichmentSource, Entry};
use crate::types::exhibit::Exhibit;
use crate::types::schema::SchemaRegistry;

/// What a recovery pass changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecoveryOutcome {
    pub entries: Vec<Entry>,
    /// Sparse entries whose content was filled
    pub filled: usize,
    /// New entries appended from the vision pass
    pub added: usize,
}

impl RecoveryOutcome {
    fn unchanged(entries: Vec<Entry>) -> Self {
        Self {
            entries,
            filled: 0,
            added: 0,
        }
    }
}

/// Fills sparse entries from a fresh vision pass.
pub struct RecoveryHandler {
    vision: Arc<dyn Extractor>,
    registry: Arc<SchemaRegistry>,
}

impl RecoveryHandler {
    pub fn new(vision: Arc<dyn Extractor>, registry: Arc<SchemaRegistry>) -> Self {
        Self { vision, registry }
    }

    /// Recover sparse entries using the exhibit's page images.
    ///
    /// Without images, or without sparse entries, the input comes back
    /// unchanged and no LLM call is made. A failed vision pass is logged and
    /// also leaves the entries unchanged.
    pub async fn recover(&self, entries: Vec<Entry>, exhibit: &Exhibit) -> RecoveryOutcome {
        if !exhibit.has_images() {
            return RecoveryOutcome::unchanged(entries);
        }

        let sparse: Vec<usize> = entries
            .iter()
            .enumerate()
            .filter(|(_, e)| self.registry.is_sparse(e))
            .map(|(i, _)| i)
            .collect();

        if sparse.is_empty() {
            debug!(exhibit_id = %exhibit.exhibit_id, "No sparse entries; skipping recovery");
            return RecoveryOutcome::unchanged(entries);
        }

        info!(
            exhibit_id = %exhibit.exhibit_id,
            sparse = sparse.len(),
            images = exhibit.images.len(),
            "Recovering sparse entries via vision"
        );

        match self.vision.extract(exhibit).await {
            Ok(vision_entries) => self.merge(entries, &sparse, vision_entries),
            Err(e) => {
                warn!(
                    exhibit_id = %exhibit.exhibit_id,
                    error = %e,
                    "Vision recovery failed; keeping sparse entries"
                );
                RecoveryOutcome::unchanged(entries)
            }
        }
    }

    fn merge(
        &self,
        mut entries: Vec<Entry>,
        sparse: &[usize],
        vision_entries: Vec<Entry>,
    ) -> RecoveryOutcome {
        let rich: Vec<Entry> = vision_entries
            .into_iter()
            .filter(|e| !self.registry.is_sparse(e))
            .collect();
        let mut used = vec![false; rich.len()];
        let mut filled = 0;

        for &i in sparse {
            let entry = &mut entries[i];
            let found = rich.iter().enumerate().position(|(j, candidate)| {
                !used[j] && candidate.date == entry.date && candidate.visit_type == entry.visit_type
            });
            if let Some(j) = found {
                used[j] = true;
                entry.occurrence_treatment = rich[j].occurrence_treatment.clone();
                entry.enriched_via = Some(EnrichmentSource::Vision);
                filled += 1;
            }
        }

        let mut present: HashSet<String> = entries.iter().map(Entry::dedup_key).collect();
        let mut added = 0;
        for (candidate, used) in rich.into_iter().zip(used) {
            if used || !present.insert(candidate.dedup_key()) {
                continue;
            }
            entries.push(candidate);
            added += 1;
        }

        RecoveryOutcome {
            entries,
            filled,
            added,
        }
    }
}
