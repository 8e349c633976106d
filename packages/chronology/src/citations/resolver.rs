//! Absolute page → exhibit lookup from declared exhibit ranges.

use crate::types::citation::{Citation, SourceType};
use crate::types::exhibit::{Exhibit, ExhibitRange};

/// An absolute page located inside an exhibit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPage {
    pub exhibit_id: String,
    pub absolute_page: u32,
    pub relative_page: u32,
    pub total_pages: u32,
}

/// Resolves absolute pages against precomputed exhibit ranges.
///
/// Ranges are flattened at construction into sorted, disjoint segments, so a
/// lookup is a binary search and memory grows with the number of exhibits,
/// not the number of pages. Where ranges overlap, the first declaration wins.
#[derive(Debug, Clone, Default)]
pub struct CitationResolver {
    ranges: Vec<ExhibitRange>,
    segments: Vec<Segment>,
}

/// Pages `start..=end` owned by `ranges[index]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Segment {
    start: u32,
    end: u32,
    index: usize,
}

impl CitationResolver {
    pub fn new(ranges: Vec<ExhibitRange>) -> Self {
        let mut segments: Vec<Segment> = Vec::with_capacity(ranges.len());
        let mut overlapping = 0u64;

        for (index, range) in ranges.iter().enumerate() {
            if range.end_page < range.start_page {
                tracing::warn!(
                    exhibit_id = %range.exhibit_id,
                    start = range.start_page,
                    end = range.end_page,
                    "Skipping inverted exhibit range"
                );
                continue;
            }
            overlapping += claim(&mut segments, range.start_page, range.end_page, index);
        }

        if overlapping > 0 {
            tracing::warn!(
                overlapping,
                "Exhibit ranges overlap; first declaration wins"
            );
        }

        Self { ranges, segments }
    }

    /// Build from the page ranges the exhibits declare. Exhibits without a
    /// range are skipped.
    pub fn from_exhibits(exhibits: &[Exhibit]) -> Self {
        Self::new(exhibits.iter().filter_map(Exhibit::range).collect())
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn ranges(&self) -> &[ExhibitRange] {
        &self.ranges
    }

    /// Declared range for an exhibit.
    pub fn range_of(&self, exhibit_id: &str) -> Option<&ExhibitRange> {
        self.ranges.iter().find(|r| r.exhibit_id == exhibit_id)
    }

    pub fn resolve(&self, absolute_page: u32) -> Option<ResolvedPage> {
        let at = self.segments.partition_point(|s| s.end < absolute_page);
        let segment = self.segments.get(at).filter(|s| s.start <= absolute_page)?;
        let range = self.ranges.get(segment.index)?;
        Some(ResolvedPage {
            exhibit_id: range.exhibit_id.clone(),
            absolute_page,
            relative_page: (absolute_page - range.start_page).saturating_add(1),
            total_pages: (range.end_page - range.start_page).saturating_add(1),
        })
    }

    /// `Ex. 1F@6 (p.105)`, or `p.105` outside known exhibits.
    pub fn format(&self, absolute_page: u32) -> String {
        match self.resolve(absolute_page) {
            Some(r) => format!("Ex. {}@{} (p.{})", r.exhibit_id, r.relative_page, absolute_page),
            None => format!("p.{}", absolute_page),
        }
    }

    /// `Ex. 1F@6-8 (pp.105-107)`, or `pp.105-107` when the pages are
    /// unknown or span exhibits.
    pub fn format_range(&self, start: u32, end: u32) -> String {
        let (start, end) = (start.min(end), start.max(end));
        if start == end {
            return self.format(start);
        }

        match (self.resolve(start), self.resolve(end)) {
            (Some(s), Some(e)) if s.exhibit_id == e.exhibit_id => format!(
                "Ex. {}@{}-{} (pp.{}-{})",
                s.exhibit_id, s.relative_page, e.relative_page, start, end
            ),
            _ => format!("pp.{}-{}", start, end),
        }
    }

    /// Citation for a single page, when it belongs to a known exhibit.
    pub fn citation(&self, absolute_page: u32) -> Option<Citation> {
        let r = self.resolve(absolute_page)?;
        Some(
            Citation::new(absolute_page)
                .with_exhibit(r.exhibit_id, r.relative_page)
                .with_total_pages(r.total_pages)
                .with_source_type(SourceType::Ere)
                .with_confidence(1.0),
        )
    }

    /// Citation for a page range inside one exhibit.
    pub fn citation_range(&self, start: u32, end: u32) -> Option<Citation> {
        let (start, end) = (start.min(end), start.max(end));
        let first = self.citation(start)?;
        if start == end {
            return Some(first);
        }

        let last = self.resolve(end)?;
        if Some(&last.exhibit_id) != first.exhibit_id.as_ref() {
            return None;
        }
        Some(first.with_end(Some(last.relative_page), end))
    }
}

/// Add the pages of `start..=end` not already owned by an earlier range,
/// keeping `segments` sorted. Returns how many pages were already owned.
fn claim(segments: &mut Vec<Segment>, start: u32, end: u32, index: usize) -> u64 {
    let (start, end) = (u64::from(start), u64::from(end));
    let mut cursor = start;
    let mut owned = 0u64;
    let mut fresh = Vec::new();

    let first = segments.partition_point(|s| u64::from(s.end) < start);
    for segment in &segments[first..] {
        let (seg_start, seg_end) = (u64::from(segment.start), u64::from(segment.end));
        if seg_start > end {
            break;
        }
        if seg_start > cursor {
            fresh.push((cursor, seg_start - 1));
        }
        owned += seg_end.min(end) - seg_start.max(cursor) + 1;
        cursor = seg_end + 1;
        if cursor > end {
            break;
        }
    }
    if cursor <= end {
        fresh.push((cursor, end));
    }

    // Every fresh piece lies inside start..=end, so the casts cannot truncate
    segments.extend(fresh.into_iter().map(|(s, e)| Segment {
        start: s as u32,
        end: e as u32,
        index,
    }));
    segments.sort_unstable_by_key(|s| s.start);
    owned
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> CitationResolver {
        CitationResolver::new(vec![
            ExhibitRange::new("1F", 100, 110),
            ExhibitRange::new("2F", 111, 130),
        ])
    }

    #[test]
    fn test_resolve_round_trip() {
        let r = resolver();
        let page = r.resolve(105).unwrap();
        assert_eq!(page.exhibit_id, "1F");
        assert_eq!(page.relative_page, 6);
        assert_eq!(page.total_pages, 11);
        assert_eq!(r.format(105), "Ex. 1F@6 (p.105)");
        assert!(r.resolve(50).is_none());
        assert_eq!(r.format(50), "p.50");
    }

    #[test]
    fn test_format_range() {
        let r = resolver();
        assert_eq!(r.format_range(105, 107), "Ex. 1F@6-8 (pp.105-107)");
        assert_eq!(r.format_range(107, 105), "Ex. 1F@6-8 (pp.105-107)");
        assert_eq!(r.format_range(109, 112), "pp.109-112");
        assert_eq!(r.format_range(40, 42), "pp.40-42");
        assert_eq!(r.format_range(105, 105), "Ex. 1F@6 (p.105)");
    }

    #[test]
    fn test_overlap_first_declaration_wins() {
        let r = CitationResolver::new(vec![
            ExhibitRange::new("1F", 1, 10),
            ExhibitRange::new("2F", 8, 20),
        ]);
        assert_eq!(r.resolve(9).unwrap().exhibit_id, "1F");
        assert_eq!(r.resolve(11).unwrap().exhibit_id, "2F");
        assert_eq!(r.resolve(11).unwrap().relative_page, 4);
    }

    #[test]
    fn test_overlap_inside_and_around_earlier_ranges() {
        let r = CitationResolver::new(vec![
            ExhibitRange::new("1F", 10, 12),
            ExhibitRange::new("2F", 20, 22),
            ExhibitRange::new("3F", 5, 30),
        ]);
        assert_eq!(r.resolve(5).unwrap().exhibit_id, "3F");
        assert_eq!(r.resolve(11).unwrap().exhibit_id, "1F");
        assert_eq!(r.resolve(15).unwrap().exhibit_id, "3F");
        assert_eq!(r.resolve(15).unwrap().relative_page, 11);
        assert_eq!(r.resolve(22).unwrap().exhibit_id, "2F");
        assert_eq!(r.resolve(30).unwrap().exhibit_id, "3F");
        assert!(r.resolve(31).is_none());
        assert!(r.resolve(4).is_none());
    }

    #[test]
    fn test_huge_range_does_not_expand() {
        let r = CitationResolver::new(vec![
            ExhibitRange::new("1F", 1, 10),
            ExhibitRange::new("9F", 1, u32::MAX),
        ]);
        assert_eq!(r.segments.len(), 2);
        assert_eq!(r.resolve(5).unwrap().exhibit_id, "1F");
        let last = r.resolve(u32::MAX).unwrap();
        assert_eq!(last.exhibit_id, "9F");
        assert_eq!(last.relative_page, u32::MAX);
        assert_eq!(last.total_pages, u32::MAX);
    }

    #[test]
    fn test_citations() {
        let r = resolver();
        assert_eq!(r.citation(105).unwrap().format(), "1F@6 (p.105)");
        assert_eq!(
            r.citation_range(105, 107).unwrap().format(),
            "1F@6-8 (pp.105-107)"
        );
        assert!(r.citation_range(109, 112).is_none());
        assert!(r.citation(5).is_none());
    }

    #[test]
    fn test_from_exhibits_skips_unranged() {
        let r = CitationResolver::from_exhibits(&[
            Exhibit::new("1F", "").with_page_range(1, 3),
            Exhibit::new("2F", ""),
        ]);
        assert_eq!(r.ranges().len(), 1);
        assert!(r.range_of("2F").is_none());
        assert!(!r.is_empty());
    }
}
