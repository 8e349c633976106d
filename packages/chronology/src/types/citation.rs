//! Citation types - structured pointers from an entry to its source pages.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a citation's page information came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    /// Exhibit bar/stamp printed by the records system
    Ere,
    /// Bates stamp
    Bates,
    /// Hearing transcript page marker
    Transcript,
    /// No reliable marker; page position only
    #[default]
    Generic,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ere => "ere",
            Self::Bates => "bates",
            Self::Transcript => "transcript",
            Self::Generic => "generic",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable citation attached to exactly one entry.
///
/// `absolute_page` is the 1-based page within the whole source PDF.
/// `relative_page` is the page within the exhibit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub absolute_page: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exhibit_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relative_page: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_pages: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_relative_page: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_absolute_page: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bates_number: Option<String>,

    #[serde(default)]
    pub source_type: SourceType,

    /// True when the page was inferred rather than read from a marker
    #[serde(default)]
    pub is_estimated: bool,

    /// Confidence in the attribution (0.0 to 1.0)
    pub confidence: f32,
}

impl Citation {
    /// Create a generic citation for an absolute page.
    pub fn new(absolute_page: u32) -> Self {
        Self {
            absolute_page,
            exhibit_id: None,
            relative_page: None,
            total_pages: None,
            end_relative_page: None,
            end_absolute_page: None,
            bates_number: None,
            source_type: SourceType::Generic,
            is_estimated: false,
            confidence: 0.5,
        }
    }

    /// Set the exhibit and the page within it.
    pub fn with_exhibit(mut self, exhibit_id: impl Into<String>, relative_page: u32) -> Self {
        self.exhibit_id = Some(exhibit_id.into());
        self.relative_page = Some(relative_page);
        self
    }

    /// Extend the citation to a page range.
    pub fn with_end(mut self, end_relative_page: Option<u32>, end_absolute_page: u32) -> Self {
        self.end_relative_page = end_relative_page;
        self.end_absolute_page = Some(end_absolute_page);
        self
    }

    pub fn with_total_pages(mut self, total: u32) -> Self {
        self.total_pages = Some(total);
        self
    }

    pub fn with_bates(mut self, bates: impl Into<String>) -> Self {
        self.bates_number = Some(bates.into());
        self.source_type = SourceType::Bates;
        self
    }

    pub fn with_source_type(mut self, source_type: SourceType) -> Self {
        self.source_type = source_type;
        self
    }

    /// Mark the citation as estimated.
    pub fn estimated(mut self) -> Self {
        self.is_estimated = true;
        self
    }

    pub fn with_estimated(mut self, is_estimated: bool) -> Self {
        self.is_estimated = is_estimated;
        self
    }

    /// Set confidence, clamped into [0, 1].
    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = if confidence.is_nan() {
            0.0
        } else {
            confidence.clamp(0.0, 1.0)
        };
        self
    }

    /// Whether the citation covers more than one page.
    pub fn is_range(&self) -> bool {
        matches!(self.end_absolute_page, Some(end) if end != self.absolute_page)
    }

    /// Last absolute page covered.
    pub fn last_page(&self) -> u32 {
        self.end_absolute_page.unwrap_or(self.absolute_page)
    }

    /// Render the canonical citation string.
    ///
    /// - `25F@33 (p.1847)`
    /// - `25F@~33 (p.1847)` when estimated
    /// - `25F@33-35 (pp.1847-1849)` for ranges
    /// - the Bates number when that is all we have
    /// - `p.1847` otherwise
    pub fn format(&self) -> String {
        let tilde = if self.is_estimated { "~" } else { "" };

        if let (Some(exhibit), Some(rel)) = (&self.exhibit_id, self.relative_page) {
            if let (Some(end_rel), Some(end_abs)) = (self.end_relative_page, self.end_absolute_page)
            {
                if end_abs != self.absolute_page {
                    return format!(
                        "{}@{}{}-{} (pp.{}-{})",
                        exhibit, tilde, rel, end_rel, self.absolute_page, end_abs
                    );
                }
            }
            return format!("{}@{}{} (p.{})", exhibit, tilde, rel, self.absolute_page);
        }

        if let Some(bates) = &self.bates_number {
            return bates.clone();
        }

        if self.is_range() {
            format!("pp.{}-{}", self.absolute_page, self.last_page())
        } else {
            format!("p.{}", self.absolute_page)
        }
    }
}

impl fmt::Display for Citation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_exhibit_page() {
        let citation = Citation::new(1847).with_exhibit("25F", 33);
        assert_eq!(citation.format(), "25F@33 (p.1847)");
    }

    #[test]
    fn test_format_estimated() {
        let citation = Citation::new(1847).with_exhibit("25F", 33).estimated();
        assert_eq!(citation.format(), "25F@~33 (p.1847)");
    }

    #[test]
    fn test_format_range() {
        let citation = Citation::new(1847)
            .with_exhibit("25F", 33)
            .with_end(Some(35), 1849);
        assert_eq!(citation.format(), "25F@33-35 (pp.1847-1849)");
        assert!(citation.is_range());
    }

    #[test]
    fn test_format_degenerate_range_is_single_page() {
        let citation = Citation::new(1847)
            .with_exhibit("25F", 33)
            .with_end(Some(33), 1847);
        assert_eq!(citation.format(), "25F@33 (p.1847)");
    }

    #[test]
    fn test_format_bates_and_fallback() {
        let bates = Citation::new(12).with_bates("ABC0001234");
        assert_eq!(bates.format(), "ABC0001234");
        assert_eq!(bates.source_type, SourceType::Bates);

        assert_eq!(Citation::new(12).format(), "p.12");
        assert_eq!(Citation::new(12).with_end(None, 14).format(), "pp.12-14");
    }

    #[test]
    fn test_confidence_is_clamped() {
        assert_eq!(Citation::new(1).with_confidence(1.7).confidence, 1.0);
        assert_eq!(Citation::new(1).with_confidence(-0.2).confidence, 0.0);
        assert_eq!(Citation::new(1).with_confidence(f32::NAN).confidence, 0.0);
    }
}
