//! Detection of page/exhibit markers printed on a page.
//!
//! Strategies run strongest first and stop at the first detection that
//! clears the minimum confidence. Pattern strategies only look at the top of
//! the page, where headers live, so body text quoting another exhibit
//! doesn't produce false positives.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::types::citation::{Citation, SourceType};
use crate::types::exhibit::{ExhibitContext, PageText};

/// Characters of page text scanned for printed markers.
pub const HEADER_SCAN_CHARS: usize = 500;

/// Detections below this confidence fall through to the next strategy.
pub const MIN_CONFIDENCE: f32 = 0.3;

static EXHIBIT_BAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(\d{1,3}[A-Z]{1,2})\s*[-\u{2013}\u{2014}]\s*(\d{1,4})\s+of\s+(\d{1,4})\b")
        .unwrap()
});
static EXHIBIT_STAMP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)EXHIBIT\s+NO\.?\s*:?\s*([0-9]{1,3}[A-Z]{1,2})\b.{0,200}?PAGE\s*:?\s*(\d{1,4})(?:\s*OF\s*(\d{1,4}))?")
        .unwrap()
});
static BATES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b([A-Z]{2,5}\d{6,9})\b").unwrap());
static TRANSCRIPT_PAGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bPage\s+(\d{1,4})(?:\s+of\s+(\d{1,4}))?\b").unwrap());

/// Which strategy produced a detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    ExhibitBar,
    ExhibitStamp,
    Bates,
    Transcript,
    PositionInference,
    Generic,
}

/// What the detector found on a page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub source_type: SourceType,
    pub exhibit_id: Option<String>,
    pub relative_page: Option<u32>,
    pub total_pages: Option<u32>,
    pub bates_number: Option<String>,
    pub confidence: f32,
    pub method: DetectionMethod,
    pub is_estimated: bool,
}

impl Detection {
    fn new(source_type: SourceType, method: DetectionMethod, confidence: f32) -> Self {
        Self {
            source_type,
            exhibit_id: None,
            relative_page: None,
            total_pages: None,
            bates_number: None,
            confidence,
            method,
            is_estimated: false,
        }
    }

    /// Whether the page itself carried a marker (as opposed to inference).
    pub fn is_printed(&self) -> bool {
        !matches!(
            self.method,
            DetectionMethod::PositionInference | DetectionMethod::Generic
        )
    }

    /// Build a citation for the page this detection came from.
    pub fn to_citation(&self, absolute_page: u32) -> Citation {
        let mut citation = Citation::new(absolute_page)
            .with_source_type(self.source_type)
            .with_estimated(self.is_estimated)
            .with_confidence(self.confidence);

        if let (Some(exhibit), Some(rel)) = (&self.exhibit_id, self.relative_page) {
            citation = citation.with_exhibit(exhibit.clone(), rel);
        }
        if let Some(total) = self.total_pages {
            citation = citation.with_total_pages(total);
        }
        if let Some(bates) = &self.bates_number {
            citation.bates_number = Some(bates.clone());
        }
        citation
    }
}

/// Ordered header-detection strategy chain.
#[derive(Debug, Clone)]
pub struct HeaderDetector {
    min_confidence: f32,
    scan_chars: usize,
}

impl Default for HeaderDetector {
    fn default() -> Self {
        Self {
            min_confidence: MIN_CONFIDENCE,
            scan_chars: HEADER_SCAN_CHARS,
        }
    }
}

impl HeaderDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Detect markers on `page`. Always returns a detection; the last
    /// resort is a low-confidence generic one.
    pub fn detect(&self, page: &PageText, ctx: &ExhibitContext) -> Detection {
        let head = prefix_chars(&page.text, self.scan_chars);

        let strategies = [
            detect_bar(head),
            detect_stamp(head),
            detect_bates(head),
            detect_transcript(head),
            infer_position(page.absolute_page, ctx),
        ];

        for detection in strategies.into_iter().flatten() {
            if detection.confidence >= self.min_confidence {
                tracing::trace!(
                    page = page.absolute_page,
                    method = ?detection.method,
                    "Header detected"
                );
                return detection;
            }
        }

        let mut generic = Detection::new(SourceType::Generic, DetectionMethod::Generic, 0.25);
        generic.is_estimated = true;
        if !ctx.exhibit_id.is_empty() {
            generic.exhibit_id = Some(ctx.exhibit_id.clone());
            generic.relative_page = (page.relative_page > 0).then_some(page.relative_page);
        }
        generic
    }
}

fn prefix_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((i, _)) => &text[..i],
        None => text,
    }
}

fn parse_num(m: Option<regex::Match<'_>>) -> Option<u32> {
    m.and_then(|m| m.as_str().parse().ok())
}

fn detect_bar(head: &str) -> Option<Detection> {
    let caps = EXHIBIT_BAR.captures(head)?;
    let mut d = Detection::new(SourceType::Ere, DetectionMethod::ExhibitBar, 0.95);
    d.exhibit_id = Some(caps[1].to_uppercase());
    d.relative_page = parse_num(caps.get(2));
    d.total_pages = parse_num(caps.get(3));
    Some(d)
}

fn detect_stamp(head: &str) -> Option<Detection> {
    let caps = EXHIBIT_STAMP.captures(head)?;
    let mut d = Detection::new(SourceType::Ere, DetectionMethod::ExhibitStamp, 0.90);
    d.exhibit_id = Some(caps[1].to_uppercase());
    d.relative_page = parse_num(caps.get(2));
    d.total_pages = parse_num(caps.get(3));
    Some(d)
}

fn detect_bates(head: &str) -> Option<Detection> {
    let caps = BATES.captures(head)?;
    let mut d = Detection::new(SourceType::Bates, DetectionMethod::Bates, 0.85);
    d.bates_number = Some(caps[1].to_string());
    Some(d)
}

fn detect_transcript(head: &str) -> Option<Detection> {
    let caps = TRANSCRIPT_PAGE.captures(head)?;
    let mut d = Detection::new(SourceType::Transcript, DetectionMethod::Transcript, 0.80);
    d.relative_page = parse_num(caps.get(1));
    d.total_pages = parse_num(caps.get(2));
    Some(d)
}

fn infer_position(absolute_page: u32, ctx: &ExhibitContext) -> Option<Detection> {
    let relative = ctx.relative_page(absolute_page)?;
    let mut d = Detection::new(
        SourceType::Generic,
        DetectionMethod::PositionInference,
        0.60,
    );
    d.exhibit_id = Some(ctx.exhibit_id.clone());
    d.relative_page = Some(relative);
    d.total_pages = ctx.total_pages();
    d.is_estimated = true;
    Some(d)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(abs: u32, text: &str) -> PageText {
        PageText::new("25F", abs, 0, text)
    }

    #[test]
    fn test_exhibit_bar() {
        let d = HeaderDetector::new().detect(
            &page(1847, "25F - 33 of 120\nPROGRESS NOTE"),
            &ExhibitContext::new("25F"),
        );
        assert_eq!(d.method, DetectionMethod::ExhibitBar);
        assert_eq!(d.exhibit_id.as_deref(), Some("25F"));
        assert_eq!(d.relative_page, Some(33));
        assert_eq!(d.total_pages, Some(120));
        assert_eq!(d.confidence, 0.95);
        assert!(!d.is_estimated);

        assert_eq!(d.to_citation(1847).format(), "25F@33 (p.1847)");
    }

    #[test]
    fn test_exhibit_stamp() {
        let d = HeaderDetector::new().detect(
            &page(12, "EXHIBIT NO. 3F\nClaimant: J. Doe\nPAGE: 4 OF 9"),
            &ExhibitContext::new("3F"),
        );
        assert_eq!(d.method, DetectionMethod::ExhibitStamp);
        assert_eq!(d.exhibit_id.as_deref(), Some("3F"));
        assert_eq!(d.relative_page, Some(4));
        assert_eq!(d.total_pages, Some(9));
    }

    #[test]
    fn test_bates_and_transcript() {
        let detector = HeaderDetector::new();
        let ctx = ExhibitContext::new("1F");

        let bates = detector.detect(&page(5, "ABC0012345\nLab report"), &ctx);
        assert_eq!(bates.method, DetectionMethod::Bates);
        assert_eq!(bates.bates_number.as_deref(), Some("ABC0012345"));
        assert_eq!(bates.to_citation(5).format(), "ABC0012345");

        let transcript = detector.detect(&page(6, "Page 14 of 80\nQ. And then?"), &ctx);
        assert_eq!(transcript.method, DetectionMethod::Transcript);
        assert_eq!(transcript.relative_page, Some(14));
    }

    #[test]
    fn test_markers_deep_in_body_are_ignored() {
        let text = format!("{}\n25F - 33 of 120", "clinical narrative ".repeat(40));
        let ctx = ExhibitContext::new("25F").with_bounds(1800, 1900);
        let d = HeaderDetector::new().detect(&page(1847, &text), &ctx);

        assert_eq!(d.method, DetectionMethod::PositionInference);
        assert_eq!(d.relative_page, Some(48));
        assert!(d.is_estimated);
        assert_eq!(d.confidence, 0.60);
        assert_eq!(d.to_citation(1847).format(), "25F@~48 (p.1847)");
    }

    #[test]
    fn test_generic_fallback() {
        let d = HeaderDetector::new().detect(&page(7, "no markers here"), &ExhibitContext::new("9F"));
        assert_eq!(d.method, DetectionMethod::Generic);
        assert_eq!(d.confidence, 0.25);
        assert!(d.is_estimated);
        assert!(!d.is_printed());
    }
}
