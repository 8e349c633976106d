//! Exhibit types - the caller's input documents and their pages.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ChronologyError, Result};
use crate::types::citation::SourceType;

/// One logical document segment (e.g. one bundled medical record).
///
/// Owned by the caller and read-only to the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Exhibit {
    #[serde(alias = "id")]
    pub exhibit_id: String,

    /// Searchable text of the exhibit
    #[serde(default, alias = "content")]
    pub text: String,

    /// Page images (PNG/JPEG bytes; base64 strings in JSON)
    #[serde(default, with = "base64_images", skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<Vec<u8>>,

    /// Absolute start/end page of the exhibit in the source PDF
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_range: Option<(u32, u32)>,

    /// Absolute page numbers of scanned (image-only) pages
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scanned_page_nums: Vec<u32>,

    /// Per-page text from the PDF layer, used for citation matching
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pages: Vec<PageText>,
}

impl Exhibit {
    /// Create a text-only exhibit.
    pub fn new(exhibit_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            exhibit_id: exhibit_id.into(),
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_images(mut self, images: Vec<Vec<u8>>) -> Self {
        self.images = images;
        self
    }

    pub fn with_page_range(mut self, start: u32, end: u32) -> Self {
        self.page_range = Some((start, end));
        self
    }

    pub fn with_scanned_pages(mut self, pages: impl IntoIterator<Item = u32>) -> Self {
        self.scanned_page_nums = pages.into_iter().collect();
        self
    }

    pub fn with_pages(mut self, pages: Vec<PageText>) -> Self {
        self.pages = pages;
        self
    }

    pub fn has_text(&self) -> bool {
        !self.text.trim().is_empty()
    }

    pub fn has_images(&self) -> bool {
        !self.images.is_empty()
    }

    /// Context handed to citation components.
    pub fn context(&self) -> ExhibitContext {
        ExhibitContext {
            exhibit_id: self.exhibit_id.clone(),
            start_page: self.page_range.map(|(start, _)| start),
            end_page: self.page_range.map(|(_, end)| end),
        }
    }

    /// Declared page range, if any.
    pub fn range(&self) -> Option<ExhibitRange> {
        self.page_range
            .map(|(start, end)| ExhibitRange::new(&self.exhibit_id, start, end))
    }

    /// Absolute page number for each image.
    ///
    /// Uses `scanned_page_nums` when it lines up with the images, otherwise
    /// counts up from the exhibit's first page (or from 1).
    pub fn image_page_numbers(&self) -> Vec<u32> {
        if !self.scanned_page_nums.is_empty() && self.scanned_page_nums.len() == self.images.len()
        {
            return self.scanned_page_nums.clone();
        }

        let first = self.page_range.map(|(start, _)| start).unwrap_or(1);
        (0..self.images.len() as u32).map(|i| first + i).collect()
    }
}

/// Text of one page as produced by the PDF layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageText {
    pub absolute_page: u32,
    pub relative_page: u32,
    pub exhibit_id: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header_info: Option<HeaderInfo>,
}

impl PageText {
    pub fn new(
        exhibit_id: impl Into<String>,
        absolute_page: u32,
        relative_page: u32,
        text: impl Into<String>,
    ) -> Self {
        Self {
            absolute_page,
            relative_page,
            exhibit_id: exhibit_id.into(),
            text: text.into(),
            header_info: None,
        }
    }

    pub fn with_header(mut self, source_type: SourceType, confidence: f32) -> Self {
        self.header_info = Some(HeaderInfo {
            source_type,
            confidence,
        });
        self
    }
}

/// Header marker the PDF layer found on a page.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HeaderInfo {
    pub source_type: SourceType,
    pub confidence: f32,
}

impl HeaderInfo {
    /// Generic markers only tell us the page position.
    pub fn is_estimated(&self) -> bool {
        self.source_type == SourceType::Generic
    }
}

/// What citation components know about the exhibit being processed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExhibitContext {
    pub exhibit_id: String,
    pub start_page: Option<u32>,
    pub end_page: Option<u32>,
}

impl ExhibitContext {
    pub fn new(exhibit_id: impl Into<String>) -> Self {
        Self {
            exhibit_id: exhibit_id.into(),
            start_page: None,
            end_page: None,
        }
    }

    pub fn with_bounds(mut self, start: u32, end: u32) -> Self {
        self.start_page = Some(start);
        self.end_page = Some(end);
        self
    }

    pub fn total_pages(&self) -> Option<u32> {
        match (self.start_page, self.end_page) {
            (Some(start), Some(end)) if end >= start => Some(end - start + 1),
            _ => None,
        }
    }

    /// Page within the exhibit for an absolute page, when bounds allow it.
    pub fn relative_page(&self, absolute_page: u32) -> Option<u32> {
        let start = self.start_page?;
        if absolute_page < start {
            return None;
        }
        if let Some(end) = self.end_page {
            if absolute_page > end {
                return None;
            }
        }
        Some(absolute_page - start + 1)
    }
}

/// Declared absolute page range of one exhibit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExhibitRange {
    pub exhibit_id: String,
    pub start_page: u32,
    pub end_page: u32,
}

impl ExhibitRange {
    pub fn new(exhibit_id: impl Into<String>, start_page: u32, end_page: u32) -> Self {
        Self {
            exhibit_id: exhibit_id.into(),
            start_page,
            end_page,
        }
    }
}

/// Case metadata passed through to the result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CaseInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimant_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub case_number: Option<String>,

    #[serde(flatten)]
    pub extra: IndexMap<String, Value>,
}

/// Exhibit input in any of the accepted shapes.
///
/// - `["1F", "text..."]` (legacy tuple)
/// - `{"exhibit_id": "1F", "text": "...", ...}` (structured)
/// - `{"1F": "text...", "2F": "text..."}` (legacy id → text map)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExhibitInput {
    LegacyTuple(String, String),
    Structured(Exhibit),
    LegacyMap(IndexMap<String, String>),
}

impl From<Exhibit> for ExhibitInput {
    fn from(exhibit: Exhibit) -> Self {
        Self::Structured(exhibit)
    }
}

impl From<(String, String)> for ExhibitInput {
    fn from((id, text): (String, String)) -> Self {
        Self::LegacyTuple(id, text)
    }
}

impl From<(&str, &str)> for ExhibitInput {
    fn from((id, text): (&str, &str)) -> Self {
        Self::LegacyTuple(id.to_string(), text.to_string())
    }
}

impl ExhibitInput {
    /// Normalize into canonical exhibits.
    pub fn into_exhibits(self) -> Result<Vec<Exhibit>> {
        let exhibits = match self {
            Self::LegacyTuple(id, text) => vec![Exhibit::new(id, text)],
            Self::Structured(exhibit) => vec![exhibit],
            Self::LegacyMap(map) => map
                .into_iter()
                .map(|(id, text)| Exhibit::new(id, text))
                .collect(),
        };

        for exhibit in &exhibits {
            let id = exhibit.exhibit_id.trim();
            if id.is_empty() {
                return Err(ChronologyError::InvalidExhibit {
                    reason: "exhibit id is empty".to_string(),
                });
            }
            if let Some((start, end)) = exhibit.page_range {
                if end < start {
                    return Err(ChronologyError::InvalidExhibit {
                        reason: format!(
                            "exhibit {} has inverted page range {}-{}",
                            exhibit.exhibit_id, start, end
                        ),
                    });
                }
            }
        }

        Ok(exhibits)
    }
}

/// Normalize a heterogeneous list of exhibit inputs.
pub fn normalize_exhibits(inputs: Vec<ExhibitInput>) -> Result<Vec<Exhibit>> {
    let mut exhibits = Vec::with_capacity(inputs.len());
    for input in inputs {
        exhibits.extend(input.into_exhibits()?);
    }

    let mut seen = std::collections::HashSet::new();
    for exhibit in &exhibits {
        if !seen.insert(exhibit.exhibit_id.as_str()) {
            tracing::warn!(exhibit_id = %exhibit.exhibit_id, "Duplicate exhibit id in input");
        }
    }

    Ok(exhibits)
}

/// Images travel as base64 strings (optionally `data:` URLs) in JSON.
mod base64_images {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::ser::SerializeSeq;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(images: &[Vec<u8>], serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(images.len()))?;
        for image in images {
            seq.serialize_element(&STANDARD.encode(image))?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<Vec<u8>>, D::Error> {
        let encoded = Vec::<String>::deserialize(deserializer)?;
        encoded
            .iter()
            .map(|e| {
                let payload = match e.split_once("base64,") {
                    Some((_, data)) => data,
                    None => e.as_str(),
                };
                STANDARD
                    .decode(payload.trim())
                    .map_err(serde::de::Error::custom)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_image_page_numbers() {
        let exhibit = Exhibit::new("1F", "")
            .with_images(vec![vec![1], vec![2], vec![3]])
            .with_page_range(100, 110);
        assert_eq!(exhibit.image_page_numbers(), vec![100, 101, 102]);

        let scanned = exhibit.clone().with_scanned_pages([104, 107, 109]);
        assert_eq!(scanned.image_page_numbers(), vec![104, 107, 109]);

        let mismatched = exhibit.with_scanned_pages([104]);
        assert_eq!(mismatched.image_page_numbers(), vec![100, 101, 102]);

        let bare = Exhibit::new("2F", "").with_images(vec![vec![1], vec![2]]);
        assert_eq!(bare.image_page_numbers(), vec![1, 2]);
    }

    #[test]
    fn test_context_relative_page() {
        let ctx = ExhibitContext::new("1F").with_bounds(100, 110);
        assert_eq!(ctx.relative_page(105), Some(6));
        assert_eq!(ctx.relative_page(99), None);
        assert_eq!(ctx.relative_page(111), None);
        assert_eq!(ctx.total_pages(), Some(11));
    }

    #[test]
    fn test_input_shapes_deserialize() {
        let inputs: Vec<ExhibitInput> = serde_json::from_value(json!([
            ["1F", "tuple text"],
            {"exhibit_id": "2F", "text": "structured", "page_range": [10, 20]},
            {"3F": "map text", "4F": "more map text"}
        ]))
        .unwrap();

        let exhibits = normalize_exhibits(inputs).unwrap();
        let ids: Vec<_> = exhibits.iter().map(|e| e.exhibit_id.as_str()).collect();
        assert_eq!(ids, vec!["1F", "2F", "3F", "4F"]);
        assert_eq!(exhibits[1].page_range, Some((10, 20)));
        assert_eq!(exhibits[2].text, "map text");
    }

    #[test]
    fn test_structured_accepts_aliases_and_base64_images() {
        let exhibit: Exhibit = serde_json::from_value(json!({
            "id": "5F",
            "content": "body",
            "images": ["aGVsbG8=", "data:image/png;base64,d29ybGQ="]
        }))
        .unwrap();

        assert_eq!(exhibit.exhibit_id, "5F");
        assert_eq!(exhibit.text, "body");
        assert_eq!(exhibit.images, vec![b"hello".to_vec(), b"world".to_vec()]);

        let round = serde_json::to_value(&exhibit).unwrap();
        assert_eq!(round["images"][0], "aGVsbG8=");
    }

    #[test]
    fn test_invalid_inputs_rejected() {
        let empty_id = ExhibitInput::LegacyTuple("  ".into(), "text".into());
        assert!(matches!(
            empty_id.into_exhibits(),
            Err(ChronologyError::InvalidExhibit { .. })
        ));

        let inverted = ExhibitInput::Structured(Exhibit::new("1F", "").with_page_range(20, 10));
        assert!(inverted.into_exhibits().is_err());
    }
}
