//! Search-based page matching for extracted entries.
//!
//! Each entry contributes weighted search terms (date, provider, facility,
//! a few diagnoses and procedures). Pages are scored by the terms they
//! contain and the best page, plus qualifying neighbours, becomes the
//! citation.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::citations::header::HeaderDetector;
use crate::types::citation::Citation;
use crate::types::config::MatcherConfig;
use crate::types::entry::{parse_date, Entry};
use crate::types::exhibit::{ExhibitContext, PageText};

const DATE_WEIGHT: f32 = 3.0;
const NAME_WEIGHT: f32 = 2.0;
const DETAIL_WEIGHT: f32 = 1.0;
const MAX_DETAIL_TERMS: usize = 2;

/// Confidence given to fallback citations.
const FALLBACK_CONFIDENCE: f32 = 0.1;

const STOP_TERMS: &[&str] = &["not specified", "unknown", "n/a", "none", ""];

const DATE_OUTPUT_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%m/%d/%Y",
    "%-m/%-d/%Y",
    "%m/%d/%y",
    "%-m/%-d/%y",
    "%m-%d-%Y",
    "%B %-d, %Y",
    "%b %-d, %Y",
    "%b. %-d, %Y",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMethod {
    SearchMatch,
    Fallback,
}

/// Outcome of matching one entry against an exhibit's pages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub citation: Option<Citation>,
    pub score: f32,
    pub matched_terms: Vec<String>,
    pub method: MatchMethod,
}

#[derive(Debug, Clone)]
enum TermKind {
    /// Any rendering of the date, matched exactly (case-insensitive)
    Date(Vec<String>),
    /// Normalized substring, or a whole-word match for short terms
    Fuzzy {
        normalized: String,
        word: Option<Regex>,
    },
}

#[derive(Debug, Clone)]
struct SearchTerm {
    text: String,
    weight: f32,
    kind: TermKind,
}

/// Scores pages against entries.
#[derive(Debug, Clone, Default)]
pub struct CitationMatcher {
    config: MatcherConfig,
    detector: HeaderDetector,
}

impl CitationMatcher {
    pub fn new(config: MatcherConfig) -> Self {
        Self {
            config,
            detector: HeaderDetector::default(),
        }
    }

    /// Find the page(s) supporting `entry`.
    pub fn match_entry(
        &self,
        entry: &Entry,
        pages: &[PageText],
        ctx: &ExhibitContext,
    ) -> MatchResult {
        let terms = self.search_terms(entry);
        if terms.is_empty() || pages.is_empty() {
            return self.fallback(pages, ctx);
        }

        let scored: Vec<(f32, Vec<String>)> = pages
            .iter()
            .map(|page| self.score_page(&terms, page))
            .collect();

        let best = scored
            .iter()
            .enumerate()
            .filter(|(_, (score, _))| *score >= self.config.match_threshold)
            .fold(None::<(usize, f32)>, |best, (i, (score, _))| match best {
                Some((_, best_score)) if best_score >= *score => best,
                _ => Some((i, *score)),
            });

        let Some((best_index, best_score)) = best else {
            return self.fallback(pages, ctx);
        };

        let best_page = &pages[best_index];
        let neighbour_floor = self.config.match_threshold * self.config.adjacent_ratio;
        let neighbour = |absolute: u32| {
            pages
                .iter()
                .position(|p| p.absolute_page == absolute)
                .filter(|&i| scored[i].0 >= neighbour_floor)
                .map(|i| &pages[i])
        };

        let first = best_page
            .absolute_page
            .checked_sub(1)
            .and_then(|p| neighbour(p))
            .unwrap_or(best_page);
        let last = neighbour(best_page.absolute_page + 1).unwrap_or(best_page);

        let max_score: f32 = terms.iter().map(|t| t.weight).sum();
        let confidence = if max_score > 0.0 {
            best_score / max_score
        } else {
            0.0
        };

        let mut citation = self.page_citation(first, ctx).with_confidence(confidence);
        if last.absolute_page != first.absolute_page {
            let end_relative = self.page_citation(last, ctx).relative_page;
            citation = citation.with_end(end_relative, last.absolute_page);
        }

        MatchResult {
            citation: Some(citation),
            score: best_score,
            matched_terms: scored[best_index].1.clone(),
            method: MatchMethod::SearchMatch,
        }
    }

    /// Citation for a matched page. Printed exhibit markers win over the
    /// PDF layer's own page numbering.
    fn page_citation(&self, page: &PageText, ctx: &ExhibitContext) -> Citation {
        let detection = self.detector.detect(page, ctx);
        let mut citation = Citation::new(page.absolute_page).with_source_type(detection.source_type);

        let exhibit = detection
            .exhibit_id
            .clone()
            .filter(|_| detection.is_printed())
            .unwrap_or_else(|| page.exhibit_id.clone());
        let relative = match detection.relative_page {
            Some(rel) if detection.is_printed() => Some(rel),
            _ if page.relative_page > 0 => Some(page.relative_page),
            _ => detection.relative_page,
        };

        if let Some(rel) = relative {
            if !exhibit.is_empty() {
                citation = citation.with_exhibit(exhibit, rel);
            }
        }
        if let Some(total) = detection.total_pages {
            citation = citation.with_total_pages(total);
        }
        if let Some(bates) = detection.bates_number {
            citation.bates_number = Some(bates);
        }
        citation
    }

    fn fallback(&self, pages: &[PageText], ctx: &ExhibitContext) -> MatchResult {
        let first_page = ctx
            .start_page
            .or_else(|| pages.iter().map(|p| p.absolute_page).min());

        let citation = first_page.map(|abs| {
            let citation = Citation::new(abs).estimated().with_confidence(FALLBACK_CONFIDENCE);
            if ctx.exhibit_id.is_empty() {
                citation
            } else {
                citation.with_exhibit(ctx.exhibit_id.clone(), 1)
            }
        });

        MatchResult {
            citation,
            score: 0.0,
            matched_terms: Vec::new(),
            method: MatchMethod::Fallback,
        }
    }

    fn search_terms(&self, entry: &Entry) -> Vec<SearchTerm> {
        let mut terms = Vec::new();

        let date = entry.date.trim();
        if !is_stop_term(date) {
            terms.push(SearchTerm {
                text: date.to_string(),
                weight: DATE_WEIGHT,
                kind: TermKind::Date(date_renderings(date)),
            });
        }

        for name in [&entry.provider, &entry.facility] {
            if let Some(term) = self.fuzzy_term(name, NAME_WEIGHT) {
                terms.push(term);
            }
        }

        let details = |needles: &[&str]| -> Vec<String> {
            entry
                .occurrence_treatment
                .iter()
                .filter(|(key, _)| {
                    let key = key.to_lowercase();
                    needles.iter().any(|n| key.contains(n))
                })
                .flat_map(|(_, value)| value_items(value))
                .collect()
        };

        for items in [
            details(&["diagnos", "impression"]),
            details(&["procedure", "surgery"]),
        ] {
            terms.extend(
                items
                    .iter()
                    .filter_map(|item| self.fuzzy_term(item, DETAIL_WEIGHT))
                    .take(MAX_DETAIL_TERMS),
            );
        }

        terms
    }

    fn fuzzy_term(&self, text: &str, weight: f32) -> Option<SearchTerm> {
        let trimmed = text.trim();
        if is_stop_term(trimmed) || trimmed.chars().count() < self.config.min_term_chars {
            return None;
        }
        let word = (trimmed.chars().count() <= self.config.word_boundary_max_chars)
            .then(|| Regex::new(&format!(r"(?i)\b{}\b", regex::escape(trimmed))).ok())
            .flatten();
        Some(SearchTerm {
            text: trimmed.to_string(),
            weight,
            kind: TermKind::Fuzzy {
                normalized: normalize(trimmed),
                word,
            },
        })
    }

    fn score_page(&self, terms: &[SearchTerm], page: &PageText) -> (f32, Vec<String>) {
        let lower = page.text.to_lowercase();
        let normalized = normalize(&page.text);
        let mut score = 0.0;
        let mut matched = Vec::new();

        for term in terms {
            let hit = match &term.kind {
                TermKind::Date(renderings) => renderings.iter().any(|r| lower.contains(r.as_str())),
                TermKind::Fuzzy {
                    normalized: term_normalized,
                    word,
                } => fuzzy_contains(term_normalized, word.as_ref(), &page.text, &normalized),
            };
            if hit {
                score += term.weight;
                matched.push(term.text.clone());
            }
        }

        (score, matched)
    }

}

fn fuzzy_contains(
    normalized_term: &str,
    word: Option<&Regex>,
    raw: &str,
    normalized_page: &str,
) -> bool {
    if !normalized_term.is_empty() && normalized_page.contains(normalized_term) {
        return true;
    }
    word.is_some_and(|re| re.is_match(raw))
}

fn is_stop_term(term: &str) -> bool {
    STOP_TERMS.contains(&term.to_lowercase().as_str())
}

/// Lowercase, punctuation to spaces, whitespace collapsed.
fn normalize(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Every common rendering of a date, lowercased. Unparseable dates only
/// match themselves.
fn date_renderings(date: &str) -> Vec<String> {
    let mut renderings = vec![date.to_lowercase()];
    if let Some(parsed) = parse_date(date) {
        for fmt in DATE_OUTPUT_FORMATS {
            let rendered = parsed.format(fmt).to_string().to_lowercase();
            if !renderings.contains(&rendered) {
                renderings.push(rendered);
            }
        }
    }
    renderings
}

/// Text items from a content value: array elements, or a string split on
/// semicolons and commas.
fn value_items(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) => s
            .split([';', ',', '\n'])
            .map(|part| part.trim().to_string())
            .filter(|part| !part.is_empty())
            .collect(),
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .map(|s| s.trim().to_string())
            .collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::entry::VisitType;

    fn pages() -> Vec<PageText> {
        vec![
            PageText::new("3F", 200, 1, "Intake form. Demographics only."),
            PageText::new(
                "3F",
                201,
                2,
                "01/15/2024 Dr. Smith at Mercy Hospital. Assessment: lumbar radiculopathy",
            ),
            PageText::new("3F", 202, 3, "Continued: lumbar radiculopathy, seen 01/15/2024"),
            PageText::new("3F", 203, 4, "Billing."),
        ]
    }

    fn entry() -> Entry {
        Entry::new("2024-01-15", "3F")
            .with_provider("Dr. Smith")
            .with_facility("Mercy Hospital")
            .with_visit_type(VisitType::OfficeVisit)
            .with_field("diagnoses", "Lumbar radiculopathy; hypertension")
    }

    #[test]
    fn test_best_page_with_adjacent_extension() {
        let ctx = ExhibitContext::new("3F").with_bounds(200, 203);
        let result = CitationMatcher::default().match_entry(&entry(), &pages(), &ctx);

        assert_eq!(result.method, MatchMethod::SearchMatch);
        assert_eq!(result.score, 8.0);
        assert!(result.matched_terms.contains(&"Mercy Hospital".to_string()));

        let citation = result.citation.unwrap();
        assert_eq!(citation.format(), "3F@2-3 (pp.201-202)");
        assert!(!citation.is_estimated);
        assert!(citation.confidence > 0.0 && citation.confidence <= 1.0);
    }

    #[test]
    fn test_fallback_when_nothing_qualifies() {
        let ctx = ExhibitContext::new("3F").with_bounds(200, 203);
        let unrelated = Entry::new("1999-12-31", "3F").with_provider("Dr. Nobody");
        let result = CitationMatcher::default().match_entry(&unrelated, &pages(), &ctx);

        assert_eq!(result.method, MatchMethod::Fallback);
        assert_eq!(result.score, 0.0);
        let citation = result.citation.unwrap();
        assert!(citation.is_estimated);
        assert_eq!(citation.absolute_page, 200);
        assert_eq!(citation.format(), "3F@~1 (p.200)");
    }

    #[test]
    fn test_fallback_without_any_page_info() {
        let result = CitationMatcher::default().match_entry(
            &entry(),
            &[],
            &ExhibitContext::new("3F"),
        );
        assert_eq!(result.method, MatchMethod::Fallback);
        assert!(result.citation.is_none());
    }

    #[test]
    fn test_stop_terms_and_short_terms_skipped() {
        let matcher = CitationMatcher::default();
        let e = Entry::new("2024-01-15", "1F")
            .with_provider("Unknown")
            .with_facility("ER")
            .with_field("diagnoses", json_list(&["N/A", "low back pain"]));
        let terms: Vec<_> = matcher.search_terms(&e).into_iter().map(|t| t.text).collect();
        assert_eq!(terms, vec!["2024-01-15", "low back pain"]);
    }

    #[test]
    fn test_date_renderings() {
        let renderings = date_renderings("2024-01-05");
        assert!(renderings.contains(&"01/05/2024".to_string()));
        assert!(renderings.contains(&"1/5/2024".to_string()));
        assert!(renderings.contains(&"january 5, 2024".to_string()));
        assert_eq!(date_renderings("sometime in 2019"), vec!["sometime in 2019"]);
    }

    #[test]
    fn test_word_boundary_for_short_terms() {
        let matcher = CitationMatcher::default();
        let short = matcher.fuzzy_term("Dr. Lee", NAME_WEIGHT).unwrap();
        let long = matcher.fuzzy_term("Smithsonian Clinic", NAME_WEIGHT).unwrap();
        assert!(matches!(&short.kind, TermKind::Fuzzy { word: Some(_), .. }));
        assert!(matches!(&long.kind, TermKind::Fuzzy { word: None, .. }));

        let page = PageText::new("1F", 1, 1, "Seen by Dr. Lee today");
        let (score, matched) = matcher.score_page(std::slice::from_ref(&short), &page);
        assert_eq!(score, NAME_WEIGHT);
        assert_eq!(matched, vec!["Dr. Lee"]);

        // Long terms only match as normalized substrings
        let page = PageText::new("1F", 1, 1, "SmithsonianClinic annex");
        assert_eq!(matcher.score_page(&[long], &page).0, 0.0);
    }

    fn json_list(items: &[&str]) -> Value {
        Value::Array(items.iter().map(|s| Value::String(s.to_string())).collect())
    }
}
