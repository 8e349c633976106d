//! LLM prompts for chronology extraction.
//!
//! Field schemas are rendered from the [`SchemaRegistry`] so the model is
//! only shown the visit types the text plausibly contains.

use crate::types::schema::{visit_type_names, SchemaRegistry, VisitSchema};

/// Default system prompt for every extraction call.
pub const SYSTEM_PROMPT: &str = "You are a meticulous medical-legal records analyst. \
You extract dated medical events from case exhibits and respond with JSON only.";

/// Prompt for extracting entries from exhibit text.
pub const TEXT_EXTRACT_PROMPT: &str = r#"Extract every dated medical event from exhibit {exhibit} below.

Return a JSON array. Each element:
{
    "date": "YYYY-MM-DD (required; skip events with no date)",
    "provider": "treating provider name, or \"Not Specified\"",
    "facility": "facility name, or \"Not Specified\"",
    "visit_type": one of [{visit_types}],
    "occurrence_treatment": { fields for the visit type, see below },
    "exhibit_reference": "{exhibit}",
    "page_range": "page number(s) where the event appears, if printed"
}

Fields per visit type:
{schemas}

Rules:
- One element per distinct encounter; do not merge different dates.
- Copy clinical details verbatim where possible; leave a field out rather than guess.
- Output the JSON array only, no commentary.
{continuation_note}
Exhibit text:
{text}"#;

/// Prompt for extracting entries from page images.
pub const VISION_EXTRACT_PROMPT: &str = r#"These images are pages {pages} of exhibit {exhibit}.

Read every page, including handwriting and scanned forms, and extract every dated medical event.

Return a JSON array. Each element:
{
    "date": "YYYY-MM-DD (required; skip events with no date)",
    "provider": "treating provider name, or \"Not Specified\"",
    "facility": "facility name, or \"Not Specified\"",
    "visit_type": one of [{visit_types}],
    "occurrence_treatment": { fields for the visit type, see below },
    "exhibit_reference": "{exhibit}"
}

Fields per visit type:
{schemas}

Output the JSON array only, no commentary."#;

/// Note added when a chunk is not the first slice of its exhibit.
pub const CONTINUATION_NOTE: &str = "\nThis text continues an earlier part of the same exhibit \
(part {part} of {total}). Events may begin before this excerpt; extract what is present.\n";

/// Note added when two adjacent chunks are merged for a retry.
pub const MERGED_RETRY_NOTE: &str = "\nThe text spans a boundary between two excerpts, marked \
\"--- CONTINUATION ---\". Events split across it should be extracted once, with all details.\n";

fn format_schemas(schemas: &[&VisitSchema]) -> String {
    schemas
        .iter()
        .map(|schema| {
            let fields = schema
                .fields
                .iter()
                .map(|f| format!("    \"{}\": {}", f.name, f.description))
                .collect::<Vec<_>>()
                .join("\n");
            format!("- {} ({}):\n{}", schema.visit_type, schema.description, fields)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_visit_types(registry: &SchemaRegistry) -> String {
    visit_type_names(registry)
        .iter()
        .map(|v| format!("\"{}\"", v))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Format the text extraction prompt.
///
/// `part` is `Some((index, total))` for chunked input.
pub fn format_text_prompt(
    registry: &SchemaRegistry,
    exhibit_id: &str,
    text: &str,
    part: Option<(usize, usize)>,
) -> String {
    let schemas = registry.select_for_text(text);
    let continuation_note = match part {
        Some((index, total)) if index > 0 => CONTINUATION_NOTE
            .replace("{part}", &(index + 1).to_string())
            .replace("{total}", &total.to_string()),
        _ => String::new(),
    };

    TEXT_EXTRACT_PROMPT
        .replace("{visit_types}", &format_visit_types(registry))
        .replace("{schemas}", &format_schemas(&schemas))
        .replace("{continuation_note}", &continuation_note)
        .replace("{exhibit}", exhibit_id)
        .replace("{text}", text)
}

/// Format the prompt for a merged-chunk retry.
pub fn format_merged_retry_prompt(registry: &SchemaRegistry, exhibit_id: &str, text: &str) -> String {
    let schemas = registry.select_for_text(text);

    TEXT_EXTRACT_PROMPT
        .replace("{visit_types}", &format_visit_types(registry))
        .replace("{schemas}", &format_schemas(&schemas))
        .replace("{continuation_note}", MERGED_RETRY_NOTE)
        .replace("{exhibit}", exhibit_id)
        .replace("{text}", text)
}

/// Format the vision extraction prompt for one batch of pages.
pub fn format_vision_prompt(registry: &SchemaRegistry, exhibit_id: &str, pages: &[u32]) -> String {
    let schemas: Vec<&VisitSchema> = registry.schemas().collect();
    let pages_text = match (pages.first(), pages.last()) {
        (Some(first), Some(last)) if first != last => format!("{}-{}", first, last),
        (Some(first), _) => first.to_string(),
        _ => "(unnumbered)".to_string(),
    };

    VISION_EXTRACT_PROMPT
        .replace("{visit_types}", &format_visit_types(registry))
        .replace("{schemas}", &format_schemas(&schemas))
        .replace("{pages}", &pages_text)
        .replace("{exhibit}", exhibit_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_prompt_includes_selected_schemas() {
        let registry = SchemaRegistry::builtin();
        let prompt = format_text_prompt(
            &registry,
            "4F",
            "CT scan of chest. Impression: no acute findings",
            None,
        );

        assert!(prompt.contains("exhibit 4F"));
        assert!(prompt.contains("- imaging"));
        assert!(!prompt.contains("- surgery"));
        assert!(prompt.contains("\"office_visit\""));
        assert!(!prompt.contains("{text}"));
        assert!(!prompt.contains("part 1 of"));
    }

    #[test]
    fn test_continuation_note_only_for_later_chunks() {
        let registry = SchemaRegistry::builtin();
        let later = format_text_prompt(&registry, "4F", "text", Some((1, 3)));
        assert!(later.contains("part 2 of 3"));

        let first = format_text_prompt(&registry, "4F", "text", Some((0, 3)));
        assert!(!first.contains("part 1 of 3"));
    }

    #[test]
    fn test_exhibit_text_is_not_templated() {
        let registry = SchemaRegistry::builtin();
        let prompt = format_text_prompt(&registry, "4F", "literal {exhibit} in record", None);
        assert!(prompt.ends_with("literal {exhibit} in record"));
    }

    #[test]
    fn test_vision_prompt_page_range() {
        let registry = SchemaRegistry::builtin();
        assert!(format_vision_prompt(&registry, "2F", &[10, 11, 12]).contains("pages 10-12"));
        assert!(format_vision_prompt(&registry, "2F", &[7]).contains("pages 7 of"));
    }
}
