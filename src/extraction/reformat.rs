//! Language-model reformatting of layout output into the structured shape

use super::layout::LayoutAnalysis;
use crate::gemini::strip_code_fence;
use crate::models::{ExtractedPayload, StructuredFields};
use serde_json::{Map, Value};

const TEXT_LIMIT: usize = 4000;

pub const MAX_TOKENS: u32 = 4000;

pub fn build_prompt(analysis: &LayoutAnalysis) -> String {
    let text: String = analysis.text().chars().take(TEXT_LIMIT).collect();
    let key_values = serde_json::to_string_pretty(&Value::Object(analysis.key_values()))
        .unwrap_or_else(|_| "{}".to_string());

    format!(
        r#"Analyze this extracted financial document data and structure it as JSON.

Extracted Text:
{}

Key-Value Pairs:
{}

Pages: {}
Tables Found: {}

Return a JSON object with exactly these sections:
1. document_summary: brief summary of the document type and purpose
2. key_financial_metrics: important financial numbers, ratios and metrics
3. entities: companies, people, dates, addresses mentioned
4. tables_summary: summary of any tables found
5. compliance_relevant_data: data relevant for compliance calculations

Use snake_case metric names and plain numbers. Return only valid JSON."#,
        text,
        key_values,
        analysis.page_count(),
        analysis.table_count()
    )
}

fn text_field(object: &Map<String, Value>, name: &str) -> String {
    match object.get(name) {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn map_field(object: &Map<String, Value>, name: &str) -> Map<String, Value> {
    match object.get(name) {
        Some(Value::Object(map)) => map.clone(),
        _ => Map::new(),
    }
}

/// A JSON object becomes a structured payload; anything else is kept as text.
pub fn parse_payload(response: &str) -> ExtractedPayload {
    match serde_json::from_str::<Value>(strip_code_fence(response)) {
        Ok(Value::Object(object)) => ExtractedPayload::Structured(StructuredFields {
            document_summary: text_field(&object, "document_summary"),
            key_financial_metrics: map_field(&object, "key_financial_metrics"),
            entities: map_field(&object, "entities"),
            tables_summary: text_field(&object, "tables_summary"),
            compliance_relevant_data: map_field(&object, "compliance_relevant_data"),
        }),
        _ => ExtractedPayload::TextResponse {
            response: response.trim().to_string(),
        },
    }
}
