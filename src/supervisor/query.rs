//! Question answering over extracted document data

use super::{fetch_document_data, DocumentData};
use crate::gemini::{strip_code_fence, LanguageModel};
use crate::models::{DocumentId, TenantId};
use crate::tools::ToolDispatcher;
use crate::Result;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

const CONTEXT_CHARS: usize = 8000;
const FALLBACK_CONTEXT_CHARS: usize = 6000;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Answer {
    pub answer: String,
    pub sources: Vec<String>,
    pub confidence: String,
    #[serde(default)]
    pub data_points: Vec<String>,
    #[serde(default)]
    pub limitations: Option<String>,
}

pub struct QueryCapability {
    tools: Arc<ToolDispatcher>,
    model: Arc<dyn LanguageModel>,
}

impl QueryCapability {
    pub fn new(tools: Arc<ToolDispatcher>, model: Arc<dyn LanguageModel>) -> Self {
        Self { tools, model }
    }

    pub async fn run(
        &self,
        tenant_id: &TenantId,
        prompt: &str,
        document_ids: &[DocumentId],
    ) -> Result<Value> {
        let documents = fetch_document_data(&self.tools, tenant_id, document_ids).await?;
        let context = build_context(&documents);

        let response = self.model.complete(&qa_prompt(prompt, &context), 2000).await?;
        let answer = match parse_answer(&response) {
            Some(answer) => answer,
            None => {
                warn!("Unstructured answer from model, retrying with plain prompt");
                self.plain_answer(prompt, &context, &documents).await?
            }
        };

        let confidence = adjusted_confidence(&answer.confidence, &documents);
        info!(documents = documents.len(), confidence, "Answered query");

        Ok(json!({
            "answer": answer,
            "documents_analyzed": documents.len(),
            "confidence": confidence,
        }))
    }

    async fn plain_answer(
        &self,
        prompt: &str,
        context: &str,
        documents: &[DocumentData],
    ) -> Result<Answer> {
        let simple = format!(
            r#"Based on the following financial document data, answer this question: {}

Document Data:
{}

Provide a clear, factual answer. If the information is not available, state this clearly."#,
            prompt,
            truncate(context, FALLBACK_CONTEXT_CHARS)
        );

        let text = self.model.complete(&simple, 1000).await?;

        Ok(Answer {
            answer: text.trim().to_string(),
            sources: documents.iter().map(|d| d.filename.clone()).collect(),
            confidence: "medium".to_string(),
            data_points: vec!["Extracted from document analysis".to_string()],
            limitations: Some("Simplified response due to processing constraints".to_string()),
        })
    }
}

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn pretty(value: Option<&serde_json::Map<String, Value>>) -> String {
    value
        .and_then(|m| serde_json::to_string_pretty(m).ok())
        .unwrap_or_else(|| "{}".to_string())
}

pub fn build_context(documents: &[DocumentData]) -> String {
    let parts: Vec<String> = documents
        .iter()
        .map(|doc| {
            let summary = doc
                .data
                .get("document_summary")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .unwrap_or("No summary available");

            format!(
                "Document: {} (ID: {})\nType: {}\n\nSummary: {}\n\nKey Financial Metrics:\n{}\n\nEntities:\n{}\n\nCompliance Data:\n{}\n",
                doc.filename,
                doc.document_id,
                doc.document_type,
                summary,
                pretty(doc.section("financial_metrics")),
                pretty(doc.section("entities")),
                pretty(doc.section("compliance_data")),
            )
        })
        .collect();

    truncate(&parts.join("\n\n"), CONTEXT_CHARS).to_string()
}

fn qa_prompt(prompt: &str, context: &str) -> String {
    format!(
        r#"You are a financial document analysis assistant. Answer the user's question based on the provided document data.

User Question: {}

Document Context:
{}

Instructions:
1. Provide a clear, accurate answer based on the document data
2. If the information is not available in the documents, clearly state this
3. Include specific references to document names when citing information
4. For numerical data, provide exact values when available
5. If the question requires calculations, show your work

Format your response as JSON with these fields:
{{
    "answer": "Your detailed answer here",
    "sources": ["list of document filenames that provided the information"],
    "confidence": "high/medium/low based on data availability",
    "data_points": ["key data points used in the answer"],
    "limitations": "any limitations or missing information"
}}"#,
        prompt, context
    )
}

/// Requires answer, sources and confidence.
fn parse_answer(response: &str) -> Option<Answer> {
    serde_json::from_str(strip_code_fence(response)).ok()
}

/// Caps the model's own confidence by the share of documents with figures.
pub fn adjusted_confidence(model_confidence: &str, documents: &[DocumentData]) -> &'static str {
    if documents.is_empty() {
        return "low";
    }

    let with_figures = documents.iter().filter(|d| d.has_figures()).count();
    let ratio = with_figures as f64 / documents.len() as f64;
    let claimed = model_confidence.trim().to_lowercase();

    if ratio >= 0.8 && claimed == "high" {
        "high"
    } else if ratio >= 0.5 && (claimed == "high" || claimed == "medium") {
        "medium"
    } else {
        "low"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn document(metrics: Value) -> DocumentData {
        DocumentData {
            document_id: "doc-1".into(),
            filename: "annual.pdf".into(),
            document_type: "pdf".into(),
            data: json!({
                "document_summary": "FY24 annual report",
                "financial_metrics": metrics,
                "compliance_data": {},
                "entities": {"company": "Acme"},
            })
            .as_object()
            .cloned()
            .unwrap(),
        }
    }

    #[test]
    fn test_parse_answer_requires_fields() {
        let full = r#"{"answer": "Revenue was 10M", "sources": ["annual.pdf"], "confidence": "high"}"#;
        let answer = parse_answer(full).unwrap();
        assert_eq!(answer.answer, "Revenue was 10M");
        assert!(answer.data_points.is_empty());

        assert!(parse_answer(r#"{"answer": "x", "confidence": "high"}"#).is_none());
        assert!(parse_answer("Revenue was 10M").is_none());
    }

    #[test]
    fn test_confidence_adjustment() {
        let rich = vec![document(json!({"revenue": 10}))];
        let mixed = vec![document(json!({"revenue": 10})), document(json!({}))];

        assert_eq!(adjusted_confidence("high", &rich), "high");
        assert_eq!(adjusted_confidence("HIGH", &mixed), "medium");
        assert_eq!(adjusted_confidence("medium", &rich), "medium");
        assert_eq!(adjusted_confidence("low", &rich), "low");
        assert_eq!(adjusted_confidence("high", &[document(json!({}))]), "low");
    }

    #[test]
    fn test_context_is_bounded() {
        let big = json!({"notes": "x".repeat(20_000)});
        let context = build_context(&[document(big)]);
        assert_eq!(context.chars().count(), CONTEXT_CHARS);
        assert!(context.starts_with("Document: annual.pdf (ID: doc-1)"));
    }
}
