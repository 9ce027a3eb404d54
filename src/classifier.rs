//! Intent classification
//!
//! Classifies a request prompt into one of the closed task categories:
//! - Compliance: ratio / threshold calculations over document figures
//! - Query: informational questions about document contents
//!
//! `None` means the intent could not be determined; callers must not
//! substitute a default.

use crate::gemini::LanguageModel;
use crate::models::TaskCategory;
use crate::Result;
use std::sync::Arc;
use tracing::debug;

#[async_trait::async_trait]
pub trait IntentClassifier: Send + Sync {
    async fn classify(&self, prompt: &str) -> Result<Option<TaskCategory>>;
}

/// Static keyword lists
const COMPLIANCE_KEYWORDS: &[&str] = &[
    // Ratios
    "ratio", "ratios", "debt to equity", "current ratio", "quick ratio",
    "return on", "margin", "coverage", "leverage",
    // Compliance language
    "compliance", "compliant", "covenant", "regulatory", "threshold", "limit",
    // Comparisons
    "below", "above", "exceed", "less than", "greater than", "at least", "at most",
    // Calculation verbs
    "calculate", "compute",
];

const QUERY_KEYWORDS: &[&str] = &[
    // Questions
    "what", "who", "when", "where", "which", "how", "tell me",
    // Info seeking
    "summarize", "summary", "explain", "describe", "list", "show", "find", "mention",
];

fn words(text: &str) -> impl Iterator<Item = &str> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
}

/// Whether the keyword's words occur contiguously in `tokens`.
fn contains_phrase(tokens: &[&str], keyword: &str) -> bool {
    let phrase: Vec<&str> = words(keyword).collect();
    !phrase.is_empty() && tokens.windows(phrase.len()).any(|window| window == phrase.as_slice())
}

/// Deterministic keyword scoring classifier
pub struct KeywordIntentClassifier;

impl KeywordIntentClassifier {
    pub fn classify_text(prompt: &str) -> Option<TaskCategory> {
        let text = prompt.to_lowercase();
        let tokens: Vec<&str> = words(&text).collect();

        let score = |keywords: &[&str]| {
            keywords
                .iter()
                .filter(|kw| contains_phrase(&tokens, kw))
                .count()
        };
        let compliance_score = score(COMPLIANCE_KEYWORDS);
        let query_score = score(QUERY_KEYWORDS);

        debug!(compliance_score, query_score, "Keyword intent scores");

        if compliance_score == 0 && query_score == 0 {
            None
        } else if compliance_score >= 2 || compliance_score > query_score {
            Some(TaskCategory::Compliance)
        } else {
            Some(TaskCategory::Query)
        }
    }
}

#[async_trait::async_trait]
impl IntentClassifier for KeywordIntentClassifier {
    async fn classify(&self, prompt: &str) -> Result<Option<TaskCategory>> {
        Ok(Self::classify_text(prompt))
    }
}

/// Asks the language model for a single category word.
pub struct LlmIntentClassifier {
    model: Arc<dyn LanguageModel>,
}

impl LlmIntentClassifier {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    fn build_prompt(prompt: &str) -> String {
        format!(
            r#"Classify this financial document request into exactly one category.

Categories:
- compliance: calculating a financial ratio or checking a value against a regulatory threshold
- query: answering a question about the contents of the documents

Request: {}

Respond with only one word: compliance or query."#,
            prompt
        )
    }

    /// Only an exact category word is accepted.
    fn parse_answer(answer: &str) -> Option<TaskCategory> {
        let word = answer
            .trim()
            .trim_matches(|c: char| !c.is_alphanumeric())
            .to_lowercase();

        match word.as_str() {
            "compliance" => Some(TaskCategory::Compliance),
            "query" => Some(TaskCategory::Query),
            _ => None,
        }
    }
}

#[async_trait::async_trait]
impl IntentClassifier for LlmIntentClassifier {
    async fn classify(&self, prompt: &str) -> Result<Option<TaskCategory>> {
        let answer = self.model.complete(&Self::build_prompt(prompt), 10).await?;
        let category = Self::parse_answer(&answer);
        debug!(answer = %answer.trim(), ?category, "Model intent classification");
        Ok(category)
    }
}
