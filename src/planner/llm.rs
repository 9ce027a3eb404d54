//! Model-backed formula planner
//!
//! Asks the language model for a formula template and falls back to the
//! rule-based planner when the model is unavailable or answers with
//! something that is not a usable plan.

use super::{extract_threshold, FormulaPlan, FormulaPlanner, RuleBasedPlanner};
use crate::gemini::{strip_code_fence, LanguageModel};
use crate::Result;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

const MAX_TOKENS: u32 = 500;

#[derive(Debug, Deserialize)]
struct PlanReply {
    formula: Option<String>,
    #[serde(default)]
    parameters: Vec<String>,
    threshold: Option<String>,
    description: Option<String>,
}

pub struct LlmFormulaPlanner {
    model: Arc<dyn LanguageModel>,
}

impl LlmFormulaPlanner {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    fn build_prompt(prompt: &str) -> String {
        format!(
            r#"Analyze this financial compliance request and produce the calculation needed.

Request: "{}"

Identify:
1. The financial ratio or metric to calculate
2. The formula, using snake_case parameter names and only + - * / and parentheses
3. The parameters required by the formula
4. The compliance threshold, if one is mentioned, written as "< value" or "> value"

Respond in JSON format:
{{
  "formula": "total_debt / total_equity",
  "parameters": ["total_debt", "total_equity"],
  "threshold": "< 2.0",
  "description": "Debt-to-Equity Ratio"
}}

Respond with JSON only."#,
            prompt
        )
    }

    /// A plan needs a formula and at least one parameter.
    fn parse_reply(prompt: &str, response: &str) -> Option<FormulaPlan> {
        let reply: PlanReply = serde_json::from_str(strip_code_fence(response)).ok()?;

        let formula = reply.formula.filter(|f| !f.trim().is_empty())?;
        if reply.parameters.is_empty() {
            return None;
        }

        let threshold = reply
            .threshold
            .filter(|t| !t.trim().is_empty())
            .or_else(|| extract_threshold(prompt));

        Some(FormulaPlan {
            formula,
            parameters: reply.parameters,
            threshold,
            description: reply
                .description
                .unwrap_or_else(|| "Financial ratio".to_string()),
        })
    }
}

#[async_trait]
impl FormulaPlanner for LlmFormulaPlanner {
    async fn plan(&self, prompt: &str) -> Result<FormulaPlan> {
        match self.model.complete(&Self::build_prompt(prompt), MAX_TOKENS).await {
            Ok(response) => match Self::parse_reply(prompt, &response) {
                Some(plan) => {
                    debug!(formula = %plan.formula, "Model formula plan");
                    return Ok(plan);
                }
                None => warn!("Model returned an unusable formula plan, using rules"),
            },
            Err(e) => warn!(error = %e, "Formula planning model call failed, using rules"),
        }

        RuleBasedPlanner.plan(prompt).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::UpstreamKind;
    use crate::gemini::MockLanguageModel;

    #[tokio::test]
    async fn test_model_plan_is_used() {
        let model = MockLanguageModel::fixed(
            "```json\n{\"formula\": \"ebitda / interest_expense\", \"parameters\": [\"ebitda\", \"interest_expense\"], \"threshold\": \"> 4\", \"description\": \"EBITDA coverage\"}\n```",
        );
        let planner = LlmFormulaPlanner::new(Arc::new(model));

        let plan = planner.plan("Is EBITDA coverage above 4?").await.unwrap();
        assert_eq!(plan.formula, "ebitda / interest_expense");
        assert_eq!(plan.threshold.as_deref(), Some("> 4"));
    }

    #[tokio::test]
    async fn test_missing_threshold_taken_from_prompt() {
        let model = MockLanguageModel::fixed(
            r#"{"formula": "total_debt / total_equity", "parameters": ["total_debt", "total_equity"], "threshold": null}"#,
        );
        let planner = LlmFormulaPlanner::new(Arc::new(model));

        let plan = planner.plan("debt to equity below 1.5").await.unwrap();
        assert_eq!(plan.threshold.as_deref(), Some("< 1.5"));
        assert_eq!(plan.description, "Financial ratio");
    }

    #[tokio::test]
    async fn test_falls_back_to_rules() {
        let garbage = LlmFormulaPlanner::new(Arc::new(MockLanguageModel::fixed("I think so")));
        let plan = garbage.plan("What is our current ratio?").await.unwrap();
        assert_eq!(plan.formula, "current_assets / current_liabilities");

        let down = LlmFormulaPlanner::new(Arc::new(MockLanguageModel::failing(
            UpstreamKind::ServiceUnavailable,
        )));
        let plan = down.plan("gross margin above 0.3").await.unwrap();
        assert_eq!(plan.formula, "(revenue - cost_of_goods_sold) / revenue");
        assert_eq!(plan.threshold.as_deref(), Some("> 0.3"));

        let no_params = LlmFormulaPlanner::new(Arc::new(MockLanguageModel::fixed(
            r#"{"formula": "a / b", "parameters": []}"#,
        )));
        assert!(no_params.plan("something unrelated").await.is_err());
    }
}
