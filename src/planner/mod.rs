//! Formula planning
//!
//! Turns a compliance request into a formula template, the parameter names
//! it needs and an optional threshold. The model-backed planner falls back
//! to the rule-based one for the common regulatory ratios.

use crate::error::OrchestrationError;
use crate::formula::Comparator;
use crate::Result;
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

pub mod llm;
pub use llm::LlmFormulaPlanner;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormulaPlan {
    pub formula: String,
    pub parameters: Vec<String>,
    /// Threshold in evaluator syntax, e.g. "< 2.0"
    pub threshold: Option<String>,
    pub description: String,
}

/// Trait for formula planning
#[async_trait]
pub trait FormulaPlanner: Send + Sync {
    async fn plan(&self, prompt: &str) -> Result<FormulaPlan>;
}

lazy_static! {
    static ref THRESHOLD_PATTERNS: Vec<(Regex, Comparator)> = [
        (r"\bbelow\s+(\d+\.?\d*)", Comparator::LessThan),
        (r"\bless than\s+(\d+\.?\d*)", Comparator::LessThan),
        (r"\bunder\s+(\d+\.?\d*)", Comparator::LessThan),
        (r">\s*(\d+\.?\d*)", Comparator::GreaterThan),
        (r"<\s*(\d+\.?\d*)", Comparator::LessThan),
        (r"\babove\s+(\d+\.?\d*)", Comparator::GreaterThan),
        (r"\bgreater than\s+(\d+\.?\d*)", Comparator::GreaterThan),
        (r"\bover\s+(\d+\.?\d*)", Comparator::GreaterThan),
    ]
    .into_iter()
    .filter_map(|(pattern, comparator)| Regex::new(pattern).ok().map(|re| (re, comparator)))
    .collect();
}

/// First threshold phrase in the text, rendered as "< n" or "> n".
pub fn extract_threshold(text: &str) -> Option<String> {
    let lower = text.to_lowercase();

    THRESHOLD_PATTERNS.iter().find_map(|(re, comparator)| {
        re.captures(&lower).and_then(|caps| caps.get(1)).map(|value| {
            let op = match comparator {
                Comparator::LessThan => '<',
                Comparator::GreaterThan => '>',
            };
            format!("{} {}", op, value.as_str())
        })
    })
}

struct RatioRule {
    matches: fn(&str, &[&str]) -> bool,
    formula: &'static str,
    parameters: &'static [&'static str],
    description: &'static str,
}

const RATIO_RULES: &[RatioRule] = &[
    RatioRule {
        matches: |text, _| text.contains("debt") && text.contains("equity"),
        formula: "total_debt / total_equity",
        parameters: &["total_debt", "total_equity"],
        description: "Debt-to-Equity Ratio",
    },
    RatioRule {
        matches: |text, _| text.contains("current ratio"),
        formula: "current_assets / current_liabilities",
        parameters: &["current_assets", "current_liabilities"],
        description: "Current Ratio",
    },
    RatioRule {
        matches: |text, _| text.contains("quick ratio") || text.contains("acid test"),
        formula: "(current_assets - inventory) / current_liabilities",
        parameters: &["current_assets", "inventory", "current_liabilities"],
        description: "Quick Ratio",
    },
    RatioRule {
        matches: |text, words| text.contains("return on assets") || words.contains(&"roa"),
        formula: "net_income / total_assets",
        parameters: &["net_income", "total_assets"],
        description: "Return on Assets",
    },
    RatioRule {
        matches: |text, words| text.contains("return on equity") || words.contains(&"roe"),
        formula: "net_income / shareholders_equity",
        parameters: &["net_income", "shareholders_equity"],
        description: "Return on Equity",
    },
    RatioRule {
        matches: |text, _| text.contains("gross margin"),
        formula: "(revenue - cost_of_goods_sold) / revenue",
        parameters: &["revenue", "cost_of_goods_sold"],
        description: "Gross Margin",
    },
    RatioRule {
        matches: |text, _| text.contains("operating margin"),
        formula: "operating_income / revenue",
        parameters: &["operating_income", "revenue"],
        description: "Operating Margin",
    },
    RatioRule {
        matches: |text, _| text.contains("interest coverage") || text.contains("times interest earned"),
        formula: "ebit / interest_expense",
        parameters: &["ebit", "interest_expense"],
        description: "Interest Coverage",
    },
];

/// Deterministic planner for the common ratios
pub struct RuleBasedPlanner;

impl RuleBasedPlanner {
    pub fn plan_text(prompt: &str) -> Option<FormulaPlan> {
        let text = prompt.to_lowercase();
        let words: Vec<&str> = text
            .split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();

        RATIO_RULES
            .iter()
            .find(|rule| (rule.matches)(&text, &words))
            .map(|rule| FormulaPlan {
                formula: rule.formula.to_string(),
                parameters: rule.parameters.iter().map(|p| p.to_string()).collect(),
                threshold: extract_threshold(prompt),
                description: rule.description.to_string(),
            })
    }
}

#[async_trait]
impl FormulaPlanner for RuleBasedPlanner {
    async fn plan(&self, prompt: &str) -> Result<FormulaPlan> {
        Self::plan_text(prompt).ok_or_else(|| {
            OrchestrationError::Input(
                "Unable to determine the calculation requested".to_string(),
            )
        })
    }
}
