//! Compliance capability
//!
//! Plans a formula for the prompt, resolves its parameters from the
//! extracted records and evaluates it through `calculate_compliance`.

use super::{fetch_document_data, DocumentData};
use crate::error::OrchestrationError;
use crate::models::{DocumentId, TenantId};
use crate::planner::{FormulaPlan, FormulaPlanner};
use crate::tools::{ToolDispatcher, ToolName};
use crate::Result;
use chrono::Utc;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{json, Map, Number, Value};
use std::sync::Arc;
use tracing::{debug, info};

/// Sections searched for parameter values, in priority order.
const SEARCH_SECTIONS: [&str; 3] = ["financial_metrics", "compliance_data", "entities"];

lazy_static! {
    static ref FIRST_NUMBER: Option<Regex> = Regex::new(r"-?\d+(?:\.\d+)?").ok();
}

pub struct ComplianceCapability {
    tools: Arc<ToolDispatcher>,
    planner: Arc<dyn FormulaPlanner>,
}

impl ComplianceCapability {
    pub fn new(tools: Arc<ToolDispatcher>, planner: Arc<dyn FormulaPlanner>) -> Self {
        Self { tools, planner }
    }

    pub async fn run(
        &self,
        tenant_id: &TenantId,
        prompt: &str,
        document_ids: &[DocumentId],
    ) -> Result<Value> {
        let documents = fetch_document_data(&self.tools, tenant_id, document_ids).await?;
        let plan = self.planner.plan(prompt).await?;
        info!(formula = %plan.formula, documents = documents.len(), "Planned compliance check");

        let parameters = resolve_parameters(&plan.parameters, &documents)?;

        let calculation = self
            .tools
            .call(
                ToolName::CalculateCompliance,
                tenant_id,
                &json!({
                    "formula": plan.formula,
                    "parameters": parameters,
                    "threshold": plan.threshold,
                }),
            )
            .await?;

        Ok(build_report(prompt, &plan, &documents, &parameters, &calculation))
    }
}

/// Every planned parameter must be found in at least one document.
pub fn resolve_parameters(
    names: &[String],
    documents: &[DocumentData],
) -> Result<Map<String, Value>> {
    let mut found = Map::new();
    let mut missing = Vec::new();

    for name in names {
        match find_value(name, documents).and_then(Number::from_f64) {
            Some(value) => {
                debug!(parameter = %name, value = %value, "Resolved parameter");
                found.insert(name.clone(), Value::Number(value));
            }
            None => missing.push(name.as_str()),
        }
    }

    if !missing.is_empty() {
        return Err(OrchestrationError::Input(format!(
            "Could not find required parameters in documents: {}",
            missing.join(", ")
        )));
    }

    Ok(found)
}

fn find_value(name: &str, documents: &[DocumentData]) -> Option<f64> {
    documents.iter().find_map(|document| {
        SEARCH_SECTIONS
            .iter()
            .filter_map(|section| document.section(section))
            .find_map(|section| lookup(section, name).and_then(numeric_value))
    })
}

/// Tries the name as-is, with spaces, without underscores, then ignoring case.
fn lookup<'a>(section: &'a Map<String, Value>, name: &str) -> Option<&'a Value> {
    let variations = [
        name.to_string(),
        name.replace('_', " "),
        name.replace('_', ""),
    ];

    variations
        .iter()
        .find_map(|v| section.get(v))
        .or_else(|| {
            section.iter().find_map(|(key, value)| {
                variations
                    .iter()
                    .any(|v| key.eq_ignore_ascii_case(v))
                    .then_some(value)
            })
        })
}

/// Numbers pass through; strings like "$1,500,000" or "12.5%" are cleaned.
pub fn numeric_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|f| f.is_finite()),
        Value::String(s) => {
            let percent = s.contains('%');
            let cleaned: String = s.chars().filter(|c| !matches!(c, '$' | ',' | '%')).collect();
            let number: f64 = FIRST_NUMBER
                .as_ref()?
                .find(&cleaned)?
                .as_str()
                .parse()
                .ok()?;
            Some(if percent { number / 100.0 } else { number })
        }
        _ => None,
    }
}

fn build_report(
    prompt: &str,
    plan: &FormulaPlan,
    documents: &[DocumentData],
    parameters: &Map<String, Value>,
    calculation: &Value,
) -> Value {
    let status = calculation["compliance_status"].as_str().unwrap_or("calculated");
    let result = calculation["result"].as_f64();

    json!({
        "request_summary": {
            "original_prompt": prompt,
            "calculation_type": plan.description,
            "documents_analyzed": documents.len(),
            "timestamp": Utc::now().to_rfc3339(),
        },
        "calculation_details": {
            "formula": plan.formula,
            "parameters_found": parameters,
            "result": calculation["result"],
            "success": true,
        },
        "compliance_assessment": {
            "status": status,
            "threshold": plan.threshold,
            "meets_compliance": calculation["meets_threshold"],
        },
        "document_sources": documents
            .iter()
            .map(|d| json!({
                "document_id": d.document_id,
                "filename": d.filename,
                "document_type": d.document_type,
            }))
            .collect::<Vec<_>>(),
        "recommendations": recommendations(status, result, &plan.description),
    })
}

fn recommendations(status: &str, result: Option<f64>, description: &str) -> Vec<&'static str> {
    let mut out = Vec::new();

    match status {
        "non_compliant" => {
            out.push("The calculated ratio does not meet the specified compliance threshold");
            out.push("Review financial position and consider corrective actions");
        }
        "compliant" => {
            out.push("The calculated ratio meets the compliance requirements");
            out.push("Continue monitoring this metric regularly");
        }
        _ => {}
    }

    let description = description.to_lowercase();
    if let Some(result) = result {
        if description.contains("debt") && description.contains("equity") {
            if result > 2.0 {
                out.push("High debt-to-equity ratio indicates higher financial risk");
            } else if result < 0.5 {
                out.push("Low debt-to-equity ratio indicates conservative financial structure");
            }
        }
    }

    out
}
