//! Compliance calculation tool

use super::{required_str, Tool, ToolName};
use crate::error::OrchestrationError;
use crate::formula;
use crate::models::TenantId;
use crate::Result;
use serde_json::{json, Map, Value};

/// Evaluates a formula template against named parameters.
pub struct CalculateComplianceTool;

#[async_trait::async_trait]
impl Tool for CalculateComplianceTool {
    fn name(&self) -> ToolName {
        ToolName::CalculateCompliance
    }

    fn description(&self) -> &'static str {
        "Evaluate an arithmetic formula over named numeric parameters and check it against an optional '<value' or '>value' threshold"
    }

    fn parameters(&self) -> Value {
        json!({
            "formula": "string (required), e.g. 'total_debt / total_equity'",
            "parameters": "object of name -> number (required)",
            "threshold": "string (optional), '<value' or '>value'"
        })
    }

    async fn execute(&self, _tenant_id: &TenantId, args: &Map<String, Value>) -> Result<Value> {
        let formula_text = required_str(args, "formula").map_err(|_| {
            OrchestrationError::Input("Missing formula or parameters".to_string())
        })?;

        let empty = Map::new();
        let parameters = match args.get("parameters") {
            Some(Value::Object(map)) => map,
            None | Some(Value::Null) => &empty,
            Some(_) => {
                return Err(OrchestrationError::Input(
                    "'parameters' must be an object of numbers".to_string(),
                ))
            }
        };

        let threshold = match args.get("threshold") {
            None | Some(Value::Null) => None,
            Some(Value::String(t)) => Some(t.as_str()),
            Some(other) => {
                return Err(OrchestrationError::Evaluation(format!(
                    "Unsupported threshold value {}",
                    other
                )))
            }
        };

        let outcome = formula::evaluate(formula_text, parameters, threshold)?;

        Ok(json!({
            "result": outcome.result,
            "compliance_status": outcome.compliance_status,
            "meets_threshold": outcome.meets_threshold,
            "formula_used": formula_text,
            "parameters_used": parameters,
            "threshold": threshold,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    async fn run(args: Value) -> Result<Value> {
        let tenant = TenantId::parse(Some("acme")).unwrap();
        CalculateComplianceTool
            .execute(&tenant, args.as_object().unwrap())
            .await
    }

    #[tokio::test]
    async fn test_echoes_inputs() {
        let data = run(json!({
            "formula": "total_debt / total_equity",
            "parameters": {"total_debt": 1500000, "total_equity": 1000000},
            "threshold": "< 2.0"
        }))
        .await
        .unwrap();

        assert_eq!(data["result"], 1.5);
        assert_eq!(data["compliance_status"], "compliant");
        assert_eq!(data["meets_threshold"], true);
        assert_eq!(data["formula_used"], "total_debt / total_equity");
        assert_eq!(data["parameters_used"]["total_debt"], 1500000);
        assert_eq!(data["threshold"], "< 2.0");
    }

    #[tokio::test]
    async fn test_missing_inputs() {
        let err = run(json!({"parameters": {"a": 1}})).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InputError);

        let err = run(json!({"formula": "a / b"})).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InputError);
    }

    #[tokio::test]
    async fn test_numeric_threshold_is_rejected() {
        let err = run(json!({"formula": "a", "parameters": {"a": 1}, "threshold": 2}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EvaluationError);
    }
}
