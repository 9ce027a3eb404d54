//! Compliance formula engine
//!
//! Formula templates arrive from a reasoning step outside our trust boundary.
//! Evaluation is therefore restricted to numeric literals, the four basic
//! operators and parentheses after parameter substitution.

mod parser;

pub use parser::evaluate_arithmetic;

use crate::error::OrchestrationError;
use crate::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ComplianceStatus {
    Calculated,
    Compliant,
    NonCompliant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    LessThan,
    GreaterThan,
}

/// Comparator plus numeric bound, written `<2.0` or `> 0.15`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Threshold {
    pub comparator: Comparator,
    pub bound: f64,
}

impl Threshold {
    pub fn is_met(&self, value: f64) -> bool {
        match self.comparator {
            Comparator::LessThan => value < self.bound,
            Comparator::GreaterThan => value > self.bound,
        }
    }
}

impl FromStr for Threshold {
    type Err = OrchestrationError;

    fn from_str(raw: &str) -> Result<Self> {
        let text = raw.trim();

        let (comparator, rest) = if let Some(rest) = text.strip_prefix('<') {
            (Comparator::LessThan, rest)
        } else if let Some(rest) = text.strip_prefix('>') {
            (Comparator::GreaterThan, rest)
        } else {
            return Err(OrchestrationError::Evaluation(format!(
                "Unsupported threshold syntax '{}': expected '<value' or '>value'",
                raw
            )));
        };

        if rest.starts_with('=') || rest.starts_with('<') || rest.starts_with('>') {
            return Err(OrchestrationError::Evaluation(format!(
                "Unsupported threshold comparator in '{}': only '<' and '>' are accepted",
                raw
            )));
        }

        let bound = rest.trim().parse::<f64>().ok().filter(|b| b.is_finite()).ok_or_else(|| {
            OrchestrationError::Evaluation(format!("Invalid threshold value in '{}'", raw))
        })?;

        Ok(Threshold { comparator, bound })
    }
}

impl fmt::Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self.comparator {
            Comparator::LessThan => '<',
            Comparator::GreaterThan => '>',
        };
        write!(f, "{} {}", op, self.bound)
    }
}

/// Blank thresholds count as absent.
pub fn parse_threshold(raw: Option<&str>) -> Result<Option<Threshold>> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(text) => text.parse().map(Some),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComplianceOutcome {
    pub result: f64,
    pub compliance_status: ComplianceStatus,
    pub meets_threshold: Option<bool>,
}

/// Characters allowed to reach the evaluator.
fn is_arithmetic_char(c: char) -> bool {
    c.is_ascii_digit() || matches!(c, '.' | '+' | '-' | '*' | '/' | '(' | ')') || c.is_whitespace()
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

/// Convert loosely-typed parameters into finite numbers.
pub fn numeric_parameters(parameters: &Map<String, Value>) -> Result<BTreeMap<String, f64>> {
    let mut numeric = BTreeMap::new();

    for (name, value) in parameters {
        if !is_identifier(name) {
            return Err(OrchestrationError::Input(format!(
                "Invalid parameter name '{}'",
                name
            )));
        }

        let number = value.as_f64().filter(|n| n.is_finite()).ok_or_else(|| {
            OrchestrationError::Input(format!("Parameter '{}' must be a finite number", name))
        })?;

        numeric.insert(name.clone(), number);
    }

    Ok(numeric)
}

fn literal(value: f64) -> String {
    // f64 Display never uses exponent notation, so the literal stays inside
    // the arithmetic character set.
    if value < 0.0 {
        format!("({})", value)
    } else {
        format!("{}", value)
    }
}

/// Replace every parameter name with its literal, longest names first so
/// `total_equity` is never clobbered by `equity`.
pub fn substitute(formula: &str, parameters: &BTreeMap<String, f64>) -> String {
    let mut names: Vec<&String> = parameters.keys().collect();
    names.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));

    let mut expression = formula.to_string();
    for name in names {
        expression = expression.replace(name.as_str(), &literal(parameters[name]));
    }

    expression
}

fn leftover_identifiers(expression: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut current = String::new();

    for c in expression.chars() {
        if c.is_ascii_alphanumeric() || c == '_' {
            current.push(c);
        } else if !current.is_empty() {
            names.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        names.push(current);
    }

    names.retain(|n| is_identifier(n));
    names.dedup();
    names
}

/// Evaluate a formula template against numeric parameters and an optional threshold.
///
/// Errors quote the template, never the substituted expression.
pub fn evaluate_numeric(
    formula: &str,
    parameters: &BTreeMap<String, f64>,
    threshold: Option<&str>,
) -> Result<ComplianceOutcome> {
    if formula.trim().is_empty() {
        return Err(OrchestrationError::Input("Missing formula".to_string()));
    }

    let threshold = parse_threshold(threshold)?;
    let expression = substitute(formula, parameters);

    if !expression.chars().all(is_arithmetic_char) {
        let unknown = leftover_identifiers(&expression);
        let message = if unknown.is_empty() {
            format!(
                "Invalid formula contains non-mathematical characters: '{}'",
                formula
            )
        } else {
            format!(
                "Formula '{}' references unknown parameters: {}",
                formula,
                unknown.join(", ")
            )
        };
        return Err(OrchestrationError::Evaluation(message));
    }

    let result = evaluate_arithmetic(&expression).map_err(|e| match e {
        OrchestrationError::Evaluation(reason) => {
            OrchestrationError::Evaluation(format!("{} in formula '{}'", reason, formula))
        }
        other => other,
    })?;

    let (compliance_status, meets_threshold) = match threshold {
        None => (ComplianceStatus::Calculated, None),
        Some(t) => {
            let met = t.is_met(result);
            let status = if met {
                ComplianceStatus::Compliant
            } else {
                ComplianceStatus::NonCompliant
            };
            (status, Some(met))
        }
    };

    debug!(formula, result, ?compliance_status, "Formula evaluated");

    Ok(ComplianceOutcome {
        result,
        compliance_status,
        meets_threshold,
    })
}

/// Entry point taking parameters as received from a tool call.
pub fn evaluate(
    formula: &str,
    parameters: &Map<String, Value>,
    threshold: Option<&str>,
) -> Result<ComplianceOutcome> {
    if formula.trim().is_empty() || parameters.is_empty() {
        return Err(OrchestrationError::Input(
            "Missing formula or parameters".to_string(),
        ));
    }

    let numeric = numeric_parameters(parameters)?;
    evaluate_numeric(formula, &numeric, threshold)
}
