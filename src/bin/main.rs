use financial_doc_orchestrator::{error::OrchestrationError, formula};
use std::collections::BTreeMap;
use tracing::info;
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: orchestrator \"<formula>\" name=value ... [--threshold \"<2.0\"]";

struct Invocation {
    formula: String,
    parameters: BTreeMap<String, f64>,
    threshold: Option<String>,
}

fn parse_args(args: impl IntoIterator<Item = String>) -> Result<Invocation, OrchestrationError> {
    let mut args = args.into_iter();
    let formula = args
        .next()
        .ok_or_else(|| OrchestrationError::Input(USAGE.to_string()))?;

    let mut parameters = BTreeMap::new();
    let mut threshold = None;

    while let Some(arg) = args.next() {
        if arg == "--threshold" {
            threshold = Some(args.next().ok_or_else(|| {
                OrchestrationError::Input("--threshold needs a value".to_string())
            })?);
            continue;
        }

        let (name, value) = arg.split_once('=').ok_or_else(|| {
            OrchestrationError::Input(format!("expected name=value, got '{}'", arg))
        })?;
        let value: f64 = value.trim().parse().map_err(|_| {
            OrchestrationError::Input(format!("parameter '{}' is not a number", name))
        })?;
        parameters.insert(name.trim().to_string(), value);
    }

    Ok(Invocation {
        formula,
        parameters,
        threshold,
    })
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let invocation = parse_args(std::env::args().skip(1))?;
    info!(formula = %invocation.formula, "Evaluating formula");

    let outcome = formula::evaluate_numeric(
        &invocation.formula,
        &invocation.parameters,
        invocation.threshold.as_deref(),
    )?;

    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}
