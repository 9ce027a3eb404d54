//! Tool trait, registry and dispatcher
//!
//! The same four tools serve the intent router and external reasoning
//! agents. Function names form a closed set parsed at the boundary; every
//! invocation yields a `ToolResponse`, never a bare error.

pub mod compliance;
pub mod documents;

pub use compliance::CalculateComplianceTool;
pub use documents::{ExtractDataTool, GetDocumentDataTool, ValidateDocumentTool};

use crate::error::{ErrorKind, OrchestrationError};
use crate::extraction::ExtractionGateway;
use crate::models::{DocumentId, OperationKind, TenantId};
use crate::state::{deny, MetadataStore};
use crate::usage::UsageMeter;
use crate::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolName {
    ValidateDocument,
    ExtractData,
    CalculateCompliance,
    GetDocumentData,
}

impl ToolName {
    pub const ALL: [ToolName; 4] = [
        ToolName::ValidateDocument,
        ToolName::ExtractData,
        ToolName::CalculateCompliance,
        ToolName::GetDocumentData,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolName::ValidateDocument => "validate_document",
            ToolName::ExtractData => "extract_data",
            ToolName::CalculateCompliance => "calculate_compliance",
            ToolName::GetDocumentData => "get_document_data",
        }
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToolName {
    type Err = OrchestrationError;

    fn from_str(s: &str) -> Result<Self> {
        ToolName::ALL
            .into_iter()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| OrchestrationError::Input(format!("unknown function: {}", s)))
    }
}

/// Trait for a single tool
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> ToolName;
    fn description(&self) -> &'static str;
    /// JSON description of the accepted arguments.
    fn parameters(&self) -> Value;
    async fn execute(&self, tenant_id: &TenantId, args: &Map<String, Value>) -> Result<Value>;
}

/// Tool registry for looking up tools by name
pub struct ToolRegistry {
    tools: HashMap<ToolName, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name(), tool);
    }

    pub fn get(&self, name: ToolName) -> Option<Arc<dyn Tool>> {
        self.tools.get(&name).cloned()
    }

    pub fn list(&self) -> Vec<ToolName> {
        let mut names: Vec<ToolName> = self.tools.keys().copied().collect();
        names.sort_by_key(|n| n.as_str());
        names
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

pub fn create_default_registry(
    store: Arc<dyn MetadataStore>,
    gateway: ExtractionGateway,
) -> ToolRegistry {
    let mut registry = ToolRegistry::new();

    registry.register(Arc::new(ValidateDocumentTool::new(store.clone())));
    registry.register(Arc::new(ExtractDataTool::new(gateway)));
    registry.register(Arc::new(CalculateComplianceTool));
    registry.register(Arc::new(GetDocumentDataTool::new(store)));

    registry
}

/// Uniform envelope for every invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolResponse {
    pub success: bool,
    pub function: String,
    pub data: Option<Value>,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
}

impl ToolResponse {
    pub fn ok(function: ToolName, data: Value) -> Self {
        Self {
            success: true,
            function: function.to_string(),
            data: Some(data),
            error: None,
            error_kind: None,
        }
    }

    pub fn failed(function: &str, error: &OrchestrationError) -> Self {
        Self {
            success: false,
            function: function.to_string(),
            data: None,
            error: Some(error.to_string()),
            error_kind: Some(error.kind()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolDescriptor {
    pub name: ToolName,
    pub description: &'static str,
    pub parameters: Value,
}

pub struct ToolDispatcher {
    registry: ToolRegistry,
    usage: UsageMeter,
}

impl ToolDispatcher {
    pub fn new(registry: ToolRegistry, usage: UsageMeter) -> Self {
        Self { registry, usage }
    }

    /// External entry point; one `tool_invocations` increment per successful call.
    pub async fn invoke(&self, function_name: &str, tenant_id: &TenantId, args: &Value) -> ToolResponse {
        let name = match function_name.parse::<ToolName>() {
            Ok(name) => name,
            Err(e) => {
                warn!(function = function_name, "Rejected unknown tool");
                return ToolResponse::failed(function_name, &e);
            }
        };

        match self.call(name, tenant_id, args).await {
            Ok(data) => {
                self.usage
                    .increment(tenant_id, OperationKind::ToolInvocations)
                    .await;
                ToolResponse::ok(name, data)
            }
            Err(e) => {
                warn!(function = %name, tenant_id = %tenant_id, error = %e, "Tool invocation failed");
                ToolResponse::failed(name.as_str(), &e)
            }
        }
    }

    /// Unmetered path used by capabilities that meter their own request.
    pub async fn call(&self, name: ToolName, tenant_id: &TenantId, args: &Value) -> Result<Value> {
        let args = args.as_object().ok_or_else(|| {
            OrchestrationError::Input("Tool arguments must be a JSON object".to_string())
        })?;

        if let Some(claimed) = args.get("tenant_id") {
            if claimed.as_str() != Some(tenant_id.as_str()) {
                return Err(deny(tenant_id, name.as_str()));
            }
        }

        let tool = self.registry.get(name).ok_or_else(|| {
            OrchestrationError::Input(format!("unknown function: {}", name))
        })?;

        info!(function = %name, tenant_id = %tenant_id, "Executing tool");
        tool.execute(tenant_id, args).await
    }

    pub fn catalog(&self) -> Vec<ToolDescriptor> {
        self.registry
            .list()
            .into_iter()
            .filter_map(|name| self.registry.get(name))
            .map(|tool| ToolDescriptor {
                name: tool.name(),
                description: tool.description(),
                parameters: tool.parameters(),
            })
            .collect()
    }
}

pub(crate) fn required_str<'a>(args: &'a Map<String, Value>, field: &str) -> Result<&'a str> {
    args.get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| OrchestrationError::Input(format!("Missing required argument '{}'", field)))
}

pub(crate) fn document_id_arg(args: &Map<String, Value>) -> Result<DocumentId> {
    DocumentId::parse(required_str(args, "document_id")?)
}
