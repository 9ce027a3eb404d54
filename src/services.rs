//! Service bundle wiring the stores and clients together

use crate::blob::{BlobStore, InMemoryBlobStore};
use crate::classifier::{IntentClassifier, KeywordIntentClassifier, LlmIntentClassifier};
use crate::config::Settings;
use crate::error::{OrchestrationError, UpstreamKind};
use crate::extraction::{ExtractionGateway, ExtractionPolicy, HttpLayoutService, LayoutAnalysis, LayoutService};
use crate::gemini::{GeminiClient, LanguageModel};
use crate::notify::{LogNotifier, Notifier, WebhookNotifier};
use crate::pipeline::ValidationPipeline;
use crate::planner::LlmFormulaPlanner;
use crate::state::postgres::PgMetadataStore;
use crate::state::{InMemoryMetadataStore, MetadataStore};
use crate::supervisor::{ComplianceCapability, QueryCapability, Supervisor};
use crate::tools::{create_default_registry, ToolDispatcher};
use crate::upload::UploadService;
use crate::usage::UsageMeter;
use crate::Result;
use std::sync::Arc;
use tracing::{info, warn};

/// External collaborators injected into the bundle.
pub struct Backends {
    pub store: Arc<dyn MetadataStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub layout: Arc<dyn LayoutService>,
    pub model: Arc<dyn LanguageModel>,
    pub notifier: Arc<dyn Notifier>,
    pub classifier: Arc<dyn IntentClassifier>,
}

impl Backends {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let store: Arc<dyn MetadataStore> = match &settings.database_url {
            Some(url) => Arc::new(PgMetadataStore::connect_lazy(url)?),
            None => {
                info!("Metadata store backend: in-memory");
                Arc::new(InMemoryMetadataStore::new())
            }
        };

        let layout: Arc<dyn LayoutService> = match &settings.layout_service_url {
            Some(url) => Arc::new(HttpLayoutService::new(url.clone(), settings.upstream_timeout)?),
            None => {
                warn!("LAYOUT_SERVICE_URL not set, extraction will fail as unavailable");
                Arc::new(UnconfiguredLayoutService)
            }
        };

        let model: Arc<dyn LanguageModel> = Arc::new(GeminiClient::new(
            settings.gemini_api_key.clone().unwrap_or_default(),
            settings.upstream_timeout,
        )?);

        let classifier: Arc<dyn IntentClassifier> = if settings.gemini_api_key.is_some() {
            Arc::new(LlmIntentClassifier::new(model.clone()))
        } else {
            warn!("GEMINI_API_KEY not set, using keyword intent classification");
            Arc::new(KeywordIntentClassifier)
        };

        let notifier: Arc<dyn Notifier> = match &settings.notification_webhook_url {
            Some(url) => Arc::new(WebhookNotifier::new(url.clone())?),
            None => Arc::new(LogNotifier),
        };

        Ok(Self {
            store,
            blobs: Arc::new(InMemoryBlobStore::new()),
            layout,
            model,
            notifier,
            classifier,
        })
    }
}

struct UnconfiguredLayoutService;

#[async_trait::async_trait]
impl LayoutService for UnconfiguredLayoutService {
    async fn analyze(&self, _document_ref: &str) -> Result<LayoutAnalysis> {
        Err(OrchestrationError::upstream(
            UpstreamKind::ServiceUnavailable,
            "LAYOUT_SERVICE_URL not configured",
        ))
    }
}

/// Everything the API and binaries need, sharing one set of stores.
#[derive(Clone)]
pub struct Services {
    pub store: Arc<dyn MetadataStore>,
    pub uploads: Arc<UploadService>,
    pub pipeline: Arc<ValidationPipeline>,
    pub tools: Arc<ToolDispatcher>,
    pub supervisor: Arc<Supervisor>,
    pub usage: UsageMeter,
}

impl Services {
    /// Queued extraction spawns a worker, so this must run inside a Tokio runtime.
    pub fn build(settings: &Settings, backends: Backends) -> Self {
        let Backends {
            store,
            blobs,
            layout,
            model,
            notifier,
            classifier,
        } = backends;

        let usage = UsageMeter::new(store.clone());
        let gateway = ExtractionGateway::new(
            store.clone(),
            blobs.clone(),
            layout,
            model.clone(),
            ExtractionPolicy::from(settings),
        );

        let pipeline = Arc::new(ValidationPipeline::new(
            store.clone(),
            blobs.clone(),
            gateway.clone(),
            notifier,
            settings,
        ));
        let uploads = Arc::new(UploadService::new(
            store.clone(),
            blobs,
            pipeline.clone(),
            settings,
        ));

        let tools = Arc::new(ToolDispatcher::new(
            create_default_registry(store.clone(), gateway),
            usage.clone(),
        ));

        let supervisor = Arc::new(Supervisor::new(
            store.clone(),
            classifier,
            ComplianceCapability::new(tools.clone(), Arc::new(LlmFormulaPlanner::new(model.clone()))),
            QueryCapability::new(tools.clone(), model),
            usage.clone(),
            settings.request_ttl,
        ));

        Self {
            store,
            uploads,
            pipeline,
            tools,
            supervisor,
            usage,
        }
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Ok(Self::build(settings, Backends::from_settings(settings)?))
    }
}
