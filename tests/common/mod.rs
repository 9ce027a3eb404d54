#![allow(dead_code)]

use financial_doc_orchestrator::{
    blob::InMemoryBlobStore,
    classifier::KeywordIntentClassifier,
    config::Settings,
    extraction::{LayoutAnalysis, LayoutBlock, MockLayoutService},
    gemini::MockLanguageModel,
    notify::RecordingNotifier,
    state::InMemoryMetadataStore,
    Backends, Services, TenantId,
};
use std::sync::Arc;
use std::time::Duration;

pub const BALANCE_SHEET: &str = r#"{
    "document_summary": "FY2024 balance sheet for Acme Corp",
    "key_financial_metrics": {
        "Total Debt": "$1,500,000",
        "total_equity": 1000000,
        "revenue": 4200000
    },
    "entities": {"company": "Acme Corp"},
    "tables_summary": "One balance sheet table",
    "compliance_relevant_data": {"current_assets": 800000, "current_liabilities": 400000}
}"#;

pub const QA_ANSWER: &str = r#"{
    "answer": "Revenue for FY2024 was 4,200,000.",
    "sources": ["balance.pdf"],
    "confidence": "high",
    "data_points": ["revenue: 4200000"],
    "limitations": "None"
}"#;

/// Answers each prompt family the crate sends with a canned reply.
pub fn scripted_model() -> MockLanguageModel {
    MockLanguageModel::new(|prompt| {
        let reply = if prompt.contains("structure it as JSON") {
            BALANCE_SHEET
        } else if prompt.contains("financial compliance request") {
            "not a plan"
        } else if prompt.contains("Answer the user's question") {
            QA_ANSWER
        } else {
            "unexpected prompt"
        };
        Ok(reply.to_string())
    })
}

pub fn layout() -> LayoutAnalysis {
    LayoutAnalysis {
        blocks: vec![
            LayoutBlock::Page { number: 1, confidence: Some(0.95) },
            LayoutBlock::Line {
                text: "Acme Corp Balance Sheet".into(),
                confidence: Some(0.9),
            },
            LayoutBlock::KeyValue {
                key: "Total Debt".into(),
                value: "$1,500,000".into(),
                confidence: Some(0.85),
            },
        ],
    }
}

pub struct TestApp {
    pub services: Services,
    pub store: Arc<InMemoryMetadataStore>,
    pub blobs: Arc<InMemoryBlobStore>,
    pub notifier: Arc<RecordingNotifier>,
    pub model: Arc<MockLanguageModel>,
    pub layout: Arc<MockLayoutService>,
    pub settings: Settings,
}

pub fn app_with(settings: Settings, layout: MockLayoutService, model: MockLanguageModel) -> TestApp {
    let store = Arc::new(InMemoryMetadataStore::new());
    let blobs = Arc::new(InMemoryBlobStore::new());
    let notifier = Arc::new(RecordingNotifier::new());
    let model = Arc::new(model);
    let layout = Arc::new(layout);

    let services = Services::build(
        &settings,
        Backends {
            store: store.clone(),
            blobs: blobs.clone(),
            layout: layout.clone(),
            model: model.clone(),
            notifier: notifier.clone(),
            classifier: Arc::new(KeywordIntentClassifier),
        },
    );

    TestApp {
        services,
        store,
        blobs,
        notifier,
        model,
        layout,
        settings,
    }
}

pub fn app() -> TestApp {
    let settings = Settings {
        upstream_timeout: Duration::from_secs(5),
        ..Settings::default()
    };
    app_with(settings, MockLayoutService::fixed(layout()), scripted_model())
}

pub fn tenant(name: &str) -> TenantId {
    TenantId::parse(Some(name)).unwrap()
}
