mod common;

use common::{app, app_with, scripted_model, tenant};
use financial_doc_orchestrator::{
    blob::ObjectCreated,
    config::Settings,
    error::{ErrorKind, UpstreamKind},
    extraction::MockLayoutService,
    models::{DocumentId, DocumentKey, DocumentPatch, DocumentStatus, OperationKind},
    pipeline::{ExtractionState, ValidationOutcome},
    state::{MetadataStore, Scoped},
};
use serde_json::json;

async fn status_of(app: &common::TestApp, tenant_name: &str, id: &DocumentId) -> DocumentStatus {
    let key = DocumentKey::initial(id.clone());
    match app.store.lookup_document(&tenant(tenant_name), &key).await.unwrap() {
        Scoped::Found(document) => document.status,
        other => panic!("document not visible: {:?}", other),
    }
}

#[tokio::test]
async fn test_upload_validates_and_extracts() {
    let app = app();
    let acme = tenant("acme");

    let ticket = app.services.uploads.request_upload(&acme, "balance.pdf").await.unwrap();
    assert_eq!(status_of(&app, "acme", &ticket.document_id).await, DocumentStatus::PendingUpload);

    let outcome = app
        .services
        .uploads
        .complete_upload(&ticket.upload_token, b"%PDF-1.7\n balance sheet".to_vec())
        .await
        .unwrap();

    match outcome {
        ValidationOutcome::Validated {
            document_type,
            extraction: ExtractionState::Extracted { confidence },
            ..
        } => {
            assert_eq!(document_type, "pdf");
            assert!((confidence - 0.9).abs() < 1e-4);
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(status_of(&app, "acme", &ticket.document_id).await, DocumentStatus::Extracted);

    let response = app
        .services
        .tools
        .invoke(
            "get_document_data",
            &acme,
            &json!({"document_ids": [ticket.document_id]}),
        )
        .await;
    assert!(response.success);
    let data = response.data.unwrap();
    assert_eq!(data["count"], 1);
    assert_eq!(
        data["documents"][0]["data"]["financial_metrics"]["total_equity"],
        1000000
    );

    for (operation, expected) in [
        (OperationKind::UploadRequests, 1),
        (OperationKind::DocumentsValidated, 1),
        (OperationKind::DocumentsExtracted, 1),
        (OperationKind::ToolInvocations, 1),
    ] {
        assert_eq!(
            app.services.usage.today(&acme, operation).await.unwrap(),
            expected,
            "{}",
            operation
        );
    }

    app.services
        .pipeline
        .mark_ready(&acme, &ticket.document_id)
        .await
        .unwrap();
    assert_eq!(status_of(&app, "acme", &ticket.document_id).await, DocumentStatus::Ready);
}

#[tokio::test]
async fn test_upload_token_is_single_use() {
    let app = app();
    let ticket = app
        .services
        .uploads
        .request_upload(&tenant("acme"), "balance.pdf")
        .await
        .unwrap();

    app.services
        .uploads
        .complete_upload(&ticket.upload_token, b"%PDF-1.4".to_vec())
        .await
        .unwrap();

    let err = app
        .services
        .uploads
        .complete_upload(&ticket.upload_token, b"%PDF-1.4".to_vec())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFoundError);
}

#[tokio::test]
async fn test_oversized_upload_rejected_with_one_notification() {
    let app = app();
    let acme = tenant("acme");
    let ticket = app.services.uploads.request_upload(&acme, "huge.pdf").await.unwrap();
    app.blobs.put_object(&ticket.key, b"%PDF-1.7".to_vec()).await;

    let event = ObjectCreated {
        key: ticket.key.clone(),
        size: 200 * 1024 * 1024,
    };

    let first = app.services.pipeline.on_object_created(&event).await.unwrap();
    assert_eq!(
        first,
        ValidationOutcome::Rejected {
            document_id: ticket.document_id.clone(),
            reason: "too large".to_string(),
        }
    );

    let second = app.services.pipeline.on_object_created(&event).await.unwrap();
    assert!(matches!(second, ValidationOutcome::Duplicate { .. }));

    assert_eq!(status_of(&app, "acme", &ticket.document_id).await, DocumentStatus::Rejected);
    let sent = app.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].reason, "too large");
    assert_eq!(sent[0].document_id, ticket.document_id);
    assert_eq!(app.layout.calls(), 0);
}

#[tokio::test]
async fn test_unavailable_layout_service_rejects_after_retries() {
    let app = app_with(
        Settings::default(),
        MockLayoutService::failing(UpstreamKind::ServiceUnavailable),
        scripted_model(),
    );
    let acme = tenant("acme");
    let ticket = app.services.uploads.request_upload(&acme, "q3.pdf").await.unwrap();

    let outcome = app
        .services
        .uploads
        .complete_upload(&ticket.upload_token, b"%PDF-1.7".to_vec())
        .await
        .unwrap();

    match outcome {
        ValidationOutcome::Validated {
            extraction: ExtractionState::Failed(body),
            ..
        } => {
            assert_eq!(body.error_kind, ErrorKind::UpstreamError);
            assert!(body.retryable);
        }
        other => panic!("unexpected outcome {:?}", other),
    }

    assert_eq!(app.layout.calls(), app.settings.extraction_max_attempts as usize);
    assert_eq!(status_of(&app, "acme", &ticket.document_id).await, DocumentStatus::Rejected);
    assert_eq!(app.notifier.sent().len(), 1);
    assert_eq!(
        app.services
            .usage
            .today(&acme, OperationKind::DocumentsExtracted)
            .await
            .unwrap(),
        0
    );
}

#[tokio::test]
async fn test_foreign_document_is_access_denied() {
    let app = app();
    let ticket = app
        .services
        .uploads
        .request_upload(&tenant("A"), "balance.pdf")
        .await
        .unwrap();
    app.services
        .uploads
        .complete_upload(&ticket.upload_token, b"%PDF-1.7".to_vec())
        .await
        .unwrap();

    let response = app
        .services
        .tools
        .invoke(
            "validate_document",
            &tenant("B"),
            &json!({"document_id": ticket.document_id}),
        )
        .await;
    assert!(response.success);
    assert_eq!(
        response.data.unwrap(),
        json!({"valid": false, "error": "Access denied"})
    );

    let response = app
        .services
        .tools
        .invoke(
            "extract_data",
            &tenant("B"),
            &json!({"document_id": ticket.document_id}),
        )
        .await;
    assert!(!response.success);
    assert_eq!(response.error_kind, Some(ErrorKind::AccessError));
}

#[tokio::test]
async fn test_batch_read_reports_missing_items() {
    let app = app();
    let acme = tenant("acme");
    let ticket = app.services.uploads.request_upload(&acme, "doc1.pdf").await.unwrap();
    app.services
        .uploads
        .complete_upload(&ticket.upload_token, b"%PDF-1.7".to_vec())
        .await
        .unwrap();

    let response = app
        .services
        .tools
        .invoke(
            "get_document_data",
            &acme,
            &json!({"document_ids": [ticket.document_id, "doc2"]}),
        )
        .await;

    assert!(response.success);
    let data = response.data.unwrap();
    assert_eq!(data["count"], 1);
    assert_eq!(data["documents"][0]["status"], "ok");
    assert_eq!(data["documents"][1], json!({"document_id": "doc2", "status": "not_found"}));
}

#[tokio::test]
async fn test_extract_data_during_running_extraction_succeeds_as_no_op() {
    let app = app();
    let acme = tenant("acme");
    let ticket = app.services.uploads.request_upload(&acme, "balance.pdf").await.unwrap();
    let key = DocumentKey::initial(ticket.document_id.clone());

    for (from, to) in [
        (DocumentStatus::PendingUpload, DocumentStatus::Validated),
        (DocumentStatus::Validated, DocumentStatus::Extracting),
    ] {
        assert!(app
            .store
            .transition_document(&acme, &key, &[from], to, &DocumentPatch::default())
            .await
            .unwrap()
            .is_applied());
    }

    let response = app
        .services
        .tools
        .invoke(
            "extract_data",
            &acme,
            &json!({"document_id": ticket.document_id}),
        )
        .await;

    assert!(response.success, "{:?}", response.error);
    assert_eq!(response.error_kind, None);
    let data = response.data.unwrap();
    assert_eq!(data["extraction"], "in_progress");
    assert_eq!(data["status"], "extracting");
    assert_eq!(app.layout.calls(), 0);
    assert_eq!(status_of(&app, "acme", &ticket.document_id).await, DocumentStatus::Extracting);
}
