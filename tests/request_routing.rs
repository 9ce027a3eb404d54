mod common;

use common::{app, tenant, TestApp};
use financial_doc_orchestrator::{
    models::{DocumentId, OperationKind, RequestStatus, TaskCategory},
    TenantId,
};

async fn extracted_document(app: &TestApp, tenant_id: &TenantId) -> DocumentId {
    let ticket = app
        .services
        .uploads
        .request_upload(tenant_id, "balance.pdf")
        .await
        .unwrap();
    app.services
        .uploads
        .complete_upload(&ticket.upload_token, b"%PDF-1.7 balance".to_vec())
        .await
        .unwrap();
    ticket.document_id
}

#[tokio::test]
async fn test_compliance_request_end_to_end() {
    let app = app();
    let acme = tenant("acme");
    let document_id = extracted_document(&app, &acme).await;

    let request = app
        .services
        .supervisor
        .route(&acme, "Is our debt-to-equity ratio below 2.0?", &[document_id.clone()])
        .await
        .unwrap();

    assert_eq!(request.status, RequestStatus::Completed, "{:?}", request.result);
    assert_eq!(request.intent, Some(TaskCategory::Compliance));

    let report = request.result.clone().unwrap();
    assert_eq!(report["calculation_details"]["formula"], "total_debt / total_equity");
    assert_eq!(report["calculation_details"]["result"], 1.5);
    assert_eq!(report["calculation_details"]["parameters_found"]["total_debt"], 1500000.0);
    assert_eq!(report["compliance_assessment"]["status"], "compliant");
    assert_eq!(report["compliance_assessment"]["threshold"], "< 2.0");
    assert_eq!(report["compliance_assessment"]["meets_compliance"], true);
    assert_eq!(report["document_sources"][0]["document_id"], document_id.as_str());
    assert_eq!(
        report["recommendations"][0],
        "The calculated ratio meets the compliance requirements"
    );

    let stored = app
        .services
        .supervisor
        .status(&acme, request.request_id)
        .await
        .unwrap();
    assert_eq!(stored.status, RequestStatus::Completed);
    assert_eq!(stored.result, request.result);

    assert_eq!(
        app.services.usage.today(&acme, OperationKind::ComplianceChecks).await.unwrap(),
        1
    );
    assert_eq!(
        app.services.usage.today(&acme, OperationKind::ToolInvocations).await.unwrap(),
        0
    );
    assert_eq!(
        app.services.usage.today(&acme, OperationKind::ProcessingRequests).await.unwrap(),
        1
    );
    let cost = app
        .services
        .usage
        .cost_today(&acme, OperationKind::ComplianceChecks)
        .await
        .unwrap();
    assert!((cost - 0.10).abs() < 1e-9);
}

#[tokio::test]
async fn test_query_request_end_to_end() {
    let app = app();
    let acme = tenant("acme");
    let document_id = extracted_document(&app, &acme).await;

    let request = app
        .services
        .supervisor
        .route(&acme, "What was total revenue in FY2024?", &[document_id])
        .await
        .unwrap();

    assert_eq!(request.status, RequestStatus::Completed, "{:?}", request.result);
    assert_eq!(request.intent, Some(TaskCategory::Query));

    let result = request.result.unwrap();
    assert_eq!(result["answer"]["answer"], "Revenue for FY2024 was 4,200,000.");
    assert_eq!(result["answer"]["sources"][0], "balance.pdf");
    assert_eq!(result["confidence"], "high");
    assert_eq!(result["documents_analyzed"], 1);

    assert!(app
        .model
        .prompts()
        .iter()
        .any(|p| p.contains("Summary: FY2024 balance sheet for Acme Corp")));
    assert_eq!(
        app.services.usage.today(&acme, OperationKind::QaQueries).await.unwrap(),
        1
    );
    let cost = app.services.usage.cost_today(&acme, OperationKind::QaQueries).await.unwrap();
    assert!((cost - 0.05).abs() < 1e-9);
}

#[tokio::test]
async fn test_missing_parameter_fails_request() {
    let app = app();
    let acme = tenant("acme");
    let document_id = extracted_document(&app, &acme).await;

    let request = app
        .services
        .supervisor
        .route(&acme, "Calculate the quick ratio", &[document_id])
        .await
        .unwrap();

    assert_eq!(request.status, RequestStatus::Failed);
    assert_eq!(request.intent, Some(TaskCategory::Compliance));
    let result = request.result.unwrap();
    assert_eq!(result["error_kind"], "input_error");
    assert!(result["error"].as_str().unwrap().contains("inventory"));
    assert_eq!(
        app.services.usage.today(&acme, OperationKind::ComplianceChecks).await.unwrap(),
        0
    );
    assert_eq!(
        app.services.usage.cost_today(&acme, OperationKind::ComplianceChecks).await.unwrap(),
        0.0
    );
    assert_eq!(
        app.services.usage.today(&acme, OperationKind::ProcessingRequests).await.unwrap(),
        1
    );
}

#[tokio::test]
async fn test_other_tenants_documents_are_not_read() {
    let app = app();
    let document_id = extracted_document(&app, &tenant("acme")).await;

    let globex = tenant("globex");
    let request = app
        .services
        .supervisor
        .route(&globex, "What was total revenue?", &[document_id])
        .await
        .unwrap();

    assert_eq!(request.status, RequestStatus::Failed);
    let result = request.result.unwrap();
    assert_eq!(result["error_kind"], "not_found_error");
    assert!(!result.to_string().contains("Acme"));
}

#[test]
fn test_status_of_unknown_request_blocking() {
    let app = tokio_test::block_on(async { app() });
    let err = tokio_test::block_on(
        app.services
            .supervisor
            .status(&tenant("acme"), uuid::Uuid::new_v4()),
    )
    .unwrap_err();
    assert_eq!(err.kind(), financial_doc_orchestrator::error::ErrorKind::NotFoundError);
}
