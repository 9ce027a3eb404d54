use financial_doc_orchestrator::{api::start_server, config::Settings, services::Services};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = Settings::from_env()?;

    info!("Financial Document Orchestrator - API Server");
    info!(
        port = settings.port,
        mode = ?settings.extraction_mode,
        max_upload_bytes = settings.max_upload_bytes,
        "Settings loaded"
    );

    let services = Services::from_settings(&settings)?;
    info!("Services initialized");

    start_server(services, settings.max_upload_bytes, settings.port).await?;

    Ok(())
}
