use axum::{
    routing::{get, post},
    Router,
};
use nfce_scanner_rust::service::{BudgetAlerts, LoggingBudgetAlerts, WebhookBudgetAlerts};
use nfce_scanner_rust::{api, create_pool, AppConfig, IngestService};
use std::sync::Arc;
use tower::ServiceBuilder;
use tracing::info;
use tracing_subscriber::fmt::time::ChronoLocal;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Local-time log format
    tracing_subscriber::fmt()
        .with_timer(ChronoLocal::new("%Y-%m-%d %H:%M:%S".to_string()))
        .with_target(true)
        .with_level(true)
        .init();

    // Load configuration
    let config = AppConfig::from_env();
    info!("Starting server with config: {:?}", config);

    // Database pool + schema
    let pool = create_pool(&config.database.url).await?;
    sqlx::migrate!().run(&pool).await?;
    info!("Database pool created, migrations applied");

    // Budget collaborator: webhook when configured, log-only otherwise
    let budget: Arc<dyn BudgetAlerts> = match &config.budget.alerts_url {
        Some(url) => Arc::new(WebhookBudgetAlerts::new(url.clone())?),
        None => Arc::new(LoggingBudgetAlerts),
    };

    // Ingestion pipeline
    let service = Arc::new(IngestService::new(pool, &config.acquisition, budget)?);

    // Routes
    let app = Router::new()
        .route("/health", get(api::health_check))
        .route("/api/scan", post(api::scan))
        .route("/api/preview", post(api::preview))
        .with_state(service)
        .layer(ServiceBuilder::new());

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!("Server listening on {}", addr);
    info!("API Endpoints:");
    info!("  POST /api/scan     - full ingestion pipeline");
    info!("  POST /api/preview  - acquisition only, no persistence");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
