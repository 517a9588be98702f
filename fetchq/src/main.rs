use fetchq::services::ServiceContainer;
use fetchq::{database, logging};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let _guard = logging::init_logging(
        &std::env::var("FETCHQ_LOG_DIR").unwrap_or_else(|_| "logs".to_string()),
    )?;

    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize database
    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| "sqlite:fetchq.db?mode=rwc".to_string());

    let pool = database::init_pool(&database_url).await?;
    database::run_migrations(&pool).await?;

    // Build and wire services
    let container = ServiceContainer::new(pool).await?;
    container.initialize();

    info!("fetchq initialized successfully");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    container.shutdown().await?;
    Ok(())
}
