use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};

use nl_sql::config::{AppConfig, CliArgs};
use nl_sql::db::db_pool::build_pool;
use nl_sql::db::duckdb_client::DuckDbClient;
use nl_sql::llm::LlmManager;
use nl_sql::pipeline::cache::{CacheSettings, ResultCache};
use nl_sql::pipeline::orchestrator::{Orchestrator, PipelineSettings, QueryOptions};
use nl_sql::util::logging::init_tracing;
use nl_sql::web;
use nl_sql::web::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse command line arguments
    let args = CliArgs::parse();

    // Initialize logging
    init_tracing(args.log_json);

    // Load configuration
    let config = match AppConfig::new(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    info!(
        "Initializing DuckDB connection pool for {}",
        config.database.connection_string
    );
    let pool = build_pool(&config.database.connection_string, config.database.pool_size)?;
    let db = Arc::new(DuckDbClient::new(pool));

    // Initialize LLM manager
    info!("Initializing LLM manager with backend: {}", config.llm.backend);
    let llm_manager = LlmManager::new(&config.llm)?;

    let cache = Arc::new(ResultCache::new(CacheSettings::from(&config.cache)));
    let _cleanup = cache.spawn_cleanup(config.cache.cleanup_interval());

    let orchestrator = Arc::new(Orchestrator::new(
        db,
        llm_manager.service(),
        cache,
        PipelineSettings::from_config(&config),
    ));

    if let Some(question) = &args.ask {
        let outcome = orchestrator.query(question, QueryOptions::default()).await?;
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(());
    }

    // Warm the schema snapshot
    if let Err(e) = orchestrator.schema().await {
        warn!("Failed to load schema at startup: {}", e);
        // Continue anyway, it is fetched again per request
    }

    let app_state = Arc::new(AppState::new(config.clone(), orchestrator));

    // Start the web server
    info!("Starting NL-SQL server on {}:{}", config.web.host, config.web.port);
    match web::run_server(config.web, app_state).await {
        Ok(_) => info!("Server stopped gracefully"),
        Err(e) => {
            error!("Server error: {}", e);
            return Err(e.into());
        }
    }

    Ok(())
}
