use dotenv::dotenv;
use sem_agent::config::AppConfig;
use sem_agent::crypto::TokenCipher;
use sem_agent::db::{create_pool, run_migrations};
use sem_agent::http_server::run_http_server;
use sem_agent::observability::init_tracing;
use sem_agent::observability::startup::{
    alert_config_error, alert_database_error, alert_http_server_error, alert_migration_error,
    alert_startup_success,
};
use sem_agent::services::keywords::monitor::{run_approval_expiry, run_keyword_monitor};
use sem_agent::services::reports::scheduler::run_report_scheduler;
use sem_agent::services::state_cleanup::run_state_cleanup;
use sem_agent::services::token_refresher::run_token_refresher;
use sem_agent::state::AppState;
use std::sync::Arc;
use tokio::task;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    init_tracing();

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            alert_config_error(&e.to_string()).await;
            return Err(e.into());
        }
    };

    tracing::info!(
        environment = %config.environment,
        port = config.port,
        "Starting sem-agent"
    );

    let pool = match create_pool(&config.database_url) {
        Ok(pool) => Arc::new(pool),
        Err(e) => {
            alert_database_error(&e.to_string()).await;
            return Err(e.into());
        }
    };

    match run_migrations(&pool) {
        Ok(applied) => tracing::info!("Applied {} pending migrations", applied),
        Err(e) => {
            alert_migration_error(&e).await;
            anyhow::bail!("migrations failed: {}", e);
        }
    }

    let cipher = TokenCipher::new(&config.encryption_key)?;
    let state = AppState::new(pool, config, cipher);

    task::spawn(run_report_scheduler(state.clone()));
    task::spawn(run_keyword_monitor(state.clone()));
    task::spawn(run_approval_expiry(state.clone()));
    task::spawn(run_token_refresher(state.clone()));
    task::spawn(run_state_cleanup(state.clone()));

    alert_startup_success().await;

    if let Err(e) = run_http_server(state).await {
        alert_http_server_error(&e.to_string()).await;
        return Err(e.into());
    }

    Ok(())
}
