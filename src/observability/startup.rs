use super::alerts::Severity;
use super::ALERTS;
use crate::clients::{build_http_client, slack::SlackClient};

pub async fn send_startup_alert(severity: Severity, category: &str, message: &str) {
    let slack = SlackClient::new(build_http_client());
    ALERTS.send_alert(&slack, severity, category, message).await;
}

pub async fn alert_config_error(error: &str) {
    tracing::error!("Configuration error: {}", error);
    send_startup_alert(
        Severity::Critical,
        "Startup-Config",
        &format!("Configuration invalid: {}", error),
    )
    .await;
}

pub async fn alert_database_error(error: &str) {
    tracing::error!("Database startup error: {}", error);
    send_startup_alert(
        Severity::Critical,
        "Startup-Database",
        &format!("Database initialization failed: {}", error),
    )
    .await;
}

pub async fn alert_migration_error(error: &str) {
    tracing::error!("Migration error: {}", error);
    send_startup_alert(
        Severity::Critical,
        "Startup-Migration",
        &format!("Database migration failed: {}", error),
    )
    .await;
}

pub async fn alert_http_server_error(error: &str) {
    tracing::error!("HTTP server error: {}", error);
    send_startup_alert(
        Severity::Critical,
        "Startup-HTTP",
        &format!("HTTP server failed to start: {}", error),
    )
    .await;
}

pub async fn alert_startup_success() {
    send_startup_alert(Severity::Info, "Startup", "sem-agent started successfully").await;
}
