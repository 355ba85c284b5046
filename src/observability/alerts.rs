use crate::clients::slack::{escape, SlackClient};
use std::collections::HashMap;
use std::env;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    Critical,
    Error,
    Warning,
    Info,
}

impl Severity {
    pub fn emoji(&self) -> &'static str {
        match self {
            Severity::Critical => "🚨",
            Severity::Error => "❌",
            Severity::Warning => "⚠️",
            Severity::Info => "ℹ️",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Severity::Critical => "CRITICAL",
            Severity::Error => "ERROR",
            Severity::Warning => "WARNING",
            Severity::Info => "INFO",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AlertKey {
    pub severity: Severity,
    pub category: String,
}

/// Operator alerts posted to the admin Slack channel, at most one per (severity, category)
/// per `rate_limit`.
pub struct AlertManager {
    rate_limit: Duration,
    last_alerts: Mutex<HashMap<AlertKey, Instant>>,
}

impl Default for AlertManager {
    fn default() -> Self {
        Self::new()
    }
}

impl AlertManager {
    pub fn new() -> Self {
        Self::with_rate_limit(Duration::from_secs(60))
    }

    pub fn with_rate_limit(rate_limit: Duration) -> Self {
        Self {
            rate_limit,
            last_alerts: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<AlertKey, Instant>> {
        match self.last_alerts.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!("AlertManager mutex poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    pub fn should_alert(&self, severity: Severity, category: &str) -> bool {
        let key = AlertKey {
            severity,
            category: category.to_string(),
        };

        let mut last_alerts = self.lock();
        let now = Instant::now();

        if let Some(last_time) = last_alerts.get(&key) {
            if now.duration_since(*last_time) < self.rate_limit {
                return false;
            }
        }

        last_alerts.insert(key, now);
        true
    }

    pub fn format_alert(&self, severity: Severity, category: &str, message: &str) -> String {
        format!(
            "{} *[{}]* {}\n{}",
            severity.emoji(),
            severity.label(),
            escape(category),
            escape(message)
        )
    }

    pub fn clear_expired(&self) {
        let now = Instant::now();
        self.lock()
            .retain(|_, last_time| now.duration_since(*last_time) < self.rate_limit);
    }

    pub async fn send_alert(
        &self,
        slack: &SlackClient,
        severity: Severity,
        category: &str,
        message: &str,
    ) {
        if env::var("ADMIN_LOGS").unwrap_or_default() != "ACTIVE" {
            return;
        }

        if !self.should_alert(severity, category) {
            tracing::debug!("Alert rate-limited: {} - {}", category, message);
            return;
        }

        let (token, channel) = match (env::var("SLACK_BOT_TOKEN"), env::var("ADMIN_SLACK_CHANNEL")) {
            (Ok(token), Ok(channel)) if !token.is_empty() && !channel.is_empty() => {
                (token, channel)
            }
            _ => {
                tracing::error!("SLACK_BOT_TOKEN or ADMIN_SLACK_CHANNEL not set");
                return;
            }
        };

        let formatted = self.format_alert(severity, category, message);

        if let Err(e) = slack
            .post_message(&token, &channel, &formatted, None, None)
            .await
        {
            tracing::error!("Failed to send alert: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn test_severity_label() {
        assert_eq!(Severity::Critical.label(), "CRITICAL");
        assert_eq!(Severity::Warning.label(), "WARNING");
        assert_eq!(Severity::Error.emoji(), "❌");
    }

    #[test]
    fn test_format_alert_escapes_mrkdwn() {
        let manager = AlertManager::new();
        let formatted =
            manager.format_alert(Severity::Error, "ReportScheduler", "tenant <7> failed & retried");

        assert!(formatted.starts_with("❌ *[ERROR]* ReportScheduler"));
        assert!(formatted.contains("tenant &lt;7&gt; failed &amp; retried"));
    }

    #[test]
    fn test_rate_limiting_blocks_duplicate() {
        let manager = AlertManager::with_rate_limit(Duration::from_millis(100));

        assert!(manager.should_alert(Severity::Error, "test"));
        assert!(!manager.should_alert(Severity::Error, "test"));
        assert!(manager.should_alert(Severity::Warning, "test"));
        assert!(manager.should_alert(Severity::Error, "other"));
    }

    #[test]
    fn test_rate_limiting_allows_after_expiry() {
        let manager = AlertManager::with_rate_limit(Duration::from_millis(50));

        assert!(manager.should_alert(Severity::Error, "test"));
        sleep(Duration::from_millis(60));
        assert!(manager.should_alert(Severity::Error, "test"));
    }

    #[test]
    fn test_clear_expired() {
        let manager = AlertManager::with_rate_limit(Duration::from_millis(50));

        manager.should_alert(Severity::Error, "test1");
        manager.should_alert(Severity::Warning, "test2");

        sleep(Duration::from_millis(60));
        manager.clear_expired();

        assert!(manager.lock().is_empty());
    }
}
