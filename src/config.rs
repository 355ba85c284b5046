use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub slack_signing_secret: String,
    pub encryption_key: String,
    pub slack_client_id: Option<String>,
    pub slack_client_secret: Option<String>,
    pub slack_bot_token: Option<String>,
    pub google_client_id: Option<String>,
    pub google_client_secret: Option<String>,
    pub google_developer_token: Option<String>,
    pub google_login_customer_id: Option<String>,
    pub gemini_api_key: Option<String>,
    pub gemini_flash_model: String,
    pub gemini_pro_model: String,
    pub app_base_url: String,
    pub environment: String,
    pub debug: bool,
    pub admin_logs: String,
    pub admin_slack_channel: Option<String>,
    pub admin_log_level: u8,
    pub port: u16,
    pub intervals: TaskIntervals,
}

/// Polling periods for the background loops.
#[derive(Debug, Clone, Copy)]
pub struct TaskIntervals {
    pub report_check: Duration,
    pub keyword_detection: Duration,
    pub approval_expiry: Duration,
    pub token_refresh: Duration,
    pub state_cleanup: Duration,
}

impl Default for TaskIntervals {
    fn default() -> Self {
        Self {
            report_check: Duration::from_secs(5 * 60),
            keyword_detection: Duration::from_secs(60 * 60),
            approval_expiry: Duration::from_secs(30 * 60),
            token_refresh: Duration::from_secs(15 * 60),
            state_cleanup: Duration::from_secs(30 * 60),
        }
    }
}

#[derive(Debug)]
pub struct ConfigError {
    pub missing_vars: Vec<String>,
    pub invalid_vars: Vec<(String, String)>,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if !self.missing_vars.is_empty() {
            writeln!(f, "Missing required environment variables:")?;
            for var in &self.missing_vars {
                writeln!(f, "  - {}", var)?;
            }
        }
        if !self.invalid_vars.is_empty() {
            writeln!(f, "Invalid environment variables:")?;
            for (var, err) in &self.invalid_vars {
                writeln!(f, "  - {}: {}", var, err)?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for ConfigError {}

fn get_required(name: &str, missing: &mut Vec<String>) -> Option<String> {
    match env::var(name) {
        Ok(v) if !v.is_empty() => Some(v),
        _ => {
            missing.push(name.to_string());
            None
        }
    }
}

fn get_optional(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

fn get_parsed<T>(name: &str, default: T, invalid: &mut Vec<(String, String)>) -> T
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match get_optional(name) {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|e| {
                invalid.push((name.to_string(), e.to_string()));
            })
            .unwrap_or(default),
        None => default,
    }
}

fn get_interval(
    name: &str,
    default: Duration,
    invalid: &mut Vec<(String, String)>,
) -> Duration {
    let secs = get_parsed(name, default.as_secs(), invalid);
    if secs == 0 {
        invalid.push((name.to_string(), "interval must be positive".to_string()));
        return default;
    }
    Duration::from_secs(secs)
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut missing = Vec::new();
        let mut invalid = Vec::new();

        let database_url = get_required("DATABASE_URL", &mut missing);
        let slack_signing_secret = get_required("SLACK_SIGNING_SECRET", &mut missing);
        let encryption_key = get_required("ENCRYPTION_KEY", &mut missing);

        if let Some(key) = &encryption_key {
            if key.len() != 64 || hex::decode(key).is_err() {
                invalid.push((
                    "ENCRYPTION_KEY".into(),
                    "expected 64 hex characters".into(),
                ));
            }
        }

        let admin_log_level = env::var("ADMIN_LOG_LEVEL")
            .unwrap_or_else(|_| "50".into())
            .parse::<u8>()
            .unwrap_or(50);

        let port = get_parsed("PORT", 8000u16, &mut invalid);
        let debug = get_parsed("DEBUG", false, &mut invalid);

        let defaults = TaskIntervals::default();
        let intervals = TaskIntervals {
            report_check: get_interval(
                "REPORT_CHECK_INTERVAL_SECS",
                defaults.report_check,
                &mut invalid,
            ),
            keyword_detection: get_interval(
                "KEYWORD_DETECTION_INTERVAL_SECS",
                defaults.keyword_detection,
                &mut invalid,
            ),
            approval_expiry: get_interval(
                "APPROVAL_EXPIRY_INTERVAL_SECS",
                defaults.approval_expiry,
                &mut invalid,
            ),
            token_refresh: get_interval(
                "TOKEN_REFRESH_INTERVAL_SECS",
                defaults.token_refresh,
                &mut invalid,
            ),
            state_cleanup: get_interval(
                "STATE_CLEANUP_INTERVAL_SECS",
                defaults.state_cleanup,
                &mut invalid,
            ),
        };

        match (database_url, slack_signing_secret, encryption_key) {
            (Some(database_url), Some(slack_signing_secret), Some(encryption_key))
                if missing.is_empty() && invalid.is_empty() =>
            {
                Ok(Self {
                    database_url,
                    slack_signing_secret,
                    encryption_key,
                    slack_client_id: get_optional("SLACK_CLIENT_ID"),
                    slack_client_secret: get_optional("SLACK_CLIENT_SECRET"),
                    slack_bot_token: get_optional("SLACK_BOT_TOKEN"),
                    google_client_id: get_optional("GOOGLE_CLIENT_ID"),
                    google_client_secret: get_optional("GOOGLE_CLIENT_SECRET"),
                    google_developer_token: get_optional("GOOGLE_DEVELOPER_TOKEN"),
                    google_login_customer_id: get_optional("GOOGLE_LOGIN_CUSTOMER_ID"),
                    gemini_api_key: get_optional("GEMINI_API_KEY"),
                    gemini_flash_model: get_optional("GEMINI_FLASH_MODEL")
                        .unwrap_or_else(|| "gemini-2.0-flash".into()),
                    gemini_pro_model: get_optional("GEMINI_PRO_MODEL")
                        .unwrap_or_else(|| "gemini-1.5-pro".into()),
                    app_base_url: get_optional("APP_BASE_URL")
                        .unwrap_or_else(|| format!("http://localhost:{}", port)),
                    environment: get_optional("ENVIRONMENT")
                        .unwrap_or_else(|| "development".into()),
                    debug,
                    admin_logs: get_optional("ADMIN_LOGS").unwrap_or_default(),
                    admin_slack_channel: get_optional("ADMIN_SLACK_CHANNEL"),
                    admin_log_level,
                    port,
                    intervals,
                })
            }
            _ => Err(ConfigError {
                missing_vars: missing,
                invalid_vars: invalid,
            }),
        }
    }

    pub fn is_admin_logs_active(&self) -> bool {
        self.admin_logs == "ACTIVE"
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    pub fn google_redirect_uri(&self) -> String {
        format!("{}/oauth/google/callback", self.app_base_url)
    }

    pub fn gsc_redirect_uri(&self) -> String {
        format!("{}/oauth/gsc/callback", self.app_base_url)
    }

    pub fn slack_redirect_uri(&self) -> String {
        format!("{}/oauth/slack/callback", self.app_base_url)
    }

    /// Config for unit tests; never reads the environment.
    #[cfg(test)]
    pub fn for_tests() -> Self {
        Self {
            database_url: "postgres://localhost/sem_agent_test".into(),
            slack_signing_secret: "test-signing-secret".into(),
            encryption_key: "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef"
                .into(),
            slack_client_id: None,
            slack_client_secret: None,
            slack_bot_token: None,
            google_client_id: None,
            google_client_secret: None,
            google_developer_token: None,
            google_login_customer_id: None,
            gemini_api_key: None,
            gemini_flash_model: "gemini-2.0-flash".into(),
            gemini_pro_model: "gemini-1.5-pro".into(),
            app_base_url: "http://localhost:8000".into(),
            environment: "test".into(),
            debug: true,
            admin_logs: String::new(),
            admin_slack_channel: None,
            admin_log_level: 50,
            port: 8000,
            intervals: TaskIntervals::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_parsed_records_invalid_value() {
        std::env::set_var("SEM_AGENT_TEST_PORT", "not-a-port");
        let mut invalid = Vec::new();
        let port = get_parsed("SEM_AGENT_TEST_PORT", 8000u16, &mut invalid);
        assert_eq!(port, 8000);
        assert_eq!(invalid.len(), 1);
        assert_eq!(invalid[0].0, "SEM_AGENT_TEST_PORT");
        std::env::remove_var("SEM_AGENT_TEST_PORT");
    }

    #[test]
    fn test_get_interval_rejects_zero() {
        std::env::set_var("SEM_AGENT_TEST_INTERVAL", "0");
        let mut invalid = Vec::new();
        let interval = get_interval(
            "SEM_AGENT_TEST_INTERVAL",
            Duration::from_secs(300),
            &mut invalid,
        );
        assert_eq!(interval, Duration::from_secs(300));
        assert_eq!(invalid.len(), 1);
        std::env::remove_var("SEM_AGENT_TEST_INTERVAL");
    }

    #[test]
    fn test_missing_required_collected() {
        let mut missing = Vec::new();
        assert!(get_required("SEM_AGENT_DEFINITELY_UNSET", &mut missing).is_none());
        assert_eq!(missing, vec!["SEM_AGENT_DEFINITELY_UNSET".to_string()]);
    }

    #[test]
    fn test_config_error_display_lists_everything() {
        let err = ConfigError {
            missing_vars: vec!["DATABASE_URL".into()],
            invalid_vars: vec![("PORT".into(), "invalid digit".into())],
        };
        let text = err.to_string();
        assert!(text.contains("DATABASE_URL"));
        assert!(text.contains("PORT: invalid digit"));
    }

    #[test]
    fn test_redirect_uris() {
        let config = AppConfig::for_tests();
        assert_eq!(
            config.google_redirect_uri(),
            "http://localhost:8000/oauth/google/callback"
        );
        assert_eq!(
            config.slack_redirect_uri(),
            "http://localhost:8000/oauth/slack/callback"
        );
    }
}
