use crate::clients::gemini::GeminiClient;
use crate::clients::google_ads::GoogleAdsClient;
use crate::clients::google_oauth::GoogleOAuthClient;
use crate::clients::search_console::SearchConsoleClient;
use crate::clients::slack::SlackClient;
use crate::clients::build_http_client;
use crate::config::AppConfig;
use crate::crypto::TokenCipher;
use crate::db::DbPool;
use std::sync::Arc;

/// Shared dependencies for handlers and background loops. Cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub config: Arc<AppConfig>,
    pub cipher: TokenCipher,
    pub slack: SlackClient,
    pub google_oauth: Arc<GoogleOAuthClient>,
    pub google_ads: GoogleAdsClient,
    pub search_console: SearchConsoleClient,
    pub gemini: Arc<GeminiClient>,
}

impl AppState {
    pub fn new(pool: DbPool, config: AppConfig, cipher: TokenCipher) -> Self {
        let http = build_http_client();

        Self {
            slack: SlackClient::new(http.clone()),
            google_oauth: Arc::new(GoogleOAuthClient::new(
                http.clone(),
                config.google_client_id.clone(),
                config.google_client_secret.clone(),
            )),
            google_ads: GoogleAdsClient::new(
                http.clone(),
                config.google_developer_token.clone(),
                config.google_login_customer_id.clone(),
            ),
            search_console: SearchConsoleClient::new(http.clone()),
            gemini: Arc::new(GeminiClient::new(
                http,
                config.gemini_api_key.clone(),
                config.gemini_flash_model.clone(),
                config.gemini_pro_model.clone(),
            )),
            pool,
            config: Arc::new(config),
            cipher,
        }
    }
}
