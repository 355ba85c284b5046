//! Google OAuth2: consent URLs, code exchange and refresh-token grants.

use super::{check_status, ClientError, ClientResult};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Mutex;

const AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

pub const ADWORDS_SCOPE: &str = "https://www.googleapis.com/auth/adwords";
pub const WEBMASTERS_SCOPE: &str = "https://www.googleapis.com/auth/webmasters.readonly";

/// Cached access tokens are refreshed this long before they expire.
const EXPIRY_MARGIN_SECS: i64 = 60;

#[derive(Debug, Clone, Deserialize)]
pub struct GoogleTokenResponse {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: Option<i64>,
    pub scope: Option<String>,
    pub token_type: Option<String>,
}

impl GoogleTokenResponse {
    pub fn expires_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + ChronoDuration::seconds(self.expires_in.unwrap_or(3600))
    }
}

/// Whether a token expiring at `expires_at` is safe to hand out at `now`.
pub fn still_valid(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    expires_at - ChronoDuration::seconds(EXPIRY_MARGIN_SECS) > now
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

pub struct GoogleOAuthClient {
    http: reqwest::Client,
    client_id: Option<String>,
    client_secret: Option<String>,
    cache: Mutex<HashMap<String, CachedToken>>,
}

impl GoogleOAuthClient {
    pub fn new(
        http: reqwest::Client,
        client_id: Option<String>,
        client_secret: Option<String>,
    ) -> Self {
        Self {
            http,
            client_id,
            client_secret,
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn credentials(&self) -> ClientResult<(&str, &str)> {
        match (self.client_id.as_deref(), self.client_secret.as_deref()) {
            (Some(id), Some(secret)) => Ok((id, secret)),
            _ => Err(ClientError::NotConfigured("GOOGLE_CLIENT_ID/GOOGLE_CLIENT_SECRET")),
        }
    }

    pub fn authorize_url(&self, scope: &str, redirect_uri: &str, state: &str) -> ClientResult<String> {
        let (client_id, _) = self.credentials()?;
        let url = url::Url::parse_with_params(
            AUTH_URL,
            &[
                ("client_id", client_id),
                ("redirect_uri", redirect_uri),
                ("response_type", "code"),
                ("scope", scope),
                ("access_type", "offline"),
                ("prompt", "consent"),
                ("include_granted_scopes", "true"),
                ("state", state),
            ],
        )
        .map_err(|e| ClientError::Decode(e.to_string()))?;
        Ok(url.into())
    }

    pub async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> ClientResult<GoogleTokenResponse> {
        let (client_id, client_secret) = self.credentials()?;

        let response = self
            .http
            .post(TOKEN_URL)
            .form(&[
                ("code", code),
                ("client_id", client_id),
                ("client_secret", client_secret),
                ("redirect_uri", redirect_uri),
                ("grant_type", "authorization_code"),
            ])
            .send()
            .await?;

        Ok(check_status(response).await?.json().await?)
    }

    pub async fn refresh(&self, refresh_token: &str) -> ClientResult<GoogleTokenResponse> {
        let (client_id, client_secret) = self.credentials()?;

        let response = self
            .http
            .post(TOKEN_URL)
            .form(&[
                ("client_id", client_id),
                ("client_secret", client_secret),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await?;

        Ok(check_status(response).await?.json().await?)
    }

    /// Returns a cached access token for `cache_key`, refreshing through `refresh_token` when
    /// the cached one is missing or about to expire.
    pub async fn access_token(&self, cache_key: &str, refresh_token: &str) -> ClientResult<String> {
        let now = Utc::now();
        if let Some(token) = self.cached(cache_key, now) {
            return Ok(token);
        }

        let fresh = self.refresh(refresh_token).await?;
        let cached = CachedToken {
            access_token: fresh.access_token.clone(),
            expires_at: fresh.expires_at(now),
        };
        self.lock_cache().insert(cache_key.to_string(), cached);
        tracing::debug!("Refreshed Google access token for {}", cache_key);

        Ok(fresh.access_token)
    }

    /// Caches an access token obtained elsewhere (code exchange, background refresh, storage).
    pub fn remember(&self, cache_key: &str, access_token: &str, expires_at: DateTime<Utc>) {
        self.lock_cache().insert(
            cache_key.to_string(),
            CachedToken {
                access_token: access_token.to_string(),
                expires_at,
            },
        );
    }

    pub fn invalidate(&self, cache_key: &str) {
        self.lock_cache().remove(cache_key);
    }

    fn cached(&self, cache_key: &str, now: DateTime<Utc>) -> Option<String> {
        let cache = self.lock_cache();
        cache
            .get(cache_key)
            .filter(|t| still_valid(t.expires_at, now))
            .map(|t| t.access_token.clone())
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, HashMap<String, CachedToken>> {
        match self.cache.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!("Google token cache mutex poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> GoogleOAuthClient {
        GoogleOAuthClient::new(
            reqwest::Client::new(),
            Some("client-id.apps.googleusercontent.com".into()),
            Some("secret".into()),
        )
    }

    #[test]
    fn test_authorize_url_requests_offline_consent() {
        let url = client()
            .authorize_url(ADWORDS_SCOPE, "http://localhost:8000/oauth/google/callback", "3:tok")
            .unwrap();

        assert!(url.starts_with(AUTH_URL));
        assert!(url.contains("access_type=offline"));
        assert!(url.contains("prompt=consent"));
        assert!(url.contains("state=3%3Atok"));
        assert!(url.contains("scope=https%3A%2F%2Fwww.googleapis.com%2Fauth%2Fadwords"));
    }

    #[test]
    fn test_missing_credentials() {
        let client = GoogleOAuthClient::new(reqwest::Client::new(), None, None);
        assert!(matches!(
            client.authorize_url(ADWORDS_SCOPE, "x", "y"),
            Err(ClientError::NotConfigured(_))
        ));
    }

    #[test]
    fn test_cache_honours_expiry_margin() {
        let client = client();
        let now = Utc::now();
        client.lock_cache().insert(
            "tenant:1".into(),
            CachedToken {
                access_token: "fresh".into(),
                expires_at: now + ChronoDuration::seconds(600),
            },
        );
        client.lock_cache().insert(
            "tenant:2".into(),
            CachedToken {
                access_token: "stale".into(),
                expires_at: now + ChronoDuration::seconds(30),
            },
        );

        assert_eq!(client.cached("tenant:1", now).as_deref(), Some("fresh"));
        assert_eq!(client.cached("tenant:2", now), None);

        client.invalidate("tenant:1");
        assert_eq!(client.cached("tenant:1", now), None);
    }

    #[test]
    fn test_remembered_token_is_served_without_refresh() {
        let client = client();
        let now = Utc::now();

        client.remember("google:7", "refreshed", now + ChronoDuration::seconds(3600));
        assert_eq!(client.cached("google:7", now).as_deref(), Some("refreshed"));

        client.remember("google:7", "newer", now + ChronoDuration::seconds(3600));
        assert_eq!(client.cached("google:7", now).as_deref(), Some("newer"));

        client.remember("google:8", "almost", now + ChronoDuration::seconds(30));
        assert_eq!(client.cached("google:8", now), None);
        assert!(!still_valid(now + ChronoDuration::seconds(30), now));
    }

    #[test]
    fn test_token_response_expiry_default() {
        let response: GoogleTokenResponse =
            serde_json::from_str(r#"{"access_token":"a"}"#).unwrap();
        let now = Utc::now();
        assert_eq!(response.expires_at(now), now + ChronoDuration::seconds(3600));
    }
}
