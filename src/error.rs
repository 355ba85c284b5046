use crate::clients::ClientError;
use crate::db::DbError;
use crate::i18n::{t, t_with_args, DEFAULT_LANG};
use actix_web::http::{header, StatusCode};
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;

pub const CORRELATION_HEADER: &str = "X-Correlation-ID";

tokio::task_local! {
    /// Correlation id of the request being served, set by the request logging middleware.
    pub static CORRELATION_ID: String;
}

pub fn current_correlation_id() -> Option<String> {
    CORRELATION_ID.try_with(|id| id.clone()).ok()
}

#[derive(Debug)]
pub enum AppError {
    TenantNotFound(String),
    InvalidToken,
    OAuth { provider: String },
    RateLimitExceeded { retry_after: u64 },
    GoogleAdsApi(String),
    SlackApi(String),
    Gemini(String),
    ApprovalExpired,
    Validation(String),
    NotFound,
    Database(DbError),
    Internal(String),
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn google_ads(err: impl std::fmt::Display) -> Self {
        AppError::GoogleAdsApi(err.to_string())
    }

    pub fn slack(err: impl std::fmt::Display) -> Self {
        AppError::SlackApi(err.to_string())
    }

    pub fn gemini(err: impl std::fmt::Display) -> Self {
        AppError::Gemini(err.to_string())
    }

    pub fn internal(err: impl std::fmt::Display) -> Self {
        AppError::Internal(err.to_string())
    }

    pub fn oauth(provider: &str) -> Self {
        AppError::OAuth {
            provider: provider.to_string(),
        }
    }

    /// Maps a client failure for `provider`: rejected credentials become a reconnect prompt,
    /// upstream throttling becomes a rate-limit error.
    pub fn from_client(provider: &str, err: ClientError) -> Self {
        if err.is_unauthorized() {
            return AppError::oauth(provider);
        }
        match (provider, err) {
            (_, ClientError::RateLimited { retry_after }) => {
                AppError::RateLimitExceeded { retry_after }
            }
            ("slack", err) => AppError::slack(err),
            ("gemini", err) => AppError::gemini(err),
            (_, err) => AppError::google_ads(err),
        }
    }

    /// Machine-readable code placed in the `error` field.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::TenantNotFound(_) => "tenant_not_found",
            AppError::InvalidToken => "invalid_token",
            AppError::OAuth { .. } => "oauth_expired",
            AppError::RateLimitExceeded { .. } => "rate_limit_exceeded",
            AppError::GoogleAdsApi(_) => "google_ads_error",
            AppError::SlackApi(_) => "slack_error",
            AppError::Gemini(_) => "gemini_error",
            AppError::ApprovalExpired => "approval_expired",
            AppError::Validation(_) => "validation_error",
            AppError::NotFound => "not_found",
            AppError::Database(_) | AppError::Internal(_) => "internal_error",
        }
    }

    /// User-facing message in the given language.
    pub fn user_message(&self, lang: &str) -> String {
        match self {
            AppError::TenantNotFound(id) => t_with_args(lang, "errors.tenant_not_found", &[id]),
            AppError::InvalidToken => t(lang, "errors.invalid_token"),
            AppError::OAuth { provider } => {
                t_with_args(lang, "errors.oauth_expired", &[provider_label(provider)])
            }
            AppError::RateLimitExceeded { retry_after } => {
                t_with_args(lang, "errors.rate_limited", &[&retry_after.to_string()])
            }
            AppError::GoogleAdsApi(_) => t(lang, "errors.google_ads"),
            AppError::SlackApi(_) => t(lang, "errors.slack"),
            AppError::Gemini(_) => t(lang, "errors.gemini"),
            AppError::ApprovalExpired => t(lang, "errors.approval_expired"),
            AppError::Validation(reason) => t_with_args(lang, "errors.validation", &[reason]),
            AppError::NotFound => t(lang, "errors.not_found"),
            AppError::Database(_) | AppError::Internal(_) => t(lang, "errors.internal"),
        }
    }
}

fn provider_label(provider: &str) -> &str {
    match provider {
        "google" => "Google Ads",
        "gsc" => "Search Console",
        "slack" => "Slack",
        other => other,
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AppError::TenantNotFound(id) => write!(f, "Tenant not found: {}", id),
            AppError::InvalidToken => write!(f, "Invalid or expired token"),
            AppError::OAuth { provider } => write!(f, "OAuth connection expired: {}", provider),
            AppError::RateLimitExceeded { retry_after } => {
                write!(f, "Rate limit exceeded, retry after {}s", retry_after)
            }
            AppError::GoogleAdsApi(e) => write!(f, "Google Ads API error: {}", e),
            AppError::SlackApi(e) => write!(f, "Slack API error: {}", e),
            AppError::Gemini(e) => write!(f, "Gemini error: {}", e),
            AppError::ApprovalExpired => write!(f, "Approval request expired"),
            AppError::Validation(reason) => write!(f, "Validation error: {}", reason),
            AppError::NotFound => write!(f, "Resource not found"),
            AppError::Database(e) => write!(f, "{}", e),
            AppError::Internal(e) => write!(f, "Internal error: {}", e),
        }
    }
}

impl std::error::Error for AppError {}

impl From<DbError> for AppError {
    fn from(err: DbError) -> Self {
        if err.is_not_found() {
            AppError::NotFound
        } else {
            AppError::Database(err)
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::TenantNotFound(_) | AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::InvalidToken | AppError::OAuth { .. } => StatusCode::UNAUTHORIZED,
            AppError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::GoogleAdsApi(_) | AppError::SlackApi(_) => StatusCode::BAD_GATEWAY,
            AppError::Gemini(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::ApprovalExpired => StatusCode::GONE,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Database(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        let correlation_id = current_correlation_id().unwrap_or_default();

        if status.is_server_error() {
            tracing::error!(
                correlation_id = %correlation_id,
                error_code = self.code(),
                "Request failed: {}",
                self
            );
        } else {
            tracing::warn!(
                correlation_id = %correlation_id,
                error_code = self.code(),
                "Request rejected: {}",
                self
            );
        }

        let mut body = json!({
            "error": self.code(),
            "message": self.user_message(DEFAULT_LANG),
            "correlation_id": correlation_id,
        });

        let mut builder = HttpResponse::build(status);
        if !correlation_id.is_empty() {
            builder.insert_header((CORRELATION_HEADER, correlation_id.clone()));
        }

        match self {
            AppError::OAuth { provider } => {
                body["provider"] = json!(provider);
                body["action_required"] = json!("reconnect");
            }
            AppError::RateLimitExceeded { retry_after } => {
                body["retry_after"] = json!(retry_after);
                builder.insert_header((header::RETRY_AFTER, retry_after.to_string()));
            }
            _ => {}
        }

        builder.json(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::body::to_bytes;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            AppError::TenantNotFound("T1".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(AppError::InvalidToken.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::oauth("google").status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            AppError::RateLimitExceeded { retry_after: 5 }.status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(AppError::google_ads("x").status_code(), StatusCode::BAD_GATEWAY);
        assert_eq!(AppError::slack("x").status_code(), StatusCode::BAD_GATEWAY);
        assert_eq!(
            AppError::gemini("x").status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(AppError::ApprovalExpired.status_code(), StatusCode::GONE);
        assert_eq!(
            AppError::Validation("bad".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::internal("boom").status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_korean_messages() {
        assert_eq!(
            AppError::TenantNotFound("T123".into()).user_message("ko"),
            "테넌트를 찾을 수 없습니다: T123"
        );
        assert_eq!(
            AppError::oauth("google").user_message("ko"),
            "Google Ads 연결이 만료되었습니다. [다시 연결]"
        );
        assert_eq!(
            AppError::Validation("time_of_day".into()).user_message("ko"),
            "입력 값을 확인해주세요: time_of_day"
        );
        assert_eq!(
            AppError::internal("secret detail").user_message("ko"),
            "서버 오류가 발생했습니다. 잠시 후 다시 시도해주세요."
        );
    }

    #[test]
    fn test_from_client() {
        let unauthorized = ClientError::Status {
            status: 401,
            body: "UNAUTHENTICATED".into(),
        };
        assert!(matches!(
            AppError::from_client("google", unauthorized),
            AppError::OAuth { ref provider } if provider == "google"
        ));
        assert!(matches!(
            AppError::from_client("gemini", ClientError::RateLimited { retry_after: 9 }),
            AppError::RateLimitExceeded { retry_after: 9 }
        ));
        assert!(matches!(
            AppError::from_client("slack", ClientError::Api("channel_not_found".into())),
            AppError::SlackApi(_)
        ));
        assert!(matches!(
            AppError::from_client("google", ClientError::Api("quota".into())),
            AppError::GoogleAdsApi(_)
        ));
    }

    #[test]
    fn test_not_found_db_error_maps_to_not_found() {
        let err: AppError = DbError::DieselError(diesel::result::Error::NotFound).into();
        assert!(matches!(err, AppError::NotFound));
    }

    #[actix_web::test]
    async fn test_rate_limit_response_has_retry_after() {
        let response = CORRELATION_ID
            .scope("corr-1".to_string(), async {
                AppError::RateLimitExceeded { retry_after: 17 }.error_response()
            })
            .await;

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response.headers().get(header::RETRY_AFTER).unwrap(),
            "17"
        );
        assert_eq!(
            response.headers().get(CORRELATION_HEADER).unwrap(),
            "corr-1"
        );

        let body = to_bytes(response.into_body()).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "rate_limit_exceeded");
        assert_eq!(json["retry_after"], 17);
        assert_eq!(json["correlation_id"], "corr-1");
    }

    #[actix_web::test]
    async fn test_oauth_response_requests_reconnect() {
        let response = AppError::oauth("google").error_response();
        let body = to_bytes(response.into_body()).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "oauth_expired");
        assert_eq!(json["action_required"], "reconnect");
        assert_eq!(json["provider"], "google");
    }
}
