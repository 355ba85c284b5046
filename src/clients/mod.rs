pub mod gemini;
pub mod google_ads;
pub mod google_oauth;
pub mod search_console;
pub mod slack;

use std::time::Duration;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug)]
pub enum ClientError {
    Http(reqwest::Error),
    Status { status: u16, body: String },
    Api(String),
    Decode(String),
    NotConfigured(&'static str),
    RateLimited { retry_after: u64 },
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientError::Http(e) => write!(f, "HTTP error: {}", e),
            ClientError::Status { status, body } => write!(f, "HTTP {}: {}", status, body),
            ClientError::Api(e) => write!(f, "API error: {}", e),
            ClientError::Decode(e) => write!(f, "Decode error: {}", e),
            ClientError::NotConfigured(what) => write!(f, "{} is not configured", what),
            ClientError::RateLimited { retry_after } => {
                write!(f, "Rate limited, retry after {}s", retry_after)
            }
        }
    }
}

impl std::error::Error for ClientError {}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        ClientError::Http(err)
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Decode(err.to_string())
    }
}

impl ClientError {
    /// True for 401/403 responses, which mean the stored credentials are no longer usable.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ClientError::Status { status: 401 | 403, .. })
    }
}

pub type ClientResult<T> = Result<T, ClientError>;

pub fn build_http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!("Falling back to default HTTP client: {}", e);
            reqwest::Client::new()
        })
}

/// Turns a non-2xx response into `ClientError::Status`, reading 429 `Retry-After`.
pub(crate) async fn check_status(response: reqwest::Response) -> ClientResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if status.as_u16() == 429 {
        let retry_after = response
            .headers()
            .get("Retry-After")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse().ok())
            .unwrap_or(30);
        return Err(ClientError::RateLimited { retry_after });
    }

    let body = response.text().await.unwrap_or_default();
    Err(ClientError::Status {
        status: status.as_u16(),
        body,
    })
}
