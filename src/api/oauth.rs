//! Browser-facing OAuth endpoints. Authorize routes redirect to the provider; callbacks render
//! a short page telling the user to return to Slack.

use crate::error::AppError;
use crate::i18n::{t, t_with_args, DEFAULT_LANG};
use crate::services::oauth::{self, OAuthFlow};
use crate::state::AppState;
use actix_web::http::{header, StatusCode};
use actix_web::{get, web, HttpResponse, ResponseError};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct AuthorizeQuery {
    pub tenant_id: i32,
}

#[derive(Debug, Deserialize)]
pub struct InstallQuery {
    pub tenant_id: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

impl CallbackQuery {
    /// `(state, code)`, or the page to show when the provider sent the user back without them.
    fn into_parts(self) -> Result<(String, String), HttpResponse> {
        if let Some(error) = self.error {
            tracing::warn!("OAuth consent denied: {}", error);
            return Err(page(
                StatusCode::BAD_REQUEST,
                &t_with_args(DEFAULT_LANG, "oauth.failed", &[&error]),
            ));
        }
        match (self.state, self.code) {
            (Some(state), Some(code)) if !state.is_empty() && !code.is_empty() => Ok((state, code)),
            _ => Err(page(
                StatusCode::BAD_REQUEST,
                &t(DEFAULT_LANG, "oauth.invalid_state"),
            )),
        }
    }
}

fn redirect(url: String) -> HttpResponse {
    HttpResponse::Found()
        .insert_header((header::LOCATION, url))
        .finish()
}

fn page(status: StatusCode, message: &str) -> HttpResponse {
    HttpResponse::build(status)
        .content_type("text/html; charset=utf-8")
        .body(format!(
            "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>SEM Agent</title></head>\
             <body><p>{}</p></body></html>",
            html_escape::encode_text(message)
        ))
}

fn failure_page(flow: OAuthFlow, err: AppError) -> HttpResponse {
    tracing::error!("{} OAuth callback failed: {}", flow.as_str(), err);
    match err {
        AppError::InvalidToken => page(
            StatusCode::BAD_REQUEST,
            &t(DEFAULT_LANG, "oauth.invalid_state"),
        ),
        other => page(
            other.status_code(),
            &t_with_args(
                DEFAULT_LANG,
                "oauth.failed",
                &[&other.user_message(DEFAULT_LANG)],
            ),
        ),
    }
}

#[get("/oauth/google/authorize")]
pub async fn google_authorize(
    state: web::Data<AppState>,
    query: web::Query<AuthorizeQuery>,
) -> Result<HttpResponse, AppError> {
    let url = oauth::begin_google(&state, OAuthFlow::GoogleAds, query.tenant_id).await?;
    Ok(redirect(url))
}

#[get("/oauth/google/callback")]
pub async fn google_callback(
    state: web::Data<AppState>,
    query: web::Query<CallbackQuery>,
) -> HttpResponse {
    let (state_param, code) = match query.into_inner().into_parts() {
        Ok(parts) => parts,
        Err(response) => return response,
    };

    match oauth::complete_google(&state, &state_param, &code).await {
        Ok(_) => page(StatusCode::OK, &t(DEFAULT_LANG, "oauth.google_success")),
        Err(e) => failure_page(OAuthFlow::GoogleAds, e),
    }
}

#[get("/oauth/gsc/authorize")]
pub async fn gsc_authorize(
    state: web::Data<AppState>,
    query: web::Query<AuthorizeQuery>,
) -> Result<HttpResponse, AppError> {
    let url = oauth::begin_google(&state, OAuthFlow::SearchConsole, query.tenant_id).await?;
    Ok(redirect(url))
}

#[get("/oauth/gsc/callback")]
pub async fn gsc_callback(
    state: web::Data<AppState>,
    query: web::Query<CallbackQuery>,
) -> HttpResponse {
    let (state_param, code) = match query.into_inner().into_parts() {
        Ok(parts) => parts,
        Err(response) => return response,
    };

    match oauth::complete_search_console(&state, &state_param, &code).await {
        Ok(_) => page(StatusCode::OK, &t(DEFAULT_LANG, "oauth.gsc_success")),
        Err(e) => failure_page(OAuthFlow::SearchConsole, e),
    }
}

#[get("/oauth/slack/install")]
pub async fn slack_install(
    state: web::Data<AppState>,
    query: web::Query<InstallQuery>,
) -> Result<HttpResponse, AppError> {
    let url = oauth::begin_slack_install(&state, query.tenant_id).await?;
    Ok(redirect(url))
}

#[get("/oauth/slack/callback")]
pub async fn slack_callback(
    state: web::Data<AppState>,
    query: web::Query<CallbackQuery>,
) -> HttpResponse {
    let (state_param, code) = match query.into_inner().into_parts() {
        Ok(parts) => parts,
        Err(response) => return response,
    };

    match oauth::complete_slack_install(&state, &state_param, &code).await {
        Ok(_) => page(StatusCode::OK, &t(DEFAULT_LANG, "oauth.slack_success")),
        Err(e) => failure_page(OAuthFlow::SlackInstall, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(code: Option<&str>, state: Option<&str>, error: Option<&str>) -> CallbackQuery {
        CallbackQuery {
            code: code.map(String::from),
            state: state.map(String::from),
            error: error.map(String::from),
        }
    }

    #[test]
    fn test_callback_requires_code_and_state() {
        let (state, code) = query(Some("c"), Some("1:tok"), None).into_parts().unwrap();
        assert_eq!(state, "1:tok");
        assert_eq!(code, "c");

        let denied = query(None, None, Some("access_denied")).into_parts().unwrap_err();
        assert_eq!(denied.status(), StatusCode::BAD_REQUEST);

        let missing = query(Some("c"), None, None).into_parts().unwrap_err();
        assert_eq!(missing.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_invalid_state_page() {
        let response = failure_page(OAuthFlow::GoogleAds, AppError::InvalidToken);
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = failure_page(OAuthFlow::GoogleAds, AppError::google_ads("boom"));
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }
}
