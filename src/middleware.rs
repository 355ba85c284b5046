//! HTTP middleware: correlation ids and request logging, tenant context, per-tenant rate limits.

use crate::clients::{build_http_client, slack::SlackClient};
use crate::error::{AppError, CORRELATION_HEADER, CORRELATION_ID};
use crate::i18n::{t, t_with_args, DEFAULT_LANG};
use crate::observability::alerts::Severity;
use crate::observability::{ALERTS, METRICS};
use crate::rate_limit::{ApiKind, RateLimiter};
use actix_web::body::{BoxBody, MessageBody};
use actix_web::dev::{ServiceRequest, ServiceResponse};
use actix_web::http::header::{self, HeaderName, HeaderValue};
use actix_web::middleware::Next;
use actix_web::{web, Error, HttpMessage, HttpResponse, ResponseError};
use serde_json::json;
use std::time::Instant;
use uuid::Uuid;

pub const WORKSPACE_HEADER: &str = "X-Workspace-ID";

const RATE_LIMIT_EXEMPT_PATHS: &[&str] = &["/health", "/"];

/// Tenant resolved for the current request, readable by handlers via `web::ReqData`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantContext {
    pub tenant_id: String,
}

fn correlation_id_from(req: &ServiceRequest) -> String {
    req.headers()
        .get(CORRELATION_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty() && v.len() <= 128)
        .map(String::from)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

pub async fn request_logging(
    req: ServiceRequest,
    next: Next<impl MessageBody + 'static>,
) -> Result<ServiceResponse<BoxBody>, Error> {
    let correlation_id = correlation_id_from(&req);
    let method = req.method().clone();
    let path = req.path().to_string();
    let start = Instant::now();

    let mut res = CORRELATION_ID
        .scope(correlation_id.clone(), next.call(req))
        .await?
        .map_into_boxed_body();

    METRICS.increment_http_requests();

    // Errors that are not ours still get the generic body and a correlation id
    let foreign_error = res
        .response()
        .error()
        .filter(|e| e.as_error::<AppError>().is_none() && res.status().is_server_error())
        .map(|e| e.to_string());
    if let Some(detail) = foreign_error {
        let replacement = CORRELATION_ID.sync_scope(correlation_id.clone(), || {
            AppError::internal(detail).error_response()
        });
        res = res.into_response(replacement);
    }

    if let Ok(value) = HeaderValue::from_str(&correlation_id) {
        res.headers_mut()
            .insert(HeaderName::from_static("x-correlation-id"), value);
    }

    let status = res.status();
    let latency_ms = start.elapsed().as_secs_f64() * 1000.0;

    if status.is_server_error() {
        tracing::error!(
            correlation_id = %correlation_id,
            method = %method,
            path = %path,
            status = status.as_u16(),
            latency_ms = %format!("{:.2}", latency_ms),
            "Server error"
        );

        let tenant = res
            .request()
            .extensions()
            .get::<TenantContext>()
            .map(|c| c.tenant_id.clone());
        if let Some(tenant_id) = tenant {
            let message = format!(
                "{} {} -> {} (tenant {}, correlation {})",
                method, path, status, tenant_id, correlation_id
            );
            tokio::spawn(async move {
                let slack = SlackClient::new(build_http_client());
                ALERTS
                    .send_alert(&slack, Severity::Error, "HTTP", &message)
                    .await;
            });
        }
    } else if status.is_client_error() {
        tracing::warn!(
            correlation_id = %correlation_id,
            method = %method,
            path = %path,
            status = status.as_u16(),
            latency_ms = %format!("{:.2}", latency_ms),
            "Client error"
        );
    } else {
        tracing::info!(
            correlation_id = %correlation_id,
            method = %method,
            path = %path,
            status = status.as_u16(),
            latency_ms = %format!("{:.2}", latency_ms),
            "Request completed"
        );
    }

    Ok(res)
}

/// Tenant id from the `workspace_id` query parameter, else the `X-Workspace-ID` header.
pub fn extract_tenant_id(req: &ServiceRequest) -> Option<String> {
    let from_query = serde_urlencoded::from_str::<Vec<(String, String)>>(req.query_string())
        .ok()
        .and_then(|pairs| {
            pairs
                .into_iter()
                .find(|(k, v)| k == "workspace_id" && !v.is_empty())
                .map(|(_, v)| v)
        });

    from_query.or_else(|| {
        req.headers()
            .get(WORKSPACE_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(String::from)
    })
}

pub async fn tenant_context(
    req: ServiceRequest,
    next: Next<impl MessageBody + 'static>,
) -> Result<ServiceResponse<impl MessageBody>, Error> {
    if let Some(tenant_id) = extract_tenant_id(&req) {
        req.extensions_mut().insert(TenantContext { tenant_id });
    }
    next.call(req).await
}

pub fn rate_limited_response(retry_after: u64) -> HttpResponse {
    let seconds = retry_after.to_string();
    HttpResponse::TooManyRequests()
        .insert_header((header::RETRY_AFTER, seconds.clone()))
        .json(json!({
            "error": t(DEFAULT_LANG, "rate_limit.exceeded"),
            "message": t_with_args(DEFAULT_LANG, "rate_limit.retry_after", &[&seconds]),
            "retry_after": retry_after,
        }))
}

pub async fn rate_limit(
    req: ServiceRequest,
    next: Next<impl MessageBody + 'static>,
) -> Result<ServiceResponse<BoxBody>, Error> {
    let path = req.path().to_string();
    if RATE_LIMIT_EXEMPT_PATHS.contains(&path.as_str()) {
        return Ok(next.call(req).await?.map_into_boxed_body());
    }

    let tenant = req
        .extensions()
        .get::<TenantContext>()
        .map(|c| c.tenant_id.clone());
    let limiter = req.app_data::<web::Data<RateLimiter>>().cloned();

    let (Some(tenant_id), Some(limiter)) = (tenant, limiter) else {
        return Ok(next.call(req).await?.map_into_boxed_body());
    };

    let api = ApiKind::from_path(&path);
    let decision = limiter.check(&tenant_id, api).await;

    if !decision.allowed {
        METRICS.increment_rate_limited();
        tracing::warn!(
            tenant_id = %tenant_id,
            api = api.as_str(),
            count = decision.count,
            limit = decision.limit,
            "Rate limit exceeded"
        );
        return Ok(req.into_response(rate_limited_response(decision.retry_after)));
    }

    Ok(next.call(req).await?.map_into_boxed_body())
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::middleware::from_fn;
    use actix_web::{test, App, HttpRequest};

    async fn echo_tenant(ctx: Option<web::ReqData<TenantContext>>) -> HttpResponse {
        match ctx {
            Some(ctx) => HttpResponse::Ok().body(ctx.tenant_id.clone()),
            None => HttpResponse::Ok().body("none"),
        }
    }

    async fn failing(_: HttpRequest) -> Result<HttpResponse, AppError> {
        Err(AppError::Validation("limit".into()))
    }

    #[actix_web::test]
    async fn test_rate_limit_allows_up_to_limit_then_429() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(RateLimiter::in_memory()))
                .wrap(from_fn(rate_limit))
                .wrap(from_fn(tenant_context))
                .route("/slack/commands", web::post().to(echo_tenant)),
        )
        .await;

        for _ in 0..ApiKind::Slack.limit() {
            let req = test::TestRequest::post()
                .uri("/slack/commands")
                .insert_header((WORKSPACE_HEADER, "T1"))
                .to_request();
            let res = test::call_service(&app, req).await;
            assert!(res.status().is_success());
        }

        let req = test::TestRequest::post()
            .uri("/slack/commands")
            .insert_header((WORKSPACE_HEADER, "T1"))
            .to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.status(), 429);

        let retry_after: u64 = res
            .headers()
            .get(header::RETRY_AFTER)
            .unwrap()
            .to_str()
            .unwrap()
            .parse()
            .unwrap();
        assert!((1..=60).contains(&retry_after));

        let body: serde_json::Value = test::read_body_json(res).await;
        assert_eq!(body["error"], "요청 한도를 초과했습니다");
        assert_eq!(
            body["message"],
            format!("{}초 후 다시 시도해주세요", retry_after)
        );
        assert_eq!(body["retry_after"], retry_after);
    }

    #[actix_web::test]
    async fn test_requests_without_tenant_are_not_limited() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(RateLimiter::in_memory()))
                .wrap(from_fn(rate_limit))
                .wrap(from_fn(tenant_context))
                .route("/slack/events", web::post().to(echo_tenant)),
        )
        .await;

        for _ in 0..(ApiKind::Slack.limit() + 5) {
            let req = test::TestRequest::post().uri("/slack/events").to_request();
            let res = test::call_service(&app, req).await;
            assert!(res.status().is_success());
        }
    }

    #[actix_web::test]
    async fn test_health_is_exempt() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(RateLimiter::in_memory()))
                .wrap(from_fn(rate_limit))
                .wrap(from_fn(tenant_context))
                .route("/health", web::get().to(echo_tenant)),
        )
        .await;

        for _ in 0..(ApiKind::Default.limit() + 1) {
            let req = test::TestRequest::get()
                .uri("/health?workspace_id=T1")
                .to_request();
            let res = test::call_service(&app, req).await;
            assert!(res.status().is_success());
        }
    }

    #[actix_web::test]
    async fn test_tenant_context_prefers_query_parameter() {
        let app = test::init_service(
            App::new()
                .wrap(from_fn(tenant_context))
                .route("/api/v1/reports", web::get().to(echo_tenant)),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/api/v1/reports?workspace_id=TQUERY")
            .insert_header((WORKSPACE_HEADER, "THEADER"))
            .to_request();
        let body = test::call_and_read_body(&app, req).await;
        assert_eq!(body, "TQUERY");

        let req = test::TestRequest::get()
            .uri("/api/v1/reports")
            .insert_header((WORKSPACE_HEADER, "THEADER"))
            .to_request();
        let body = test::call_and_read_body(&app, req).await;
        assert_eq!(body, "THEADER");

        let req = test::TestRequest::get().uri("/api/v1/reports").to_request();
        let body = test::call_and_read_body(&app, req).await;
        assert_eq!(body, "none");
    }

    #[actix_web::test]
    async fn test_request_logging_sets_correlation_id() {
        let app = test::init_service(
            App::new()
                .wrap(from_fn(request_logging))
                .route("/fail", web::get().to(failing)),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/fail")
            .insert_header((CORRELATION_HEADER, "corr-abc"))
            .to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.status(), 400);
        assert_eq!(res.headers().get(CORRELATION_HEADER).unwrap(), "corr-abc");

        let body: serde_json::Value = test::read_body_json(res).await;
        assert_eq!(body["correlation_id"], "corr-abc");
        assert_eq!(body["error"], "validation_error");
    }

    #[actix_web::test]
    async fn test_request_logging_generates_correlation_id() {
        let app = test::init_service(
            App::new()
                .wrap(from_fn(request_logging))
                .route("/ok", web::get().to(echo_tenant)),
        )
        .await;

        let req = test::TestRequest::get().uri("/ok").to_request();
        let res = test::call_service(&app, req).await;
        let id = res.headers().get(CORRELATION_HEADER).unwrap().to_str().unwrap();
        assert!(Uuid::parse_str(id).is_ok());
    }
}
