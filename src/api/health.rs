use crate::db::{ping, run_blocking};
use crate::observability::METRICS;
use crate::state::AppState;
use actix_web::{get, web, HttpResponse, Responder};
use serde_json::json;

#[get("/")]
pub async fn index(state: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(json!({
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "environment": state.config.environment,
    }))
}

#[get("/health")]
pub async fn health(state: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "environment": state.config.environment,
    }))
}

#[get("/health/ready")]
pub async fn ready(state: web::Data<AppState>) -> impl Responder {
    match run_blocking(&state.pool, |pool| ping(pool)).await {
        Ok(()) => HttpResponse::Ok().json(json!({"status": "ready", "database": "ok"})),
        Err(e) => {
            tracing::error!("Readiness check failed: {}", e);
            HttpResponse::ServiceUnavailable().json(json!({
                "status": "unhealthy",
                "errors": [format!("database: {}", e)],
            }))
        }
    }
}

#[get("/metrics")]
pub async fn metrics() -> impl Responder {
    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(METRICS.snapshot().to_prometheus())
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{test, App};

    #[actix_web::test]
    async fn test_metrics_exposes_prometheus_text() {
        let app = test::init_service(App::new().service(metrics)).await;
        let req = test::TestRequest::get().uri("/metrics").to_request();
        let res = test::call_service(&app, req).await;
        assert!(res.status().is_success());

        let body = test::read_body(res).await;
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("sem_http_requests_total"));
    }
}
