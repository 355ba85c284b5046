use crate::api;
use crate::middleware::{rate_limit, request_logging, tenant_context};
use crate::rate_limit::RateLimiter;
use crate::state::AppState;
use actix_web::middleware::from_fn;
use actix_web::{web, App, HttpServer};

pub async fn run_http_server(state: AppState) -> std::io::Result<()> {
    let port = state.config.port;
    let limiter = RateLimiter::postgres(state.pool.clone());

    tracing::info!("Starting HTTP server on port {}", port);

    let state = web::Data::new(state);
    let limiter = web::Data::new(limiter);

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .app_data(limiter.clone())
            // The last wrap runs first: logging, then tenant context, then rate limiting
            .wrap(from_fn(rate_limit))
            .wrap(from_fn(tenant_context))
            .wrap(from_fn(request_logging))
            .configure(api::configure)
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}
