use crate::db::run_blocking;
use crate::error::AppError;
use crate::services::reports::db as report_db;
use crate::state::AppState;
use crate::{
    find_active_ads_account, find_active_search_console_account, find_oauth_token,
    find_tenant_by_id, PROVIDER_GOOGLE,
};
use actix_web::{get, web, HttpResponse};
use serde_json::json;

/// What is stored for a tenant, without any secret material. Only served with `DEBUG=true`.
#[get("/debug/check-state/{tenant_id}")]
pub async fn check_state(
    state: web::Data<AppState>,
    path: web::Path<i32>,
) -> Result<HttpResponse, AppError> {
    if !state.config.debug {
        return Err(AppError::NotFound);
    }
    let tenant_id = path.into_inner();

    let (tenant, schedule, ads_account, gsc_account, google_token) =
        run_blocking(&state.pool, move |pool| {
            Ok((
                find_tenant_by_id(pool, tenant_id)?,
                report_db::find_schedule(pool, tenant_id)?,
                find_active_ads_account(pool, tenant_id)?,
                find_active_search_console_account(pool, tenant_id)?,
                find_oauth_token(pool, tenant_id, PROVIDER_GOOGLE)?,
            ))
        })
        .await?;

    Ok(HttpResponse::Ok().json(json!({
        "tenant": tenant.as_ref().map(|t| json!({
            "id": t.id,
            "workspace_id": t.workspace_id,
            "channel_id": t.slack_channel_id,
            "is_active": t.is_active,
            "has_bot_token": t.bot_token.is_some(),
        })),
        "schedule": schedule,
        "google_ads_account": ads_account,
        "search_console_account": gsc_account,
        "google_token": google_token.as_ref().map(|token| json!({
            "id": token.id,
            "has_refresh_token": token.refresh_token.is_some(),
            "expires_at": token.expires_at,
            "updated_at": token.updated_at,
        })),
    })))
}
