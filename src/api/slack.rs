//! Slack webhooks: events, slash commands and interactive buttons.
//!
//! Every endpoint verifies the request signature over the raw body before parsing it. Slack
//! expects an answer within three seconds, so slow work is spawned and reported back through
//! `chat.postMessage`, `chat.update` or the `response_url`.

use crate::clients::slack::section;
use crate::db::run_blocking;
use crate::error::{AppError, AppResult};
use crate::i18n::{t, t_with_args, DEFAULT_LANG};
use crate::models::{ApprovalAction, Frequency, Tenant};
use crate::observability::METRICS;
use crate::security::{verify_slack_signature, SIGNATURE_HEADER, TIMESTAMP_HEADER};
use crate::services::conversation::{self, IncomingMessage};
use crate::services::credentials::slack_bot_token;
use crate::services::keywords::{self, db as keyword_db, APPROVE_ACTION_ID, IGNORE_ACTION_ID};
use crate::services::oauth::google_authorize_link;
use crate::services::reports::period::ReportType;
use crate::services::reports::settings::{describe_frequency, format_time, parse_schedule_text};
use crate::services::reports::{self, db as report_db, ReportRequest};
use crate::state::AppState;
use crate::{
    find_active_ads_account, find_tenant_by_workspace_id, get_or_create_tenant, touch_user,
    update_tenant_channel,
};
use actix_web::{post, web, HttpRequest, HttpResponse};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

const RETRY_HEADER: &str = "X-Slack-Retry-Num";
const SLACKBOT_USER_ID: &str = "USLACKBOT";

fn header<'a>(req: &'a HttpRequest, name: &str) -> Option<&'a str> {
    req.headers().get(name).and_then(|v| v.to_str().ok())
}

pub fn verify_request(state: &AppState, req: &HttpRequest, body: &[u8]) -> AppResult<()> {
    verify_slack_signature(
        &state.config.slack_signing_secret,
        header(req, TIMESTAMP_HEADER),
        header(req, SIGNATURE_HEADER),
        body,
        Utc::now().timestamp(),
    )
    .map_err(|e| {
        tracing::warn!(path = %req.path(), "Rejected Slack request: {}", e);
        AppError::InvalidToken
    })
}

/// Slack user ids worth a `users` row: present and not Slackbot itself.
pub fn recordable_user(slack_user_id: &str) -> Option<&str> {
    let id = slack_user_id.trim();
    (!id.is_empty() && id != SLACKBOT_USER_ID).then_some(id)
}

/// Stamps the acting user's last login. A failure is logged and the request carries on.
async fn record_user(state: &AppState, tenant_id: i32, slack_user_id: &str) {
    let Some(id) = recordable_user(slack_user_id) else {
        return;
    };
    let user = id.to_string();

    match run_blocking(&state.pool, move |pool| touch_user(pool, tenant_id, &user)).await {
        Ok(user) => tracing::debug!(
            tenant_id,
            user_id = user.id,
            slack_user_id = %user.slack_user_id,
            "Recorded Slack user"
        ),
        Err(e) => tracing::warn!("Failed to record Slack user {}: {}", id, e),
    }
}

fn ephemeral(text: String) -> HttpResponse {
    HttpResponse::Ok().json(json!({ "response_type": "ephemeral", "text": text }))
}

fn in_channel(text: String) -> HttpResponse {
    HttpResponse::Ok().json(json!({ "response_type": "in_channel", "text": text }))
}

#[derive(Debug, Deserialize)]
pub struct EventEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    pub challenge: Option<String>,
    pub team_id: Option<String>,
    pub event: Option<SlackEvent>,
}

#[derive(Debug, Deserialize)]
pub struct SlackEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub user: Option<String>,
    pub text: Option<String>,
    pub channel: Option<String>,
    pub channel_type: Option<String>,
    pub ts: Option<String>,
    pub thread_ts: Option<String>,
    pub bot_id: Option<String>,
    pub subtype: Option<String>,
}

/// Mentions anywhere and direct messages from people start a conversation turn.
/// Bot posts, edits and other subtypes are skipped.
pub fn incoming_message(event: &SlackEvent, tenant_id: i32) -> Option<IncomingMessage> {
    if event.bot_id.is_some() || event.subtype.is_some() {
        return None;
    }
    match event.kind.as_str() {
        "app_mention" => {}
        "message" if event.channel_type.as_deref() == Some("im") => {}
        _ => return None,
    }

    let ts = event.ts.clone()?;
    Some(IncomingMessage {
        tenant_id,
        user_id: event.user.clone()?,
        channel_id: event.channel.clone()?,
        thread_ts: event.thread_ts.clone().unwrap_or(ts),
        text: event.text.clone().unwrap_or_default(),
    })
}

#[post("/slack/events")]
pub async fn events(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Bytes,
) -> Result<HttpResponse, AppError> {
    verify_request(&state, &req, &body)?;
    METRICS.increment_slack("events");

    let envelope: EventEnvelope = serde_json::from_slice(&body)
        .map_err(|e| AppError::Validation(format!("invalid event payload: {}", e)))?;

    if envelope.kind == "url_verification" {
        return Ok(HttpResponse::Ok().json(json!({ "challenge": envelope.challenge })));
    }

    // Retries of events we already accepted would produce duplicate replies
    if let Some(retry) = header(&req, RETRY_HEADER) {
        tracing::debug!("Ignoring Slack event retry {}", retry);
        return Ok(HttpResponse::Ok().json(json!({ "ok": true })));
    }

    let (Some(team_id), Some(event)) = (envelope.team_id, envelope.event) else {
        return Ok(HttpResponse::Ok().json(json!({ "ok": true })));
    };

    let lookup = team_id.clone();
    let tenant = run_blocking(&state.pool, move |pool| find_tenant_by_workspace_id(pool, &lookup))
        .await?;
    let Some(tenant) = tenant else {
        tracing::warn!("Event from unknown workspace {}", team_id);
        return Ok(HttpResponse::Ok().json(json!({ "ok": true })));
    };

    if let Some(incoming) = incoming_message(&event, tenant.id) {
        record_user(&state, tenant.id, &incoming.user_id).await;
        let state = state.get_ref().clone();
        tokio::spawn(async move {
            let thread_ts = incoming.thread_ts.clone();
            if let Err(e) = conversation::handle_message(&state, incoming).await {
                tracing::error!("Conversation turn in thread {} failed: {}", thread_ts, e);
            }
        });
    }

    Ok(HttpResponse::Ok().json(json!({ "ok": true })))
}

#[derive(Debug, Deserialize)]
pub struct SlashCommand {
    pub command: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub channel_id: String,
    pub team_id: String,
    pub team_domain: Option<String>,
    pub response_url: Option<String>,
}

/// Creates the tenant on first contact and remembers the channel the command came from.
async fn ensure_tenant(state: &AppState, command: &SlashCommand) -> AppResult<Tenant> {
    let team_id = command.team_id.clone();
    let team_domain = command.team_domain.clone();
    let channel = command.channel_id.clone();

    Ok(run_blocking(&state.pool, move |pool| {
        let mut tenant = get_or_create_tenant(pool, &team_id, team_domain.as_deref())?;
        if tenant.slack_channel_id.is_none() && !channel.is_empty() {
            update_tenant_channel(pool, tenant.id, &channel)?;
            tenant.slack_channel_id = Some(channel);
        }
        Ok(tenant)
    })
    .await?)
}

#[post("/slack/commands")]
pub async fn commands(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Bytes,
) -> Result<HttpResponse, AppError> {
    verify_request(&state, &req, &body)?;
    METRICS.increment_slack("commands");

    let command: SlashCommand = serde_urlencoded::from_bytes(&body)
        .map_err(|e| AppError::Validation(format!("invalid command payload: {}", e)))?;

    tracing::info!(
        command = %command.command,
        user_id = %command.user_id,
        channel_id = %command.channel_id,
        "Received slash command"
    );

    let lang = DEFAULT_LANG;
    let result = match ensure_tenant(&state, &command).await {
        Ok(tenant) => {
            record_user(&state, tenant.id, &command.user_id).await;
            match command.command.as_str() {
                "/sem-help" => Ok(ephemeral(t(lang, "slack.help"))),
                "/sem-config" => config_command(&state, tenant.id, command.text.trim(), lang)
                    .await
                    .map(ephemeral),
                "/sem-report" => {
                    report_command(&state, &tenant, command.response_url.clone(), lang).await
                }
                other => Ok(ephemeral(t_with_args(
                    lang,
                    "slack.unknown_command",
                    &[other],
                ))),
            }
        }
        Err(e) => Err(e),
    };

    // Slack shows non-200 answers as a generic failure, so errors go back as a message
    Ok(result.unwrap_or_else(|e| {
        tracing::error!("Slash command {} failed: {}", command.command, e);
        ephemeral(e.user_message(lang))
    }))
}

async fn config_command(
    state: &AppState,
    tenant_id: i32,
    text: &str,
    lang: &str,
) -> AppResult<String> {
    if text.is_empty() {
        let schedule = run_blocking(&state.pool, move |pool| {
            report_db::get_or_create_schedule(pool, tenant_id)
        })
        .await?;

        return Ok(t_with_args(
            lang,
            "slack.config.current",
            &[
                &describe_frequency(lang, &schedule),
                &format_time(schedule.time_of_day),
                &schedule.timezone,
            ],
        ));
    }

    let update = parse_schedule_text(text);
    if update.is_empty() {
        return Ok(t(lang, "slack.config.invalid"));
    }

    let schedule = run_blocking(&state.pool, move |pool| {
        let current = report_db::get_or_create_schedule(pool, tenant_id)?;
        report_db::update_schedule(pool, tenant_id, update.into_changes(Some(&current)))
    })
    .await?;

    tracing::info!(
        "Tenant {} report schedule set to {} {}",
        tenant_id,
        schedule.frequency,
        format_time(schedule.time_of_day)
    );

    if schedule.frequency() == Frequency::Disabled {
        return Ok(t(lang, "slack.config.disabled"));
    }

    Ok(t_with_args(
        lang,
        "slack.config.updated",
        &[
            &describe_frequency(lang, &schedule),
            &format_time(schedule.time_of_day),
        ],
    ))
}

/// Acknowledges at once and builds the report in the background. The report covers the
/// period of the tenant's schedule, weekly when there is none.
async fn report_command(
    state: &AppState,
    tenant: &Tenant,
    response_url: Option<String>,
    lang: &'static str,
) -> AppResult<HttpResponse> {
    let tenant_id = tenant.id;
    let (account, schedule) = run_blocking(&state.pool, move |pool| {
        Ok((
            find_active_ads_account(pool, tenant_id)?,
            report_db::find_schedule(pool, tenant_id)?,
        ))
    })
    .await?;

    if account.is_none() {
        return Ok(ephemeral(t_with_args(
            lang,
            "slack.report.no_account",
            &[&google_authorize_link(state, tenant_id)],
        )));
    }

    let report_type = schedule
        .and_then(|s| ReportType::from_frequency(s.frequency()))
        .unwrap_or(ReportType::Weekly);

    let state = state.clone();
    tokio::spawn(async move {
        let request = ReportRequest {
            tenant_id,
            report_type,
            period: None,
            campaign_ids: None,
        };
        let Err(e) = reports::generate_report(&state, request).await else {
            return;
        };
        let Some(url) = response_url else {
            return;
        };
        let text = t_with_args(lang, "slack.report.failed", &[&e.user_message(lang)]);
        if let Err(e) = state.slack.respond(&url, &text, false).await {
            tracing::warn!("Failed to report /sem-report failure to Slack: {}", e);
        }
    });

    Ok(in_channel(t(lang, "slack.report.started")))
}

#[derive(Debug, Deserialize)]
struct InteractionForm {
    payload: String,
}

#[derive(Debug, Deserialize)]
pub struct SlackId {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct InteractionMessage {
    pub ts: String,
}

#[derive(Debug, Deserialize)]
pub struct BlockAction {
    pub action_id: String,
    pub value: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct InteractionPayload {
    pub user: SlackId,
    pub team: SlackId,
    pub channel: Option<SlackId>,
    pub message: Option<InteractionMessage>,
    pub response_url: Option<String>,
    #[serde(default)]
    pub actions: Vec<BlockAction>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApprovalClick {
    pub approval_id: i32,
    pub action: ApprovalAction,
    pub user_id: String,
    pub channel_id: Option<String>,
    pub message_ts: Option<String>,
    pub response_url: Option<String>,
}

/// The approval button in the payload, if the first action is one of ours.
pub fn approval_click(payload: &InteractionPayload) -> AppResult<Option<ApprovalClick>> {
    let Some(action) = payload.actions.first() else {
        return Ok(None);
    };

    let decision = match action.action_id.as_str() {
        APPROVE_ACTION_ID => ApprovalAction::Approve,
        IGNORE_ACTION_ID => ApprovalAction::Ignore,
        _ => return Ok(None),
    };

    let approval_id = action
        .value
        .as_deref()
        .and_then(|v| v.parse::<i32>().ok())
        .ok_or_else(|| AppError::Validation("invalid approval id".into()))?;

    Ok(Some(ApprovalClick {
        approval_id,
        action: decision,
        user_id: payload.user.id.clone(),
        channel_id: payload.channel.as_ref().map(|c| c.id.clone()),
        message_ts: payload.message.as_ref().map(|m| m.ts.clone()),
        response_url: payload.response_url.clone(),
    }))
}

#[post("/slack/interactions")]
pub async fn interactions(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Bytes,
) -> Result<HttpResponse, AppError> {
    verify_request(&state, &req, &body)?;
    METRICS.increment_slack("interactions");

    let form: InteractionForm = serde_urlencoded::from_bytes(&body)
        .map_err(|e| AppError::Validation(format!("invalid interaction form: {}", e)))?;
    let payload: InteractionPayload = serde_json::from_str(&form.payload)
        .map_err(|e| AppError::Validation(format!("invalid interaction payload: {}", e)))?;

    let Some(click) = approval_click(&payload)? else {
        return Ok(HttpResponse::Ok().finish());
    };

    let team_id = payload.team.id;
    let lookup = team_id.clone();
    let tenant = run_blocking(&state.pool, move |pool| find_tenant_by_workspace_id(pool, &lookup))
        .await?
        .ok_or(AppError::TenantNotFound(team_id))?;

    tracing::info!(
        tenant_id = tenant.id,
        approval_id = click.approval_id,
        action = click.action.as_str(),
        user_id = %click.user_id,
        "Approval button clicked"
    );

    record_user(&state, tenant.id, &click.user_id).await;

    let state = state.get_ref().clone();
    tokio::spawn(async move { resolve_approval(state, tenant, click).await });

    Ok(HttpResponse::Ok().finish())
}

async fn resolve_approval(state: AppState, tenant: Tenant, click: ApprovalClick) {
    let lang = DEFAULT_LANG;

    let outcome = match apply_click(&state, &tenant, &click).await {
        Ok(term) => term,
        Err(e) => {
            tracing::warn!("Approval {} not applied: {}", click.approval_id, e);
            if let Some(url) = &click.response_url {
                let text = match e {
                    AppError::Validation(_) => t(lang, "keyword.failed"),
                    other => other.user_message(lang),
                };
                if let Err(e) = state.slack.respond(url, &text, false).await {
                    tracing::warn!("Failed to answer approval click: {}", e);
                }
            }
            return;
        }
    };

    let text = keywords::resolution_text(lang, click.action, &click.user_id, &outcome);

    if let (Some(channel), Some(ts)) = (&click.channel_id, &click.message_ts) {
        let updated = match slack_bot_token(&state, &tenant) {
            Ok(token) => state
                .slack
                .update_message(&token, channel, ts, &text, Some(json!([section(&text)])))
                .await
                .map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        match updated {
            Ok(_) => return,
            Err(e) => tracing::warn!("chat.update for approval {} failed: {}", click.approval_id, e),
        }
    }

    if let Some(url) = &click.response_url {
        if let Err(e) = state.slack.respond(url, &text, true).await {
            tracing::warn!("Failed to replace approval message: {}", e);
        }
    }
}

/// Applies the click and returns the search term it resolved.
async fn apply_click(state: &AppState, tenant: &Tenant, click: &ApprovalClick) -> AppResult<String> {
    let approval_id = click.approval_id;
    let (_, candidate) = run_blocking(&state.pool, move |pool| {
        keyword_db::find_approval_with_candidate(pool, approval_id)
    })
    .await?
    .ok_or(AppError::NotFound)?;

    if candidate.tenant_id != tenant.id {
        return Err(AppError::NotFound);
    }

    let candidate = match click.action {
        ApprovalAction::Approve => {
            keywords::approve_keyword(state, approval_id, &click.user_id).await?
        }
        _ => keywords::reject_keyword(state, approval_id, &click.user_id).await?,
    };
    Ok(candidate.search_term)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(kind: &str) -> SlackEvent {
        SlackEvent {
            kind: kind.into(),
            user: Some("U1".into()),
            text: Some("<@UBOT> 지난주 리포트".into()),
            channel: Some("C1".into()),
            channel_type: Some("channel".into()),
            ts: Some("1700000000.000100".into()),
            thread_ts: None,
            bot_id: None,
            subtype: None,
        }
    }

    #[test]
    fn test_mention_starts_thread_at_message() {
        let incoming = incoming_message(&event("app_mention"), 3).unwrap();
        assert_eq!(incoming.tenant_id, 3);
        assert_eq!(incoming.thread_ts, "1700000000.000100");
        assert_eq!(incoming.channel_id, "C1");
    }

    #[test]
    fn test_reply_keeps_thread() {
        let mut e = event("app_mention");
        e.thread_ts = Some("1699999999.000001".into());
        assert_eq!(
            incoming_message(&e, 1).unwrap().thread_ts,
            "1699999999.000001"
        );
    }

    #[test]
    fn test_channel_messages_and_bots_are_skipped() {
        assert!(incoming_message(&event("message"), 1).is_none());

        let mut dm = event("message");
        dm.channel_type = Some("im".into());
        assert!(incoming_message(&dm, 1).is_some());

        let mut bot = event("app_mention");
        bot.bot_id = Some("B1".into());
        assert!(incoming_message(&bot, 1).is_none());

        let mut edited = dm;
        edited.subtype = Some("message_changed".into());
        assert!(incoming_message(&edited, 1).is_none());
    }

    #[test]
    fn test_recordable_user_skips_blank_and_slackbot() {
        assert_eq!(recordable_user("U123"), Some("U123"));
        assert_eq!(recordable_user(" U123 "), Some("U123"));
        assert_eq!(recordable_user(""), None);
        assert_eq!(recordable_user(SLACKBOT_USER_ID), None);
    }

    #[test]
    fn test_url_verification_envelope() {
        let envelope: EventEnvelope =
            serde_json::from_str(r#"{"type":"url_verification","challenge":"abc123"}"#).unwrap();
        assert_eq!(envelope.kind, "url_verification");
        assert_eq!(envelope.challenge.as_deref(), Some("abc123"));
    }

    #[test]
    fn test_slash_command_form() {
        let body = "command=%2Fsem-config&text=weekly+09%3A00&user_id=U1&channel_id=C1\
                    &team_id=T1&team_domain=acme&response_url=https%3A%2F%2Fhooks.slack.com%2Fx";
        let command: SlashCommand = serde_urlencoded::from_str(body).unwrap();
        assert_eq!(command.command, "/sem-config");
        assert_eq!(command.text, "weekly 09:00");
        assert_eq!(command.team_domain.as_deref(), Some("acme"));
    }

    fn payload(action_id: &str, value: &str) -> InteractionPayload {
        serde_json::from_value(json!({
            "type": "block_actions",
            "user": {"id": "U9"},
            "team": {"id": "T1"},
            "channel": {"id": "C1"},
            "message": {"ts": "1700.1"},
            "response_url": "https://hooks.slack.com/actions/x",
            "actions": [{"action_id": action_id, "value": value}]
        }))
        .unwrap()
    }

    #[test]
    fn test_approval_click_parsing() {
        let click = approval_click(&payload(APPROVE_ACTION_ID, "42"))
            .unwrap()
            .unwrap();
        assert_eq!(click.approval_id, 42);
        assert_eq!(click.action, ApprovalAction::Approve);
        assert_eq!(click.user_id, "U9");
        assert_eq!(click.message_ts.as_deref(), Some("1700.1"));

        let click = approval_click(&payload(IGNORE_ACTION_ID, "7"))
            .unwrap()
            .unwrap();
        assert_eq!(click.action, ApprovalAction::Ignore);
    }

    #[test]
    fn test_foreign_actions_are_ignored() {
        assert_eq!(approval_click(&payload("other_button", "1")).unwrap(), None);
        assert!(matches!(
            approval_click(&payload(APPROVE_ACTION_ID, "abc")),
            Err(AppError::Validation(_))
        ));
    }
}
