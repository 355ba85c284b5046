//! Threaded Slack conversations: history, intent, action and reply.

pub mod db;

use crate::db::run_blocking;
use crate::ephemeral::{self, conversation_context_key, CONVERSATION_CONTEXT_TTL_SECS};
use crate::error::{AppError, AppResult};
use crate::find_tenant_by_id;
use crate::i18n::detect_language_from_text;
use crate::models::{ConversationMessage, NewConversation, NewConversationMessage};
use crate::services::action_router::route_action;
use crate::services::credentials;
use crate::services::intent::{self, ChatTurn};
use crate::state::AppState;
use chrono::Duration;
use serde::{Deserialize, Serialize};

pub const HISTORY_MESSAGES: i64 = 10;
/// User and assistant turns kept in the cached context.
const CACHED_TURNS: usize = 20;

#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub tenant_id: i32,
    pub user_id: String,
    pub channel_id: String,
    /// Thread root; a top-level message starts its own thread.
    pub thread_ts: String,
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationContext {
    pub last_intent: Option<String>,
    pub history: Vec<ChatTurn>,
}

impl ConversationContext {
    pub fn push_exchange(&mut self, user_text: &str, reply: &str) {
        self.history.push(ChatTurn {
            role: "user".into(),
            content: user_text.to_string(),
        });
        self.history.push(ChatTurn {
            role: "assistant".into(),
            content: reply.to_string(),
        });
        let excess = self.history.len().saturating_sub(CACHED_TURNS);
        self.history.drain(..excess);
    }
}

/// Stored messages as chat turns, each followed by the bot's reply when there was one.
pub fn history_from_messages(messages: &[ConversationMessage]) -> Vec<ChatTurn> {
    let mut turns = Vec::with_capacity(messages.len() * 2);
    for message in messages {
        turns.push(ChatTurn {
            role: "user".into(),
            content: message.message_text.clone(),
        });
        if let Some(reply) = &message.bot_response {
            turns.push(ChatTurn {
                role: "assistant".into(),
                content: reply.clone(),
            });
        }
    }
    turns
}

/// Removes `<@U123>` style mentions.
pub fn strip_mentions(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find("<@") {
        out.push_str(&rest[..start]);
        match rest[start..].find('>') {
            Some(end) => rest = &rest[start + end + 1..],
            None => {
                rest = &rest[start..];
                break;
            }
        }
    }
    out.push_str(rest);

    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

async fn load_context(state: &AppState, conversation_id: i32, thread_ts: &str) -> ConversationContext {
    let key = conversation_context_key(thread_ts);
    let cached = run_blocking(&state.pool, move |pool| ephemeral::get(pool, &key)).await;

    if let Ok(Some(raw)) = cached {
        match serde_json::from_str::<ConversationContext>(&raw) {
            Ok(context) => return context,
            Err(e) => tracing::debug!("Discarding unreadable conversation cache: {}", e),
        }
    }

    match run_blocking(&state.pool, move |pool| {
        db::recent_messages(pool, conversation_id, HISTORY_MESSAGES)
    })
    .await
    {
        Ok(messages) => ConversationContext {
            last_intent: messages.last().and_then(|m| m.intent.clone()),
            history: history_from_messages(&messages),
        },
        Err(e) => {
            tracing::warn!("Failed to load history for conversation {}: {}", conversation_id, e);
            ConversationContext::default()
        }
    }
}

async fn store_context(state: &AppState, thread_ts: &str, context: &ConversationContext) {
    let Ok(raw) = serde_json::to_string(context) else {
        return;
    };
    let key = conversation_context_key(thread_ts);
    let ttl = Duration::seconds(CONVERSATION_CONTEXT_TTL_SECS);

    if let Err(e) = run_blocking(&state.pool, move |pool| ephemeral::put(pool, &key, &raw, ttl)).await {
        tracing::warn!("Failed to cache conversation context: {}", e);
    }
}

/// Answers one message in its thread and records the exchange. Returns the reply text.
pub async fn handle_message(state: &AppState, incoming: IncomingMessage) -> AppResult<String> {
    let text = strip_mentions(&incoming.text);
    if text.is_empty() {
        return Err(AppError::Validation("empty message".into()));
    }
    let lang = detect_language_from_text(&text);

    let tenant_id = incoming.tenant_id;
    let tenant = run_blocking(&state.pool, move |pool| find_tenant_by_id(pool, tenant_id))
        .await?
        .ok_or_else(|| AppError::TenantNotFound(tenant_id.to_string()))?;

    let (user_id, channel_id, thread_ts) = (
        incoming.user_id.clone(),
        incoming.channel_id.clone(),
        incoming.thread_ts.clone(),
    );
    let conversation = run_blocking(&state.pool, move |pool| {
        db::get_or_create_conversation(
            pool,
            NewConversation {
                tenant_id,
                thread_ts: &thread_ts,
                channel_id: &channel_id,
                user_id: &user_id,
            },
        )
    })
    .await?;

    let mut context = load_context(state, conversation.id, &incoming.thread_ts).await;
    let parsed = intent::classify(state, &text, &context.history).await;
    let reply = route_action(state, tenant_id, &parsed, &text, &context.history, lang).await;

    let token = credentials::slack_bot_token(state, &tenant)?;
    if let Err(e) = state
        .slack
        .post_message(
            &token,
            &incoming.channel_id,
            &reply,
            None,
            Some(&incoming.thread_ts),
        )
        .await
    {
        tracing::error!(
            "Failed to reply in thread {} for tenant {}: {}",
            incoming.thread_ts,
            tenant_id,
            e
        );
    }

    let conversation_id = conversation.id;
    let entities = serde_json::to_value(&parsed.entities).ok();
    let intent_name = parsed.intent.as_str();
    let (user_id, message_text, bot_response) =
        (incoming.user_id.clone(), text.clone(), reply.clone());
    if let Err(e) = run_blocking(&state.pool, move |pool| {
        db::save_message(
            pool,
            NewConversationMessage {
                conversation_id,
                user_id: &user_id,
                message_text: &message_text,
                intent: Some(intent_name),
                entities,
                bot_response: Some(&bot_response),
            },
        )
    })
    .await
    {
        tracing::error!("Failed to save message for conversation {}: {}", conversation_id, e);
    }

    context.last_intent = Some(intent_name.to_string());
    context.push_exchange(&text, &reply);
    store_context(state, &incoming.thread_ts, &context).await;

    Ok(reply)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn message(id: i32, text: &str, reply: Option<&str>) -> ConversationMessage {
        ConversationMessage {
            id,
            conversation_id: 1,
            user_id: "U1".into(),
            message_text: text.into(),
            intent: Some("general_chat".into()),
            entities: None,
            bot_response: reply.map(String::from),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_history_interleaves_replies() {
        let history = history_from_messages(&[
            message(1, "안녕", Some("안녕하세요")),
            message(2, "리포트", None),
        ]);

        let roles: Vec<_> = history.iter().map(|t| t.role.as_str()).collect();
        assert_eq!(roles, vec!["user", "assistant", "user"]);
        assert_eq!(history[1].content, "안녕하세요");
        assert_eq!(history[2].content, "리포트");
    }

    #[test]
    fn test_strip_mentions() {
        assert_eq!(strip_mentions("<@U0BOT> 지난주 리포트 보여줘"), "지난주 리포트 보여줘");
        assert_eq!(strip_mentions("hi <@U1|bob>   there"), "hi there");
        assert_eq!(strip_mentions("broken <@U1"), "broken <@U1");
        assert_eq!(strip_mentions("<@U0BOT>"), "");
    }

    #[test]
    fn test_context_keeps_recent_turns() {
        let mut context = ConversationContext::default();
        for i in 0..15 {
            context.push_exchange(&format!("q{}", i), &format!("a{}", i));
        }
        assert_eq!(context.history.len(), 20);
        assert_eq!(context.history[0].content, "q5");
        assert_eq!(context.history[19].content, "a14");
    }

    #[test]
    fn test_context_round_trips_through_cache_format() {
        let mut context = ConversationContext::default();
        context.last_intent = Some("generate_report".into());
        context.push_exchange("q", "a");

        let raw = serde_json::to_string(&context).unwrap();
        let restored: ConversationContext = serde_json::from_str(&raw).unwrap();
        assert_eq!(restored, context);
    }
}
