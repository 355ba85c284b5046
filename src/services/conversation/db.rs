use crate::db::{DbError, PgPool};
use crate::models::{Conversation, ConversationMessage, NewConversation, NewConversationMessage};
use crate::schema::{conversation_messages, conversations};
use chrono::Utc;
use diesel::prelude::*;

/// One conversation per Slack thread.
pub fn get_or_create_conversation(
    pool: &PgPool,
    conversation: NewConversation,
) -> Result<Conversation, DbError> {
    let conn = &mut pool.get()?;

    let inserted = diesel::insert_into(conversations::table)
        .values(&conversation)
        .on_conflict(conversations::thread_ts)
        .do_nothing()
        .execute(conn)?;
    if inserted > 0 {
        tracing::debug!("Started conversation for thread {}", conversation.thread_ts);
    }

    Ok(conversations::table
        .filter(conversations::thread_ts.eq(conversation.thread_ts))
        .select(Conversation::as_select())
        .first(conn)?)
}

/// The latest `limit` messages, oldest first.
pub fn recent_messages(
    pool: &PgPool,
    conversation: i32,
    limit: i64,
) -> Result<Vec<ConversationMessage>, DbError> {
    let conn = &mut pool.get()?;

    let mut messages: Vec<ConversationMessage> = conversation_messages::table
        .filter(conversation_messages::conversation_id.eq(conversation))
        .order((
            conversation_messages::created_at.desc(),
            conversation_messages::id.desc(),
        ))
        .limit(limit)
        .select(ConversationMessage::as_select())
        .load(conn)?;

    messages.reverse();
    Ok(messages)
}

pub fn save_message(
    pool: &PgPool,
    message: NewConversationMessage,
) -> Result<ConversationMessage, DbError> {
    let conn = &mut pool.get()?;

    conn.transaction(|conn| {
        let saved = diesel::insert_into(conversation_messages::table)
            .values(&message)
            .returning(ConversationMessage::as_returning())
            .get_result(conn)?;

        diesel::update(conversations::table.find(message.conversation_id))
            .set(conversations::updated_at.eq(Utc::now()))
            .execute(conn)?;

        Ok(saved)
    })
}
