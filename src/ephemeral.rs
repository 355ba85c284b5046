//! Short-lived key/value state with expiry: OAuth state tokens and conversation context.

use crate::db::{DbError, PgPool};
use crate::schema::ephemeral_state::dsl::*;
use chrono::{DateTime, Duration, Utc};
use diesel::prelude::*;

pub const OAUTH_STATE_TTL_SECS: i64 = 600;
pub const CONVERSATION_CONTEXT_TTL_SECS: i64 = 3600;

pub fn oauth_state_key(token: &str) -> String {
    format!("oauth_state:{}", token)
}

pub fn conversation_context_key(thread_ts: &str) -> String {
    format!("conversation:{}", thread_ts)
}

pub fn put(pool: &PgPool, state_key: &str, state_value: &str, ttl: Duration) -> Result<(), DbError> {
    let conn = &mut pool.get()?;
    let expiry = Utc::now() + ttl;

    diesel::insert_into(ephemeral_state)
        .values((key.eq(state_key), value.eq(state_value), expires_at.eq(expiry)))
        .on_conflict(key)
        .do_update()
        .set((value.eq(state_value), expires_at.eq(expiry)))
        .execute(conn)?;

    Ok(())
}

pub fn get(pool: &PgPool, state_key: &str) -> Result<Option<String>, DbError> {
    let conn = &mut pool.get()?;

    Ok(ephemeral_state
        .filter(key.eq(state_key))
        .filter(expires_at.gt(Utc::now()))
        .select(value)
        .first::<String>(conn)
        .optional()?)
}

/// Reads and deletes in one statement, so a value can be consumed once.
pub fn take(pool: &PgPool, state_key: &str) -> Result<Option<String>, DbError> {
    let conn = &mut pool.get()?;

    Ok(diesel::delete(
        ephemeral_state
            .filter(key.eq(state_key))
            .filter(expires_at.gt(Utc::now())),
    )
    .returning(value)
    .get_result::<String>(conn)
    .optional()?)
}

pub fn purge_expired(pool: &PgPool, now: DateTime<Utc>) -> Result<usize, DbError> {
    let conn = &mut pool.get()?;
    Ok(diesel::delete(ephemeral_state.filter(expires_at.le(now))).execute(conn)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_are_namespaced() {
        assert_eq!(oauth_state_key("abc"), "oauth_state:abc");
        assert_eq!(conversation_context_key("1700.1"), "conversation:1700.1");
        assert_ne!(oauth_state_key("x"), conversation_context_key("x"));
    }
}
