use chrono::{DateTime, Utc};
use diesel::prelude::*;

pub mod api;
pub mod clients;
pub mod config;
pub mod crypto;
pub mod db;
pub mod ephemeral;
pub mod error;
pub mod http_server;
pub mod i18n;
pub mod middleware;
pub mod models;
pub mod observability;
pub mod rate_limit;
pub mod schema;
pub mod security;
pub mod services;
pub mod state;

use self::models::*;
use db::{DbError, PgPool};

pub const PROVIDER_GOOGLE: &str = "google";
pub const PROVIDER_SLACK: &str = "slack";

pub fn find_tenant_by_id(pool: &PgPool, tenant_id: i32) -> Result<Option<Tenant>, DbError> {
    use self::schema::tenants::dsl::*;

    let conn = &mut pool.get()?;
    Ok(tenants
        .find(tenant_id)
        .select(Tenant::as_select())
        .first(conn)
        .optional()?)
}

pub fn find_tenant_by_workspace_id(
    pool: &PgPool,
    workspace: &str,
) -> Result<Option<Tenant>, DbError> {
    use self::schema::tenants::dsl::*;

    let conn = &mut pool.get()?;
    Ok(tenants
        .filter(workspace_id.eq(workspace))
        .select(Tenant::as_select())
        .first(conn)
        .optional()?)
}

/// Slack team ids we have never seen get a tenant row on first contact.
pub fn get_or_create_tenant(
    pool: &PgPool,
    workspace: &str,
    name: Option<&str>,
) -> Result<Tenant, DbError> {
    use self::schema::tenants::dsl::*;

    let conn = &mut pool.get()?;

    let new_tenant = NewTenant {
        workspace_id: workspace,
        workspace_name: name,
        bot_token: None,
        slack_channel_id: None,
    };

    let inserted = diesel::insert_into(tenants)
        .values(&new_tenant)
        .on_conflict(workspace_id)
        .do_nothing()
        .execute(conn)?;

    if inserted > 0 {
        tracing::info!("Created tenant for workspace {}", workspace);
    }

    Ok(tenants
        .filter(workspace_id.eq(workspace))
        .select(Tenant::as_select())
        .first(conn)?)
}

pub struct TenantInstallation<'a> {
    pub workspace_id: &'a str,
    pub workspace_name: Option<&'a str>,
    pub sealed_bot_token: &'a str,
    pub slack_channel_id: Option<&'a str>,
}

/// Records a Slack install; re-installs refresh the bot token and reactivate the tenant.
pub fn upsert_tenant_installation(
    pool: &PgPool,
    input: TenantInstallation,
) -> Result<Tenant, DbError> {
    use self::schema::tenants::dsl::*;

    let conn = &mut pool.get()?;

    let new_tenant = NewTenant {
        workspace_id: input.workspace_id,
        workspace_name: input.workspace_name,
        bot_token: Some(input.sealed_bot_token),
        slack_channel_id: input.slack_channel_id,
    };

    Ok(diesel::insert_into(tenants)
        .values(&new_tenant)
        .on_conflict(workspace_id)
        .do_update()
        .set((
            workspace_name.eq(input.workspace_name),
            bot_token.eq(input.sealed_bot_token),
            slack_channel_id.eq(input.slack_channel_id),
            installed_at.eq(Utc::now()),
            is_active.eq(true),
        ))
        .returning(Tenant::as_returning())
        .get_result(conn)?)
}

pub fn update_tenant_channel(pool: &PgPool, tenant_id: i32, channel: &str) -> Result<(), DbError> {
    use self::schema::tenants::dsl::*;

    let conn = &mut pool.get()?;
    diesel::update(tenants.find(tenant_id))
        .set(slack_channel_id.eq(channel))
        .execute(conn)?;
    Ok(())
}

pub fn find_active_tenants(pool: &PgPool) -> Result<Vec<Tenant>, DbError> {
    use self::schema::tenants::dsl::*;

    let conn = &mut pool.get()?;
    Ok(tenants
        .filter(is_active.eq(true))
        .select(Tenant::as_select())
        .load(conn)?)
}

/// Creates the user on first contact and stamps `last_login` on every interaction.
pub fn touch_user(pool: &PgPool, tenant: i32, slack_user: &str) -> Result<User, DbError> {
    use self::schema::users::dsl::*;

    let conn = &mut pool.get()?;
    let now = Utc::now();

    Ok(diesel::insert_into(users)
        .values((
            tenant_id.eq(tenant),
            slack_user_id.eq(slack_user),
            last_login.eq(Some(now)),
        ))
        .on_conflict((tenant_id, slack_user_id))
        .do_update()
        .set(last_login.eq(Some(now)))
        .returning(User::as_returning())
        .get_result(conn)?)
}

/// Stores sealed tokens; a missing refresh token keeps the one already on file.
pub fn upsert_oauth_token(pool: &PgPool, token: NewOAuthToken) -> Result<OAuthToken, DbError> {
    use self::schema::oauth_tokens::dsl::*;

    let conn = &mut pool.get()?;
    let now = Utc::now();

    conn.transaction(|conn| {
        let existing: Option<OAuthToken> = oauth_tokens
            .filter(tenant_id.eq(token.tenant_id))
            .filter(provider.eq(token.provider))
            .select(OAuthToken::as_select())
            .first(conn)
            .optional()?;

        match existing {
            Some(current) => {
                let kept_refresh = token
                    .refresh_token
                    .map(str::to_string)
                    .or(current.refresh_token);

                Ok(diesel::update(oauth_tokens.find(current.id))
                    .set((
                        access_token.eq(token.access_token),
                        refresh_token.eq(kept_refresh),
                        expires_at.eq(token.expires_at),
                        scope.eq(token.scope),
                        updated_at.eq(now),
                    ))
                    .returning(OAuthToken::as_returning())
                    .get_result(conn)?)
            }
            None => Ok(diesel::insert_into(oauth_tokens)
                .values(&token)
                .returning(OAuthToken::as_returning())
                .get_result(conn)?),
        }
    })
}

pub fn find_oauth_token(
    pool: &PgPool,
    tenant: i32,
    token_provider: &str,
) -> Result<Option<OAuthToken>, DbError> {
    use self::schema::oauth_tokens::dsl::*;

    let conn = &mut pool.get()?;
    Ok(oauth_tokens
        .filter(tenant_id.eq(tenant))
        .filter(provider.eq(token_provider))
        .select(OAuthToken::as_select())
        .first(conn)
        .optional()?)
}

pub fn find_tokens_expiring_before(
    pool: &PgPool,
    token_provider: &str,
    cutoff: DateTime<Utc>,
) -> Result<Vec<OAuthToken>, DbError> {
    use self::schema::oauth_tokens::dsl::*;

    let conn = &mut pool.get()?;
    Ok(oauth_tokens
        .filter(provider.eq(token_provider))
        .filter(refresh_token.is_not_null())
        .filter(expires_at.is_null().or(expires_at.lt(cutoff)))
        .select(OAuthToken::as_select())
        .load(conn)?)
}

pub fn update_access_token(
    pool: &PgPool,
    token_id: i32,
    sealed_access_token: &str,
    new_expiry: DateTime<Utc>,
) -> Result<(), DbError> {
    use self::schema::oauth_tokens::dsl::*;

    let conn = &mut pool.get()?;
    diesel::update(oauth_tokens.find(token_id))
        .set((
            access_token.eq(sealed_access_token),
            expires_at.eq(Some(new_expiry)),
            updated_at.eq(Utc::now()),
        ))
        .execute(conn)?;
    Ok(())
}

/// Upserts discovered accounts; the first one becomes the single active account.
pub fn replace_ads_accounts(
    pool: &PgPool,
    tenant: i32,
    accounts: &[NewGoogleAdsAccount],
) -> Result<Vec<GoogleAdsAccount>, DbError> {
    use self::schema::google_ads_accounts::dsl::*;

    let conn = &mut pool.get()?;

    conn.transaction(|conn| {
        diesel::update(google_ads_accounts.filter(tenant_id.eq(tenant)))
            .set(is_active.eq(false))
            .execute(conn)?;

        let mut stored = Vec::with_capacity(accounts.len());
        for (index, account) in accounts.iter().enumerate() {
            let active = index == 0;
            let row = diesel::insert_into(google_ads_accounts)
                .values(account)
                .on_conflict((tenant_id, customer_id))
                .do_update()
                .set((
                    account_name.eq(account.account_name),
                    currency.eq(account.currency),
                    timezone.eq(account.timezone),
                    is_active.eq(active),
                ))
                .returning(GoogleAdsAccount::as_returning())
                .get_result(conn)?;
            stored.push(row);
        }
        Ok(stored)
    })
}

pub fn find_active_ads_account(
    pool: &PgPool,
    tenant: i32,
) -> Result<Option<GoogleAdsAccount>, DbError> {
    use self::schema::google_ads_accounts::dsl::*;

    let conn = &mut pool.get()?;
    Ok(google_ads_accounts
        .filter(tenant_id.eq(tenant))
        .filter(is_active.eq(true))
        .order(id.asc())
        .select(GoogleAdsAccount::as_select())
        .first(conn)
        .optional()?)
}

pub fn upsert_search_console_account(
    pool: &PgPool,
    account: NewSearchConsoleAccount,
) -> Result<SearchConsoleAccount, DbError> {
    use self::schema::search_console_accounts::dsl::*;

    let conn = &mut pool.get()?;
    Ok(diesel::insert_into(search_console_accounts)
        .values(&account)
        .on_conflict((tenant_id, site_url))
        .do_update()
        .set((
            refresh_token.eq(account.refresh_token),
            is_active.eq(account.is_active),
        ))
        .returning(SearchConsoleAccount::as_returning())
        .get_result(conn)?)
}

pub fn find_active_search_console_account(
    pool: &PgPool,
    tenant: i32,
) -> Result<Option<SearchConsoleAccount>, DbError> {
    use self::schema::search_console_accounts::dsl::*;

    let conn = &mut pool.get()?;
    Ok(search_console_accounts
        .filter(tenant_id.eq(tenant))
        .filter(is_active.eq(true))
        .order(id.asc())
        .select(SearchConsoleAccount::as_select())
        .first(conn)
        .optional()?)
}

pub fn find_thresholds(pool: &PgPool, tenant: i32) -> Result<PerformanceThreshold, DbError> {
    use self::schema::performance_thresholds::dsl::*;

    let conn = &mut pool.get()?;
    let row = performance_thresholds
        .filter(tenant_id.eq(tenant))
        .select((
            min_cost_for_detection,
            min_clicks_for_detection,
            lookback_days,
        ))
        .first::<PerformanceThreshold>(conn)
        .optional()?;

    Ok(row.unwrap_or_default())
}
