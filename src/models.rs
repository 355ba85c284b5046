use crate::schema::{
    approval_requests, conversation_messages, conversations, google_ads_accounts,
    keyword_candidates, oauth_tokens, report_history, report_schedules, search_console_accounts,
    tenants, users,
};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use diesel::prelude::*;
use serde::Serialize;

#[derive(Debug, Clone, Queryable, Identifiable, Selectable, Serialize)]
#[diesel(table_name = tenants)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Tenant {
    pub id: i32,
    pub workspace_id: String,
    pub workspace_name: Option<String>,
    #[serde(skip_serializing)]
    pub bot_token: Option<String>,
    pub slack_channel_id: Option<String>,
    pub installed_at: DateTime<Utc>,
    pub is_active: bool,
    pub settings: serde_json::Value,
}

#[derive(Insertable)]
#[diesel(table_name = tenants)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct NewTenant<'a> {
    pub workspace_id: &'a str,
    pub workspace_name: Option<&'a str>,
    pub bot_token: Option<&'a str>,
    pub slack_channel_id: Option<&'a str>,
}

#[derive(Debug, Queryable, Identifiable, Selectable, Associations)]
#[diesel(belongs_to(Tenant))]
#[diesel(table_name = users)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct User {
    pub id: i32,
    pub tenant_id: i32,
    pub slack_user_id: String,
    pub email: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable, Associations)]
#[diesel(belongs_to(Tenant))]
#[diesel(table_name = oauth_tokens)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct OAuthToken {
    pub id: i32,
    pub tenant_id: i32,
    pub provider: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub scope: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Insertable)]
#[diesel(table_name = oauth_tokens)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct NewOAuthToken<'a> {
    pub tenant_id: i32,
    pub provider: &'a str,
    pub access_token: &'a str,
    pub refresh_token: Option<&'a str>,
    pub expires_at: Option<DateTime<Utc>>,
    pub scope: Option<&'a str>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable, Associations, Serialize)]
#[diesel(belongs_to(Tenant))]
#[diesel(table_name = google_ads_accounts)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct GoogleAdsAccount {
    pub id: i32,
    pub tenant_id: i32,
    pub customer_id: String,
    pub account_name: Option<String>,
    pub currency: String,
    pub timezone: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Insertable)]
#[diesel(table_name = google_ads_accounts)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct NewGoogleAdsAccount<'a> {
    pub tenant_id: i32,
    pub customer_id: &'a str,
    pub account_name: Option<&'a str>,
    pub currency: &'a str,
    pub timezone: &'a str,
    pub is_active: bool,
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable, Associations, Serialize)]
#[diesel(belongs_to(Tenant))]
#[diesel(table_name = search_console_accounts)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct SearchConsoleAccount {
    pub id: i32,
    pub tenant_id: i32,
    pub site_url: String,
    #[serde(skip_serializing)]
    pub refresh_token: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Insertable)]
#[diesel(table_name = search_console_accounts)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct NewSearchConsoleAccount<'a> {
    pub tenant_id: i32,
    pub site_url: &'a str,
    pub refresh_token: Option<&'a str>,
    pub is_active: bool,
}

/// Detection thresholds; tenants without a row use `Default`.
#[derive(Debug, Clone, Copy, PartialEq, Queryable, Serialize)]
pub struct PerformanceThreshold {
    pub min_cost_for_detection: f64,
    pub min_clicks_for_detection: i32,
    pub lookback_days: i32,
}

impl Default for PerformanceThreshold {
    fn default() -> Self {
        Self {
            min_cost_for_detection: 10000.0,
            min_clicks_for_detection: 5,
            lookback_days: 7,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    Disabled,
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Daily => "daily",
            Frequency::Weekly => "weekly",
            Frequency::Monthly => "monthly",
            Frequency::Disabled => "disabled",
        }
    }

    pub fn parse(s: &str) -> Option<Frequency> {
        match s.to_lowercase().as_str() {
            "daily" => Some(Frequency::Daily),
            "weekly" => Some(Frequency::Weekly),
            "monthly" => Some(Frequency::Monthly),
            "disabled" => Some(Frequency::Disabled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable, Associations, Serialize)]
#[diesel(belongs_to(Tenant))]
#[diesel(table_name = report_schedules)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ReportSchedule {
    pub id: i32,
    pub tenant_id: i32,
    pub frequency: String,
    pub day_of_week: Option<i32>,
    pub day_of_month: Option<i32>,
    pub time_of_day: NaiveTime,
    pub timezone: String,
    pub campaign_ids: Option<Vec<String>>,
    pub is_active: bool,
    pub last_triggered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ReportSchedule {
    /// Unknown values are treated as disabled so a bad row never fires.
    pub fn frequency(&self) -> Frequency {
        Frequency::parse(&self.frequency).unwrap_or(Frequency::Disabled)
    }
}

#[derive(Insertable)]
#[diesel(table_name = report_schedules)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct NewReportSchedule<'a> {
    pub tenant_id: i32,
    pub frequency: &'a str,
    pub day_of_week: Option<i32>,
    pub day_of_month: Option<i32>,
    pub time_of_day: NaiveTime,
    pub timezone: &'a str,
    pub is_active: bool,
}

#[derive(AsChangeset, Default)]
#[diesel(table_name = report_schedules)]
pub struct ReportScheduleChanges {
    pub frequency: Option<String>,
    pub day_of_week: Option<Option<i32>>,
    pub day_of_month: Option<Option<i32>>,
    pub time_of_day: Option<NaiveTime>,
    pub timezone: Option<String>,
    pub campaign_ids: Option<Option<Vec<String>>>,
    pub is_active: Option<bool>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable, Associations, Serialize)]
#[diesel(belongs_to(Tenant))]
#[diesel(table_name = report_history)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ReportHistory {
    pub id: i32,
    pub tenant_id: i32,
    pub report_type: String,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub slack_message_ts: Option<String>,
    pub gemini_insight: Option<String>,
    pub metrics: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Insertable)]
#[diesel(table_name = report_history)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct NewReportHistory<'a> {
    pub tenant_id: i32,
    pub report_type: &'a str,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub slack_message_ts: Option<&'a str>,
    pub gemini_insight: Option<&'a str>,
    pub metrics: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum KeywordStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
}

impl KeywordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeywordStatus::Pending => "pending",
            KeywordStatus::Approved => "approved",
            KeywordStatus::Rejected => "rejected",
            KeywordStatus::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<KeywordStatus> {
        match s.to_lowercase().as_str() {
            "pending" => Some(KeywordStatus::Pending),
            "approved" => Some(KeywordStatus::Approved),
            "rejected" => Some(KeywordStatus::Rejected),
            "expired" => Some(KeywordStatus::Expired),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalAction {
    Approve,
    Ignore,
    Expired,
}

impl ApprovalAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalAction::Approve => "approve",
            ApprovalAction::Ignore => "ignore",
            ApprovalAction::Expired => "expired",
        }
    }
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable, Associations, Serialize)]
#[diesel(belongs_to(Tenant))]
#[diesel(table_name = keyword_candidates)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct KeywordCandidate {
    pub id: i32,
    pub tenant_id: i32,
    pub campaign_id: String,
    pub campaign_name: Option<String>,
    pub search_term: String,
    pub cost: f64,
    pub clicks: i32,
    pub conversions: f64,
    pub detected_at: DateTime<Utc>,
    pub status: String,
}

#[derive(Insertable)]
#[diesel(table_name = keyword_candidates)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct NewKeywordCandidate<'a> {
    pub tenant_id: i32,
    pub campaign_id: &'a str,
    pub campaign_name: Option<&'a str>,
    pub search_term: &'a str,
    pub cost: f64,
    pub clicks: i32,
    pub conversions: f64,
    pub status: &'a str,
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable, Associations, Serialize)]
#[diesel(belongs_to(KeywordCandidate))]
#[diesel(table_name = approval_requests)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ApprovalRequest {
    pub id: i32,
    pub keyword_candidate_id: i32,
    pub slack_message_ts: Option<String>,
    pub slack_channel_id: Option<String>,
    pub requested_at: DateTime<Utc>,
    pub responded_at: Option<DateTime<Utc>>,
    pub approved_by: Option<String>,
    pub action: Option<String>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Insertable)]
#[diesel(table_name = approval_requests)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct NewApprovalRequest {
    pub keyword_candidate_id: i32,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable, Associations)]
#[diesel(belongs_to(Tenant))]
#[diesel(table_name = conversations)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Conversation {
    pub id: i32,
    pub tenant_id: i32,
    pub thread_ts: String,
    pub channel_id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Insertable)]
#[diesel(table_name = conversations)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct NewConversation<'a> {
    pub tenant_id: i32,
    pub thread_ts: &'a str,
    pub channel_id: &'a str,
    pub user_id: &'a str,
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable, Associations)]
#[diesel(belongs_to(Conversation))]
#[diesel(table_name = conversation_messages)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ConversationMessage {
    pub id: i32,
    pub conversation_id: i32,
    pub user_id: String,
    pub message_text: String,
    pub intent: Option<String>,
    pub entities: Option<serde_json::Value>,
    pub bot_response: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Insertable)]
#[diesel(table_name = conversation_messages)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct NewConversationMessage<'a> {
    pub conversation_id: i32,
    pub user_id: &'a str,
    pub message_text: &'a str,
    pub intent: Option<&'a str>,
    pub entities: Option<serde_json::Value>,
    pub bot_response: Option<&'a str>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frequency_parse() {
        assert_eq!(Frequency::parse("WEEKLY"), Some(Frequency::Weekly));
        assert_eq!(Frequency::parse("daily"), Some(Frequency::Daily));
        assert_eq!(Frequency::parse("hourly"), None);
        assert_eq!(Frequency::Monthly.as_str(), "monthly");
    }

    #[test]
    fn test_keyword_status_parse() {
        assert_eq!(KeywordStatus::parse("rejected"), Some(KeywordStatus::Rejected));
        assert_eq!(KeywordStatus::parse("unknown"), None);
        assert_eq!(KeywordStatus::Expired.as_str(), "expired");
    }

    #[test]
    fn test_default_thresholds() {
        let threshold = PerformanceThreshold::default();
        assert_eq!(threshold.min_cost_for_detection, 10000.0);
        assert_eq!(threshold.min_clicks_for_detection, 5);
        assert_eq!(threshold.lookback_days, 7);
    }
}
