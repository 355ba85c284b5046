//! Google Ads REST (v21) client.

use super::{check_status, ClientError, ClientResult};
use chrono::NaiveDate;
use serde::Serialize;
use serde_json::{json, Value};

const API_BASE: &str = "https://googleads.googleapis.com/v21";

/// Keyword Planner defaults: Korean language, South Korea geo target.
pub const LANGUAGE_KOREAN: &str = "1012";
pub const GEO_SOUTH_KOREA: &str = "2410";

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PerformanceMetrics {
    pub cost: f64,
    pub clicks: i64,
    pub impressions: i64,
    pub conversions: f64,
    pub conversion_value: f64,
    pub ctr: f64,
    pub cpc: f64,
    pub cpa: f64,
}

impl PerformanceMetrics {
    /// Sums campaign rows from `searchStream`; cost arrives in micros.
    pub fn aggregate(rows: &[Value]) -> Self {
        let mut cost_micros: i64 = 0;
        let mut clicks: i64 = 0;
        let mut impressions: i64 = 0;
        let mut conversions = 0.0;
        let mut conversion_value = 0.0;

        for row in rows {
            let metrics = &row["metrics"];
            cost_micros += as_i64(&metrics["costMicros"]);
            clicks += as_i64(&metrics["clicks"]);
            impressions += as_i64(&metrics["impressions"]);
            conversions += as_f64(&metrics["conversions"]);
            conversion_value += as_f64(&metrics["conversionsValue"]);
        }

        Self::from_totals(
            cost_micros as f64 / 1_000_000.0,
            clicks,
            impressions,
            conversions,
            conversion_value,
        )
    }

    pub fn from_totals(
        cost: f64,
        clicks: i64,
        impressions: i64,
        conversions: f64,
        conversion_value: f64,
    ) -> Self {
        Self {
            cost,
            clicks,
            impressions,
            conversions,
            conversion_value,
            ctr: if impressions > 0 {
                clicks as f64 / impressions as f64 * 100.0
            } else {
                0.0
            },
            cpc: if clicks > 0 { cost / clicks as f64 } else { 0.0 },
            cpa: if conversions > 0.0 {
                cost / conversions
            } else {
                0.0
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchTermRow {
    pub search_term: String,
    pub campaign_id: String,
    pub campaign_name: String,
    pub cost: f64,
    pub clicks: i64,
    pub conversions: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdsAccount {
    pub customer_id: String,
    pub account_name: String,
    pub currency: String,
    pub timezone: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Campaign {
    pub id: String,
    pub name: String,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeywordIdea {
    pub keyword: String,
    pub avg_monthly_searches: i64,
    pub competition: String,
    pub low_bid: i64,
    pub high_bid: i64,
}

/// REST encodes int64 as strings; accept both forms.
fn as_i64(value: &Value) -> i64 {
    match value {
        Value::Number(n) => n.as_i64().unwrap_or_default(),
        Value::String(s) => s.parse().unwrap_or_default(),
        _ => 0,
    }
}

fn as_f64(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().unwrap_or_default(),
        Value::String(s) => s.parse().unwrap_or_default(),
        _ => 0.0,
    }
}

fn as_id(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    }
}

pub fn clean_customer_id(customer_id: &str) -> String {
    customer_id.chars().filter(|c| *c != '-').collect()
}

/// Only plain numeric ids are allowed into GAQL.
fn campaign_filter(campaign_ids: Option<&[String]>) -> ClientResult<String> {
    match campaign_ids {
        Some(ids) if !ids.is_empty() => {
            if let Some(bad) = ids
                .iter()
                .find(|id| id.is_empty() || !id.chars().all(|c| c.is_ascii_digit()))
            {
                return Err(ClientError::Api(format!("invalid campaign id: {}", bad)));
            }
            Ok(format!(" AND campaign.id IN ({})", ids.join(", ")))
        }
        _ => Ok(String::new()),
    }
}

pub fn performance_query(
    date_from: NaiveDate,
    date_to: NaiveDate,
    campaign_ids: Option<&[String]>,
) -> ClientResult<String> {
    Ok(format!(
        "SELECT metrics.cost_micros, metrics.conversions, metrics.conversions_value, \
         metrics.clicks, metrics.impressions FROM campaign \
         WHERE segments.date BETWEEN '{}' AND '{}'{}",
        date_from.format("%Y-%m-%d"),
        date_to.format("%Y-%m-%d"),
        campaign_filter(campaign_ids)?
    ))
}

pub fn search_terms_query(date_from: NaiveDate, date_to: NaiveDate, min_cost: f64) -> String {
    format!(
        "SELECT search_term_view.search_term, campaign.id, campaign.name, \
         metrics.cost_micros, metrics.clicks, metrics.conversions FROM search_term_view \
         WHERE segments.date BETWEEN '{}' AND '{}' AND metrics.cost_micros >= {}",
        date_from.format("%Y-%m-%d"),
        date_to.format("%Y-%m-%d"),
        (min_cost * 1_000_000.0) as i64
    )
}

pub fn parse_search_terms(rows: &[Value]) -> Vec<SearchTermRow> {
    rows.iter()
        .map(|row| SearchTermRow {
            search_term: row["searchTermView"]["searchTerm"]
                .as_str()
                .unwrap_or_default()
                .to_string(),
            campaign_id: as_id(&row["campaign"]["id"]),
            campaign_name: row["campaign"]["name"]
                .as_str()
                .unwrap_or_default()
                .to_string(),
            cost: as_i64(&row["metrics"]["costMicros"]) as f64 / 1_000_000.0,
            clicks: as_i64(&row["metrics"]["clicks"]),
            conversions: as_f64(&row["metrics"]["conversions"]),
        })
        .filter(|term| !term.search_term.is_empty())
        .collect()
}

fn parse_accounts(rows: &[Value], resource: &str) -> Vec<AdsAccount> {
    rows.iter()
        .map(|row| {
            let entry = &row[resource];
            let customer_id = as_id(&entry["id"]);
            AdsAccount {
                account_name: entry["descriptiveName"]
                    .as_str()
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("Account {}", customer_id)),
                currency: entry["currencyCode"].as_str().unwrap_or("KRW").to_string(),
                timezone: entry["timeZone"]
                    .as_str()
                    .unwrap_or("Asia/Seoul")
                    .to_string(),
                customer_id,
            }
        })
        .filter(|account| !account.customer_id.is_empty())
        .collect()
}

#[derive(Clone)]
pub struct GoogleAdsClient {
    http: reqwest::Client,
    developer_token: Option<String>,
    login_customer_id: Option<String>,
    base_url: String,
}

impl GoogleAdsClient {
    pub fn new(
        http: reqwest::Client,
        developer_token: Option<String>,
        login_customer_id: Option<String>,
    ) -> Self {
        Self {
            http,
            developer_token,
            login_customer_id: login_customer_id.map(|id| clean_customer_id(&id)),
            base_url: API_BASE.to_string(),
        }
    }

    fn request(&self, access_token: &str, url: &str) -> ClientResult<reqwest::RequestBuilder> {
        let developer_token = self
            .developer_token
            .as_deref()
            .ok_or(ClientError::NotConfigured("GOOGLE_DEVELOPER_TOKEN"))?;

        let mut builder = self
            .http
            .post(url)
            .bearer_auth(access_token)
            .header("developer-token", developer_token);

        if let Some(login) = &self.login_customer_id {
            builder = builder.header("login-customer-id", login);
        }
        Ok(builder)
    }

    pub async fn search_stream(
        &self,
        access_token: &str,
        customer_id: &str,
        query: &str,
    ) -> ClientResult<Vec<Value>> {
        let url = format!(
            "{}/customers/{}/googleAds:searchStream",
            self.base_url,
            clean_customer_id(customer_id)
        );
        tracing::debug!("searchStream for {}: {}", customer_id, query);

        let response = self
            .request(access_token, &url)?
            .json(&json!({ "query": query }))
            .send()
            .await?;

        let body: Value = check_status(response).await?.json().await?;

        // searchStream answers with an array of result batches
        let rows = match body {
            Value::Array(batches) => batches
                .into_iter()
                .flat_map(|mut batch| match batch.get_mut("results").map(Value::take) {
                    Some(Value::Array(results)) => results,
                    _ => Vec::new(),
                })
                .collect(),
            _ => Vec::new(),
        };
        Ok(rows)
    }

    pub async fn performance_metrics(
        &self,
        access_token: &str,
        customer_id: &str,
        date_from: NaiveDate,
        date_to: NaiveDate,
        campaign_ids: Option<&[String]>,
    ) -> ClientResult<PerformanceMetrics> {
        let query = performance_query(date_from, date_to, campaign_ids)?;
        let rows = self.search_stream(access_token, customer_id, &query).await?;
        Ok(PerformanceMetrics::aggregate(&rows))
    }

    pub async fn search_terms(
        &self,
        access_token: &str,
        customer_id: &str,
        date_from: NaiveDate,
        date_to: NaiveDate,
        min_cost: f64,
    ) -> ClientResult<Vec<SearchTermRow>> {
        let query = search_terms_query(date_from, date_to, min_cost);
        let rows = self.search_stream(access_token, customer_id, &query).await?;
        Ok(parse_search_terms(&rows))
    }

    pub async fn list_campaigns(
        &self,
        access_token: &str,
        customer_id: &str,
    ) -> ClientResult<Vec<Campaign>> {
        let query = "SELECT campaign.id, campaign.name, campaign.status FROM campaign \
                     WHERE campaign.status IN ('ENABLED', 'PAUSED')";
        let rows = self.search_stream(access_token, customer_id, query).await?;

        Ok(rows
            .iter()
            .map(|row| Campaign {
                id: as_id(&row["campaign"]["id"]),
                name: row["campaign"]["name"].as_str().unwrap_or_default().to_string(),
                status: row["campaign"]["status"]
                    .as_str()
                    .unwrap_or("UNKNOWN")
                    .to_string(),
            })
            .collect())
    }

    /// Manager accounts list their clients; a plain account describes itself.
    pub async fn list_accessible_accounts(&self, access_token: &str) -> ClientResult<Vec<AdsAccount>> {
        let roots = match &self.login_customer_id {
            Some(login) => vec![login.clone()],
            None => self.list_accessible_customer_ids(access_token).await?,
        };

        let mut accounts = Vec::new();
        for root in roots {
            let client_query = "SELECT customer_client.id, customer_client.descriptive_name, \
                                customer_client.currency_code, customer_client.time_zone \
                                FROM customer_client WHERE customer_client.manager = FALSE";
            match self.search_stream(access_token, &root, client_query).await {
                Ok(rows) => {
                    let found = parse_accounts(&rows, "customerClient");
                    if !found.is_empty() {
                        accounts.extend(found);
                        continue;
                    }
                }
                Err(e) => tracing::warn!("customer_client lookup failed for {}: {}", root, e),
            }

            let own_query = "SELECT customer.id, customer.descriptive_name, \
                             customer.currency_code, customer.time_zone FROM customer";
            match self.search_stream(access_token, &root, own_query).await {
                Ok(rows) => accounts.extend(parse_accounts(&rows, "customer")),
                Err(e) => tracing::warn!("customer lookup failed for {}: {}", root, e),
            }
        }

        accounts.dedup_by(|a, b| a.customer_id == b.customer_id);
        Ok(accounts)
    }

    async fn list_accessible_customer_ids(&self, access_token: &str) -> ClientResult<Vec<String>> {
        let developer_token = self
            .developer_token
            .as_deref()
            .ok_or(ClientError::NotConfigured("GOOGLE_DEVELOPER_TOKEN"))?;

        let response = self
            .http
            .get(format!("{}/customers:listAccessibleCustomers", self.base_url))
            .bearer_auth(access_token)
            .header("developer-token", developer_token)
            .send()
            .await?;

        let body: Value = check_status(response).await?.json().await?;
        Ok(body["resourceNames"]
            .as_array()
            .map(|names| {
                names
                    .iter()
                    .filter_map(Value::as_str)
                    .filter_map(|name| name.strip_prefix("customers/"))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default())
    }

    pub async fn generate_keyword_ideas(
        &self,
        access_token: &str,
        customer_id: &str,
        seed_keywords: &[String],
        limit: usize,
    ) -> ClientResult<Vec<KeywordIdea>> {
        let url = format!(
            "{}/customers/{}:generateKeywordIdeas",
            self.base_url,
            clean_customer_id(customer_id)
        );
        let payload = json!({
            "keywordSeed": { "keywords": seed_keywords },
            "language": format!("languageConstants/{}", LANGUAGE_KOREAN),
            "geoTargetConstants": [format!("geoTargetConstants/{}", GEO_SOUTH_KOREA)],
            "keywordPlanNetwork": "GOOGLE_SEARCH_AND_PARTNERS",
            "includeAdultKeywords": false,
            "pageSize": limit,
        });

        let response = self.request(access_token, &url)?.json(&payload).send().await?;
        let body: Value = check_status(response).await?.json().await?;

        Ok(body["results"]
            .as_array()
            .map(|results| {
                results
                    .iter()
                    .map(|row| {
                        let m = &row["keywordIdeaMetrics"];
                        KeywordIdea {
                            keyword: row["text"].as_str().unwrap_or_default().to_string(),
                            avg_monthly_searches: as_i64(&m["avgMonthlySearches"]),
                            competition: m["competition"]
                                .as_str()
                                .unwrap_or("UNKNOWN")
                                .to_string(),
                            low_bid: as_i64(&m["lowTopOfPageBidMicros"]) / 1_000_000,
                            high_bid: as_i64(&m["highTopOfPageBidMicros"]) / 1_000_000,
                        }
                    })
                    .take(limit)
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Adds an EXACT negative keyword criterion to the campaign.
    pub async fn add_negative_keyword(
        &self,
        access_token: &str,
        customer_id: &str,
        campaign_id: &str,
        keyword_text: &str,
    ) -> ClientResult<String> {
        let customer = clean_customer_id(customer_id);
        let url = format!("{}/customers/{}/campaignCriteria:mutate", self.base_url, customer);
        let payload = json!({
            "operations": [{
                "create": {
                    "campaign": format!("customers/{}/campaigns/{}", customer, campaign_id),
                    "negative": true,
                    "keyword": { "text": keyword_text, "matchType": "EXACT" }
                }
            }]
        });

        let response = self.request(access_token, &url)?.json(&payload).send().await?;
        let body: Value = check_status(response).await?.json().await?;

        body["results"][0]["resourceName"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ClientError::Decode("missing resourceName in mutate response".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate_converts_micros_and_derives_rates() {
        let rows = vec![
            json!({"metrics": {"costMicros": "150000000", "clicks": "30", "impressions": "1000", "conversions": 3.0, "conversionsValue": 90000.0}}),
            json!({"metrics": {"costMicros": "50000000", "clicks": "10", "impressions": "1000", "conversions": 1.0}}),
        ];

        let m = PerformanceMetrics::aggregate(&rows);
        assert_eq!(m.cost, 200.0);
        assert_eq!(m.clicks, 40);
        assert_eq!(m.impressions, 2000);
        assert_eq!(m.conversions, 4.0);
        assert_eq!(m.conversion_value, 90000.0);
        assert_eq!(m.cpc, 5.0);
        assert_eq!(m.cpa, 50.0);
        assert_eq!(m.ctr, 2.0);
    }

    #[test]
    fn test_aggregate_handles_zero_denominators() {
        let m = PerformanceMetrics::aggregate(&[]);
        assert_eq!(m, PerformanceMetrics::default());
    }

    #[test]
    fn test_parse_search_terms() {
        let rows = vec![
            json!({
                "searchTermView": {"searchTerm": "무료 샘플"},
                "campaign": {"id": "123", "name": "Brand"},
                "metrics": {"costMicros": "15000000000", "clicks": "12", "conversions": 0.0}
            }),
            json!({"searchTermView": {}, "campaign": {"id": 1}, "metrics": {}}),
        ];

        let terms = parse_search_terms(&rows);
        assert_eq!(terms.len(), 1);
        assert_eq!(terms[0].search_term, "무료 샘플");
        assert_eq!(terms[0].campaign_id, "123");
        assert_eq!(terms[0].cost, 15000.0);
        assert_eq!(terms[0].clicks, 12);
    }

    #[test]
    fn test_performance_query_filters_campaigns() {
        let from = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        let to = NaiveDate::from_ymd_opt(2026, 3, 8).unwrap();

        let all = performance_query(from, to, None).unwrap();
        assert!(all.contains("BETWEEN '2026-03-02' AND '2026-03-08'"));
        assert!(!all.contains("campaign.id IN"));

        let ids = vec!["11".to_string(), "22".to_string()];
        let some = performance_query(from, to, Some(&ids)).unwrap();
        assert!(some.ends_with("AND campaign.id IN (11, 22)"));

        let bad = vec!["1 OR 1=1".to_string()];
        assert!(performance_query(from, to, Some(&bad)).is_err());
    }

    #[test]
    fn test_parse_accounts_defaults_name() {
        let rows = vec![json!({"customer": {"id": "987", "currencyCode": "USD", "timeZone": "America/New_York"}})];
        let accounts = parse_accounts(&rows, "customer");
        assert_eq!(accounts[0].account_name, "Account 987");
        assert_eq!(accounts[0].currency, "USD");
    }

    #[test]
    fn test_clean_customer_id() {
        assert_eq!(clean_customer_id("123-456-7890"), "1234567890");
    }
}
