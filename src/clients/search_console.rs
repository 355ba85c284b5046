use super::{check_status, ClientResult};
use chrono::NaiveDate;
use serde::Serialize;
use serde_json::{json, Value};

const API_BASE: &str = "https://searchconsole.googleapis.com/webmasters/v3";

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SearchAnalytics {
    pub clicks: i64,
    pub impressions: i64,
    /// Percentage, rounded to two decimals.
    pub ctr: f64,
    pub position: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopQuery {
    pub query: String,
    pub clicks: i64,
    pub impressions: i64,
    pub ctr: f64,
    pub position: f64,
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

fn analytics_from_row(row: &Value) -> SearchAnalytics {
    SearchAnalytics {
        clicks: row["clicks"].as_f64().unwrap_or_default() as i64,
        impressions: row["impressions"].as_f64().unwrap_or_default() as i64,
        ctr: round_to(row["ctr"].as_f64().unwrap_or_default() * 100.0, 2),
        position: round_to(row["position"].as_f64().unwrap_or_default(), 1),
    }
}

#[derive(Clone)]
pub struct SearchConsoleClient {
    http: reqwest::Client,
}

impl SearchConsoleClient {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    pub async fn list_sites(&self, access_token: &str) -> ClientResult<Vec<String>> {
        let response = self
            .http
            .get(format!("{}/sites", API_BASE))
            .bearer_auth(access_token)
            .send()
            .await?;

        let body: Value = check_status(response).await?.json().await?;
        Ok(body["siteEntry"]
            .as_array()
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|e| e["siteUrl"].as_str())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn query(&self, access_token: &str, site_url: &str, body: &Value) -> ClientResult<Vec<Value>> {
        let url = format!(
            "{}/sites/{}/searchAnalytics/query",
            API_BASE,
            urlencoding::encode(site_url)
        );

        let response = self
            .http
            .post(url)
            .bearer_auth(access_token)
            .json(body)
            .send()
            .await?;

        let mut result: Value = check_status(response).await?.json().await?;
        Ok(match result.get_mut("rows").map(Value::take) {
            Some(Value::Array(rows)) => rows,
            _ => Vec::new(),
        })
    }

    pub async fn search_analytics(
        &self,
        access_token: &str,
        site_url: &str,
        date_from: NaiveDate,
        date_to: NaiveDate,
    ) -> ClientResult<SearchAnalytics> {
        let body = json!({
            "startDate": date_from.to_string(),
            "endDate": date_to.to_string(),
            "dimensions": [],
            "rowLimit": 1,
        });

        let rows = self.query(access_token, site_url, &body).await?;
        Ok(rows.first().map(analytics_from_row).unwrap_or_default())
    }

    pub async fn top_queries(
        &self,
        access_token: &str,
        site_url: &str,
        date_from: NaiveDate,
        date_to: NaiveDate,
        limit: usize,
    ) -> ClientResult<Vec<TopQuery>> {
        let body = json!({
            "startDate": date_from.to_string(),
            "endDate": date_to.to_string(),
            "dimensions": ["query"],
            "rowLimit": limit,
            "orderBy": [{ "fieldName": "clicks", "sortOrder": "DESCENDING" }],
        });

        let rows = self.query(access_token, site_url, &body).await?;
        Ok(rows
            .iter()
            .map(|row| {
                let stats = analytics_from_row(row);
                TopQuery {
                    query: row["keys"][0].as_str().unwrap_or_default().to_string(),
                    clicks: stats.clicks,
                    impressions: stats.impressions,
                    ctr: stats.ctr,
                    position: stats.position,
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_analytics_rounding() {
        let row = json!({"clicks": 120.0, "impressions": 4000.0, "ctr": 0.030012, "position": 7.456});
        let stats = analytics_from_row(&row);
        assert_eq!(stats.clicks, 120);
        assert_eq!(stats.impressions, 4000);
        assert_eq!(stats.ctr, 3.0);
        assert_eq!(stats.position, 7.5);
    }

    #[test]
    fn test_missing_fields_default_to_zero() {
        assert_eq!(analytics_from_row(&json!({})), SearchAnalytics::default());
    }
}
