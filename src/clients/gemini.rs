use super::{check_status, ClientError, ClientResult};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeminiModel {
    Flash,
    Pro,
}

impl GeminiModel {
    pub fn requests_per_minute(&self) -> usize {
        match self {
            GeminiModel::Flash => 60,
            GeminiModel::Pro => 10,
        }
    }
}

/// Sliding one-minute window of request start times.
pub struct RequestWindow {
    max_requests: usize,
    window: Duration,
    requests: Mutex<VecDeque<Instant>>,
}

impl RequestWindow {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            requests: Mutex::new(VecDeque::new()),
        }
    }

    /// Records a request if there is room; otherwise returns how long until a slot frees up.
    pub fn try_acquire(&self, now: Instant) -> Result<(), Duration> {
        let mut requests = match self.requests.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!("Gemini request window mutex poisoned, recovering");
                poisoned.into_inner()
            }
        };

        while let Some(oldest) = requests.front() {
            if now.duration_since(*oldest) >= self.window {
                requests.pop_front();
            } else {
                break;
            }
        }

        if requests.len() >= self.max_requests {
            let wait = requests
                .front()
                .map(|oldest| self.window.saturating_sub(now.duration_since(*oldest)))
                .unwrap_or(self.window);
            return Err(wait);
        }

        requests.push_back(now);
        Ok(())
    }
}

pub struct GeminiClient {
    http: reqwest::Client,
    api_key: Option<String>,
    flash_model: String,
    pro_model: String,
    flash_window: RequestWindow,
    pro_window: RequestWindow,
}

impl GeminiClient {
    pub fn new(
        http: reqwest::Client,
        api_key: Option<String>,
        flash_model: String,
        pro_model: String,
    ) -> Self {
        let minute = Duration::from_secs(60);
        Self {
            http,
            api_key,
            flash_model,
            pro_model,
            flash_window: RequestWindow::new(GeminiModel::Flash.requests_per_minute(), minute),
            pro_window: RequestWindow::new(GeminiModel::Pro.requests_per_minute(), minute),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    pub async fn generate(
        &self,
        model: GeminiModel,
        prompt: &str,
        temperature: f32,
    ) -> ClientResult<String> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(ClientError::NotConfigured("GEMINI_API_KEY"))?;

        let (model_name, window) = match model {
            GeminiModel::Flash => (&self.flash_model, &self.flash_window),
            GeminiModel::Pro => (&self.pro_model, &self.pro_window),
        };

        if let Err(wait) = window.try_acquire(Instant::now()) {
            tracing::warn!("Gemini {} request window full", model_name);
            return Err(ClientError::RateLimited {
                retry_after: wait.as_secs().max(1),
            });
        }

        let url = format!("{}/models/{}:generateContent", API_BASE, model_name);
        let payload = json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
            "generationConfig": { "temperature": temperature },
        });

        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", api_key)
            .json(&payload)
            .send()
            .await?;

        let body: Value = check_status(response).await?.json().await?;
        let text = extract_text(&body);
        if text.trim().is_empty() {
            return Err(ClientError::Decode("empty Gemini response".into()));
        }
        Ok(text.trim().to_string())
    }
}

fn extract_text(body: &Value) -> String {
    body["candidates"][0]["content"]["parts"]
        .as_array()
        .map(|parts| {
            parts
                .iter()
                .filter_map(|part| part["text"].as_str())
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default()
}

/// Removes a surrounding ``` or ```json fence from a model reply.
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_blocks_after_limit() {
        let window = RequestWindow::new(2, Duration::from_secs(60));
        let start = Instant::now();

        assert!(window.try_acquire(start).is_ok());
        assert!(window.try_acquire(start + Duration::from_secs(1)).is_ok());

        let wait = window
            .try_acquire(start + Duration::from_secs(10))
            .unwrap_err();
        assert_eq!(wait, Duration::from_secs(50));
    }

    #[test]
    fn test_window_slides() {
        let window = RequestWindow::new(1, Duration::from_secs(60));
        let start = Instant::now();

        assert!(window.try_acquire(start).is_ok());
        assert!(window.try_acquire(start + Duration::from_secs(30)).is_err());
        assert!(window.try_acquire(start + Duration::from_secs(61)).is_ok());
    }

    #[test]
    fn test_model_limits() {
        assert_eq!(GeminiModel::Flash.requests_per_minute(), 60);
        assert_eq!(GeminiModel::Pro.requests_per_minute(), 10);
    }

    #[test]
    fn test_extract_text_joins_parts() {
        let body = json!({
            "candidates": [{"content": {"parts": [{"text": "안녕"}, {"text": "하세요"}]}}]
        });
        assert_eq!(extract_text(&body), "안녕하세요");
        assert_eq!(extract_text(&json!({})), "");
    }

    #[test]
    fn test_strip_code_fence() {
        assert_eq!(strip_code_fence("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("```\n{}\n```"), "{}");
        assert_eq!(strip_code_fence("  {\"b\":2} "), "{\"b\":2}");
    }
}
