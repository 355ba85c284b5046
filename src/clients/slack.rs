//! Slack Web API calls used by the bot.

use super::{check_status, ClientError, ClientResult};
use serde::Deserialize;
use serde_json::{json, Value};

const SLACK_API_BASE: &str = "https://slack.com/api";

pub const BOT_SCOPES: &[&str] = &["chat:write", "commands", "im:history", "app_mentions:read"];

#[derive(Debug, Clone)]
pub struct PostedMessage {
    pub channel: String,
    pub ts: String,
}

#[derive(Debug, Deserialize)]
pub struct SlackOAuthTeam {
    pub id: String,
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SlackOAuthAccess {
    pub ok: bool,
    pub error: Option<String>,
    pub access_token: Option<String>,
    pub scope: Option<String>,
    pub bot_user_id: Option<String>,
    pub team: Option<SlackOAuthTeam>,
    pub incoming_webhook: Option<SlackIncomingWebhook>,
}

#[derive(Debug, Deserialize)]
pub struct SlackIncomingWebhook {
    pub channel_id: Option<String>,
}

#[derive(Clone)]
pub struct SlackClient {
    http: reqwest::Client,
    base_url: String,
}

impl SlackClient {
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            base_url: SLACK_API_BASE.to_string(),
        }
    }

    async fn api_call(&self, token: &str, method: &str, payload: &Value) -> ClientResult<Value> {
        let url = format!("{}/{}", self.base_url, method);

        let response = self
            .http
            .post(&url)
            .bearer_auth(token)
            .header("Content-Type", "application/json; charset=utf-8")
            .json(payload)
            .send()
            .await?;

        let body: Value = check_status(response).await?.json().await?;

        // Slack reports failures with HTTP 200 and ok=false
        if body.get("ok").and_then(Value::as_bool) != Some(true) {
            let error = body
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("unknown_error");
            if error == "ratelimited" {
                return Err(ClientError::RateLimited { retry_after: 30 });
            }
            return Err(ClientError::Api(format!("{}: {}", method, error)));
        }

        Ok(body)
    }

    pub async fn post_message(
        &self,
        token: &str,
        channel: &str,
        text: &str,
        blocks: Option<Value>,
        thread_ts: Option<&str>,
    ) -> ClientResult<PostedMessage> {
        let mut payload = json!({
            "channel": channel,
            "text": text,
        });
        if let Some(blocks) = blocks {
            payload["blocks"] = blocks;
        }
        if let Some(ts) = thread_ts {
            payload["thread_ts"] = json!(ts);
        }

        let body = self.api_call(token, "chat.postMessage", &payload).await?;
        posted_message(&body)
    }

    pub async fn update_message(
        &self,
        token: &str,
        channel: &str,
        ts: &str,
        text: &str,
        blocks: Option<Value>,
    ) -> ClientResult<PostedMessage> {
        let mut payload = json!({
            "channel": channel,
            "ts": ts,
            "text": text,
        });
        payload["blocks"] = blocks.unwrap_or_else(|| json!([]));

        let body = self.api_call(token, "chat.update", &payload).await?;
        posted_message(&body)
    }

    /// Replies through a slash command or interaction `response_url`. A reply that does not
    /// replace the original message is shown only to the acting user.
    pub async fn respond(&self, response_url: &str, text: &str, replace: bool) -> ClientResult<()> {
        let payload = json!({
            "response_type": if replace { "in_channel" } else { "ephemeral" },
            "replace_original": replace,
            "text": text,
        });

        let response = self.http.post(response_url).json(&payload).send().await?;
        check_status(response).await?;
        Ok(())
    }

    pub async fn oauth_access(
        &self,
        client_id: &str,
        client_secret: &str,
        code: &str,
        redirect_uri: &str,
    ) -> ClientResult<SlackOAuthAccess> {
        let response = self
            .http
            .post(format!("{}/oauth.v2.access", self.base_url))
            .form(&[
                ("client_id", client_id),
                ("client_secret", client_secret),
                ("code", code),
                ("redirect_uri", redirect_uri),
            ])
            .send()
            .await?;

        let access: SlackOAuthAccess = check_status(response).await?.json().await?;
        if !access.ok {
            return Err(ClientError::Api(format!(
                "oauth.v2.access: {}",
                access.error.as_deref().unwrap_or("unknown_error")
            )));
        }
        Ok(access)
    }
}

fn posted_message(body: &Value) -> ClientResult<PostedMessage> {
    let ts = body
        .get("ts")
        .and_then(Value::as_str)
        .ok_or_else(|| ClientError::Decode("missing ts in Slack response".into()))?;
    let channel = body
        .get("channel")
        .and_then(Value::as_str)
        .unwrap_or_default();

    Ok(PostedMessage {
        channel: channel.to_string(),
        ts: ts.to_string(),
    })
}

pub fn authorize_url(client_id: &str, redirect_uri: &str, state: &str) -> String {
    format!(
        "https://slack.com/oauth/v2/authorize?client_id={}&scope={}&redirect_uri={}&state={}",
        urlencoding::encode(client_id),
        urlencoding::encode(&BOT_SCOPES.join(",")),
        urlencoding::encode(redirect_uri),
        urlencoding::encode(state),
    )
}

/// Escapes `&`, `<` and `>` as Slack mrkdwn requires.
pub fn escape(text: &str) -> String {
    html_escape::encode_text(text).into_owned()
}

pub fn section(text: &str) -> Value {
    json!({
        "type": "section",
        "text": { "type": "mrkdwn", "text": text }
    })
}

pub fn header(text: &str) -> Value {
    json!({
        "type": "header",
        "text": { "type": "plain_text", "text": text, "emoji": true }
    })
}

pub fn context(text: &str) -> Value {
    json!({
        "type": "context",
        "elements": [{ "type": "mrkdwn", "text": text }]
    })
}

pub fn button(action_id: &str, text: &str, value: &str, style: Option<&str>) -> Value {
    let mut button = json!({
        "type": "button",
        "action_id": action_id,
        "text": { "type": "plain_text", "text": text, "emoji": true },
        "value": value,
    });
    if let Some(style) = style {
        button["style"] = json!(style);
    }
    button
}

pub fn actions(block_id: &str, elements: Vec<Value>) -> Value {
    json!({
        "type": "actions",
        "block_id": block_id,
        "elements": elements,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape() {
        assert_eq!(escape("a < b & c > d"), "a &lt; b &amp; c &gt; d");
    }

    #[test]
    fn test_button_with_style() {
        let b = button("approve_keyword", "추가", "42", Some("primary"));
        assert_eq!(b["action_id"], "approve_keyword");
        assert_eq!(b["value"], "42");
        assert_eq!(b["style"], "primary");

        let plain = button("ignore_keyword", "무시", "42", None);
        assert!(plain.get("style").is_none());
    }

    #[test]
    fn test_authorize_url_encodes_scopes() {
        let url = authorize_url("123.456", "https://example.com/oauth/slack/callback", "7:abc");
        assert!(url.starts_with("https://slack.com/oauth/v2/authorize?client_id=123.456"));
        assert!(url.contains("scope=chat%3Awrite%2Ccommands"));
        assert!(url.contains("state=7%3Aabc"));
    }

    #[test]
    fn test_posted_message_requires_ts() {
        let ok = posted_message(&json!({"ok": true, "channel": "C1", "ts": "1.2"})).unwrap();
        assert_eq!(ok.channel, "C1");
        assert_eq!(ok.ts, "1.2");

        assert!(posted_message(&json!({"ok": true})).is_err());
    }
}
