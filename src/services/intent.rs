//! Classifies a Slack message into one of the bot's intents with Gemini.

use crate::clients::gemini::{strip_code_fence, GeminiModel};
use crate::state::AppState;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Messages from the conversation shown to the classifier.
const PROMPT_HISTORY: usize = 5;
const DEFAULT_CONFIDENCE: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    GenerateReport,
    ChangeSchedule,
    AnswerQuestion,
    KeywordSuggestion,
    GeneralChat,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::GenerateReport => "generate_report",
            Intent::ChangeSchedule => "change_schedule",
            Intent::AnswerQuestion => "answer_question",
            Intent::KeywordSuggestion => "keyword_suggestion",
            Intent::GeneralChat => "general_chat",
        }
    }

    pub fn parse(s: &str) -> Option<Intent> {
        match s.trim() {
            "generate_report" => Some(Intent::GenerateReport),
            "change_schedule" => Some(Intent::ChangeSchedule),
            "answer_question" => Some(Intent::AnswerQuestion),
            "keyword_suggestion" => Some(Intent::KeywordSuggestion),
            "general_chat" => Some(Intent::GeneralChat),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Entities {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_range: Option<DateRange>,
    /// Named range such as `last_week`, used when no explicit dates are given.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_period: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub metrics: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub campaign_names: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schedule_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schedule_frequency: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schedule_day: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParsedIntent {
    pub intent: Intent,
    pub entities: Entities,
    pub confidence: f64,
}

impl ParsedIntent {
    pub fn fallback() -> Self {
        Self {
            intent: Intent::GeneralChat,
            entities: Entities::default(),
            confidence: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: String,
    pub content: String,
}

pub fn intent_prompt(message: &str, history: &[ChatTurn]) -> String {
    let mut context = String::new();
    if !history.is_empty() {
        context.push_str("\n대화 이력:\n");
        let skip = history.len().saturating_sub(PROMPT_HISTORY);
        for turn in &history[skip..] {
            let speaker = if turn.role == "user" { "사용자" } else { "어시스턴트" };
            context.push_str(&format!("{}: {}\n", speaker, turn.content));
        }
    }

    format!(
        r#"당신은 SEM 에이전트의 의도 분류기입니다. 사용자의 메시지를 분석하여 의도를 파악하고 엔티티를 추출하세요.

가능한 의도:
1. generate_report: 광고 성과 리포트 생성
2. change_schedule: 리포트 발송 일정 변경
3. answer_question: 광고 캠페인 관련 질문 답변
4. keyword_suggestion: 키워드 추천
5. general_chat: 일반 대화
{context}
현재 메시지: {message}

다음 JSON 형식으로만 응답하세요:
{{
  "intent": "generate_report|change_schedule|answer_question|keyword_suggestion|general_chat",
  "entities": {{
    "date_range": {{"start": "YYYY-MM-DD", "end": "YYYY-MM-DD"}},
    "time_period": "yesterday|last_week|this_week|last_month|this_month|last_7_days|last_30_days",
    "metrics": ["cost", "conversions"],
    "campaign_names": ["캠페인 이름"],
    "keywords": ["추천 기준 키워드"],
    "schedule_time": "HH:MM",
    "schedule_frequency": "daily|weekly|monthly|disabled",
    "schedule_day": "monday"
  }},
  "confidence": 0.95
}}

규칙:
- intent는 반드시 다섯 가지 중 하나
- 관련 없는 엔티티는 생략
- confidence는 0.0~1.0 사이"#
    )
}

/// Lenient parse of the model reply. Unknown intents become general chat and a missing or
/// out-of-range confidence becomes 0.5; unparseable JSON yields the zero-confidence fallback.
pub fn parse_intent_response(raw: &str) -> ParsedIntent {
    let value: Value = match serde_json::from_str(strip_code_fence(raw)) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!("Intent response was not JSON: {}", e);
            return ParsedIntent::fallback();
        }
    };

    let intent = match value["intent"].as_str().and_then(Intent::parse) {
        Some(intent) => intent,
        None => {
            tracing::warn!("Invalid intent {}, using general_chat", value["intent"]);
            Intent::GeneralChat
        }
    };

    let entities = value
        .get("entities")
        .cloned()
        .map(|raw| {
            serde_json::from_value::<Entities>(raw).unwrap_or_else(|e| {
                tracing::debug!("Ignoring malformed entities: {}", e);
                Entities::default()
            })
        })
        .unwrap_or_default();

    let confidence = value["confidence"]
        .as_f64()
        .filter(|c| (0.0..=1.0).contains(c))
        .unwrap_or(DEFAULT_CONFIDENCE);

    ParsedIntent {
        intent,
        entities,
        confidence,
    }
}

pub async fn classify(state: &AppState, message: &str, history: &[ChatTurn]) -> ParsedIntent {
    if !state.gemini.is_configured() {
        return ParsedIntent::fallback();
    }

    let prompt = intent_prompt(message, history);
    match state.gemini.generate(GeminiModel::Flash, &prompt, 0.2).await {
        Ok(reply) => {
            let parsed = parse_intent_response(&reply);
            tracing::info!(
                "Parsed intent {} (confidence {:.2})",
                parsed.intent.as_str(),
                parsed.confidence
            );
            parsed
        }
        Err(e) => {
            tracing::error!("Intent classification failed: {}", e);
            ParsedIntent::fallback()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fenced_response() {
        let raw = "```json\n{\"intent\": \"generate_report\", \"entities\": {\"time_period\": \"last_week\", \"metrics\": [\"cost\"]}, \"confidence\": 0.9}\n```";
        let parsed = parse_intent_response(raw);

        assert_eq!(parsed.intent, Intent::GenerateReport);
        assert_eq!(parsed.entities.time_period.as_deref(), Some("last_week"));
        assert_eq!(parsed.entities.metrics, vec!["cost".to_string()]);
        assert_eq!(parsed.confidence, 0.9);
    }

    #[test]
    fn test_unknown_intent_becomes_general_chat() {
        let parsed = parse_intent_response(r#"{"intent": "order_pizza", "confidence": 0.8}"#);
        assert_eq!(parsed.intent, Intent::GeneralChat);
        assert_eq!(parsed.confidence, 0.8);
    }

    #[test]
    fn test_confidence_defaults() {
        let missing = parse_intent_response(r#"{"intent": "change_schedule"}"#);
        assert_eq!(missing.confidence, 0.5);

        let out_of_range = parse_intent_response(r#"{"intent": "change_schedule", "confidence": 7}"#);
        assert_eq!(out_of_range.confidence, 0.5);
    }

    #[test]
    fn test_invalid_json_falls_back() {
        let parsed = parse_intent_response("리포트 만들어줘");
        assert_eq!(parsed, ParsedIntent::fallback());
    }

    #[test]
    fn test_explicit_date_range() {
        let parsed = parse_intent_response(
            r#"{"intent": "answer_question", "entities": {"date_range": {"start": "2026-03-01", "end": "2026-03-07"}}}"#,
        );
        let range = parsed.entities.date_range.unwrap();
        assert_eq!(range.start, NaiveDate::from_ymd_opt(2026, 3, 1).unwrap());
        assert_eq!(range.end, NaiveDate::from_ymd_opt(2026, 3, 7).unwrap());
    }

    #[test]
    fn test_prompt_uses_recent_history_only() {
        let history: Vec<ChatTurn> = (0..8)
            .map(|i| ChatTurn {
                role: if i % 2 == 0 { "user".into() } else { "assistant".into() },
                content: format!("메시지{}", i),
            })
            .collect();

        let prompt = intent_prompt("지난주 리포트", &history);
        assert!(!prompt.contains("메시지2"));
        assert!(prompt.contains("메시지3"));
        assert!(prompt.contains("메시지7"));
        assert!(prompt.contains("현재 메시지: 지난주 리포트"));
    }
}
