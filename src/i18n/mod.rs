use serde_json::Value;
use std::collections::HashMap;
use std::sync::OnceLock;

pub const DEFAULT_LANG: &str = "ko";

static TRANSLATIONS: OnceLock<HashMap<String, Value>> = OnceLock::new();

fn load_translations() -> HashMap<String, Value> {
    let mut translations = HashMap::new();

    let ko_json = include_str!("ko.json");
    if let Ok(ko_value) = serde_json::from_str(ko_json) {
        translations.insert("ko".to_string(), ko_value);
    } else {
        tracing::error!("Failed to parse ko.json");
    }

    let en_json = include_str!("en.json");
    if let Ok(en_value) = serde_json::from_str(en_json) {
        translations.insert("en".to_string(), en_value);
    } else {
        tracing::error!("Failed to parse en.json");
    }

    translations
}

fn get_nested_value<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    let mut current = value;

    for part in key.split('.') {
        match current {
            Value::Object(map) => {
                current = map.get(part)?;
            }
            _ => return None,
        }
    }

    Some(current)
}

fn lookup(language: &str, path: &str) -> Option<&'static Value> {
    let translations = TRANSLATIONS.get_or_init(load_translations);

    translations
        .get(language)
        .and_then(|value| get_nested_value(value, path))
        .or_else(|| {
            translations
                .get(DEFAULT_LANG)
                .and_then(|value| get_nested_value(value, path))
        })
}

/// Hangul anywhere in the text selects Korean.
pub fn detect_language_from_text(text: &str) -> &'static str {
    let has_hangul = text
        .chars()
        .any(|c| ('\u{AC00}'..='\u{D7A3}').contains(&c) || ('\u{3131}'..='\u{318E}').contains(&c));

    if has_hangul || text.trim().is_empty() {
        "ko"
    } else {
        "en"
    }
}

pub fn t(language: &str, path: &str) -> String {
    match lookup(language, path).and_then(|value| value.as_str()) {
        Some(translation) => translation.to_string(),
        None => format!("Message not found: {}", path),
    }
}

pub fn t_with_args(language: &str, path: &str, args: &[&str]) -> String {
    let mut message = t(language, path);

    for arg in args {
        if message.contains("{}") {
            message = message.replacen("{}", arg, 1);
        }
    }

    message
}

/// Indexes into an array entry, e.g. weekday names.
pub fn t_index(language: &str, path: &str, index: usize) -> String {
    lookup(language, path)
        .and_then(|value| value.as_array())
        .and_then(|items| items.get(index))
        .and_then(|value| value.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| format!("Message not found: {}[{}]", path, index))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_message() {
        let msg = t("ko", "errors.not_found");
        assert_eq!(msg, "요청한 리소스를 찾을 수 없습니다.");

        let msg_en = t("en", "errors.not_found");
        assert!(msg_en.contains("not found"));
    }

    #[test]
    fn test_get_message_with_args() {
        let msg = t_with_args("ko", "errors.rate_limited", &["42"]);
        assert_eq!(msg, "요청이 많습니다. 42초 후 다시 시도해주세요.");
    }

    #[test]
    fn test_missing_message() {
        let msg = t("ko", "nonexistent.key");
        assert!(msg.contains("Message not found"));
    }

    #[test]
    fn test_language_fallback() {
        let msg = t("de", "report.fallback_insight");
        assert_eq!(msg, "성과 데이터를 분석했습니다.");
    }

    #[test]
    fn test_weekday_lookup() {
        assert_eq!(t_index("ko", "slack.weekdays", 0), "월요일");
        assert_eq!(t_index("en", "slack.weekdays", 6), "Sunday");
        assert!(t_index("en", "slack.weekdays", 9).contains("Message not found"));
    }

    #[test]
    fn test_detect_language_from_text() {
        assert_eq!(detect_language_from_text("지난주 리포트 보여줘"), "ko");
        assert_eq!(detect_language_from_text("show me last week"), "en");
    }
}
