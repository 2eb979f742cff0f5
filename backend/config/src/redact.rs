//! Settings redaction: produce safe-to-display snapshots by masking secrets.

use serde_json::Value;

/// Keys whose string values are secrets.
static SECRET_KEYS: &[&str] = &["api_key", "apiKey", "token", "secret", "password"];

fn is_secret_key(key: &str) -> bool {
    SECRET_KEYS.iter().any(|k| k.eq_ignore_ascii_case(key))
}

/// Mask a secret for display: first four and last four characters for
/// anything longer than eight, a fixed mask otherwise.
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() > 8 {
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{head}...{tail}")
    } else {
        "******".to_string()
    }
}

/// Redact a settings JSON value, masking every non-empty secret field.
pub fn redact(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| {
                    let v = match v {
                        Value::String(s) if is_secret_key(k) && !s.is_empty() => {
                            Value::String(mask_secret(s))
                        }
                        other => redact(other),
                    };
                    (k.clone(), v)
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(redact).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn masks_long_key_keeping_ends() {
        assert_eq!(mask_secret("sk-1234567890abcd"), "sk-1...abcd");
    }

    #[test]
    fn masks_short_key_fully() {
        assert_eq!(mask_secret("short"), "******");
    }

    #[test]
    fn redacts_only_secret_fields() {
        let v = json!({ "api_key": "sk-1234567890abcd", "model_name": "qwen-vl-ocr", "empty": "" });
        let redacted = redact(&v);
        assert_eq!(redacted["api_key"], "sk-1...abcd");
        assert_eq!(redacted["model_name"], "qwen-vl-ocr");
    }

    #[test]
    fn empty_secret_is_left_empty() {
        let redacted = redact(&json!({ "api_key": "" }));
        assert_eq!(redacted["api_key"], "");
    }
}
