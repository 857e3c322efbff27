//! Credential scrubbing for everything shown to the user.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value as JsonValue;

const REDACTED: &str = "[REDACTED]";

/// `Authorization`-style credentials echoed back in error bodies.
static AUTH_SCHEME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\b(Bot|Bearer)\s+[^\s"',;]+"#).expect("hardcoded regex")
});

/// Replaces configured secrets and `Bot`/`Bearer` credentials.
#[derive(Debug, Clone, Default)]
pub struct Redactor {
    secrets: Vec<String>,
}

impl Redactor {
    pub fn new(secrets: impl IntoIterator<Item = String>) -> Self {
        let mut secrets: Vec<String> = secrets.into_iter().filter(|s| !s.is_empty()).collect();
        // Longest first so a secret containing another is replaced whole.
        secrets.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        secrets.dedup();
        Self { secrets }
    }

    pub fn redact(&self, text: &str) -> String {
        let mut out = text.to_string();
        for secret in &self.secrets {
            if out.contains(secret.as_str()) {
                out = out.replace(secret.as_str(), REDACTED);
            }
        }
        AUTH_SCHEME
            .replace_all(&out, format!("$1 {REDACTED}").as_str())
            .into_owned()
    }

    /// Redact every string inside a JSON value.
    pub fn redact_json(&self, value: &mut JsonValue) {
        match value {
            JsonValue::String(s) => *s = self.redact(s),
            JsonValue::Array(items) => items.iter_mut().for_each(|v| self.redact_json(v)),
            JsonValue::Object(map) => map.values_mut().for_each(|v| self.redact_json(v)),
            JsonValue::Null | JsonValue::Bool(_) | JsonValue::Number(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_schemes_are_masked() {
        let r = Redactor::default();
        assert_eq!(
            r.redact("401: header was Bot abc.DEF-123, retry"),
            "401: header was Bot [REDACTED], retry"
        );
        assert_eq!(
            r.redact(r#"{"authorization":"Bearer sk-xyz"}"#),
            r#"{"authorization":"Bearer [REDACTED]"}"#
        );
        assert_eq!(r.redact("nothing to hide"), "nothing to hide");
        assert_eq!(r.redact("Robot arms"), "Robot arms");
    }

    #[test]
    fn configured_secrets_are_masked_verbatim() {
        let r = Redactor::new(["tok3n".to_string(), String::new(), "vault-key".to_string()]);
        assert_eq!(
            r.redact("url?key=vault-key&t=tok3n"),
            "url?key=[REDACTED]&t=[REDACTED]"
        );
    }

    #[test]
    fn json_strings_are_masked_recursively() {
        let r = Redactor::new(["s3cret".to_string()]);
        let mut value = serde_json::json!({
            "checks": [{"name": "discord_api", "pass": false, "detail": "401 for s3cret"}],
            "count": 3,
        });
        r.redact_json(&mut value);
        assert_eq!(value["checks"][0]["detail"], "401 for [REDACTED]");
        assert_eq!(value["count"], 3);
    }
}
