//! Named fixture texts for tests.
//!
//! A provider is built once and then only read, so one instance can be
//! shared by parallel tests. Per-test additions go through [`FixtureProvider::with`],
//! which returns a new provider instead of mutating the shared one.

use std::collections::BTreeMap;
use std::sync::Arc;

pub const VALID_FLOW: &str = "valid_flow.json";
pub const MALFORMED_FLOW: &str = "malformed_flow.json";
pub const EMPTY_CONFIG: &str = "empty_config.yaml";

const VALID_FLOW_TEXT: &str = r#"{
  "name": "minimal",
  "steps": [
    { "id": "start", "action": "noop" }
  ]
}
"#;

const MALFORMED_FLOW_TEXT: &str = r#"{
  "name": "broken",
  "steps": [
    { "id": "start", "action": "noop"
"#;

#[derive(Debug, Clone, Default)]
pub struct FixtureProvider {
    fixtures: Arc<BTreeMap<String, String>>,
}

impl FixtureProvider {
    /// An empty provider.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Canned fixtures: a minimal valid flow, a malformed JSON flow, and an
    /// empty config.
    #[must_use]
    pub fn standard() -> Self {
        Self::new()
            .with(VALID_FLOW, VALID_FLOW_TEXT)
            .with(MALFORMED_FLOW, MALFORMED_FLOW_TEXT)
            .with(EMPTY_CONFIG, "")
    }

    /// A copy of this provider with `name` set to `content`.
    #[must_use]
    pub fn with(&self, name: impl Into<String>, content: impl Into<String>) -> Self {
        let mut fixtures = (*self.fixtures).clone();
        fixtures.insert(name.into(), content.into());
        Self {
            fixtures: Arc::new(fixtures),
        }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fixtures.get(name).map(String::as_str)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fixtures.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_fixtures() {
        let provider = FixtureProvider::standard();
        assert_eq!(
            provider.names().collect::<Vec<_>>(),
            vec![EMPTY_CONFIG, MALFORMED_FLOW, VALID_FLOW]
        );

        let valid: serde_json::Value = serde_json::from_str(provider.get(VALID_FLOW).unwrap()).unwrap();
        assert_eq!(valid["name"], "minimal");
        assert!(serde_json::from_str::<serde_json::Value>(provider.get(MALFORMED_FLOW).unwrap()).is_err());
        assert_eq!(provider.get(EMPTY_CONFIG), Some(""));
        assert!(provider.get("missing.json").is_none());
    }

    #[test]
    fn test_with_leaves_original_untouched() {
        let shared = FixtureProvider::standard();
        let local = shared.with("extra.json", "{}");

        assert_eq!(local.get("extra.json"), Some("{}"));
        assert!(shared.get("extra.json").is_none());

        let replaced = local.with(VALID_FLOW, "{\"name\":\"other\"}");
        assert_eq!(replaced.get(VALID_FLOW), Some("{\"name\":\"other\"}"));
        assert_eq!(local.get(VALID_FLOW), Some(VALID_FLOW_TEXT));
    }
}
