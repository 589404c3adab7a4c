//! Model bindings: which provider serves which model id.
//!
//! Bindings are written in configs as `provider/model` (e.g.
//! `openrouter/qwen/qwen3-30b`, `deepseek/deepseek-chat`) or as a bare model
//! id, in which case the provider is inferred from the model name.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Providers recognised as a binding prefix
pub const KNOWN_PROVIDERS: &[&str] = &[
    "openai",
    "anthropic",
    "deepseek",
    "openrouter",
    "together_ai",
    "ollama",
    "mock",
];

/// A provider + model id pair
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModelBinding {
    pub provider: String,
    pub model: String,
}

impl ModelBinding {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
        }
    }

    /// Parse a binding string. Returns None for an empty string.
    pub fn parse(spec: &str) -> Option<Self> {
        let spec = spec.trim();
        if spec.is_empty() {
            return None;
        }

        if let Some((prefix, rest)) = spec.split_once('/')
            && KNOWN_PROVIDERS.contains(&prefix)
            && !rest.is_empty()
        {
            return Some(Self::new(prefix, rest));
        }

        Some(Self::new(infer_provider(spec), spec))
    }
}

/// Guess the provider for a bare model id
fn infer_provider(model: &str) -> &'static str {
    let lower = model.to_lowercase();
    if lower.contains("claude") {
        "anthropic"
    } else if lower.contains("deepseek") {
        "deepseek"
    } else if lower.contains('/') {
        "openrouter"
    } else {
        "openai"
    }
}

impl fmt::Display for ModelBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.provider, self.model)
    }
}

impl Serialize for ModelBinding {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ModelBinding {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        ModelBinding::parse(&raw).ok_or_else(|| serde::de::Error::custom("empty model binding"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_with_known_prefix() {
        let b = ModelBinding::parse("deepseek/deepseek-chat").unwrap();
        assert_eq!(b.provider, "deepseek");
        assert_eq!(b.model, "deepseek-chat");
    }

    #[test]
    fn test_parse_keeps_nested_model_path() {
        let b = ModelBinding::parse("openrouter/qwen/qwen3-next-80b-a3b-instruct:free").unwrap();
        assert_eq!(b.provider, "openrouter");
        assert_eq!(b.model, "qwen/qwen3-next-80b-a3b-instruct:free");
    }

    #[test]
    fn test_parse_infers_provider() {
        assert_eq!(ModelBinding::parse("gpt-4o-mini").unwrap().provider, "openai");
        assert_eq!(
            ModelBinding::parse("claude-sonnet-4-20250514").unwrap().provider,
            "anthropic"
        );
        assert_eq!(ModelBinding::parse("deepseek-chat").unwrap().provider, "deepseek");
        assert_eq!(ModelBinding::parse("qwen/qwen3-30b").unwrap().provider, "openrouter");
    }

    #[test]
    fn test_parse_empty() {
        assert!(ModelBinding::parse("").is_none());
        assert!(ModelBinding::parse("   ").is_none());
    }

    #[test]
    fn test_display_and_serde() {
        let b = ModelBinding::new("mock", "seller");
        assert_eq!(b.to_string(), "mock/seller");
        let json = serde_json::to_string(&b).unwrap();
        assert_eq!(json, "\"mock/seller\"");
        let back: ModelBinding = serde_json::from_str(&json).unwrap();
        assert_eq!(back, b);
    }
}
