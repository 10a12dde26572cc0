//! Model selection fallback chain (§4.5 "Model selection").
//!
//! Resolution order when a turn needs a provider + model:
//! 1. The caller's explicit `"provider_id/model_name"` selection.
//! 2. The most recently used model for this session (the "recency list").
//! 3. The provider's configured default model.
//! 4. The first registered provider's default model, or an error if none
//!    are registered.

use crate::registry::ProviderRegistry;
use ax_domain::error::{Error, Result};
use parking_lot::Mutex;
use std::collections::HashMap;

/// A resolved `{provider_id, model}` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub provider_id: String,
    pub model: String,
}

/// Tracks the most recently selected model per session, backing step 2 of
/// the fallback chain.
#[derive(Default)]
pub struct RecencyList {
    inner: Mutex<HashMap<String, Selection>>,
}

impl RecencyList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, session_id: &str, selection: Selection) {
        self.inner.lock().insert(session_id.to_string(), selection);
    }

    pub fn get(&self, session_id: &str) -> Option<Selection> {
        self.inner.lock().get(session_id).cloned()
    }
}

fn parse_spec(spec: &str) -> Option<(&str, &str)> {
    spec.split_once('/')
}

/// Resolve the provider + model to use for a chat turn.
///
/// `requested` is the caller's explicit `"provider_id/model_name"` string,
/// if any (step 1). `session_id` is used to look up the recency list
/// (step 2). `config_default` is the config-specified model, also
/// `"provider_id/model_name"` (step 3), distinct from a provider's own
/// `default_model` which backs step 4.
pub fn select_model(
    registry: &ProviderRegistry,
    recency: &RecencyList,
    session_id: &str,
    requested: Option<&str>,
    config_default: Option<&str>,
) -> Result<Selection> {
    if let Some(spec) = requested {
        if let Some((provider_id, model)) = parse_spec(spec) {
            if registry.is_valid_model(provider_id, model) {
                return Ok(Selection { provider_id: provider_id.to_string(), model: model.to_string() });
            }
        }
    }

    if let Some(selection) = recency.get(session_id) {
        if registry.is_valid_model(&selection.provider_id, &selection.model) {
            return Ok(selection);
        }
    }

    if let Some(spec) = config_default {
        if let Some((provider_id, model)) = parse_spec(spec) {
            if registry.is_valid_model(provider_id, model) {
                return Ok(Selection { provider_id: provider_id.to_string(), model: model.to_string() });
            }
        }
    }

    for provider_id in registry.provider_order() {
        if let Some(model) = registry.default_model_for(provider_id) {
            return Ok(Selection { provider_id: provider_id.clone(), model: model.to_string() });
        }
    }

    if let Some(provider_id) = registry.provider_order().first() {
        return Err(Error::Config(format!("provider '{provider_id}' has no configured default model")));
    }

    Err(Error::Config("no LLM providers configured".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ax_domain::config::{AuthConfig, LlmConfig, ProviderConfig, ProviderKind};

    fn config_with_one_provider() -> LlmConfig {
        LlmConfig {
            providers: vec![ProviderConfig {
                id: "anthropic".into(),
                kind: ProviderKind::Anthropic,
                base_url: "https://api.anthropic.com".into(),
                auth: AuthConfig { key: Some("sk-test".into()), ..Default::default() },
                default_model: Some("claude-sonnet-4-20250514".into()),
                models: vec!["claude-opus".into(), "claude-haiku".into()],
            }],
            ..Default::default()
        }
    }

    #[test]
    fn explicit_selection_wins_when_model_is_valid() {
        let registry = ProviderRegistry::from_config(&config_with_one_provider()).unwrap();
        let recency = RecencyList::new();
        let selection = select_model(&registry, &recency, "s1", Some("anthropic/claude-opus"), None).unwrap();
        assert_eq!(selection.model, "claude-opus");
    }

    #[test]
    fn explicit_selection_of_invalid_model_falls_through_to_default() {
        let registry = ProviderRegistry::from_config(&config_with_one_provider()).unwrap();
        let recency = RecencyList::new();
        let selection = select_model(&registry, &recency, "s1", Some("anthropic/not-a-real-model"), None).unwrap();
        assert_eq!(selection.model, "claude-sonnet-4-20250514");
    }

    #[test]
    fn falls_back_to_recency_list() {
        let registry = ProviderRegistry::from_config(&config_with_one_provider()).unwrap();
        let recency = RecencyList::new();
        recency.record("s1", Selection { provider_id: "anthropic".into(), model: "claude-haiku".into() });
        let selection = select_model(&registry, &recency, "s1", None, None).unwrap();
        assert_eq!(selection.model, "claude-haiku");
    }

    #[test]
    fn stale_recency_entry_with_invalid_model_is_skipped() {
        let registry = ProviderRegistry::from_config(&config_with_one_provider()).unwrap();
        let recency = RecencyList::new();
        recency.record("s1", Selection { provider_id: "anthropic".into(), model: "retired-model".into() });
        let selection = select_model(&registry, &recency, "s1", None, None).unwrap();
        assert_eq!(selection.model, "claude-sonnet-4-20250514");
    }

    #[test]
    fn config_default_model_wins_over_first_provider_fallback() {
        let mut config = config_with_one_provider();
        config.providers.push(ProviderConfig {
            id: "openai".into(),
            kind: ProviderKind::OpenaiCompat,
            base_url: "https://api.openai.com/v1".into(),
            auth: AuthConfig { key: Some("sk-test".into()), ..Default::default() },
            default_model: Some("gpt-4o-mini".into()),
            models: vec![],
        });
        config.default_model = Some("openai/gpt-4o-mini".into());
        let registry = ProviderRegistry::from_config(&config).unwrap();
        let recency = RecencyList::new();
        let selection = select_model(&registry, &recency, "new-session", None, config.default_model.as_deref()).unwrap();
        assert_eq!(selection.provider_id, "openai");
        assert_eq!(selection.model, "gpt-4o-mini");
    }

    #[test]
    fn falls_back_to_provider_default_model() {
        let registry = ProviderRegistry::from_config(&config_with_one_provider()).unwrap();
        let recency = RecencyList::new();
        let selection = select_model(&registry, &recency, "new-session", None, None).unwrap();
        assert_eq!(selection.provider_id, "anthropic");
        assert_eq!(selection.model, "claude-sonnet-4-20250514");
    }

    #[test]
    fn no_providers_is_config_error() {
        let registry = ProviderRegistry::from_config(&LlmConfig::default()).unwrap();
        let recency = RecencyList::new();
        let err = select_model(&registry, &recency, "s1", None, None).unwrap_err();
        assert!(err.to_string().contains("no LLM providers configured"));
    }

    #[test]
    fn unknown_explicit_provider_falls_through_to_default() {
        let registry = ProviderRegistry::from_config(&config_with_one_provider()).unwrap();
        let recency = RecencyList::new();
        let selection = select_model(&registry, &recency, "s1", Some("nonexistent/foo"), None).unwrap();
        assert_eq!(selection.provider_id, "anthropic");
    }
}
