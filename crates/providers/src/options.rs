//! Provider options generator (§4.5 "Provider options generator").
//!
//! Computes the effective `{temperature, max_tokens, provider_options}` for
//! a turn, given the target model's metadata and the caller's requested
//! values. Callers (the agent loop) call this once per LLM call and attach
//! the result to the request; each adapter reads back only the
//! `provider_options` keys it understands.

use ax_domain::model::{ModelMetadata, SdkType};
use serde_json::json;

/// The three request fields the generator computes.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub provider_options: Option<serde_json::Value>,
}

/// Compute `{temperature, max_tokens, provider_options}` for one LLM call.
///
/// - If the model disables temperature, it's omitted regardless of what was
///   requested. If the model is in the fixed-temperature set (GLM, Kimi-k2.5
///   family), temperature is forced to `1`. Otherwise the requested value
///   passes through unchanged.
/// - `max_tokens` is capped at `model.limits.max_output_tokens` when both
///   a request value and a limit are present.
/// - Anthropic: `"high"`/`"max"` effort produces a `thinking` block with a
///   computed token budget (see [`crate::anthropic::thinking_budget`]).
/// - OpenAI-compatible: the effort string passes through as
///   `reasoning_effort` verbatim.
/// - Google: no provider-specific reasoning knobs yet.
pub fn generate(
    model: &ModelMetadata,
    sdk_type: SdkType,
    requested_temperature: Option<f32>,
    requested_max_tokens: Option<u32>,
    reasoning_effort: Option<&str>,
) -> GeneratedOptions {
    let temperature = if !model.capabilities.temperature {
        None
    } else if model.requires_fixed_temperature() {
        Some(1.0)
    } else {
        requested_temperature
    };

    let max_tokens = requested_max_tokens.map(|requested| match model.limits.max_output_tokens {
        Some(cap) => requested.min(cap),
        None => requested,
    });

    let effective_max_output = max_tokens.or(model.limits.max_output_tokens).unwrap_or(4096);

    let provider_options = reasoning_effort.and_then(|effort| match sdk_type {
        SdkType::Anthropic => {
            let budget = crate::anthropic::thinking_budget(effort, effective_max_output)?;
            Some(json!({
                "thinking": {
                    "type": "enabled",
                    "budget_tokens": budget,
                }
            }))
        }
        SdkType::Openai | SdkType::OpenaiCompatible => Some(json!({ "reasoning_effort": effort })),
        SdkType::Google => None,
    });

    GeneratedOptions { temperature, max_tokens, provider_options }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anthropic_high_effort_produces_thinking_block() {
        let model = ModelMetadata::new("claude-opus-4");
        let opts = generate(&model, SdkType::Anthropic, Some(0.7), Some(40_000), Some("high"));
        assert_eq!(opts.provider_options.unwrap()["thinking"]["budget_tokens"], 15_999);
        assert_eq!(opts.max_tokens, Some(40_000));
    }

    #[test]
    fn anthropic_no_effort_is_none() {
        let model = ModelMetadata::new("claude-opus-4");
        let opts = generate(&model, SdkType::Anthropic, None, Some(40_000), None);
        assert!(opts.provider_options.is_none());
    }

    #[test]
    fn openai_effort_passes_through() {
        let model = ModelMetadata::new("gpt-4o");
        let opts = generate(&model, SdkType::Openai, None, None, Some("high"));
        assert_eq!(opts.provider_options.unwrap()["reasoning_effort"], "high");
    }

    #[test]
    fn google_never_produces_options() {
        let model = ModelMetadata::new("gemini-1.5-pro");
        let opts = generate(&model, SdkType::Google, None, None, Some("high"));
        assert!(opts.provider_options.is_none());
    }

    #[test]
    fn fixed_temperature_model_forces_one() {
        let model = ModelMetadata::new("glm-4-plus");
        let opts = generate(&model, SdkType::OpenaiCompatible, Some(0.3), None, None);
        assert_eq!(opts.temperature, Some(1.0));
    }

    #[test]
    fn disabled_temperature_model_omits_it() {
        let mut model = ModelMetadata::new("o1-preview");
        model.capabilities.temperature = false;
        let opts = generate(&model, SdkType::Openai, Some(0.5), None, None);
        assert_eq!(opts.temperature, None);
    }

    #[test]
    fn max_tokens_capped_at_model_limit() {
        let mut model = ModelMetadata::new("gpt-4o");
        model.limits.max_output_tokens = Some(4096);
        let opts = generate(&model, SdkType::Openai, None, Some(16_000), None);
        assert_eq!(opts.max_tokens, Some(4096));
    }

    #[test]
    fn max_tokens_untouched_without_a_model_limit() {
        let model = ModelMetadata::new("gpt-4o");
        let opts = generate(&model, SdkType::Openai, None, Some(16_000), None);
        assert_eq!(opts.max_tokens, Some(16_000));
    }
}
