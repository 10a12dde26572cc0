use serde::{Deserialize, Serialize};

/// Which SDK family a provider speaks (§3 "Provider + Model metadata", §9
/// "Provider SDK polymorphism").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SdkType {
    #[default]
    Openai,
    Anthropic,
    Google,
    OpenaiCompatible,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct InterleavedReasoning {
    /// The `provider_options.openai_compatible.<field>` name to lift
    /// reasoning content into, when this model requires it (§4.3).
    pub field: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelCapabilities {
    #[serde(default = "d_true")]
    pub temperature: bool,
    #[serde(default)]
    pub reasoning: bool,
    #[serde(default)]
    pub toolcall: bool,
    #[serde(default)]
    pub attachment: bool,
    #[serde(default)]
    pub input_modalities: Vec<String>,
    #[serde(default)]
    pub output_modalities: Vec<String>,
    #[serde(default)]
    pub interleaved_reasoning: InterleavedReasoning,
}

impl Default for ModelCapabilities {
    fn default() -> Self {
        Self {
            temperature: true,
            reasoning: false,
            toolcall: false,
            attachment: false,
            input_modalities: vec!["text".into()],
            output_modalities: vec!["text".into()],
            interleaved_reasoning: InterleavedReasoning::default(),
        }
    }
}

fn d_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct ModelLimits {
    pub context_window: Option<u32>,
    pub max_output_tokens: Option<u32>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ModelCost {
    pub input_per_1m: f64,
    pub output_per_1m: f64,
}

impl ModelCost {
    pub fn estimate(&self, input_tokens: u32, output_tokens: u32) -> f64 {
        (input_tokens as f64 * self.input_per_1m + output_tokens as f64 * self.output_per_1m) / 1_000_000.0
    }
}

/// A model carried by a provider (§3 DATA MODEL).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub id: String,
    #[serde(default)]
    pub capabilities: ModelCapabilities,
    #[serde(default)]
    pub limits: ModelLimits,
    #[serde(default)]
    pub cost: Option<ModelCost>,
}

impl ModelMetadata {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            capabilities: ModelCapabilities::default(),
            limits: ModelLimits::default(),
            cost: None,
        }
    }

    /// Model-name substring heuristics used by the provider-options
    /// generator to decide whether temperature must be pinned (§4.5).
    pub fn requires_fixed_temperature(&self) -> bool {
        let id = self.id.to_lowercase();
        id.contains("glm") || id.contains("kimi-k2.5") || id.contains("kimi-k2-5")
    }
}

/// A registered LLM provider's metadata (§3 DATA MODEL).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderMetadata {
    pub id: String,
    pub name: String,
    pub base_url: String,
    pub sdk_type: SdkType,
    #[serde(default)]
    pub models: Vec<ModelMetadata>,
    #[serde(default)]
    pub default_model: Option<String>,
    /// A separate configured-models table for this provider (§4.5 "Model
    /// selection" criterion c) — an operator-curated allow-list distinct
    /// from `models`, the provider's own advertised catalog.
    #[serde(default)]
    pub configured_models: Vec<String>,
}

impl ProviderMetadata {
    /// A model is valid for this provider if it is in the explicit list (a),
    /// equals the provider's default model (b), or appears in the separate
    /// configured-models table (c) (§4.5 "Model selection").
    pub fn is_valid_model(&self, model_id: &str) -> bool {
        self.models.iter().any(|m| m.id == model_id)
            || self.default_model.as_deref() == Some(model_id)
            || self.configured_models.iter().any(|m| m == model_id)
    }

    pub fn model(&self, model_id: &str) -> Option<&ModelMetadata> {
        self.models.iter().find(|m| m.id == model_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_capabilities_allow_temperature_text_only() {
        let caps = ModelCapabilities::default();
        assert!(caps.temperature);
        assert!(!caps.toolcall);
        assert_eq!(caps.input_modalities, vec!["text".to_string()]);
    }

    #[test]
    fn glm_and_kimi_k2_5_require_fixed_temperature() {
        assert!(ModelMetadata::new("glm-4-plus").requires_fixed_temperature());
        assert!(ModelMetadata::new("kimi-k2.5-instruct").requires_fixed_temperature());
        assert!(!ModelMetadata::new("gpt-4o").requires_fixed_temperature());
    }

    #[test]
    fn is_valid_model_checks_explicit_list_or_default() {
        let provider = ProviderMetadata {
            id: "openai".into(),
            name: "OpenAI".into(),
            base_url: "https://api.openai.com/v1".into(),
            sdk_type: SdkType::Openai,
            models: vec![ModelMetadata::new("gpt-4o")],
            default_model: Some("gpt-4o-mini".into()),
            configured_models: vec!["gpt-4o-preview".into()],
        };
        assert!(provider.is_valid_model("gpt-4o"));
        assert!(provider.is_valid_model("gpt-4o-mini"));
        assert!(provider.is_valid_model("gpt-4o-preview"));
        assert!(!provider.is_valid_model("claude-3"));
    }

    #[test]
    fn model_cost_estimate() {
        let cost = ModelCost { input_per_1m: 2.5, output_per_1m: 10.0 };
        assert!((cost.estimate(1000, 500) - 0.0075).abs() < 1e-10);
    }
}
