//! Orchestrator construction, extracted from `main.rs` so that future CLI
//! subcommands (e.g. a config doctor) can boot the same runtime without an
//! HTTP listener.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use ax_domain::config::{Config, ConfigSeverity};
use ax_mcp::McpManager;
use ax_providers::registry::ProviderRegistry;
use ax_sessions::SessionStore;
use ax_tools::ControlPlane;

use crate::orchestrator::Orchestrator;

/// Validate `config`, log every issue, and fail hard on the first error
/// (warnings are logged and otherwise ignored).
pub fn validate_config(config: &Config) -> anyhow::Result<()> {
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    let error_count = issues.iter().filter(|i| i.severity == ConfigSeverity::Error).count();
    if error_count > 0 {
        anyhow::bail!("config validation failed with {error_count} error(s)");
    }
    Ok(())
}

/// Build the fully-wired [`Orchestrator`]: provider registry, session
/// store, tool control plane (with built-ins registered), and MCP manager.
pub async fn build_orchestrator(config: Arc<Config>) -> anyhow::Result<Arc<Orchestrator>> {
    let llm = Arc::new(ProviderRegistry::from_config(&config.llm).context("initializing LLM providers")?);
    if llm.is_empty() {
        tracing::warn!("no LLM providers initialized — chat requests will fail until one is configured");
    } else {
        tracing::info!(providers = llm.provider_order().len(), "LLM provider registry ready");
    }

    let sessions = Arc::new(SessionStore::new());

    let tools = Arc::new(ControlPlane::default());
    tools.register(ax_tools::builtin::echo_tool());
    tracing::info!(tool_count = tools.definitions().len(), "tool control plane ready");

    let mcp = McpManager::from_config(&config.mcp, None).await;
    tracing::info!(server_count = mcp.server_count(), tool_count = mcp.tool_count(), "MCP manager ready");
    let mcp = Arc::new(tokio::sync::RwLock::new(mcp));

    // Per-model interleaved-reasoning capability lookup (§4.3). No config
    // surface currently supplies per-model metadata, so this starts empty;
    // a provider that needs lifting must be added here once one exists.
    let model_capabilities: HashMap<String, ax_domain::model::ModelCapabilities> = HashMap::new();

    Ok(Orchestrator::new(config, llm, sessions, tools, mcp, model_capabilities))
}
