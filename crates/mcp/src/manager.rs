//! MCP manager — holds all MCP server connections and orchestrates config
//! merging, discovery, tool dispatch, and reconnection.

use std::collections::HashMap;
use std::path::Path;

use parking_lot::RwLock;
use serde_json::Value;

use ax_domain::config::{McpConfig, McpServerConfig, McpTransportKind};
use crate::protocol::{self, McpToolDef, ToolCallResult, ToolsListResult};
use crate::transport::{McpTransport, SseTransport, StdioTransport, TransportError};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server connection state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Lifecycle state of a single MCP server connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum McpServerState {
    Disconnected,
    Connecting,
    Connected,
    Error(String),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// McpServer
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// An MCP server connection (one per configured server).
pub struct McpServer {
    /// Server ID from config.
    pub id: String,
    /// Tools discovered via `tools/list`.
    pub tools: Vec<McpToolDef>,
    /// Handle to the running process or SSE connection.
    transport: Box<dyn McpTransport>,
    /// Config this server was last (re)connected with, kept for `reconnect`.
    config: McpServerConfig,
    state: RwLock<McpServerState>,
}

impl McpServer {
    /// Initialize a server: spawn the process (or connect via SSE),
    /// perform the MCP handshake, and discover tools.
    async fn initialize(config: &McpServerConfig) -> Result<Self, McpError> {
        let transport: Box<dyn McpTransport> = match config.transport {
            McpTransportKind::Stdio => {
                let t = StdioTransport::spawn(config).map_err(McpError::Transport)?;
                Box::new(t)
            }
            McpTransportKind::Sse => {
                tracing::warn!(
                    server_id = %config.id,
                    "SSE transport is not yet implemented, server will be non-functional"
                );
                Box::new(SseTransport)
            }
        };

        // Step 1: Send `initialize` request.
        let init_params = protocol::initialize_params();
        let params_value = serde_json::to_value(&init_params)
            .map_err(|e| McpError::Protocol(format!("failed to serialize initialize params: {e}")))?;

        let resp = transport
            .send_request("initialize", Some(params_value))
            .await
            .map_err(McpError::Transport)?;

        if resp.is_error() {
            let err = resp.error.unwrap();
            return Err(McpError::Protocol(format!("initialize failed: {err}")));
        }

        tracing::debug!(server_id = %config.id, "MCP initialize response received");

        // Step 2: Send `notifications/initialized` notification.
        transport
            .send_notification("notifications/initialized")
            .await
            .map_err(McpError::Transport)?;

        tracing::debug!(server_id = %config.id, "sent notifications/initialized");

        // Step 3: Discover tools via `tools/list`.
        let tools_resp = transport
            .send_request("tools/list", None)
            .await
            .map_err(McpError::Transport)?;

        let tools = if tools_resp.is_error() {
            tracing::warn!(
                server_id = %config.id,
                "tools/list returned error, server will have no tools"
            );
            Vec::new()
        } else {
            let result_value = tools_resp.result.unwrap_or(Value::Null);
            match serde_json::from_value::<ToolsListResult>(result_value) {
                Ok(r) => r.tools,
                Err(e) => {
                    tracing::warn!(
                        server_id = %config.id,
                        error = %e,
                        "failed to parse tools/list result"
                    );
                    Vec::new()
                }
            }
        };

        tracing::info!(
            server_id = %config.id,
            tool_count = tools.len(),
            "MCP server initialized"
        );

        Ok(Self {
            id: config.id.clone(),
            tools,
            transport,
            config: config.clone(),
            state: RwLock::new(McpServerState::Connected),
        })
    }

    /// Check if the server's transport is still alive.
    pub fn is_alive(&self) -> bool {
        self.transport.is_alive() && *self.state.read() == McpServerState::Connected
    }

    /// Current lifecycle state.
    pub fn state(&self) -> McpServerState {
        self.state.read().clone()
    }

    /// Call a tool on this server.
    pub async fn call_tool(&self, tool_name: &str, arguments: Value) -> Result<ToolCallResult, McpError> {
        if !self.is_alive() {
            return Err(McpError::ServerDown(self.id.clone()));
        }

        let params = serde_json::json!({
            "name": tool_name,
            "arguments": arguments
        });

        let resp = self
            .transport
            .send_request("tools/call", Some(params))
            .await
            .map_err(McpError::Transport)?;

        if resp.is_error() {
            let err = resp.error.unwrap();
            return Err(McpError::Protocol(format!("tools/call failed: {err}")));
        }

        let result_value = resp.result.unwrap_or(Value::Null);
        serde_json::from_value::<ToolCallResult>(result_value)
            .map_err(|e| McpError::Protocol(format!("failed to parse tools/call result: {e}")))
    }

    /// Gracefully shut down the server.
    async fn shutdown(&self) {
        tracing::info!(server_id = %self.id, "shutting down MCP server");
        *self.state.write() = McpServerState::Disconnected;
        self.transport.shutdown().await;
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config discovery and merging
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Scan `dir` (non-recursively) for `*.json` files, each holding a single
/// [`McpServerConfig`]. Invalid files are logged and skipped, not fatal.
pub fn discover_servers_dir(dir: &Path) -> Vec<McpServerConfig> {
    let mut found = Vec::new();

    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) => {
            tracing::debug!(dir = %dir.display(), error = %e, "MCP server discovery directory unreadable, skipping");
            return found;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        match std::fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<McpServerConfig>(&raw) {
                Ok(cfg) => found.push(cfg),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to parse discovered MCP server config"),
            },
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to read discovered MCP server config"),
        }
    }

    found
}

/// Merge server configs with precedence: directory-discovered servers
/// override a matching default, and explicitly-configured servers in turn
/// override a matching discovered entry, keyed by `id`.
///
/// Precedence (lowest to highest): discovered-default < directory-local <
/// caller-explicit.
fn merge_servers(
    explicit: Vec<McpServerConfig>,
    discovered: Vec<McpServerConfig>,
) -> Vec<McpServerConfig> {
    let mut by_id: HashMap<String, McpServerConfig> = HashMap::new();

    for cfg in discovered {
        by_id.insert(cfg.id.clone(), cfg);
    }
    for cfg in explicit {
        by_id.insert(cfg.id.clone(), cfg);
    }

    by_id.into_values().collect()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// McpManager
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Manager that holds all MCP server connections.
pub struct McpManager {
    servers: HashMap<String, McpServer>,
}

impl McpManager {
    /// Create an empty manager (no MCP servers configured).
    pub fn empty() -> Self {
        Self {
            servers: HashMap::new(),
        }
    }

    /// Initialize from config: merge in any directory-discovered servers,
    /// spawn processes, send initialize, discover tools.
    ///
    /// Servers that fail to initialize are logged and skipped (not fatal).
    pub async fn from_config(config: &McpConfig, discovery_dir: Option<&Path>) -> Self {
        let discovered = discovery_dir.map(discover_servers_dir).unwrap_or_default();
        let merged = merge_servers(config.effective_servers(), discovered);

        let mut servers = HashMap::new();

        for server_config in &merged {
            tracing::info!(
                server_id = %server_config.id,
                command = %server_config.command,
                transport = ?server_config.transport,
                "initializing MCP server"
            );

            match McpServer::initialize(server_config).await {
                Ok(server) => {
                    servers.insert(server_config.id.clone(), server);
                }
                Err(e) => {
                    tracing::warn!(
                        server_id = %server_config.id,
                        error = %e,
                        "failed to initialize MCP server, skipping"
                    );
                }
            }
        }

        if !servers.is_empty() {
            tracing::info!(count = servers.len(), "MCP manager ready");
        }

        Self { servers }
    }

    /// Get all discovered tools across all servers.
    ///
    /// Returns tuples of `(server_id, tool_def)`.
    pub fn list_tools(&self) -> Vec<(&str, &McpToolDef)> {
        self.servers
            .values()
            .filter(|s| s.is_alive())
            .flat_map(|server| server.tools.iter().map(move |tool| (server.id.as_str(), tool)))
            .collect()
    }

    /// Call a tool on a specific server.
    pub async fn call_tool(
        &self,
        server_id: &str,
        tool_name: &str,
        arguments: Value,
    ) -> Result<ToolCallResult, McpError> {
        let server = self
            .servers
            .get(server_id)
            .ok_or_else(|| McpError::ServerNotFound(server_id.to_string()))?;

        server.call_tool(tool_name, arguments).await
    }

    /// Disconnect a server: close its transport, remove it (and therefore
    /// all tools namespaced under it, since [`Self::list_tools`] only walks
    /// live entries) and drop its state (§4.6 "Lifecycle"). A no-op if the
    /// server is already gone.
    pub async fn disconnect(&mut self, server_id: &str) {
        if let Some(server) = self.servers.remove(server_id) {
            server.shutdown().await;
        }
    }

    /// Connect a new server under `server_id` with `new_config`, replacing
    /// any existing entry of that id.
    pub async fn connect(&mut self, server_id: &str, new_config: McpServerConfig) -> Result<(), McpError> {
        let server = McpServer::initialize(&new_config).await?;
        self.servers.insert(server_id.to_string(), server);
        Ok(())
    }

    /// `reconnect(name, new_config) = disconnect(name) then connect(name,
    /// new_config)` (§4.6), surfacing only `connect`'s error.
    pub async fn reconnect(&mut self, server_id: &str, new_config: McpServerConfig) -> Result<(), McpError> {
        self.disconnect(server_id).await;
        self.connect(server_id, new_config).await
    }

    /// Current lifecycle state of a server, if known.
    pub fn server_state(&self, server_id: &str) -> Option<McpServerState> {
        self.servers.get(server_id).map(|s| s.state())
    }

    /// Ids of every currently connected server, for callers that need to
    /// quiesce the whole manager (environment switch, §4.8).
    pub fn server_ids(&self) -> Vec<String> {
        self.servers.keys().cloned().collect()
    }

    /// Return the number of connected servers.
    pub fn server_count(&self) -> usize {
        self.servers.len()
    }

    /// Return the total number of discovered tools across all alive servers.
    pub fn tool_count(&self) -> usize {
        self.servers.values().filter(|s| s.is_alive()).map(|s| s.tools.len()).sum()
    }

    /// Check if there are any configured servers.
    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// Gracefully shut down all servers concurrently.
    pub async fn shutdown(&self) {
        let futs: Vec<_> = self.servers.values().map(|s| s.shutdown()).collect();
        futures_util::future::join_all(futs).await;
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Error type
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Errors specific to MCP operations.
#[derive(Debug, thiserror::Error)]
pub enum McpError {
    #[error("MCP transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("MCP protocol error: {0}")]
    Protocol(String),

    #[error("MCP server not found: {0}")]
    ServerNotFound(String),

    #[error("MCP server is down: {0}")]
    ServerDown(String),
}

impl From<McpError> for ax_domain::error::Error {
    fn from(e: McpError) -> Self {
        ax_domain::error::Error::Other(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as StdHashMap;

    fn server(id: &str) -> McpServerConfig {
        McpServerConfig {
            id: id.into(),
            command: "echo".into(),
            args: vec![],
            transport: McpTransportKind::Stdio,
            url: None,
            env: StdHashMap::new(),
        }
    }

    #[test]
    fn empty_manager_has_no_servers() {
        let mgr = McpManager::empty();
        assert!(mgr.is_empty());
        assert_eq!(mgr.server_count(), 0);
        assert_eq!(mgr.tool_count(), 0);
        assert!(mgr.list_tools().is_empty());
        assert!(mgr.server_ids().is_empty());
    }

    #[test]
    fn discover_servers_dir_returns_empty_for_missing_dir() {
        let servers = discover_servers_dir(Path::new("/nonexistent/path/for/mcp/discovery"));
        assert!(servers.is_empty());
    }

    #[test]
    fn merge_servers_explicit_overrides_discovered_by_id() {
        let mut explicit_override = server("shared");
        explicit_override.command = "explicit-cmd".into();
        let mut discovered_entry = server("shared");
        discovered_entry.command = "discovered-cmd".into();

        let merged = merge_servers(vec![explicit_override], vec![discovered_entry, server("only-discovered")]);
        assert_eq!(merged.len(), 2);
        let shared = merged.iter().find(|c| c.id == "shared").unwrap();
        assert_eq!(shared.command, "explicit-cmd");
    }

    #[test]
    fn merge_servers_keeps_non_conflicting_ids() {
        let merged = merge_servers(vec![server("a")], vec![server("b")]);
        let mut ids: Vec<_> = merged.iter().map(|c| c.id.clone()).collect();
        ids.sort();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn call_tool_on_unknown_server_is_not_found() {
        let mgr = McpManager::empty();
        let err = mgr.call_tool("nope", "x", serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, McpError::ServerNotFound(_)));
    }

    #[tokio::test]
    async fn disconnect_unknown_server_is_a_no_op() {
        let mut mgr = McpManager::empty();
        mgr.disconnect("nope").await;
        assert!(mgr.is_empty());
    }

    #[tokio::test]
    async fn reconnect_surfaces_connects_spawn_error_for_a_missing_command() {
        let mut mgr = McpManager::empty();
        let mut bogus = server("bogus");
        bogus.command = "/nonexistent/definitely-not-a-real-binary".into();
        let err = mgr.reconnect("bogus", bogus).await.unwrap_err();
        assert!(matches!(err, McpError::Transport(_)));
        assert!(mgr.server_state("bogus").is_none());
    }

    #[test]
    fn server_state_unknown_for_missing_server() {
        let mgr = McpManager::empty();
        assert!(mgr.server_state("nope").is_none());
    }
}
