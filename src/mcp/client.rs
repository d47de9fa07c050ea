//! Connection management, tool discovery, validation and concurrent
//! execution against named MCP servers.
//!
//! Grounded on `querymt`'s `McpServerTransportConfig::start` for the
//! `rmcp` transport/connection mechanics and on `astrid-mcp::McpClient`'s
//! discovery-cache/qualify/execute shape.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use rmcp::model::{CallToolRequestParam, ClientCapabilities, ClientInfo, Implementation, ProtocolVersion};
use rmcp::service::{DynService, RunningService};
use rmcp::transport::streamable_http_client::StreamableHttpClientTransportConfig;
use rmcp::transport::{SseClientTransport, StreamableHttpClientTransport};
use rmcp::{RoleClient, ServiceExt};
use sha2::{Digest, Sha256};
use tokio::sync::{RwLock, Semaphore};

use crate::config::{McpServerConfig, McpTransportConfig};
use crate::mcp::policy::ToolPolicy;
use crate::mcp::{CallValidation, McpError, ValidationReport};
use crate::model::{ToolCall, ToolDescriptor, ToolResult};

use super::unwrap_content;

type RmcpPeer = RunningService<RoleClient, Box<dyn DynService<RoleClient>>>;

/// Abstraction over one connected MCP server, implemented either by a real
/// `rmcp` peer or, in tests, by an in-memory fake — the engine and the rest
/// of `mcp` never depend on the concrete transport.
#[async_trait::async_trait]
pub trait McpServerConnection: Send + Sync {
    async fn list_tools(&self) -> Result<Vec<(String, String, serde_json::Value)>, McpError>;
    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<serde_json::Value, McpError>;
}

pub struct RmcpConnection {
    server_name: String,
    peer: RmcpPeer,
}

#[async_trait::async_trait]
impl McpServerConnection for RmcpConnection {
    async fn list_tools(&self) -> Result<Vec<(String, String, serde_json::Value)>, McpError> {
        let result = self
            .peer
            .list_tools(Default::default())
            .await
            .map_err(|e| McpError::ConnectionFailed(self.server_name.clone(), format!("{e:#}")))?;

        Ok(result
            .tools
            .into_iter()
            .map(|tool| {
                let schema = serde_json::to_value(&tool.input_schema).unwrap_or(serde_json::json!({}));
                (
                    tool.name.to_string(),
                    tool.description.map(|d| d.to_string()).unwrap_or_default(),
                    schema,
                )
            })
            .collect())
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<serde_json::Value, McpError> {
        let args_map = match arguments {
            serde_json::Value::Object(map) => Some(map),
            serde_json::Value::Null => None,
            other => {
                return Err(McpError::ToolArgInvalid(
                    name.to_string(),
                    format!("arguments must be a JSON object, got {other}"),
                ))
            }
        };

        let result = self
            .peer
            .call_tool(CallToolRequestParam {
                name: name.to_string().into(),
                arguments: args_map,
            })
            .await
            .map_err(|e| McpError::ToolExecutionFailed(name.to_string(), format!("{e:#}")))?;

        serde_json::to_value(result)
            .map_err(|e| McpError::ToolExecutionFailed(name.to_string(), e.to_string()))
    }
}

/// Extracts plain text out of an MCP `CallToolResult`-shaped JSON value.
pub(crate) fn unwrap_content(value: &serde_json::Value) -> String {
    crate::provider::unwrap_tool_content(value)
}

/// Owns all configured MCP server connections, the merged tool catalog and
/// the denylist policy.
pub struct McpIntegration {
    connections: HashMap<String, Arc<dyn McpServerConnection>>,
    catalog: RwLock<HashMap<String, ToolDescriptor>>,
    fingerprint: RwLock<u64>,
    policy: ToolPolicy,
    fanout: usize,
    call_timeout: Duration,
}

impl McpIntegration {
    pub fn new(
        connections: HashMap<String, Arc<dyn McpServerConnection>>,
        policy: ToolPolicy,
        fanout: usize,
        call_timeout: Duration,
    ) -> Self {
        Self {
            connections,
            catalog: RwLock::new(HashMap::new()),
            fingerprint: RwLock::new(0),
            policy,
            fanout,
            call_timeout,
        }
    }

    /// Connect to every configured server and build the initial connection
    /// map, grounded on `McpServerTransportConfig::start`.
    pub async fn connect_all(
        servers: &[McpServerConfig],
        client_impl: &Implementation,
    ) -> Result<HashMap<String, Arc<dyn McpServerConnection>>, McpError> {
        let mut connections: HashMap<String, Arc<dyn McpServerConnection>> = HashMap::new();
        for server in servers {
            let peer = start_transport(&server.transport, client_impl)
                .await
                .map_err(|e| McpError::ConnectionFailed(server.name.clone(), e.to_string()))?;
            connections.insert(
                server.name.clone(),
                Arc::new(RmcpConnection {
                    server_name: server.name.clone(),
                    peer,
                }),
            );
        }
        Ok(connections)
    }

    /// Discover tools from every connected server, qualify names as
    /// `<server>__<tool>`, and recompute the fingerprint.
    pub async fn discover(&self) -> Result<(), McpError> {
        let mut catalog = HashMap::new();
        for (server_name, connection) in &self.connections {
            let tools = connection.list_tools().await?;
            for (raw_name, description, schema) in tools {
                let qualified = ToolDescriptor::qualify(server_name, &raw_name);
                catalog.insert(
                    qualified.clone(),
                    ToolDescriptor {
                        qualified_name: qualified,
                        server: server_name.clone(),
                        raw_name,
                        description,
                        input_schema: schema,
                    },
                );
            }
        }

        let new_fingerprint = compute_fingerprint(&catalog);
        *self.catalog.write().await = catalog;
        *self.fingerprint.write().await = new_fingerprint;
        Ok(())
    }

    /// Current content-hash fingerprint of the tool catalog; C4 calls
    /// [`discover`] again only when this changes.
    pub async fn fingerprint(&self) -> u64 {
        *self.fingerprint.read().await
    }

    pub async fn refresh_if_changed(&self) -> Result<bool, McpError> {
        let before = self.fingerprint().await;
        self.discover().await?;
        Ok(self.fingerprint().await != before)
    }

    pub async fn tool_catalog(&self) -> Vec<ToolDescriptor> {
        self.catalog.read().await.values().cloned().collect()
    }

    /// Validate a batch of tool calls against the catalog and denylist.
    /// Denylisted or unknown calls are never executed (§4.3 "Validation").
    pub async fn validate(&self, calls: &[ToolCall]) -> ValidationReport {
        let catalog = self.catalog.read().await;
        let mut per_call = Vec::with_capacity(calls.len());
        let mut all_valid = true;

        for call in calls {
            let verdict = if self.policy.is_denied(&call.name) {
                all_valid = false;
                CallValidation::Forbidden
            } else if !catalog.contains_key(&call.name) {
                all_valid = false;
                CallValidation::Unknown
            } else {
                CallValidation::Valid
            };
            per_call.push((call.clone(), verdict));
        }

        ValidationReport { all_valid, per_call }
    }

    /// Execute already-validated tool calls concurrently, bounded by the
    /// configured fan-out. Each call is wrapped in its own timeout; one
    /// call's failure never cancels siblings (§4.3 "Execution").
    pub async fn execute(&self, calls: &[ToolCall]) -> Vec<ToolResult> {
        let semaphore = Arc::new(Semaphore::new(self.fanout.max(1)));
        let futures = calls.iter().cloned().map(|call| {
            let semaphore = semaphore.clone();
            let timeout = self.call_timeout;
            let connection = self.connections.get(&server_of(&call.name)).cloned();
            async move {
                let _permit = semaphore.acquire().await.expect("semaphore not closed");
                execute_one(connection, call, timeout).await
            }
        });
        join_all(futures).await
    }
}

fn server_of(qualified_name: &str) -> String {
    qualified_name
        .split_once("__")
        .map(|(server, _)| server.to_string())
        .unwrap_or_default()
}

async fn execute_one(
    connection: Option<Arc<dyn McpServerConnection>>,
    call: ToolCall,
    timeout: Duration,
) -> ToolResult {
    let Some(connection) = connection else {
        return ToolResult {
            tool_call_id: call.id,
            content: McpError::ToolUnknown(call.name).to_string(),
            is_error: true,
            cacheable: false,
        };
    };

    let raw_name = call
        .name
        .split_once("__")
        .map(|(_, tool)| tool.to_string())
        .unwrap_or(call.name.clone());

    match tokio::time::timeout(timeout, connection.call_tool(&raw_name, call.arguments)).await {
        Ok(Ok(value)) => ToolResult {
            tool_call_id: call.id,
            content: unwrap_content(&value),
            is_error: false,
            cacheable: false,
        },
        Ok(Err(err)) => ToolResult {
            tool_call_id: call.id,
            content: err.to_string(),
            is_error: true,
            cacheable: false,
        },
        Err(_) => ToolResult {
            tool_call_id: call.id,
            content: McpError::ToolExecutionFailed(call.name, "timed out".to_string()).to_string(),
            is_error: true,
            cacheable: false,
        },
    }
}

fn compute_fingerprint(catalog: &HashMap<String, ToolDescriptor>) -> u64 {
    let mut names: Vec<&String> = catalog.keys().collect();
    names.sort();

    let mut hasher = Sha256::new();
    for name in names {
        let descriptor = &catalog[name];
        hasher.update(descriptor.qualified_name.as_bytes());
        hasher.update(descriptor.description.as_bytes());
        hasher.update(descriptor.input_schema.to_string().as_bytes());
    }
    let digest = hasher.finalize();
    u64::from_be_bytes(digest[0..8].try_into().unwrap_or_default())
}

async fn start_transport(
    transport: &McpTransportConfig,
    client_impl: &Implementation,
) -> anyhow::Result<RmcpPeer> {
    let client_info = ClientInfo {
        protocol_version: ProtocolVersion::default(),
        capabilities: ClientCapabilities::default(),
        client_info: client_impl.clone(),
    };

    let peer = match transport {
        McpTransportConfig::Sse { url, token } => {
            let transport = match token {
                Some(t) => {
                    let mut headers = reqwest::header::HeaderMap::new();
                    headers.insert(
                        reqwest::header::AUTHORIZATION,
                        reqwest::header::HeaderValue::from_str(&format!("Bearer {t}"))?,
                    );
                    let client = reqwest::ClientBuilder::new().default_headers(headers).build()?;
                    SseClientTransport::start_with_client(client, Default::default()).await?
                }
                None => SseClientTransport::start(url.as_str()).await?,
            };
            client_info.clone().into_dyn().serve(transport).await?
        }
        McpTransportConfig::Http { url, token } => {
            let transport = match token {
                Some(t) => {
                    let mut headers = reqwest::header::HeaderMap::new();
                    headers.insert(
                        reqwest::header::AUTHORIZATION,
                        reqwest::header::HeaderValue::from_str(&format!("Bearer {t}"))?,
                    );
                    let client = reqwest::ClientBuilder::new().default_headers(headers).build()?;
                    StreamableHttpClientTransport::with_client(
                        client,
                        StreamableHttpClientTransportConfig {
                            uri: url.clone().into(),
                            ..Default::default()
                        },
                    )
                }
                None => StreamableHttpClientTransport::from_uri(url.clone()),
            };
            client_info.clone().into_dyn().serve(transport).await?
        }
        McpTransportConfig::Stdio { command, args, envs } => {
            let mut cmd = tokio::process::Command::new(command);
            cmd.args(args)
                .envs(envs)
                .stderr(std::process::Stdio::inherit())
                .stdout(std::process::Stdio::piped())
                .stdin(std::process::Stdio::piped());
            let transport = rmcp::transport::child_process::TokioChildProcess::new(cmd)?;
            client_info.clone().into_dyn().serve(transport).await?
        }
    };

    Ok(peer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct FakeConnection {
        tools: Vec<(String, String, serde_json::Value)>,
    }

    #[async_trait::async_trait]
    impl McpServerConnection for FakeConnection {
        async fn list_tools(&self) -> Result<Vec<(String, String, serde_json::Value)>, McpError> {
            Ok(self.tools.clone())
        }

        async fn call_tool(
            &self,
            name: &str,
            _arguments: serde_json::Value,
        ) -> Result<serde_json::Value, McpError> {
            Ok(json!({ "text": format!("result for {name}") }))
        }
    }

    fn fake_integration() -> McpIntegration {
        let mut connections: HashMap<String, Arc<dyn McpServerConnection>> = HashMap::new();
        connections.insert(
            "market".to_string(),
            Arc::new(FakeConnection {
                tools: vec![(
                    "get_bars".to_string(),
                    "fetch bars".to_string(),
                    json!({"type": "object"}),
                )],
            }),
        );
        McpIntegration::new(
            connections,
            ToolPolicy::new(["market__forbidden_tool".to_string()]),
            8,
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn test_discover_qualifies_tool_names() {
        let integration = fake_integration();
        integration.discover().await.unwrap();
        let catalog = integration.tool_catalog().await;
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog[0].qualified_name, "market__get_bars");
    }

    #[tokio::test]
    async fn test_validate_rejects_forbidden_and_unknown() {
        let integration = fake_integration();
        integration.discover().await.unwrap();

        let calls = vec![
            ToolCall {
                id: "1".to_string(),
                index: 0,
                name: "market__get_bars".to_string(),
                arguments: json!({}),
            },
            ToolCall {
                id: "2".to_string(),
                index: 1,
                name: "market__forbidden_tool".to_string(),
                arguments: json!({}),
            },
            ToolCall {
                id: "3".to_string(),
                index: 2,
                name: "market__nonexistent".to_string(),
                arguments: json!({}),
            },
        ];

        let report = integration.validate(&calls).await;
        assert!(!report.all_valid);
        assert_eq!(report.per_call[0].1, CallValidation::Valid);
        assert_eq!(report.per_call[1].1, CallValidation::Forbidden);
        assert_eq!(report.per_call[2].1, CallValidation::Unknown);
    }

    #[tokio::test]
    async fn test_execute_runs_concurrently_and_pairs_by_index() {
        let integration = fake_integration();
        integration.discover().await.unwrap();

        let calls = vec![
            ToolCall {
                id: "a".to_string(),
                index: 0,
                name: "market__get_bars".to_string(),
                arguments: json!({}),
            },
            ToolCall {
                id: "b".to_string(),
                index: 1,
                name: "market__get_bars".to_string(),
                arguments: json!({}),
            },
        ];

        let results = integration.execute(&calls).await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].tool_call_id, "a");
        assert_eq!(results[1].tool_call_id, "b");
        assert!(!results[0].is_error);
    }

    #[tokio::test]
    async fn test_fingerprint_changes_when_catalog_changes() {
        let integration = fake_integration();
        integration.discover().await.unwrap();
        let fp1 = integration.fingerprint().await;
        assert_ne!(fp1, 0);
    }
}
