//! Clients for capability servers.
//!
//! A client is stateless across invocations and safe to share: each call
//! encodes a fresh envelope, posts it, and decodes the reply under its own
//! timeout.

use crate::{
    errors::ClientError,
    mcp::{
        protocol::{methods, Outcome, ProtocolCodec, RequestEnvelope},
        registry::ToolRegistry,
    },
};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::{collections::HashMap, sync::Arc, time::Duration};
use tracing::debug;

#[async_trait]
pub trait CapabilityClient: Send + Sync {
    fn server_name(&self) -> &str;

    async fn invoke(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, ClientError>;

    async fn call_tool(
        &self,
        tool: &str,
        arguments: Value,
        timeout: Duration,
    ) -> Result<Value, ClientError> {
        let params = json!({ "name": tool, "arguments": arguments });
        self.invoke(methods::CALL_TOOL, Some(params), timeout).await
    }

    async fn ping(&self, timeout: Duration) -> Result<Value, ClientError> {
        self.invoke(methods::PING, None, timeout).await
    }
}

pub type DynClient = Arc<dyn CapabilityClient + 'static>;

pub struct HttpCapabilityClient {
    name: String,
    endpoint: String,
    http: reqwest::Client,
    codec: Arc<ProtocolCodec>,
}

impl HttpCapabilityClient {
    pub fn new(name: &str, endpoint: &str, codec: Arc<ProtocolCodec>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().build()?;
        Ok(Self { name: name.to_string(), endpoint: endpoint.to_string(), http, codec })
    }

    async fn round_trip(&self, req: &RequestEnvelope) -> Result<Value, ClientError> {
        let resp = self
            .http
            .post(&self.endpoint)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(req.to_bytes())
            .send()
            .await
            .map_err(|e| ClientError::Unreachable { reason: e.to_string() })?;
        let status = resp.status();
        let body = resp
            .bytes()
            .await
            .map_err(|e| ClientError::Unreachable { reason: e.to_string() })?;

        let envelope = match ProtocolCodec::decode_response(&body) {
            Ok(envelope) => envelope,
            Err(_) if !status.is_success() => {
                return Err(ClientError::Unreachable { reason: format!("HTTP {status}") })
            }
            Err(e) => return Err(e.into()),
        };

        match (envelope.id, envelope.outcome) {
            (Some(id), Outcome::Result(result)) if id == req.id => Ok(result),
            (Some(id), Outcome::Error(e)) if id == req.id => Err(ClientError::RemoteError {
                code: e.code,
                message: e.message,
                data: e.data,
            }),
            // the server could not read our id back; still a remote verdict
            (None, Outcome::Error(e)) => Err(ClientError::RemoteError {
                code: e.code,
                message: e.message,
                data: e.data,
            }),
            (id, _) => Err(ClientError::MalformedEnvelope {
                reason: format!(
                    "response id {} does not match request {}",
                    id.map(|i| i.to_string()).unwrap_or_else(|| "null".into()),
                    req.id
                ),
            }),
        }
    }
}

#[async_trait]
impl CapabilityClient for HttpCapabilityClient {
    fn server_name(&self) -> &str {
        &self.name
    }

    async fn invoke(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, ClientError> {
        let req = self.codec.encode_request(method, params);
        debug!(server = %self.name, method = method, id = %req.id, "invoke");
        match tokio::time::timeout(timeout, self.round_trip(&req)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(ClientError::Timeout { timeout_ms: timeout.as_millis() as u64 }),
        }
    }
}

/// One client per capability server, built once at startup.
#[derive(Clone, Default)]
pub struct ClientSet {
    clients: HashMap<String, DynClient>,
}

impl ClientSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_registry(registry: &ToolRegistry, codec: Arc<ProtocolCodec>) -> anyhow::Result<Self> {
        let mut set = Self::new();
        for server in registry.list_servers() {
            let client = HttpCapabilityClient::new(&server.name, &server.endpoint, codec.clone())?;
            set.insert(Arc::new(client));
        }
        Ok(set)
    }

    pub fn insert(&mut self, client: DynClient) {
        self.clients.insert(client.server_name().to_string(), client);
    }

    pub fn get(&self, name: &str) -> Option<DynClient> {
        self.clients.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::protocol::{ResponseEnvelope, RpcError};
    use axum::{body::Bytes, routing::post, Router};

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/rpc")
    }

    fn client(endpoint: &str) -> HttpCapabilityClient {
        HttpCapabilityClient::new("t", endpoint, Arc::new(ProtocolCodec::new())).unwrap()
    }

    async fn echo_params(body: Bytes) -> Vec<u8> {
        let req = ProtocolCodec::decode_request(&body).unwrap();
        serde_json::to_vec(&ResponseEnvelope::success(req.id, req.params.unwrap_or_default())).unwrap()
    }

    #[tokio::test]
    async fn call_tool_round_trips_result() {
        let url = serve(Router::new().route("/rpc", post(echo_params))).await;
        let out = client(&url)
            .call_tool("search", json!({"query": "q3"}), Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(out, json!({"name": "search", "arguments": {"query": "q3"}}));
    }

    #[tokio::test]
    async fn error_envelope_becomes_remote_error() {
        async fn fail(body: Bytes) -> Vec<u8> {
            let req = ProtocolCodec::decode_request(&body).unwrap();
            serde_json::to_vec(&ResponseEnvelope::failure(Some(req.id), RpcError::new(-32601, "no such method")))
                .unwrap()
        }
        let url = serve(Router::new().route("/rpc", post(fail))).await;
        let err = client(&url).ping(Duration::from_secs(2)).await.unwrap_err();
        assert_eq!(err, ClientError::RemoteError { code: -32601, message: "no such method".into(), data: None });
    }

    #[tokio::test]
    async fn mismatched_id_is_discarded() {
        async fn wrong_id(_body: Bytes) -> &'static str {
            r#"{"jsonrpc":"2.0","id":"someone-else","result":{}}"#
        }
        let url = serve(Router::new().route("/rpc", post(wrong_id))).await;
        let err = client(&url).ping(Duration::from_secs(2)).await.unwrap_err();
        assert_eq!(err.code(), "MalformedEnvelope");
    }

    #[tokio::test]
    async fn garbage_body_is_malformed() {
        async fn garbage(_body: Bytes) -> &'static str {
            "<html>oops</html>"
        }
        let url = serve(Router::new().route("/rpc", post(garbage))).await;
        let err = client(&url).ping(Duration::from_secs(2)).await.unwrap_err();
        assert_eq!(err.code(), "MalformedEnvelope");
    }

    #[tokio::test]
    async fn slow_server_times_out() {
        async fn slow(body: Bytes) -> Vec<u8> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            echo_params(body).await
        }
        let url = serve(Router::new().route("/rpc", post(slow))).await;
        let err = client(&url).ping(Duration::from_millis(100)).await.unwrap_err();
        assert_eq!(err, ClientError::Timeout { timeout_ms: 100 });
    }

    #[tokio::test]
    async fn closed_port_is_unreachable() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let err = client(&format!("http://{addr}/rpc")).ping(Duration::from_secs(2)).await.unwrap_err();
        assert_eq!(err.code(), "Unreachable");
    }
}
