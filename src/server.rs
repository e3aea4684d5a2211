use crate::{
    client::ClientSet,
    config::{Backend, Config},
    conversation::{ConversationStore, ConversationTurn, DEFAULT_CONVERSATION},
    dispatcher::{AgentReply, Dispatcher},
    errors::{AppError, AppResult},
    health::{HealthMonitor, SystemHealthSnapshot},
    mcp::{
        protocol::{Outcome, ProtocolCodec},
        registry::ToolRegistry,
        types::{CapabilityServerConfig, ServerInfo, ToolDescriptor},
    },
    readiness::Readiness,
    tools::{documents::DocumentStore, source_control::SourceTree, HostedServer},
};
use anyhow::Context;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{
    collections::BTreeMap,
    sync::Arc,
    time::{Duration, Instant},
};
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub health: Arc<HealthMonitor>,
    pub hosted: Arc<BTreeMap<String, HostedServer>>,
    pub port: u16,
    pub base_path: String,
    pub max_request_kb: usize,
}

impl AppState {
    /// Wires hosted backends, registry, clients and dispatcher from config.
    /// A malformed registry fails here, before anything is served.
    pub fn build(cfg: &Config, readiness: Readiness) -> anyhow::Result<Self> {
        let mut hosted = BTreeMap::new();
        let mut servers = Vec::new();
        for entry in &cfg.servers {
            let tools: Vec<ToolDescriptor> = match entry.backend {
                Backend::Remote => entry.tools.clone(),
                Backend::Documents => {
                    let server = DocumentStore::load(entry.seed.as_deref())
                        .with_context(|| format!("loading documents for {}", entry.name))?
                        .into_server(&entry.name);
                    let tools = server.descriptors();
                    hosted.insert(entry.name.clone(), server);
                    tools
                }
                Backend::SourceControl => {
                    let root = entry.root_dir.as_deref().context("source_control backend needs root_dir")?;
                    let server = SourceTree::new(root)
                        .with_context(|| format!("opening repositories for {}", entry.name))?
                        .into_server(&entry.name);
                    let tools = server.descriptors();
                    hosted.insert(entry.name.clone(), server);
                    tools
                }
            };
            servers.push(
                CapabilityServerConfig::new(&entry.name, &cfg.endpoint_for(entry), entry.enabled, tools)
                    .with_keywords(entry.keywords.clone()),
            );
        }

        let registry = Arc::new(ToolRegistry::new(servers)?);
        let clients = ClientSet::from_registry(&registry, Arc::new(ProtocolCodec::new()))?;
        let conversations = Arc::new(ConversationStore::new(
            Duration::from_secs(cfg.conversation.idle_timeout_s),
            cfg.conversation.system_prompt.clone(),
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            registry.clone(),
            clients.clone(),
            conversations,
            readiness,
            cfg.dispatch.settings(),
        ));
        let health = Arc::new(HealthMonitor::new(
            registry,
            clients,
            Duration::from_millis(cfg.health.ping_timeout_ms),
        ));
        Ok(Self {
            dispatcher,
            health,
            hosted: Arc::new(hosted),
            port: cfg.server.port,
            base_path: cfg.server.base_path.trim_end_matches('/').to_string(),
            max_request_kb: cfg.limits.max_request_kb,
        })
    }
}

pub fn build_router(shared: AppState) -> Router {
    let base = shared.base_path.clone();
    let limit_bytes = shared.max_request_kb * 1024;
    Router::new()
        .route("/healthz", get(liveness))
        .route("/health", get(health))
        .route("/agent", post(agent_message).get(agent_overview))
        .route("/agent/servers/:name", patch(toggle_server))
        .route(&format!("{base}/:server"), post(capability_call).get(capability_info))
        .layer(RequestBodyLimitLayer::new(limit_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(shared)
}

async fn liveness(State(state): State<AppState>) -> impl IntoResponse {
    let body = json!({
        "status": "ok",
        "ready": state.dispatcher.is_ready(),
        "conversations": state.dispatcher.conversations().len().await,
    });
    (StatusCode::OK, Json(body))
}

async fn health(State(state): State<AppState>) -> Response {
    let monitor = state.health.clone();
    match tokio::spawn(async move { monitor.check_all().await }).await {
        Ok(snapshot) => (
            StatusCode::OK,
            Json(json!({ "status": "healthy", "timestamp": snapshot.timestamp, "mcp": snapshot })),
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "health check aborted");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "status": "unhealthy",
                    "timestamp": chrono::Utc::now(),
                    "error": "health check failed",
                })),
            )
                .into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AgentRequest {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    conversation_id: Option<String>,
}

async fn agent_message(State(state): State<AppState>, body: Bytes) -> AppResult<Json<AgentReply>> {
    let req: AgentRequest =
        serde_json::from_slice(&body).map_err(|e| AppError::BadRequest(format!("invalid JSON body: {e}")))?;
    let message = req
        .message
        .filter(|m| !m.trim().is_empty())
        .ok_or_else(|| AppError::BadRequest("message is required".into()))?;
    let conversation_id = conversation_or_default(req.conversation_id);
    let reply = state.dispatcher.handle(&message, &conversation_id).await?;
    Ok(Json(reply))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryQuery {
    #[serde(default)]
    conversation_id: Option<String>,
}

#[derive(Serialize)]
struct ToolListing {
    server: String,
    #[serde(flatten)]
    tool: ToolDescriptor,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AgentOverview<'a> {
    tools: Vec<ToolListing>,
    servers: Vec<ServerInfo<'a>>,
    status: SystemHealthSnapshot,
    conversation_history: Vec<ConversationTurn>,
}

async fn agent_overview(State(state): State<AppState>, Query(q): Query<HistoryQuery>) -> Response {
    let registry = state.dispatcher.registry();
    let conversation_id = conversation_or_default(q.conversation_id);
    let overview = AgentOverview {
        tools: registry.tools().into_iter().map(|(server, tool)| ToolListing { server, tool }).collect(),
        servers: registry.list_servers().iter().map(ServerInfo::from).collect(),
        status: state.health.check_all().await,
        conversation_history: state.dispatcher.conversations().history(&conversation_id).await,
    };
    (StatusCode::OK, Json(overview)).into_response()
}

#[derive(Debug, Deserialize)]
struct ToggleRequest {
    enabled: bool,
}

async fn toggle_server(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(req): Json<ToggleRequest>,
) -> AppResult<Json<serde_json::Value>> {
    if !state.dispatcher.registry().set_enabled(&name, req.enabled) {
        return Err(AppError::NotFound);
    }
    tracing::info!(server = %name, enabled = req.enabled, "server toggled");
    Ok(Json(json!({ "server": name, "enabled": req.enabled })))
}

async fn capability_call(State(state): State<AppState>, Path(server): Path<String>, body: Bytes) -> Response {
    let started = Instant::now();
    let Some(host) = state.hosted.get(&server) else {
        return AppError::NotFound.into_response();
    };
    let (method, resp) = match ProtocolCodec::decode_request(&body) {
        Ok(req) => {
            let method = req.method.clone();
            (method, host.handle(req).await)
        }
        Err(resp) => (String::new(), resp),
    };
    let code = match &resp.outcome {
        Outcome::Result(_) => 0,
        Outcome::Error(e) => e.code,
    };
    audit(host.name(), &method, code, started.elapsed().as_millis() as u64);
    (StatusCode::OK, Json(resp)).into_response()
}

async fn capability_info(State(state): State<AppState>, Path(server): Path<String>) -> Response {
    let Some(host) = state.hosted.get(&server) else {
        return AppError::NotFound.into_response();
    };
    let body = json!({
        "status": "running",
        "server": host.name(),
        "port": state.port,
        "tools": host.descriptors(),
    });
    (StatusCode::OK, Json(body)).into_response()
}

fn conversation_or_default(id: Option<String>) -> String {
    id.filter(|c| !c.trim().is_empty()).unwrap_or_else(|| DEFAULT_CONVERSATION.to_string())
}

fn audit(server: &str, method: &str, code: i64, duration_ms: u64) {
    tracing::info!(
        server = server,
        method = method,
        code = code,
        duration_ms = duration_ms,
        "audit"
    );
}
