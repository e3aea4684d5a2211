use crate::{
    config::{Backend, Config, Conversation, Dispatch, Health, Limits, Logging, Server, ServerEntry},
    dispatcher::FALLBACK_REPLY,
    mcp::types::{ParamType, ParameterSpec, ToolDescriptor},
    readiness::Readiness,
    server::{build_router, AppState},
};
use serde_json::{json, Value};
use std::path::Path;

fn test_config(servers: Vec<ServerEntry>) -> Config {
    Config {
        server: Server { bind_addr: "127.0.0.1".into(), port: 0, base_path: "/mcp".into() },
        logging: Logging::default(),
        limits: Limits { max_request_kb: 64 },
        dispatch: Dispatch { call_timeout_ms: 2_000, ..Dispatch::default() },
        health: Health { ping_timeout_ms: 500 },
        conversation: Conversation::default(),
        servers,
    }
}

fn documents(name: &str, seed: Option<&Path>) -> ServerEntry {
    ServerEntry {
        name: name.into(),
        backend: Backend::Documents,
        enabled: true,
        endpoint: None,
        keywords: vec![],
        seed: seed.map(Path::to_path_buf),
        root_dir: None,
        tools: vec![],
    }
}

fn remote(name: &str, endpoint: &str) -> ServerEntry {
    ServerEntry {
        name: name.into(),
        backend: Backend::Remote,
        enabled: true,
        endpoint: Some(endpoint.into()),
        keywords: vec![],
        seed: None,
        root_dir: None,
        tools: vec![ToolDescriptor::new("search", "Search stored documents")
            .param(ParameterSpec::required("query", ParamType::String, "terms"))
            .keywords(&["invoice"])],
    }
}

/// An address nothing listens on.
fn closed_endpoint() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}/mcp/gone")
}

fn seed_file(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("seed.json");
    std::fs::write(
        &path,
        json!({
            "invoices": [
                {"_id": "inv-q3", "title": "Q3 invoice", "customer": "Acme"},
                {"_id": "inv-q2", "title": "Q2 invoice", "customer": "Globex"}
            ]
        })
        .to_string(),
    )
    .unwrap();
    path
}

/// Serves the full app on an ephemeral port, so hosted servers are reached
/// over real HTTP exactly as remote ones would be.
async fn spawn_app(mut cfg: Config) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    cfg.server.port = listener.local_addr().unwrap().port();
    let (ready, readiness) = Readiness::new();
    let state = AppState::build(&cfg, readiness).unwrap();
    let app = build_router(state);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    ready.mark_ready();
    format!("http://127.0.0.1:{}", cfg.server.port)
}

async fn post_agent(base: &str, body: Value) -> (reqwest::StatusCode, Value) {
    let resp = reqwest::Client::new().post(format!("{base}/agent")).json(&body).send().await.unwrap();
    let status = resp.status();
    (status, resp.json().await.unwrap())
}

mod scenarios {
    use super::*;

    #[tokio::test]
    async fn invoice_search_uses_the_document_server() {
        let dir = tempfile::tempdir().unwrap();
        let seed = seed_file(dir.path());
        let base = spawn_app(test_config(vec![documents("docs", Some(&seed))])).await;

        let (status, body) = post_agent(&base, json!({"message": "search for invoice Q3"})).await;
        assert_eq!(status, 200);
        assert_eq!(body["metadata"]["serversUsed"], json!(["docs"]));
        let calls = body["toolCalls"].as_array().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0]["serverName"], "docs");
        assert_eq!(calls[0]["toolName"], "search");
        assert_eq!(calls[0]["outcome"]["status"], "success");
        assert_eq!(calls[0]["outcome"]["payload"]["hits"][0]["document"]["_id"], "inv-q3");
        assert!(body["message"].as_str().unwrap().contains("inv-q3"));
        assert!(body["metadata"]["executionTimeMs"].is_u64());
    }

    #[tokio::test]
    async fn unreachable_server_degrades_to_fallback() {
        let base = spawn_app(test_config(vec![remote("docs", &closed_endpoint())])).await;

        let (status, body) = post_agent(&base, json!({"message": "search for invoice Q3"})).await;
        assert_eq!(status, 200);
        assert_eq!(body["message"], FALLBACK_REPLY);
        assert_eq!(body["metadata"]["serversUsed"], json!([]));
        let calls = body["toolCalls"].as_array().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0]["outcome"]["status"], "failure");
        assert_eq!(calls[0]["outcome"]["error"]["kind"], "unreachable");
    }

    #[tokio::test]
    async fn health_reports_each_server_independently() {
        let base = spawn_app(test_config(vec![
            documents("docs", None),
            remote("archive", &closed_endpoint()),
        ]))
        .await;

        let resp = reqwest::get(format!("{base}/health")).await.unwrap();
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "healthy");
        assert!(body["timestamp"].is_string());
        let per_server = body["mcp"]["perServer"].as_object().unwrap();
        assert_eq!(per_server.len(), 2);
        assert_eq!(per_server["docs"]["reachable"], true);
        assert_eq!(per_server["archive"]["reachable"], false);
        assert_eq!(body["mcp"]["healthyServers"], 1);
    }

    #[tokio::test]
    async fn history_replays_in_order_for_each_conversation() {
        let base = spawn_app(test_config(vec![documents("docs", None)])).await;
        for n in 0..3 {
            let (status, _) =
                post_agent(&base, json!({"message": format!("search invoice {n}"), "conversationId": "c-1"})).await;
            assert_eq!(status, 200);
        }
        post_agent(&base, json!({"message": "hello", "conversationId": "c-2"})).await;

        let body: Value = reqwest::get(format!("{base}/agent?conversationId=c-1")).await.unwrap().json().await.unwrap();
        let turns = body["conversationHistory"].as_array().unwrap();
        assert_eq!(turns.len(), 6);
        for (n, pair) in turns.chunks(2).enumerate() {
            assert_eq!(pair[0]["role"], "user");
            assert_eq!(pair[0]["content"], format!("search invoice {n}"));
            assert_eq!(pair[1]["role"], "assistant");
            assert_eq!(pair[1]["metadata"]["serversUsed"], json!(["docs"]));
        }
        assert!(body["tools"].as_array().unwrap().iter().any(|t| t["name"] == "search" && t["server"] == "docs"));
        assert_eq!(body["status"]["perServer"]["docs"]["reachable"], true);

        let other: Value = reqwest::get(format!("{base}/agent?conversationId=c-2")).await.unwrap().json().await.unwrap();
        assert_eq!(other["conversationHistory"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn disabled_server_is_not_consulted() {
        let dir = tempfile::tempdir().unwrap();
        let seed = seed_file(dir.path());
        let base = spawn_app(test_config(vec![documents("docs", Some(&seed))])).await;

        let resp = reqwest::Client::new()
            .patch(format!("{base}/agent/servers/docs"))
            .json(&json!({"enabled": false}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);

        let (_, body) = post_agent(&base, json!({"message": "search for invoice Q3"})).await;
        assert_eq!(body["toolCalls"], json!([]));

        let health: Value = reqwest::get(format!("{base}/health")).await.unwrap().json().await.unwrap();
        assert_eq!(health["mcp"]["totalServers"], 0);
    }
}

mod routes {
    use super::*;
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
        Router,
    };
    use tower::ServiceExt;

    fn app(servers: Vec<ServerEntry>) -> Router {
        let state = AppState::build(&test_config(servers), Readiness::ready()).unwrap();
        build_router(state)
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    fn post(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .method("POST")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).method("GET").body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn agent_rejects_missing_or_empty_message() {
        let app = app(vec![documents("docs", None)]);
        for body in [r#"{}"#, r#"{"message": "   "}"#, r#"not json"#, r#"{"message": 5}"#] {
            let (status, err) = send(&app, post("/agent", body)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "body {body}");
            assert_eq!(err["code"], "BadRequest");
        }
    }

    #[tokio::test]
    async fn no_match_message_is_answered_without_tools() {
        let app = app(vec![documents("docs", None)]);
        let (status, body) = send(&app, post("/agent", r#"{"message": "good morning"}"#)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["toolCalls"], json!([]));
        assert_eq!(body["metadata"]["serversUsed"], json!([]));
    }

    #[tokio::test]
    async fn unready_dispatcher_is_a_generic_500() {
        let (handle, readiness) = Readiness::new();
        drop(handle);
        let state = AppState::build(&test_config(vec![documents("docs", None)]), readiness).unwrap();
        let app = build_router(state);
        let (status, body) = send(&app, post("/agent", r#"{"message": "search"}"#)).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["message"], "internal error");
    }

    #[tokio::test]
    async fn capability_server_describes_itself() {
        let app = app(vec![documents("docs", None)]);
        let (status, body) = send(&app, get("/mcp/docs")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "running");
        assert_eq!(body["server"], "docs");
        let names: Vec<_> = body["tools"].as_array().unwrap().iter().map(|t| t["name"].clone()).collect();
        assert_eq!(names, vec![json!("search"), json!("find"), json!("insert"), json!("list_collections")]);

        let (status, _) = send(&app, get("/mcp/nope")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn capability_server_answers_envelopes() {
        let app = app(vec![documents("docs", None)]);
        let (status, body) = send(&app, post("/mcp/docs", r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"jsonrpc": "2.0", "id": 1, "result": {}}));

        let (_, body) = send(&app, post("/mcp/docs", "{oops")).await;
        assert_eq!(body["error"]["code"], -32700);
        assert_eq!(body["id"], Value::Null);

        let call = r#"{"jsonrpc":"2.0","id":"a","method":"tools/call","params":{"name":"insert","arguments":{"collection":"c","document":{"_id":"x"}}}}"#;
        let (_, body) = send(&app, post("/mcp/docs", call)).await;
        assert_eq!(body["result"]["insertedId"], "x");
        assert!(body.get("error").is_none());
    }

    #[tokio::test]
    async fn toggling_unknown_server_is_404() {
        let app = app(vec![documents("docs", None)]);
        let req = Request::builder()
            .uri("/agent/servers/ghost")
            .method("PATCH")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"enabled": false}"#))
            .unwrap();
        let (status, _) = send(&app, req).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn duplicate_remote_tool_fails_startup() {
        let mut entry = remote("crm", "http://127.0.0.1:1/rpc");
        entry.tools.push(ToolDescriptor::new("search", "again"));
        let err = AppState::build(&test_config(vec![entry]), Readiness::ready()).err().unwrap();
        assert!(format!("{err:#}").contains("duplicate tool"));
    }

    #[tokio::test]
    async fn liveness_reports_readiness() {
        let app = app(vec![]);
        let (status, body) = send(&app, get("/healthz")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ready"], true);
        assert_eq!(body["conversations"], 0);
    }
}
