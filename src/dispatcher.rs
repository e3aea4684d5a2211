//! Dispatch cycle: classify a message against the registry, fan the shortlist
//! out to capability servers concurrently, merge what comes back, and record
//! the exchange.
//!
//! Backend failures never escape a cycle. Each call ends as a
//! [`ToolCallRecord`], and a cycle where everything failed still produces a
//! reply. The exchange is appended only after every call has settled, so a
//! cycle dropped mid-flight (client disconnect) leaves the transcript as it
//! was.

use crate::{
    client::ClientSet,
    conversation::{
        CallOutcome, ConversationStore, ConversationTurn, Role, ToolCallRecord, TurnMetadata,
    },
    errors::{ClientError, DispatchError},
    mcp::{
        registry::{Candidate, ToolRegistry},
        types::{ParamType, ToolDescriptor},
    },
    readiness::Readiness,
};
use futures::future::join_all;
use serde::Serialize;
use serde_json::{Map, Value};
use std::{
    fmt,
    sync::Arc,
    time::{Duration, Instant},
};
use tracing::{debug, info};

pub const FALLBACK_REPLY: &str =
    "Sorry, I couldn't get an answer from the services needed for that right now. Please try again in a moment.";

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub max_candidates: usize,
    pub call_timeout: Duration,
    pub max_summary_chars: usize,
    pub ready_timeout: Duration,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            max_candidates: 3,
            call_timeout: Duration::from_secs(5),
            max_summary_chars: 800,
            ready_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchMetadata {
    pub servers_used: Vec<String>,
    pub execution_time_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentReply {
    pub message: String,
    pub tool_calls: Vec<ToolCallRecord>,
    pub metadata: DispatchMetadata,
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Classifying,
    Dispatching { outstanding: usize },
    Merging,
    Idle,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Classifying => f.write_str("classifying"),
            Phase::Dispatching { outstanding } => write!(f, "dispatching({outstanding})"),
            Phase::Merging => f.write_str("merging"),
            Phase::Idle => f.write_str("idle"),
        }
    }
}

pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
    clients: ClientSet,
    conversations: Arc<ConversationStore>,
    readiness: Readiness,
    settings: DispatchSettings,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<ToolRegistry>,
        clients: ClientSet,
        conversations: Arc<ConversationStore>,
        readiness: Readiness,
        settings: DispatchSettings,
    ) -> Self {
        Self { registry, clients, conversations, readiness, settings }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn conversations(&self) -> &Arc<ConversationStore> {
        &self.conversations
    }

    pub fn is_ready(&self) -> bool {
        self.readiness.is_ready()
    }

    pub async fn handle(&self, message: &str, conversation_id: &str) -> Result<AgentReply, DispatchError> {
        let started = Instant::now();
        let user_turn = ConversationTurn::new(Role::User, message);

        self.readiness
            .wait(self.settings.ready_timeout)
            .await
            .map_err(|e| DispatchError::Internal(format!("dispatcher not ready: {e:?}")))?;

        trace_phase(conversation_id, Phase::Classifying);
        let mut shortlist = self.registry.find_tools_matching(message);
        shortlist.truncate(self.settings.max_candidates);

        let tool_calls = if shortlist.is_empty() {
            Vec::new()
        } else {
            trace_phase(conversation_id, Phase::Dispatching { outstanding: shortlist.len() });
            self.fan_out(message, &shortlist).await
        };

        trace_phase(conversation_id, Phase::Merging);
        let mut servers_used: Vec<String> = Vec::new();
        for record in tool_calls.iter().filter(|r| r.is_success()) {
            if !servers_used.contains(&record.server_name) {
                servers_used.push(record.server_name.clone());
            }
        }
        let reply = if tool_calls.is_empty() {
            self.no_match_reply()
        } else {
            compose_reply(&tool_calls, self.settings.max_summary_chars)
        };
        let execution_time_ms = started.elapsed().as_millis() as u64;

        let assistant_turn = ConversationTurn::new(Role::Assistant, reply.clone()).with_metadata(TurnMetadata {
            servers_used: servers_used.clone(),
            tool_calls: tool_calls.clone(),
            execution_time_ms,
        });
        self.conversations.append_exchange(conversation_id, user_turn, assistant_turn).await;
        trace_phase(conversation_id, Phase::Idle);

        info!(
            conversation_id = conversation_id,
            candidates = tool_calls.len(),
            servers_used = ?servers_used,
            duration_ms = execution_time_ms,
            "dispatch complete"
        );
        Ok(AgentReply {
            message: reply,
            tool_calls,
            metadata: DispatchMetadata { servers_used, execution_time_ms },
        })
    }

    /// One concurrent call per candidate; results come back in rank order.
    async fn fan_out(&self, message: &str, shortlist: &[Candidate]) -> Vec<ToolCallRecord> {
        let timeout = self.settings.call_timeout;
        let calls = shortlist.iter().map(|candidate| {
            let client = self.clients.get(&candidate.server);
            let arguments = build_arguments(&candidate.tool, message);
            async move {
                let started = Instant::now();
                let result = match client {
                    Some(client) => client.call_tool(&candidate.tool.name, arguments.clone(), timeout).await,
                    None => Err(ClientError::Unreachable { reason: "no client configured".into() }),
                };
                let outcome = match result {
                    Ok(payload) => CallOutcome::Success { payload },
                    Err(error) => CallOutcome::Failure { error },
                };
                let code = match &outcome {
                    CallOutcome::Success { .. } => "OK",
                    CallOutcome::Failure { error } => error.code(),
                };
                info!(
                    server = %candidate.server,
                    tool = %candidate.tool.name,
                    outcome = code,
                    duration_ms = started.elapsed().as_millis() as u64,
                    "tool call"
                );
                ToolCallRecord {
                    tool_name: candidate.tool.name.clone(),
                    server_name: candidate.server.clone(),
                    arguments,
                    outcome,
                }
            }
        });
        join_all(calls).await
    }

    fn no_match_reply(&self) -> String {
        let servers: Vec<String> = self
            .registry
            .list_servers()
            .iter()
            .filter(|s| s.is_enabled())
            .map(|s| s.name.clone())
            .collect();
        if servers.is_empty() {
            "I don't have any connected services that can help with that.".to_string()
        } else {
            format!(
                "I couldn't match that request to a connected service. I can help with: {}.",
                servers.join(", ")
            )
        }
    }
}

fn trace_phase(conversation_id: &str, phase: Phase) {
    debug!(conversation_id = conversation_id, phase = %phase, "dispatch phase");
}

/// String parameters receive the message text; everything else is left to
/// the tool's defaults.
pub fn build_arguments(tool: &ToolDescriptor, message: &str) -> Value {
    let mut args = Map::new();
    for param in &tool.parameter_schema {
        if param.kind == ParamType::String && (param.required || args.is_empty()) {
            args.insert(param.name.clone(), Value::String(message.trim().to_string()));
        }
    }
    Value::Object(args)
}

fn compose_reply(records: &[ToolCallRecord], max_chars: usize) -> String {
    let mut sections = Vec::new();
    let mut failed = 0;
    for record in records {
        match &record.outcome {
            CallOutcome::Success { payload } => sections.push(format!(
                "From {} ({}): {}",
                record.server_name,
                record.tool_name,
                summarize(payload, max_chars)
            )),
            CallOutcome::Failure { .. } => failed += 1,
        }
    }
    if sections.is_empty() {
        return FALLBACK_REPLY.to_string();
    }
    let mut reply = sections.join("\n\n");
    if failed > 0 {
        reply.push_str(&format!("\n\n({failed} other source(s) did not return an answer.)"));
    }
    reply
}

fn summarize(payload: &Value, max_chars: usize) -> String {
    let text = match payload {
        Value::String(s) => s.clone(),
        Value::Object(obj) => match obj.get("content").and_then(Value::as_array) {
            Some(parts) => {
                let texts: Vec<&str> = parts
                    .iter()
                    .filter(|p| p.get("type").and_then(Value::as_str) == Some("text"))
                    .filter_map(|p| p.get("text").and_then(Value::as_str))
                    .collect();
                if texts.is_empty() {
                    payload.to_string()
                } else {
                    texts.join("\n")
                }
            }
            None => payload.to_string(),
        },
        other => other.to_string(),
    };
    if text.chars().count() > max_chars {
        let cut: String = text.chars().take(max_chars).collect();
        format!("{cut}...")
    } else {
        text
    }
}
