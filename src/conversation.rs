//! Conversation transcripts keyed by conversation id.
//!
//! A transcript is append-only. Both turns of an exchange land under one
//! per-conversation lock, so readers never observe half an exchange.
//! Every access to a conversation's mutex happens while holding the table
//! read lock, which lets eviction take the write lock knowing no append is
//! in flight.

use crate::errors::ClientError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::{
    sync::{Mutex, RwLock},
    task::JoinHandle,
};
use tracing::debug;

pub const DEFAULT_CONVERSATION: &str = "default";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum CallOutcome {
    Success { payload: Value },
    Failure { error: ClientError },
}

/// One invocation attempt against one capability server.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallRecord {
    pub tool_name: String,
    pub server_name: String,
    pub arguments: Value,
    pub outcome: CallOutcome,
}

impl ToolCallRecord {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, CallOutcome::Success { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnMetadata {
    pub servers_used: Vec<String>,
    pub tool_calls: Vec<ToolCallRecord>,
    pub execution_time_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<TurnMetadata>,
}

impl ConversationTurn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self { role, content: content.into(), timestamp: Utc::now(), metadata: None }
    }

    pub fn with_metadata(mut self, metadata: TurnMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

struct Conversation {
    turns: Vec<ConversationTurn>,
    last_active: Instant,
}

pub struct ConversationStore {
    table: RwLock<HashMap<String, Mutex<Conversation>>>,
    idle_timeout: Duration,
    system_prompt: Option<String>,
}

impl ConversationStore {
    pub fn new(idle_timeout: Duration, system_prompt: Option<String>) -> Self {
        Self { table: RwLock::new(HashMap::new()), idle_timeout, system_prompt }
    }

    fn fresh(&self) -> Conversation {
        let turns = self
            .system_prompt
            .iter()
            .map(|p| ConversationTurn::new(Role::System, p.clone()))
            .collect();
        Conversation { turns, last_active: Instant::now() }
    }

    /// Appends the user turn and the assistant turn as one unit, creating the
    /// conversation on first use.
    pub async fn append_exchange(&self, id: &str, user: ConversationTurn, assistant: ConversationTurn) {
        {
            let table = self.table.read().await;
            if let Some(conv) = table.get(id) {
                let mut conv = conv.lock().await;
                conv.turns.extend([user, assistant]);
                conv.last_active = Instant::now();
                return;
            }
        }
        let mut table = self.table.write().await;
        let mut conv = table.entry(id.to_string()).or_insert_with(|| Mutex::new(self.fresh())).lock().await;
        conv.turns.extend([user, assistant]);
        conv.last_active = Instant::now();
    }

    /// Ordered copy of the transcript; empty for unknown ids.
    pub async fn history(&self, id: &str) -> Vec<ConversationTurn> {
        let table = self.table.read().await;
        match table.get(id) {
            Some(conv) => conv.lock().await.turns.clone(),
            None => Vec::new(),
        }
    }

    pub async fn len(&self) -> usize {
        self.table.read().await.len()
    }

    /// Drops conversations idle for longer than the configured timeout.
    pub async fn evict_idle(&self, now: Instant) -> usize {
        let mut table = self.table.write().await;
        let before = table.len();
        let idle_timeout = self.idle_timeout;
        table.retain(|_, conv| now.saturating_duration_since(conv.get_mut().last_active) <= idle_timeout);
        before - table.len()
    }

    pub fn spawn_sweeper(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let evicted = self.evict_idle(Instant::now()).await;
                if evicted > 0 {
                    debug!(evicted, "evicted idle conversations");
                }
            }
        })
    }
}
