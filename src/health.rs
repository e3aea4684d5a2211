use crate::{client::ClientSet, mcp::registry::ToolRegistry};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::{collections::BTreeMap, sync::Arc, time::{Duration, Instant}};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerHealth {
    pub reachable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemHealthSnapshot {
    pub timestamp: DateTime<Utc>,
    pub per_server: BTreeMap<String, ServerHealth>,
    pub healthy_servers: usize,
    pub total_servers: usize,
}

/// Pings every enabled server concurrently. Each server's outcome is recorded
/// independently; the check itself never fails.
pub struct HealthMonitor {
    registry: Arc<ToolRegistry>,
    clients: ClientSet,
    ping_timeout: Duration,
}

impl HealthMonitor {
    pub fn new(registry: Arc<ToolRegistry>, clients: ClientSet, ping_timeout: Duration) -> Self {
        Self { registry, clients, ping_timeout }
    }

    pub async fn check_all(&self) -> SystemHealthSnapshot {
        let pings = self.registry.list_servers().iter().filter(|s| s.is_enabled()).map(|server| {
            let client = self.clients.get(&server.name);
            let timeout = self.ping_timeout;
            async move {
                let started = Instant::now();
                let health = match client {
                    None => ServerHealth {
                        reachable: false,
                        latency_ms: None,
                        error: Some("no client configured".into()),
                    },
                    Some(client) => match client.ping(timeout).await {
                        Ok(_) => ServerHealth {
                            reachable: true,
                            latency_ms: Some(started.elapsed().as_millis() as u64),
                            error: None,
                        },
                        Err(e) => {
                            warn!(server = %server.name, error = %e, "health ping failed");
                            ServerHealth { reachable: false, latency_ms: None, error: Some(e.to_string()) }
                        }
                    },
                };
                (server.name.clone(), health)
            }
        });
        let per_server: BTreeMap<String, ServerHealth> = join_all(pings).await.into_iter().collect();
        let healthy_servers = per_server.values().filter(|h| h.reachable).count();
        SystemHealthSnapshot {
            timestamp: Utc::now(),
            total_servers: per_server.len(),
            healthy_servers,
            per_server,
        }
    }
}
