use crate::mcp::types::ToolDescriptor;
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: Server,
    #[serde(default)]
    pub logging: Logging,
    #[serde(default)]
    pub limits: Limits,
    #[serde(default)]
    pub dispatch: Dispatch,
    #[serde(default)]
    pub health: Health,
    #[serde(default)]
    pub conversation: Conversation,
    #[serde(default)]
    pub servers: Vec<ServerEntry>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Server {
    pub bind_addr: String,
    pub port: u16,
    #[serde(default = "default_base_path")]
    pub base_path: String,
}
fn default_base_path() -> String { "/mcp".to_string() }

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Logging {
    #[serde(default)]
    pub format: LogFormat,
    #[serde(default = "default_filter")]
    pub filter: String,
}
fn default_filter() -> String { "info".to_string() }

impl Default for Logging {
    fn default() -> Self { Self { format: LogFormat::Json, filter: default_filter() } }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Limits {
    #[serde(default = "default_max_request_kb")]
    pub max_request_kb: usize,
}
fn default_max_request_kb() -> usize { 256 }

impl Default for Limits {
    fn default() -> Self { Self { max_request_kb: default_max_request_kb() } }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Dispatch {
    #[serde(default = "default_max_candidates")]
    pub max_candidates: usize,
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
    #[serde(default = "default_max_summary_chars")]
    pub max_summary_chars: usize,
    #[serde(default = "default_ready_timeout_ms")]
    pub ready_timeout_ms: u64,
}
fn default_max_candidates() -> usize { 3 }
fn default_call_timeout_ms() -> u64 { 5_000 }
fn default_max_summary_chars() -> usize { 800 }
fn default_ready_timeout_ms() -> u64 { 10_000 }

impl Default for Dispatch {
    fn default() -> Self {
        Self {
            max_candidates: default_max_candidates(),
            call_timeout_ms: default_call_timeout_ms(),
            max_summary_chars: default_max_summary_chars(),
            ready_timeout_ms: default_ready_timeout_ms(),
        }
    }
}

impl Dispatch {
    pub fn settings(&self) -> crate::dispatcher::DispatchSettings {
        crate::dispatcher::DispatchSettings {
            max_candidates: self.max_candidates,
            call_timeout: Duration::from_millis(self.call_timeout_ms),
            max_summary_chars: self.max_summary_chars,
            ready_timeout: Duration::from_millis(self.ready_timeout_ms),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Health {
    #[serde(default = "default_ping_timeout_ms")]
    pub ping_timeout_ms: u64,
}
fn default_ping_timeout_ms() -> u64 { 1_500 }

impl Default for Health {
    fn default() -> Self { Self { ping_timeout_ms: default_ping_timeout_ms() } }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Conversation {
    #[serde(default = "default_idle_timeout_s")]
    pub idle_timeout_s: u64,
    #[serde(default = "default_sweep_interval_s")]
    pub sweep_interval_s: u64,
    #[serde(default)]
    pub system_prompt: Option<String>,
}
fn default_idle_timeout_s() -> u64 { 1_800 }
fn default_sweep_interval_s() -> u64 { 60 }

impl Default for Conversation {
    fn default() -> Self {
        Self {
            idle_timeout_s: default_idle_timeout_s(),
            sweep_interval_s: default_sweep_interval_s(),
            system_prompt: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    Documents,
    SourceControl,
    Remote,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerEntry {
    pub name: String,
    pub backend: Backend,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub seed: Option<PathBuf>,
    #[serde(default)]
    pub root_dir: Option<PathBuf>,
    #[serde(default)]
    pub tools: Vec<ToolDescriptor>,
}
fn default_enabled() -> bool { true }

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path)?;
        if path.extension().map(|e| e == "json").unwrap_or(false) {
            Ok(serde_json::from_str(&raw)?)
        } else {
            Ok(toml::from_str(&raw)?)
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.server.base_path.starts_with('/') { anyhow::bail!("base_path must start with '/'"); }
        if self.limits.max_request_kb == 0 { anyhow::bail!("max_request_kb must be > 0"); }
        if self.dispatch.max_candidates == 0 { anyhow::bail!("max_candidates must be > 0"); }
        if self.dispatch.call_timeout_ms == 0 { anyhow::bail!("call_timeout_ms must be > 0"); }
        if self.dispatch.max_summary_chars == 0 { anyhow::bail!("max_summary_chars must be > 0"); }
        if self.dispatch.ready_timeout_ms == 0 { anyhow::bail!("ready_timeout_ms must be > 0"); }
        if self.health.ping_timeout_ms == 0 { anyhow::bail!("ping_timeout_ms must be > 0"); }
        if self.conversation.idle_timeout_s == 0 { anyhow::bail!("idle_timeout_s must be > 0"); }
        if self.conversation.sweep_interval_s == 0 { anyhow::bail!("sweep_interval_s must be > 0"); }

        let mut names = HashSet::new();
        for entry in &self.servers {
            if entry.name.trim().is_empty() { anyhow::bail!("server name must not be empty"); }
            if entry.name.contains('/') { anyhow::bail!("server name must not contain '/': {}", entry.name); }
            if !names.insert(entry.name.as_str()) { anyhow::bail!("duplicate server name: {}", entry.name); }
            match entry.backend {
                Backend::Remote => {
                    if entry.endpoint.as_deref().map(str::trim).unwrap_or("").is_empty() {
                        anyhow::bail!("server {}: remote backend needs an endpoint", entry.name);
                    }
                }
                Backend::SourceControl => {
                    let Some(dir) = &entry.root_dir else {
                        anyhow::bail!("server {}: source_control backend needs root_dir", entry.name);
                    };
                    if !dir.is_dir() {
                        anyhow::bail!("server {}: root_dir is not a directory: {}", entry.name, dir.display());
                    }
                }
                Backend::Documents => {}
            }
        }
        Ok(())
    }

    /// Where clients reach a server: its configured endpoint, or this
    /// process's own route for hosted backends.
    pub fn endpoint_for(&self, entry: &ServerEntry) -> String {
        if let Some(endpoint) = &entry.endpoint {
            return endpoint.clone();
        }
        let bind = self.server.bind_addr.trim_start_matches('[').trim_end_matches(']');
        let host = match bind.parse::<IpAddr>() {
            Ok(IpAddr::V4(ip)) if ip.is_unspecified() => "127.0.0.1".to_string(),
            Ok(IpAddr::V6(ip)) if ip.is_unspecified() => "[::1]".to_string(),
            Ok(IpAddr::V6(ip)) => format!("[{ip}]"),
            _ => self.server.bind_addr.clone(),
        };
        format!("http://{}:{}{}/{}", host, self.server.port, self.server.base_path.trim_end_matches('/'), entry.name)
    }
}
