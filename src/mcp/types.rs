use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Object,
    Array,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ParamType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub description: String,
}

impl ParameterSpec {
    pub fn required(name: &str, kind: ParamType, description: &str) -> Self {
        Self { name: name.into(), kind, required: true, description: description.into() }
    }

    pub fn optional(name: &str, kind: ParamType, description: &str) -> Self {
        Self { name: name.into(), kind, required: false, description: description.into() }
    }
}

/// A single callable operation offered by a capability server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    #[serde(default, alias = "parameters")]
    pub parameter_schema: Vec<ParameterSpec>,
    /// Extra classifier hints, matched against message tokens.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
}

impl ToolDescriptor {
    pub fn new(name: &str, description: &str) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameter_schema: Vec::new(),
            keywords: Vec::new(),
        }
    }

    pub fn param(mut self, spec: ParameterSpec) -> Self {
        self.parameter_schema.push(spec);
        self
    }

    pub fn keywords(mut self, words: &[&str]) -> Self {
        self.keywords.extend(words.iter().map(|w| w.to_string()));
        self
    }

    /// Whether a bare message can drive this tool: at most one required
    /// parameter, and that one takes a string.
    pub fn takes_free_text(&self) -> bool {
        let mut required = self.parameter_schema.iter().filter(|p| p.required);
        match (required.next(), required.next()) {
            (None, _) => true,
            (Some(p), None) => p.kind == ParamType::String,
            _ => false,
        }
    }
}

/// Static description of one backend capability server. Only `enabled`
/// changes after startup.
#[derive(Debug)]
pub struct CapabilityServerConfig {
    pub name: String,
    pub endpoint: String,
    pub keywords: Vec<String>,
    pub tools: Vec<ToolDescriptor>,
    enabled: AtomicBool,
}

impl CapabilityServerConfig {
    pub fn new(name: &str, endpoint: &str, enabled: bool, tools: Vec<ToolDescriptor>) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
            keywords: Vec::new(),
            tools,
            enabled: AtomicBool::new(enabled),
        }
    }

    pub fn with_keywords(mut self, keywords: Vec<String>) -> Self {
        self.keywords = keywords;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo<'a> {
    pub name: &'a str,
    pub endpoint: &'a str,
    pub enabled: bool,
    pub tools: &'a [ToolDescriptor],
}

impl<'a> From<&'a CapabilityServerConfig> for ServerInfo<'a> {
    fn from(cfg: &'a CapabilityServerConfig) -> Self {
        Self { name: &cfg.name, endpoint: &cfg.endpoint, enabled: cfg.is_enabled(), tools: &cfg.tools }
    }
}
