use crate::{
    errors::ConfigError,
    mcp::types::{CapabilityServerConfig, ToolDescriptor},
};
use std::collections::HashSet;

const STOP_WORDS: &[&str] = &[
    "about", "after", "also", "does", "from", "have", "into", "please", "that", "their", "them",
    "then", "there", "these", "they", "this", "what", "when", "where", "which", "with", "would",
    "your",
];

/// A (server, tool) pair selected for a message, with its classifier score.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub server: String,
    pub tool: ToolDescriptor,
    pub score: u32,
}

/// Immutable set of capability servers, in registration order.
#[derive(Debug)]
pub struct ToolRegistry {
    servers: Vec<CapabilityServerConfig>,
}

impl ToolRegistry {
    pub fn new(servers: Vec<CapabilityServerConfig>) -> Result<Self, ConfigError> {
        let mut names = HashSet::new();
        for server in &servers {
            if server.name.trim().is_empty() {
                return Err(ConfigError::EmptyServerName);
            }
            if !names.insert(server.name.as_str()) {
                return Err(ConfigError::DuplicateServer(server.name.clone()));
            }
            let mut tools = HashSet::new();
            for tool in &server.tools {
                if tool.name.trim().is_empty() {
                    return Err(ConfigError::EmptyToolName { server: server.name.clone() });
                }
                if !tools.insert(tool.name.as_str()) {
                    return Err(ConfigError::DuplicateTool {
                        server: server.name.clone(),
                        tool: tool.name.clone(),
                    });
                }
            }
        }
        Ok(Self { servers })
    }

    pub fn list_servers(&self) -> &[CapabilityServerConfig] {
        &self.servers
    }

    pub fn get(&self, name: &str) -> Option<&CapabilityServerConfig> {
        self.servers.iter().find(|s| s.name == name)
    }

    pub fn list_names(&self) -> Vec<String> {
        self.servers.iter().map(|s| s.name.clone()).collect()
    }

    /// Returns false when no server has that name.
    pub fn set_enabled(&self, name: &str, enabled: bool) -> bool {
        match self.get(name) {
            Some(server) => {
                server.set_enabled(enabled);
                true
            }
            None => false,
        }
    }

    /// Every tool on every enabled server, in registration order.
    pub fn tools(&self) -> Vec<(String, ToolDescriptor)> {
        self.servers
            .iter()
            .filter(|s| s.is_enabled())
            .flat_map(|s| s.tools.iter().map(move |t| (s.name.clone(), t.clone())))
            .collect()
    }

    /// Ranked shortlist for `hint`: the best free-text tool of each enabled
    /// server with a non-zero score, highest score first, registration order
    /// breaking ties.
    pub fn find_tools_matching(&self, hint: &str) -> Vec<Candidate> {
        let tokens = tokenize(hint);
        if tokens.is_empty() {
            return Vec::new();
        }
        let mut ranked: Vec<Candidate> = Vec::new();
        for server in self.servers.iter().filter(|s| s.is_enabled()) {
            let server_bonus = tokens
                .iter()
                .filter(|t| {
                    **t == server.name.to_lowercase()
                        || server.keywords.iter().any(|k| k.to_lowercase() == **t)
                })
                .count() as u32
                * 2;

            // tools needing structured arguments cannot be called from a message
            let callable = move || server.tools.iter().filter(|t| t.takes_free_text());
            let mut best: Option<(u32, &ToolDescriptor)> = None;
            for tool in callable() {
                let score = score_tool(tool, &tokens);
                if score == 0 {
                    continue;
                }
                // strict > keeps the first registered tool on ties
                if best.map(|(s, _)| score > s).unwrap_or(true) {
                    best = Some((score, tool));
                }
            }
            // A server mention alone picks its first callable tool.
            if best.is_none() && server_bonus > 0 {
                best = callable().next().map(|t| (0, t));
            }
            if let Some((score, tool)) = best {
                ranked.push(Candidate {
                    server: server.name.clone(),
                    tool: tool.clone(),
                    score: score + server_bonus,
                });
            }
        }
        // sort_by is stable, so equal scores stay in registration order
        ranked.sort_by(|a, b| b.score.cmp(&a.score));
        ranked
    }
}

fn score_tool(tool: &ToolDescriptor, tokens: &[String]) -> u32 {
    let name_parts: Vec<String> = tool
        .name
        .split(|c: char| c == '_' || c == '-' || c == '/')
        .filter(|p| !p.is_empty())
        .map(str::to_lowercase)
        .collect();
    let keywords: Vec<String> = tool.keywords.iter().map(|k| k.to_lowercase()).collect();
    let description = tokenize(&tool.description);

    tokens
        .iter()
        .map(|t| {
            let mut s = 0;
            if keywords.contains(t) {
                s += 3;
            }
            if name_parts.contains(t) {
                s += 2;
            }
            if t.len() >= 4 && !STOP_WORDS.contains(&t.as_str()) && description.contains(t) {
                s += 1;
            }
            s
        })
        .sum()
}

/// Lowercased alphanumeric words, deduplicated, first occurrence order.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .filter(|w| seen.insert(w.clone()))
        .collect()
}
