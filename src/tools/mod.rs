pub mod documents;
pub mod source_control;

use crate::{
    errors::ToolError,
    mcp::{
        protocol::{error_codes, methods, RequestEnvelope, ResponseEnvelope, RpcError},
        types::ToolDescriptor,
    },
};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

#[async_trait]
pub trait Tool: Send + Sync {
    fn descriptor(&self) -> ToolDescriptor;
    async fn call(&self, params: Value) -> Result<Value, ToolError>;
}

pub type DynTool = Arc<dyn Tool + 'static>;

/// A capability server living inside this process, answering the same
/// envelope a remote one would.
pub struct HostedServer {
    name: String,
    tools: Vec<DynTool>,
}

impl HostedServer {
    pub fn new(name: &str, tools: Vec<DynTool>) -> Self {
        Self { name: name.to_string(), tools }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools.iter().map(|t| t.descriptor()).collect()
    }

    fn get(&self, name: &str) -> Option<DynTool> {
        self.tools.iter().find(|t| t.descriptor().name == name).cloned()
    }

    pub async fn handle(&self, req: RequestEnvelope) -> ResponseEnvelope {
        let id = req.id;
        match req.method.as_str() {
            methods::PING => ResponseEnvelope::success(id, json!({})),
            methods::LIST_TOOLS => ResponseEnvelope::success(id, json!({ "tools": self.descriptors() })),
            methods::CALL_TOOL => {
                let params = req.params.unwrap_or(Value::Null);
                let Some(name) = params.get("name").and_then(Value::as_str) else {
                    return ResponseEnvelope::failure(
                        Some(id),
                        RpcError::new(error_codes::INVALID_PARAMS, "missing tool name"),
                    );
                };
                let Some(tool) = self.get(name) else {
                    return ResponseEnvelope::failure(
                        Some(id),
                        RpcError::new(error_codes::METHOD_NOT_FOUND, format!("unknown tool: {name}")),
                    );
                };
                let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));
                match tool.call(arguments).await {
                    Ok(result) => ResponseEnvelope::success(id, result),
                    Err(e) => ResponseEnvelope::failure(Some(id), tool_error(&e)),
                }
            }
            other => ResponseEnvelope::failure(
                Some(id),
                RpcError::new(error_codes::METHOD_NOT_FOUND, format!("unknown method: {other}")),
            ),
        }
    }
}

fn tool_error(err: &ToolError) -> RpcError {
    let (code, kind) = match err {
        ToolError::InvalidParams(_) => (error_codes::INVALID_PARAMS, "InvalidParams"),
        ToolError::NotFound(_) => (error_codes::TOOL_FAILED, "NotFound"),
        ToolError::PathOutsideRoot => (error_codes::TOOL_FAILED, "PathOutsideRoot"),
        ToolError::Failed(_) => (error_codes::TOOL_FAILED, "ToolError"),
    };
    RpcError { code, message: err.to_string(), data: Some(json!({ "kind": kind })) }
}

/// Words too common to be worth matching against stored content.
const FILLER: &[&str] = &[
    "and", "any", "are", "can", "code", "document", "documents", "file", "files", "find", "for",
    "from", "get", "give", "look", "me", "my", "of", "on", "or", "please", "repo", "search",
    "show", "the", "to", "what", "where", "with",
];

pub fn search_terms(query: &str) -> Vec<String> {
    crate::mcp::registry::tokenize(query)
        .into_iter()
        .filter(|t| t.chars().count() >= 2 && !FILLER.contains(&t.as_str()))
        .collect()
}

pub fn required_str<'a>(params: &'a Value, key: &str) -> Result<&'a str, ToolError> {
    params
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ToolError::InvalidParams(format!("missing {key}")))
}

pub fn limit_param(params: &Value, default: usize, max: usize) -> usize {
    params
        .get("limit")
        .and_then(Value::as_u64)
        .map(|l| (l as usize).clamp(1, max))
        .unwrap_or(default)
}

pub fn ensure_within_root(root: &Path, input: &Path) -> anyhow::Result<PathBuf> {
    // allow relative or absolute inputs; join then canonicalize
    let joined = if input.is_absolute() { input.to_path_buf() } else { root.join(input) };
    let canon_root = dunce::canonicalize(root)?;
    let canon_path = dunce::canonicalize(&joined)?;
    if canon_path.starts_with(&canon_root) {
        Ok(canon_path)
    } else {
        anyhow::bail!("path escapes root")
    }
}
