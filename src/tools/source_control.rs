//! Read-only source-control backend over a directory of checked-out
//! repositories. Every path is confined to its repository root.

use crate::{
    errors::ToolError,
    mcp::types::{ParamType, ParameterSpec, ToolDescriptor},
    tools::{ensure_within_root, limit_param, required_str, search_terms, DynTool, HostedServer, Tool},
};
use async_trait::async_trait;
use base64::Engine;
use serde_json::{json, Value};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};
use walkdir::WalkDir;

const MAX_SEARCH_FILE_BYTES: u64 = 1024 * 1024;

pub struct SourceTree {
    root: PathBuf,
}

impl SourceTree {
    pub fn new(root: &Path) -> anyhow::Result<Self> {
        Ok(Self { root: dunce::canonicalize(root)? })
    }

    pub fn into_server(self, name: &str) -> HostedServer {
        let tree = Arc::new(self);
        let tools: Vec<DynTool> = vec![
            Arc::new(SearchCodeTool(tree.clone())),
            Arc::new(ReadFileTool(tree.clone())),
            Arc::new(ListRepositoriesTool(tree)),
        ];
        HostedServer::new(name, tools)
    }

    fn repositories(&self) -> Result<Vec<String>, ToolError> {
        let entries = fs::read_dir(&self.root).map_err(|e| ToolError::Failed(e.to_string()))?;
        let mut names: Vec<String> = entries
            .filter_map(Result::ok)
            .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .filter_map(|e| e.file_name().into_string().ok())
            .filter(|n| !n.starts_with('.'))
            .collect();
        names.sort();
        Ok(names)
    }

    fn repo_root(&self, repo: &str) -> Result<PathBuf, ToolError> {
        let path = ensure_within_root(&self.root, Path::new(repo)).map_err(|_| ToolError::NotFound(format!("repository {repo}")))?;
        // only direct children of the root count as repositories
        if path.parent() != Some(self.root.as_path()) || !path.is_dir() {
            return Err(ToolError::NotFound(format!("repository {repo}")));
        }
        Ok(path)
    }
}

struct SearchCodeTool(Arc<SourceTree>);
struct ReadFileTool(Arc<SourceTree>);
struct ListRepositoriesTool(Arc<SourceTree>);

#[async_trait]
impl Tool for ListRepositoriesTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new("list_repositories", "List available source repositories")
            .keywords(&["repositories", "repos", "projects"])
    }

    async fn call(&self, _params: Value) -> Result<Value, ToolError> {
        Ok(json!({ "repositories": self.0.repositories()? }))
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new("read_file", "Read a file from a repository")
            .param(ParameterSpec::required("repo", ParamType::String, "repository name"))
            .param(ParameterSpec::required("path", ParamType::String, "path inside the repository"))
            .keywords(&["open", "read", "contents", "show"])
    }

    async fn call(&self, params: Value) -> Result<Value, ToolError> {
        let repo = required_str(&params, "repo")?;
        let path = required_str(&params, "path")?;
        let repo_root = self.0.repo_root(repo)?;
        let full = ensure_within_root(&repo_root, Path::new(path)).map_err(|e| {
            if e.to_string().contains("escapes") {
                ToolError::PathOutsideRoot
            } else {
                ToolError::NotFound(path.to_string())
            }
        })?;
        let data = fs::read(&full).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ToolError::NotFound(path.to_string())
            } else {
                ToolError::Failed(e.to_string())
            }
        })?;
        let size = data.len();
        match String::from_utf8(data) {
            Ok(content) => Ok(json!({ "repo": repo, "path": path, "size": size, "content": content })),
            Err(e) => {
                let b64 = base64::engine::general_purpose::STANDARD.encode(e.into_bytes());
                Ok(json!({ "repo": repo, "path": path, "size": size, "content_b64": b64, "encoding": "base64" }))
            }
        }
    }
}

#[async_trait]
impl Tool for SearchCodeTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new("search_code", "Search source code across repositories")
            .param(ParameterSpec::required("query", ParamType::String, "terms to look for"))
            .param(ParameterSpec::optional("repo", ParamType::String, "restrict to one repository"))
            .param(ParameterSpec::optional("limit", ParamType::Integer, "maximum matches (default 20)"))
            .keywords(&["function", "source", "implementation", "grep"])
    }

    async fn call(&self, params: Value) -> Result<Value, ToolError> {
        let query = required_str(&params, "query")?;
        let terms = search_terms(query);
        let limit = limit_param(&params, 20, 200);
        let repos = match params.get("repo").and_then(Value::as_str) {
            Some(repo) => vec![repo.to_string()],
            None => self.0.repositories()?,
        };
        let roots = repos
            .into_iter()
            .map(|r| self.0.repo_root(&r).map(|root| (r, root)))
            .collect::<Result<Vec<_>, _>>()?;
        if terms.is_empty() {
            return Ok(json!({ "matches": [], "total": 0 }));
        }

        let matches = tokio::task::spawn_blocking(move || scan(&roots, &terms))
            .await
            .map_err(|e| ToolError::Failed(e.to_string()))?;
        let total = matches.len();
        let matches: Vec<Value> = matches.into_iter().take(limit).map(|m| m.into_json()).collect();
        Ok(json!({ "matches": matches, "total": total }))
    }
}

struct LineMatch {
    repo: String,
    path: String,
    line: usize,
    text: String,
    score: usize,
}

impl LineMatch {
    fn into_json(self) -> Value {
        json!({ "repo": self.repo, "path": self.path, "line": self.line, "text": self.text })
    }
}

fn scan(roots: &[(String, PathBuf)], terms: &[String]) -> Vec<LineMatch> {
    let mut out = Vec::new();
    for (repo, root) in roots {
        let files = WalkDir::new(root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.file_name() != ".git")
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .filter(|e| e.metadata().map(|m| m.len() <= MAX_SEARCH_FILE_BYTES).unwrap_or(false));
        for entry in files {
            let Ok(content) = fs::read_to_string(entry.path()) else {
                continue;
            };
            let rel = entry.path().strip_prefix(root).unwrap_or(entry.path());
            for (idx, line) in content.lines().enumerate() {
                let lower = line.to_lowercase();
                let score = terms.iter().filter(|t| lower.contains(t.as_str())).count();
                if score > 0 {
                    out.push(LineMatch {
                        repo: repo.clone(),
                        path: rel.to_string_lossy().replace('\\', "/"),
                        line: idx + 1,
                        text: line.trim().to_string(),
                        score,
                    });
                }
            }
        }
    }
    out.sort_by(|a, b| b.score.cmp(&a.score));
    out
}
