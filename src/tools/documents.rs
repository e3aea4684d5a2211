//! In-memory document store exposed as a capability server.

use crate::{
    errors::ToolError,
    mcp::types::{ParamType, ParameterSpec, ToolDescriptor},
    tools::{limit_param, required_str, search_terms, DynTool, HostedServer, Tool},
};
use anyhow::Context;
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::{collections::BTreeMap, path::Path, sync::Arc};
use tokio::sync::RwLock;

#[derive(Default)]
pub struct DocumentStore {
    collections: RwLock<BTreeMap<String, Vec<Value>>>,
}

impl DocumentStore {
    /// Seed file shape: `{ "<collection>": [ {document}, ... ], ... }`.
    pub fn load(seed: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = seed else {
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(path).with_context(|| format!("reading seed {}", path.display()))?;
        let collections: BTreeMap<String, Vec<Value>> =
            serde_json::from_str(&raw).with_context(|| format!("parsing seed {}", path.display()))?;
        Ok(Self { collections: RwLock::new(collections) })
    }

    pub fn into_server(self, name: &str) -> HostedServer {
        let store = Arc::new(self);
        let tools: Vec<DynTool> = vec![
            Arc::new(SearchTool(store.clone())),
            Arc::new(FindTool(store.clone())),
            Arc::new(InsertTool(store.clone())),
            Arc::new(ListCollectionsTool(store)),
        ];
        HostedServer::new(name, tools)
    }
}

fn document_id(doc: &Value) -> Option<String> {
    ["_id", "id"].iter().find_map(|k| match doc.get(*k)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn collect_text(value: &Value, out: &mut String) {
    match value {
        Value::String(s) => {
            out.push_str(&s.to_lowercase());
            out.push(' ');
        }
        Value::Number(n) => {
            out.push_str(&n.to_string());
            out.push(' ');
        }
        Value::Array(items) => items.iter().for_each(|v| collect_text(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_text(v, out)),
        _ => {}
    }
}

struct SearchTool(Arc<DocumentStore>);
struct FindTool(Arc<DocumentStore>);
struct InsertTool(Arc<DocumentStore>);
struct ListCollectionsTool(Arc<DocumentStore>);

#[async_trait]
impl Tool for SearchTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new("search", "Search stored documents for matching text")
            .param(ParameterSpec::required("query", ParamType::String, "free text to match"))
            .param(ParameterSpec::optional("collection", ParamType::String, "restrict to one collection"))
            .param(ParameterSpec::optional("limit", ParamType::Integer, "maximum hits (default 10)"))
            .keywords(&["document", "documents", "invoice", "record", "records", "lookup"])
    }

    async fn call(&self, params: Value) -> Result<Value, ToolError> {
        let query = required_str(&params, "query")?;
        let only = params.get("collection").and_then(Value::as_str);
        let limit = limit_param(&params, 10, 50);
        let terms = search_terms(query);
        if terms.is_empty() {
            return Ok(json!({ "hits": [], "total": 0 }));
        }

        let collections = self.0.collections.read().await;
        let mut hits: Vec<(usize, &str, &Value)> = Vec::new();
        for (name, docs) in collections.iter() {
            if only.is_some_and(|c| c != name.as_str()) {
                continue;
            }
            for doc in docs {
                let mut text = String::new();
                collect_text(doc, &mut text);
                let score = terms.iter().filter(|t| text.contains(t.as_str())).count();
                if score > 0 {
                    hits.push((score, name.as_str(), doc));
                }
            }
        }
        hits.sort_by(|a, b| b.0.cmp(&a.0));
        let total = hits.len();
        let hits: Vec<Value> = hits
            .into_iter()
            .take(limit)
            .map(|(score, collection, doc)| json!({ "collection": collection, "score": score, "document": doc }))
            .collect();
        Ok(json!({ "hits": hits, "total": total }))
    }
}

#[async_trait]
impl Tool for FindTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new("find", "Fetch a single document by id")
            .param(ParameterSpec::required("collection", ParamType::String, "collection name"))
            .param(ParameterSpec::required("id", ParamType::String, "document id"))
    }

    async fn call(&self, params: Value) -> Result<Value, ToolError> {
        let collection = required_str(&params, "collection")?;
        let id = required_str(&params, "id")?;
        let collections = self.0.collections.read().await;
        collections
            .get(collection)
            .and_then(|docs| docs.iter().find(|d| document_id(d).as_deref() == Some(id)))
            .map(|doc| json!({ "collection": collection, "document": doc }))
            .ok_or_else(|| ToolError::NotFound(format!("{collection}/{id}")))
    }
}

#[async_trait]
impl Tool for InsertTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new("insert", "Store a new document in a collection")
            .param(ParameterSpec::required("collection", ParamType::String, "collection name"))
            .param(ParameterSpec::required("document", ParamType::Object, "document body"))
            .keywords(&["store", "save", "add"])
    }

    async fn call(&self, params: Value) -> Result<Value, ToolError> {
        let collection = required_str(&params, "collection")?.to_string();
        let mut doc: Map<String, Value> = params
            .get("document")
            .and_then(Value::as_object)
            .cloned()
            .ok_or_else(|| ToolError::InvalidParams("document must be an object".into()))?;
        let id = match document_id(&Value::Object(doc.clone())) {
            Some(id) => id,
            None => {
                let id = uuid::Uuid::new_v4().to_string();
                doc.insert("_id".into(), Value::String(id.clone()));
                id
            }
        };
        let mut collections = self.0.collections.write().await;
        collections.entry(collection.clone()).or_default().push(Value::Object(doc));
        Ok(json!({ "collection": collection, "insertedId": id }))
    }
}

#[async_trait]
impl Tool for ListCollectionsTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new("list_collections", "List document collections and their sizes")
            .keywords(&["collections"])
    }

    async fn call(&self, _params: Value) -> Result<Value, ToolError> {
        let collections = self.0.collections.read().await;
        let list: Vec<Value> = collections
            .iter()
            .map(|(name, docs)| json!({ "name": name, "count": docs.len() }))
            .collect();
        Ok(json!({ "collections": list }))
    }
}
