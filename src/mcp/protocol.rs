//! JSON-RPC 2.0 shaped envelope exchanged with capability servers.
//!
//! Requests carry a fresh id per call; responses must carry exactly one of
//! `result` or `error`. Decoding never yields a partially populated envelope.

use crate::errors::ProtocolError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

pub const PROTOCOL_VERSION: &str = "2.0";

pub mod methods {
    pub const PING: &str = "ping";
    pub const LIST_TOOLS: &str = "tools/list";
    pub const CALL_TOOL: &str = "tools/call";
}

pub mod error_codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
    pub const TOOL_FAILED: i64 = -32000;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{n}"),
            RequestId::String(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    #[serde(rename = "jsonrpc", alias = "protocolVersion")]
    pub protocol_version: String,
    pub id: RequestId,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl RequestEnvelope {
    pub fn to_bytes(&self) -> Vec<u8> {
        // A struct of strings and a Value cannot fail to serialize.
        serde_json::to_vec(self).unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self { code, message: message.into(), data: None }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Result(Value),
    Error(RpcError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResponseEnvelope {
    pub protocol_version: String,
    /// `None` only when the server could not read the request id.
    pub id: Option<RequestId>,
    pub outcome: Outcome,
}

#[derive(Serialize)]
struct WireResponse<'a> {
    jsonrpc: &'a str,
    id: &'a Option<RequestId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a RpcError>,
}

impl Serialize for ResponseEnvelope {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let (result, error) = match &self.outcome {
            Outcome::Result(v) => (Some(v), None),
            Outcome::Error(e) => (None, Some(e)),
        };
        WireResponse { jsonrpc: &self.protocol_version, id: &self.id, result, error }
            .serialize(serializer)
    }
}

impl ResponseEnvelope {
    pub fn success(id: RequestId, result: Value) -> Self {
        Self { protocol_version: PROTOCOL_VERSION.into(), id: Some(id), outcome: Outcome::Result(result) }
    }

    pub fn failure(id: Option<RequestId>, error: RpcError) -> Self {
        Self { protocol_version: PROTOCOL_VERSION.into(), id, outcome: Outcome::Error(error) }
    }
}

/// Stateless apart from the id counter; safe to share between tasks.
#[derive(Debug)]
pub struct ProtocolCodec {
    next_id: AtomicU64,
}

impl Default for ProtocolCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolCodec {
    pub fn new() -> Self {
        Self { next_id: AtomicU64::new(1) }
    }

    pub fn encode_request(&self, method: &str, params: Option<Value>) -> RequestEnvelope {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        RequestEnvelope {
            protocol_version: PROTOCOL_VERSION.into(),
            id: RequestId::Number(id as i64),
            method: method.to_string(),
            params,
        }
    }

    pub fn decode_response(bytes: &[u8]) -> Result<ResponseEnvelope, ProtocolError> {
        let malformed = |m: String| ProtocolError::MalformedEnvelope(m);
        let value: Value =
            serde_json::from_slice(bytes).map_err(|e| malformed(format!("invalid json: {e}")))?;
        let Value::Object(mut obj) = value else {
            return Err(malformed("envelope is not an object".into()));
        };

        let protocol_version = take_version(&mut obj).map_err(malformed)?;

        let id = match obj.remove("id") {
            None => return Err(malformed("missing id".into())),
            Some(Value::Null) => None,
            Some(v) => Some(
                serde_json::from_value::<RequestId>(v)
                    .map_err(|_| malformed("id must be a string or integer".into()))?,
            ),
        };

        let outcome = match (obj.remove("result"), obj.remove("error")) {
            (Some(result), None) => Outcome::Result(result),
            (None, Some(error)) => Outcome::Error(
                serde_json::from_value::<RpcError>(error)
                    .map_err(|e| malformed(format!("invalid error object: {e}")))?,
            ),
            (Some(_), Some(_)) => return Err(malformed("both result and error present".into())),
            (None, None) => return Err(malformed("neither result nor error present".into())),
        };

        Ok(ResponseEnvelope { protocol_version, id, outcome })
    }

    /// Server-side counterpart: a request that cannot be read becomes the
    /// error response to send back.
    pub fn decode_request(bytes: &[u8]) -> Result<RequestEnvelope, ResponseEnvelope> {
        let value: Value = serde_json::from_slice(bytes).map_err(|e| {
            ResponseEnvelope::failure(None, RpcError::new(error_codes::PARSE_ERROR, format!("parse error: {e}")))
        })?;
        let id = value.get("id").cloned().and_then(|v| serde_json::from_value::<RequestId>(v).ok());
        let req: RequestEnvelope = serde_json::from_value(value).map_err(|e| {
            ResponseEnvelope::failure(
                id.clone(),
                RpcError::new(error_codes::INVALID_REQUEST, format!("invalid request: {e}")),
            )
        })?;
        if req.protocol_version != PROTOCOL_VERSION {
            return Err(ResponseEnvelope::failure(
                id,
                RpcError::new(error_codes::INVALID_REQUEST, "unsupported protocol version"),
            ));
        }
        Ok(req)
    }
}

fn take_version(obj: &mut Map<String, Value>) -> Result<String, String> {
    let raw = obj
        .remove("jsonrpc")
        .or_else(|| obj.remove("protocolVersion"))
        .ok_or_else(|| "missing protocol version".to_string())?;
    match raw {
        Value::String(v) if v == PROTOCOL_VERSION => Ok(v),
        other => Err(format!("unsupported protocol version {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn echo(req: &RequestEnvelope, result: Value) -> Vec<u8> {
        serde_json::to_vec(&ResponseEnvelope::success(req.id.clone(), result)).unwrap()
    }

    #[test]
    fn ids_are_unique_per_call() {
        let codec = ProtocolCodec::new();
        let a = codec.encode_request("ping", None);
        let b = codec.encode_request("ping", None);
        assert_ne!(a.id, b.id);
        assert_eq!(a.protocol_version, "2.0");
    }

    #[test]
    fn request_wire_shape() {
        let codec = ProtocolCodec::new();
        let req = codec.encode_request("tools/call", Some(json!({"name": "search"})));
        let v: Value = serde_json::from_slice(&req.to_bytes()).unwrap();
        assert_eq!(v["jsonrpc"], "2.0");
        assert_eq!(v["method"], "tools/call");
        assert_eq!(v["params"]["name"], "search");
        let bare = codec.encode_request("ping", None);
        let v: Value = serde_json::from_slice(&bare.to_bytes()).unwrap();
        assert!(v.get("params").is_none());
    }

    #[test]
    fn null_result_is_still_a_result() {
        let bytes = br#"{"jsonrpc":"2.0","id":7,"result":null}"#;
        let resp = ProtocolCodec::decode_response(bytes).unwrap();
        assert_eq!(resp.outcome, Outcome::Result(Value::Null));
        assert_eq!(resp.id, Some(RequestId::Number(7)));
    }

    #[test]
    fn rejects_both_and_neither() {
        let both = br#"{"jsonrpc":"2.0","id":1,"result":1,"error":{"code":1,"message":"x"}}"#;
        let neither = br#"{"jsonrpc":"2.0","id":1}"#;
        assert!(matches!(
            ProtocolCodec::decode_response(both),
            Err(ProtocolError::MalformedEnvelope(_))
        ));
        assert!(matches!(
            ProtocolCodec::decode_response(neither),
            Err(ProtocolError::MalformedEnvelope(_))
        ));
    }

    #[test]
    fn rejects_wrong_version_and_garbage() {
        let v1 = br#"{"jsonrpc":"1.0","id":1,"result":{}}"#;
        assert!(ProtocolCodec::decode_response(v1).is_err());
        assert!(ProtocolCodec::decode_response(b"not json").is_err());
        assert!(ProtocolCodec::decode_response(b"[1,2]").is_err());
        let bad_error = br#"{"jsonrpc":"2.0","id":1,"error":{"message":"no code"}}"#;
        assert!(ProtocolCodec::decode_response(bad_error).is_err());
    }

    #[test]
    fn accepts_protocol_version_alias_and_string_ids() {
        let bytes = br#"{"protocolVersion":"2.0","id":"abc","error":{"code":-32601,"message":"nope","data":{"m":"x"}}}"#;
        let resp = ProtocolCodec::decode_response(bytes).unwrap();
        assert_eq!(resp.id, Some(RequestId::String("abc".into())));
        match resp.outcome {
            Outcome::Error(e) => {
                assert_eq!(e.code, error_codes::METHOD_NOT_FOUND);
                assert_eq!(e.data, Some(json!({"m": "x"})));
            }
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[test]
    fn decode_request_reports_parse_and_shape_errors() {
        let err = ProtocolCodec::decode_request(b"{").unwrap_err();
        assert_eq!(err.id, None);
        assert!(matches!(err.outcome, Outcome::Error(ref e) if e.code == error_codes::PARSE_ERROR));

        let err = ProtocolCodec::decode_request(br#"{"jsonrpc":"2.0","id":4}"#).unwrap_err();
        assert_eq!(err.id, Some(RequestId::Number(4)));
        assert!(matches!(err.outcome, Outcome::Error(ref e) if e.code == error_codes::INVALID_REQUEST));

        let ok = ProtocolCodec::decode_request(br#"{"jsonrpc":"2.0","id":"x","method":"ping"}"#).unwrap();
        assert_eq!(ok.method, "ping");
        assert_eq!(ok.params, None);
    }

    fn arb_json() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(|n| json!(n)),
            "[a-zA-Z0-9 ]{0,16}".prop_map(Value::String),
        ];
        leaf.prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::btree_map("[a-z]{1,6}", inner, 0..4)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }

    proptest! {
        #[test]
        fn echoed_result_round_trips(result in arb_json()) {
            let codec = ProtocolCodec::new();
            let req = codec.encode_request("tools/call", Some(json!({})));
            let resp = ProtocolCodec::decode_response(&echo(&req, result.clone())).unwrap();
            prop_assert_eq!(resp.id, Some(req.id));
            prop_assert_eq!(resp.outcome, Outcome::Result(result));
        }
    }
}
