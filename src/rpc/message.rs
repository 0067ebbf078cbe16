use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A JSON-RPC 2.0 request or notification id. `null` is a legal id under the
/// spec, distinct from "no id at all" (a notification), so this intentionally
/// is not folded into `Option<Id>` at the wire layer.
pub type Id = Value;

/// An inbound or outbound JSON-RPC message after initial `serde_json`
/// decoding, before the endpoint has classified it against the request vs.
/// response shape described in the protocol.
#[derive(Debug, Clone, Deserialize)]
pub struct RawMessage {
    pub jsonrpc: Option<String>,
    pub method: Option<String>,
    pub params: Option<Value>,
    pub id: Option<Id>,
    pub result: Option<Value>,
    pub error: Option<ResponseError>,
}

impl RawMessage {
    pub fn is_request_shaped(&self) -> bool {
        self.jsonrpc.as_deref() == Some("2.0") && self.method.is_some()
    }

    pub fn is_response_shaped(&self) -> bool {
        self.method.is_none() && (self.result.is_some() || self.error.is_some())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// An outbound request or notification this endpoint is about to serialize.
#[derive(Debug, Clone, Serialize)]
pub struct OutgoingRequest {
    pub jsonrpc: &'static str,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Id>,
}

impl OutgoingRequest {
    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            method: method.into(),
            params,
            id: None,
        }
    }

    pub fn request(method: impl Into<String>, params: Option<Value>, id: Id) -> Self {
        Self {
            jsonrpc: "2.0",
            method: method.into(),
            params,
            id: Some(id),
        }
    }
}

/// An outbound response to an inbound request. `id` is always present
/// (including `null`) per the JSON-RPC 2.0 wire format; notifications never
/// generate a response at all, so there is no variant for that here.
#[derive(Debug, Clone, Serialize)]
pub struct Response {
    pub jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
    pub id: Id,
}

impl Response {
    pub fn success(result: Value, id: Id) -> Self {
        Self {
            jsonrpc: "2.0",
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn error(code: i64, message: impl Into<String>, data: Option<Value>, id: Id) -> Self {
        Self {
            jsonrpc: "2.0",
            result: None,
            error: Some(ResponseError {
                code,
                message: message.into(),
                data,
            }),
            id,
        }
    }
}
