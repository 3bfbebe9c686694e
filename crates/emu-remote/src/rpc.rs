//! JSON-RPC 2.0 framing.
//!
//! One request per line in, one response per line out. Transport threads
//! call [`handle_line`]; everything method-specific lives behind
//! [`Handler`].

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use crate::error::{RemoteError, code};

#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: JsonValue,
    #[serde(default)]
    pub id: JsonValue,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    pub id: JsonValue,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
}

impl RpcResponse {
    #[must_use]
    pub fn success(id: JsonValue, result: JsonValue) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    #[must_use]
    pub fn error(id: JsonValue, code: i32, message: String) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(RpcError { code, message }),
            id,
        }
    }

    fn from_result(id: JsonValue, result: Result<JsonValue, RemoteError>) -> Self {
        match result {
            Ok(value) => Self::success(id, value),
            Err(e) => Self::error(id, e.code(), e.to_string()),
        }
    }
}

/// Something that answers method calls.
pub trait Handler: Send + Sync {
    fn dispatch(&self, method: &str, params: &JsonValue) -> Result<JsonValue, RemoteError>;
}

/// Handle one line of input. Returns `None` for blank lines.
pub fn handle_line(handler: &dyn Handler, line: &str) -> Option<String> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let response = handle_request(handler, line);
    Some(serde_json::to_string(&response).unwrap_or_default())
}

fn handle_request(handler: &dyn Handler, line: &str) -> RpcResponse {
    let request: RpcRequest = match serde_json::from_str(line) {
        Ok(r) => r,
        Err(e) => {
            warn!(error = %e, "unparseable request");
            return RpcResponse::error(JsonValue::Null, code::PARSE_ERROR, format!("Parse error: {e}"));
        }
    };

    if request.jsonrpc != "2.0" {
        return RpcResponse::error(
            request.id,
            code::INVALID_REQUEST,
            "Invalid JSON-RPC version".to_string(),
        );
    }

    debug!(method = %request.method, "request");
    let result = handler.dispatch(&request.method, &request.params);
    if let Err(e) = &result {
        if e.is_client_error() {
            debug!(method = %request.method, error = %e, "request rejected");
        } else {
            warn!(method = %request.method, error = %e, "request failed");
        }
    }
    RpcResponse::from_result(request.id, result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo;

    impl Handler for Echo {
        fn dispatch(&self, method: &str, params: &JsonValue) -> Result<JsonValue, RemoteError> {
            match method {
                "echo" => Ok(params.clone()),
                "bad" => Err(RemoteError::invalid("bad params")),
                other => Err(RemoteError::UnknownMethod(other.to_string())),
            }
        }
    }

    fn call(line: &str) -> RpcResponse {
        let out = handle_line(&Echo, line).expect("response");
        serde_json::from_str(&out).expect("valid json")
    }

    #[test]
    fn blank_line_is_ignored() {
        assert!(handle_line(&Echo, "   ").is_none());
    }

    #[test]
    fn success_echoes_id() {
        let resp = call(r#"{"jsonrpc":"2.0","method":"echo","params":{"a":1},"id":7}"#);
        assert_eq!(resp.id, json!(7));
        assert_eq!(resp.result, Some(json!({"a": 1})));
        assert!(resp.error.is_none());
    }

    #[test]
    fn parse_error() {
        let resp = call("{not json");
        assert_eq!(resp.id, JsonValue::Null);
        assert_eq!(resp.error.expect("error").code, code::PARSE_ERROR);
    }

    #[test]
    fn wrong_version() {
        let resp = call(r#"{"jsonrpc":"1.0","method":"echo","id":1}"#);
        assert_eq!(resp.error.expect("error").code, code::INVALID_REQUEST);
    }

    #[test]
    fn handler_errors_carry_codes() {
        let resp = call(r#"{"jsonrpc":"2.0","method":"bad","id":2}"#);
        let err = resp.error.expect("error");
        assert_eq!(err.code, code::INVALID_PARAMS);
        assert_eq!(err.message, "bad params");

        let resp = call(r#"{"jsonrpc":"2.0","method":"missing","id":3}"#);
        assert_eq!(resp.error.expect("error").code, code::METHOD_NOT_FOUND);
    }
}
