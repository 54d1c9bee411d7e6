//! JSON-RPC 2.0 types for ivbsd communication.
//!
//! One JSON object per line in each direction. Methods mirror the host
//! calls a notebook front end makes on a kernel.

use crate::completeness::Completeness;
use crate::error::IvbsError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// RPC methods supported by ivbsd
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RpcMethod {
    Execute,
    IsComplete,
    Shutdown,
    History,
    Complete,
    Inspect,
    KernelInfo,
}

impl RpcMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            RpcMethod::Execute => "execute",
            RpcMethod::IsComplete => "is_complete",
            RpcMethod::Shutdown => "shutdown",
            RpcMethod::History => "history",
            RpcMethod::Complete => "complete",
            RpcMethod::Inspect => "inspect",
            RpcMethod::KernelInfo => "kernel_info",
        }
    }
}

/// JSON-RPC 2.0 request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub method: RpcMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
    pub id: String,
}

impl RpcRequest {
    pub fn new(method: RpcMethod, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method,
            params,
            id: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// Decode params into a typed struct. Absent params decode as `{}` so
    /// structs whose fields all have defaults accept a bare request.
    pub fn params_as<T: DeserializeOwned>(&self) -> Result<T, IvbsError> {
        let value = self
            .params
            .clone()
            .unwrap_or_else(|| serde_json::Value::Object(Default::default()));
        serde_json::from_value(value).map_err(|e| IvbsError::InvalidParams(e.to_string()))
    }
}

/// JSON-RPC 2.0 response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    pub id: String,
}

impl RpcResponse {
    pub fn success(id: String, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn error(id: String, code: i32, message: String) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(RpcError {
                code,
                message,
                data: None,
            }),
            id,
        }
    }

    pub fn from_error(id: String, err: &IvbsError) -> Self {
        Self::error(id, err.code(), err.to_string())
    }

    /// Serialize a typed result, falling back to an internal error.
    pub fn from_result<T: Serialize>(id: String, result: &T) -> Self {
        match serde_json::to_value(result) {
            Ok(value) => Self::success(id, value),
            Err(e) => Self::from_error(id, &IvbsError::Json(e)),
        }
    }

    /// Decode the result into a typed struct, surfacing a server error.
    pub fn into_result<T: DeserializeOwned>(self) -> Result<T, IvbsError> {
        if let Some(err) = self.error {
            return Err(IvbsError::Internal(format!("[{}] {}", err.code, err.message)));
        }
        let value = self
            .result
            .ok_or_else(|| IvbsError::Internal("response carries neither result nor error".into()))?;
        Ok(serde_json::from_value(value)?)
    }
}

/// JSON-RPC 2.0 error object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

// =============================================================================
// Params
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteParams {
    pub code: String,
    #[serde(default)]
    pub silent: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsCompleteParams {
    pub code: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShutdownParams {
    #[serde(default)]
    pub restart: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryParams {
    #[serde(default = "default_access_type")]
    pub hist_access_type: String,
    #[serde(default)]
    pub n: Option<u32>,
    #[serde(default)]
    pub output: bool,
}

fn default_access_type() -> String {
    "tail".to_string()
}

impl Default for HistoryParams {
    fn default() -> Self {
        Self {
            hist_access_type: default_access_type(),
            n: None,
            output: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteParams {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub cursor_pos: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InspectParams {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub cursor_pos: usize,
    #[serde(default)]
    pub detail_level: u8,
}

// =============================================================================
// Results
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecuteStatus {
    Ok,
    Error,
}

/// Side effects the front end should perform after an execute reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum ExecutePayload {
    /// Clear the console screen
    ClearOutput,
    /// The kernel is tearing down the whole session
    Teardown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteResult {
    pub status: ExecuteStatus,
    pub execution_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    #[serde(default)]
    pub payload: Vec<ExecutePayload>,
}

/// Result of `is_complete` is the completeness verdict itself.
pub type IsCompleteResult = Completeness;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShutdownResult {
    pub restarted: bool,
}

/// `(session, line, source)` as sent on the wire.
pub type HistoryTuple = (String, i64, String);

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryResult {
    pub history: Vec<HistoryTuple>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompleteResult {
    pub status: String,
    pub matches: Vec<String>,
    pub cursor_start: usize,
    pub cursor_end: usize,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl CompleteResult {
    /// No completions; cursor range collapsed at `cursor_pos`.
    pub fn empty(cursor_pos: usize) -> Self {
        Self {
            status: "ok".to_string(),
            matches: Vec::new(),
            cursor_start: cursor_pos,
            cursor_end: cursor_pos,
            metadata: Default::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InspectResult {
    pub status: String,
    pub found: bool,
    pub data: serde_json::Map<String, serde_json::Value>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl InspectResult {
    pub fn not_found() -> Self {
        Self {
            status: "ok".to_string(),
            found: false,
            data: Default::default(),
            metadata: Default::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageInfo {
    pub name: String,
    pub file_extension: String,
    pub pygments_lexer: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelInfoResult {
    pub implementation: String,
    pub implementation_version: String,
    pub language_info: LanguageInfo,
    pub banner: String,
}

impl KernelInfoResult {
    pub fn current() -> Self {
        Self {
            implementation: crate::IMPLEMENTATION.to_string(),
            implementation_version: crate::VERSION.to_string(),
            language_info: LanguageInfo {
                name: "vbscript".to_string(),
                file_extension: ".vbs".to_string(),
                pygments_lexer: "vbscript".to_string(),
            },
            banner: format!("{} {} (VBScript)", crate::IMPLEMENTATION, crate::VERSION),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_roundtrip_snake_case_method() {
        let req = RpcRequest::new(RpcMethod::IsComplete, Some(json!({"code": "Sub x"})));
        let line = serde_json::to_string(&req).unwrap();
        assert!(line.contains("\"method\":\"is_complete\""));

        let back: RpcRequest = serde_json::from_str(&line).unwrap();
        assert_eq!(back.method, RpcMethod::IsComplete);
        let params: IsCompleteParams = back.params_as().unwrap();
        assert_eq!(params.code, "Sub x");
    }

    #[test]
    fn test_missing_params_use_defaults() {
        let req = RpcRequest::new(RpcMethod::Shutdown, None);
        let params: ShutdownParams = req.params_as().unwrap();
        assert!(!params.restart);

        let req = RpcRequest::new(RpcMethod::History, None);
        let params: HistoryParams = req.params_as().unwrap();
        assert_eq!(params.hist_access_type, "tail");
        assert_eq!(params.n, None);
    }

    #[test]
    fn test_missing_required_param_is_invalid_params() {
        let req = RpcRequest::new(RpcMethod::Execute, None);
        let err = req.params_as::<ExecuteParams>().unwrap_err();
        assert_eq!(err.code(), -32602);
    }

    #[test]
    fn test_execute_result_omits_absent_streams() {
        let result = ExecuteResult {
            status: ExecuteStatus::Ok,
            execution_count: 3,
            stdout: None,
            stderr: None,
            payload: vec![ExecutePayload::ClearOutput],
        };
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(
            value,
            json!({
                "status": "ok",
                "execution_count": 3,
                "payload": [{"source": "clear_output"}]
            })
        );
    }

    #[test]
    fn test_history_result_is_list_of_tuples() {
        let result = HistoryResult {
            history: vec![("abc".to_string(), 1, "x = 1".to_string())],
        };
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value, json!({"history": [["abc", 1, "x = 1"]]}));
    }

    #[test]
    fn test_error_response_into_result() {
        let resp = RpcResponse::error("1".into(), -32601, "Method not found".into());
        let err = resp.into_result::<ShutdownResult>().unwrap_err();
        assert!(err.to_string().contains("-32601"));
    }
}
