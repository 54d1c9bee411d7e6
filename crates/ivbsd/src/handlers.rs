//! RPC request handlers.
//!
//! Synchronous: the server runs these on the blocking pool with the
//! kernel locked, so requests are handled strictly one at a time.

use ivbs_common::kernel::Kernel;
use ivbs_shared::rpc::{
    CompleteParams, ExecuteParams, ExecutePayload, HistoryParams, InspectParams,
    IsCompleteParams, RpcMethod, RpcRequest, RpcResponse, ShutdownParams,
};
use ivbs_shared::IvbsError;
use serde::Serialize;
use serde_json::Value;
use std::sync::Mutex;
use tracing::{debug, error, info, warn};

/// What the server does once the response is written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Followup {
    Continue,
    /// Stop serving and exit normally
    Stop,
    /// Kill everything and exit immediately
    Teardown,
}

#[derive(Debug)]
pub struct Handled {
    pub response: RpcResponse,
    pub followup: Followup,
}

impl Handled {
    fn reply(response: RpcResponse) -> Self {
        Self {
            response,
            followup: Followup::Continue,
        }
    }
}

/// Handle one raw request line.
pub fn handle_line(kernel: &Mutex<Kernel>, line: &str) -> Handled {
    let request = match parse_request(line) {
        Ok(request) => request,
        Err((id, err)) => {
            warn!("Rejected request: {}", err);
            return Handled::reply(RpcResponse::from_error(id, &err));
        }
    };

    let mut kernel = match kernel.lock() {
        Ok(kernel) => kernel,
        Err(_) => {
            error!("Kernel state poisoned");
            let err = IvbsError::Internal("kernel state poisoned".to_string());
            return Handled::reply(RpcResponse::from_error(request.id, &err));
        }
    };

    handle_request(&mut kernel, request)
}

/// Dispatch a decoded request.
pub fn handle_request(kernel: &mut Kernel, request: RpcRequest) -> Handled {
    let id = request.id.clone();
    debug!(method = request.method.as_str(), id = %id, "Handling request");

    match dispatch(kernel, &request) {
        Ok((result, followup)) => Handled {
            response: RpcResponse::success(id, result),
            followup,
        },
        Err(err) => {
            warn!(method = request.method.as_str(), "Request failed: {}", err);
            Handled::reply(RpcResponse::from_error(id, &err))
        }
    }
}

fn dispatch(kernel: &mut Kernel, request: &RpcRequest) -> Result<(Value, Followup), IvbsError> {
    let mut followup = Followup::Continue;

    let result = match request.method {
        RpcMethod::Execute => {
            let params: ExecuteParams = request.params_as()?;
            let result = kernel.execute(&params);
            if result.payload.contains(&ExecutePayload::Teardown) {
                followup = Followup::Teardown;
            }
            to_value(&result)?
        }
        RpcMethod::IsComplete => {
            let params: IsCompleteParams = request.params_as()?;
            to_value(&kernel.is_complete(&params.code))?
        }
        RpcMethod::Shutdown => {
            let params: ShutdownParams = request.params_as()?;
            let result = kernel
                .shutdown(params.restart)
                .map_err(|e| IvbsError::Supervisor(e.to_string()))?;
            if !params.restart {
                info!("Shutdown requested");
                followup = Followup::Stop;
            }
            to_value(&result)?
        }
        RpcMethod::History => {
            let params: HistoryParams = request.params_as()?;
            let result = kernel
                .history(&params)
                .map_err(|e| IvbsError::History(e.to_string()))?;
            to_value(&result)?
        }
        RpcMethod::Complete => {
            let params: CompleteParams = request.params_as()?;
            to_value(&kernel.complete(&params))?
        }
        RpcMethod::Inspect => {
            let params: InspectParams = request.params_as()?;
            to_value(&kernel.inspect(&params))?
        }
        RpcMethod::KernelInfo => to_value(&kernel.kernel_info())?,
    };

    Ok((result, followup))
}

/// Decode a request line. Errors carry whatever id could be recovered.
fn parse_request(line: &str) -> Result<RpcRequest, (String, IvbsError)> {
    let value: Value = serde_json::from_str(line)
        .map_err(|e| (String::new(), IvbsError::Parse(e.to_string())))?;

    let id = match value.get("id") {
        Some(Value::String(id)) => id.clone(),
        Some(Value::Number(id)) => id.to_string(),
        _ => String::new(),
    };

    let method_name = match value.get("method").and_then(Value::as_str) {
        Some(name) => name,
        None => {
            return Err((id, IvbsError::Parse("request has no method".to_string())));
        }
    };
    let method: RpcMethod = serde_json::from_value(Value::String(method_name.to_string()))
        .map_err(|_| (id.clone(), IvbsError::MethodNotFound(method_name.to_string())))?;

    Ok(RpcRequest {
        jsonrpc: "2.0".to_string(),
        method,
        params: value.get("params").cloned(),
        id,
    })
}

fn to_value<T: Serialize>(result: &T) -> Result<Value, IvbsError> {
    serde_json::to_value(result).map_err(|e| IvbsError::Internal(e.to_string()))
}

/// Kill the interpreter and exit the process.
pub fn terminate(kernel: &Mutex<Kernel>) -> ! {
    match kernel.lock() {
        Ok(mut kernel) => kernel.terminate_app(),
        Err(poisoned) => poisoned.into_inner().terminate_app(),
    }
}
