//! JSON-RPC method handlers. Each one goes through the shared coordinator, so
//! every request sees the same lock and the same cached entry.

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, info};

use cidx::{DaemonCache, QueryRequest};

use crate::daemon::protocol::{JsonRpcError, INVALID_PARAMS, METHOD_NOT_FOUND, QUERY_FAILED};

/// Everything a handler needs. One per daemon process.
pub struct HandlerContext {
    pub cache: Arc<DaemonCache>,
    /// Project queried when a request does not name one.
    pub project: PathBuf,
}

/// Route one request to its handler.
pub fn dispatch(ctx: &HandlerContext, method: &str, params: &Option<Value>) -> Result<Value, JsonRpcError> {
    match method {
        "query" => handle_query(ctx, params),
        "status" => to_result(ctx.cache.status()),
        "invalidate" => {
            ctx.cache.invalidate_all();
            Ok(json!({ "invalidated": true }))
        }
        "ping" => Ok(json!({})),
        _ => Err(JsonRpcError::new(METHOD_NOT_FOUND, format!("Method not found: {}", method))),
    }
}

fn handle_query(ctx: &HandlerContext, params: &Option<Value>) -> Result<Value, JsonRpcError> {
    let params = params
        .as_ref()
        .ok_or_else(|| JsonRpcError::new(INVALID_PARAMS, "Missing params"))?;

    let project = match params.get("project") {
        None | Some(Value::Null) => ctx.project.clone(),
        Some(Value::String(p)) if !p.is_empty() => PathBuf::from(p),
        Some(other) => {
            return Err(JsonRpcError::new(
                INVALID_PARAMS,
                format!("'project' must be a non-empty string, got {}", other),
            ))
        }
    };

    let request: QueryRequest = serde_json::from_value(params.clone())
        .map_err(|e| JsonRpcError::new(INVALID_PARAMS, format!("Invalid query params: {}", e)))?;
    debug!(project = %project.display(), request = ?request, "Dispatching query");

    match ctx.cache.query(&project, &request) {
        Ok(response) => {
            if response.outcome != cidx::LoadOutcome::Fresh {
                info!(
                    project = %response.project,
                    version = %response.version,
                    outcome = ?response.outcome,
                    "Index (re)loaded for query"
                );
            }
            to_result(response)
        }
        Err(e) => Err(JsonRpcError::new(QUERY_FAILED, e.to_string())),
    }
}

fn to_result<T: serde::Serialize>(value: T) -> Result<Value, JsonRpcError> {
    serde_json::to_value(value).map_err(|e| JsonRpcError::new(QUERY_FAILED, format!("Failed to encode result: {}", e)))
}
