use std::io::{self, BufRead, Write};

use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::daemon::handlers::{self, HandlerContext};
use crate::daemon::protocol::*;

/// Run the daemon event loop over stdio until stdin closes.
pub fn run_server(ctx: &HandlerContext) {
    let stdin = io::stdin();
    let stdout = io::stdout();
    info!(project = %ctx.project.display(), "Daemon ready, waiting for JSON-RPC requests on stdin");
    let handled = serve(ctx, stdin.lock(), stdout.lock());
    info!(requests = handled, "stdin closed, shutting down");
}

/// Read newline-delimited requests from `reader`, write one response line per
/// request to `writer`. Returns the number of requests answered.
pub fn serve<R: BufRead, W: Write>(ctx: &HandlerContext, reader: R, mut writer: W) -> usize {
    let mut handled = 0;

    for line in reader.lines() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                error!(error = %e, "Error reading stdin");
                break;
            }
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        debug!(request = %line, "Incoming JSON-RPC");

        let request: JsonRpcRequest = match serde_json::from_str(line) {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "Failed to parse JSON-RPC request");
                let err = JsonRpcErrorResponse::new(
                    Value::Null,
                    JsonRpcError::new(PARSE_ERROR, format!("Parse error: {}", e)),
                );
                write_line(&mut writer, &err);
                handled += 1;
                continue;
            }
        };

        // Notifications have no id: act on them, send nothing back
        let Some(id) = request.id else {
            debug!(method = %request.method, "Received notification");
            if let Err(e) = handlers::dispatch(ctx, &request.method, &request.params) {
                warn!(method = %request.method, error = %e.message, "Notification failed");
            }
            continue;
        };

        let response = handle_request(ctx, &request.method, &request.params, id);
        write_line(&mut writer, &response);
        handled += 1;
    }

    handled
}

fn handle_request(ctx: &HandlerContext, method: &str, params: &Option<Value>, id: Value) -> Value {
    let encoded = match handlers::dispatch(ctx, method, params) {
        Ok(result) => serde_json::to_value(JsonRpcResponse::new(id, result)),
        Err(error) => {
            debug!(method, code = error.code, message = %error.message, "Request failed");
            serde_json::to_value(JsonRpcErrorResponse::new(id, error))
        }
    };
    encoded.unwrap_or_else(|e| {
        error!(error = %e, "Failed to encode response");
        Value::Null
    })
}

fn write_line<W: Write, T: serde::Serialize>(writer: &mut W, value: &T) {
    let written = serde_json::to_writer(&mut *writer, value)
        .map_err(io::Error::from)
        .and_then(|()| writer.write_all(b"\n"))
        .and_then(|()| writer.flush());
    if let Err(e) = written {
        error!(error = %e, "Failed to write response");
    }
}
