//! SSE framing: `event:` line, `data:` line, blank terminator.

use serde_json::Value;

/// Heartbeat comment sent on a quiet connection to keep proxies from
/// closing it.
pub const HEARTBEAT_FRAME: &str = ": heartbeat\n\n";

/// Encodes one SSE frame. The payload is serialized compactly on a single
/// `data:` line.
pub fn encode_sse(kind: &str, payload: &Value) -> String {
    let data = serde_json::to_string(payload).unwrap_or_else(|_| "{}".to_string());
    format!("event: {kind}\ndata: {data}\n\n")
}
