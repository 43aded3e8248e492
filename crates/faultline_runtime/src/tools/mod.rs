//! Tool handlers exposed to the agent. Each tool is an async callable taking
//! typed JSON arguments plus the workspace id bound at build time, returning
//! a human/LLM-readable summary string. "No data" is rendered as a
//! descriptive string, never an error; upstream failures come back as
//! descriptive error strings so the agent can adapt.

pub mod code;
pub mod observability;

use crate::errors::FaultlineResult;
use async_trait::async_trait;

/// A callable tool implementation. The workspace id is supplied by the
/// runtime, never by the model.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn invoke(&self, arguments: serde_json::Value, workspace_id: &str) -> FaultlineResult<String>;
}

/// Pull a required string argument, with a readable error string on miss.
pub(crate) fn required_str<'a>(args: &'a serde_json::Value, key: &str) -> Result<&'a str, String> {
    args.get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| format!("missing required argument '{}'", key))
}

pub(crate) fn optional_u64(args: &serde_json::Value, key: &str, default: u64) -> u64 {
    args.get(key).and_then(|v| v.as_u64()).unwrap_or(default)
}
