//! Built-in local function tools
//!
//! A small set of tools available in every gateway, registered at boot.

use serde_json::{json, Value};
use std::sync::Arc;

use toolgate_core::{Capability, ParamSchema, ParamType, ToolDescriptor};

use crate::handlers::{BoxedTool, FnTool};

/// Descriptors and handlers for the built-in tool set.
pub fn builtin_tools() -> Vec<(ToolDescriptor, BoxedTool)> {
    vec![echo_tool(), time_tool()]
}

fn echo_tool() -> (ToolDescriptor, BoxedTool) {
    let descriptor = ToolDescriptor::function("echo", "Echo", "Echo input back", "builtin.echo")
        .with_capability(
            Capability::new("run", "Echo the given text")
                .with_param("text", ParamSchema::required(ParamType::String, "Text to echo"))
                .with_example(json!({"text": "hello"})),
        )
        .with_tags(vec!["builtin".into(), "diagnostics".into()]);

    let handler: BoxedTool = Arc::new(FnTool::new("builtin.echo", |_action, params| {
        let text = params
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or_default();
        Ok(json!({ "echoed": text }))
    }));

    (descriptor, handler)
}

fn time_tool() -> (ToolDescriptor, BoxedTool) {
    let descriptor = ToolDescriptor::function(
        "gateway_time",
        "Gateway Time",
        "Current gateway wall-clock time",
        "builtin.time",
    )
    .with_capability(Capability::new("now", "Current time as RFC 3339"))
    .with_tags(vec!["builtin".into(), "diagnostics".into()]);

    let handler: BoxedTool = Arc::new(FnTool::new("builtin.time", |_action, _params| {
        Ok(json!({ "now": chrono::Utc::now().to_rfc3339() }))
    }));

    (descriptor, handler)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    #[tokio::test]
    async fn test_echo_roundtrip() {
        let (descriptor, handler) = echo_tool();
        assert_eq!(descriptor.registry_id, "echo");
        assert!(descriptor.capability("run").is_some());

        let mut params = Map::new();
        params.insert("text".into(), json!("hello"));
        let result = handler.execute("run", params).await.unwrap();
        assert_eq!(result, json!({"echoed": "hello"}));
    }

    #[tokio::test]
    async fn test_time_returns_timestamp() {
        let (_, handler) = time_tool();
        let result = handler.execute("now", Map::new()).await.unwrap();
        assert!(result.get("now").and_then(Value::as_str).is_some());
    }

    #[test]
    fn test_builtins_unique_ids() {
        let tools = builtin_tools();
        let mut ids: Vec<_> = tools.iter().map(|(d, _)| d.registry_id.clone()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), tools.len());
    }
}
