use async_trait::async_trait;
use flowcore::{
    json_object, Action, ActionItem, ActionSink, IntegrationError, JsonObjectExt, RunContext,
};
use serde_json::{json, Value as JsonValue};

/// Parse the `input` string parameter as JSON
pub struct ParseJson;

#[async_trait]
impl Action for ParseJson {
    fn key(&self) -> &str {
        "parse_json"
    }

    fn name(&self) -> &str {
        "Parse JSON"
    }

    fn description(&self) -> &str {
        "Parse a JSON string into structured data"
    }

    async fn run(&self, ctx: &RunContext, output: &ActionSink) -> Result<(), IntegrationError> {
        let input = ctx
            .parameters()
            .get_str("input")
            .ok_or_else(|| IntegrationError::new("parameter 'input' must be a string"))?;

        let parsed: JsonValue = serde_json::from_str(input).map_err(|e| {
            IntegrationError::new(format!("JSON parse error: {}", e))
                .with_detail("line", e.line())
                .with_detail("column", e.column())
        })?;

        output.set(ActionItem::new(json_object(json!({ "value": parsed }))))
    }
}

/// Serialize the `value` parameter to a JSON string
pub struct StringifyJson;

#[async_trait]
impl Action for StringifyJson {
    fn key(&self) -> &str {
        "stringify_json"
    }

    fn name(&self) -> &str {
        "Stringify JSON"
    }

    fn description(&self) -> &str {
        "Convert a value to a JSON string"
    }

    async fn run(&self, ctx: &RunContext, output: &ActionSink) -> Result<(), IntegrationError> {
        let value = ctx
            .parameters()
            .get("value")
            .ok_or_else(|| IntegrationError::new("parameter 'value' is required"))?;

        let pretty = ctx.parameters().get_bool("pretty").unwrap_or(false);
        let encoded = if pretty {
            serde_json::to_string_pretty(value)
        } else {
            serde_json::to_string(value)
        }
        .map_err(|e| IntegrationError::new(format!("JSON stringify error: {}", e)))?;

        output.set(ActionItem::new(json_object(json!({ "json": encoded }))))
    }
}
