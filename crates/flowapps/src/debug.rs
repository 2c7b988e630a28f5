use async_trait::async_trait;
use flowcore::{Action, ActionItem, ActionSink, IntegrationError, JsonObjectExt, RunContext};
use serde_json::Value as JsonValue;

/// Logs its message and passes the previous step's output through
pub struct LogAction;

#[async_trait]
impl Action for LogAction {
    fn key(&self) -> &str {
        "log"
    }

    fn name(&self) -> &str {
        "Log"
    }

    fn description(&self) -> &str {
        "Logs a message and the previous step's output for debugging"
    }

    async fn run(&self, ctx: &RunContext, output: &ActionSink) -> Result<(), IntegrationError> {
        let message = ctx
            .parameters()
            .get_str("message")
            .unwrap_or("(no message)")
            .to_string();

        ctx.events.info(format!("DEBUG: {}", message));
        tracing::info!(
            step_id = ?ctx.step.as_ref().map(|s| s.id),
            message = %message,
            "debug log"
        );

        // Also log the previous output for visibility
        if let Some(previous) = &ctx.previous_output {
            for (key, value) in previous {
                ctx.events.info(format!("  {}: {}", key, value));
            }
        }

        let mut raw = flowcore::JsonObject::new();
        raw.insert("message".to_string(), JsonValue::String(message));
        raw.insert(
            "previous".to_string(),
            ctx.previous_output
                .clone()
                .map(JsonValue::Object)
                .unwrap_or(JsonValue::Null),
        );
        output.set(ActionItem::new(raw))
    }
}
