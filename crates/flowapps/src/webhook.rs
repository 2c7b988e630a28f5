use async_trait::async_trait;
use flowcore::{
    IntegrationError, JsonObject, RunContext, Trigger, TriggerItem, TriggerKind, TriggerSink,
};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Emits the received webhook payload as a single item.
///
/// Every receipt is a distinct event, so each item gets a fresh id. A payload
/// that is not a JSON object is wrapped as `{ "body": <payload> }`.
pub struct CatchRawWebhook;

#[async_trait]
impl Trigger for CatchRawWebhook {
    fn key(&self) -> &str {
        "catch_raw_webhook"
    }

    fn name(&self) -> &str {
        "Catch raw webhook"
    }

    fn description(&self) -> &str {
        "Triggers when the webhook receives a request"
    }

    fn kind(&self) -> TriggerKind {
        TriggerKind::Webhook
    }

    async fn run(&self, ctx: &RunContext, items: &TriggerSink) -> Result<(), IntegrationError> {
        let raw = match ctx.request.clone() {
            Some(JsonValue::Object(body)) => body,
            Some(JsonValue::Null) | None => JsonObject::new(),
            Some(other) => {
                let mut wrapped = JsonObject::new();
                wrapped.insert("body".to_string(), other);
                wrapped
            }
        };
        items
            .push(TriggerItem::new(Uuid::new_v4().to_string(), raw))
            .await
    }
}
